//! End-to-end pipeline tests against a synthetic in-memory extractor.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use headlens_core::cache::ProfileKey;
use headlens_core::config::ProfilerConfig;
use headlens_core::corpus::Corpus;
use headlens_core::error::{ProfilerError, Result};
use headlens_core::extract::{
    AttentionExtractor, AttentionMatrix, HeadIdentity, ModelShape, SentenceAttention,
};
use headlens_core::pipeline::Profiler;
use headlens_core::query::QueryService;
use headlens_core::snapshot::ProfileSnapshot;

/// Deterministic fake model: per-head attention derived from integer
/// mixing so different heads show different behavioral statistics.
struct SyntheticExtractor {
    shape: ModelShape,
    model_id: String,
    fail_sentences: HashSet<String>,
    truncate_matrices: bool,
    calls: AtomicUsize,
}

impl SyntheticExtractor {
    fn new(layers: usize, heads: usize) -> Self {
        Self {
            shape: ModelShape::new(layers, heads),
            model_id: "synthetic-test-model".into(),
            fail_sentences: HashSet::new(),
            truncate_matrices: false,
            calls: AtomicUsize::new(0),
        }
    }

    fn weights(&self, identity: HeadIdentity, tokens: usize, salt: usize) -> Vec<Vec<f64>> {
        (0..tokens)
            .map(|i| {
                let row: Vec<f64> = (0..tokens)
                    .map(|j| {
                        let mix =
                            (identity.layer * 31 + identity.head * 17 + i * 7 + j * 3 + salt * 13)
                                % 11;
                        1.0 + mix as f64
                    })
                    .collect();
                let sum: f64 = row.iter().sum();
                row.iter().map(|w| w / sum).collect()
            })
            .collect()
    }
}

#[async_trait]
impl AttentionExtractor for SyntheticExtractor {
    fn shape(&self) -> ModelShape {
        self.shape
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn extract(&self, sentence: &str) -> Result<SentenceAttention> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_sentences.contains(sentence) {
            return Err(ProfilerError::extraction(format!(
                "inference failed for: {sentence}"
            )));
        }
        let tokens: Vec<String> = sentence.split_whitespace().map(String::from).collect();
        let salt = sentence.len();
        let size = if self.truncate_matrices && tokens.len() > 1 {
            tokens.len() - 1
        } else {
            tokens.len()
        };
        let mut heads = HashMap::new();
        for identity in self.shape.head_identities() {
            heads.insert(
                identity,
                AttentionMatrix::new(self.weights(identity, size, salt))?,
            );
        }
        Ok(SentenceAttention {
            sentence: sentence.to_string(),
            tokens,
            heads,
        })
    }
}

fn corpus() -> Corpus {
    Corpus::from_sentences([
        "The cat sits on the mat today",
        "The cats sit on the mat",
        "She sells seashells by the seashore",
        "I do not like green eggs",
        "Where did you go yesterday afternoon",
        "The ball was thrown by the boy",
        "The book that I read was interesting",
        "We walked through the dark forest",
        "She is taller than her brother",
        "Yesterday I went to the store",
        "If it rains we stay inside",
        "You should eat your vegetables now",
    ])
}

fn config(k: usize) -> ProfilerConfig {
    let mut config = ProfilerConfig::default();
    config.cluster_count = k;
    config.min_viable_sentences = 10;
    config
}

fn profiler(extractor: SyntheticExtractor, k: usize) -> Profiler {
    Profiler::new(Arc::new(extractor), corpus(), config(k))
}

#[tokio::test]
async fn test_snapshot_has_one_point_per_head() {
    let profiler = profiler(SyntheticExtractor::new(2, 3), 3);
    let snapshot = profiler.snapshot().await.unwrap();
    assert_eq!(snapshot.points.len(), 6);
    // Canonical layer-major order.
    assert_eq!(snapshot.points[4].identity(), HeadIdentity::new(1, 1));
    assert_eq!(snapshot.metadata.shape.head_count(), 6);
}

#[tokio::test]
async fn test_every_head_in_exactly_one_contiguous_cluster() {
    let profiler = profiler(SyntheticExtractor::new(2, 3), 3);
    let snapshot = profiler.snapshot().await.unwrap();
    assert_eq!(snapshot.assignments.len(), 6);
    for &cluster in &snapshot.assignments {
        assert!(cluster < 3);
    }
    let member_total: usize = snapshot.clusters.iter().map(|c| c.member_count).sum();
    assert_eq!(member_total, 6);
    assert!((-1.0..=1.0).contains(&snapshot.metadata.stability_score));
}

#[tokio::test]
async fn test_failed_sentence_is_dropped_not_fatal() {
    let mut extractor = SyntheticExtractor::new(1, 2);
    extractor
        .fail_sentences
        .insert("The cats sit on the mat".into());
    let profiler = profiler(extractor, 2);
    let snapshot = profiler.snapshot().await.unwrap();
    assert_eq!(snapshot.metadata.sentences_failed, 1);
    assert_eq!(snapshot.metadata.corpus_sentences, 12);
}

#[tokio::test]
async fn test_insufficient_corpus_is_fatal() {
    let mut extractor = SyntheticExtractor::new(1, 2);
    for sentence in corpus().sentences() {
        extractor.fail_sentences.insert(sentence.clone());
    }
    let profiler = profiler(extractor, 2);
    let err = profiler.snapshot().await.unwrap_err();
    // The pipeline error reaches the caller through the cache.
    assert!(matches!(err, ProfilerError::CacheCompute(_)));
    assert!(err.to_string().contains("Insufficient corpus"));
}

#[tokio::test]
async fn test_malformed_observation_fails_fast() {
    let mut extractor = SyntheticExtractor::new(1, 2);
    extractor.truncate_matrices = true;
    let profiler = profiler(extractor, 2);
    let err = profiler.snapshot().await.unwrap_err();
    assert!(err.to_string().contains("Invalid observation"));
}

#[tokio::test]
async fn test_cluster_count_above_heads_fails() {
    let profiler = profiler(SyntheticExtractor::new(1, 2), 5);
    let err = profiler.snapshot().await.unwrap_err();
    assert!(err.to_string().contains("exceeds head count"));
}

#[test]
fn test_compute_future_is_spawnable() {
    // The cache runs the pipeline inside `tokio::spawn`, so the compute
    // future must be `Send + 'static` even though it borrows nothing the
    // caller keeps.
    fn assert_spawnable<F: std::future::Future + Send + 'static>(f: F) -> F {
        f
    }
    let fut = assert_spawnable(headlens_core::pipeline::compute_snapshot(
        Arc::new(SyntheticExtractor::new(1, 2)) as Arc<dyn AttentionExtractor>,
        corpus(),
        config(2),
    ));
    drop(fut);
}

#[tokio::test]
async fn test_concurrent_snapshots_compute_once() {
    let profiler = Arc::new(profiler(SyntheticExtractor::new(2, 2), 2));
    let mut handles = Vec::new();
    for _ in 0..8 {
        let profiler = Arc::clone(&profiler);
        handles.push(tokio::spawn(async move { profiler.snapshot().await }));
    }
    let mut snapshots = Vec::new();
    for handle in handles {
        snapshots.push(handle.await.unwrap().unwrap());
    }
    assert_eq!(profiler.cache().computations(), 1);
    // Every caller sees the same immutable snapshot.
    for snapshot in &snapshots[1..] {
        assert!(Arc::ptr_eq(snapshot, &snapshots[0]));
    }
}

#[tokio::test]
async fn test_corpus_change_changes_cache_key() {
    let extractor = Arc::new(SyntheticExtractor::new(1, 2));
    let a = Profiler::new(Arc::clone(&extractor) as Arc<dyn AttentionExtractor>, corpus(), config(2));
    let mut sentences: Vec<String> = corpus().sentences().to_vec();
    sentences[0] = "A completely different sentence".into();
    let b = Profiler::new(extractor, Corpus::from_sentences(sentences), config(2));
    assert_ne!(a.profile_key().cache_key(), b.profile_key().cache_key());

    let mut seed_changed = config(2);
    seed_changed.reducer.seed = 7;
    let c = ProfileKey {
        model_id: "synthetic-test-model".into(),
        corpus_hash: corpus().content_hash(),
        cluster_count: 2,
        reducer_seed: seed_changed.reducer.seed,
        clusterer_seed: seed_changed.clusterer.seed,
    };
    assert_ne!(a.profile_key().cache_key(), c.cache_key());
}

#[tokio::test]
async fn test_snapshot_roundtrip_no_recomputation_drift() {
    let profiler = profiler(SyntheticExtractor::new(2, 2), 2);
    let snapshot = profiler.snapshot().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("profile.json");
    snapshot.save(&path).await.unwrap();
    let restored = ProfileSnapshot::load(&path).await.unwrap();
    assert_eq!(*snapshot, restored);
}

#[tokio::test]
async fn test_evidence_keeps_global_heaviest_edge() {
    // Hand-built scenario: one head, two sentences; the per-sentence best
    // edges are 0.9 and 0.95 and topN=1 must keep only 0.95.
    struct TwoSentenceExtractor;

    #[async_trait]
    impl AttentionExtractor for TwoSentenceExtractor {
        fn shape(&self) -> ModelShape {
            ModelShape::new(1, 1)
        }

        fn model_id(&self) -> &str {
            "two-sentence"
        }

        async fn extract(&self, sentence: &str) -> Result<SentenceAttention> {
            let (tokens, rows) = if sentence == "the cat" {
                (vec!["the", "cat"], vec![vec![0.1, 0.9], vec![0.5, 0.5]])
            } else {
                (vec!["dog", "ran"], vec![vec![0.05, 0.95], vec![0.5, 0.5]])
            };
            let mut heads = HashMap::new();
            heads.insert(HeadIdentity::new(0, 0), AttentionMatrix::new(rows)?);
            Ok(SentenceAttention {
                sentence: sentence.to_string(),
                tokens: tokens.into_iter().map(String::from).collect(),
                heads,
            })
        }
    }

    let mut config = ProfilerConfig::default();
    config.cluster_count = 1;
    config.min_viable_sentences = 2;
    config.evidence.top_n = 1;
    let profiler = Profiler::new(
        Arc::new(TwoSentenceExtractor),
        Corpus::from_sentences(["the cat", "dog ran"]),
        config,
    );
    let snapshot = profiler.snapshot().await.unwrap();
    let entries = &snapshot.evidence[0].entries;
    assert_eq!(entries.len(), 1);
    assert!((entries[0].weight - 0.95).abs() < 1e-12);
    assert_eq!(entries[0].from_token, "dog");
    assert_eq!(entries[0].to_token, "ran");
    assert_eq!(entries[0].sentence, "dog ran");
}

#[tokio::test]
async fn test_flat_features_profile_without_crash() {
    // Uniform attention everywhere: feature vectors are identical across
    // heads, the projection collapses, and clustering is trivially
    // reproducible (stability exactly 1).
    struct UniformExtractor;

    #[async_trait]
    impl AttentionExtractor for UniformExtractor {
        fn shape(&self) -> ModelShape {
            ModelShape::new(2, 2)
        }

        fn model_id(&self) -> &str {
            "uniform"
        }

        async fn extract(&self, sentence: &str) -> Result<SentenceAttention> {
            let tokens: Vec<String> = sentence.split_whitespace().map(String::from).collect();
            let n = tokens.len();
            let rows = vec![vec![1.0 / n as f64; n]; n];
            let mut heads = HashMap::new();
            for identity in self.shape().head_identities() {
                heads.insert(identity, AttentionMatrix::new(rows.clone())?);
            }
            Ok(SentenceAttention {
                sentence: sentence.to_string(),
                tokens,
                heads,
            })
        }
    }

    let mut config = ProfilerConfig::default();
    config.cluster_count = 2;
    config.min_viable_sentences = 3;
    config.reducer.iterations = 100;
    let profiler = Profiler::new(
        Arc::new(UniformExtractor),
        Corpus::from_sentences(["a b c d", "e f g h", "i j k l"]),
        config,
    );
    let snapshot = profiler.snapshot().await.unwrap();
    assert_eq!(snapshot.points.len(), 4);
    assert_eq!(snapshot.metadata.stability_score, 1.0);
    assert!(snapshot.points.iter().all(|p| {
        p.x.is_finite() && p.y.is_finite() && p.z.is_finite()
    }));
}

#[tokio::test]
async fn test_query_service_reads_computed_snapshot() {
    let profiler = profiler(SyntheticExtractor::new(2, 3), 3);
    let snapshot = profiler.snapshot().await.unwrap();
    let service = QueryService::new(snapshot);

    assert_eq!(service.points().len(), 6);
    let detail = service.head_detail(1, 2).unwrap();
    assert_eq!(detail.identity, HeadIdentity::new(1, 2));
    assert!(!detail.explanations.is_empty());
    assert!(detail.evidence.len() <= 3);

    let profile = service.cluster_profile(detail.cluster).unwrap();
    assert!(profile.members.contains(&detail.identity));

    assert!(service.head_detail(9, 0).is_err());
    let layers = service.layer_distribution();
    assert_eq!(layers.len(), 2);
    let total: usize = layers
        .iter()
        .flat_map(|l| l.counts.iter())
        .map(|c| c.heads)
        .sum();
    assert_eq!(total, 6);
}

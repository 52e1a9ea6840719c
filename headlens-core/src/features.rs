//! Behavioral feature extraction: turns per-sentence attention matrices
//! into one fixed-length feature vector per head.
//!
//! Dims 0-6 are per-sentence statistics aggregated by mean; dim 7 is the
//! variance of the entropy statistic across sentences (pattern
//! consistency). A statistic undefined for a sentence (positional distance
//! on a single token, say) is excluded from that statistic's denominator
//! rather than zero-padded.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ProfilerConfig;
use crate::corpus::Corpus;
use crate::error::{ProfilerError, Result};
use crate::evidence::{EdgeCandidate, strongest_edge};
use crate::extract::{AttentionExtractor, AttentionMatrix, ModelShape};

/// Length of every head's feature vector. Fixed within a run; identical
/// across heads.
pub const FEATURE_COUNT: usize = 8;

/// Human-readable schema, index-aligned with [`FeatureKind`].
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "Self-attention ratio",
    "Forward attention",
    "Backward attention",
    "Attention entropy",
    "Distance-weighted attention",
    "Boundary-token mass",
    "Row-to-row variance",
    "Entropy variance across sentences",
];

/// Feature schema indices. The label rule table and the explanation
/// builder both address dimensions through this enum, never bare ints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    SelfAttention,
    ForwardAttention,
    BackwardAttention,
    Entropy,
    DistanceWeighted,
    BoundaryMass,
    RowVariance,
    EntropyVariance,
}

impl FeatureKind {
    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn name(&self) -> &'static str {
        FEATURE_NAMES[self.index()]
    }
}

/// One head's aggregated feature vector.
pub type HeadFeatureVector = Vec<f64>;

/// Feature vectors for every head, in canonical (layer-major) order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureTable {
    pub shape: ModelShape,
    /// `vectors[flat_head_index]`, each of length [`FEATURE_COUNT`].
    pub vectors: Vec<HeadFeatureVector>,
}

/// Output of a corpus pass: features plus the raw material for the
/// evidence index (strongest edge per head per surviving sentence).
#[derive(Debug, Clone)]
pub struct FeatureBuild {
    pub features: FeatureTable,
    /// `edges[flat_head_index]` = one candidate per sentence that had one.
    pub edges: Vec<Vec<EdgeCandidate>>,
    pub sentences_used: usize,
    pub sentences_failed: usize,
}

// Per-sentence scalar statistics (dims 0-6). `None` = undefined for this
// sentence; excluded from the mean's denominator.

fn self_attention_ratio(m: &AttentionMatrix) -> f64 {
    let n = m.len();
    (0..n).map(|i| m.get(i, i)).sum::<f64>() / n as f64
}

fn forward_attention(m: &AttentionMatrix) -> Option<f64> {
    triangle_mean(m, |i, j| j > i)
}

fn backward_attention(m: &AttentionMatrix) -> Option<f64> {
    triangle_mean(m, |i, j| j < i)
}

fn triangle_mean(m: &AttentionMatrix, keep: impl Fn(usize, usize) -> bool) -> Option<f64> {
    let n = m.len();
    if n < 2 {
        return None;
    }
    let mut sum = 0.0;
    let mut count = 0usize;
    for i in 0..n {
        for j in 0..n {
            if keep(i, j) {
                sum += m.get(i, j);
                count += 1;
            }
        }
    }
    Some(sum / count as f64)
}

fn mean_row_entropy(m: &AttentionMatrix) -> f64 {
    let n = m.len();
    let total: f64 = m
        .rows()
        .iter()
        .map(|row| -row.iter().map(|&w| w * (w + 1e-10).ln()).sum::<f64>())
        .sum();
    total / n as f64
}

/// Mean attended distance per query: sum_ij w_ij * |i - j| / n. Rows sum
/// to one, so this is the expectation of |i - j| under each row's
/// distribution, averaged over rows.
fn distance_weighted(m: &AttentionMatrix) -> Option<f64> {
    let n = m.len();
    if n < 2 {
        return None;
    }
    let mut total = 0.0;
    for i in 0..n {
        for j in 0..n {
            total += m.get(i, j) * (i as f64 - j as f64).abs();
        }
    }
    Some(total / n as f64)
}

/// Fraction of each row's mass on the first and last token, averaged over
/// rows.
fn boundary_mass(m: &AttentionMatrix) -> Option<f64> {
    let n = m.len();
    if n < 2 {
        return None;
    }
    let total: f64 = (0..n).map(|i| m.get(i, 0) + m.get(i, n - 1)).sum();
    Some(total / n as f64)
}

/// Per-column variance of weight across rows, averaged over columns. Low
/// values mean every query attends the same way (a "columnar" head).
fn row_to_row_variance(m: &AttentionMatrix) -> Option<f64> {
    let n = m.len();
    if n < 2 {
        return None;
    }
    let mut total = 0.0;
    for j in 0..n {
        let mean = (0..n).map(|i| m.get(i, j)).sum::<f64>() / n as f64;
        let var = (0..n).map(|i| (m.get(i, j) - mean).powi(2)).sum::<f64>() / n as f64;
        total += var;
    }
    Some(total / n as f64)
}

/// Running aggregation state for one head. Deterministic: sentences are
/// folded in corpus order regardless of extraction completion order.
#[derive(Debug, Clone)]
struct HeadAccumulator {
    sums: [f64; 7],
    counts: [usize; 7],
    entropy_sq_sum: f64,
}

impl HeadAccumulator {
    fn new() -> Self {
        Self {
            sums: [0.0; 7],
            counts: [0; 7],
            entropy_sq_sum: 0.0,
        }
    }

    fn observe(&mut self, m: &AttentionMatrix) {
        let stats: [Option<f64>; 7] = [
            Some(self_attention_ratio(m)),
            forward_attention(m),
            backward_attention(m),
            Some(mean_row_entropy(m)),
            distance_weighted(m),
            boundary_mass(m),
            row_to_row_variance(m),
        ];
        for (slot, stat) in stats.iter().enumerate() {
            if let Some(v) = stat {
                self.sums[slot] += v;
                self.counts[slot] += 1;
            }
        }
        if let Some(e) = stats[FeatureKind::Entropy.index()] {
            self.entropy_sq_sum += e * e;
        }
    }

    fn finish(&self, identity_name: &str) -> HeadFeatureVector {
        let mut vector = Vec::with_capacity(FEATURE_COUNT);
        for slot in 0..7 {
            if self.counts[slot] == 0 {
                warn!(
                    head = identity_name,
                    feature = FEATURE_NAMES[slot],
                    "statistic undefined for every sentence, defaulting to 0"
                );
                vector.push(0.0);
            } else {
                vector.push(self.sums[slot] / self.counts[slot] as f64);
            }
        }
        // Population variance of entropy across sentences.
        let ent = FeatureKind::Entropy.index();
        let variance = if self.counts[ent] == 0 {
            0.0
        } else {
            let n = self.counts[ent] as f64;
            let mean = self.sums[ent] / n;
            (self.entropy_sq_sum / n - mean * mean).max(0.0)
        };
        vector.push(variance);
        vector
    }
}

/// Run the corpus through the extractor and aggregate one feature vector
/// per head. Failed sentences are dropped; the run fails with
/// [`ProfilerError::InsufficientCorpus`] when fewer than
/// `config.min_viable_sentences` survive.
pub async fn build_features(
    corpus: &Corpus,
    extractor: &dyn AttentionExtractor,
    config: &ProfilerConfig,
) -> Result<FeatureBuild> {
    let shape = extractor.shape();
    let head_count = shape.head_count();

    // Extraction is independent per sentence: run with bounded concurrency,
    // then fold results back in corpus order so the reduction is
    // deterministic. Sentences are moved into the futures so the combined
    // future stays spawnable from the cache.
    let sentences: Vec<String> = corpus.sentences().to_vec();
    let mut results: Vec<(usize, Result<crate::extract::SentenceAttention>)> =
        stream::iter(sentences.into_iter().enumerate())
            .map(|(index, sentence)| async move { (index, extractor.extract(&sentence).await) })
            .buffer_unordered(config.extraction_concurrency)
            .collect()
            .await;
    results.sort_by_key(|(index, _)| *index);

    let mut accumulators: Vec<HeadAccumulator> =
        (0..head_count).map(|_| HeadAccumulator::new()).collect();
    let mut edges: Vec<Vec<EdgeCandidate>> = vec![Vec::new(); head_count];
    let mut used = 0usize;
    let mut failed = 0usize;

    for (index, outcome) in results {
        let attention = match outcome {
            Ok(attention) => attention,
            Err(e) => {
                warn!(sentence_index = index, error = %e, "dropping sentence after extraction failure");
                failed += 1;
                continue;
            }
        };
        // A malformed observation is a fault of the extractor, not of the
        // corpus: fail fast instead of averaging skewed numbers.
        attention.validate_against(&shape)?;

        for identity in shape.head_identities() {
            let flat = identity.flat_index(&shape);
            let matrix = &attention.heads[&identity];
            accumulators[flat].observe(matrix);
            if let Some(edge) = strongest_edge(
                &attention.sentence,
                &attention.tokens,
                matrix,
                config.evidence.min_weight,
            ) {
                edges[flat].push(edge);
            }
        }
        used += 1;
    }

    if used < config.min_viable_sentences {
        return Err(ProfilerError::InsufficientCorpus {
            survived: used,
            required: config.min_viable_sentences,
        });
    }
    debug!(
        sentences_used = used,
        sentences_failed = failed,
        heads = head_count,
        "feature aggregation complete"
    );

    let vectors = shape
        .head_identities()
        .iter()
        .map(|identity| accumulators[identity.flat_index(&shape)].finish(&identity.to_string()))
        .collect();

    Ok(FeatureBuild {
        features: FeatureTable { shape, vectors },
        edges,
        sentences_used: used,
        sentences_failed: failed,
    })
}

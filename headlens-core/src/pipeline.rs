//! Pipeline orchestration: wires extraction, feature building, clustering,
//! labeling, projection, and evidence into one cached snapshot.

use std::sync::Arc;
use tracing::{info, warn};

use crate::cache::{ProfileCache, ProfileKey};
use crate::cluster::{assign_labels, default_label_rules, kmeans, stability_score};
use crate::config::ProfilerConfig;
use crate::corpus::Corpus;
use crate::error::Result;
use crate::evidence::top_evidence;
use crate::extract::AttentionExtractor;
use crate::features::{FEATURE_NAMES, build_features};
use crate::reduce::{project, standardize};
use crate::snapshot::{
    ClusterProfile, FEATURE_SPACE_DISCLAIMER, HeadEvidence, HeadFeatures, ProfileSnapshot,
    ProjectedPoint, SnapshotMetadata,
};

/// The profiler facade: owns the extractor seam, the corpus, the
/// configuration, and the snapshot cache. All reads go through
/// [`Profiler::snapshot`], which computes at most once per key.
pub struct Profiler {
    extractor: Arc<dyn AttentionExtractor>,
    corpus: Corpus,
    config: ProfilerConfig,
    cache: ProfileCache,
}

impl Profiler {
    pub fn new(extractor: Arc<dyn AttentionExtractor>, corpus: Corpus, config: ProfilerConfig) -> Self {
        Self {
            extractor,
            corpus,
            config,
            cache: ProfileCache::new(),
        }
    }

    /// The cache key for the current model/corpus/parameter combination.
    pub fn profile_key(&self) -> ProfileKey {
        ProfileKey {
            model_id: self.extractor.model_id().to_string(),
            corpus_hash: self.corpus.content_hash(),
            cluster_count: self.config.cluster_count,
            reducer_seed: self.config.reducer.seed,
            clusterer_seed: self.config.clusterer.seed,
        }
    }

    /// Return the profile snapshot, computing it on first access.
    pub async fn snapshot(&self) -> Result<Arc<ProfileSnapshot>> {
        let key = self.profile_key();
        let extractor = Arc::clone(&self.extractor);
        let corpus = self.corpus.clone();
        let config = self.config.clone();
        self.cache
            .get_or_compute(&key, move || compute_snapshot(extractor, corpus, config))
            .await
    }

    /// Drop the cached snapshot for the current key.
    pub async fn invalidate(&self) {
        self.cache.invalidate(&self.profile_key()).await;
    }

    pub fn cache(&self) -> &ProfileCache {
        &self.cache
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }
}

/// Run the full pipeline once. Called only through the cache.
pub async fn compute_snapshot(
    extractor: Arc<dyn AttentionExtractor>,
    corpus: Corpus,
    config: ProfilerConfig,
) -> Result<ProfileSnapshot> {
    let shape = extractor.shape();
    let model_id = extractor.model_id().to_string();
    info!(
        model = %model_id,
        layers = shape.layers,
        heads = shape.heads_per_layer,
        sentences = corpus.len(),
        "profiling attention heads"
    );

    let build = build_features(&corpus, extractor.as_ref(), &config).await?;

    let standardized = standardize(&build.features.vectors);
    let dims = build.features.vectors.first().map_or(0, Vec::len);
    if standardized.degenerate_dims == dims {
        // Flat feature matrix: clustering and projection both collapse.
        // Documented as non-fatal; the snapshot is still well-formed.
        warn!("all feature dimensions are degenerate, proceeding with a flat profile");
    }

    let clustering = kmeans(&standardized.matrix, config.cluster_count, &config.clusterer)?;
    let labels = assign_labels(&clustering.centroids, &standardized.matrix, &default_label_rules());
    let coordinates = project(&standardized.matrix, &config.reducer);
    let stability = stability_score(&standardized.matrix, config.cluster_count, &config.clusterer)?;

    let identities = shape.head_identities();
    let points = identities
        .iter()
        .map(|identity| {
            let flat = identity.flat_index(&shape);
            let cluster = clustering.assignments[flat];
            ProjectedPoint {
                layer: identity.layer,
                head: identity.head,
                x: coordinates[flat][0],
                y: coordinates[flat][1],
                z: coordinates[flat][2],
                cluster,
                label: labels[cluster],
            }
        })
        .collect();

    let clusters = (0..config.cluster_count)
        .map(|id| {
            let members: Vec<_> = identities
                .iter()
                .copied()
                .filter(|identity| clustering.assignments[identity.flat_index(&shape)] == id)
                .collect();
            ClusterProfile {
                id,
                label: labels[id],
                description: labels[id].description().to_string(),
                member_count: members.len(),
                members,
                centroid: clustering.centroids[id].clone(),
            }
        })
        .collect();

    let evidence = identities
        .iter()
        .map(|identity| {
            let flat = identity.flat_index(&shape);
            HeadEvidence {
                layer: identity.layer,
                head: identity.head,
                entries: top_evidence(build.edges[flat].clone(), config.evidence.top_n),
            }
        })
        .collect();

    let features = identities
        .iter()
        .map(|identity| HeadFeatures {
            layer: identity.layer,
            head: identity.head,
            values: build.features.vectors[identity.flat_index(&shape)].clone(),
        })
        .collect();

    info!(stability, "profile computed");
    Ok(ProfileSnapshot {
        points,
        assignments: clustering.assignments,
        clusters,
        evidence,
        features,
        metadata: SnapshotMetadata {
            model_id,
            shape,
            corpus_sentences: corpus.len(),
            corpus_hash: corpus.content_hash(),
            sentences_failed: build.sentences_failed,
            cluster_count: config.cluster_count,
            stability_score: stability,
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            computed_at: chrono::Utc::now(),
            disclaimer: FEATURE_SPACE_DISCLAIMER.to_string(),
        },
    })
}

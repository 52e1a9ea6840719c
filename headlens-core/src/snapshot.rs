//! The immutable profiler output bundle and its on-disk JSON form.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::cluster::RoleLabel;
use crate::error::Result;
use crate::evidence::EdgeCandidate;
use crate::extract::{HeadIdentity, ModelShape};
use crate::features::HeadFeatureVector;

/// One head's position in the 3D behavioral embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectedPoint {
    pub layer: usize,
    pub head: usize,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub cluster: usize,
    pub label: RoleLabel,
}

impl ProjectedPoint {
    pub fn identity(&self) -> HeadIdentity {
        HeadIdentity::new(self.layer, self.head)
    }
}

/// Per-cluster summary: role, members, centroid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterProfile {
    pub id: usize,
    pub label: RoleLabel,
    pub description: String,
    pub member_count: usize,
    pub members: Vec<HeadIdentity>,
    /// Centroid in the standardized feature space the clustering ran in.
    pub centroid: Vec<f64>,
}

/// Evidence list for one head, descending by weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadEvidence {
    pub layer: usize,
    pub head: usize,
    pub entries: Vec<EdgeCandidate>,
}

/// Aggregated feature vector for one head (raw, pre-standardization, so
/// explanations can speak in interpretable units).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadFeatures {
    pub layer: usize,
    pub head: usize,
    pub values: HeadFeatureVector,
}

/// Run-level metadata carried alongside the profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub model_id: String,
    pub shape: ModelShape,
    pub corpus_sentences: usize,
    pub corpus_hash: String,
    pub sentences_failed: usize,
    pub cluster_count: usize,
    /// Mean pairwise adjusted Rand index across re-clusterings, in [-1, 1].
    pub stability_score: f64,
    pub feature_names: Vec<String>,
    pub computed_at: chrono::DateTime<chrono::Utc>,
    pub disclaimer: String,
}

/// The disclaimer every snapshot carries: clustering happens in feature
/// space, the 3D layout is presentation only.
pub const FEATURE_SPACE_DISCLAIMER: &str =
    "Clusters are computed in the original feature space; the 3D projection is for visualization only.";

/// The full immutable profiler output. Owned by the cache; query paths
/// only ever read it. Serializes losslessly, so a reloaded snapshot
/// reproduces coordinates, assignments, and evidence without
/// recomputation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    pub points: Vec<ProjectedPoint>,
    /// Cluster id per canonical head index.
    pub assignments: Vec<usize>,
    pub clusters: Vec<ClusterProfile>,
    pub evidence: Vec<HeadEvidence>,
    pub features: Vec<HeadFeatures>,
    pub metadata: SnapshotMetadata,
}

impl ProfileSnapshot {
    /// Write the snapshot as pretty JSON.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    /// Reload a snapshot saved by [`ProfileSnapshot::save`].
    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

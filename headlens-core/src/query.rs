//! Read-only query layer over a computed [`ProfileSnapshot`].
//!
//! Pure lookups: nothing here triggers recomputation, and an unknown head
//! or cluster id is a [`ProfilerError::NotFound`], never a fabricated
//! default.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::cluster::RoleLabel;
use crate::error::{ProfilerError, Result};
use crate::evidence::EdgeCandidate;
use crate::extract::HeadIdentity;
use crate::features::{FEATURE_NAMES, FeatureKind};
use crate::snapshot::{ClusterProfile, ProfileSnapshot, SnapshotMetadata};

/// One named feature value in a head detail response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureValue {
    pub name: String,
    pub value: f64,
}

/// Everything known about one head.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadDetail {
    pub identity: HeadIdentity,
    pub cluster: usize,
    pub label: RoleLabel,
    pub position: [f64; 3],
    pub features: Vec<FeatureValue>,
    /// Short human-readable reasons derived from the feature vector.
    pub explanations: Vec<String>,
    pub evidence: Vec<EdgeCandidate>,
}

/// Role membership counts for one layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerRoleCounts {
    pub layer: usize,
    pub counts: Vec<RoleCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleCount {
    pub label: RoleLabel,
    pub heads: usize,
}

/// Read-only accessor over an immutable snapshot.
#[derive(Clone)]
pub struct QueryService {
    snapshot: Arc<ProfileSnapshot>,
}

impl QueryService {
    pub fn new(snapshot: Arc<ProfileSnapshot>) -> Self {
        Self { snapshot }
    }

    /// All projected points, one per head.
    pub fn points(&self) -> &[crate::snapshot::ProjectedPoint] {
        &self.snapshot.points
    }

    /// Snapshot-level metadata.
    pub fn metadata(&self) -> &SnapshotMetadata {
        &self.snapshot.metadata
    }

    /// Full detail for one head.
    pub fn head_detail(&self, layer: usize, head: usize) -> Result<HeadDetail> {
        let identity = HeadIdentity::new(layer, head);
        let shape = &self.snapshot.metadata.shape;
        if !shape.contains(identity) {
            return Err(ProfilerError::not_found(format!(
                "head {identity} outside model shape {}x{}",
                shape.layers, shape.heads_per_layer
            )));
        }
        let flat = identity.flat_index(shape);
        let point = &self.snapshot.points[flat];
        let values = &self.snapshot.features[flat].values;
        let features = FEATURE_NAMES
            .iter()
            .zip(values.iter())
            .map(|(name, &value)| FeatureValue {
                name: name.to_string(),
                value,
            })
            .collect();
        Ok(HeadDetail {
            identity,
            cluster: point.cluster,
            label: point.label,
            position: [point.x, point.y, point.z],
            features,
            explanations: explain(values),
            evidence: self.snapshot.evidence[flat].entries.clone(),
        })
    }

    /// Profile of one cluster.
    pub fn cluster_profile(&self, id: usize) -> Result<&ClusterProfile> {
        self.snapshot
            .clusters
            .iter()
            .find(|cluster| cluster.id == id)
            .ok_or_else(|| ProfilerError::not_found(format!("cluster {id}")))
    }

    /// Role composition of each layer.
    pub fn layer_distribution(&self) -> Vec<LayerRoleCounts> {
        let shape = &self.snapshot.metadata.shape;
        (0..shape.layers)
            .map(|layer| {
                let mut counts: Vec<RoleCount> = Vec::new();
                for point in self.snapshot.points.iter().filter(|p| p.layer == layer) {
                    match counts.iter_mut().find(|c| c.label == point.label) {
                        Some(count) => count.heads += 1,
                        None => counts.push(RoleCount {
                            label: point.label,
                            heads: 1,
                        }),
                    }
                }
                counts.sort_by_key(|c| c.label.rank());
                LayerRoleCounts { layer, counts }
            })
            .collect()
    }
}

/// Explanation heuristics over the raw (unstandardized) feature vector:
/// self-attention share above 30%, mean entropy below 2 nats, and the
/// forward/backward balance. Falls back to a standard-pattern note.
fn explain(values: &[f64]) -> Vec<String> {
    let mut notes = Vec::new();
    let self_attn = values[FeatureKind::SelfAttention.index()];
    if self_attn > 0.3 {
        notes.push(format!("{:.0}% self-attention", self_attn * 100.0));
    }
    if values[FeatureKind::Entropy.index()] < 2.0 {
        notes.push("Low entropy (sharp attention)".to_string());
    }
    let forward = values[FeatureKind::ForwardAttention.index()];
    let backward = values[FeatureKind::BackwardAttention.index()];
    if forward > backward {
        notes.push("Forward-looking".to_string());
    } else if backward > forward {
        notes.push("Backward-looking".to_string());
    }
    if notes.is_empty() {
        notes.push("Standard pattern".to_string());
    }
    notes
}

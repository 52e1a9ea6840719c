//! Attention extraction boundary: head identities, validated attention
//! matrices, and the extractor trait implemented by model backends.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{ProfilerError, Result};

/// Tolerance for the row-sum check on attention matrices. Softmax output
/// rounded through f32 stays well inside this.
pub const ROW_SUM_TOLERANCE: f64 = 1e-3;

/// Identifies one attention head: (layer index, head index), 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HeadIdentity {
    pub layer: usize,
    pub head: usize,
}

impl HeadIdentity {
    pub fn new(layer: usize, head: usize) -> Self {
        Self { layer, head }
    }

    /// Canonical flat index within a model shape.
    pub fn flat_index(&self, shape: &ModelShape) -> usize {
        self.layer * shape.heads_per_layer + self.head
    }
}

impl fmt::Display for HeadIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}H{}", self.layer, self.head)
    }
}

/// Attention geometry of the profiled model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelShape {
    pub layers: usize,
    pub heads_per_layer: usize,
}

impl ModelShape {
    pub fn new(layers: usize, heads_per_layer: usize) -> Self {
        Self {
            layers,
            heads_per_layer,
        }
    }

    pub fn head_count(&self) -> usize {
        self.layers * self.heads_per_layer
    }

    /// All head identities in canonical (layer-major) order.
    pub fn head_identities(&self) -> Vec<HeadIdentity> {
        let mut out = Vec::with_capacity(self.head_count());
        for layer in 0..self.layers {
            for head in 0..self.heads_per_layer {
                out.push(HeadIdentity::new(layer, head));
            }
        }
        out
    }

    pub fn contains(&self, identity: HeadIdentity) -> bool {
        identity.layer < self.layers && identity.head < self.heads_per_layer
    }
}

/// A validated per-head attention matrix: square, non-negative, each row a
/// probability distribution over attended-to positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttentionMatrix {
    weights: Vec<Vec<f64>>,
}

impl AttentionMatrix {
    /// Validate and wrap a raw weight matrix. Fails fast on non-square
    /// input, negative weights, or rows that do not sum to 1 within
    /// [`ROW_SUM_TOLERANCE`]; a skewed matrix must never reach the
    /// feature builder silently.
    pub fn new(weights: Vec<Vec<f64>>) -> Result<Self> {
        if weights.is_empty() {
            return Err(ProfilerError::invalid_observation("empty attention matrix"));
        }
        let n = weights.len();
        for (i, row) in weights.iter().enumerate() {
            if row.len() != n {
                return Err(ProfilerError::invalid_observation(format!(
                    "row {i} has {} columns, expected {n}",
                    row.len()
                )));
            }
            let mut sum = 0.0;
            for &w in row {
                if w < 0.0 {
                    return Err(ProfilerError::invalid_observation(format!(
                        "negative weight {w} in row {i}"
                    )));
                }
                sum += w;
            }
            if (sum - 1.0).abs() > ROW_SUM_TOLERANCE {
                return Err(ProfilerError::invalid_observation(format!(
                    "row {i} sums to {sum}, expected 1.0 +/- {ROW_SUM_TOLERANCE}"
                )));
            }
        }
        Ok(Self { weights })
    }

    /// Number of token positions (rows == cols).
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.weights
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.weights[row][col]
    }
}

/// One sentence's worth of attention: tokens plus a matrix per head.
/// Transient pipeline data; consumed by the feature builder and evidence
/// collection, never persisted.
#[derive(Debug, Clone)]
pub struct SentenceAttention {
    pub sentence: String,
    pub tokens: Vec<String>,
    pub heads: HashMap<HeadIdentity, AttentionMatrix>,
}

impl SentenceAttention {
    /// Check that every head of `shape` is present and sized to the token
    /// count. Called once per extraction before any statistics run.
    pub fn validate_against(&self, shape: &ModelShape) -> Result<()> {
        for identity in shape.head_identities() {
            let matrix = self.heads.get(&identity).ok_or_else(|| {
                ProfilerError::invalid_observation(format!(
                    "missing attention matrix for {identity}"
                ))
            })?;
            if matrix.len() != self.tokens.len() {
                return Err(ProfilerError::invalid_observation(format!(
                    "{identity}: matrix size {} does not match token count {}",
                    matrix.len(),
                    self.tokens.len()
                )));
            }
        }
        Ok(())
    }
}

/// The model boundary. Implementations run (or replay) a forward pass and
/// hand back the full per-head attention for one sentence.
#[async_trait]
pub trait AttentionExtractor: Send + Sync {
    /// Attention geometry this extractor produces.
    fn shape(&self) -> ModelShape;

    /// Identifier of the underlying model, used in the cache key.
    fn model_id(&self) -> &str;

    /// Run one sentence through the model. An inference failure maps to
    /// [`ProfilerError::Extraction`] and drops the sentence from the run.
    async fn extract(&self, sentence: &str) -> Result<SentenceAttention>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_head_identity_display_and_index() {
        let shape = ModelShape::new(12, 12);
        let id = HeadIdentity::new(3, 7);
        assert_eq!(id.to_string(), "L3H7");
        assert_eq!(id.flat_index(&shape), 43);
    }

    #[test]
    fn test_shape_enumeration() {
        let shape = ModelShape::new(2, 3);
        let ids = shape.head_identities();
        assert_eq!(ids.len(), 6);
        assert_eq!(ids[0], HeadIdentity::new(0, 0));
        assert_eq!(ids[5], HeadIdentity::new(1, 2));
        assert!(shape.contains(HeadIdentity::new(1, 2)));
        assert!(!shape.contains(HeadIdentity::new(2, 0)));
    }

    #[test]
    fn test_matrix_accepts_valid_rows() {
        let m = AttentionMatrix::new(vec![vec![0.5, 0.5], vec![0.9995, 0.0]]);
        assert!(m.is_ok());
    }

    #[test]
    fn test_matrix_rejects_bad_row_sum() {
        let err = AttentionMatrix::new(vec![vec![0.5, 0.3], vec![0.5, 0.5]]).unwrap_err();
        assert!(matches!(err, ProfilerError::InvalidObservation(_)));
    }

    #[test]
    fn test_matrix_rejects_negative_and_non_square() {
        assert!(AttentionMatrix::new(vec![vec![1.5, -0.5], vec![0.5, 0.5]]).is_err());
        assert!(AttentionMatrix::new(vec![vec![1.0], vec![0.5, 0.5]]).is_err());
        assert!(AttentionMatrix::new(vec![]).is_err());
    }
}

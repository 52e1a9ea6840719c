//! Offline attention extractor backed by JSON dump files.
//!
//! The profiler treats the transformer as a black box; this backend makes
//! that box file-shaped. A dump directory holds one JSON record per
//! sentence, produced ahead of time by whatever inference stack ran the
//! model: `{"sentence", "tokens", "layers", "heads", "attention"}` with
//! `attention[layer][head][i][j]` the token-to-token weights.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use headlens_core::error::{ProfilerError, Result};
use headlens_core::extract::{
    AttentionExtractor, AttentionMatrix, ModelShape, SentenceAttention,
};

#[derive(Debug, Deserialize)]
struct DumpRecord {
    sentence: String,
    tokens: Vec<String>,
    layers: usize,
    heads: usize,
    /// `attention[layer][head]` is a token_count x token_count matrix.
    attention: Vec<Vec<Vec<Vec<f64>>>>,
}

/// Replays pre-computed attention dumps as an [`AttentionExtractor`].
pub struct DumpExtractor {
    model_id: String,
    shape: ModelShape,
    records: HashMap<String, DumpRecord>,
}

impl DumpExtractor {
    /// Load every `*.json` record under `dir`. All records must agree on
    /// the model shape.
    pub async fn load(dir: &Path, model_id: impl Into<String>) -> Result<Self> {
        let mut records = HashMap::new();
        let mut shape: Option<ModelShape> = None;
        let mut dir_entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = dir_entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            let record: DumpRecord = serde_json::from_slice(&bytes).map_err(|e| {
                ProfilerError::invalid_input(format!("{}: {e}", path.display()))
            })?;
            let record_shape = ModelShape::new(record.layers, record.heads);
            match shape {
                None => shape = Some(record_shape),
                Some(existing) if existing != record_shape => {
                    return Err(ProfilerError::invalid_input(format!(
                        "{}: shape {}x{} conflicts with {}x{}",
                        path.display(),
                        record.layers,
                        record.heads,
                        existing.layers,
                        existing.heads_per_layer
                    )));
                }
                Some(_) => {}
            }
            records.insert(record.sentence.clone(), record);
        }
        let shape = shape.ok_or_else(|| {
            ProfilerError::invalid_input(format!("no attention dumps found in {}", dir.display()))
        })?;
        tracing::info!(
            sentences = records.len(),
            layers = shape.layers,
            heads = shape.heads_per_layer,
            "loaded attention dumps"
        );
        Ok(Self {
            model_id: model_id.into(),
            shape,
            records,
        })
    }
}

#[async_trait]
impl AttentionExtractor for DumpExtractor {
    fn shape(&self) -> ModelShape {
        self.shape
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn extract(&self, sentence: &str) -> Result<SentenceAttention> {
        let record = self.records.get(sentence).ok_or_else(|| {
            ProfilerError::extraction(format!("no attention dump for sentence: {sentence}"))
        })?;
        let mut heads = HashMap::new();
        for identity in self.shape.head_identities() {
            let rows = record
                .attention
                .get(identity.layer)
                .and_then(|layer| layer.get(identity.head))
                .ok_or_else(|| {
                    ProfilerError::extraction(format!("dump missing matrix for {identity}"))
                })?;
            heads.insert(identity, AttentionMatrix::new(rows.clone())?);
        }
        Ok(SentenceAttention {
            sentence: record.sentence.clone(),
            tokens: record.tokens.clone(),
            heads,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use headlens_core::extract::HeadIdentity;

    fn record_json(sentence: &str) -> String {
        // 1 layer, 1 head, two tokens.
        format!(
            r#"{{
                "sentence": "{sentence}",
                "tokens": ["a", "b"],
                "layers": 1,
                "heads": 1,
                "attention": [[[[0.25, 0.75], [0.5, 0.5]]]]
            }}"#
        )
    }

    #[tokio::test]
    async fn test_load_and_extract() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("0.json"), record_json("a b")).unwrap();
        let extractor = DumpExtractor::load(dir.path(), "gpt2").await.unwrap();
        assert_eq!(extractor.shape(), ModelShape::new(1, 1));
        let attention = extractor.extract("a b").await.unwrap();
        assert_eq!(attention.tokens, vec!["a", "b"]);
        let matrix = &attention.heads[&HeadIdentity::new(0, 0)];
        assert!((matrix.get(0, 1) - 0.75).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_unknown_sentence_is_extraction_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("0.json"), record_json("a b")).unwrap();
        let extractor = DumpExtractor::load(dir.path(), "gpt2").await.unwrap();
        let err = extractor.extract("missing sentence").await.unwrap_err();
        assert!(matches!(err, ProfilerError::Extraction(_)));
    }

    #[tokio::test]
    async fn test_empty_dir_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DumpExtractor::load(dir.path(), "gpt2").await.is_err());
    }
}

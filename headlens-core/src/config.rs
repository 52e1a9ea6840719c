//! Configuration types for the profiler.
//!
//! Uses `figment` for layered loading: defaults -> `headlens.toml` in the
//! workspace -> `HEADLENS_*` environment variables. Every stochastic
//! algorithm takes its seed from here; nothing relies on ambient entropy.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ProfilerError, Result};

/// Top-level profiler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilerConfig {
    /// Number of behavioral clusters (k).
    #[serde(default = "default_cluster_count")]
    pub cluster_count: usize,
    /// Minimum sentences that must survive extraction for a viable run.
    #[serde(default = "default_min_viable_sentences")]
    pub min_viable_sentences: usize,
    /// Maximum sentences extracted concurrently.
    #[serde(default = "default_extraction_concurrency")]
    pub extraction_concurrency: usize,
    /// t-SNE projection parameters.
    #[serde(default)]
    pub reducer: TsneConfig,
    /// k-means clustering parameters.
    #[serde(default)]
    pub clusterer: KmeansConfig,
    /// Evidence index parameters.
    #[serde(default)]
    pub evidence: EvidenceConfig,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            cluster_count: default_cluster_count(),
            min_viable_sentences: default_min_viable_sentences(),
            extraction_concurrency: default_extraction_concurrency(),
            reducer: TsneConfig::default(),
            clusterer: KmeansConfig::default(),
            evidence: EvidenceConfig::default(),
        }
    }
}

fn default_cluster_count() -> usize {
    5
}
fn default_min_viable_sentences() -> usize {
    10
}
fn default_extraction_concurrency() -> usize {
    4
}

/// t-SNE parameters. The seed is explicit: repeated runs on identical
/// input produce a stable layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TsneConfig {
    #[serde(default = "default_reducer_seed")]
    pub seed: u64,
    #[serde(default = "default_perplexity")]
    pub perplexity: f64,
    #[serde(default = "default_tsne_iterations")]
    pub iterations: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
}

impl Default for TsneConfig {
    fn default() -> Self {
        Self {
            seed: default_reducer_seed(),
            perplexity: default_perplexity(),
            iterations: default_tsne_iterations(),
            learning_rate: default_learning_rate(),
        }
    }
}

fn default_reducer_seed() -> u64 {
    42
}
fn default_perplexity() -> f64 {
    30.0
}
fn default_tsne_iterations() -> usize {
    500
}
fn default_learning_rate() -> f64 {
    100.0
}

/// k-means parameters, including the stability measurement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KmeansConfig {
    #[serde(default = "default_clusterer_seed")]
    pub seed: u64,
    /// Random restarts per clustering; the lowest-inertia run wins.
    #[serde(default = "default_n_init")]
    pub n_init: usize,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Re-clusterings (with derived seeds) used for the stability score.
    #[serde(default = "default_stability_runs")]
    pub stability_runs: usize,
}

impl Default for KmeansConfig {
    fn default() -> Self {
        Self {
            seed: default_clusterer_seed(),
            n_init: default_n_init(),
            max_iterations: default_max_iterations(),
            stability_runs: default_stability_runs(),
        }
    }
}

fn default_clusterer_seed() -> u64 {
    42
}
fn default_n_init() -> usize {
    10
}
fn default_max_iterations() -> usize {
    300
}
fn default_stability_runs() -> usize {
    10
}

/// Evidence index parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceConfig {
    /// Entries retained per head.
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    /// Minimum weight an off-diagonal edge needs before the diagonal
    /// self-attention entry is considered instead.
    #[serde(default = "default_min_weight")]
    pub min_weight: f64,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            min_weight: default_min_weight(),
        }
    }
}

fn default_top_n() -> usize {
    3
}
fn default_min_weight() -> f64 {
    0.2
}

/// Load configuration: defaults, then `headlens.toml` in `workspace` (if
/// present), then `HEADLENS_*` environment variables (e.g.
/// `HEADLENS_CLUSTER_COUNT=7`, `HEADLENS_REDUCER__SEED=1`).
pub fn load_config(workspace: Option<&Path>) -> Result<ProfilerConfig> {
    let mut figment = Figment::from(Serialized::defaults(ProfilerConfig::default()));

    if let Some(ws) = workspace {
        let ws_config = ws.join("headlens.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    figment = figment.merge(Env::prefixed("HEADLENS_").split("__"));

    let config: ProfilerConfig = figment
        .extract()
        .map_err(|e| ProfilerError::config(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

impl ProfilerConfig {
    /// Reject values no pipeline stage can work with.
    pub fn validate(&self) -> Result<()> {
        if self.cluster_count == 0 {
            return Err(ProfilerError::config("cluster_count must be at least 1"));
        }
        if self.extraction_concurrency == 0 {
            return Err(ProfilerError::config(
                "extraction_concurrency must be at least 1",
            ));
        }
        if self.reducer.perplexity <= 0.0 {
            return Err(ProfilerError::config("reducer.perplexity must be positive"));
        }
        if self.clusterer.n_init == 0 {
            return Err(ProfilerError::config("clusterer.n_init must be at least 1"));
        }
        if self.evidence.top_n == 0 {
            return Err(ProfilerError::config("evidence.top_n must be at least 1"));
        }
        Ok(())
    }
}

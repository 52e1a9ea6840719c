//! # headlens-core: attention head behavioral profiling
//!
//! Runs a fixed probe corpus through a transformer (via the
//! [`extract::AttentionExtractor`] seam), derives a behavioral feature
//! vector per attention head, embeds the heads in 3D, clusters them into a
//! fixed set of roles, and serves the result through cached, read-only
//! query paths.
//!
//! ## Pipeline
//!
//! 1. [`features`]: per-head statistics over every sentence's attention
//!    matrices, aggregated into fixed-length vectors.
//! 2. [`reduce`]: z-score standardization plus seeded t-SNE to 3D.
//! 3. [`cluster`]: seeded k-means, rule-table role labeling, and a
//!    stability score from repeated re-clustering.
//! 4. [`evidence`]: the strongest observed attention edges per head.
//! 5. [`cache`]: singleflight memoization of the whole computation,
//!    keyed by model, corpus hash, and algorithm parameters.
//! 6. [`query`]: pure lookups over the immutable snapshot.
//!
//! Everything stochastic takes an explicit seed from [`config`]; repeated
//! runs on identical input are reproducible by construction.

pub mod cache;
pub mod cluster;
pub mod config;
pub mod corpus;
pub mod error;
pub mod evidence;
pub mod extract;
pub mod features;
pub mod pipeline;
pub mod query;
pub mod reduce;
pub mod snapshot;

pub use cache::{ProfileCache, ProfileKey};
pub use cluster::RoleLabel;
pub use config::{ProfilerConfig, load_config};
pub use corpus::Corpus;
pub use error::{ProfilerError, Result};
pub use extract::{AttentionExtractor, AttentionMatrix, HeadIdentity, ModelShape, SentenceAttention};
pub use features::{FEATURE_COUNT, FEATURE_NAMES, FeatureKind};
pub use pipeline::Profiler;
pub use query::QueryService;
pub use snapshot::ProfileSnapshot;

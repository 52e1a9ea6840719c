//! Subcommand handlers. `profile` runs the pipeline; everything else is a
//! read against a saved snapshot.

use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use headlens_core::config::load_config;
use headlens_core::corpus::Corpus;
use headlens_core::pipeline::Profiler;
use headlens_core::query::QueryService;
use headlens_core::snapshot::ProfileSnapshot;

use crate::dump::DumpExtractor;

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Compute a profile snapshot from an attention dump directory
    Profile {
        /// Directory of per-sentence attention JSON dumps
        #[arg(long)]
        dump_dir: PathBuf,
        /// Model identifier recorded in the snapshot and cache key
        #[arg(long, default_value = "gpt2")]
        model_id: String,
        /// Optional corpus file (one sentence per line); defaults to the
        /// canonical probe corpus
        #[arg(long)]
        corpus: Option<PathBuf>,
        /// Output snapshot path
        #[arg(long, default_value = "snapshot.json")]
        out: PathBuf,
    },
    /// List all projected head points
    Points {
        #[arg(long, default_value = "snapshot.json")]
        snapshot: PathBuf,
    },
    /// Show one head's detail: cluster, features, explanations, evidence
    Head {
        layer: usize,
        head: usize,
        #[arg(long, default_value = "snapshot.json")]
        snapshot: PathBuf,
    },
    /// Show one cluster's profile
    Cluster {
        id: usize,
        #[arg(long, default_value = "snapshot.json")]
        snapshot: PathBuf,
    },
    /// Show snapshot metadata (stability score, corpus size, feature schema)
    Metadata {
        #[arg(long, default_value = "snapshot.json")]
        snapshot: PathBuf,
    },
    /// Show the role distribution across layers
    Layers {
        #[arg(long, default_value = "snapshot.json")]
        snapshot: PathBuf,
    },
}

pub async fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Profile {
            dump_dir,
            model_id,
            corpus,
            out,
        } => profile(workspace, &dump_dir, model_id, corpus, &out).await,
        Commands::Points { snapshot } => {
            let service = open(&snapshot).await?;
            print_json(&service.points())
        }
        Commands::Head {
            layer,
            head,
            snapshot,
        } => {
            let service = open(&snapshot).await?;
            print_json(&service.head_detail(layer, head)?)
        }
        Commands::Cluster { id, snapshot } => {
            let service = open(&snapshot).await?;
            print_json(&service.cluster_profile(id)?)
        }
        Commands::Metadata { snapshot } => {
            let service = open(&snapshot).await?;
            print_json(&service.metadata())
        }
        Commands::Layers { snapshot } => {
            let service = open(&snapshot).await?;
            print_json(&service.layer_distribution())
        }
    }
}

async fn profile(
    workspace: &Path,
    dump_dir: &Path,
    model_id: String,
    corpus_path: Option<PathBuf>,
    out: &Path,
) -> anyhow::Result<()> {
    let config = load_config(Some(workspace)).context("loading configuration")?;
    let corpus = match corpus_path {
        Some(path) => {
            let text = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading corpus from {}", path.display()))?;
            Corpus::from_sentences(
                text.lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(String::from),
            )
        }
        None => Corpus::canonical(),
    };
    let extractor = DumpExtractor::load(dump_dir, model_id)
        .await
        .context("loading attention dumps")?;

    let profiler = Profiler::new(Arc::new(extractor), corpus, config);
    let snapshot = profiler.snapshot().await?;
    snapshot.save(out).await?;

    println!(
        "Profiled {} heads into {} clusters (stability {:.3}); snapshot written to {}",
        snapshot.points.len(),
        snapshot.clusters.len(),
        snapshot.metadata.stability_score,
        out.display()
    );
    for cluster in &snapshot.clusters {
        println!(
            "  [{}] {}: {} heads",
            cluster.id,
            cluster.label.as_str(),
            cluster.member_count
        );
    }
    Ok(())
}

async fn open(path: &Path) -> anyhow::Result<QueryService> {
    let snapshot = ProfileSnapshot::load(path)
        .await
        .with_context(|| format!("loading snapshot from {}", path.display()))?;
    Ok(QueryService::new(Arc::new(snapshot)))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

//! Head clustering: seeded k-means over standardized features, role
//! labeling through an explicit rule table, and a stability score from
//! repeated re-clustering.
//!
//! Clustering runs in the full standardized feature space, never the 3D
//! projection, so the partition does not compound the projection's
//! information loss.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::KmeansConfig;
use crate::error::{ProfilerError, Result};
use crate::features::FeatureKind;

/// The fixed role taxonomy. Declaration order is the taxonomy rank used to
/// break label-assignment ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleLabel {
    SyntaxTracker,
    SemanticLinker,
    PositionalEncoder,
    RarePatternDetector,
    ContextAggregator,
}

impl RoleLabel {
    /// Taxonomy rank; lower wins ties.
    pub fn rank(&self) -> usize {
        *self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SyntaxTracker => "Syntax Trackers",
            Self::SemanticLinker => "Semantic Linkers",
            Self::PositionalEncoder => "Positional Encoders",
            Self::RarePatternDetector => "Rare Pattern Detectors",
            Self::ContextAggregator => "Context Aggregators",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::SyntaxTracker => {
                "These heads focus on syntactic structure, tracking grammatical relationships like subject-verb agreement and phrase boundaries."
            }
            Self::SemanticLinker => {
                "These heads link semantically related words, connecting concepts and meanings across the sentence."
            }
            Self::PositionalEncoder => {
                "These heads encode positional information, helping the model understand word order and sequence."
            }
            Self::RarePatternDetector => {
                "These heads detect unusual patterns and rare linguistic constructions, acting as specialized detectors."
            }
            Self::ContextAggregator => {
                "These heads aggregate context from multiple tokens, building holistic sentence representations."
            }
        }
    }
}

impl std::fmt::Display for RoleLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the label-assignment policy: a role claimed by the centroid
/// with the strongest positive deviation on the defining feature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabelRule {
    pub role: RoleLabel,
    pub feature_index: usize,
}

/// The default policy over the canonical feature schema. SemanticLinker is
/// the residual role and deliberately has no rule: a centroid that
/// deviates positively on nothing gets it.
pub fn default_label_rules() -> Vec<LabelRule> {
    vec![
        LabelRule {
            role: RoleLabel::SyntaxTracker,
            feature_index: FeatureKind::BoundaryMass.index(),
        },
        LabelRule {
            role: RoleLabel::PositionalEncoder,
            feature_index: FeatureKind::DistanceWeighted.index(),
        },
        LabelRule {
            role: RoleLabel::RarePatternDetector,
            feature_index: FeatureKind::EntropyVariance.index(),
        },
        LabelRule {
            role: RoleLabel::ContextAggregator,
            feature_index: FeatureKind::Entropy.index(),
        },
    ]
}

/// Result of one clustering: per-row cluster id in `[0, k)` plus the
/// centroids and total within-cluster inertia.
#[derive(Debug, Clone)]
pub struct KmeansResult {
    pub assignments: Vec<usize>,
    pub centroids: Vec<Vec<f64>>,
    pub inertia: f64,
}

/// Seeded k-means with k-means++ initialization and `n_init` restarts;
/// the lowest-inertia run wins. Fails iff `k` exceeds the row count.
pub fn kmeans(rows: &[Vec<f64>], k: usize, config: &KmeansConfig) -> Result<KmeansResult> {
    if k == 0 {
        return Err(ProfilerError::invalid_input("k must be at least 1"));
    }
    if k > rows.len() {
        return Err(ProfilerError::ClusterCount {
            k,
            heads: rows.len(),
        });
    }

    let mut best = lloyd(rows, k, config.seed, config.max_iterations);
    for init in 1..config.n_init.max(1) {
        let seed = config.seed.wrapping_add(init as u64);
        let run = lloyd(rows, k, seed, config.max_iterations);
        if run.inertia < best.inertia {
            best = run;
        }
    }
    debug!(k, inertia = best.inertia, "k-means converged");
    Ok(best)
}

fn lloyd(rows: &[Vec<f64>], k: usize, seed: u64, max_iterations: usize) -> KmeansResult {
    let n = rows.len();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut centroids = plus_plus_init(rows, k, &mut rng);
    let mut assignments = vec![0usize; n];

    for _ in 0..max_iterations {
        let mut changed = false;
        for (i, row) in rows.iter().enumerate() {
            let nearest = nearest_centroid(row, &centroids);
            if assignments[i] != nearest {
                assignments[i] = nearest;
                changed = true;
            }
        }
        fix_empty_clusters(rows, &centroids, &mut assignments, k);
        recompute_centroids(rows, &assignments, &mut centroids, k);
        if !changed {
            break;
        }
    }

    let inertia = rows
        .iter()
        .zip(assignments.iter())
        .map(|(row, &c)| squared_distance(row, &centroids[c]))
        .sum();
    KmeansResult {
        assignments,
        centroids,
        inertia,
    }
}

fn plus_plus_init(rows: &[Vec<f64>], k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let n = rows.len();
    let mut centroids = Vec::with_capacity(k);
    centroids.push(rows[rng.gen_range(0..n)].clone());
    while centroids.len() < k {
        let d2: Vec<f64> = rows
            .iter()
            .map(|row| {
                centroids
                    .iter()
                    .map(|c| squared_distance(row, c))
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        let total: f64 = d2.iter().sum();
        let index = if total <= 0.0 {
            // Identical points: any choice is as good as any other.
            rng.gen_range(0..n)
        } else {
            let mut target = rng.gen_range(0.0..total);
            let mut chosen = n - 1;
            for (i, &d) in d2.iter().enumerate() {
                if target < d {
                    chosen = i;
                    break;
                }
                target -= d;
            }
            chosen
        };
        centroids.push(rows[index].clone());
    }
    centroids
}

fn nearest_centroid(row: &[f64], centroids: &[Vec<f64>]) -> usize {
    let mut best = 0;
    let mut best_d = f64::INFINITY;
    for (c, centroid) in centroids.iter().enumerate() {
        let d = squared_distance(row, centroid);
        if d < best_d {
            best_d = d;
            best = c;
        }
    }
    best
}

/// Every cluster id must stay populated: an empty cluster steals the point
/// farthest from its centroid among clusters that can spare one.
fn fix_empty_clusters(
    rows: &[Vec<f64>],
    centroids: &[Vec<f64>],
    assignments: &mut [usize],
    k: usize,
) {
    for cluster in 0..k {
        if assignments.iter().any(|&a| a == cluster) {
            continue;
        }
        let mut sizes = vec![0usize; k];
        for &a in assignments.iter() {
            sizes[a] += 1;
        }
        let mut donor: Option<(usize, f64)> = None;
        for (i, row) in rows.iter().enumerate() {
            if sizes[assignments[i]] < 2 {
                continue;
            }
            let d = squared_distance(row, &centroids[assignments[i]]);
            if donor.is_none_or(|(_, bd)| d > bd) {
                donor = Some((i, d));
            }
        }
        if let Some((i, _)) = donor {
            assignments[i] = cluster;
        }
    }
}

fn recompute_centroids(
    rows: &[Vec<f64>],
    assignments: &[usize],
    centroids: &mut [Vec<f64>],
    k: usize,
) {
    let dims = rows[0].len();
    let mut sums = vec![vec![0.0; dims]; k];
    let mut counts = vec![0usize; k];
    for (row, &c) in rows.iter().zip(assignments.iter()) {
        counts[c] += 1;
        for (d, &v) in row.iter().enumerate() {
            sums[c][d] += v;
        }
    }
    for c in 0..k {
        if counts[c] > 0 {
            for d in 0..dims {
                centroids[c][d] = sums[c][d] / counts[c] as f64;
            }
        }
    }
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Assign a role to each centroid: compute the centroid's z-deviation from
/// the global feature means of `features` and let the rule with the
/// strongest positive deviation claim its role. Rules are evaluated in
/// taxonomy-rank order, so an exact tie goes to the lower rank, a policy
/// choice, not a property of the data. No positive deviation at all means
/// the residual SemanticLinker.
pub fn assign_labels(
    centroids: &[Vec<f64>],
    features: &[Vec<f64>],
    rules: &[LabelRule],
) -> Vec<RoleLabel> {
    let n = features.len();
    if n == 0 || centroids.is_empty() {
        return Vec::new();
    }
    let dims = features[0].len();
    let mut means = vec![0.0; dims];
    let mut stds = vec![0.0; dims];
    for row in features {
        for (d, &v) in row.iter().enumerate() {
            means[d] += v / n as f64;
        }
    }
    for row in features {
        for (d, &v) in row.iter().enumerate() {
            stds[d] += (v - means[d]).powi(2) / n as f64;
        }
    }
    for std in stds.iter_mut() {
        *std = std.sqrt();
    }

    let mut ordered: Vec<LabelRule> = rules.to_vec();
    ordered.sort_by_key(|rule| rule.role.rank());

    centroids
        .iter()
        .map(|centroid| {
            let mut best: Option<(RoleLabel, f64)> = None;
            for rule in &ordered {
                let d = rule.feature_index;
                if d >= centroid.len() || stds[d] == 0.0 {
                    continue;
                }
                let z = (centroid[d] - means[d]) / stds[d];
                // Strict comparison keeps the earlier (lower-rank) role on
                // exact ties.
                if z > 0.0 && best.is_none_or(|(_, bz)| z > bz) {
                    best = Some((rule.role, z));
                }
            }
            best.map_or(RoleLabel::SemanticLinker, |(role, _)| role)
        })
        .collect()
}

/// Adjusted Rand index between two partitions of the same items, in
/// [-1, 1]. A degenerate denominator (identical trivial partitions, e.g.
/// everything in one cluster) is defined as full agreement: 1.0.
pub fn adjusted_rand_index(a: &[usize], b: &[usize]) -> f64 {
    debug_assert_eq!(a.len(), b.len(), "partitions must cover the same items");
    let n = a.len();
    if n == 0 {
        return 1.0;
    }
    let ka = a.iter().max().map_or(0, |&m| m + 1);
    let kb = b.iter().max().map_or(0, |&m| m + 1);
    let mut contingency = vec![vec![0u64; kb]; ka];
    for (&x, &y) in a.iter().zip(b.iter()) {
        contingency[x][y] += 1;
    }
    let choose2 = |x: u64| -> f64 { (x * x.saturating_sub(1)) as f64 / 2.0 };

    let sum_ij: f64 = contingency
        .iter()
        .flat_map(|row| row.iter())
        .map(|&c| choose2(c))
        .sum();
    let sum_a: f64 = (0..ka)
        .map(|i| choose2(contingency[i].iter().sum::<u64>()))
        .sum();
    let sum_b: f64 = (0..kb)
        .map(|j| choose2((0..ka).map(|i| contingency[i][j]).sum::<u64>()))
        .sum();
    let total = choose2(n as u64);
    let expected = sum_a * sum_b / total;
    let max_index = (sum_a + sum_b) / 2.0;
    let denom = max_index - expected;
    if denom.abs() < 1e-12 {
        return 1.0;
    }
    (sum_ij - expected) / denom
}

/// Stability score: mean pairwise adjusted Rand index over
/// `config.stability_runs` single-init re-clusterings with derived seeds.
/// Quantifies how reproducible the partition is; it is not a guarantee.
pub fn stability_score(rows: &[Vec<f64>], k: usize, config: &KmeansConfig) -> Result<f64> {
    let runs = config.stability_runs.max(1);
    if runs == 1 {
        return Ok(1.0);
    }
    let single = KmeansConfig {
        n_init: 1,
        ..config.clone()
    };
    let mut partitions = Vec::with_capacity(runs);
    for run in 0..runs {
        let run_config = KmeansConfig {
            // Offset past the n_init seed range so stability runs never
            // replay the primary clustering's initializations.
            seed: config.seed.wrapping_add(1000 + run as u64),
            ..single.clone()
        };
        partitions.push(kmeans(rows, k, &run_config)?.assignments);
    }
    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..partitions.len() {
        for j in (i + 1)..partitions.len() {
            total += adjusted_rand_index(&partitions[i], &partitions[j]);
            pairs += 1;
        }
    }
    Ok(total / pairs as f64)
}

//! Dimensionality reduction: z-score standardization plus an exact,
//! seeded t-SNE projection to three coordinates.
//!
//! The head population is small (144 for a 12x12 model), so the exact
//! O(n^2) formulation is fine and keeps the numerics dependency-free.
//! Output coordinates are unconstrained in magnitude; display layers
//! normalize, not this module.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::config::TsneConfig;

/// Feature matrix after per-dimension z-scoring, with the statistics used.
#[derive(Debug, Clone)]
pub struct Standardized {
    pub matrix: Vec<Vec<f64>>,
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
    /// Dimensions with zero variance, mapped to all-zeros.
    pub degenerate_dims: usize,
}

/// Standardize each feature dimension to zero mean and unit variance so
/// scale-dominant features cannot dominate distance computations. A
/// zero-variance dimension maps to zeros; entirely flat input is legal
/// (the projection collapses, it does not crash).
pub fn standardize(vectors: &[Vec<f64>]) -> Standardized {
    let n = vectors.len();
    if n == 0 {
        return Standardized {
            matrix: Vec::new(),
            means: Vec::new(),
            stds: Vec::new(),
            degenerate_dims: 0,
        };
    }
    let dims = vectors[0].len();
    let mut means = vec![0.0; dims];
    let mut stds = vec![0.0; dims];
    for vector in vectors {
        for (d, &v) in vector.iter().enumerate() {
            means[d] += v;
        }
    }
    for mean in means.iter_mut() {
        *mean /= n as f64;
    }
    for vector in vectors {
        for (d, &v) in vector.iter().enumerate() {
            stds[d] += (v - means[d]).powi(2);
        }
    }
    let mut degenerate = 0usize;
    for std in stds.iter_mut() {
        *std = (*std / n as f64).sqrt();
        if *std == 0.0 {
            degenerate += 1;
        }
    }
    if degenerate > 0 {
        warn!(
            degenerate_dims = degenerate,
            total_dims = dims,
            "zero-variance feature dimensions, standardizing to zeros"
        );
    }
    let matrix = vectors
        .iter()
        .map(|vector| {
            vector
                .iter()
                .enumerate()
                .map(|(d, &v)| {
                    if stds[d] == 0.0 {
                        0.0
                    } else {
                        (v - means[d]) / stds[d]
                    }
                })
                .collect()
        })
        .collect();
    Standardized {
        matrix,
        means,
        stds,
        degenerate_dims: degenerate,
    }
}

const OUTPUT_DIMS: usize = 3;
const EARLY_EXAGGERATION: f64 = 12.0;
const EXAGGERATION_ITERS: usize = 100;
const MOMENTUM_SWITCH_ITER: usize = 250;

/// Project standardized feature rows to 3D with t-SNE. Deterministic for
/// a given seed; visually stable rather than bit-identical across
/// platforms, which is all the consumer needs.
pub fn project(rows: &[Vec<f64>], config: &TsneConfig) -> Vec<[f64; OUTPUT_DIMS]> {
    let n = rows.len();
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![[0.0; OUTPUT_DIMS]];
    }

    // Perplexity cannot exceed what n-1 neighbors can support.
    let perplexity = config.perplexity.min(((n - 1) as f64 / 3.0).max(1.0));
    let p = joint_probabilities(rows, perplexity);

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut y: Vec<[f64; OUTPUT_DIMS]> = (0..n)
        .map(|_| std::array::from_fn(|_| 1e-2 * normal_sample(&mut rng)))
        .collect();
    let mut velocity = vec![[0.0; OUTPUT_DIMS]; n];

    for iter in 0..config.iterations {
        let exaggeration = if iter < EXAGGERATION_ITERS {
            EARLY_EXAGGERATION
        } else {
            1.0
        };
        let momentum = if iter < MOMENTUM_SWITCH_ITER { 0.5 } else { 0.8 };

        // Student-t affinities in the embedding.
        let mut num = vec![vec![0.0; n]; n];
        let mut z = 0.0;
        for i in 0..n {
            for j in (i + 1)..n {
                let d2: f64 = (0..OUTPUT_DIMS).map(|d| (y[i][d] - y[j][d]).powi(2)).sum();
                let v = 1.0 / (1.0 + d2);
                num[i][j] = v;
                num[j][i] = v;
                z += 2.0 * v;
            }
        }
        let z = z.max(1e-12);

        for i in 0..n {
            let mut grad = [0.0; OUTPUT_DIMS];
            for j in 0..n {
                if i == j {
                    continue;
                }
                let q = (num[i][j] / z).max(1e-12);
                let coeff = 4.0 * (exaggeration * p[i][j] - q) * num[i][j];
                for d in 0..OUTPUT_DIMS {
                    grad[d] += coeff * (y[i][d] - y[j][d]);
                }
            }
            for d in 0..OUTPUT_DIMS {
                velocity[i][d] = momentum * velocity[i][d] - config.learning_rate * grad[d];
            }
        }
        for i in 0..n {
            for d in 0..OUTPUT_DIMS {
                y[i][d] += velocity[i][d];
            }
        }
    }

    // Center the embedding.
    let mut mean = [0.0; OUTPUT_DIMS];
    for point in &y {
        for d in 0..OUTPUT_DIMS {
            mean[d] += point[d] / n as f64;
        }
    }
    for point in y.iter_mut() {
        for d in 0..OUTPUT_DIMS {
            point[d] -= mean[d];
        }
    }
    debug!(points = n, iterations = config.iterations, "t-SNE projection complete");
    y
}

/// Symmetrized joint probabilities with per-point bandwidth calibrated to
/// the target perplexity by binary search, following van der Maaten's
/// formulation.
fn joint_probabilities(rows: &[Vec<f64>], perplexity: f64) -> Vec<Vec<f64>> {
    let n = rows.len();
    let mut d2 = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let dist: f64 = rows[i]
                .iter()
                .zip(rows[j].iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum();
            d2[i][j] = dist;
            d2[j][i] = dist;
        }
    }

    let target_entropy = perplexity.ln();
    let mut cond = vec![vec![0.0; n]; n];
    for i in 0..n {
        let mut beta = 1.0;
        let mut beta_min = f64::NEG_INFINITY;
        let mut beta_max = f64::INFINITY;
        for _ in 0..50 {
            let mut sum = 0.0;
            for j in 0..n {
                if j != i {
                    cond[i][j] = (-beta * d2[i][j]).exp();
                    sum += cond[i][j];
                }
            }
            if sum <= 0.0 {
                // All neighbors at identical (or infinite) distance; a
                // uniform row is the right degenerate answer.
                let uniform = 1.0 / (n - 1) as f64;
                for j in 0..n {
                    cond[i][j] = if j == i { 0.0 } else { uniform };
                }
                break;
            }
            let mut entropy = 0.0;
            for j in 0..n {
                if j != i {
                    cond[i][j] /= sum;
                    if cond[i][j] > 1e-12 {
                        entropy -= cond[i][j] * cond[i][j].ln();
                    }
                }
            }
            let diff = entropy - target_entropy;
            if diff.abs() < 1e-5 {
                break;
            }
            if diff > 0.0 {
                beta_min = beta;
                beta = if beta_max.is_infinite() {
                    beta * 2.0
                } else {
                    (beta + beta_max) / 2.0
                };
            } else {
                beta_max = beta;
                beta = if beta_min.is_infinite() {
                    beta / 2.0
                } else {
                    (beta + beta_min) / 2.0
                };
            }
        }
    }

    let mut joint = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..n {
            if i != j {
                joint[i][j] = ((cond[i][j] + cond[j][i]) / (2.0 * n as f64)).max(1e-12);
            }
        }
    }
    joint
}

/// Standard normal via Box-Muller; `rand` alone carries no distributions.
fn normal_sample(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standardize_zero_mean_unit_variance() {
        let s = standardize(&[vec![1.0, 10.0], vec![3.0, 30.0], vec![5.0, 50.0]]);
        for d in 0..2 {
            let mean: f64 = s.matrix.iter().map(|r| r[d]).sum::<f64>() / 3.0;
            let var: f64 = s.matrix.iter().map(|r| (r[d] - mean).powi(2)).sum::<f64>() / 3.0;
            assert!(mean.abs() < 1e-12);
            assert!((var - 1.0).abs() < 1e-9);
        }
        assert_eq!(s.degenerate_dims, 0);
    }

    #[test]
    fn test_standardize_flat_dimension_maps_to_zero() {
        let s = standardize(&[vec![7.0, 1.0], vec![7.0, 2.0]]);
        assert_eq!(s.degenerate_dims, 1);
        assert_eq!(s.matrix[0][0], 0.0);
        assert_eq!(s.matrix[1][0], 0.0);
    }

    #[test]
    fn test_project_point_count_and_determinism() {
        let rows: Vec<Vec<f64>> = (0..8)
            .map(|i| vec![i as f64, (i * i) as f64 % 5.0])
            .collect();
        let config = TsneConfig {
            iterations: 100,
            ..Default::default()
        };
        let a = project(&standardize(&rows).matrix, &config);
        let b = project(&standardize(&rows).matrix, &config);
        assert_eq!(a.len(), 8);
        assert_eq!(a, b);
    }

    #[test]
    fn test_project_flat_input_does_not_crash() {
        let rows = vec![vec![0.0; 4]; 6];
        let config = TsneConfig {
            iterations: 50,
            ..Default::default()
        };
        let points = project(&rows, &config);
        assert_eq!(points.len(), 6);
        for p in points {
            assert!(p.iter().all(|c| c.is_finite()));
        }
    }

    #[test]
    fn test_project_separates_distant_groups() {
        // Two tight groups far apart in feature space should end up
        // farther from each other than within themselves.
        let mut rows = Vec::new();
        for i in 0..4 {
            rows.push(vec![0.0 + i as f64 * 0.01, 0.0]);
        }
        for i in 0..4 {
            rows.push(vec![100.0 + i as f64 * 0.01, 100.0]);
        }
        let config = TsneConfig {
            iterations: 300,
            ..Default::default()
        };
        let y = project(&standardize(&rows).matrix, &config);
        let dist = |a: &[f64; 3], b: &[f64; 3]| -> f64 {
            (0..3).map(|d| (a[d] - b[d]).powi(2)).sum::<f64>().sqrt()
        };
        let within = dist(&y[0], &y[1]);
        let across = dist(&y[0], &y[5]);
        assert!(across > within);
    }
}

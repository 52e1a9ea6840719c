//! Evidence index: concrete attention edges that justify a head's role
//! assignment.
//!
//! Per sentence and head we keep the single strongest token-to-token edge.
//! Diagonal self-attention is excluded unless nothing off-diagonal reaches
//! the configured minimum weight; a head whose best evidence is "token
//! attends to itself" should only say so when that is genuinely all it
//! does.

use serde::{Deserialize, Serialize};

use crate::extract::AttentionMatrix;

/// One observed attention edge, with enough context for human display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeCandidate {
    pub sentence: String,
    pub from_token: String,
    pub to_token: String,
    pub from_pos: usize,
    pub to_pos: usize,
    pub weight: f64,
}

/// Find the strongest edge of one head in one sentence, or `None` for a
/// single-token sentence.
pub fn strongest_edge(
    sentence: &str,
    tokens: &[String],
    matrix: &AttentionMatrix,
    min_weight: f64,
) -> Option<EdgeCandidate> {
    let n = matrix.len();
    if n < 2 || tokens.len() < n {
        return None;
    }

    let mut best_off: Option<(usize, usize, f64)> = None;
    let mut best_diag: (usize, f64) = (0, f64::MIN);
    for i in 0..n {
        for j in 0..n {
            let w = matrix.get(i, j);
            if i == j {
                if w > best_diag.1 {
                    best_diag = (i, w);
                }
            } else if best_off.is_none_or(|(_, _, bw)| w > bw) {
                best_off = Some((i, j, w));
            }
        }
    }

    let (from_pos, to_pos, weight) = match best_off {
        Some((i, j, w)) if w >= min_weight => (i, j, w),
        // No interesting off-diagonal edge: fall back to the diagonal.
        _ => (best_diag.0, best_diag.0, best_diag.1),
    };

    Some(EdgeCandidate {
        sentence: sentence.to_string(),
        from_token: tokens[from_pos].clone(),
        to_token: tokens[to_pos].clone(),
        from_pos,
        to_pos,
        weight,
    })
}

/// Keep the global top `top_n` candidates by weight, descending. Input is
/// one candidate per sentence; output is the head's evidence list.
pub fn top_evidence(mut candidates: Vec<EdgeCandidate>, top_n: usize) -> Vec<EdgeCandidate> {
    candidates.sort_by(|a, b| {
        b.weight
            .partial_cmp(&a.weight)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(top_n);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_strongest_edge_prefers_off_diagonal() {
        let m = AttentionMatrix::new(vec![vec![0.6, 0.4], vec![0.3, 0.7]]).unwrap();
        let edge = strongest_edge("the cat", &tokens(&["the", "cat"]), &m, 0.2).unwrap();
        // Diagonal entries 0.6 and 0.7 are larger, but 0.4 clears the
        // threshold and wins.
        assert_eq!((edge.from_pos, edge.to_pos), (0, 1));
        assert!((edge.weight - 0.4).abs() < 1e-12);
        assert_eq!(edge.from_token, "the");
        assert_eq!(edge.to_token, "cat");
    }

    #[test]
    fn test_strongest_edge_diagonal_fallback() {
        let m = AttentionMatrix::new(vec![vec![0.9, 0.1], vec![0.05, 0.95]]).unwrap();
        let edge = strongest_edge("a b", &tokens(&["a", "b"]), &m, 0.2).unwrap();
        assert_eq!(edge.from_pos, edge.to_pos);
        assert!((edge.weight - 0.95).abs() < 1e-12);
    }

    #[test]
    fn test_strongest_edge_single_token_is_none() {
        let m = AttentionMatrix::new(vec![vec![1.0]]).unwrap();
        assert!(strongest_edge("hi", &tokens(&["hi"]), &m, 0.2).is_none());
    }

    #[test]
    fn test_top_evidence_keeps_heaviest() {
        let a = EdgeCandidate {
            sentence: "s1".into(),
            from_token: "the".into(),
            to_token: "cat".into(),
            from_pos: 0,
            to_pos: 1,
            weight: 0.9,
        };
        let b = EdgeCandidate {
            sentence: "s2".into(),
            from_token: "dog".into(),
            to_token: "ran".into(),
            from_pos: 0,
            to_pos: 1,
            weight: 0.95,
        };
        let kept = top_evidence(vec![a, b.clone()], 1);
        assert_eq!(kept, vec![b]);
    }

    #[test]
    fn test_top_evidence_sorts_descending() {
        let mk = |w: f64| EdgeCandidate {
            sentence: format!("s{w}"),
            from_token: "x".into(),
            to_token: "y".into(),
            from_pos: 0,
            to_pos: 1,
            weight: w,
        };
        let kept = top_evidence(vec![mk(0.3), mk(0.8), mk(0.5)], 3);
        let weights: Vec<f64> = kept.iter().map(|e| e.weight).collect();
        assert_eq!(weights, vec![0.8, 0.5, 0.3]);
    }
}

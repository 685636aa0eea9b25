//! Quartet-consistency scoring.  For four leaves `a, b, c, d` exactly one of
//! the three pairings `(a,b|c,d)`, `(a,c|b,d)`, `(a,d|b,c)` embeds in a
//! ternary tree with node-disjoint paths; the raw cost sums the distance
//! total of that embedded pairing over all leaf 4-subsets.  The bounds MIN
//! and MAX depend only on the matrix, giving the normalized score
//! `S = (MAX - raw) / (MAX - MIN)` in `[0, 1]`, higher is better.

use std::sync::Arc;

use itertools::Itertools;
use ordered_float::OrderedFloat;

use crate::error::{Error, Result};
use crate::matrix::DistanceMatrix;
use crate::tree::connected::ConnectedNodeMap;
use crate::tree::Tree;

/// Normalized tree score, orderable so searches can rank candidates.
pub type Score = OrderedFloat<f64>;

/// Absolute slack for every raw-cost comparison in the engine.
pub const ERR_TOL: f64 = 1e-6;

/// Scores trees against one shared matrix.  `min`/`max` are computed once at
/// construction (the only O(N⁴) pass in the engine) and reused for every
/// normalization.
#[derive(Debug, Clone)]
pub struct Scorer {
    dm: Arc<DistanceMatrix>,
    min: f64,
    max: f64,
}

impl Scorer {
    pub fn new(dm: Arc<DistanceMatrix>) -> Self {
        let n = dm.dim();
        let mut min = 0.0;
        let mut max = 0.0;
        for (i, j, k, l) in (0..n).tuple_combinations() {
            let c1 = dm.get(i, j) + dm.get(k, l);
            let c2 = dm.get(i, k) + dm.get(j, l);
            let c3 = dm.get(i, l) + dm.get(j, k);
            min += c1.min(c2).min(c3);
            max += c1.max(c2).max(c3);
        }
        Self { dm, min, max }
    }

    /// Sum over all 4-subsets of the minimum pairing cost.
    pub fn min_cost(&self) -> f64 {
        self.min
    }

    /// Sum over all 4-subsets of the maximum pairing cost.
    pub fn max_cost(&self) -> f64 {
        self.max
    }

    /// Raw quartet cost of `tree` in O(N³): every quartet taking two leaves
    /// from one branch of an internal node and one from each of the other
    /// two splits at that node, so per node and branch the `n·(n-1)/2`
    /// in-branch pairs multiply the cross-branch distances.  The multipliers
    /// are accumulated as integers per column pair and applied to the matrix
    /// in a single final dot product, keeping the result independent of
    /// traversal order.
    pub fn raw_cost(&self, tree: &Tree) -> Result<f64> {
        let map = ConnectedNodeMap::build(tree)?;
        let dim = self.dm.dim();
        let placement = tree.leaf_placement().to_vec();
        let mut multipliers = vec![0i64; dim * dim];
        for v in tree.node_ids().filter(|&v| tree.degree(v) == 3) {
            for slot in 0..3 {
                let in_branch = map.leaf_count(v, slot) as i64;
                if in_branch < 2 {
                    continue;
                }
                let npairs = in_branch * (in_branch - 1) / 2;
                let first = (slot + 2) % 3;
                let second = (slot + 1) % 3;
                for i in 0..dim {
                    if map.branch(v, placement[i]) != first {
                        continue;
                    }
                    for j in 0..dim {
                        if map.branch(v, placement[j]) != second {
                            continue;
                        }
                        multipliers[i * dim + j] += npairs;
                    }
                }
            }
        }
        let mut raw = 0.0;
        for i in 0..dim {
            for j in 0..dim {
                let m = multipliers[i * dim + j];
                if m != 0 {
                    raw += m as f64 * self.dm.get(i, j);
                }
            }
        }
        Ok(raw)
    }

    /// O(N⁴) reference scorer walking every 4-subset through
    /// [`Tree::is_consistent_quartet`].  Cross-validation only.
    pub fn raw_cost_reference(&self, tree: &mut Tree) -> Result<f64> {
        let dim = self.dm.dim();
        let placement = tree.leaf_placement().to_vec();
        let mut acc = 0.0;
        for (i, j, k, l) in (0..dim).tuple_combinations() {
            let (ni, nj, nk, nl) = (placement[i], placement[j], placement[k], placement[l]);
            let c1 = self.dm.get(i, j) + self.dm.get(k, l);
            let c2 = self.dm.get(i, k) + self.dm.get(j, l);
            let c3 = self.dm.get(i, l) + self.dm.get(j, k);
            if tree.is_consistent_quartet(ni, nj, nk, nl)? {
                acc += c1;
            } else if tree.is_consistent_quartet(ni, nk, nj, nl)? {
                acc += c2;
            } else if tree.is_consistent_quartet(ni, nl, nj, nk)? {
                acc += c3;
            } else {
                return Err(Error::InvariantViolation(format!(
                    "no consistent pairing for columns {} {} {} {}",
                    i, j, k, l
                )));
            }
        }
        Ok(acc)
    }

    /// Normalizes a raw cost, enforcing `raw` within `[min - tol, max + tol]`.
    /// When every pairing of every quartet costs the same (`max == min`)
    /// there is nothing to optimize and the score is defined as 1.
    pub fn normalized(&self, raw: f64) -> Result<Score> {
        if raw < self.min - ERR_TOL || raw > self.max + ERR_TOL {
            return Err(Error::NumericTolerance {
                raw,
                min: self.min,
                max: self.max,
            });
        }
        if self.max - self.min <= ERR_TOL {
            return Ok(OrderedFloat(1.0));
        }
        let s = (self.max - raw) / (self.max - self.min);
        Ok(OrderedFloat(s.clamp(0.0, 1.0)))
    }

    /// Normalized score of `tree`, cached on the tree until its next edit.
    pub fn score_tree(&self, tree: &mut Tree) -> Result<Score> {
        if let Some(score) = tree.cached_score() {
            return Ok(score);
        }
        let raw = self.raw_cost(tree)?;
        let score = self.normalized(raw)?;
        tree.set_cached_score(score);
        Ok(score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_matrix(dim: usize, seed: u64) -> Arc<DistanceMatrix> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut rows = vec![vec![0.0; dim]; dim];
        for i in 0..dim {
            for j in i + 1..dim {
                let d = rng.gen_range(0.1..10.0);
                rows[i][j] = d;
                rows[j][i] = d;
            }
        }
        Arc::new(DistanceMatrix::from_rows(rows).unwrap())
    }

    #[test]
    fn exactly_one_pairing_is_consistent() {
        let mut tree = Tree::new(DistanceMatrix::unit(6).unwrap()).unwrap();
        let placement = tree.leaf_placement().to_vec();
        let dim = 6;
        for i in 0..dim {
            for j in i + 1..dim {
                for k in j + 1..dim {
                    for l in k + 1..dim {
                        let (a, b, c, d) =
                            (placement[i], placement[j], placement[k], placement[l]);
                        let hits = [
                            tree.is_consistent_quartet(a, b, c, d).unwrap(),
                            tree.is_consistent_quartet(a, c, b, d).unwrap(),
                            tree.is_consistent_quartet(a, d, b, c).unwrap(),
                        ];
                        assert_eq!(hits.iter().filter(|&&h| h).count(), 1);
                    }
                }
            }
        }
    }

    #[test]
    fn fast_and_reference_scorers_agree() {
        for (dim, seed) in [(5, 11), (6, 12), (7, 13)] {
            let dm = random_matrix(dim, seed);
            let scorer = Scorer::new(dm.clone());
            let mut tree = Tree::new(dm).unwrap();
            let fast = scorer.raw_cost(&tree).unwrap();
            let slow = scorer.raw_cost_reference(&mut tree).unwrap();
            assert!((fast - slow).abs() < ERR_TOL, "{} vs {}", fast, slow);
        }
    }

    #[test]
    fn aligned_placement_reaches_the_minimum() {
        // one quartet with C1 < C2 < C3; the caterpillar embeds (0,2|1,3),
        // so identity placement pays C2 and swapping columns 1 and 2 pays C1
        let rows = vec![
            vec![0.0, 1.0, 2.0, 3.0],
            vec![1.0, 0.0, 3.0, 2.0],
            vec![2.0, 3.0, 0.0, 1.0],
            vec![3.0, 2.0, 1.0, 0.0],
        ];
        let dm = Arc::new(DistanceMatrix::from_rows(rows).unwrap());
        let scorer = Scorer::new(dm.clone());
        assert_eq!(scorer.min_cost(), 2.0);
        assert_eq!(scorer.max_cost(), 6.0);

        let mut tree = Tree::new(dm).unwrap();
        let raw = scorer.raw_cost(&tree).unwrap();
        assert!((raw - 4.0).abs() < ERR_TOL);
        assert_eq!(scorer.score_tree(&mut tree).unwrap().into_inner(), 0.5);

        tree.swap_leaf_placement(1, 2);
        let raw = scorer.raw_cost(&tree).unwrap();
        assert!((raw - scorer.min_cost()).abs() < ERR_TOL);
        assert_eq!(scorer.score_tree(&mut tree).unwrap().into_inner(), 1.0);
    }

    #[test]
    fn degenerate_matrix_scores_one() {
        let dm = DistanceMatrix::unit(5).unwrap();
        let scorer = Scorer::new(dm.clone());
        assert!((scorer.max_cost() - scorer.min_cost()).abs() < ERR_TOL);
        let mut tree = Tree::new(dm).unwrap();
        let raw = scorer.raw_cost(&tree).unwrap();
        assert!((raw - scorer.min_cost()).abs() < ERR_TOL);
        assert_eq!(scorer.score_tree(&mut tree).unwrap().into_inner(), 1.0);
    }

    #[test]
    fn scores_stay_in_unit_range() {
        for seed in 0..5 {
            let dm = random_matrix(6, 100 + seed);
            let scorer = Scorer::new(dm.clone());
            let mut tree = Tree::new(dm).unwrap();
            let s = scorer.score_tree(&mut tree).unwrap().into_inner();
            assert!((0.0..=1.0).contains(&s));
        }
    }

    #[test]
    fn cherry_swap_leaves_the_score_unchanged() {
        // leaves 0 and 4 share kernel 6 on the 6-leaf caterpillar, so
        // exchanging their columns induces the same leaf partition
        let dm = random_matrix(6, 42);
        let scorer = Scorer::new(dm.clone());
        let mut tree = Tree::new(dm).unwrap();
        let before = scorer.score_tree(&mut tree).unwrap();
        tree.swap_leaf_placement(0, 4);
        let after = scorer.score_tree(&mut tree).unwrap();
        assert!((before.into_inner() - after.into_inner()).abs() < ERR_TOL);
    }

    #[test]
    fn out_of_range_raw_is_rejected() {
        let dm = random_matrix(5, 3);
        let scorer = Scorer::new(dm);
        assert!(matches!(
            scorer.normalized(scorer.max_cost() + 1.0),
            Err(Error::NumericTolerance { .. })
        ));
        assert!(matches!(
            scorer.normalized(scorer.min_cost() - 1.0),
            Err(Error::NumericTolerance { .. })
        ));
    }
}

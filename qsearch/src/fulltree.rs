//! The auxiliary view driving the inner search loop: every node carries its
//! branch leaf counts and cross-branch distance sums, so the raw quartet
//! cost is maintained incrementally while subtrees are swapped around.
//!
//! A position pair `(a, b)` is read relative to the path between them: the
//! subtree at `a` is everything behind `a` seen from `b`, and vice versa.
//! Swapping the two subtrees re-hangs `a`'s side where `b` was attached and
//! `b`'s side where `a` was attached.  Only the nodes strictly between `a`
//! and `b` see their branch partition change, which is what makes the
//! incremental update cheap:
//!
//! * for such a node `u`, the branch toward `a` loses `a`'s subtree and
//!   gains `b`'s, and the branch toward `b` the opposite; the third branch
//!   is untouched;
//! * with `delta[j] = sum_{i in A} d(i,j) - sum_{i in B} d(i,j)` over the
//!   leaf columns of the two moved subtrees, each of `u`'s three
//!   cross-branch sums moves by a partial sum of `delta`, and its cost
//!   contribution `sum_k pairs(n_k) * cross[k]` is re-evaluated from the
//!   patched values.
//!
//! Applying the same swap again undoes it, which is what the Metropolis
//! rejection in the search relies on.

use rand::Rng;

use crate::error::{Error, Result};
use crate::tree::connected::ConnectedNodeMap;
use crate::tree::{NodeIdx, Tree};

pub struct FullTree {
    tree: Tree,
    map: ConnectedNodeMap,
    /// `cross[v][k]`: sum of `d(i,j)` over leaf-column pairs taken from the
    /// two branches of `v` other than `k`.  Meaningful for kernels only.
    cross: Vec<[f64; 3]>,
    /// Inverse leaf placement: which column each node carries.
    column_of: Vec<Option<usize>>,
    raw: f64,
}

fn pairs(n: usize) -> f64 {
    (n * n.saturating_sub(1) / 2) as f64
}

impl FullTree {
    pub fn new(tree: Tree) -> Result<Self> {
        let map = ConnectedNodeMap::build(&tree)?;
        let n = tree.node_count();
        let dim = tree.matrix().dim();
        let placement = tree.leaf_placement().to_vec();

        let mut column_of = vec![None; n];
        for (col, &node) in placement.iter().enumerate() {
            column_of[node.index()] = Some(col);
        }

        let dm = tree.matrix().clone();
        let mut cross = vec![[0.0; 3]; n];
        for v in tree.node_ids().filter(|&v| tree.degree(v) == 3) {
            let entry = &mut cross[v.index()];
            for i in 0..dim {
                let bi = map.branch(v, placement[i]);
                for j in i + 1..dim {
                    let bj = map.branch(v, placement[j]);
                    if bi != bj {
                        entry[3 - bi - bj] += dm.get(i, j);
                    }
                }
            }
        }

        let mut full = Self {
            tree,
            map,
            cross,
            column_of,
            raw: 0.0,
        };
        full.raw = full
            .tree
            .node_ids()
            .filter(|&v| full.tree.degree(v) == 3)
            .map(|v| full.contribution(v))
            .sum();
        Ok(full)
    }

    fn contribution(&self, v: NodeIdx) -> f64 {
        (0..3)
            .map(|k| pairs(self.map.leaf_count(v, k)) * self.cross[v.index()][k])
            .sum()
    }

    pub fn raw_score(&self) -> f64 {
        self.raw
    }

    pub fn node_count(&self) -> usize {
        self.tree.node_count()
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Snapshot of the current topology, sharing the matrix.
    pub fn to_tree(&self) -> Tree {
        self.tree.clone()
    }

    /// First step on the path `from -> to`; O(1) off the live branch map.
    pub fn next_hop(&self, from: NodeIdx, to: NodeIdx) -> NodeIdx {
        self.map.next_hop(from, to)
    }

    /// The third neighbor of `node`'s next hop toward `toward`: the subtree
    /// that shares an attachment point with `node` on that side.
    pub fn find_sibling(&self, node: NodeIdx, toward: NodeIdx) -> Result<NodeIdx> {
        let parent = self.next_hop(node, toward);
        if parent == toward {
            return Err(Error::InvariantViolation(format!(
                "nodes {} and {} are adjacent, no sibling between them",
                node.index(),
                toward.index()
            )));
        }
        let up = self.next_hop(parent, toward);
        for slot in 0..self.map.degree(parent) {
            let c = self.map.connection(parent, slot);
            if c != node && c != up {
                return Ok(c);
            }
        }
        Err(Error::InvariantViolation(format!(
            "node {} has no sibling toward {}",
            node.index(),
            toward.index()
        )))
    }

    /// A uniformly sampled pair with at least three edges between its
    /// members, so the pairwise swap is non-degenerate and the two-swap
    /// subtree move is well formed.  Such a pair exists for every valid
    /// tree over four or more leaves.
    pub fn random_pair(&self, rng: &mut impl Rng) -> Result<(NodeIdx, NodeIdx)> {
        let n = self.node_count();
        for _ in 0..64 * n * n {
            let p1 = NodeIdx::new(rng.gen_range(0..n));
            let p2 = NodeIdx::new(rng.gen_range(0..n));
            if p1 == p2 {
                continue;
            }
            let hop = self.next_hop(p1, p2);
            if hop == p2 || self.next_hop(hop, p2) == p2 {
                continue;
            }
            return Ok((p1, p2));
        }
        Err(Error::InvariantViolation(
            "failed to sample a distant node pair".into(),
        ))
    }

    /// Exchanges the subtree at `a` (away from `b`) with the subtree at `b`
    /// (away from `a`), patching the branch map and the raw score in place.
    /// Swapping two branches of the same node is the identity and returns
    /// immediately.  Self-inverse.
    pub fn swap_nodes(&mut self, a: NodeIdx, b: NodeIdx) -> Result<()> {
        if a == b {
            return Err(Error::InvariantViolation(format!(
                "cannot swap node {} with itself",
                a.index()
            )));
        }
        let u1 = self.next_hop(a, b);
        if u1 == b {
            return Err(Error::InvariantViolation(format!(
                "cannot swap adjacent nodes {} and {}",
                a.index(),
                b.index()
            )));
        }
        let u2 = self.next_hop(b, a);
        if u1 == u2 {
            // both subtrees already hang off the same node
            return Ok(());
        }

        // nodes strictly between a and b, u1 ..= u2
        let mut middle = vec![u1];
        let mut cur = u1;
        while cur != u2 {
            cur = self.next_hop(cur, u2);
            middle.push(cur);
        }

        let n = self.node_count();
        let dim = self.tree.matrix().dim();
        let dm = self.tree.matrix().clone();
        let placement = self.tree.leaf_placement().to_vec();

        // membership of the two moved subtrees
        let side_of = |anchor: NodeIdx, other: NodeIdx| -> (Vec<NodeIdx>, Vec<bool>) {
            let away = self.map.branch(anchor, other);
            let mut members = vec![anchor];
            let mut marks = vec![false; n];
            marks[anchor.index()] = true;
            for x in self.tree.node_ids().filter(|&x| x != anchor) {
                if self.map.branch(anchor, x) != away {
                    members.push(x);
                    marks[x.index()] = true;
                }
            }
            (members, marks)
        };
        let (list_a, in_a) = side_of(a, b);
        let (list_b, in_b) = side_of(b, a);

        // delta[j] = sum over leaves(A) of d(i,j), minus the same over leaves(B)
        let mut delta = vec![0.0; dim];
        let mut a_leaves = 0i64;
        let mut b_leaves = 0i64;
        for &x in &list_a {
            if let Some(ci) = self.column_of[x.index()] {
                a_leaves += 1;
                for j in 0..dim {
                    delta[j] += dm.get(ci, j);
                }
            }
        }
        for &x in &list_b {
            if let Some(ci) = self.column_of[x.index()] {
                b_leaves += 1;
                for j in 0..dim {
                    delta[j] -= dm.get(ci, j);
                }
            }
        }

        // branch slots toward a and b, per middle node, read before any edit
        let plan: Vec<(NodeIdx, usize, usize)> = middle
            .iter()
            .map(|&u| (u, self.map.branch(u, a), self.map.branch(u, b)))
            .collect();

        for &(u, kp, kq) in &plan {
            let kr = 3 - kp - kq;
            let before = self.contribution(u);
            let mut sum_p0 = 0.0;
            let mut sum_q0 = 0.0;
            let mut sum_r = 0.0;
            for (j, &dj) in delta.iter().enumerate() {
                let nj = placement[j];
                let bj = self.map.branch(u, nj);
                if bj == kr {
                    sum_r += dj;
                } else if bj == kp && !in_a[nj.index()] {
                    sum_p0 += dj;
                } else if bj == kq && !in_b[nj.index()] {
                    sum_q0 += dj;
                }
            }
            let entry = &mut self.cross[u.index()];
            entry[kr] += sum_p0 - sum_q0;
            entry[kp] += sum_r;
            entry[kq] -= sum_r;
            self.map.add_leaf_count(u, kp, b_leaves - a_leaves);
            self.map.add_leaf_count(u, kq, a_leaves - b_leaves);
            self.raw += self.contribution(u) - before;
        }

        // re-hang the two subtrees
        self.tree.disconnect(a, u1)?;
        self.tree.disconnect(b, u2)?;
        self.tree.connect(a, u2)?;
        self.tree.connect(b, u1)?;
        self.map.replace_connection(a, u1, u2)?;
        self.map.replace_connection(u1, a, b)?;
        self.map.replace_connection(b, u2, u1)?;
        self.map.replace_connection(u2, b, a)?;

        // the moved subtrees trade branch slots at every middle node
        for &(u, kp, kq) in &plan {
            for &x in &list_a {
                self.map.set_branch(u, x, kq);
            }
            for &x in &list_b {
                self.map.set_branch(u, x, kp);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::DistanceMatrix;
    use crate::score::{Scorer, ERR_TOL};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;

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
    fn initial_raw_matches_the_scorer() {
        for (dim, seed) in [(4, 1), (5, 2), (6, 3), (8, 4)] {
            let dm = random_matrix(dim, seed);
            let scorer = Scorer::new(dm.clone());
            let tree = Tree::new(dm).unwrap();
            let expect = scorer.raw_cost(&tree).unwrap();
            let full = FullTree::new(tree).unwrap();
            assert!(
                (full.raw_score() - expect).abs() < ERR_TOL,
                "dim {}: {} vs {}",
                dim,
                full.raw_score(),
                expect
            );
        }
    }

    #[test]
    fn incremental_raw_tracks_full_recomputation() {
        for (dim, seed) in [(5, 31), (6, 32), (7, 33), (8, 34)] {
            let dm = random_matrix(dim, seed);
            let scorer = Scorer::new(dm.clone());
            let tree = Tree::new(dm).unwrap();
            let mut full = FullTree::new(tree).unwrap();
            let mut rng = StdRng::seed_from_u64(seed ^ 0xbeef);
            for step in 0..40 {
                let (p1, p2) = full.random_pair(&mut rng).unwrap();
                full.swap_nodes(p1, p2).unwrap();
                let mut snapshot = full.to_tree();
                assert!(snapshot.is_valid_tree(), "step {} broke the tree", step);
                let expect = scorer.raw_cost(&snapshot).unwrap();
                assert!(
                    (full.raw_score() - expect).abs() < ERR_TOL,
                    "dim {} step {}: {} vs {}",
                    dim,
                    step,
                    full.raw_score(),
                    expect
                );
            }
        }
    }

    #[test]
    fn swap_is_self_inverse() {
        let dm = random_matrix(7, 77);
        let tree = Tree::new(dm).unwrap();
        let mut full = FullTree::new(tree).unwrap();
        let mut rng = StdRng::seed_from_u64(101);
        for _ in 0..20 {
            let before_adj = full.tree().adjacency_matrix();
            let before_raw = full.raw_score();
            let (p1, p2) = full.random_pair(&mut rng).unwrap();
            full.swap_nodes(p1, p2).unwrap();
            full.swap_nodes(p1, p2).unwrap();
            assert_eq!(full.tree().adjacency_matrix(), before_adj);
            assert!((full.raw_score() - before_raw).abs() < ERR_TOL);
        }
    }

    #[test]
    fn subtree_move_leaves_the_pair_as_siblings() {
        let dm = random_matrix(8, 55);
        let tree = Tree::new(dm).unwrap();
        let mut full = FullTree::new(tree).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let before_adj = full.tree().adjacency_matrix();
            let (p1, p2) = full.random_pair(&mut rng).unwrap();
            let interior = full.next_hop(p1, p2);
            assert_ne!(interior, p2);
            let sibling = full.find_sibling(p1, p2).unwrap();

            full.swap_nodes(interior, p2).unwrap();
            full.swap_nodes(sibling, p2).unwrap();

            // p1 and p2 now share an attachment point
            assert_eq!(full.find_sibling(p1, sibling).unwrap(), p2);
            let mut moved = full.to_tree();
            assert!(moved.is_valid_tree());

            // the reverse swaps restore the original topology
            full.swap_nodes(sibling, p2).unwrap();
            full.swap_nodes(interior, p2).unwrap();
            assert_eq!(full.tree().adjacency_matrix(), before_adj);
        }
    }

    #[test]
    fn degenerate_swap_requests_are_rejected() {
        let dm = random_matrix(5, 5);
        let tree = Tree::new(dm).unwrap();
        let mut full = FullTree::new(tree).unwrap();
        let a = NodeIdx::new(0);
        assert!(full.swap_nodes(a, a).is_err());
        // leaf 0 hangs off kernel 5 on the 5-leaf caterpillar
        assert!(full.swap_nodes(a, NodeIdx::new(5)).is_err());
    }
}

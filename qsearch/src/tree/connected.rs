//! The per-node branch partition: for every node `v`, which of `v`'s up to
//! three incident edges leads to each other node, and how many leaves sit
//! down each of those branches.  This single view powers the next-hop path
//! table, the fast quartet scorer, and the incremental full-tree score.

use super::{NodeIdx, Tree};
use crate::error::{Error, Result};

/// Branch value for the node itself; never a valid edge slot.
const SELF_BRANCH: u8 = 3;

/// A snapshot of the branch partition of a [`Tree`].  Built in one O(N²)
/// pass; the full-tree mutator patches it in place instead of rebuilding.
#[derive(Debug, Clone)]
pub struct ConnectedNodeMap {
    /// Neighbor of `v` at each edge slot, padded with `v` itself.
    connections: Vec<[NodeIdx; 3]>,
    degree: Vec<u8>,
    /// `branch[v][u]`: the edge slot of `v` whose branch contains `u`.
    branch: Vec<Vec<u8>>,
    leaf_count: Vec<[u32; 3]>,
}

impl ConnectedNodeMap {
    pub fn build(tree: &Tree) -> Result<Self> {
        let n = tree.node_count();
        let mut map = Self {
            connections: vec![[NodeIdx::new(0); 3]; n],
            degree: vec![0; n],
            branch: vec![vec![SELF_BRANCH; n]; n],
            leaf_count: vec![[0; 3]; n],
        };
        for v in tree.node_ids() {
            let vi = v.index();
            map.connections[vi] = [v; 3];
            map.degree[vi] = tree.degree(v) as u8;
            let mut assigned = 0usize;
            for (k, &nb) in tree.neighbors(v).iter().enumerate() {
                map.connections[vi][k] = nb;
                let mut stack = vec![(nb, v)];
                while let Some((u, parent)) = stack.pop() {
                    assigned += 1;
                    if assigned >= n {
                        return Err(Error::InvariantViolation(format!(
                            "branch walk from node {} did not terminate",
                            vi
                        )));
                    }
                    map.branch[vi][u.index()] = k as u8;
                    if tree.degree(u) == 1 {
                        map.leaf_count[vi][k] += 1;
                    }
                    for &w in tree.neighbors(u) {
                        if w != parent {
                            stack.push((w, u));
                        }
                    }
                }
            }
        }
        Ok(map)
    }

    /// The edge slot of `v` whose branch contains `u`.  Defined for `u != v`
    /// on a connected tree.
    #[inline]
    pub fn branch(&self, v: NodeIdx, u: NodeIdx) -> usize {
        self.branch[v.index()][u.index()] as usize
    }

    /// Neighbor of `v` at `slot`.  Out-of-range slots (including the
    /// self-branch sentinel of a node the walk never reached) fall back to
    /// `v`, so path queries on a malformed graph stall instead of panicking.
    #[inline]
    pub fn connection(&self, v: NodeIdx, slot: usize) -> NodeIdx {
        self.connections[v.index()].get(slot).copied().unwrap_or(v)
    }

    pub fn degree(&self, v: NodeIdx) -> usize {
        self.degree[v.index()] as usize
    }

    #[inline]
    pub fn leaf_count(&self, v: NodeIdx, slot: usize) -> usize {
        self.leaf_count[v.index()][slot] as usize
    }

    /// First step on the unique path `from -> to`.
    #[inline]
    pub fn next_hop(&self, from: NodeIdx, to: NodeIdx) -> NodeIdx {
        self.connection(from, self.branch(from, to))
    }

    // In-place patches used by the incremental full-tree score.  Callers own
    // the consistency argument: only nodes whose partition actually changed
    // may be touched.

    pub(crate) fn set_branch(&mut self, v: NodeIdx, u: NodeIdx, slot: usize) {
        self.branch[v.index()][u.index()] = slot as u8;
    }

    pub(crate) fn add_leaf_count(&mut self, v: NodeIdx, slot: usize, delta: i64) {
        let cell = &mut self.leaf_count[v.index()][slot];
        *cell = (*cell as i64 + delta) as u32;
    }

    pub(crate) fn replace_connection(
        &mut self,
        v: NodeIdx,
        old: NodeIdx,
        new: NodeIdx,
    ) -> Result<()> {
        let vi = v.index();
        let deg = self.degree[vi] as usize;
        for slot in 0..deg {
            if self.connections[vi][slot] == old {
                self.connections[vi][slot] = new;
                return Ok(());
            }
        }
        Err(Error::InvariantViolation(format!(
            "node {} has no connection to {} to replace",
            vi,
            old.index()
        )))
    }
}

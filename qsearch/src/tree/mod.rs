//! The unrooted ternary tree at the heart of the search: an arena of
//! `2N - 2` nodes where every node has degree 1 (a leaf, carrying a column
//! of the distance matrix) or degree 3 (a kernel).  The cached views (the
//! next-hop path table and the per-node branch partition) are derived from
//! the adjacency and rebuilt lazily after edits.

pub mod connected;
pub mod path;

use std::sync::Arc;

use bit_vec::BitVec;
use index_vec::IndexVec;
use rand::Rng;

use crate::error::{Error, Result};
use crate::matrix::DistanceMatrix;
use crate::score::Score;
use self::path::PathOracle;

index_vec::define_index_type! {
    /// Dense node id in `0 .. 2N - 2`.
    pub struct NodeIdx = u32;
}

/// Node classification by degree.  A node's kind is dynamic: whatever its
/// degree says right now, not where it started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Leaf,
    Kernel,
    Any,
}

impl NodeKind {
    fn admits(self, degree: usize) -> bool {
        match self {
            NodeKind::Leaf => degree == 1,
            NodeKind::Kernel => degree == 3,
            NodeKind::Any => degree == 1 || degree == 3,
        }
    }
}

/// Traversal order for [`Tree::walk_tree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkOrder {
    Bfs,
    Dfs,
}

/// Up-to-three neighbor slots of one arena entry.  Insertion order is kept;
/// [`Tree::walk_tree`] reverses it for kernels carrying the FLIPPED flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Neighbors {
    nodes: [NodeIdx; 3],
    len: u8,
}

impl Default for Neighbors {
    fn default() -> Self {
        Self {
            nodes: [NodeIdx::new(0); 3],
            len: 0,
        }
    }
}

impl Neighbors {
    fn as_slice(&self) -> &[NodeIdx] {
        &self.nodes[..self.len as usize]
    }

    fn contains(&self, n: NodeIdx) -> bool {
        self.as_slice().contains(&n)
    }

    /// `false` when all three slots are taken.
    fn push(&mut self, n: NodeIdx) -> bool {
        if self.len >= 3 {
            return false;
        }
        self.nodes[self.len as usize] = n;
        self.len += 1;
        true
    }

    /// Removes `n`, shifting later slots down.  `false` if absent.
    fn remove(&mut self, n: NodeIdx) -> bool {
        let len = self.len as usize;
        match self.as_slice().iter().position(|&x| x == n) {
            Some(pos) => {
                for i in pos..len - 1 {
                    self.nodes[i] = self.nodes[i + 1];
                }
                self.len -= 1;
                true
            }
            None => false,
        }
    }
}

/// The per-node flag sets: two traversal scratch marks and the persistent
/// FLIPPED bit that reverses child order in ordered walks.
#[derive(Debug, Clone)]
struct NodeFlags {
    quartet_mark: BitVec,
    walked: BitVec,
    flipped: BitVec,
}

impl NodeFlags {
    fn new(n: usize) -> Self {
        Self {
            quartet_mark: BitVec::from_elem(n, false),
            walked: BitVec::from_elem(n, false),
            flipped: BitVec::from_elem(n, false),
        }
    }
}

/// An unrooted ternary tree over a shared [`DistanceMatrix`].  Owns its
/// adjacency, flags, leaf placement and caches exclusively; cloning deep
/// copies all of those and shares the matrix.
#[derive(Debug, Clone)]
pub struct Tree {
    dm: Arc<DistanceMatrix>,
    adj: IndexVec<NodeIdx, Neighbors>,
    flags: NodeFlags,
    /// Column `i` of the matrix is carried by node `leaf_placement[i]`.
    leaf_placement: Vec<NodeIdx>,
    paths: PathOracle,
    cached_score: Option<Score>,
}

impl Tree {
    /// Builds the canonical caterpillar over `dm`: leaf `i` hangs off kernel
    /// `N + i` for `i < N - 2`, the kernels form a chain, and the last two
    /// leaves close both ends.
    pub fn new(dm: Arc<DistanceMatrix>) -> Result<Self> {
        let dim = dm.dim();
        let total = 2 * dim - 2;
        let mut tree = Self {
            dm,
            adj: index_vec::index_vec![Neighbors::default(); total],
            flags: NodeFlags::new(total),
            leaf_placement: Vec::with_capacity(dim),
            paths: PathOracle::new(total),
            cached_score: None,
        };
        for i in 0..dim - 2 {
            tree.connect(NodeIdx::new(i), NodeIdx::new(dim + i))?;
            if i > 0 {
                tree.connect(NodeIdx::new(dim + i - 1), NodeIdx::new(dim + i))?;
            }
        }
        tree.connect(NodeIdx::new(dim - 2), NodeIdx::new(dim))?;
        tree.connect(NodeIdx::new(dim - 1), NodeIdx::new(total - 1))?;

        tree.leaf_placement = tree
            .node_ids()
            .filter(|&v| tree.degree(v) == 1)
            .collect();
        Ok(tree)
    }

    pub fn matrix(&self) -> &Arc<DistanceMatrix> {
        &self.dm
    }

    pub fn node_count(&self) -> usize {
        self.adj.len()
    }

    /// `(n + 2) / 2`: how many nodes a valid tree of this size has as leaves.
    pub fn leaf_node_count(&self) -> usize {
        (self.node_count() + 2) / 2
    }

    /// `(n - 2) / 2`: how many nodes a valid tree of this size has as kernels.
    pub fn kernel_node_count(&self) -> usize {
        (self.node_count() - 2) / 2
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeIdx> {
        (0..self.adj.len()).map(NodeIdx::new)
    }

    pub fn degree(&self, v: NodeIdx) -> usize {
        self.adj[v].as_slice().len()
    }

    pub fn neighbors(&self, v: NodeIdx) -> &[NodeIdx] {
        self.adj[v].as_slice()
    }

    pub fn is_connected(&self, a: NodeIdx, b: NodeIdx) -> bool {
        a != b && self.adj[a].contains(b)
    }

    fn num_edges(&self) -> usize {
        self.node_ids().map(|v| self.degree(v)).sum::<usize>() / 2
    }

    /// Column-to-node mapping of the distance matrix onto the current leaves.
    pub fn leaf_placement(&self) -> &[NodeIdx] {
        &self.leaf_placement
    }

    /// Inverse of [`Self::leaf_placement`]: which matrix column node `v`
    /// carries, if it is a placed leaf.
    pub fn column_of(&self, v: NodeIdx) -> Option<usize> {
        self.leaf_placement.iter().position(|&n| n == v)
    }

    /// Swaps the objects carried by columns `c1` and `c2`.  Topology is
    /// untouched; the cached score is not.
    pub fn swap_leaf_placement(&mut self, c1: usize, c2: usize) {
        self.leaf_placement.swap(c1, c2);
        self.cached_score = None;
    }

    fn mark_dirty(&mut self) {
        self.paths.invalidate();
        self.cached_score = None;
    }

    /// Adds the edge `(a, b)`.  Fails when `a == b`, the edge already
    /// exists, or either endpoint already has three neighbors.
    pub fn connect(&mut self, a: NodeIdx, b: NodeIdx) -> Result<()> {
        if a == b {
            return Err(Error::InvariantViolation(format!(
                "cannot connect node {} to itself",
                a.index()
            )));
        }
        if self.is_connected(a, b) {
            return Err(Error::InvariantViolation(format!(
                "nodes {} and {} are already connected",
                a.index(),
                b.index()
            )));
        }
        if self.degree(a) >= 3 || self.degree(b) >= 3 {
            return Err(Error::InvariantViolation(format!(
                "connecting {} and {} would exceed degree 3",
                a.index(),
                b.index()
            )));
        }
        self.adj[a].push(b);
        self.adj[b].push(a);
        self.mark_dirty();
        Ok(())
    }

    /// Removes the edge `(a, b)`.  Fails when the edge is absent.
    pub fn disconnect(&mut self, a: NodeIdx, b: NodeIdx) -> Result<()> {
        if a == b || !self.is_connected(a, b) {
            return Err(Error::InvariantViolation(format!(
                "nodes {} and {} are not connected",
                a.index(),
                b.index()
            )));
        }
        self.adj[a].remove(b);
        self.adj[b].remove(a);
        self.mark_dirty();
        Ok(())
    }

    /// Sets the connectedness of `(a, b)` and returns the state it replaced.
    /// A no-op (including `a == b`) reports the existing state.
    pub fn set_connected(&mut self, a: NodeIdx, b: NodeIdx, connected: bool) -> Result<bool> {
        if a == b {
            return Ok(false);
        }
        let was = self.is_connected(a, b);
        if was != connected {
            if connected {
                self.connect(a, b)?;
            } else {
                self.disconnect(a, b)?;
            }
        }
        Ok(was)
    }

    /// Drops every edge, leaving an arena of isolated nodes.  Only useful as
    /// a staging step before rebuilding a topology edge by edge.
    pub fn clear_all_connections(&mut self) {
        for entry in self.adj.iter_mut() {
            *entry = Neighbors::default();
        }
        self.mark_dirty();
    }

    /// Uniformly samples a node of the requested kind.  Bounded rejection
    /// sampling with an exhaustive fallback, so this fails with
    /// [`Error::Starvation`] only when no such node exists.
    pub fn random_node(&self, kind: NodeKind, rng: &mut impl Rng) -> Result<NodeIdx> {
        self.random_node_where(kind, rng, |_| true)
    }

    /// As [`Self::random_node`], rejecting `but_not`.
    pub fn random_node_excluding(
        &self,
        kind: NodeKind,
        but_not: NodeIdx,
        rng: &mut impl Rng,
    ) -> Result<NodeIdx> {
        self.random_node_where(kind, rng, |v| v != but_not)
    }

    fn random_node_where(
        &self,
        kind: NodeKind,
        rng: &mut impl Rng,
        admit: impl Fn(NodeIdx) -> bool,
    ) -> Result<NodeIdx> {
        let n = self.node_count();
        for _ in 0..4 * n {
            let v = NodeIdx::new(rng.gen_range(0..n));
            if kind.admits(self.degree(v)) && admit(v) {
                return Ok(v);
            }
        }
        // Sampling ran long; settle it exhaustively.
        let candidates: Vec<NodeIdx> = self
            .node_ids()
            .filter(|&v| kind.admits(self.degree(v)) && admit(v))
            .collect();
        if candidates.is_empty() {
            return Err(Error::Starvation(kind));
        }
        Ok(candidates[rng.gen_range(0..candidates.len())])
    }

    /// Uniform over the current neighbors of `v`.
    pub fn random_neighbor(&self, v: NodeIdx, rng: &mut impl Rng) -> Result<NodeIdx> {
        let nbrs = self.neighbors(v);
        if nbrs.is_empty() {
            return Err(Error::InvariantViolation(format!(
                "node {} has no neighbors to sample",
                v.index()
            )));
        }
        Ok(nbrs[rng.gen_range(0..nbrs.len())])
    }

    /// Full structural validation: degree multiset, edge count, placed
    /// leaves, and symmetric in-bounds path lengths for every node pair.
    /// Testing aid; the mutation code never calls this.
    pub fn is_valid_tree(&mut self) -> bool {
        let n = self.node_count();
        for i in 0..self.leaf_placement.len() {
            if self.degree(self.leaf_placement[i]) != 1 {
                return false;
            }
        }
        let mut leaves = 0;
        for v in 0..n {
            match self.degree(NodeIdx::new(v)) {
                1 => leaves += 1,
                3 => {}
                _ => return false,
            }
        }
        if leaves != self.leaf_node_count() || self.num_edges() != n - 1 {
            return false;
        }
        for i in 0..n {
            for j in 0..n {
                let a = NodeIdx::new(i);
                let b = NodeIdx::new(j);
                let (fwd, back) = match (self.find_path_length(a, b), self.find_path_length(b, a))
                {
                    (Ok(f), Ok(b)) => (f, b),
                    _ => return false,
                };
                if fwd != back || fwd < 1 || fwd > n {
                    return false;
                }
            }
        }
        true
    }

    // FLAGS //

    pub(crate) fn clear_quartet_marks(&mut self) {
        self.flags.quartet_mark.clear();
    }

    pub(crate) fn quartet_mark(&self, v: NodeIdx) -> bool {
        self.flags.quartet_mark.get(v.index()).unwrap_or(false)
    }

    pub(crate) fn set_quartet_mark(&mut self, v: NodeIdx) {
        self.flags.quartet_mark.set(v.index(), true);
    }

    pub fn is_flipped(&self, v: NodeIdx) -> bool {
        self.flags.flipped.get(v.index()).unwrap_or(false)
    }

    /// Toggles the FLIPPED bit on `v`, reversing its child order in ordered
    /// walks.  Quartet scores don't depend on this; the order cost does.
    pub fn toggle_flipped(&mut self, v: NodeIdx) {
        let was = self.is_flipped(v);
        self.flags.flipped.set(v.index(), !was);
    }

    // SCORE CACHE //

    pub(crate) fn cached_score(&self) -> Option<Score> {
        self.cached_score
    }

    pub(crate) fn set_cached_score(&mut self, score: Score) {
        self.cached_score = Some(score);
    }

    // ORDERED TRAVERSAL //

    /// Visits every node reachable from `fromwhere`, breadth- or depth-first
    /// off a single worklist.  Kernels with the FLIPPED flag present their
    /// neighbors in reverse order.
    pub fn walk_tree(&mut self, fromwhere: NodeIdx, order: WalkOrder) -> Result<Vec<NodeIdx>> {
        let n = self.node_count();
        self.flags.walked.clear();
        let mut result = Vec::with_capacity(n);
        let mut todo = vec![fromwhere];
        while result.len() < n {
            let next = match order {
                WalkOrder::Bfs if !todo.is_empty() => todo.remove(0),
                WalkOrder::Dfs if !todo.is_empty() => todo.remove(todo.len() - 1),
                _ => {
                    return Err(Error::InvariantViolation(format!(
                        "walk from {} exhausted after {} of {} nodes",
                        fromwhere.index(),
                        result.len(),
                        n
                    )))
                }
            };
            if self.flags.walked.get(next.index()).unwrap_or(false) {
                continue;
            }
            self.flags.walked.set(next.index(), true);
            result.push(next);
            let mut nbrs: Vec<NodeIdx> = self.neighbors(next).to_vec();
            if nbrs.len() == 3 && self.is_flipped(next) {
                nbrs.reverse();
            }
            for nb in nbrs {
                if !self.flags.walked.get(nb.index()).unwrap_or(false) {
                    todo.push(nb);
                }
            }
        }
        Ok(result)
    }

    pub fn walk_tree_bfs(&mut self, fromwhere: NodeIdx) -> Result<Vec<NodeIdx>> {
        self.walk_tree(fromwhere, WalkOrder::Bfs)
    }

    pub fn walk_tree_dfs(&mut self, fromwhere: NodeIdx) -> Result<Vec<NodeIdx>> {
        self.walk_tree(fromwhere, WalkOrder::Dfs)
    }

    /// Closed-walk distance sum over the leaves in flipped depth-first
    /// order: both directions of each consecutive column pair, wrapping
    /// around.  The auxiliary objective steered by the FLIPPED mutations.
    pub fn order_cost(&mut self) -> Result<f64> {
        let visit = self.walk_tree_dfs(NodeIdx::new(0))?;
        let columns: Vec<usize> = visit
            .into_iter()
            .filter(|&v| self.degree(v) == 1)
            .filter_map(|v| self.column_of(v))
            .collect();
        let mut acc = 0.0;
        for i in 0..columns.len() {
            let a = columns[i];
            let b = columns[(i + 1) % columns.len()];
            acc += self.dm.get(a, b) + self.dm.get(b, a);
        }
        Ok(acc)
    }

    /// Marks the path `a -> b`, then reports whether the path `c -> d`
    /// avoids every marked node.  All four must be leaves.
    pub fn is_consistent_quartet(
        &mut self,
        a: NodeIdx,
        b: NodeIdx,
        c: NodeIdx,
        d: NodeIdx,
    ) -> Result<bool> {
        for v in [a, b, c, d] {
            if self.degree(v) != 1 {
                return Err(Error::InvariantViolation(format!(
                    "quartet member {} is not a leaf",
                    v.index()
                )));
            }
        }
        self.clear_quartet_marks();
        for v in self.find_path(a, b)? {
            self.set_quartet_mark(v);
        }
        for v in self.find_path(c, d)? {
            if self.quartet_mark(v) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

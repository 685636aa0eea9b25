//! Lazily rebuilt next-hop table answering shortest-path queries on the
//! tree.  Edge edits only flip the stale flag; the table is repaired in one
//! O(N²) sweep the next time a path is read.

use super::connected::ConnectedNodeMap;
use super::{NodeIdx, Tree};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub(crate) struct PathOracle {
    /// `next_hop[target][from]`: first step on the path `from -> target`.
    next_hop: Vec<Vec<NodeIdx>>,
    fresh: bool,
}

impl PathOracle {
    pub(crate) fn new(n: usize) -> Self {
        Self {
            next_hop: vec![vec![NodeIdx::new(0); n]; n],
            fresh: false,
        }
    }

    pub(crate) fn invalidate(&mut self) {
        self.fresh = false;
    }
}

impl Tree {
    fn freshen_paths(&mut self) -> Result<()> {
        if self.paths.fresh {
            return Ok(());
        }
        let map = ConnectedNodeMap::build(self)?;
        let n = self.node_count();
        for target in (0..n).map(NodeIdx::new) {
            for from in (0..n).map(NodeIdx::new) {
                self.paths.next_hop[target.index()][from.index()] = if from == target {
                    target
                } else {
                    map.next_hop(from, target)
                };
            }
        }
        self.paths.fresh = true;
        Ok(())
    }

    /// The node sequence from `a` to `b`, both inclusive.
    pub fn find_path(&mut self, a: NodeIdx, b: NodeIdx) -> Result<Vec<NodeIdx>> {
        self.freshen_paths()?;
        let n = self.node_count();
        let mut result = Vec::new();
        let mut cur = a;
        loop {
            result.push(cur);
            if cur == b {
                return Ok(result);
            }
            if result.len() > n {
                return Err(Error::InvariantViolation(format!(
                    "broken path from {} to {}",
                    a.index(),
                    b.index()
                )));
            }
            cur = self.paths.next_hop[b.index()][cur.index()];
        }
    }

    /// Number of nodes on the path from `a` to `b`; 1 when `a == b`.
    pub fn find_path_length(&mut self, a: NodeIdx, b: NodeIdx) -> Result<usize> {
        Ok(self.find_path(a, b)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::DistanceMatrix;

    fn caterpillar(dim: usize) -> Tree {
        Tree::new(DistanceMatrix::unit(dim).unwrap()).unwrap()
    }

    #[test]
    fn paths_are_symmetric_and_bounded() {
        let mut tree = caterpillar(6);
        let n = tree.node_count();
        for a in (0..n).map(NodeIdx::new) {
            for b in (0..n).map(NodeIdx::new) {
                let fwd = tree.find_path_length(a, b).unwrap();
                let back = tree.find_path_length(b, a).unwrap();
                assert_eq!(fwd, back);
                assert!((1..=n).contains(&fwd));
            }
        }
    }

    #[test]
    fn path_endpoints_and_adjacency() {
        let mut tree = caterpillar(5);
        let path = tree.find_path(NodeIdx::new(0), NodeIdx::new(4)).unwrap();
        assert_eq!(path.first(), Some(&NodeIdx::new(0)));
        assert_eq!(path.last(), Some(&NodeIdx::new(4)));
        for pair in path.windows(2) {
            assert!(tree.is_connected(pair[0], pair[1]));
        }
    }

    #[test]
    fn table_is_rebuilt_after_edits() {
        let mut tree = caterpillar(5);
        // warm the table, then rewire two leaves and query again
        tree.find_path(NodeIdx::new(0), NodeIdx::new(3)).unwrap();
        tree.disconnect(NodeIdx::new(0), NodeIdx::new(5)).unwrap();
        tree.disconnect(NodeIdx::new(2), NodeIdx::new(7)).unwrap();
        tree.connect(NodeIdx::new(0), NodeIdx::new(7)).unwrap();
        tree.connect(NodeIdx::new(2), NodeIdx::new(5)).unwrap();
        let path = tree.find_path(NodeIdx::new(0), NodeIdx::new(7)).unwrap();
        assert_eq!(path.len(), 2);
        assert!(tree.is_valid_tree());
    }
}

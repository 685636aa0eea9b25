//! Tree emission for external collaborators: graph-description text, a JSON
//! document, and a plain 0/1 adjacency matrix.

use serde::Serialize;

use crate::error::Result;
use crate::tree::{NodeIdx, Tree};

#[derive(Debug, Serialize)]
struct NodeRecord {
    index: usize,
    label: String,
    connections: Vec<usize>,
}

#[derive(Debug, Serialize)]
struct TreeDocument {
    nodes: Vec<NodeRecord>,
}

impl Tree {
    fn node_label(&self, i: usize) -> String {
        match self.matrix().label(i) {
            Some(label) if i < self.matrix().dim() => label.to_owned(),
            _ => format!("node {}", i),
        }
    }

    /// Graph-description rendering: nodes in ascending order, then one line
    /// per undirected edge `(i, j)` with `i <= j` in lexicographic order.
    pub fn to_dot(&self) -> String {
        let n = self.node_count();
        let mut out = String::from("graph \"untitled\" {\n");
        for i in 0..n {
            out.push_str(&format!("{} [label=\"{}\"];\n", i, self.node_label(i)));
        }
        for i in 0..n {
            for j in i..n {
                if self.is_connected(NodeIdx::new(i), NodeIdx::new(j)) {
                    out.push_str(&format!("{} -- {} [weight=\"2\"];\n", i, j));
                }
            }
        }
        out.push_str("}\n");
        out
    }

    /// JSON document with one entry per node: its index, display label, and
    /// neighbor indices in ascending order.
    pub fn to_json(&self) -> Result<String> {
        let n = self.node_count();
        let nodes = (0..n)
            .map(|i| NodeRecord {
                index: i,
                label: self.node_label(i),
                connections: (0..n)
                    .filter(|&j| self.is_connected(NodeIdx::new(i), NodeIdx::new(j)))
                    .collect(),
            })
            .collect();
        Ok(serde_json::to_string_pretty(&TreeDocument { nodes })?)
    }

    /// Symmetric 0/1 matrix over all `2N - 2` nodes, zero on the diagonal.
    pub fn adjacency_matrix(&self) -> Vec<Vec<u8>> {
        let n = self.node_count();
        (0..n)
            .map(|i| {
                (0..n)
                    .map(|j| u8::from(self.is_connected(NodeIdx::new(i), NodeIdx::new(j))))
                    .collect()
            })
            .collect()
    }
}

//! Topology-preserving random mutations.  The three simple primitives keep
//! every node at degree 1 or 3; a composite step chains a sampled number of
//! them.  All sampling goes through the caller's RNG so a mutation sequence
//! is reproducible from a seed.

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use crate::error::{Error, Result};
use crate::tree::{NodeIdx, NodeKind, Tree};

/// Upper bound (exclusive) on the composite mutation count distribution.
const MAX_MUTATION_COUNT: usize = 80;

/// Per-search mutation bookkeeping.  Owned by whoever drives the mutations;
/// nothing here is global.
#[derive(Debug, Clone, Default)]
pub struct MutationStats {
    pub total_clonings: u64,
    pub total_complex_mutations: u64,
    pub total_simple_mutations: u64,
    pub last_simple_mutations: u64,
    pub total_order_complex_mutations: u64,
    pub total_order_simple_mutations: u64,
    pub last_order_simple_mutations: u64,
}

/// Number of simple mutations a composite step should apply: `1 + M` where
/// `M` is drawn with weight `1 / ((k+4) * log2(k+4)^2)` over `k in [0, 80)`.
/// Small edits dominate but the tail permits the occasional large
/// rearrangement.
pub fn mutation_count_sample(rng: &mut impl Rng) -> Result<usize> {
    let weights: Vec<u32> = (0..MAX_MUTATION_COUNT)
        .map(|i| {
            let k = (i + 4) as f64;
            (1_000_000.0 / (k * k.log2() * k.log2())) as u32
        })
        .collect();
    let dist = WeightedIndex::new(&weights)
        .map_err(|e| Error::InvariantViolation(format!("bad mutation weights: {}", e)))?;
    Ok(dist.sample(rng) + 1)
}

/// Applies one randomly chosen simple mutation, retrying the draw when the
/// chosen primitive is unavailable at this tree size.
pub fn simple_mutation(
    tree: &mut Tree,
    rng: &mut impl Rng,
    stats: &mut MutationStats,
) -> Result<()> {
    loop {
        match rng.gen_range(0..3) {
            0 => return leaf_swap(tree, rng, stats),
            1 if can_subtree_transfer(tree) => return subtree_transfer(tree, rng, stats),
            2 if can_subtree_interchange(tree) => return subtree_interchange(tree, rng, stats),
            _ => {}
        }
    }
}

/// A composite mutation: a sampled number of simple mutations in sequence.
pub fn complex_mutation(
    tree: &mut Tree,
    rng: &mut impl Rng,
    stats: &mut MutationStats,
) -> Result<()> {
    stats.last_simple_mutations = 0;
    let total = mutation_count_sample(rng)?;
    for _ in 0..total {
        simple_mutation(tree, rng, stats)?;
    }
    stats.total_simple_mutations += stats.last_simple_mutations;
    stats.total_complex_mutations += 1;
    Ok(())
}

/// Swaps the objects carried by two distinct random columns.  Topology is
/// untouched.
pub fn leaf_swap(tree: &mut Tree, rng: &mut impl Rng, stats: &mut MutationStats) -> Result<()> {
    let dim = tree.leaf_placement().len();
    let c1 = rng.gen_range(0..dim);
    let c2 = loop {
        let c = rng.gen_range(0..dim);
        if c != c1 {
            break c;
        }
    };
    tree.swap_leaf_placement(c1, c2);
    stats.last_simple_mutations += 1;
    Ok(())
}

pub fn can_subtree_transfer(tree: &Tree) -> bool {
    tree.node_count() >= 9
}

pub fn can_subtree_interchange(tree: &Tree) -> bool {
    tree.node_count() >= 11
}

/// Splices the internal node after `k1` (with the subtree hanging behind
/// it) onto a random edge at a distant kernel `k2`.
pub fn subtree_transfer(
    tree: &mut Tree,
    rng: &mut impl Rng,
    stats: &mut MutationStats,
) -> Result<()> {
    if !can_subtree_transfer(tree) {
        return Err(Error::InvariantViolation(
            "tree too small for subtree transfer".into(),
        ));
    }
    let (k1, k2, path) = loop {
        let k1 = tree.random_node(NodeKind::Any, rng)?;
        let k2 = tree.random_node_excluding(NodeKind::Kernel, k1, rng)?;
        let path = tree.find_path(k1, k2)?;
        if path.len() > 2 {
            break (k1, k2, path);
        }
    };
    let i1 = path[1];
    tree.disconnect(k1, i1)?;
    let (m1, m2) = match *tree.neighbors(i1) {
        [m1, m2] => (m1, m2),
        _ => {
            return Err(Error::InvariantViolation(format!(
                "transfer pivot {} is not an interior node",
                i1.index()
            )))
        }
    };
    let toward_k1 = path[path.len() - 2];
    let m3 = loop {
        let candidate = tree.random_neighbor(k2, rng)?;
        if candidate != toward_k1 {
            break candidate;
        }
    };
    tree.disconnect(m1, i1)?;
    tree.disconnect(m2, i1)?;
    tree.disconnect(m3, k2)?;
    tree.connect(m1, m2)?;
    tree.connect(k2, i1)?;
    tree.connect(m3, i1)?;
    tree.connect(k1, i1)?;
    stats.last_simple_mutations += 1;
    Ok(())
}

/// Exchanges the subtrees hanging off two distant kernels by rewiring their
/// path-adjacent neighbors.  Self-inverse for a fixed kernel pair.
pub fn subtree_interchange(
    tree: &mut Tree,
    rng: &mut impl Rng,
    stats: &mut MutationStats,
) -> Result<()> {
    if !can_subtree_interchange(tree) {
        return Err(Error::InvariantViolation(
            "tree too small for subtree interchange".into(),
        ));
    }
    let (k1, k2) = loop {
        let k1 = tree.random_node(NodeKind::Kernel, rng)?;
        let k2 = tree.random_node_excluding(NodeKind::Kernel, k1, rng)?;
        if tree.find_path_length(k1, k2)? > 3 {
            break (k1, k2);
        }
    };
    interchange_between(tree, k1, k2)?;
    stats.last_simple_mutations += 1;
    Ok(())
}

/// The deterministic core of [`subtree_interchange`].
pub fn interchange_between(tree: &mut Tree, k1: NodeIdx, k2: NodeIdx) -> Result<()> {
    let path = tree.find_path(k1, k2)?;
    if path.len() <= 3 {
        return Err(Error::InvariantViolation(format!(
            "kernels {} and {} are too close to interchange",
            k1.index(),
            k2.index()
        )));
    }
    let n1 = path[1];
    let n2 = path[path.len() - 2];
    tree.disconnect(n1, k1)?;
    tree.disconnect(n2, k2)?;
    tree.connect(n1, k2)?;
    tree.connect(n2, k1)?;
    Ok(())
}

/// Flips the child order of a random kernel; only the order cost notices.
pub fn mutate_order_simple(
    tree: &mut Tree,
    rng: &mut impl Rng,
    stats: &mut MutationStats,
) -> Result<()> {
    let k = tree.random_node(NodeKind::Kernel, rng)?;
    tree.toggle_flipped(k);
    stats.last_order_simple_mutations += 1;
    Ok(())
}

/// Keeps flipping kernels until a fair coin says stop.
pub fn mutate_order_complex(
    tree: &mut Tree,
    rng: &mut impl Rng,
    stats: &mut MutationStats,
) -> Result<()> {
    stats.last_order_simple_mutations = 0;
    loop {
        mutate_order_simple(tree, rng, stats)?;
        if !rng.gen_bool(0.5) {
            break;
        }
    }
    stats.total_order_simple_mutations += stats.last_order_simple_mutations;
    stats.total_order_complex_mutations += 1;
    Ok(())
}

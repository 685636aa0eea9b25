//! A quartet-tree search engine: given an N×N symmetric distance matrix
//! over N leaf objects, find an unrooted ternary tree carrying the objects
//! on its leaves that maximizes the normalized quartet-consistency score.
//! The problem is NP-hard, so [`Search`] runs a stochastic hill climb with
//! Metropolis acceptance over topology mutations, exploring candidate
//! clones in parallel.
//!
//! The expected calling sequence is: validate a [`matrix::DistanceMatrix`],
//! build a [`Search`], take its caterpillar start tree, and call
//! [`Search::find_better_tree`] until improvements dry up.  Convergence and
//! restart policy belong to the caller.

pub mod error;
pub mod matrix;
pub mod mutate;
pub mod score;
pub mod tree;

mod fulltree;
mod output;
mod search;

pub use error::{Error, Result};
pub use fulltree::FullTree;
pub use score::{Score, Scorer};
pub use search::{Config, Search};

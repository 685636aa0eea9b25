//! The multi-try hill climb.  One `find_better_tree` call explores up to
//! `tries` independent candidates, each a clone of the incumbent pushed
//! through a fixed number of subtree swaps and moves with Metropolis
//! acceptance, and publishes the best strictly-improving candidate.

use std::sync::{Arc, Mutex};

use itertools::Itertools;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::Result;
use crate::fulltree::FullTree;
use crate::matrix::DistanceMatrix;
use crate::mutate::MutationStats;
use crate::score::{Score, Scorer, ERR_TOL};
use crate::tree::Tree;

/// Parameters that determine *how* the search explores, not what it scores.
#[derive(Debug, Clone)]
pub struct Config {
    /// Worker threads per `find_better_tree` call.  `None` uses the number
    /// of physical CPU cores.
    pub num_threads: Option<usize>,
    /// Independent candidates explored per call.
    pub tries: usize,
    /// Metropolis inverse temperature.  1.0 biases toward improvements;
    /// 0.0 degenerates into a random walk.
    pub beta: f64,
    /// Base RNG seed.  Every candidate derives its own stream from this, so
    /// a search is reproducible on a fixed thread count.
    pub seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_threads: None,
            tries: 32,
            beta: 1.0,
            seed: 0,
        }
    }
}

/// A stochastic search over the trees of one distance matrix.
pub struct Search {
    dm: Arc<DistanceMatrix>,
    scorer: Scorer,
    config: Config,
    stats: MutationStats,
    epoch: u64,
}

impl Search {
    pub fn new(dm: Arc<DistanceMatrix>, config: Config) -> Self {
        let scorer = Scorer::new(dm.clone());
        Self {
            dm,
            scorer,
            config,
            stats: MutationStats::default(),
            epoch: 0,
        }
    }

    pub fn scorer(&self) -> &Scorer {
        &self.scorer
    }

    pub fn stats(&self) -> &MutationStats {
        &self.stats
    }

    /// The deterministic caterpillar start tree.
    pub fn initial_tree(&self) -> Result<Tree> {
        Tree::new(self.dm.clone())
    }

    /// Explores `tries` candidates in parallel and returns one whose
    /// normalized score strictly beats the incumbent, or `None`.  A fatal
    /// per-candidate error discards just that candidate.
    pub fn find_better_tree(&mut self, tree: &mut Tree) -> Result<Option<Tree>> {
        let incumbent_score = self.scorer.score_tree(tree)?;
        let tries = self.config.tries.max(1);
        let num_threads = self
            .config
            .num_threads
            .unwrap_or_else(num_cpus::get_physical)
            .clamp(1, tries);
        self.epoch += 1;
        let base_seed = self
            .config
            .seed
            .wrapping_add(self.epoch.wrapping_mul(0x9e37_79b9_7f4a_7c15));
        let beta = self.config.beta;

        let incumbent = Arc::new(tree.clone());
        let best: Arc<Mutex<Option<(Tree, Score)>>> = Arc::new(Mutex::new(None));

        let handles = (0..num_threads)
            .map(|t| {
                let incumbent = incumbent.clone();
                let best = best.clone();
                let scorer = self.scorer.clone();
                std::thread::spawn(move || {
                    let mut idx = t;
                    while idx < tries {
                        let mut rng = StdRng::seed_from_u64(base_seed.wrapping_add(idx as u64));
                        match explore_candidate(&incumbent, &scorer, beta, &mut rng) {
                            Ok((cand, score)) => {
                                if score > incumbent_score {
                                    let mut slot = best.lock().unwrap();
                                    let replace = match slot.as_ref() {
                                        None => true,
                                        Some((_, published)) => score > *published,
                                    };
                                    if replace {
                                        *slot = Some((cand, score));
                                    }
                                }
                            }
                            Err(err) => log::debug!("candidate {} discarded: {}", idx, err),
                        }
                        idx += num_threads;
                    }
                })
            })
            .collect_vec();
        for handle in handles {
            handle.join().unwrap();
        }
        self.stats.total_clonings += tries as u64 + 1;

        let winner = best.lock().unwrap().take();
        match winner {
            Some((cand, score)) if score > incumbent_score => {
                log::info!(
                    "score improved from {} to {}",
                    incumbent_score.into_inner(),
                    score.into_inner()
                );
                Ok(Some(cand))
            }
            _ => Ok(None),
        }
    }
}

/// One candidate: clone the incumbent, run `node_count` mutation attempts
/// (two thirds pairwise swaps, one third subtree moves) under Metropolis
/// acceptance, and return the lowest-raw-cost snapshot seen on the way.
fn explore_candidate(
    incumbent: &Tree,
    scorer: &Scorer,
    beta: f64,
    rng: &mut impl Rng,
) -> Result<(Tree, Score)> {
    let mut full = FullTree::new(incumbent.clone())?;
    let mut snapshot = full.to_tree();
    let mut best_raw = full.raw_score();
    let attempts = full.node_count();

    for _ in 0..attempts {
        let (p1, p2) = full.random_pair(rng)?;
        let cur = full.raw_score();
        if rng.gen_range(0..3) < 2 {
            full.swap_nodes(p1, p2)?;
            if full.raw_score() <= best_raw + ERR_TOL {
                best_raw = full.raw_score();
                snapshot = full.to_tree();
            }
            let now = full.raw_score();
            if rng.gen::<f64>() >= (beta * (cur - now)).exp() {
                full.swap_nodes(p1, p2)?;
            }
        } else {
            let interior = full.next_hop(p1, p2);
            let sibling = full.find_sibling(p1, p2)?;

            // re-hang the subtree holding p1 (and its sibling) where p2 was
            full.swap_nodes(interior, p2)?;
            if full.raw_score() <= best_raw + ERR_TOL {
                best_raw = full.raw_score();
                snapshot = full.to_tree();
            }
            // then swap the sibling back out, leaving p1 next to p2
            full.swap_nodes(sibling, p2)?;
            if full.raw_score() <= best_raw + ERR_TOL {
                best_raw = full.raw_score();
                snapshot = full.to_tree();
            }
            let now = full.raw_score();
            if rng.gen::<f64>() >= (beta * (cur - now)).exp() {
                full.swap_nodes(sibling, p2)?;
                full.swap_nodes(interior, p2)?;
            }
        }
    }

    let mut best = snapshot;
    let score = scorer.score_tree(&mut best)?;
    Ok((best, score))
}

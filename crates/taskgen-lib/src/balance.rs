use crate::tree::EventTree;
use log::{debug, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Non-fatal problems fitting the trial count to the tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BalanceWarning {
    /// Fewer trials than one pass over every branch needs.
    TooFewTrials { ntrials: usize, nperms: u64 },
    /// Trials do not divide into whole passes; the remainder is dropped.
    Unbalanced { ntrials: usize, nperms: u64, passes: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    /// Full passes over the tree.
    pub n_rep_branches: u64,
    /// Branch visits in one pass, weights included.
    pub nperms: u64,
    pub warnings: Vec<BalanceWarning>,
}

impl Balance {
    pub fn total_trials(&self) -> u64 {
        self.n_rep_branches * self.nperms
    }
}

/// Nearest integer; an exact half is a coin flip.
pub fn round_half_random<R: Rng + ?Sized>(value: f64, rng: &mut R) -> u64 {
    let floor = value.floor();
    let frac = value - floor;
    let rounded = if (frac - 0.5).abs() < 1e-9 {
        if rng.gen_bool(0.5) {
            floor + 1.0
        } else {
            floor
        }
    } else {
        value.round()
    };
    rounded.max(0.0) as u64
}

/// Fit `ntrials` onto the tree's leaves.
///
/// Leaf path weights are normalised by the smallest one and rounded, so a
/// `1:2` split stays `1:2` and a catch leaf becomes the unit. Every node then
/// learns how many draws it takes per realization, and every master how many
/// samples its pool must hold.
pub fn balance<R: Rng + ?Sized>(tree: &mut EventTree, ntrials: usize, rng: &mut R) -> Balance {
    let leaves = tree.leaves().to_vec();
    let weights: Vec<f64> = leaves.iter().map(|&l| tree.leaf_weight(l)).collect();
    let smallest = weights.iter().copied().fold(f64::INFINITY, f64::min);
    let units: Vec<u64> = weights
        .iter()
        .map(|w| round_half_random(w / smallest, rng).max(1))
        .collect();
    let nperms: u64 = units.iter().sum();

    let mut warnings = Vec::new();
    let passes = ntrials as f64 / nperms as f64;
    let n_rep_branches = if passes < 1.0 {
        warn!(
            "too few trials ({}) to cover all branches ({}); using one pass",
            ntrials, nperms
        );
        warnings.push(BalanceWarning::TooFewTrials { ntrials, nperms });
        1
    } else {
        if passes.fract() != 0.0 {
            warn!(
                "design will not be balanced: {} trials / {} branch visits ({} leaves) = {:.3}",
                ntrials,
                nperms,
                leaves.len(),
                passes
            );
            warnings.push(BalanceWarning::Unbalanced {
                ntrials,
                nperms,
                passes,
            });
        }
        passes.floor() as u64
    };

    for id in 0..tree.nodes().len() {
        let node = tree.node_mut(id);
        node.units = 0;
        node.visits = 0;
        node.required_samples = 0;
    }
    for (&leaf, &unit) in leaves.iter().zip(&units) {
        tree.node_mut(leaf).units = unit;
        let path = tree.node(leaf).path.clone();
        for id in path {
            tree.node_mut(id).visits += unit * n_rep_branches;
        }
    }
    tree.recount_totals();
    for id in 1..tree.nodes().len() {
        let master = tree.node(id).master;
        let visits = tree.node(id).visits;
        tree.node_mut(master).required_samples += visits;
    }

    debug!(
        "balanced: {} passes x {} branch visits over {} leaves",
        n_rep_branches,
        nperms,
        leaves.len()
    );
    Balance {
        n_rep_branches,
        nperms,
        warnings,
    }
}

//! Description to balanced tree to realization.

use crate::balance::{balance, Balance};
use crate::description::{parse_description, Description, RunSettings};
use crate::durations::DurationPools;
use crate::error::Result;
use crate::labels::{stim_labels, StimLabels};
use crate::shuffle::{shuffle_plan, DEFAULT_MAX_SHUFFLES};
use crate::timeline::{fill_timeline, RunPlan};
use crate::tree::{build_tree, CatchWeighting, EventTree};
use crate::trials::assemble_trials;
use log::{debug, warn};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorOptions {
    pub catch_weighting: CatchWeighting,
    pub max_shuffle_iterations: usize,
    /// Seed for the coin flips that break exact-half rounding ties.
    pub balance_seed: Option<u64>,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            catch_weighting: CatchWeighting::default(),
            max_shuffle_iterations: DEFAULT_MAX_SHUFFLES,
            balance_seed: None,
        }
    }
}

/// A parsed description with its unbalanced tree.
#[derive(Debug, Clone)]
pub struct Design {
    pub text: String,
    pub description: Description,
    pub tree: EventTree,
}

impl Design {
    pub fn parse(text: &str, weighting: CatchWeighting) -> Result<Self> {
        let description = parse_description(text)?;
        let tree = build_tree(&description, weighting)?;
        Ok(Self {
            text: text.to_string(),
            description,
            tree,
        })
    }

    pub fn settings(&self) -> &RunSettings {
        &self.description.settings
    }

    pub fn balance<R: Rng + ?Sized>(mut self, rng: &mut R) -> BalancedDesign {
        let balance = balance(&mut self.tree, self.description.settings.ntrial, rng);
        BalancedDesign {
            text: self.text,
            description: self.description,
            tree: self.tree,
            balance,
        }
    }
}

/// A tree whose leaves carry repeat counts and whose masters know their pool
/// sizes. Read-only from here on; every realization works on its own pools.
#[derive(Debug, Clone)]
pub struct BalancedDesign {
    pub text: String,
    pub description: Description,
    pub tree: EventTree,
    pub balance: Balance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Realization {
    pub seed: u64,
    pub plan: RunPlan,
    pub shuffle_attempts: usize,
}

impl BalancedDesign {
    /// Parse, build and balance in one go.
    pub fn from_text(text: &str, options: &GeneratorOptions) -> Result<Self> {
        let mut rng = match options.balance_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Design::parse(text, options.catch_weighting)?.balance(&mut rng))
    }

    pub fn settings(&self) -> &RunSettings {
        &self.description.settings
    }

    /// Draw durations, assemble trials in leaf order and pad with fillers.
    pub fn assemble<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<RunPlan> {
        let mut pools = DurationPools::generate(&self.tree, rng)?;
        let min_iti = self.settings().min_iti;
        let trials = assemble_trials(&self.tree, &self.balance, &mut pools, min_iti);
        for &master in self.tree.masters() {
            let left = pools.remaining(master);
            if left > 0 {
                warn!("{}: {} durations left unused", self.tree.node(master).name, left);
            }
        }
        fill_timeline(trials, self.settings())
    }

    /// One reproducible realization: pools and shuffle both derive from `seed`.
    pub fn realize(&self, seed: u64, max_shuffles: usize) -> Result<Realization> {
        let mut rng = StdRng::seed_from_u64(seed);
        let plan = self.assemble(&mut rng)?;
        let shuffled = shuffle_plan(&plan, self.settings(), Some(seed), max_shuffles)?;
        debug!("seed {}: accepted after {} shuffles", seed, shuffled.attempts);
        Ok(Realization {
            seed,
            plan: shuffled.plan,
            shuffle_attempts: shuffled.attempts,
        })
    }

    pub fn labels(&self) -> StimLabels {
        stim_labels(&self.tree, &self.settings().glts)
    }
}

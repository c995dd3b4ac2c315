//! Seeded rejection shuffle keeping every inter-trial gap under the maximum.

use crate::description::RunSettings;
use crate::error::{Result, TaskTimeError};
use crate::timeline::RunPlan;
use crate::trials::Trial;
use log::{info, warn};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_SHUFFLES: usize = 5000;
/// Seeds are drawn below this bound so they print as 18 digits at most.
pub const SEED_BOUND: u64 = 1_000_000_000_000_000_000;
const WARN_EVERY: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shuffled {
    pub plan: RunPlan,
    pub seed: u64,
    pub attempts: usize,
}

/// Draw a fresh seed from the thread RNG.
pub fn random_seed() -> u64 {
    rand::thread_rng().gen_range(0..SEED_BOUND)
}

/// Summed filler time between real trials, plus any trailing stretch.
pub fn gap_list(trials: &[Trial]) -> Vec<f64> {
    let mut gaps = Vec::new();
    let mut gap = 0.0;
    for trial in trials {
        if !trial.is_filler() && gap > 0.0 {
            gaps.push(gap);
            gap = 0.0;
        }
        gap += trial
            .events
            .iter()
            .filter(|e| e.is_filler())
            .map(|e| e.duration)
            .sum::<f64>();
    }
    if gap > 0.0 {
        gaps.push(gap);
    }
    gaps
}

fn largest_gap(trials: &[Trial]) -> f64 {
    gap_list(trials).into_iter().fold(0.0, f64::max)
}

/// Shuffle `plan` until its largest gap is within `settings.max_iti`.
///
/// Every permutation counts toward `max_iterations`, including those rejected
/// only for opening with filler under `iti_never_first`.
///
/// The same seed on the same plan always gives the same answer, including the
/// same failure.
pub fn shuffle_plan(
    plan: &RunPlan,
    settings: &RunSettings,
    seed: Option<u64>,
    max_iterations: usize,
) -> Result<Shuffled> {
    let seed = match seed {
        Some(seed) => seed,
        None => {
            let seed = random_seed();
            info!("shuffling with seed {}", seed);
            seed
        }
    };
    let mut rng = StdRng::seed_from_u64(seed);
    let mut trials = plan.trials.clone();
    let max_iti = settings.max_iti_or_inf();
    let never_filler_first =
        settings.iti_never_first && trials.iter().any(|t| !t.is_filler());

    let mut attempts = 0;
    loop {
        trials.shuffle(&mut rng);
        attempts += 1;
        let filler_first = never_filler_first && trials.first().map_or(false, Trial::is_filler);
        if !filler_first && largest_gap(&trials) <= max_iti + 1e-9 {
            return Ok(Shuffled {
                plan: RunPlan { trials },
                seed,
                attempts,
            });
        }
        if attempts % WARN_EVERY == 0 {
            warn!(
                "shuffle with seed {} has gone {} iterations without matching max iti {}",
                seed, attempts, max_iti
            );
        }
        if attempts >= max_iterations {
            return Err(TaskTimeError::ShuffleExhausted { seed, attempts });
        }
    }
}

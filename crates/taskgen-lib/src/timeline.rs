use crate::description::RunSettings;
use crate::error::{Result, TaskTimeError};
use crate::trials::Trial;
use log::{debug, info};
use serde::{Deserialize, Serialize};

/// Real trials plus the filler pseudo-trials that pad them out to the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunPlan {
    pub trials: Vec<Trial>,
}

impl RunPlan {
    pub fn total_duration(&self) -> f64 {
        self.trials.iter().map(Trial::duration).sum()
    }

    pub fn trial_count(&self) -> usize {
        self.trials.iter().filter(|t| !t.is_filler()).count()
    }

    pub fn filler_count(&self) -> usize {
        self.trials.iter().filter(|t| t.is_filler()).count()
    }
}

/// Check the trials fit the run and append `granularity`-sized fillers for
/// the time left over.
pub fn fill_timeline(trials: Vec<Trial>, settings: &RunSettings) -> Result<RunPlan> {
    let task: f64 = trials.iter().map(Trial::duration).sum();
    let available = settings.available_duration();
    if task > available + 1e-9 {
        return Err(TaskTimeError::TimeBudgetExceeded { task, available });
    }

    let leftover = available - task;
    let ntrials = trials.len().max(1);
    if let Some(max_iti) = settings.max_iti {
        let remaining = leftover - settings.min_iti * ntrials as f64;
        let required_avg = remaining / ntrials as f64;
        if required_avg > max_iti + 1e-9 {
            return Err(TaskTimeError::GapBudgetExceeded {
                required_avg,
                max_iti,
                ntrials,
            });
        }
    }

    let nfill = (leftover / settings.granularity + 1e-9).floor() as usize;
    info!(
        "task takes {:.2}s of {:.2}s; adding {} fillers of {}s",
        task, available, nfill, settings.granularity
    );
    let mut trials = trials;
    trials.extend((0..nfill).map(|_| Trial::filler(settings.granularity)));
    let plan = RunPlan { trials };
    debug!(
        "plan: {} trials, {} fillers, {:.3}s",
        plan.trial_count(),
        plan.filler_count(),
        plan.total_duration()
    );
    Ok(plan)
}

use thiserror::Error;

/// Failures that stop a description from becoming a run plan.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskTimeError {
    #[error("syntax error near '{fragment}': {message}")]
    Syntax { message: String, fragment: String },
    #[error("malformed description: {0}")]
    MalformedDescription(String),
    #[error("{values} values but {counts} repeat counts")]
    LengthMismatch { values: usize, counts: usize },
    #[error("total event time ({task:.2}s) does not fit in available run time ({available:.2}s)")]
    TimeBudgetExceeded { task: f64, available: f64 },
    #[error(
        "filling the run needs an average gap of {required_avg:.2}s over {ntrials} trials, \
         more than the maximum iti ({max_iti:.2}s)"
    )]
    GapBudgetExceeded {
        required_avg: f64,
        max_iti: f64,
        ntrials: usize,
    },
    #[error("no ordering within the maximum iti after {attempts} shuffles (seed {seed})")]
    ShuffleExhausted { seed: u64, attempts: usize },
}

impl TaskTimeError {
    /// Budget and grammar errors abort the whole run; shuffle exhaustion only
    /// loses the realization it happened in.
    pub fn is_realization_local(&self) -> bool {
        matches!(self, TaskTimeError::ShuffleExhausted { .. })
    }
}

pub type Result<T> = std::result::Result<T, TaskTimeError>;

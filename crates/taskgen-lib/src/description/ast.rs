use serde::{Deserialize, Serialize};

/// A parsed task description: run header plus the independent event chains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Description {
    pub settings: RunSettings,
    /// `|`-separated groups; each group is a `;`-chained list of events.
    pub groups: Vec<EventChain>,
}

pub type EventChain = Vec<EventSpec>;

/// Constraints from the `<rundur/ntrial ...>` header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSettings {
    pub rundur: f64,
    pub ntrial: usize,
    pub tr: Option<f64>,
    pub start_pad: f64,
    pub stop_pad: f64,
    pub min_iti: f64,
    pub max_iti: Option<f64>,
    pub mean_iti: Option<f64>,
    pub iti_never_first: bool,
    pub granularity: f64,
    pub glts: Vec<Glt>,
}

impl RunSettings {
    pub fn new(rundur: f64, ntrial: usize) -> Self {
        Self {
            rundur,
            ntrial,
            tr: None,
            start_pad: 0.0,
            stop_pad: 0.0,
            min_iti: 0.0,
            max_iti: None,
            mean_iti: None,
            iti_never_first: false,
            granularity: 0.01,
            glts: Vec::new(),
        }
    }

    /// Run time left once start and stop padding are removed.
    pub fn available_duration(&self) -> f64 {
        self.rundur - self.start_pad - self.stop_pad
    }

    pub fn max_iti_or_inf(&self) -> f64 {
        self.max_iti.unwrap_or(f64::INFINITY)
    }
}

/// General linear test passed through to the modelling tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Glt {
    pub name: String,
    pub formula: String,
}

/// `name=duration(branches){catch}@model~`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSpec {
    pub name: String,
    pub duration: Option<DurationSpec>,
    pub branches: Option<BranchSpec>,
    pub catch_ratio: Option<f64>,
    pub model: Option<String>,
    pub flags: IgnoreFlags,
}

impl EventSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            duration: None,
            branches: None,
            catch_ratio: None,
            model: None,
            flags: IgnoreFlags::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Distribution {
    Uniform,
    Exponential,
    Geometric,
}

impl Distribution {
    /// Exponential and geometric both draw halving weights.
    pub fn is_geometric(self) -> bool {
        matches!(self, Distribution::Exponential | Distribution::Geometric)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DurationSpec {
    Fixed(f64),
    Range {
        min: f64,
        max: f64,
        step: Option<f64>,
        dist: Option<Distribution>,
    },
    Steps {
        steps: Vec<Step>,
        dist: Option<Distribution>,
    },
}

impl DurationSpec {
    /// A zero-duration spec marks a pure label node.
    pub fn is_zero(&self) -> bool {
        match self {
            DurationSpec::Fixed(v) => *v == 0.0,
            DurationSpec::Range { min, max, .. } => *min == 0.0 && *max == 0.0,
            DurationSpec::Steps { steps, .. } => steps.iter().all(|s| s.value == 0.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub value: f64,
    pub freq: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BranchSpec {
    /// `2x A, B`: one sibling per option under every open parent.
    Alternatives {
        options: Vec<Alternative>,
        flags: IgnoreFlags,
    },
    /// `(A, B) * (C, D)`: each factor fans out the frontier again.
    CrossProduct(Vec<BranchSpec>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    pub freq: Option<f64>,
    pub target: AltTarget,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AltTarget {
    Label(String),
    Event(Box<EventSpec>),
}

impl AltTarget {
    pub fn name(&self) -> &str {
        match self {
            AltTarget::Label(name) => name,
            AltTarget::Event(event) => &event.name,
        }
    }
}

/// `~` drops a name from compound event names, `&` keeps it out of the model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoreFlags {
    pub timing: bool,
    pub model: bool,
}

impl IgnoreFlags {
    pub fn merge(self, other: IgnoreFlags) -> IgnoreFlags {
        IgnoreFlags {
            timing: self.timing || other.timing,
            model: self.model || other.model,
        }
    }
}

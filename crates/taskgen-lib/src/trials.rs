use crate::balance::Balance;
use crate::durations::DurationPools;
use crate::tree::{EventTree, NodeId};
use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubEventKind {
    Event,
    Filler,
}

/// One timed piece of a trial: a compound event or a stretch of filler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubEvent {
    /// Compound name like `cue_A`; `None` for filler.
    pub name: Option<String>,
    pub duration: f64,
    pub kind: SubEventKind,
    /// False when every name in the compound was `~`-flagged.
    pub timing_file: bool,
}

impl SubEvent {
    pub fn filler(duration: f64) -> Self {
        Self {
            name: None,
            duration,
            kind: SubEventKind::Filler,
            timing_file: false,
        }
    }

    pub fn is_filler(&self) -> bool {
        self.kind == SubEventKind::Filler
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub events: Vec<SubEvent>,
}

impl Trial {
    /// A filler-only pseudo-trial used to pad the run.
    pub fn filler(duration: f64) -> Self {
        Self {
            events: vec![SubEvent::filler(duration)],
        }
    }

    pub fn duration(&self) -> f64 {
        self.events.iter().map(|e| e.duration).sum()
    }

    pub fn is_filler(&self) -> bool {
        self.events.first().map_or(true, SubEvent::is_filler)
    }

    /// Names of the event sub-events in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.events.iter().filter_map(|e| e.name.as_deref())
    }
}

#[derive(Default)]
struct Compound {
    shown: Vec<String>,
    all: Vec<String>,
    duration: f64,
}

impl Compound {
    fn finish(self) -> SubEvent {
        let timing_file = !self.shown.is_empty();
        let names = if timing_file { self.shown } else { self.all };
        SubEvent {
            name: Some(names.join("_")),
            duration: self.duration,
            kind: SubEventKind::Event,
            timing_file,
        }
    }
}

/// Walk every endpoint `units * n_rep_branches` times, drawing durations from
/// the pools. Zero-duration labels fold into the compound opened by the
/// preceding timed event.
pub fn assemble_trials(
    tree: &EventTree,
    balance: &Balance,
    pools: &mut DurationPools,
    min_iti: f64,
) -> Vec<Trial> {
    let mut trials = Vec::with_capacity(balance.total_trials() as usize);
    for &leaf in tree.leaves() {
        let repeats = tree.node(leaf).units * balance.n_rep_branches;
        for _ in 0..repeats {
            let mut trial = assemble_one(tree, &tree.node(leaf).path, pools);
            if min_iti > 0.0 {
                trial.events.push(SubEvent::filler(min_iti));
            }
            trials.push(trial);
        }
    }
    debug!("assembled {} trials", trials.len());
    trials
}

fn assemble_one(tree: &EventTree, path: &[NodeId], pools: &mut DurationPools) -> Trial {
    let mut events = Vec::new();
    let mut open: Option<Compound> = None;
    for &id in path {
        let node = tree.node(id);
        if !tree.master_of(id).is_label() {
            if let Some(compound) = open.take() {
                events.push(compound.finish());
            }
        }
        let compound = open.get_or_insert_with(Compound::default);
        if !node.is_catch() {
            compound.all.push(node.name.clone());
            if !node.flags.timing {
                compound.shown.push(node.name.clone());
            }
        }
        compound.duration += pools.next_dur(node.master);
    }
    if let Some(compound) = open {
        events.push(compound.finish());
    }
    Trial { events }
}

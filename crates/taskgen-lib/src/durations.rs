//! Pre-drawn duration pools, one per master node.

use crate::description::{Distribution, DurationSpec};
use crate::error::Result;
use crate::math::{fit_dist, list_to_length_n, rep_a_b_times, zeno_dichotomy};
use crate::tree::{EventTree, NodeId};
use log::{debug, warn};
use rand::{seq::SliceRandom, Rng};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct DurationPools {
    pools: HashMap<NodeId, Vec<f64>>,
    names: HashMap<NodeId, String>,
    never_instantiated: Vec<String>,
}

impl DurationPools {
    /// Draw every master's `required_samples` durations up front.
    pub fn generate<R: Rng + ?Sized>(tree: &EventTree, rng: &mut R) -> Result<Self> {
        let mut pools = DurationPools::default();
        for &master in tree.masters() {
            let node = tree.node(master);
            let nsamples = node.required_samples as usize;
            if nsamples == 0 {
                warn!("event {} is never included (no durations)", node.name);
                pools.never_instantiated.push(node.name.clone());
            }
            let values = sample_durations(&node.duration, nsamples, &node.name, rng)?;
            debug!("{}: {} durations for {:?}", node.name, values.len(), node.duration);
            pools.names.insert(master, node.name.clone());
            pools.pools.insert(master, values);
        }
        Ok(pools)
    }

    /// Pop the next duration for `master`; an exhausted pool yields zero.
    pub fn next_dur(&mut self, master: NodeId) -> f64 {
        match self.pools.get_mut(&master).and_then(|pool| pool.pop()) {
            Some(value) => value,
            None => {
                let name = self.names.get(&master).map(String::as_str).unwrap_or("?");
                warn!("{}: no more durations to pick from, giving 0", name);
                0.0
            }
        }
    }

    pub fn remaining(&self, master: NodeId) -> usize {
        self.pools.get(&master).map_or(0, Vec::len)
    }

    /// Names whose pools were sized to zero.
    pub fn never_instantiated(&self) -> &[String] {
        &self.never_instantiated
    }
}

/// Exactly `nsamples` shuffled durations for one spec.
pub fn sample_durations<R: Rng + ?Sized>(
    spec: &DurationSpec,
    nsamples: usize,
    context: &str,
    rng: &mut R,
) -> Result<Vec<f64>> {
    let mut values = match spec {
        DurationSpec::Fixed(value) => vec![*value; nsamples],
        DurationSpec::Range {
            min,
            max,
            step,
            dist,
        } => {
            let geometric = dist.map_or(false, Distribution::is_geometric);
            let values = if geometric {
                let candidates = linspace(*min, *max, zeno_dichotomy(nsamples as u64).len());
                weighted(&candidates, None, nsamples, true, context, rng)?
            } else {
                linspace(*min, *max, nsamples)
            };
            match step {
                Some(step) => values
                    .into_iter()
                    .map(|v| snap(v, *min, *max, *step))
                    .collect(),
                None => values,
            }
        }
        DurationSpec::Steps { steps, dist } => {
            let values: Vec<f64> = steps.iter().map(|s| s.value).collect();
            let freqs: Vec<u64> = steps.iter().map(|s| s.freq.unwrap_or(1) as u64).collect();
            let geometric = dist.map_or(false, Distribution::is_geometric);
            weighted(&values, Some(freqs), nsamples, geometric, context, rng)?
        }
    };
    values.shuffle(rng);
    values.truncate(nsamples);
    Ok(values)
}

/// Replicate `values` by their frequencies (or by halving weights) and stretch
/// the result to `nsamples`.
fn weighted<R: Rng + ?Sized>(
    values: &[f64],
    freqs: Option<Vec<u64>>,
    nsamples: usize,
    geometric: bool,
    context: &str,
    rng: &mut R,
) -> Result<Vec<f64>> {
    let freqs = if geometric {
        if freqs.as_ref().map_or(false, |f| f.iter().any(|&x| x != 1)) {
            warn!(
                "{}: distribution requested alongside step frequencies; ignoring frequencies",
                context
            );
        }
        fit_dist(values.len(), &zeno_dichotomy(nsamples as u64), nsamples as u64)
    } else {
        freqs.unwrap_or_else(|| vec![1; values.len()])
    };
    let repeated = rep_a_b_times(values, &freqs)?;
    Ok(list_to_length_n(&repeated, nsamples, context, rng))
}

/// `n` evenly spaced points over `[min, max]`, both ends included.
fn linspace(min: f64, max: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![min],
        _ => {
            let interval = (max - min) / (n - 1) as f64;
            (0..n).map(|i| min + i as f64 * interval).collect()
        }
    }
}

fn snap(value: f64, min: f64, max: f64, step: f64) -> f64 {
    let snapped = min + ((value - min) / step).round() * step;
    snapped.clamp(min, max)
}

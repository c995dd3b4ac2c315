//! Integer bookkeeping for duration distributions.

use crate::error::{Result, TaskTimeError};
use log::{debug, warn};
use rand::{seq::SliceRandom, Rng};

/// Reshape `weights` into exactly `nelm` positive counts summing to `total`.
///
/// Surplus trailing weights are folded into their smaller neighbours, missing
/// slots are carved out of the largest weight, and the sum is then walked up
/// or down one unit at a time. The geometric shape survives only roughly.
pub fn fit_dist(nelm: usize, weights: &[u64], total: u64) -> Vec<u64> {
    if nelm == 0 {
        return Vec::new();
    }
    let mut freq: Vec<u64> = weights.iter().map(|&w| w.max(1)).collect();
    if freq.is_empty() {
        freq.push(1);
    }
    if (nelm as u64) > total {
        warn!(
            "fitting {} elements into {} samples; every element stays at 1",
            nelm, total
        );
    }

    while freq.len() > nelm {
        let last = freq.pop().unwrap_or(0);
        let mut idx = freq.len() - 1;
        while idx > 0 && freq[idx] >= freq[idx - 1] {
            idx -= 1;
        }
        freq[idx] += last;
    }

    while freq.len() < nelm {
        let mut largest = 0;
        for (i, &f) in freq.iter().enumerate() {
            if f > freq[largest] {
                largest = i;
            }
        }
        if freq[largest] > 1 {
            freq[largest] -= 1;
        }
        freq.push(1);
    }

    let mut sum: u64 = freq.iter().sum();
    let mut i = 0;
    while sum > total && freq.iter().any(|&f| f > 1) {
        if freq[i] > 1 {
            freq[i] -= 1;
            sum -= 1;
        }
        i = (i + 1) % freq.len();
    }
    while sum < total {
        freq[i] += 1;
        sum += 1;
        i = (i + 1) % freq.len();
    }
    freq
}

/// Halve `n` until reaching one: `8 -> [4, 2, 1, 1]`.
pub fn zeno_dichotomy(n: u64) -> Vec<u64> {
    let mut out = Vec::new();
    let mut n = n;
    while n > 1 {
        n /= 2;
        out.push(n);
    }
    out.push(1);
    out
}

/// Repeat `values[i]` `counts[i]` times.
pub fn rep_a_b_times<T: Clone>(values: &[T], counts: &[u64]) -> Result<Vec<T>> {
    if values.len() != counts.len() {
        return Err(TaskTimeError::LengthMismatch {
            values: values.len(),
            counts: counts.len(),
        });
    }
    let mut out = Vec::with_capacity(counts.iter().sum::<u64>() as usize);
    for (value, &count) in values.iter().zip(counts) {
        out.extend(std::iter::repeat(value.clone()).take(count as usize));
    }
    Ok(out)
}

/// Stretch or cut `values` to exactly `n` elements: whole copies first, then a
/// shuffled partial copy for the remainder.
pub fn list_to_length_n<T: Clone, R: Rng + ?Sized>(
    values: &[T],
    n: usize,
    context: &str,
    rng: &mut R,
) -> Vec<T> {
    if values.is_empty() {
        if n > 0 {
            warn!("{}: no values to spread over {} samples", context, n);
        }
        return Vec::new();
    }
    let times_more = n / values.len();
    let add_more = n % values.len();
    let mut out = Vec::with_capacity(n);
    for _ in 0..times_more {
        out.extend_from_slice(values);
    }
    if add_more != 0 {
        warn!(
            "{}: {} durations do not divide {} events evenly; picking {} at random",
            context,
            values.len(),
            n,
            add_more
        );
        let mut partial = values.to_vec();
        partial.shuffle(rng);
        out.extend(partial.into_iter().take(add_more));
    }
    debug!("{}: {} values stretched to {}", context, values.len(), out.len());
    out
}

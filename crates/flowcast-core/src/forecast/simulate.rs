//! Monte Carlo path simulation
//!
//! Walks `simulations` independent balance paths day by day over the
//! horizon. Paths are statistically independent, so they fan out across a
//! rayon parallel iterator, each owning its own seeded random stream, and
//! merge only at percentile aggregation.

use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::models::ValidatedRecurrence;
use crate::stats;

use super::residual::ResidualSampler;
use super::schedule::ScheduledOccurrence;
use super::CancelToken;

/// Everything one simulation run needs, assembled by the projector.
pub struct SimulationInput<'a> {
    pub start_balance: f64,
    pub horizon_days: u32,
    pub horizon_weeks: u32,
    pub simulations: u32,
    pub recurrences: &'a [ValidatedRecurrence],
    pub schedule: &'a [ScheduledOccurrence],
    pub residual: &'a ResidualSampler,
    /// Base seed for reproducible runs; `None` draws one from the thread RNG
    pub seed: Option<u64>,
}

/// Aggregated simulation outcome: one value per weekly checkpoint (the
/// "today" anchor is prepended by the projector).
pub struct SimulationOutcome {
    pub p10: Vec<f64>,
    pub p50: Vec<f64>,
    pub p90: Vec<f64>,
    /// Fraction of paths whose balance ever went below zero
    pub negative_risk: f64,
}

struct PathOutcome {
    checkpoints: Vec<f64>,
    went_negative: bool,
}

/// Run all paths and aggregate percentile bands.
pub fn run(input: &SimulationInput<'_>, cancel: &CancelToken) -> Result<SimulationOutcome> {
    let base_seed = input.seed.unwrap_or_else(|| rand::thread_rng().gen());
    let checkpoints = checkpoint_days(input.horizon_days, input.horizon_weeks);

    let paths: Vec<Option<PathOutcome>> = (0..input.simulations as u64)
        .into_par_iter()
        .map(|path_index| {
            if cancel.is_cancelled() {
                return None;
            }
            let mut rng = StdRng::seed_from_u64(derive_path_seed(base_seed, path_index));
            Some(simulate_path(input, &checkpoints, &mut rng))
        })
        .collect();

    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let paths: Vec<PathOutcome> = paths.into_iter().flatten().collect();
    if paths.is_empty() {
        return Err(Error::InvalidParameter(
            "simulation count must be at least 1".to_string(),
        ));
    }
    let total = paths.len() as f64;

    let mut p10 = Vec::with_capacity(checkpoints.len());
    let mut p50 = Vec::with_capacity(checkpoints.len());
    let mut p90 = Vec::with_capacity(checkpoints.len());
    for (i, _) in checkpoints.iter().enumerate() {
        let values: Vec<f64> = paths.iter().map(|p| p.checkpoints[i]).collect();
        p10.push(stats::percentile(&values, 0.10));
        p50.push(stats::percentile(&values, 0.50));
        p90.push(stats::percentile(&values, 0.90));
    }

    let negative_risk = paths.iter().filter(|p| p.went_negative).count() as f64 / total;

    Ok(SimulationOutcome {
        p10,
        p50,
        p90,
        negative_risk,
    })
}

/// Evenly spaced weekly checkpoint day indices (1-based offsets from today).
fn checkpoint_days(horizon_days: u32, horizon_weeks: u32) -> Vec<u32> {
    let step = (horizon_days / horizon_weeks).max(1);
    (1..=horizon_weeks)
        .map(|w| (w * step).min(horizon_days))
        .collect()
}

fn simulate_path(
    input: &SimulationInput<'_>,
    checkpoints: &[u32],
    rng: &mut StdRng,
) -> PathOutcome {
    // Resolve this path's scheduled flows first: jitter shift, occurrence
    // coin flip, and amount draw are all per-path randomness.
    let mut day_net = vec![0.0; input.horizon_days as usize + 1];
    for occurrence in input.schedule {
        let recurrence = &input.recurrences[occurrence.recurrence_index];

        let mut day = occurrence.day_offset as i64;
        if recurrence.jitter_days > 0 {
            let jitter = recurrence.jitter_days as i64;
            day += rng.gen_range(-jitter..=jitter);
        }
        if day < 1 || day > input.horizon_days as i64 {
            continue;
        }

        if rng.gen::<f64>() < recurrence.occurrence_probability {
            day_net[day as usize] += sample_recurring_amount(recurrence, rng);
        }
    }

    let mut balance = input.start_balance;
    let mut went_negative = balance < 0.0;
    let mut checkpoint_values = Vec::with_capacity(checkpoints.len());
    let mut next_checkpoint = 0;

    for day in 1..=input.horizon_days {
        balance += day_net[day as usize];
        balance += input.residual.sample(rng);
        if balance < 0.0 {
            went_negative = true;
        }
        if next_checkpoint < checkpoints.len() && checkpoints[next_checkpoint] == day {
            checkpoint_values.push(balance);
            next_checkpoint += 1;
        }
    }

    PathOutcome {
        checkpoints: checkpoint_values,
        went_negative,
    }
}

/// Draw one signed amount for a firing recurrence: Normal(mean, stddev)
/// clipped to the observed bounds when variance is known, uniform in the
/// bounds when only they are, the flat mean otherwise.
fn sample_recurring_amount(recurrence: &ValidatedRecurrence, rng: &mut StdRng) -> f64 {
    let mean = recurrence.amount_mean;
    let value = match recurrence.amount_stddev {
        Some(sd) if sd > 0.0 => {
            let mut v = mean + standard_normal(rng) * sd;
            if let Some(min) = recurrence.amount_min {
                v = v.max(min);
            }
            if let Some(max) = recurrence.amount_max {
                v = v.min(max);
            }
            v
        }
        _ => match (recurrence.amount_min, recurrence.amount_max) {
            (Some(min), Some(max)) if max > min => rng.gen_range(min..=max),
            _ => mean,
        },
    };

    recurrence.kind.signed(value)
}

/// Standard normal draw via Box-Muller.
fn standard_normal<R: Rng>(rng: &mut R) -> f64 {
    let mut u = 0.0;
    while u <= 0.0 {
        u = rng.gen::<f64>();
    }
    let v: f64 = rng.gen();
    (-2.0 * u.ln()).sqrt() * (2.0 * PI * v).cos()
}

/// Mix the base seed with the path index (splitmix-style finalizer) so each
/// path owns an independent stream without contending on a shared generator.
fn derive_path_seed(base_seed: u64, path_index: u64) -> u64 {
    let mut mixed = base_seed ^ path_index.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    mixed ^= mixed >> 30;
    mixed = mixed.wrapping_mul(0xBF58_476D_1CE4_E5B9);
    mixed ^= mixed >> 27;
    mixed = mixed.wrapping_mul(0x94D0_49BB_1331_11EB);
    mixed ^= mixed >> 31;
    mixed
}

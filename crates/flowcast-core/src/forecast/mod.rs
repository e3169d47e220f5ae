//! Cash-flow projection
//!
//! Simulates the probable evolution of account balance over a horizon by
//! combining deterministic recurring flows (scheduled from validated
//! recurrences) with a bootstrap-resampled residual noise model, and
//! aggregates the simulated paths into 10th/50th/90th percentile bands.
//!
//! Stateless and repeatable: all data is read up front through the store
//! contracts, then the simulation itself is pure CPU work.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::models::{ProjectionMetrics, ProjectionResult, RiskLevel, UserId};
use crate::store::{BalanceSnapshots, MappingStore, RecurrenceStore, TransactionStore};

mod residual;
mod schedule;
mod simulate;

pub use residual::{ResidualMode, ResidualSampler};
pub use schedule::{build_schedule, occurrence_dates, ScheduledOccurrence};

/// Cooperative cancellation flag shared with a long projection.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Tunable projection inputs.
#[derive(Debug, Clone)]
pub struct ProjectionParams {
    pub horizon_weeks: u32,
    pub simulations: u32,
    /// Caller-supplied starting balance; overrides snapshots and history
    pub start_balance: Option<f64>,
    pub residual_mode: ResidualMode,
    /// Base seed for reproducible runs
    pub seed: Option<u64>,
}

impl Default for ProjectionParams {
    fn default() -> Self {
        Self {
            horizon_weeks: 12,
            simulations: 1000,
            start_balance: None,
            residual_mode: ResidualMode::Historical,
            seed: None,
        }
    }
}

/// Projector configuration
#[derive(Debug, Clone)]
pub struct ProjectorConfig {
    /// Transaction history window feeding the residual model
    pub lookback_days: u32,
    /// Stability ceiling for the residual daily standard deviation
    pub residual_daily_sd_cap: f64,
    /// Statistical floor: smaller simulation counts are raised to this
    pub min_simulations: u32,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            lookback_days: 365,
            residual_daily_sd_cap: 50.0,
            min_simulations: 100,
        }
    }
}

/// Projects future balance distributions for one user at a time.
pub struct CashflowProjector<'a, S>
where
    S: TransactionStore + RecurrenceStore + MappingStore + BalanceSnapshots,
{
    store: &'a S,
    config: ProjectorConfig,
}

impl<'a, S> CashflowProjector<'a, S>
where
    S: TransactionStore + RecurrenceStore + MappingStore + BalanceSnapshots,
{
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            config: ProjectorConfig::default(),
        }
    }

    pub fn with_config(store: &'a S, config: ProjectorConfig) -> Self {
        Self { store, config }
    }

    /// Project from today's snapshot of the user's data.
    pub fn project(&self, user_id: UserId, params: &ProjectionParams) -> Result<ProjectionResult> {
        self.project_as_of(user_id, params, Utc::now().date_naive(), &CancelToken::new())
    }

    /// Project from an explicit snapshot date with a cancellation token.
    ///
    /// The date parameter makes runs reproducible; the token lets a caller
    /// abort arbitrarily large `simulations x horizon` workloads.
    pub fn project_as_of(
        &self,
        user_id: UserId,
        params: &ProjectionParams,
        today: NaiveDate,
        cancel: &CancelToken,
    ) -> Result<ProjectionResult> {
        if params.horizon_weeks < 1 {
            return Err(Error::InvalidParameter(
                "horizon must be at least 1 week".to_string(),
            ));
        }
        if params.simulations < 1 {
            return Err(Error::InvalidParameter(
                "simulation count must be at least 1".to_string(),
            ));
        }
        let simulations = params.simulations.max(self.config.min_simulations);
        let horizon_days = params.horizon_weeks * 7;

        // Everything is fetched before simulation begins; no I/O inside
        let since = today - Duration::days(self.config.lookback_days as i64 - 1);
        let transactions = self.store.list_for_user(user_id, Some(since))?;
        let recurrences = self.store.list_active(user_id)?;
        let mapped = self.store.mapped_transaction_ids(user_id)?;

        let start_balance = match params.start_balance {
            Some(balance) => balance,
            None => match self.store.latest(user_id)? {
                Some(balance) => balance,
                None => {
                    if transactions.is_empty() {
                        return Err(Error::InsufficientData(
                            "no transaction history and no starting balance".to_string(),
                        ));
                    }
                    transactions.iter().map(|t| t.signed_amount()).sum()
                }
            },
        };

        let residual_transactions: Vec<_> = transactions
            .iter()
            .filter(|t| !mapped.contains(&t.id))
            .cloned()
            .collect();

        debug!(
            transactions = transactions.len(),
            recurrences = recurrences.len(),
            residual = residual_transactions.len(),
            "Projection inputs assembled"
        );

        let residual = ResidualSampler::from_transactions(
            &residual_transactions,
            today,
            self.config.lookback_days,
            self.config.residual_daily_sd_cap,
            params.residual_mode,
        );
        let schedule = build_schedule(&recurrences, today, horizon_days);

        let outcome = simulate::run(
            &simulate::SimulationInput {
                start_balance,
                horizon_days,
                horizon_weeks: params.horizon_weeks,
                simulations,
                recurrences: &recurrences,
                schedule: &schedule,
                residual: &residual,
                seed: params.seed,
            },
            cancel,
        )?;

        // The zero-th point is always the starting balance itself
        let mut labels = Vec::with_capacity(params.horizon_weeks as usize + 1);
        labels.push("W0".to_string());
        for week in 1..=params.horizon_weeks {
            labels.push(format!("W{}", week));
        }

        let mut p10 = vec![start_balance];
        let mut p50 = vec![start_balance];
        let mut p90 = vec![start_balance];
        p10.extend(outcome.p10);
        p50.extend(outcome.p50);
        p90.extend(outcome.p90);

        let negative_risk_percent = round2(outcome.negative_risk * 100.0);
        let metrics = ProjectionMetrics {
            current_balance: round2(start_balance),
            median_final_balance: round2(*p50.last().unwrap_or(&start_balance)),
            negative_risk_percent,
            risk: RiskLevel::from_percent(negative_risk_percent),
        };

        info!(
            user_id,
            simulations,
            horizon_days,
            negative_risk_percent,
            "Projection complete"
        );

        Ok(ProjectionResult {
            labels,
            p10,
            p50,
            p90,
            metrics,
        })
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

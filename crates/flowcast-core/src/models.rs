//! Domain models for Flowcast

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type TransactionId = i64;
pub type RecurrenceId = i64;

/// Economic direction of a transaction.
///
/// The kind is authoritative for sign: amounts are stored unsigned everywhere
/// in this crate, and the sign is applied at computation time via
/// [`TransactionKind::signed`]. Callers ingesting data from sources with
/// signed amounts must normalize to this convention first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Income,
    Expense,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
        }
    }

    /// Apply this kind's sign to an unsigned amount.
    pub fn signed(&self, amount: f64) -> f64 {
        match self {
            Self::Income => amount.abs(),
            Self::Expense => -amount.abs(),
        }
    }
}

impl std::str::FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "income" => Ok(Self::Income),
            "expense" => Ok(Self::Expense),
            _ => Err(format!("Unknown transaction kind: {}", s)),
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An atomic financial movement.
///
/// Read-only input to detection and projection; the core never mutates
/// transactions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    /// Calendar day, no time component
    pub date: NaiveDate,
    /// Unsigned magnitude; see [`TransactionKind`] for the sign contract
    pub amount: f64,
    pub kind: TransactionKind,
    pub description: String,
}

impl Transaction {
    /// Amount with the kind's sign applied (income positive, expense negative).
    pub fn signed_amount(&self) -> f64 {
        self.kind.signed(self.amount)
    }
}

/// Canonical recurrence frequency classes.
///
/// Irregular groups are discarded by the detector, not stored, so there is
/// no `Irregular` variant; classification yields `Option<Frequency>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Weekly,
    Biweekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Weekly => "weekly",
            Self::Biweekly => "biweekly",
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Yearly => "yearly",
        }
    }

    /// Canonical interval length in days.
    pub fn interval_days(&self) -> i64 {
        match self {
            Self::Weekly => 7,
            Self::Biweekly => 14,
            Self::Monthly => 30,
            Self::Quarterly => 90,
            Self::Yearly => 365,
        }
    }
}

impl std::str::FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "weekly" => Ok(Self::Weekly),
            "biweekly" => Ok(Self::Biweekly),
            "monthly" => Ok(Self::Monthly),
            "quarterly" => Ok(Self::Quarterly),
            "yearly" => Ok(Self::Yearly),
            _ => Err(format!("Unknown frequency: {}", s)),
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle state of a detected candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecurrenceStatus {
    Pending,
    Validated,
    Rejected,
}

impl RecurrenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Validated => "validated",
            Self::Rejected => "rejected",
        }
    }
}

/// A detected periodic payment pattern, awaiting human confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurrenceCandidate {
    /// Zero until persisted by a store
    pub id: RecurrenceId,
    pub user_id: UserId,
    /// Human-readable label derived from the group's cleanest description
    pub label: String,
    pub kind: TransactionKind,
    pub amount_mean: f64,
    pub amount_stddev: f64,
    pub amount_min: f64,
    pub amount_max: f64,
    pub frequency: Frequency,
    /// Day-of-week (weekly), day-of-month (monthly) or day-of-year (yearly);
    /// absent for interval-stepped frequencies
    pub reference_day: Option<u32>,
    pub interval_mean_days: f64,
    pub interval_stddev_days: f64,
    /// Irregularity score of the observed gaps (stddev / mean)
    pub coefficient_variation: f64,
    /// `clamp(1 - cv, 0, 1)`, halved for two-occurrence groups
    pub confidence: f64,
    pub occurrence_count: usize,
    /// Members that produced the detection, ordered by date
    pub transaction_ids: Vec<TransactionId>,
    pub first_occurrence: NaiveDate,
    pub last_occurrence: NaiveDate,
    pub status: RecurrenceStatus,
}

/// User overrides applied when a candidate is promoted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecurrenceEdits {
    pub label: Option<String>,
    pub amount_mean: Option<f64>,
    pub frequency: Option<Frequency>,
    pub reference_day: Option<u32>,
    pub occurrence_probability: Option<f64>,
    pub jitter_days: Option<u32>,
}

/// A confirmed, active recurrence used by the projector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatedRecurrence {
    pub id: RecurrenceId,
    pub user_id: UserId,
    pub label: String,
    pub kind: TransactionKind,
    pub amount_mean: f64,
    pub amount_stddev: Option<f64>,
    pub amount_min: Option<f64>,
    pub amount_max: Option<f64>,
    /// Amount coefficient of variation as a percentage, 2 decimals
    pub variability_pct: f64,
    pub frequency: Frequency,
    pub reference_day: Option<u32>,
    /// Chance the flow actually occurs on a scheduled date (default 1.0)
    pub occurrence_probability: f64,
    /// Date uncertainty window in days around each scheduled occurrence
    pub jitter_days: u32,
    pub start_date: NaiveDate,
    /// Scheduling stops after this date when set
    pub end_date: Option<NaiveDate>,
    pub last_occurrence: Option<NaiveDate>,
    pub occurrence_count: usize,
    pub active: bool,
}

/// Output of a detection run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResult {
    pub detections: Vec<RecurrenceCandidate>,
    /// Human-readable status ("not enough history", counts, skipped duplicates)
    pub message: String,
}

/// Risk tier derived from the negative-balance probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Stable,
    Caution,
    Danger,
}

impl RiskLevel {
    /// Tier thresholds: below 10% stable, below 30% caution, above danger.
    pub fn from_percent(negative_risk_percent: f64) -> Self {
        if negative_risk_percent > 30.0 {
            Self::Danger
        } else if negative_risk_percent > 10.0 {
            Self::Caution
        } else {
            Self::Stable
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Caution => "caution",
            Self::Danger => "danger",
        }
    }
}

/// Summary metrics attached to a projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionMetrics {
    pub current_balance: f64,
    pub median_final_balance: f64,
    /// Percent of simulated paths that ever dipped below zero, 2 decimals
    pub negative_risk_percent: f64,
    pub risk: RiskLevel,
}

/// Percentile fan chart over the projection horizon.
///
/// The series are parallel to `labels`; index 0 is the "today" anchor and
/// always equals the starting balance in all three bands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionResult {
    pub labels: Vec<String>,
    pub p10: Vec<f64>,
    pub p50: Vec<f64>,
    pub p90: Vec<f64>,
    pub metrics: ProjectionMetrics,
}

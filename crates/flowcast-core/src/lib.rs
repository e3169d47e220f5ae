//! Flowcast Core Library
//!
//! Cash-flow forecasting engine for personal finance applications:
//! - Recurrence detection: mines transaction history for periodic payments
//! - Human-in-the-loop candidate validation and membership management
//! - Monte Carlo balance projection with percentile bands and risk metrics
//! - Narrow storage contracts with an in-memory reference implementation
//!
//! The crate is a library, not a service: it performs no I/O of its own and
//! leaves persistence, authentication, import, and presentation to the
//! surrounding application.

pub mod detect;
pub mod error;
pub mod forecast;
pub mod models;
pub mod recurrences;
pub mod stats;
pub mod store;

pub use detect::{DetectorConfig, RecurrenceDetector};
pub use error::{Error, Result};
pub use forecast::{
    CancelToken, CashflowProjector, ProjectionParams, ProjectorConfig, ResidualMode,
    ResidualSampler,
};
pub use models::{
    DetectionResult, Frequency, ProjectionMetrics, ProjectionResult, RecurrenceCandidate,
    RecurrenceEdits, RecurrenceStatus, RiskLevel, Transaction, TransactionKind,
    ValidatedRecurrence,
};
pub use recurrences::RecurrenceManager;
pub use store::{
    BalanceSnapshots, MappingStore, MemoryStore, RecurrenceStore, TransactionStore,
};

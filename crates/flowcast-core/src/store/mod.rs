//! Storage contracts
//!
//! The core is a library: it performs no I/O itself and reaches data only
//! through these narrow read/write contracts, implemented by the surrounding
//! application. `MemoryStore` is the in-memory reference implementation used
//! by tests and embedders.

use std::collections::HashSet;

use chrono::NaiveDate;

use crate::error::Result;
use crate::models::{
    RecurrenceCandidate, RecurrenceId, RecurrenceStatus, Transaction, TransactionId, UserId,
    ValidatedRecurrence,
};

mod memory;

pub use memory::MemoryStore;

/// Read-only access to a user's transaction history.
pub trait TransactionStore {
    /// All transactions for the user, optionally restricted to dates on or
    /// after `since`, ordered by date ascending.
    fn list_for_user(&self, user_id: UserId, since: Option<NaiveDate>) -> Result<Vec<Transaction>>;

    /// Transactions by id, restricted to the user. Unknown ids are skipped.
    fn find_by_ids(&self, user_id: UserId, ids: &[TransactionId]) -> Result<Vec<Transaction>>;
}

/// Candidate and validated-recurrence persistence.
pub trait RecurrenceStore {
    /// Active validated recurrences for the user.
    fn list_active(&self, user_id: UserId) -> Result<Vec<ValidatedRecurrence>>;

    /// Pending candidates for the user, confidence descending.
    fn list_pending(&self, user_id: UserId) -> Result<Vec<RecurrenceCandidate>>;

    /// Persist candidates, assigning ids. Returns the stored copies.
    fn insert_candidates(
        &self,
        user_id: UserId,
        candidates: Vec<RecurrenceCandidate>,
    ) -> Result<Vec<RecurrenceCandidate>>;

    /// Delete all pending candidates for the user; returns how many.
    fn clear_pending(&self, user_id: UserId) -> Result<usize>;

    fn get_candidate(&self, id: RecurrenceId) -> Result<Option<RecurrenceCandidate>>;

    fn set_candidate_status(&self, id: RecurrenceId, status: RecurrenceStatus) -> Result<()>;

    /// Persist a validated recurrence, assigning an id. Returns the stored copy.
    fn insert_recurrence(&self, recurrence: ValidatedRecurrence) -> Result<ValidatedRecurrence>;

    fn get_recurrence(&self, id: RecurrenceId) -> Result<Option<ValidatedRecurrence>>;

    fn update_recurrence(&self, recurrence: &ValidatedRecurrence) -> Result<()>;

    /// Soft activation toggle.
    fn set_recurrence_active(&self, id: RecurrenceId, active: bool) -> Result<()>;

    /// Hard delete.
    fn delete_recurrence(&self, id: RecurrenceId) -> Result<()>;
}

/// Transaction <-> recurrence membership.
pub trait MappingStore {
    /// Ids of every transaction mapped to any recurrence of the user.
    fn mapped_transaction_ids(&self, user_id: UserId) -> Result<HashSet<TransactionId>>;

    /// Member transaction ids of one recurrence, insertion order.
    fn transactions_for_recurrence(&self, recurrence_id: RecurrenceId)
        -> Result<Vec<TransactionId>>;

    fn map_transaction(
        &self,
        user_id: UserId,
        recurrence_id: RecurrenceId,
        transaction_id: TransactionId,
    ) -> Result<()>;

    fn unmap_transaction(
        &self,
        user_id: UserId,
        recurrence_id: RecurrenceId,
        transaction_id: TransactionId,
    ) -> Result<()>;

    /// Remove every mapping of a recurrence; returns how many.
    fn clear_for_recurrence(&self, recurrence_id: RecurrenceId) -> Result<usize>;
}

/// Optional externally-maintained balance snapshots.
pub trait BalanceSnapshots {
    /// Latest known balance for the user, if any snapshot exists.
    fn latest(&self, user_id: UserId) -> Result<Option<f64>>;
}

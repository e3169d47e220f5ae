//! In-memory reference store
//!
//! Backs the repository traits with mutex-guarded maps. Tests and
//! single-process embedders use it the way the application layer would use
//! a database-backed implementation.

use std::collections::HashSet;
use std::sync::Mutex;

use chrono::NaiveDate;

use crate::error::{Error, Result};
use crate::models::{
    RecurrenceCandidate, RecurrenceId, RecurrenceStatus, Transaction, TransactionId, UserId,
    ValidatedRecurrence,
};

use super::{BalanceSnapshots, MappingStore, RecurrenceStore, TransactionStore};

#[derive(Debug, Clone)]
struct Mapping {
    user_id: UserId,
    recurrence_id: RecurrenceId,
    transaction_id: TransactionId,
}

#[derive(Debug, Default)]
struct Inner {
    transactions: Vec<Transaction>,
    candidates: Vec<RecurrenceCandidate>,
    recurrences: Vec<ValidatedRecurrence>,
    mappings: Vec<Mapping>,
    snapshots: Vec<(UserId, NaiveDate, f64)>,
    next_id: i64,
}

impl Inner {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Mutex-guarded in-memory implementation of all store traits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock means a writer panicked; the data is plain values,
        // so continuing with it is sound.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed a transaction, assigning an id. Returns the stored copy.
    pub fn add_transaction(&self, mut transaction: Transaction) -> Transaction {
        let mut inner = self.lock();
        if transaction.id == 0 {
            transaction.id = inner.allocate_id();
        }
        inner.transactions.push(transaction.clone());
        transaction
    }

    /// Record a balance snapshot.
    pub fn add_snapshot(&self, user_id: UserId, date: NaiveDate, balance: f64) {
        self.lock().snapshots.push((user_id, date, balance));
    }
}

impl TransactionStore for MemoryStore {
    fn list_for_user(&self, user_id: UserId, since: Option<NaiveDate>) -> Result<Vec<Transaction>> {
        let inner = self.lock();
        let mut out: Vec<Transaction> = inner
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .filter(|t| since.is_none_or(|s| t.date >= s))
            .cloned()
            .collect();
        out.sort_by_key(|t| (t.date, t.id));
        Ok(out)
    }

    fn find_by_ids(&self, user_id: UserId, ids: &[TransactionId]) -> Result<Vec<Transaction>> {
        let inner = self.lock();
        Ok(ids
            .iter()
            .filter_map(|id| {
                inner
                    .transactions
                    .iter()
                    .find(|t| t.id == *id && t.user_id == user_id)
                    .cloned()
            })
            .collect())
    }
}

impl RecurrenceStore for MemoryStore {
    fn list_active(&self, user_id: UserId) -> Result<Vec<ValidatedRecurrence>> {
        let inner = self.lock();
        Ok(inner
            .recurrences
            .iter()
            .filter(|r| r.user_id == user_id && r.active)
            .cloned()
            .collect())
    }

    fn list_pending(&self, user_id: UserId) -> Result<Vec<RecurrenceCandidate>> {
        let inner = self.lock();
        let mut out: Vec<RecurrenceCandidate> = inner
            .candidates
            .iter()
            .filter(|c| c.user_id == user_id && c.status == RecurrenceStatus::Pending)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(out)
    }

    fn insert_candidates(
        &self,
        user_id: UserId,
        candidates: Vec<RecurrenceCandidate>,
    ) -> Result<Vec<RecurrenceCandidate>> {
        let mut inner = self.lock();
        let mut stored = Vec::with_capacity(candidates.len());
        for mut candidate in candidates {
            candidate.id = inner.allocate_id();
            candidate.user_id = user_id;
            inner.candidates.push(candidate.clone());
            stored.push(candidate);
        }
        Ok(stored)
    }

    fn clear_pending(&self, user_id: UserId) -> Result<usize> {
        let mut inner = self.lock();
        let before = inner.candidates.len();
        inner
            .candidates
            .retain(|c| !(c.user_id == user_id && c.status == RecurrenceStatus::Pending));
        Ok(before - inner.candidates.len())
    }

    fn get_candidate(&self, id: RecurrenceId) -> Result<Option<RecurrenceCandidate>> {
        let inner = self.lock();
        Ok(inner.candidates.iter().find(|c| c.id == id).cloned())
    }

    fn set_candidate_status(&self, id: RecurrenceId, status: RecurrenceStatus) -> Result<()> {
        let mut inner = self.lock();
        match inner.candidates.iter_mut().find(|c| c.id == id) {
            Some(candidate) => {
                candidate.status = status;
                Ok(())
            }
            None => Err(Error::NotFound(format!("candidate {}", id))),
        }
    }

    fn insert_recurrence(&self, mut recurrence: ValidatedRecurrence) -> Result<ValidatedRecurrence> {
        let mut inner = self.lock();
        recurrence.id = inner.allocate_id();
        inner.recurrences.push(recurrence.clone());
        Ok(recurrence)
    }

    fn get_recurrence(&self, id: RecurrenceId) -> Result<Option<ValidatedRecurrence>> {
        let inner = self.lock();
        Ok(inner.recurrences.iter().find(|r| r.id == id).cloned())
    }

    fn update_recurrence(&self, recurrence: &ValidatedRecurrence) -> Result<()> {
        let mut inner = self.lock();
        match inner.recurrences.iter_mut().find(|r| r.id == recurrence.id) {
            Some(existing) => {
                *existing = recurrence.clone();
                Ok(())
            }
            None => Err(Error::NotFound(format!("recurrence {}", recurrence.id))),
        }
    }

    fn set_recurrence_active(&self, id: RecurrenceId, active: bool) -> Result<()> {
        let mut inner = self.lock();
        match inner.recurrences.iter_mut().find(|r| r.id == id) {
            Some(recurrence) => {
                recurrence.active = active;
                Ok(())
            }
            None => Err(Error::NotFound(format!("recurrence {}", id))),
        }
    }

    fn delete_recurrence(&self, id: RecurrenceId) -> Result<()> {
        let mut inner = self.lock();
        let before = inner.recurrences.len();
        inner.recurrences.retain(|r| r.id != id);
        if inner.recurrences.len() == before {
            return Err(Error::NotFound(format!("recurrence {}", id)));
        }
        Ok(())
    }
}

impl MappingStore for MemoryStore {
    fn mapped_transaction_ids(&self, user_id: UserId) -> Result<HashSet<TransactionId>> {
        let inner = self.lock();
        Ok(inner
            .mappings
            .iter()
            .filter(|m| m.user_id == user_id)
            .map(|m| m.transaction_id)
            .collect())
    }

    fn transactions_for_recurrence(
        &self,
        recurrence_id: RecurrenceId,
    ) -> Result<Vec<TransactionId>> {
        let inner = self.lock();
        Ok(inner
            .mappings
            .iter()
            .filter(|m| m.recurrence_id == recurrence_id)
            .map(|m| m.transaction_id)
            .collect())
    }

    fn map_transaction(
        &self,
        user_id: UserId,
        recurrence_id: RecurrenceId,
        transaction_id: TransactionId,
    ) -> Result<()> {
        let mut inner = self.lock();
        let exists = inner
            .mappings
            .iter()
            .any(|m| m.recurrence_id == recurrence_id && m.transaction_id == transaction_id);
        if !exists {
            inner.mappings.push(Mapping {
                user_id,
                recurrence_id,
                transaction_id,
            });
        }
        Ok(())
    }

    fn unmap_transaction(
        &self,
        user_id: UserId,
        recurrence_id: RecurrenceId,
        transaction_id: TransactionId,
    ) -> Result<()> {
        let mut inner = self.lock();
        let before = inner.mappings.len();
        inner.mappings.retain(|m| {
            !(m.user_id == user_id
                && m.recurrence_id == recurrence_id
                && m.transaction_id == transaction_id)
        });
        if inner.mappings.len() == before {
            return Err(Error::NotFound(format!(
                "mapping {} -> {}",
                transaction_id, recurrence_id
            )));
        }
        Ok(())
    }

    fn clear_for_recurrence(&self, recurrence_id: RecurrenceId) -> Result<usize> {
        let mut inner = self.lock();
        let before = inner.mappings.len();
        inner.mappings.retain(|m| m.recurrence_id != recurrence_id);
        Ok(before - inner.mappings.len())
    }
}

impl BalanceSnapshots for MemoryStore {
    fn latest(&self, user_id: UserId) -> Result<Option<f64>> {
        let inner = self.lock();
        Ok(inner
            .snapshots
            .iter()
            .filter(|(u, _, _)| *u == user_id)
            .max_by_key(|(_, date, _)| *date)
            .map(|(_, _, balance)| *balance))
    }
}

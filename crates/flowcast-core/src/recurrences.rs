//! Recurrence lifecycle management
//!
//! Candidate -> validated promotion, rejection, manual creation, membership
//! edits, and candidate-transaction suggestions. Detection itself lives in
//! [`crate::detect`]; this module owns everything around the human-in-the-loop
//! confirmation workflow.

use chrono::{Duration, Utc};
use tracing::{debug, info};

use crate::detect::RecurrenceDetector;
use crate::error::{Error, Result};
use crate::models::{
    DetectionResult, RecurrenceCandidate, RecurrenceEdits, RecurrenceId, RecurrenceStatus,
    Transaction, TransactionId, UserId, ValidatedRecurrence,
};
use crate::store::{MappingStore, RecurrenceStore, TransactionStore};

/// Lookback window for candidate-transaction suggestions.
const SUGGESTION_LOOKBACK_DAYS: i64 = 180;
/// Relative amount tolerance for suggestions (±10% of the mean).
const SUGGESTION_AMOUNT_TOLERANCE: f64 = 0.10;
/// Maximum number of suggested transactions returned.
const SUGGESTION_LIMIT: usize = 20;

/// Manages the recurrence confirmation workflow over a store.
pub struct RecurrenceManager<'a, S>
where
    S: TransactionStore + RecurrenceStore + MappingStore,
{
    store: &'a S,
    detector: &'a RecurrenceDetector,
}

impl<'a, S> RecurrenceManager<'a, S>
where
    S: TransactionStore + RecurrenceStore + MappingStore,
{
    pub fn new(store: &'a S, detector: &'a RecurrenceDetector) -> Self {
        Self { store, detector }
    }

    /// Run detection over the user's full history and replace their pending
    /// candidates. Candidates duplicating an already-validated recurrence are
    /// skipped, not stored; the result message reports both counts.
    pub fn run_detection(&self, user_id: UserId) -> Result<DetectionResult> {
        let transactions = self.store.list_for_user(user_id, None)?;
        if transactions.len() < self.detector.config().min_history {
            // Not an error: the caller should prompt for more data
            return Ok(self.detector.detect(&transactions));
        }

        let cleared = self.store.clear_pending(user_id)?;
        if cleared > 0 {
            debug!(cleared, "Cleared stale pending detections");
        }

        let result = self.detector.detect(&transactions);

        let validated = self.store.list_active(user_id)?;
        let (fresh, skipped): (Vec<_>, Vec<_>) = result
            .detections
            .into_iter()
            .partition(|c| !validated.iter().any(|r| self.is_duplicate(c, r)));

        let stored = self.store.insert_candidates(user_id, fresh)?;

        let message = if stored.is_empty() && skipped.is_empty() {
            "No recurring patterns detected".to_string()
        } else if skipped.is_empty() {
            format!("{} recurring pattern(s) detected", stored.len())
        } else {
            format!(
                "{} recurring pattern(s) detected, {} duplicate(s) skipped",
                stored.len(),
                skipped.len()
            )
        };

        info!(
            user_id,
            detected = stored.len(),
            skipped = skipped.len(),
            "Detection run complete"
        );

        Ok(DetectionResult {
            detections: stored,
            message,
        })
    }

    /// A candidate duplicates a validated recurrence when the kind matches,
    /// the mean amounts sit within ±5% of each other, and the labels share
    /// enough tokens to be the same pattern.
    fn is_duplicate(&self, candidate: &RecurrenceCandidate, existing: &ValidatedRecurrence) -> bool {
        candidate.kind == existing.kind
            && relative_close(candidate.amount_mean, existing.amount_mean, 0.05)
            && self
                .detector
                .descriptions_similar(&candidate.label, &existing.label)
    }

    /// Promote a pending candidate into an active recurrence, applying user
    /// edits and mapping every member transaction.
    pub fn validate(
        &self,
        detection_id: RecurrenceId,
        edits: RecurrenceEdits,
    ) -> Result<ValidatedRecurrence> {
        let candidate = self
            .store
            .get_candidate(detection_id)?
            .ok_or_else(|| Error::NotFound(format!("detection {}", detection_id)))?;

        if candidate.status != RecurrenceStatus::Pending {
            return Err(Error::InvalidParameter(format!(
                "detection {} is {}, not pending",
                detection_id,
                candidate.status.as_str()
            )));
        }

        let amount_mean = edits.amount_mean.unwrap_or(candidate.amount_mean);
        let recurrence = ValidatedRecurrence {
            id: 0,
            user_id: candidate.user_id,
            label: edits.label.unwrap_or_else(|| candidate.label.clone()),
            kind: candidate.kind,
            amount_mean,
            amount_stddev: Some(candidate.amount_stddev),
            amount_min: Some(candidate.amount_min),
            amount_max: Some(candidate.amount_max),
            variability_pct: variability_pct(amount_mean, candidate.amount_stddev),
            frequency: edits.frequency.unwrap_or(candidate.frequency),
            reference_day: edits.reference_day.or(candidate.reference_day),
            occurrence_probability: edits.occurrence_probability.unwrap_or(1.0).clamp(0.0, 1.0),
            jitter_days: edits.jitter_days.unwrap_or(0),
            start_date: candidate.first_occurrence,
            end_date: None,
            last_occurrence: Some(candidate.last_occurrence),
            occurrence_count: candidate.occurrence_count,
            active: true,
        };

        let stored = self.store.insert_recurrence(recurrence)?;
        self.store
            .set_candidate_status(detection_id, RecurrenceStatus::Validated)?;

        for transaction_id in &candidate.transaction_ids {
            self.store
                .map_transaction(candidate.user_id, stored.id, *transaction_id)?;
        }

        info!(
            recurrence_id = stored.id,
            label = %stored.label,
            "Candidate validated"
        );

        Ok(stored)
    }

    /// Reject a pending candidate; it will not be surfaced again until the
    /// next detection run replaces the pending set.
    pub fn reject(&self, detection_id: RecurrenceId) -> Result<()> {
        self.store
            .set_candidate_status(detection_id, RecurrenceStatus::Rejected)
    }

    /// Create a recurrence directly, without a detection. Duplicates of an
    /// existing active recurrence are refused.
    pub fn create_manual(&self, recurrence: ValidatedRecurrence) -> Result<ValidatedRecurrence> {
        let existing = self.store.list_active(recurrence.user_id)?;
        let duplicate = existing.iter().find(|r| {
            r.kind == recurrence.kind
                && relative_close(r.amount_mean, recurrence.amount_mean, 0.05)
                && self.detector.descriptions_similar(&r.label, &recurrence.label)
        });

        if let Some(dup) = duplicate {
            return Err(Error::DuplicateDetection(format!(
                "recurrence '{}' already covers this pattern",
                dup.label
            )));
        }

        self.store.insert_recurrence(recurrence)
    }

    /// Soft-deactivate a recurrence; the projector stops scheduling it.
    pub fn deactivate(&self, recurrence_id: RecurrenceId) -> Result<()> {
        self.store.set_recurrence_active(recurrence_id, false)
    }

    /// Hard-delete a recurrence and its transaction mappings.
    pub fn delete(&self, recurrence_id: RecurrenceId) -> Result<()> {
        self.store.clear_for_recurrence(recurrence_id)?;
        self.store.delete_recurrence(recurrence_id)
    }

    /// Manually associate a transaction with a recurrence. The transaction
    /// must belong to the same user and carry the same kind.
    pub fn add_transaction(
        &self,
        recurrence_id: RecurrenceId,
        transaction_id: TransactionId,
    ) -> Result<()> {
        let recurrence = self
            .store
            .get_recurrence(recurrence_id)?
            .ok_or_else(|| Error::NotFound(format!("recurrence {}", recurrence_id)))?;

        let transaction = self
            .store
            .find_by_ids(recurrence.user_id, &[transaction_id])?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("transaction {}", transaction_id)))?;

        if transaction.kind != recurrence.kind {
            return Err(Error::InvalidData(format!(
                "transaction is {}, recurrence is {}",
                transaction.kind, recurrence.kind
            )));
        }

        self.store
            .map_transaction(recurrence.user_id, recurrence_id, transaction_id)
    }

    /// Dissociate a transaction. A recurrence whose membership becomes empty
    /// is deactivated automatically.
    pub fn remove_transaction(
        &self,
        recurrence_id: RecurrenceId,
        transaction_id: TransactionId,
    ) -> Result<()> {
        let recurrence = self
            .store
            .get_recurrence(recurrence_id)?
            .ok_or_else(|| Error::NotFound(format!("recurrence {}", recurrence_id)))?;

        self.store
            .unmap_transaction(recurrence.user_id, recurrence_id, transaction_id)?;

        if self
            .store
            .transactions_for_recurrence(recurrence_id)?
            .is_empty()
        {
            self.store.set_recurrence_active(recurrence_id, false)?;
            info!(recurrence_id, "Recurrence deactivated: no member transactions left");
        }

        Ok(())
    }

    /// Suggest not-yet-associated transactions that could belong to a
    /// recurrence: same kind, unsigned amount within ±10% of the mean,
    /// 180-day lookback, most recent first, capped at 20.
    pub fn suggest_candidate_transactions(
        &self,
        recurrence_id: RecurrenceId,
    ) -> Result<Vec<Transaction>> {
        let recurrence = self
            .store
            .get_recurrence(recurrence_id)?
            .ok_or_else(|| Error::NotFound(format!("recurrence {}", recurrence_id)))?;

        let since = Utc::now().date_naive() - Duration::days(SUGGESTION_LOOKBACK_DAYS);
        let mapped = self.store.mapped_transaction_ids(recurrence.user_id)?;

        let mut suggestions: Vec<Transaction> = self
            .store
            .list_for_user(recurrence.user_id, Some(since))?
            .into_iter()
            .filter(|t| t.kind == recurrence.kind)
            .filter(|t| !mapped.contains(&t.id))
            .filter(|t| {
                (t.amount.abs() - recurrence.amount_mean).abs()
                    <= SUGGESTION_AMOUNT_TOLERANCE * recurrence.amount_mean
            })
            .collect();

        suggestions.sort_by_key(|t| (std::cmp::Reverse(t.date), t.id));
        suggestions.truncate(SUGGESTION_LIMIT);
        Ok(suggestions)
    }
}

/// Amount coefficient of variation as a percentage, rounded to 2 decimals.
fn variability_pct(mean: f64, stddev: f64) -> f64 {
    if mean <= 0.0 || stddev <= 0.0 {
        return 0.0;
    }
    (stddev / mean * 100.0 * 100.0).round() / 100.0
}

/// Relative closeness against the first operand's scale.
fn relative_close(a: f64, b: f64, tolerance: f64) -> bool {
    let scale = (a.abs() + b.abs()) / 2.0;
    if scale == 0.0 {
        return true;
    }
    (a - b).abs() <= tolerance * scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Frequency, TransactionKind};
    use crate::store::MemoryStore;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn seed_monthly_rent(store: &MemoryStore) -> Vec<Transaction> {
        (0..4)
            .map(|i| {
                store.add_transaction(Transaction {
                    id: 0,
                    user_id: 1,
                    date: date(2025, 1 + i, 5),
                    amount: 800.0,
                    kind: TransactionKind::Expense,
                    description: "LOYER APPARTEMENT CENTRE".to_string(),
                })
            })
            .collect()
    }

    fn manual_recurrence(label: &str, amount: f64) -> ValidatedRecurrence {
        ValidatedRecurrence {
            id: 0,
            user_id: 1,
            label: label.to_string(),
            kind: TransactionKind::Expense,
            amount_mean: amount,
            amount_stddev: None,
            amount_min: None,
            amount_max: None,
            variability_pct: 0.0,
            frequency: Frequency::Monthly,
            reference_day: Some(5),
            occurrence_probability: 1.0,
            jitter_days: 0,
            start_date: date(2025, 1, 5),
            end_date: None,
            last_occurrence: None,
            occurrence_count: 0,
            active: true,
        }
    }

    #[test]
    fn test_detection_validate_maps_members() {
        let store = MemoryStore::new();
        let detector = RecurrenceDetector::new().unwrap();
        let manager = RecurrenceManager::new(&store, &detector);
        let txs = seed_monthly_rent(&store);

        let result = manager.run_detection(1).unwrap();
        assert_eq!(result.detections.len(), 1);
        let detection = &result.detections[0];
        assert!(detection.id > 0);

        let recurrence = manager
            .validate(detection.id, RecurrenceEdits::default())
            .unwrap();
        assert!(recurrence.active);
        assert_eq!(recurrence.frequency, Frequency::Monthly);
        assert_eq!(recurrence.occurrence_probability, 1.0);

        let members = store.transactions_for_recurrence(recurrence.id).unwrap();
        assert_eq!(members.len(), txs.len());

        // Validating twice is refused
        let err = manager.validate(detection.id, RecurrenceEdits::default());
        assert!(matches!(err, Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn test_validate_applies_edits() {
        let store = MemoryStore::new();
        let detector = RecurrenceDetector::new().unwrap();
        let manager = RecurrenceManager::new(&store, &detector);
        seed_monthly_rent(&store);

        let result = manager.run_detection(1).unwrap();
        let edits = RecurrenceEdits {
            label: Some("Rent".to_string()),
            amount_mean: Some(820.0),
            occurrence_probability: Some(0.9),
            jitter_days: Some(2),
            ..Default::default()
        };
        let recurrence = manager.validate(result.detections[0].id, edits).unwrap();

        assert_eq!(recurrence.label, "Rent");
        assert_eq!(recurrence.amount_mean, 820.0);
        assert_eq!(recurrence.occurrence_probability, 0.9);
        assert_eq!(recurrence.jitter_days, 2);
    }

    #[test]
    fn test_rerun_skips_validated_duplicate() {
        let store = MemoryStore::new();
        let detector = RecurrenceDetector::new().unwrap();
        let manager = RecurrenceManager::new(&store, &detector);
        seed_monthly_rent(&store);

        let first = manager.run_detection(1).unwrap();
        manager
            .validate(first.detections[0].id, RecurrenceEdits::default())
            .unwrap();

        let second = manager.run_detection(1).unwrap();
        assert!(second.detections.is_empty());
        assert!(second.message.contains("1 duplicate(s) skipped"));
    }

    #[test]
    fn test_reject_removes_from_pending() {
        let store = MemoryStore::new();
        let detector = RecurrenceDetector::new().unwrap();
        let manager = RecurrenceManager::new(&store, &detector);
        seed_monthly_rent(&store);

        let result = manager.run_detection(1).unwrap();
        manager.reject(result.detections[0].id).unwrap();

        assert!(store.list_pending(1).unwrap().is_empty());
    }

    #[test]
    fn test_create_manual_refuses_duplicate() {
        let store = MemoryStore::new();
        let detector = RecurrenceDetector::new().unwrap();
        let manager = RecurrenceManager::new(&store, &detector);

        manager
            .create_manual(manual_recurrence("Apartment rent payment", 800.0))
            .unwrap();
        let err = manager.create_manual(manual_recurrence("Apartment rent payment", 805.0));
        assert!(matches!(err, Err(Error::DuplicateDetection(_))));

        // Different pattern is accepted
        manager
            .create_manual(manual_recurrence("Electricity provider bill", 60.0))
            .unwrap();
    }

    #[test]
    fn test_membership_edit_and_auto_deactivation() {
        let store = MemoryStore::new();
        let detector = RecurrenceDetector::new().unwrap();
        let manager = RecurrenceManager::new(&store, &detector);

        let recurrence = manager
            .create_manual(manual_recurrence("Gym membership fee", 30.0))
            .unwrap();
        let tx = store.add_transaction(Transaction {
            id: 0,
            user_id: 1,
            date: date(2025, 3, 5),
            amount: 30.0,
            kind: TransactionKind::Expense,
            description: "GYM".to_string(),
        });

        manager.add_transaction(recurrence.id, tx.id).unwrap();
        assert_eq!(
            store.transactions_for_recurrence(recurrence.id).unwrap(),
            vec![tx.id]
        );

        manager.remove_transaction(recurrence.id, tx.id).unwrap();
        let reloaded = store.get_recurrence(recurrence.id).unwrap().unwrap();
        assert!(!reloaded.active, "empty membership must deactivate");
    }

    #[test]
    fn test_add_transaction_kind_mismatch() {
        let store = MemoryStore::new();
        let detector = RecurrenceDetector::new().unwrap();
        let manager = RecurrenceManager::new(&store, &detector);

        let recurrence = manager
            .create_manual(manual_recurrence("Gym membership fee", 30.0))
            .unwrap();
        let tx = store.add_transaction(Transaction {
            id: 0,
            user_id: 1,
            date: date(2025, 3, 5),
            amount: 30.0,
            kind: TransactionKind::Income,
            description: "REFUND".to_string(),
        });

        let err = manager.add_transaction(recurrence.id, tx.id);
        assert!(matches!(err, Err(Error::InvalidData(_))));
    }

    #[test]
    fn test_suggestions_filter_and_cap() {
        let store = MemoryStore::new();
        let detector = RecurrenceDetector::new().unwrap();
        let manager = RecurrenceManager::new(&store, &detector);
        let today = Utc::now().date_naive();

        let recurrence = manager
            .create_manual(manual_recurrence("Streaming subscription", 10.0))
            .unwrap();

        // 25 recent matches, one amount outlier, one mapped, one wrong kind
        for i in 0..25 {
            store.add_transaction(Transaction {
                id: 0,
                user_id: 1,
                date: today - Duration::days(i),
                amount: 10.0,
                kind: TransactionKind::Expense,
                description: format!("STREAM {}", i),
            });
        }
        store.add_transaction(Transaction {
            id: 0,
            user_id: 1,
            date: today,
            amount: 25.0,
            kind: TransactionKind::Expense,
            description: "TOO EXPENSIVE".to_string(),
        });
        store.add_transaction(Transaction {
            id: 0,
            user_id: 1,
            date: today,
            amount: 10.0,
            kind: TransactionKind::Income,
            description: "WRONG KIND".to_string(),
        });
        let mapped = store.add_transaction(Transaction {
            id: 0,
            user_id: 1,
            date: today,
            amount: 10.0,
            kind: TransactionKind::Expense,
            description: "ALREADY MAPPED".to_string(),
        });
        manager.add_transaction(recurrence.id, mapped.id).unwrap();

        let suggestions = manager.suggest_candidate_transactions(recurrence.id).unwrap();
        assert_eq!(suggestions.len(), SUGGESTION_LIMIT);
        // Most recent first
        assert!(suggestions.windows(2).all(|w| w[0].date >= w[1].date));
        assert!(suggestions.iter().all(|t| t.kind == TransactionKind::Expense));
        assert!(suggestions.iter().all(|t| t.id != mapped.id));
        assert!(suggestions.iter().all(|t| (t.amount - 10.0).abs() <= 1.0));
    }

    #[test]
    fn test_variability_pct() {
        assert_eq!(variability_pct(100.0, 12.345), 12.35);
        assert_eq!(variability_pct(0.0, 5.0), 0.0);
        assert_eq!(variability_pct(100.0, 0.0), 0.0);
    }
}

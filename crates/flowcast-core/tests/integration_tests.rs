//! Integration tests for flowcast-core
//!
//! These tests exercise the full detect -> validate -> project workflow.

use chrono::{Duration, NaiveDate};

use flowcast_core::{
    CancelToken, CashflowProjector, Frequency, ProjectionParams, RecurrenceDetector,
    RecurrenceEdits, RecurrenceManager, ResidualMode, RiskLevel, Transaction, TransactionKind,
};
use flowcast_core::store::{MappingStore, MemoryStore, RecurrenceStore};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Six months of history for one user: a monthly salary, a monthly rent,
/// and a grocery habit too irregular in timing to pass the periodicity test.
fn seed_history(store: &MemoryStore, today: NaiveDate) {
    for month in 0..6i64 {
        let anchor = today - Duration::days(30 * (month + 1));
        store.add_transaction(Transaction {
            id: 0,
            user_id: 1,
            date: anchor,
            amount: 2400.0,
            kind: TransactionKind::Income,
            description: format!("VIREMENT SALAIRE ACME {}", month),
        });
        store.add_transaction(Transaction {
            id: 0,
            user_id: 1,
            date: anchor + Duration::days(2),
            amount: 850.0,
            kind: TransactionKind::Expense,
            description: "PRLV LOYER RESIDENCE SUD".to_string(),
        });
    }
    for week in 0..20i64 {
        // Roughly weekly but with gaps swinging between 1 and 10 days:
        // the interval cv lands well above the 0.30 ceiling
        store.add_transaction(Transaction {
            id: 0,
            user_id: 1,
            date: today - Duration::days(7 * week + (3 * week) % 11 + 3),
            amount: 50.0,
            kind: TransactionKind::Expense,
            description: format!("SUPERMARCHE CENTRE {}", week),
        });
    }
}

#[test]
fn test_detect_validate_project_workflow() {
    let store = MemoryStore::new();
    let today = date(2025, 6, 2);
    seed_history(&store, today);

    let detector = RecurrenceDetector::new().expect("detector construction");
    let manager = RecurrenceManager::new(&store, &detector);

    // 1. Detection finds the salary and the rent; the erratic grocery
    //    cadence fails the periodicity test
    let result = manager.run_detection(1).expect("detection run");
    assert_eq!(result.detections.len(), 2);
    assert!(result
        .detections
        .iter()
        .all(|d| d.frequency == Frequency::Monthly));
    assert!(result.detections.iter().all(|d| d.confidence > 0.8));

    let salary = result
        .detections
        .iter()
        .find(|d| d.kind == TransactionKind::Income)
        .expect("salary candidate");
    assert_eq!(salary.amount_mean, 2400.0);
    assert_eq!(salary.occurrence_count, 6);

    let rent = result
        .detections
        .iter()
        .find(|d| d.kind == TransactionKind::Expense)
        .expect("rent candidate");
    assert_eq!(rent.amount_mean, 850.0);

    // 2. Validate both; mappings carry every member transaction
    let salary_rec = manager
        .validate(salary.id, RecurrenceEdits::default())
        .expect("validate salary");
    let rent_rec = manager
        .validate(rent.id, RecurrenceEdits::default())
        .expect("validate rent");

    assert_eq!(
        store.transactions_for_recurrence(salary_rec.id).unwrap().len(),
        6
    );
    assert_eq!(store.list_pending(1).unwrap().len(), 0);

    // 3. Projection runs over the validated recurrences plus the residual
    //    grocery noise
    let projector = CashflowProjector::new(&store);
    let params = ProjectionParams {
        start_balance: Some(1200.0),
        seed: Some(42),
        ..Default::default()
    };
    let projection = projector
        .project_as_of(1, &params, today, &CancelToken::new())
        .expect("projection");

    assert_eq!(projection.labels.len(), 13);
    assert_eq!(projection.p50[0], 1200.0);
    for i in 0..projection.labels.len() {
        assert!(projection.p10[i] <= projection.p50[i]);
        assert!(projection.p50[i] <= projection.p90[i]);
    }

    // Salary minus rent dominates: the median should drift upward over
    // twelve weeks (3 salary hits minus 3 rents minus groceries)
    assert!(projection.p50[12] > projection.p50[0]);
    assert!(projection.metrics.negative_risk_percent <= 100.0);

    // 4. Deactivating both recurrences pushes their flows into nothing:
    //    the projection now only carries residual noise
    manager.deactivate(salary_rec.id).unwrap();
    manager.deactivate(rent_rec.id).unwrap();
    let drift_free = ProjectionParams {
        start_balance: Some(1200.0),
        seed: Some(42),
        residual_mode: ResidualMode::ZeroDrift,
        ..Default::default()
    };
    let quiet = projector
        .project_as_of(1, &drift_free, today, &CancelToken::new())
        .expect("quiet projection");
    // Without recurrences and with drift removed, the median stays near start
    let final_median = quiet.p50[12];
    assert!((final_median - 1200.0).abs() < 600.0);
}

#[test]
fn test_rerun_after_validation_reports_duplicates() {
    let store = MemoryStore::new();
    let today = date(2025, 6, 2);
    seed_history(&store, today);

    let detector = RecurrenceDetector::new().unwrap();
    let manager = RecurrenceManager::new(&store, &detector);

    let first = manager.run_detection(1).unwrap();
    for detection in &first.detections {
        manager.validate(detection.id, RecurrenceEdits::default()).unwrap();
    }

    let second = manager.run_detection(1).unwrap();
    assert!(second.detections.is_empty());
    assert!(second.message.contains("2 duplicate(s) skipped"));
}

#[test]
fn test_projection_excludes_mapped_transactions_from_residual() {
    let store = MemoryStore::new();
    let today = date(2025, 6, 2);

    // Only a salary, fully mapped after validation: the residual set is
    // empty, so with an explicit baseline the projection is driven by the
    // recurrence alone
    for month in 0..6i64 {
        store.add_transaction(Transaction {
            id: 0,
            user_id: 1,
            date: today - Duration::days(30 * (month + 1)),
            amount: 2000.0,
            kind: TransactionKind::Income,
            description: "VIREMENT SALAIRE ACME".to_string(),
        });
    }

    let detector = RecurrenceDetector::new().unwrap();
    let manager = RecurrenceManager::new(&store, &detector);
    let result = manager.run_detection(1).unwrap();
    assert_eq!(result.detections.len(), 1);
    let recurrence = manager
        .validate(result.detections[0].id, RecurrenceEdits::default())
        .unwrap();
    assert!(recurrence.active);

    let projector = CashflowProjector::new(&store);
    let params = ProjectionParams {
        start_balance: Some(100.0),
        seed: Some(7),
        ..Default::default()
    };
    let projection = projector
        .project_as_of(1, &params, today, &CancelToken::new())
        .unwrap();

    // Monthly salary of 2000 lands at least twice in 12 weeks; with no
    // residual noise every band moves in exact 2000 steps
    assert_eq!(projection.p10, projection.p90);
    assert!(projection.p50[12] >= 100.0 + 2.0 * 2000.0);
    assert_eq!(projection.metrics.risk, RiskLevel::Stable);
}

#[test]
fn test_membership_edits_flow_into_projection() {
    let store = MemoryStore::new();
    let today = date(2025, 6, 2);
    seed_history(&store, today);

    let detector = RecurrenceDetector::new().unwrap();
    let manager = RecurrenceManager::new(&store, &detector);
    let result = manager.run_detection(1).unwrap();

    let rent = result
        .detections
        .iter()
        .find(|d| d.kind == TransactionKind::Expense)
        .unwrap();
    let recurrence = manager.validate(rent.id, RecurrenceEdits::default()).unwrap();

    // Removing every member deactivates the recurrence, so the projector
    // stops scheduling it
    for tx_id in store.transactions_for_recurrence(recurrence.id).unwrap() {
        manager.remove_transaction(recurrence.id, tx_id).unwrap();
    }
    let reloaded = store.get_recurrence(recurrence.id).unwrap().unwrap();
    assert!(!reloaded.active);
    assert!(store.list_active(1).unwrap().is_empty());
}

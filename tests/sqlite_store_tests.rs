//! Tests for src/appointments/sqlite.rs
//! Each test opens its own in-memory SQLite database with migrations applied.
#![cfg(feature = "database")]

use chrono::{Duration, TimeZone, Utc};
use std::sync::Arc;

use clinic_appointments::appointments::*;
use clinic_appointments::DatabaseManager;

struct Harness {
    database: DatabaseManager,
    engine: WorkflowEngine<SqliteAppointmentStore, SqliteAvailabilityPool>,
    store: Arc<SqliteAppointmentStore>,
    pool: Arc<SqliteAvailabilityPool>,
}

async fn harness() -> Harness {
    let database = DatabaseManager::in_memory().await.unwrap();
    let store = Arc::new(SqliteAppointmentStore::new(database.pool().clone()));
    let pool = Arc::new(SqliteAvailabilityPool::new(database.pool().clone()));
    Harness {
        engine: WorkflowEngine::new(store.clone(), pool.clone()),
        database,
        store,
        pool,
    }
}

fn booking(slot: Option<i64>) -> NewAppointment {
    NewAppointment {
        doctor_id: 4,
        patient_id: 8,
        clinic_id: 15,
        scheduled_date: Utc.with_ymd_and_hms(2026, 11, 16, 9, 30, 0).unwrap(),
        duration_minutes: 30,
        appointment_type: Some("check-up".to_string()),
        previous_appointment_id: None,
        availability_id: slot,
        request_id: None,
    }
}

#[tokio::test]
async fn schedule_persists_appointment_and_creation_history() {
    let h = harness().await;

    let (appt, entry) = h.engine.schedule(booking(None), Some(2)).await.unwrap();

    let loaded = h.store.load_by_id(appt.id).await.unwrap();
    assert_eq!(loaded, appt);
    assert_eq!(loaded.status, AppointmentStatus::Schedule);
    assert_eq!(loaded.version, 0);
    assert!(!loaded.token.is_empty());

    let history = h.store.history(appt.id).await.unwrap();
    assert_eq!(history, vec![entry]);
    assert_eq!(history[0].previous_status, None);
    assert_eq!(history[0].actor_id, Some(2));
}

#[tokio::test]
async fn pipeline_walk_writes_one_history_row_per_step() {
    let h = harness().await;
    let (mut appt, _) = h.engine.schedule(booking(None), Some(1)).await.unwrap();

    for action in [
        Action::Confirm1,
        Action::Confirm2,
        Action::CheckIn,
        Action::Ready,
        Action::InProgress,
        Action::ReleasePatient,
    ] {
        appt = h.engine.apply_action(&appt, &action, 3).await.unwrap().appointment;
    }

    assert_eq!(appt.status, AppointmentStatus::ReleasePatient);
    assert_eq!(appt.version, 6);
    let history = h.engine.history(appt.id).await.unwrap();
    assert_eq!(history.len(), 7);
    assert_eq!(history[3].previous_status, Some(AppointmentStatus::Confirm2));
    assert_eq!(history[3].new_status, AppointmentStatus::CheckIn);
}

#[tokio::test]
async fn stale_snapshot_is_rejected_as_conflict() {
    let h = harness().await;
    let (appt, _) = h.engine.schedule(booking(None), Some(1)).await.unwrap();

    h.engine.apply_action(&appt, &Action::Confirm1, 1).await.unwrap();
    let err = h.engine.apply_action(&appt, &Action::VPending, 1).await.unwrap_err();

    assert_eq!(err, WorkflowError::Conflict { appointment_id: appt.id });
    assert_eq!(h.store.history(appt.id).await.unwrap().len(), 2);
    assert_eq!(
        h.store.load_by_id(appt.id).await.unwrap().status,
        AppointmentStatus::Confirm1
    );
}

#[tokio::test]
async fn unknown_appointment_is_not_found() {
    let h = harness().await;

    let err = h.engine.apply_action_by_id(404, &Action::Confirm1, 1).await.unwrap_err();

    assert_eq!(err, WorkflowError::appointment_not_found(404));
}

#[tokio::test]
async fn reschedule_commits_source_reason_and_successor_together() {
    let h = harness().await;
    let old_slot = h
        .pool
        .create_slot(4, 15, Utc.with_ymd_and_hms(2026, 11, 16, 9, 30, 0).unwrap(), 30)
        .await
        .unwrap();
    let new_slot = h
        .pool
        .create_slot(4, 15, Utc.with_ymd_and_hms(2026, 11, 18, 9, 30, 0).unwrap(), 30)
        .await
        .unwrap();
    let (appt, _) = h.engine.schedule(booking(Some(old_slot.id)), Some(1)).await.unwrap();

    let update = h
        .engine
        .apply_action(
            &appt,
            &Action::RescheduleAppt(Reschedule {
                reason: ReasonCode::PatientCannotMakeIt,
                note: Some("travelling".to_string()),
                scheduled_date: new_slot.start_time,
                duration_minutes: None,
                doctor_id: None,
                availability_id: Some(new_slot.id),
                keep_availability_on_cancel: false,
            }),
            6,
        )
        .await
        .unwrap();

    let successor = update.rescheduled_to.unwrap();
    assert_eq!(successor.previous_appointment_id, Some(appt.id));
    assert_eq!(successor.scheduled_date, new_slot.start_time);
    assert_eq!(h.store.load_by_id(successor.id).await.unwrap(), successor);
    assert_eq!(
        h.store.load_by_id(appt.id).await.unwrap().status,
        AppointmentStatus::Cancel
    );

    let reasons = h.engine.reasons(appt.id).await.unwrap();
    assert_eq!(reasons.len(), 1);
    assert_eq!(reasons[0].reason, ReasonCode::PatientCannotMakeIt);
    assert_eq!(reasons[0].note.as_deref(), Some("travelling"));

    assert_eq!(update.slot, SlotDisposition::Released);
    assert!(!h.pool.slot(old_slot.id).await.unwrap().unwrap().reserved);
    assert!(h.pool.slot(new_slot.id).await.unwrap().unwrap().reserved);
}

#[tokio::test]
async fn reserved_slot_cannot_be_booked_twice() {
    let h = harness().await;
    let slot = h
        .pool
        .create_slot(4, 15, Utc.with_ymd_and_hms(2026, 11, 20, 11, 0, 0).unwrap(), 15)
        .await
        .unwrap();

    h.engine.schedule(booking(Some(slot.id)), None).await.unwrap();
    let err = h.engine.schedule(booking(Some(slot.id)), None).await.unwrap_err();

    assert!(matches!(err, WorkflowError::Validation(_)));
    let page = h
        .engine
        .list(&AppointmentFilter::default(), Pagination::default())
        .await
        .unwrap();
    assert_eq!(page.total, 1);
}

#[tokio::test]
async fn keep_availability_on_cancel_leaves_slot_reserved() {
    let h = harness().await;
    let slot = h
        .pool
        .create_slot(4, 15, Utc.with_ymd_and_hms(2026, 11, 21, 8, 0, 0).unwrap(), 30)
        .await
        .unwrap();
    let (appt, _) = h.engine.schedule(booking(Some(slot.id)), None).await.unwrap();

    let update = h
        .engine
        .apply_action(
            &appt,
            &Action::Cancel {
                reason: ReasonCode::ChangeDoctor,
                note: None,
                keep_availability_on_cancel: true,
            },
            1,
        )
        .await
        .unwrap();

    assert_eq!(update.slot, SlotDisposition::Retained);
    assert!(h.pool.slot(slot.id).await.unwrap().unwrap().reserved);
}

#[tokio::test]
async fn status_history_rejects_updates_and_deletes() {
    let h = harness().await;
    let (appt, _) = h.engine.schedule(booking(None), None).await.unwrap();

    let update = sqlx::query("UPDATE appointment_status_history SET new_status = 'CANCEL' WHERE appointment_id = ?1")
        .bind(appt.id)
        .execute(h.database.pool())
        .await;
    assert!(update.is_err());

    let delete = sqlx::query("DELETE FROM appointment_status_history WHERE appointment_id = ?1")
        .bind(appt.id)
        .execute(h.database.pool())
        .await;
    assert!(delete.is_err());

    assert_eq!(h.store.history(appt.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn list_applies_filters_and_pages() {
    let h = harness().await;
    let base = Utc.with_ymd_and_hms(2026, 12, 1, 9, 0, 0).unwrap();
    for i in 0..4 {
        let mut new = booking(None);
        new.scheduled_date = base + Duration::hours(i);
        h.engine.schedule(new, None).await.unwrap();
    }
    let mut elsewhere = booking(None);
    elsewhere.clinic_id = 99;
    h.engine.schedule(elsewhere, None).await.unwrap();

    let filter = AppointmentFilter {
        clinic_id: Some(15),
        ..Default::default()
    };
    let page = h.engine.list(&filter, Pagination::new(2, 3).unwrap()).await.unwrap();

    assert_eq!(page.total, 4);
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].scheduled_date, base + Duration::hours(3));

    let confirmed = AppointmentFilter {
        status: Some(AppointmentStatus::Confirm1),
        ..Default::default()
    };
    assert!(h.engine.list(&confirmed, Pagination::default()).await.unwrap().items.is_empty());
}

#[tokio::test]
async fn token_verifier_matches_stored_token() {
    let h = harness().await;
    let (appt, _) = h.engine.schedule(booking(None), None).await.unwrap();
    let gate = PublicActionGate::new(StoreTokenVerifier::new(h.store.clone()));

    assert_eq!(
        gate.authorize("guess", appt.id).await.unwrap_err(),
        WorkflowError::Unauthorized
    );

    let authorized = gate.authorize(&appt.token, appt.id).await.unwrap();
    let update = h.engine.apply_public_action(&authorized, &Action::Confirm1).await.unwrap();
    assert_eq!(update.appointment.status, AppointmentStatus::Confirm1);
}

#[tokio::test]
async fn released_slot_is_cleared_from_the_stored_row() {
    let h = harness().await;
    let slot = h
        .pool
        .create_slot(4, 15, Utc.with_ymd_and_hms(2026, 11, 23, 10, 0, 0).unwrap(), 30)
        .await
        .unwrap();
    let (appt, _) = h.engine.schedule(booking(Some(slot.id)), None).await.unwrap();

    let update = h
        .engine
        .apply_action(&appt, &Action::Cancel {
            reason: ReasonCode::NoShowUp,
            note: None,
            keep_availability_on_cancel: false,
        }, 1)
        .await
        .unwrap();
    assert_eq!(update.slot, SlotDisposition::Released);
    assert_eq!(h.store.load_by_id(appt.id).await.unwrap().availability_id, None);

    let (other, _) = h.engine.schedule(booking(Some(slot.id)), None).await.unwrap();
    let reactivated = h.engine.apply_action(&update.appointment, &Action::Reactivate, 1).await.unwrap();
    let canceled = h
        .engine
        .apply_action(&reactivated.appointment, &Action::Cancel {
            reason: ReasonCode::Other,
            note: None,
            keep_availability_on_cancel: false,
        }, 1)
        .await
        .unwrap();

    assert_eq!(canceled.slot, SlotDisposition::Untouched);
    assert!(h.pool.slot(slot.id).await.unwrap().unwrap().reserved);
    assert_eq!(h.store.load_by_id(other.id).await.unwrap().availability_id, Some(slot.id));
}

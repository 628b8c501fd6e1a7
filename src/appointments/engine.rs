use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use super::action::{Action, Reschedule};
use super::errors::{StoreError, WorkflowError};
use super::gate::AuthorizedAppointment;
use super::traits::{AppointmentStore, AvailabilityPool, HistoryStore};
use super::transitions::{self, Outcome};
use super::types::*;
use crate::telemetry::{create_workflow_span, generate_correlation_id};

/// Opaque per-appointment credential handed to the patient.
pub fn generate_token() -> String {
    Uuid::new_v4().simple().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowSettings {
    /// Extra attempts `apply_action_by_id` makes after losing an optimistic check.
    pub conflict_retry_attempts: u32,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            conflict_retry_attempts: 2,
        }
    }
}

impl From<&crate::config::WorkflowConfig> for WorkflowSettings {
    fn from(config: &crate::config::WorkflowConfig) -> Self {
        Self {
            conflict_retry_attempts: config.conflict_retry_attempts,
        }
    }
}

/// Validates actions against the transition table and commits them together
/// with their history, reason and rescheduling records.
pub struct WorkflowEngine<S, P> {
    store: Arc<S>,
    pool: Arc<P>,
    settings: WorkflowSettings,
}

impl<S, P> WorkflowEngine<S, P>
where
    S: AppointmentStore + HistoryStore,
    P: AvailabilityPool,
{
    pub fn new(store: Arc<S>, pool: Arc<P>) -> Self {
        Self::with_settings(store, pool, WorkflowSettings::default())
    }

    pub fn with_settings(store: Arc<S>, pool: Arc<P>, settings: WorkflowSettings) -> Self {
        Self {
            store,
            pool,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Creates an appointment in `SCHEDULE`, consuming its availability slot.
    pub async fn schedule(
        &self,
        new: NewAppointment,
        actor: Option<ActorId>,
    ) -> Result<(Appointment, StatusHistoryEntry), WorkflowError> {
        if new.duration_minutes == 0 {
            return Err(WorkflowError::Validation(
                "duration must be at least one minute".to_string(),
            ));
        }

        let slot = new.availability_id;
        if let Some(slot) = slot {
            self.pool.reserve(slot).await.map_err(slot_error)?;
        }

        let history = NewHistoryEntry {
            appointment_id: 0,
            previous_status: None,
            new_status: AppointmentStatus::Schedule,
            action: ActionType::Schedule,
            actor_id: actor,
            timestamp: Utc::now(),
        };

        match self.store.insert(new, generate_token(), history).await {
            Ok((appointment, entry)) => {
                info!(
                    appointment_id = appointment.id,
                    doctor_id = appointment.doctor_id,
                    patient_id = appointment.patient_id,
                    availability_id = ?appointment.availability_id,
                    "Appointment scheduled"
                );
                Ok((appointment, entry))
            }
            Err(e) => {
                if let Some(slot) = slot {
                    self.release_quietly(slot).await;
                }
                Err(e.into())
            }
        }
    }

    /// Applies `action` to the `appointment` snapshot on behalf of a staff member.
    ///
    /// The snapshot's status and version are the expected prior state of the
    /// write; a stale snapshot fails with `Conflict`.
    pub async fn apply_action(
        &self,
        appointment: &Appointment,
        action: &Action,
        actor: ActorId,
    ) -> Result<AppointmentUpdate, WorkflowError> {
        let span = create_workflow_span(
            "apply_action",
            appointment.id,
            action.action_type(),
            &generate_correlation_id(),
        );
        self.execute(appointment, action, Some(actor))
            .instrument(span)
            .await
    }

    /// Applies `action` for a patient whose token was already verified.
    pub async fn apply_public_action(
        &self,
        authorized: &AuthorizedAppointment,
        action: &Action,
    ) -> Result<AppointmentUpdate, WorkflowError> {
        let span = create_workflow_span(
            "apply_public_action",
            authorized.appointment().id,
            action.action_type(),
            &generate_correlation_id(),
        );
        self.execute(authorized.appointment(), action, None)
            .instrument(span)
            .await
    }

    /// Loads the appointment and applies `action`, re-reading and retrying
    /// when a concurrent writer wins the optimistic check.
    pub async fn apply_action_by_id(
        &self,
        id: AppointmentId,
        action: &Action,
        actor: ActorId,
    ) -> Result<AppointmentUpdate, WorkflowError> {
        let span = create_workflow_span(
            "apply_action_by_id",
            id,
            action.action_type(),
            &generate_correlation_id(),
        );
        self.apply_with_retry(id, action, actor)
            .instrument(span)
            .await
    }

    async fn apply_with_retry(
        &self,
        id: AppointmentId,
        action: &Action,
        actor: ActorId,
    ) -> Result<AppointmentUpdate, WorkflowError> {
        let mut attempt = 0;
        loop {
            let snapshot = self.store.load_by_id(id).await?;
            match self.execute(&snapshot, action, Some(actor)).await {
                Err(e) if e.is_retryable() && attempt < self.settings.conflict_retry_attempts => {
                    attempt += 1;
                    warn!(appointment_id = id, attempt, "Concurrent update detected, retrying");
                }
                result => return result,
            }
        }
    }

    pub async fn get(&self, id: AppointmentId) -> Result<Appointment, WorkflowError> {
        Ok(self.store.load_by_id(id).await?)
    }

    pub async fn history(&self, id: AppointmentId) -> Result<Vec<StatusHistoryEntry>, WorkflowError> {
        self.store.load_by_id(id).await?;
        Ok(self.store.history(id).await?)
    }

    pub async fn reasons(&self, id: AppointmentId) -> Result<Vec<ReasonRecord>, WorkflowError> {
        self.store.load_by_id(id).await?;
        Ok(self.store.reasons(id).await?)
    }

    pub async fn list(
        &self,
        filter: &AppointmentFilter,
        page: Pagination,
    ) -> Result<Page<Appointment>, WorkflowError> {
        debug!(?filter, page = page.page(), per_page = page.per_page(), "Listing appointments");
        Ok(self.store.list(filter, page).await?)
    }

    pub async fn allowed_actions(&self, id: AppointmentId) -> Result<Vec<ActionType>, WorkflowError> {
        let appointment = self.store.load_by_id(id).await?;
        Ok(transitions::allowed_actions(appointment.status))
    }

    async fn execute(
        &self,
        snapshot: &Appointment,
        action: &Action,
        actor: Option<ActorId>,
    ) -> Result<AppointmentUpdate, WorkflowError> {
        let action_type = action.action_type();
        let from = snapshot.status;

        let outcome = transitions::lookup(from, action_type).ok_or_else(|| {
            warn!(
                appointment_id = snapshot.id,
                status = %from,
                action = %action_type,
                "Rejected invalid transition"
            );
            WorkflowError::InvalidTransition {
                status: from,
                action: action_type,
            }
        })?;

        let now = Utc::now();
        let mut changes = AppointmentChanges::from_snapshot(snapshot, now);
        changes.status = outcome.resulting_status(from);

        let mut successor = None;
        match action {
            Action::ChangeDate {
                scheduled_date,
                duration_minutes,
            } => {
                changes.scheduled_date = *scheduled_date;
                if let Some(minutes) = duration_minutes {
                    changes.duration_minutes = positive_duration(*minutes)?;
                }
            }
            Action::ChangeDoctor { doctor_id } => {
                if *doctor_id == snapshot.doctor_id {
                    return Err(WorkflowError::Validation(format!(
                        "appointment {} is already with doctor {doctor_id}",
                        snapshot.id
                    )));
                }
                changes.doctor_id = *doctor_id;
            }
            Action::ChangeApptType { appointment_type } => {
                let label = appointment_type.trim();
                if label.is_empty() {
                    return Err(WorkflowError::Validation(
                        "appointment type must not be empty".to_string(),
                    ));
                }
                changes.appointment_type = Some(label.to_string());
            }
            Action::RescheduleAppt(request) => {
                debug_assert_eq!(outcome, Outcome::Reschedule);
                successor = Some(successor_for(snapshot, request)?);
            }
            _ => {}
        }

        let reason = action.reason().map(|(reason, note)| ReasonRecord {
            appointment_id: snapshot.id,
            action: action_type,
            reason,
            note: note.map(str::to_string),
            actor_id: actor,
            created_at: now,
        });

        let history = NewHistoryEntry {
            appointment_id: snapshot.id,
            previous_status: Some(from),
            new_status: changes.status,
            action: action_type,
            actor_id: actor,
            timestamp: now,
        };

        // A reschedule onto the slot the source already holds moves it instead
        // of reserving it again.
        let new_slot = successor
            .as_ref()
            .and_then(|s: &Successor| s.appointment.availability_id);
        let slot_moves = new_slot.is_some() && new_slot == snapshot.availability_id;
        let reserved = match new_slot {
            Some(slot) if !slot_moves => {
                self.pool.reserve(slot).await.map_err(slot_error)?;
                Some(slot)
            }
            _ => None,
        };

        // An appointment only keeps its slot id while it still holds the slot.
        if changes.status == AppointmentStatus::Cancel && (slot_moves || !action.keeps_availability()) {
            changes.availability_id = None;
        }

        let mutation = AppointmentMutation {
            changes,
            history,
            reason,
            successor,
        };

        let committed = match self
            .store
            .update_atomically(snapshot.id, snapshot.expected_state(), mutation)
            .await
        {
            Ok(committed) => committed,
            Err(e) => {
                if let Some(slot) = reserved {
                    self.release_quietly(slot).await;
                }
                let e = WorkflowError::from(e);
                if e.is_retryable() {
                    debug!(appointment_id = snapshot.id, "Optimistic check lost");
                } else {
                    warn!(appointment_id = snapshot.id, error = %e, "Failed to commit action");
                }
                return Err(e);
            }
        };

        let slot = if slot_moves {
            SlotDisposition::Retained
        } else {
            self.settle_source_slot(snapshot, action, committed.appointment.status)
                .await
        };

        info!(
            appointment_id = snapshot.id,
            action = %action_type,
            from = %from,
            to = %committed.appointment.status,
            actor_id = ?actor,
            successor_id = ?committed.successor.as_ref().map(|s| s.id),
            "Appointment action applied"
        );

        Ok(AppointmentUpdate {
            appointment: committed.appointment,
            history: committed.history,
            reason: committed.reason,
            rescheduled_to: committed.successor,
            slot,
        })
    }

    /// Releases or retains the source slot once the appointment left the pipeline.
    async fn settle_source_slot(
        &self,
        snapshot: &Appointment,
        action: &Action,
        new_status: AppointmentStatus,
    ) -> SlotDisposition {
        let Some(slot) = snapshot.availability_id else {
            return SlotDisposition::Untouched;
        };
        if new_status != AppointmentStatus::Cancel {
            return SlotDisposition::Untouched;
        }

        let (result, disposition) = if action.keeps_availability() {
            (self.pool.retain(slot).await, SlotDisposition::Retained)
        } else {
            (self.pool.release(slot).await, SlotDisposition::Released)
        };

        match result {
            Ok(()) => disposition,
            Err(e) => {
                warn!(
                    appointment_id = snapshot.id,
                    availability_id = slot,
                    error = %e,
                    "Availability update failed after commit"
                );
                SlotDisposition::Failed
            }
        }
    }

    async fn release_quietly(&self, slot: AvailabilityId) {
        if let Err(e) = self.pool.release(slot).await {
            warn!(availability_id = slot, error = %e, "Failed to release reserved slot");
        }
    }
}

fn positive_duration(minutes: u32) -> Result<u32, WorkflowError> {
    if minutes == 0 {
        return Err(WorkflowError::Validation(
            "duration must be at least one minute".to_string(),
        ));
    }
    Ok(minutes)
}

fn successor_for(source: &Appointment, request: &Reschedule) -> Result<Successor, WorkflowError> {
    let duration_minutes = match request.duration_minutes {
        Some(minutes) => positive_duration(minutes)?,
        None => source.duration_minutes,
    };

    Ok(Successor {
        appointment: NewAppointment {
            doctor_id: request.doctor_id.unwrap_or(source.doctor_id),
            patient_id: source.patient_id,
            clinic_id: source.clinic_id,
            scheduled_date: request.scheduled_date,
            duration_minutes,
            appointment_type: source.appointment_type.clone(),
            previous_appointment_id: Some(source.id),
            availability_id: request.availability_id,
            request_id: source.request_id,
        },
        token: generate_token(),
    })
}

fn slot_error(err: StoreError) -> WorkflowError {
    match err {
        StoreError::Conflict { id, .. } => {
            WorkflowError::Validation(format!("availability slot {id} is already reserved"))
        }
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appointments::memory::{InMemoryAvailabilityPool, InMemoryStore};
    use crate::appointments::types::ReasonCode;
    use chrono::{Duration, TimeZone};

    fn engine() -> WorkflowEngine<InMemoryStore, InMemoryAvailabilityPool> {
        WorkflowEngine::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryAvailabilityPool::new()),
        )
    }

    fn new_appointment() -> NewAppointment {
        NewAppointment {
            doctor_id: 3,
            patient_id: 4,
            clinic_id: 5,
            scheduled_date: Utc.with_ymd_and_hms(2026, 11, 3, 14, 0, 0).unwrap(),
            duration_minutes: 20,
            appointment_type: Some("consultation".to_string()),
            previous_appointment_id: None,
            availability_id: None,
            request_id: None,
        }
    }

    #[test]
    fn test_generated_tokens_are_unique() {
        assert_ne!(generate_token(), generate_token());
        assert_eq!(generate_token().len(), 32);
    }

    #[tokio::test]
    async fn test_schedule_rejects_zero_duration() {
        let engine = engine();
        let mut new = new_appointment();
        new.duration_minutes = 0;
        assert!(matches!(
            engine.schedule(new, Some(1)).await,
            Err(WorkflowError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_change_date_keeps_status_and_bumps_version() {
        let engine = engine();
        let (appt, _) = engine.schedule(new_appointment(), Some(1)).await.unwrap();
        let later = appt.scheduled_date + Duration::days(2);

        let update = engine
            .apply_action(
                &appt,
                &Action::ChangeDate {
                    scheduled_date: later,
                    duration_minutes: Some(45),
                },
                1,
            )
            .await
            .unwrap();

        assert_eq!(update.appointment.status, AppointmentStatus::Schedule);
        assert_eq!(update.appointment.scheduled_date, later);
        assert_eq!(update.appointment.duration_minutes, 45);
        assert_eq!(update.appointment.version, appt.version + 1);
        assert_eq!(update.history.previous_status, Some(AppointmentStatus::Schedule));
        assert_eq!(update.history.new_status, AppointmentStatus::Schedule);
        assert!(update.reason.is_none());
    }

    #[tokio::test]
    async fn test_change_doctor_to_same_doctor_is_rejected() {
        let engine = engine();
        let (appt, _) = engine.schedule(new_appointment(), Some(1)).await.unwrap();
        let err = engine
            .apply_action(&appt, &Action::ChangeDoctor { doctor_id: 3 }, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));
    }

    #[tokio::test]
    async fn test_cancel_records_reason_with_actor() {
        let engine = engine();
        let (appt, _) = engine.schedule(new_appointment(), Some(1)).await.unwrap();
        let update = engine
            .apply_action(
                &appt,
                &Action::Cancel {
                    reason: ReasonCode::DoctorUnavailable,
                    note: Some("conference".to_string()),
                    keep_availability_on_cancel: false,
                },
                9,
            )
            .await
            .unwrap();

        let reason = update.reason.unwrap();
        assert_eq!(reason.reason, ReasonCode::DoctorUnavailable);
        assert_eq!(reason.note.as_deref(), Some("conference"));
        assert_eq!(reason.actor_id, Some(9));
        assert_eq!(update.slot, SlotDisposition::Untouched);
    }

    #[tokio::test]
    async fn test_apply_by_id_reports_missing_appointment() {
        let engine = engine();
        let err = engine
            .apply_action_by_id(404, &Action::Confirm1, 1)
            .await
            .unwrap_err();
        assert_eq!(err, WorkflowError::appointment_not_found(404));
    }
}

// In-memory collaborators - used by tests and by embedders without a database

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use super::errors::StoreError;
use super::traits::{AppointmentStore, AvailabilityPool, HistoryStore};
use super::types::*;

#[derive(Debug, Default)]
struct Tables {
    appointments: HashMap<AppointmentId, Appointment>,
    history: Vec<StatusHistoryEntry>,
    reasons: Vec<ReasonRecord>,
    next_appointment_id: AppointmentId,
    next_history_id: i64,
}

impl Tables {
    fn push_history(&mut self, entry: NewHistoryEntry) -> StatusHistoryEntry {
        self.next_history_id += 1;
        let stored = StatusHistoryEntry {
            id: self.next_history_id,
            appointment_id: entry.appointment_id,
            previous_status: entry.previous_status,
            new_status: entry.new_status,
            action: entry.action,
            actor_id: entry.actor_id,
            timestamp: entry.timestamp,
        };
        self.history.push(stored.clone());
        stored
    }

    fn push_appointment(&mut self, new: NewAppointment, token: String, at: DateTime<Utc>) -> Appointment {
        self.next_appointment_id += 1;
        let appointment = Appointment {
            id: self.next_appointment_id,
            status: AppointmentStatus::Schedule,
            doctor_id: new.doctor_id,
            patient_id: new.patient_id,
            clinic_id: new.clinic_id,
            scheduled_date: new.scheduled_date,
            duration_minutes: new.duration_minutes,
            appointment_type: new.appointment_type,
            previous_appointment_id: new.previous_appointment_id,
            availability_id: new.availability_id,
            request_id: new.request_id,
            token,
            version: 0,
            created_at: at,
            updated_at: at,
        };
        self.appointments.insert(appointment.id, appointment.clone());
        appointment
    }
}

/// Appointment, history and reason tables behind a single lock, so one
/// mutation is observed entirely or not at all.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    fail_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail with a backend error.
    pub fn set_write_failure(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("simulated write failure".to_string()));
        }
        Ok(())
    }
}

fn not_found(id: AppointmentId) -> StoreError {
    StoreError::NotFound {
        entity: "appointment",
        id,
    }
}

#[async_trait]
impl AppointmentStore for InMemoryStore {
    async fn load_by_id(&self, id: AppointmentId) -> Result<Appointment, StoreError> {
        let tables = self.tables.lock().await;
        tables.appointments.get(&id).cloned().ok_or_else(|| not_found(id))
    }

    async fn insert(
        &self,
        new: NewAppointment,
        token: String,
        mut history: NewHistoryEntry,
    ) -> Result<(Appointment, StatusHistoryEntry), StoreError> {
        self.check_writable()?;
        let mut tables = self.tables.lock().await;
        let appointment = tables.push_appointment(new, token, history.timestamp);
        history.appointment_id = appointment.id;
        let entry = tables.push_history(history);
        Ok((appointment, entry))
    }

    async fn update_atomically(
        &self,
        id: AppointmentId,
        expected: ExpectedState,
        mutation: AppointmentMutation,
    ) -> Result<CommittedMutation, StoreError> {
        let mut tables = self.tables.lock().await;

        let current = tables.appointments.get(&id).ok_or_else(|| not_found(id))?;
        if current.status != expected.status || current.version != expected.version {
            return Err(StoreError::Conflict {
                entity: "appointment",
                id,
            });
        }
        self.check_writable()?;

        let AppointmentMutation {
            changes,
            history,
            reason,
            successor,
        } = mutation;

        let mut updated = current.clone();
        updated.status = changes.status;
        updated.doctor_id = changes.doctor_id;
        updated.scheduled_date = changes.scheduled_date;
        updated.duration_minutes = changes.duration_minutes;
        updated.appointment_type = changes.appointment_type;
        updated.availability_id = changes.availability_id;
        updated.updated_at = changes.updated_at;
        updated.version += 1;
        tables.appointments.insert(id, updated.clone());

        let history = tables.push_history(history);

        if let Some(ref reason) = reason {
            tables.reasons.push(reason.clone());
        }

        let successor = successor.map(|successor| {
            let at = changes.updated_at;
            let appointment = tables.push_appointment(successor.appointment, successor.token, at);
            tables.push_history(NewHistoryEntry {
                appointment_id: appointment.id,
                previous_status: None,
                new_status: AppointmentStatus::Schedule,
                action: ActionType::RescheduleAppt,
                actor_id: history.actor_id,
                timestamp: at,
            });
            appointment
        });

        Ok(CommittedMutation {
            appointment: updated,
            history,
            reason,
            successor,
        })
    }

    async fn list(
        &self,
        filter: &AppointmentFilter,
        page: Pagination,
    ) -> Result<Page<Appointment>, StoreError> {
        let tables = self.tables.lock().await;
        let mut matching: Vec<&Appointment> = tables
            .appointments
            .values()
            .filter(|a| filter.matches(a))
            .collect();
        matching.sort_by_key(|a| (a.scheduled_date, a.id));

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.per_page() as usize)
            .cloned()
            .collect();

        Ok(Page {
            items,
            total,
            page: page.page(),
            per_page: page.per_page(),
        })
    }

    async fn reasons(&self, id: AppointmentId) -> Result<Vec<ReasonRecord>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .reasons
            .iter()
            .filter(|r| r.appointment_id == id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl HistoryStore for InMemoryStore {
    async fn append(&self, entry: NewHistoryEntry) -> Result<StatusHistoryEntry, StoreError> {
        self.check_writable()?;
        let mut tables = self.tables.lock().await;
        if !tables.appointments.contains_key(&entry.appointment_id) {
            return Err(not_found(entry.appointment_id));
        }
        Ok(tables.push_history(entry))
    }

    async fn history(
        &self,
        appointment_id: AppointmentId,
    ) -> Result<Vec<StatusHistoryEntry>, StoreError> {
        let tables = self.tables.lock().await;
        let mut entries: Vec<_> = tables
            .history
            .iter()
            .filter(|e| e.appointment_id == appointment_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| (e.timestamp, e.id));
        Ok(entries)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryAvailabilityPool {
    slots: Mutex<HashMap<AvailabilityId, AvailabilitySlot>>,
}

impl InMemoryAvailabilityPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_slot(&self, slot: AvailabilitySlot) {
        self.slots.lock().await.insert(slot.id, slot);
    }

    pub async fn slot(&self, id: AvailabilityId) -> Option<AvailabilitySlot> {
        self.slots.lock().await.get(&id).cloned()
    }
}

fn slot_not_found(id: AvailabilityId) -> StoreError {
    StoreError::NotFound {
        entity: "availability",
        id,
    }
}

#[async_trait]
impl AvailabilityPool for InMemoryAvailabilityPool {
    async fn reserve(&self, id: AvailabilityId) -> Result<(), StoreError> {
        let mut slots = self.slots.lock().await;
        let slot = slots.get_mut(&id).ok_or_else(|| slot_not_found(id))?;
        if slot.reserved {
            return Err(StoreError::Conflict {
                entity: "availability",
                id,
            });
        }
        slot.reserved = true;
        Ok(())
    }

    async fn release(&self, id: AvailabilityId) -> Result<(), StoreError> {
        let mut slots = self.slots.lock().await;
        let slot = slots.get_mut(&id).ok_or_else(|| slot_not_found(id))?;
        slot.reserved = false;
        Ok(())
    }

    async fn retain(&self, id: AvailabilityId) -> Result<(), StoreError> {
        let slots = self.slots.lock().await;
        slots.get(&id).map(|_| ()).ok_or_else(|| slot_not_found(id))
    }
}

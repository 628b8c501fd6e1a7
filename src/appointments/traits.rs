// Collaborator interfaces consumed by the workflow engine

use async_trait::async_trait;

use super::errors::{StoreError, WorkflowError};
use super::types::*;

#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn load_by_id(&self, id: AppointmentId) -> Result<Appointment, StoreError>;

    /// Inserts a new appointment together with its creation history entry.
    async fn insert(
        &self,
        new: NewAppointment,
        token: String,
        history: NewHistoryEntry,
    ) -> Result<(Appointment, StatusHistoryEntry), StoreError>;

    /// Applies `mutation` only if the stored row still matches `expected`.
    ///
    /// The status change, history entry, reason record and successor are
    /// written together or not at all. A row whose status or version moved
    /// on yields `StoreError::Conflict`.
    async fn update_atomically(
        &self,
        id: AppointmentId,
        expected: ExpectedState,
        mutation: AppointmentMutation,
    ) -> Result<CommittedMutation, StoreError>;

    async fn list(
        &self,
        filter: &AppointmentFilter,
        page: Pagination,
    ) -> Result<Page<Appointment>, StoreError>;

    async fn reasons(&self, id: AppointmentId) -> Result<Vec<ReasonRecord>, StoreError>;
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, entry: NewHistoryEntry) -> Result<StatusHistoryEntry, StoreError>;

    async fn history(&self, appointment_id: AppointmentId)
        -> Result<Vec<StatusHistoryEntry>, StoreError>;
}

#[async_trait]
pub trait AvailabilityPool: Send + Sync {
    /// Marks the slot as consumed. Reserving an already reserved slot conflicts.
    async fn reserve(&self, id: AvailabilityId) -> Result<(), StoreError>;

    /// Returns the slot to the pool.
    async fn release(&self, id: AvailabilityId) -> Result<(), StoreError>;

    /// Keeps the slot reserved after the appointment holding it is canceled.
    async fn retain(&self, id: AvailabilityId) -> Result<(), StoreError>;
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Returns the appointment the token grants access to.
    async fn verify(
        &self,
        token: &str,
        appointment_id: AppointmentId,
    ) -> Result<Appointment, WorkflowError>;
}

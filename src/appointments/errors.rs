use thiserror::Error;

use super::types::{ActionType, AppointmentId, AppointmentStatus};

/// Errors returned to callers of the workflow engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("action {action} is not permitted while appointment is {status}")]
    InvalidTransition {
        status: AppointmentStatus,
        action: ActionType,
    },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("appointment token does not grant access to this appointment")]
    Unauthorized,

    #[error("appointment {appointment_id} was modified concurrently")]
    Conflict { appointment_id: AppointmentId },

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl WorkflowError {
    pub fn appointment_not_found(id: AppointmentId) -> Self {
        WorkflowError::NotFound {
            entity: "appointment",
            id,
        }
    }

    /// Only a lost optimistic check is worth re-reading and trying again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkflowError::Conflict { .. })
    }

    /// HTTP status an API layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            WorkflowError::NotFound { .. } => 404,
            WorkflowError::InvalidTransition { .. } => 409,
            WorkflowError::Validation(_) => 422,
            WorkflowError::Unauthorized => 401,
            WorkflowError::Conflict { .. } => 409,
            WorkflowError::Persistence(_) => 500,
        }
    }
}

/// Errors reported by store and pool implementations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("{entity} {id} changed since it was read")]
    Conflict { entity: &'static str, id: i64 },

    #[error("backend failure: {0}")]
    Backend(String),
}

impl From<StoreError> for WorkflowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => WorkflowError::NotFound { entity, id },
            StoreError::Conflict { id, .. } => WorkflowError::Conflict { appointment_id: id },
            StoreError::Backend(msg) => WorkflowError::Persistence(msg),
        }
    }
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for StoreError {
    /// Missing rows are detected with `fetch_optional` by the callers, so
    /// anything reaching this conversion is a backend failure.
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

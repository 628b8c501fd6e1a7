// Public (token authenticated) access to appointments
//
// Patients act on an appointment with the token they were sent instead of a
// staff identity. The token is checked once here and the engine only ever
// sees the resulting `AuthorizedAppointment`.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use super::errors::{StoreError, WorkflowError};
use super::traits::{AppointmentStore, TokenVerifier};
use super::types::{Appointment, AppointmentId};

/// An appointment whose token has been verified. Only the gate creates these.
#[derive(Debug, Clone)]
pub struct AuthorizedAppointment {
    appointment: Appointment,
}

impl AuthorizedAppointment {
    pub fn appointment(&self) -> &Appointment {
        &self.appointment
    }
}

/// Verifies tokens against the token stored on the appointment row.
pub struct StoreTokenVerifier<S> {
    store: Arc<S>,
}

impl<S> StoreTokenVerifier<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: AppointmentStore> TokenVerifier for StoreTokenVerifier<S> {
    async fn verify(
        &self,
        token: &str,
        appointment_id: AppointmentId,
    ) -> Result<Appointment, WorkflowError> {
        // An unknown appointment answers the same as a wrong token.
        let appointment = match self.store.load_by_id(appointment_id).await {
            Ok(appointment) => appointment,
            Err(StoreError::NotFound { .. }) => return Err(WorkflowError::Unauthorized),
            Err(e) => return Err(e.into()),
        };

        if appointment.token != token {
            return Err(WorkflowError::Unauthorized);
        }
        Ok(appointment)
    }
}

pub struct PublicActionGate<V> {
    verifier: V,
}

impl<V: TokenVerifier> PublicActionGate<V> {
    pub fn new(verifier: V) -> Self {
        Self { verifier }
    }

    pub async fn authorize(
        &self,
        token: &str,
        appointment_id: AppointmentId,
    ) -> Result<AuthorizedAppointment, WorkflowError> {
        let token = token.trim();
        if token.is_empty() {
            warn!(appointment_id, "Public action without token");
            return Err(WorkflowError::Unauthorized);
        }

        match self.verifier.verify(token, appointment_id).await {
            Ok(appointment) => Ok(AuthorizedAppointment { appointment }),
            Err(e) => {
                warn!(appointment_id, error = %e, "Public action token rejected");
                Err(e)
            }
        }
    }
}

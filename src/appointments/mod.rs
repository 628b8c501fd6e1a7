// Appointment workflow - status transitions, audit trail and public access
//
// The engine is generic over its collaborators so the same rules run against
// the in-memory stores in tests and SQLite in the binary.

pub mod action;
pub mod engine;
pub mod errors;
pub mod gate;
pub mod memory;
#[cfg(feature = "database")]
pub mod sqlite;
pub mod traits;
pub mod transitions;
pub mod types;

pub use action::{Action, ActionRequest, Reschedule};
pub use engine::{generate_token, WorkflowEngine, WorkflowSettings};
pub use errors::{StoreError, WorkflowError};
pub use gate::{AuthorizedAppointment, PublicActionGate, StoreTokenVerifier};
pub use memory::{InMemoryAvailabilityPool, InMemoryStore};
#[cfg(feature = "database")]
pub use sqlite::{SqliteAppointmentStore, SqliteAvailabilityPool};
pub use traits::{AppointmentStore, AvailabilityPool, HistoryStore, TokenVerifier};
pub use transitions::{allowed_actions, lookup, Outcome};
pub use types::*;

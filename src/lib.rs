// Clinic Appointments Library - appointment workflow engine
// This exposes the core components for testing and integration

pub mod appointments;
pub mod config;
pub mod database;
pub mod telemetry;

// Re-export key types for easy access
pub use appointments::{
    Action,
    ActionRequest,
    ActionType,
    Appointment,
    AppointmentStatus,
    AppointmentUpdate,
    PublicActionGate,
    ReasonCode,
    WorkflowEngine,
    WorkflowError,
};
pub use config::{ClinicConfig, config, init_config};
#[cfg(feature = "database")]
pub use database::DatabaseManager;
pub use telemetry::{init_telemetry, shutdown_telemetry, generate_correlation_id, create_workflow_span};

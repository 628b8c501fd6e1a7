use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::sync::Arc;

use clinic_appointments::appointments::{
    Action, ActionRequest, AppointmentFilter, AppointmentStatus, NewAppointment, Pagination,
    PublicActionGate, SqliteAppointmentStore, SqliteAvailabilityPool, StoreTokenVerifier,
    WorkflowEngine, WorkflowError, WorkflowSettings,
};
use clinic_appointments::{config, init_telemetry, shutdown_telemetry, DatabaseManager};

type Engine = WorkflowEngine<SqliteAppointmentStore, SqliteAvailabilityPool>;

#[derive(Parser)]
#[command(name = "clinic-appointments")]
#[command(about = "Appointment scheduling and status workflow for clinics")]
#[command(long_about = "Schedules appointments against availability slots and moves them through \
                       the visit workflow (confirm, check-in, release, cancel, reschedule), \
                       keeping an append-only status history.")]
struct Cli {
    /// Override the configured database URL
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Migrate,
    /// Publish an availability slot for a doctor
    AddSlot {
        #[arg(long)]
        doctor: i64,
        #[arg(long)]
        clinic: i64,
        /// Slot start (RFC 3339)
        #[arg(long)]
        start: DateTime<Utc>,
        #[arg(long, default_value = "30")]
        duration: u32,
    },
    /// Schedule a new appointment
    Schedule {
        #[arg(long)]
        doctor: i64,
        #[arg(long)]
        patient: i64,
        #[arg(long)]
        clinic: i64,
        /// Appointment start (RFC 3339)
        #[arg(long)]
        date: DateTime<Utc>,
        /// Duration in minutes (defaults to the configured duration)
        #[arg(long)]
        duration: Option<u32>,
        #[arg(long = "type")]
        appointment_type: Option<String>,
        /// Availability slot consumed by the appointment
        #[arg(long)]
        slot: Option<i64>,
        /// Originating appointment request
        #[arg(long)]
        request: Option<i64>,
        #[arg(long)]
        actor: Option<i64>,
    },
    /// Apply a workflow action as a staff member
    Apply {
        id: i64,
        #[command(flatten)]
        action: ActionArgs,
        #[arg(long)]
        actor: i64,
    },
    /// Apply a workflow action with a patient's appointment token
    PublicApply {
        id: i64,
        #[command(flatten)]
        action: ActionArgs,
        #[arg(long)]
        token: String,
    },
    /// Show one appointment
    Show { id: i64 },
    /// Show the status history of an appointment
    History { id: i64 },
    /// Show cancellation and rescheduling reasons of an appointment
    Reasons { id: i64 },
    /// List the actions allowed for an appointment right now
    Actions { id: i64 },
    /// List appointments
    List {
        #[arg(long)]
        doctor: Option<i64>,
        #[arg(long)]
        patient: Option<i64>,
        #[arg(long)]
        clinic: Option<i64>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value = "1")]
        page: u32,
        #[arg(long, default_value = "20")]
        per_page: u32,
    },
}

#[derive(Args)]
struct ActionArgs {
    /// Action name, e.g. CONFIRM1, CHECK_IN, CANCEL, RESCHEDULE_APPT
    action: String,
    #[arg(long)]
    reason: Option<String>,
    #[arg(long)]
    note: Option<String>,
    /// New date for CHANGE_DATE / RESCHEDULE_APPT (RFC 3339)
    #[arg(long)]
    date: Option<DateTime<Utc>>,
    #[arg(long)]
    duration: Option<u32>,
    #[arg(long)]
    doctor: Option<i64>,
    #[arg(long = "type")]
    appointment_type: Option<String>,
    /// Availability slot for the rescheduled appointment
    #[arg(long)]
    slot: Option<i64>,
    /// Keep the original slot reserved instead of releasing it
    #[arg(long)]
    keep_slot: bool,
}

impl ActionArgs {
    fn into_action(self) -> Result<Action, WorkflowError> {
        Action::try_from(ActionRequest {
            action: self.action,
            reason_code: self.reason,
            note: self.note,
            scheduled_date: self.date,
            duration_minutes: self.duration,
            doctor_id: self.doctor,
            appointment_type: self.appointment_type,
            availability_id: self.slot,
            keep_availability_on_cancel: self.keep_slot,
        })
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = config()?;
    init_telemetry(&settings.observability)?;

    let result = tokio::runtime::Runtime::new()?.block_on(async { run(cli).await });

    shutdown_telemetry();
    result
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Attach the HTTP-style status so scripted callers can branch on it.
fn workflow_failure(err: WorkflowError) -> anyhow::Error {
    let status = err.status_code();
    anyhow::Error::new(err).context(format!("request failed with status {status}"))
}

async fn run(cli: Cli) -> Result<()> {
    let settings = config()?;

    let mut db_config = settings
        .database
        .clone()
        .context("No database configured; set [database] in clinic.toml or CLINIC_DATABASE__URL")?;
    if let Some(url) = cli.database_url {
        db_config.url = url;
    }

    let database = DatabaseManager::from_config(&db_config).await?;
    if let Commands::Migrate = cli.command {
        if !db_config.auto_migrate {
            database.migrate().await?;
        }
        println!("Database schema is up to date");
        database.shutdown().await;
        return Ok(());
    }

    let store = Arc::new(SqliteAppointmentStore::new(database.pool().clone()));
    let pool = Arc::new(SqliteAvailabilityPool::new(database.pool().clone()));
    let engine: Engine = WorkflowEngine::with_settings(
        store.clone(),
        pool.clone(),
        WorkflowSettings::from(&settings.workflow),
    );

    let outcome = dispatch(cli.command, &engine, store, &pool, settings).await;
    database.shutdown().await;
    outcome
}

async fn dispatch(
    command: Commands,
    engine: &Engine,
    store: Arc<SqliteAppointmentStore>,
    pool: &SqliteAvailabilityPool,
    settings: &clinic_appointments::ClinicConfig,
) -> Result<()> {
    match command {
        Commands::Migrate => Ok(()),
        Commands::AddSlot {
            doctor,
            clinic,
            start,
            duration,
        } => {
            let slot = pool
                .create_slot(doctor, clinic, start, duration)
                .await
                .map_err(|e| workflow_failure(e.into()))?;
            print_json(&slot)
        }
        Commands::Schedule {
            doctor,
            patient,
            clinic,
            date,
            duration,
            appointment_type,
            slot,
            request,
            actor,
        } => {
            let new = NewAppointment {
                doctor_id: doctor,
                patient_id: patient,
                clinic_id: clinic,
                scheduled_date: date,
                duration_minutes: duration.unwrap_or(settings.workflow.default_duration_minutes),
                appointment_type,
                previous_appointment_id: None,
                availability_id: slot,
                request_id: request,
            };
            let (appointment, history) = engine.schedule(new, actor).await.map_err(workflow_failure)?;
            print_json(&serde_json::json!({
                "appointment": appointment,
                "token": appointment.token,
                "history": history,
            }))
        }
        Commands::Apply { id, action, actor } => {
            let action = action.into_action().map_err(workflow_failure)?;
            let update = engine
                .apply_action_by_id(id, &action, actor)
                .await
                .map_err(workflow_failure)?;
            print_json(&update)
        }
        Commands::PublicApply { id, action, token } => {
            let action = action.into_action().map_err(workflow_failure)?;
            let gate = PublicActionGate::new(StoreTokenVerifier::new(store));
            let authorized = gate.authorize(&token, id).await.map_err(workflow_failure)?;
            let update = engine
                .apply_public_action(&authorized, &action)
                .await
                .map_err(workflow_failure)?;
            print_json(&update)
        }
        Commands::Show { id } => print_json(&engine.get(id).await.map_err(workflow_failure)?),
        Commands::History { id } => print_json(&engine.history(id).await.map_err(workflow_failure)?),
        Commands::Reasons { id } => print_json(&engine.reasons(id).await.map_err(workflow_failure)?),
        Commands::Actions { id } => {
            print_json(&engine.allowed_actions(id).await.map_err(workflow_failure)?)
        }
        Commands::List {
            doctor,
            patient,
            clinic,
            status,
            page,
            per_page,
        } => {
            let filter = AppointmentFilter {
                doctor_id: doctor,
                patient_id: patient,
                clinic_id: clinic,
                status: status
                    .as_deref()
                    .map(str::parse::<AppointmentStatus>)
                    .transpose()
                    .map_err(workflow_failure)?,
            };
            let page = Pagination::new(page, per_page).map_err(workflow_failure)?;
            print_json(&engine.list(&filter, page).await.map_err(workflow_failure)?)
        }
    }
}

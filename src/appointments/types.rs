use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::errors::WorkflowError;

pub type AppointmentId = i64;
pub type AvailabilityId = i64;
pub type ActorId = i64;

/// Appointment status. Each variant is both a pipeline stage and the name
/// of the action that moves an appointment into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Schedule,
    Confirm1,
    Confirm2,
    CheckIn,
    Ready,
    InProgress,
    ReleasePatient,
    Cancel,
    VPending,
    Reactivate,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 10] = [
        AppointmentStatus::Schedule,
        AppointmentStatus::Confirm1,
        AppointmentStatus::Confirm2,
        AppointmentStatus::CheckIn,
        AppointmentStatus::Ready,
        AppointmentStatus::InProgress,
        AppointmentStatus::ReleasePatient,
        AppointmentStatus::Cancel,
        AppointmentStatus::VPending,
        AppointmentStatus::Reactivate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Schedule => "SCHEDULE",
            AppointmentStatus::Confirm1 => "CONFIRM1",
            AppointmentStatus::Confirm2 => "CONFIRM2",
            AppointmentStatus::CheckIn => "CHECK_IN",
            AppointmentStatus::Ready => "READY",
            AppointmentStatus::InProgress => "IN_PROGRESS",
            AppointmentStatus::ReleasePatient => "RELEASE_PATIENT",
            AppointmentStatus::Cancel => "CANCEL",
            AppointmentStatus::VPending => "V_PENDING",
            AppointmentStatus::Reactivate => "REACTIVATE",
        }
    }

    /// Canceled and released appointments accept nothing but `REACTIVATE`
    /// (canceled only).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Cancel | AppointmentStatus::ReleasePatient
        )
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = normalize(s);
        AppointmentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == key)
            .ok_or_else(|| WorkflowError::Validation(format!("unknown appointment status '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    Cancel,
    ChangeDate,
    ChangeApptType,
    ChangeDoctor,
    RescheduleAppt,
    Schedule,
    Confirm1,
    Confirm2,
    CheckIn,
    Ready,
    ReleasePatient,
    InProgress,
    VPending,
    Reactivate,
    DeclineRequest,
}

impl ActionType {
    pub const ALL: [ActionType; 15] = [
        ActionType::Cancel,
        ActionType::ChangeDate,
        ActionType::ChangeApptType,
        ActionType::ChangeDoctor,
        ActionType::RescheduleAppt,
        ActionType::Schedule,
        ActionType::Confirm1,
        ActionType::Confirm2,
        ActionType::CheckIn,
        ActionType::Ready,
        ActionType::ReleasePatient,
        ActionType::InProgress,
        ActionType::VPending,
        ActionType::Reactivate,
        ActionType::DeclineRequest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Cancel => "CANCEL",
            ActionType::ChangeDate => "CHANGE_DATE",
            ActionType::ChangeApptType => "CHANGE_APPT_TYPE",
            ActionType::ChangeDoctor => "CHANGE_DOCTOR",
            ActionType::RescheduleAppt => "RESCHEDULE_APPT",
            ActionType::Schedule => "SCHEDULE",
            ActionType::Confirm1 => "CONFIRM1",
            ActionType::Confirm2 => "CONFIRM2",
            ActionType::CheckIn => "CHECK_IN",
            ActionType::Ready => "READY",
            ActionType::ReleasePatient => "RELEASE_PATIENT",
            ActionType::InProgress => "IN_PROGRESS",
            ActionType::VPending => "V_PENDING",
            ActionType::Reactivate => "REACTIVATE",
            ActionType::DeclineRequest => "DECLINE_REQUEST",
        }
    }

    pub fn requires_reason(&self) -> bool {
        matches!(
            self,
            ActionType::Cancel | ActionType::RescheduleAppt | ActionType::DeclineRequest
        )
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = normalize(s);
        ActionType::ALL
            .into_iter()
            .find(|action| action.as_str() == key)
            .ok_or_else(|| WorkflowError::Validation(format!("unknown action '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    ChangeDoctor,
    DoctorUnavailable,
    NoShowUp,
    AbortVisit,
    PatientCannotMakeIt,
    ReleasePatient,
    Other,
}

impl ReasonCode {
    pub const ALL: [ReasonCode; 7] = [
        ReasonCode::ChangeDoctor,
        ReasonCode::DoctorUnavailable,
        ReasonCode::NoShowUp,
        ReasonCode::AbortVisit,
        ReasonCode::PatientCannotMakeIt,
        ReasonCode::ReleasePatient,
        ReasonCode::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::ChangeDoctor => "CHANGE_DOCTOR",
            ReasonCode::DoctorUnavailable => "DOCTOR_UNAVAILABLE",
            ReasonCode::NoShowUp => "NO_SHOW_UP",
            ReasonCode::AbortVisit => "ABORT_VISIT",
            ReasonCode::PatientCannotMakeIt => "PATIENT_CANNOT_MAKE_IT",
            ReasonCode::ReleasePatient => "RELEASE_PATIENT",
            ReasonCode::Other => "OTHER",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReasonCode {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = normalize(s);
        ReasonCode::ALL
            .into_iter()
            .find(|reason| reason.as_str() == key)
            .ok_or_else(|| WorkflowError::Validation(format!("unknown reason code '{s}'")))
    }
}

/// Accepts `check-in`, `check_in` and `CHECK_IN` alike.
fn normalize(raw: &str) -> String {
    raw.trim().replace('-', "_").to_ascii_uppercase()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: AppointmentId,
    pub status: AppointmentStatus,
    pub doctor_id: i64,
    pub patient_id: i64,
    pub clinic_id: i64,
    pub scheduled_date: DateTime<Utc>,
    pub duration_minutes: u32,
    pub appointment_type: Option<String>,
    pub previous_appointment_id: Option<AppointmentId>,
    pub availability_id: Option<AvailabilityId>,
    pub request_id: Option<i64>,
    #[serde(skip_serializing)]
    pub token: String,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// The `(status, version)` pair a write based on this snapshot expects.
    pub fn expected_state(&self) -> ExpectedState {
        ExpectedState {
            status: self.status,
            version: self.version,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectedState {
    pub status: AppointmentStatus,
    pub version: i64,
}

/// Input for creating an appointment in the initial `SCHEDULE` state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAppointment {
    pub doctor_id: i64,
    pub patient_id: i64,
    pub clinic_id: i64,
    pub scheduled_date: DateTime<Utc>,
    pub duration_minutes: u32,
    pub appointment_type: Option<String>,
    pub previous_appointment_id: Option<AppointmentId>,
    pub availability_id: Option<AvailabilityId>,
    pub request_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub id: i64,
    pub appointment_id: AppointmentId,
    pub previous_status: Option<AppointmentStatus>,
    pub new_status: AppointmentStatus,
    pub action: ActionType,
    pub actor_id: Option<ActorId>,
    pub timestamp: DateTime<Utc>,
}

/// History entry before the store assigns it an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHistoryEntry {
    pub appointment_id: AppointmentId,
    pub previous_status: Option<AppointmentStatus>,
    pub new_status: AppointmentStatus,
    pub action: ActionType,
    pub actor_id: Option<ActorId>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasonRecord {
    pub appointment_id: AppointmentId,
    pub action: ActionType,
    pub reason: ReasonCode,
    pub note: Option<String>,
    pub actor_id: Option<ActorId>,
    pub created_at: DateTime<Utc>,
}

/// Field values written by a committed action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppointmentChanges {
    pub status: AppointmentStatus,
    pub doctor_id: i64,
    pub scheduled_date: DateTime<Utc>,
    pub duration_minutes: u32,
    pub appointment_type: Option<String>,
    pub availability_id: Option<AvailabilityId>,
    pub updated_at: DateTime<Utc>,
}

impl AppointmentChanges {
    pub fn from_snapshot(appointment: &Appointment, at: DateTime<Utc>) -> Self {
        Self {
            status: appointment.status,
            doctor_id: appointment.doctor_id,
            scheduled_date: appointment.scheduled_date,
            duration_minutes: appointment.duration_minutes,
            appointment_type: appointment.appointment_type.clone(),
            availability_id: appointment.availability_id,
            updated_at: at,
        }
    }
}

/// Everything one action writes. Stores commit all of it or none of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppointmentMutation {
    pub changes: AppointmentChanges,
    pub history: NewHistoryEntry,
    pub reason: Option<ReasonRecord>,
    pub successor: Option<Successor>,
}

/// Appointment created by a reschedule, inserted in the same write as the
/// cancellation of its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Successor {
    pub appointment: NewAppointment,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommittedMutation {
    pub appointment: Appointment,
    pub history: StatusHistoryEntry,
    pub reason: Option<ReasonRecord>,
    pub successor: Option<Appointment>,
}

/// What happened to the source availability slot after a cancel-like action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotDisposition {
    Untouched,
    Released,
    Retained,
    /// The pool call failed after the transition was committed.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppointmentUpdate {
    pub appointment: Appointment,
    pub history: StatusHistoryEntry,
    pub reason: Option<ReasonRecord>,
    pub rescheduled_to: Option<Appointment>,
    pub slot: SlotDisposition,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentFilter {
    pub doctor_id: Option<i64>,
    pub patient_id: Option<i64>,
    pub clinic_id: Option<i64>,
    pub status: Option<AppointmentStatus>,
}

impl AppointmentFilter {
    pub fn matches(&self, appointment: &Appointment) -> bool {
        self.doctor_id.map_or(true, |id| appointment.doctor_id == id)
            && self.patient_id.map_or(true, |id| appointment.patient_id == id)
            && self.clinic_id.map_or(true, |id| appointment.clinic_id == id)
            && self.status.map_or(true, |s| appointment.status == s)
    }
}

pub const MAX_PER_PAGE: u32 = 100;

/// A validated page request. Only `new` (and deserialization, which goes
/// through it) can build one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PageParams")]
pub struct Pagination {
    page: u32,
    per_page: u32,
}

#[derive(Debug, Deserialize)]
struct PageParams {
    page: u32,
    per_page: u32,
}

impl TryFrom<PageParams> for Pagination {
    type Error = WorkflowError;

    fn try_from(params: PageParams) -> Result<Self, Self::Error> {
        Pagination::new(params.page, params.per_page)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 20,
        }
    }
}

impl Pagination {
    pub fn new(page: u32, per_page: u32) -> Result<Self, WorkflowError> {
        if page == 0 {
            return Err(WorkflowError::Validation("page starts at 1".to_string()));
        }
        if per_page == 0 || per_page > MAX_PER_PAGE {
            return Err(WorkflowError::Validation(format!(
                "per_page must be between 1 and {MAX_PER_PAGE}"
            )));
        }
        Ok(Self { page, per_page })
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn per_page(&self) -> u32 {
        self.per_page
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.per_page)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilitySlot {
    pub id: AvailabilityId,
    pub doctor_id: i64,
    pub clinic_id: i64,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: u32,
    pub reserved: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_accepts_loose_spelling() {
        assert_eq!(
            "check-in".parse::<AppointmentStatus>().unwrap(),
            AppointmentStatus::CheckIn
        );
        assert_eq!(
            " v_pending ".parse::<AppointmentStatus>().unwrap(),
            AppointmentStatus::VPending
        );
        assert!("checked".parse::<AppointmentStatus>().is_err());
    }

    #[test]
    fn test_as_str_round_trips_through_from_str() {
        for action in ActionType::ALL {
            assert_eq!(action.as_str().parse::<ActionType>().unwrap(), action);
        }
        for reason in ReasonCode::ALL {
            assert_eq!(reason.as_str().parse::<ReasonCode>().unwrap(), reason);
        }
    }

    #[test]
    fn test_serde_uses_wire_names() {
        let json = serde_json::to_string(&ActionType::RescheduleAppt).unwrap();
        assert_eq!(json, "\"RESCHEDULE_APPT\"");
        let status: AppointmentStatus = serde_json::from_str("\"RELEASE_PATIENT\"").unwrap();
        assert_eq!(status, AppointmentStatus::ReleasePatient);
    }

    #[test]
    fn test_pagination_bounds() {
        assert!(Pagination::new(0, 10).is_err());
        assert!(Pagination::new(1, 0).is_err());
        assert!(Pagination::new(1, MAX_PER_PAGE + 1).is_err());
        assert_eq!(Pagination::new(3, 10).unwrap().offset(), 20);
    }

    #[test]
    fn test_pagination_deserializes_through_bounds_check() {
        let page: Pagination = serde_json::from_str(r#"{"page":2,"per_page":50}"#).unwrap();
        assert_eq!((page.page(), page.per_page(), page.offset()), (2, 50, 50));

        assert!(serde_json::from_str::<Pagination>(r#"{"page":0,"per_page":20}"#).is_err());
        assert!(serde_json::from_str::<Pagination>(r#"{"page":1,"per_page":0}"#).is_err());
        assert!(serde_json::from_str::<Pagination>(r#"{"page":1,"per_page":500}"#).is_err());
    }

    #[test]
    fn test_only_cancel_like_actions_require_reason() {
        let requiring: Vec<_> = ActionType::ALL
            .into_iter()
            .filter(ActionType::requires_reason)
            .collect();
        assert_eq!(
            requiring,
            vec![
                ActionType::Cancel,
                ActionType::RescheduleAppt,
                ActionType::DeclineRequest
            ]
        );
    }
}

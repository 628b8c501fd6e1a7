use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::WorkflowError;
use super::types::{ActionType, AvailabilityId, ReasonCode};

/// Details carried by `RESCHEDULE_APPT`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reschedule {
    pub reason: ReasonCode,
    pub note: Option<String>,
    pub scheduled_date: DateTime<Utc>,
    pub duration_minutes: Option<u32>,
    pub doctor_id: Option<i64>,
    pub availability_id: Option<AvailabilityId>,
    pub keep_availability_on_cancel: bool,
}

/// A validated action. Variants that need a reason carry one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Cancel {
        reason: ReasonCode,
        note: Option<String>,
        keep_availability_on_cancel: bool,
    },
    ChangeDate {
        scheduled_date: DateTime<Utc>,
        duration_minutes: Option<u32>,
    },
    ChangeApptType {
        appointment_type: String,
    },
    ChangeDoctor {
        doctor_id: i64,
    },
    RescheduleAppt(Reschedule),
    Schedule,
    Confirm1,
    Confirm2,
    CheckIn,
    Ready,
    ReleasePatient,
    InProgress,
    VPending,
    Reactivate,
    DeclineRequest {
        reason: ReasonCode,
        note: Option<String>,
        keep_availability_on_cancel: bool,
    },
}

impl Action {
    pub fn action_type(&self) -> ActionType {
        match self {
            Action::Cancel { .. } => ActionType::Cancel,
            Action::ChangeDate { .. } => ActionType::ChangeDate,
            Action::ChangeApptType { .. } => ActionType::ChangeApptType,
            Action::ChangeDoctor { .. } => ActionType::ChangeDoctor,
            Action::RescheduleAppt(_) => ActionType::RescheduleAppt,
            Action::Schedule => ActionType::Schedule,
            Action::Confirm1 => ActionType::Confirm1,
            Action::Confirm2 => ActionType::Confirm2,
            Action::CheckIn => ActionType::CheckIn,
            Action::Ready => ActionType::Ready,
            Action::ReleasePatient => ActionType::ReleasePatient,
            Action::InProgress => ActionType::InProgress,
            Action::VPending => ActionType::VPending,
            Action::Reactivate => ActionType::Reactivate,
            Action::DeclineRequest { .. } => ActionType::DeclineRequest,
        }
    }

    pub fn reason(&self) -> Option<(ReasonCode, Option<&str>)> {
        match self {
            Action::Cancel { reason, note, .. } | Action::DeclineRequest { reason, note, .. } => {
                Some((*reason, note.as_deref()))
            }
            Action::RescheduleAppt(r) => Some((r.reason, r.note.as_deref())),
            _ => None,
        }
    }

    /// Whether the source availability slot stays reserved after a cancel-like action.
    pub fn keeps_availability(&self) -> bool {
        match self {
            Action::Cancel {
                keep_availability_on_cancel,
                ..
            }
            | Action::DeclineRequest {
                keep_availability_on_cancel,
                ..
            } => *keep_availability_on_cancel,
            Action::RescheduleAppt(r) => r.keep_availability_on_cancel,
            _ => false,
        }
    }
}

/// Loosely typed action input as it arrives from a request body or the CLI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    pub action: String,
    pub reason_code: Option<String>,
    pub note: Option<String>,
    pub scheduled_date: Option<DateTime<Utc>>,
    pub duration_minutes: Option<u32>,
    pub doctor_id: Option<i64>,
    pub appointment_type: Option<String>,
    pub availability_id: Option<AvailabilityId>,
    #[serde(default)]
    pub keep_availability_on_cancel: bool,
}

impl ActionRequest {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            ..Default::default()
        }
    }
}

fn missing(action: ActionType, field: &str) -> WorkflowError {
    WorkflowError::Validation(format!("{action} requires {field}"))
}

impl TryFrom<ActionRequest> for Action {
    type Error = WorkflowError;

    fn try_from(req: ActionRequest) -> Result<Self, Self::Error> {
        let action_type: ActionType = req.action.parse()?;

        let reason = req
            .reason_code
            .as_deref()
            .map(str::parse::<ReasonCode>)
            .transpose()?;

        let reason = match (action_type.requires_reason(), reason) {
            (true, None) => return Err(missing(action_type, "a reason code")),
            (false, Some(reason)) => {
                return Err(WorkflowError::Validation(format!(
                    "{action_type} does not take a reason code (got {reason})"
                )))
            }
            (_, reason) => reason,
        };

        if let Some(0) = req.duration_minutes {
            return Err(WorkflowError::Validation(
                "duration must be at least one minute".to_string(),
            ));
        }

        let note = req.note.filter(|n| !n.trim().is_empty());

        let action = match action_type {
            ActionType::Cancel => Action::Cancel {
                reason: reason.ok_or_else(|| missing(action_type, "a reason code"))?,
                note,
                keep_availability_on_cancel: req.keep_availability_on_cancel,
            },
            ActionType::DeclineRequest => Action::DeclineRequest {
                reason: reason.ok_or_else(|| missing(action_type, "a reason code"))?,
                note,
                keep_availability_on_cancel: req.keep_availability_on_cancel,
            },
            ActionType::RescheduleAppt => Action::RescheduleAppt(Reschedule {
                reason: reason.ok_or_else(|| missing(action_type, "a reason code"))?,
                note,
                scheduled_date: req
                    .scheduled_date
                    .ok_or_else(|| missing(action_type, "a new scheduled date"))?,
                duration_minutes: req.duration_minutes,
                doctor_id: req.doctor_id,
                availability_id: req.availability_id,
                keep_availability_on_cancel: req.keep_availability_on_cancel,
            }),
            ActionType::ChangeDate => Action::ChangeDate {
                scheduled_date: req
                    .scheduled_date
                    .ok_or_else(|| missing(action_type, "a scheduled date"))?,
                duration_minutes: req.duration_minutes,
            },
            ActionType::ChangeDoctor => Action::ChangeDoctor {
                doctor_id: req
                    .doctor_id
                    .ok_or_else(|| missing(action_type, "a doctor id"))?,
            },
            ActionType::ChangeApptType => {
                let appointment_type = req
                    .appointment_type
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| missing(action_type, "an appointment type"))?;
                Action::ChangeApptType { appointment_type }
            }
            ActionType::Schedule => Action::Schedule,
            ActionType::Confirm1 => Action::Confirm1,
            ActionType::Confirm2 => Action::Confirm2,
            ActionType::CheckIn => Action::CheckIn,
            ActionType::Ready => Action::Ready,
            ActionType::ReleasePatient => Action::ReleasePatient,
            ActionType::InProgress => Action::InProgress,
            ActionType::VPending => Action::VPending,
            ActionType::Reactivate => Action::Reactivate,
        };

        Ok(action)
    }
}

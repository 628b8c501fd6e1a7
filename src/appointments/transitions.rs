// Appointment transition table
//
// Every legal (status, action) pair is listed here and nowhere else. The
// engine asks `lookup` and treats `None` as an invalid transition.

use serde::Serialize;

use super::types::{ActionType, AppointmentStatus};

/// Result of applying an action type to a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "status")]
pub enum Outcome {
    /// Move the appointment to a new status.
    Advance(AppointmentStatus),
    /// Stay in the current status, mutating metadata only.
    SelfLoop,
    /// Cancel the source appointment and create its successor in `SCHEDULE`.
    Reschedule,
}

impl Outcome {
    /// Status the source appointment ends up in when applied from `from`.
    pub fn resulting_status(&self, from: AppointmentStatus) -> AppointmentStatus {
        match self {
            Outcome::Advance(next) => *next,
            Outcome::SelfLoop => from,
            Outcome::Reschedule => AppointmentStatus::Cancel,
        }
    }
}

pub fn lookup(from: AppointmentStatus, action: ActionType) -> Option<Outcome> {
    use ActionType as A;
    use AppointmentStatus as S;

    let outcome = match (from, action) {
        // Visit pipeline
        (S::Schedule, A::Confirm1) => Outcome::Advance(S::Confirm1),
        (S::Confirm1, A::Confirm2) => Outcome::Advance(S::Confirm2),
        (S::Confirm2, A::CheckIn) => Outcome::Advance(S::CheckIn),
        (S::CheckIn, A::Ready) => Outcome::Advance(S::Ready),
        (S::Ready, A::InProgress) => Outcome::Advance(S::InProgress),
        (S::InProgress, A::ReleasePatient) => Outcome::Advance(S::ReleasePatient),

        // Pending visit
        (S::Schedule | S::Confirm1 | S::Confirm2, A::VPending) => Outcome::Advance(S::VPending),
        (S::VPending, A::Schedule) => Outcome::Advance(S::Schedule),
        (S::VPending, A::CheckIn) => Outcome::Advance(S::CheckIn),
        (S::VPending, A::DeclineRequest) => Outcome::Advance(S::Cancel),

        // Cancellation and metadata edits from every non-terminal status
        (
            S::Schedule
            | S::Confirm1
            | S::Confirm2
            | S::CheckIn
            | S::Ready
            | S::InProgress
            | S::VPending
            | S::Reactivate,
            A::Cancel,
        ) => Outcome::Advance(S::Cancel),
        (
            S::Schedule
            | S::Confirm1
            | S::Confirm2
            | S::CheckIn
            | S::Ready
            | S::InProgress
            | S::VPending
            | S::Reactivate,
            A::ChangeDate | A::ChangeDoctor | A::ChangeApptType,
        ) => Outcome::SelfLoop,

        // Rescheduling only before the patient has checked in
        (
            S::Schedule | S::Confirm1 | S::Confirm2 | S::VPending | S::Reactivate,
            A::RescheduleAppt,
        ) => Outcome::Reschedule,

        // The only way out of a terminal status
        (S::Cancel, A::Reactivate) => Outcome::Advance(S::Reactivate),
        (S::Reactivate, A::Schedule) => Outcome::Advance(S::Schedule),

        _ => return None,
    };

    Some(outcome)
}

/// Actions accepted while an appointment is in `status`, in declaration order.
pub fn allowed_actions(status: AppointmentStatus) -> Vec<ActionType> {
    ActionType::ALL
        .into_iter()
        .filter(|action| lookup(status, *action).is_some())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ActionType as A;
    use AppointmentStatus as S;

    #[test]
    fn test_pipeline_walks_to_release() {
        let steps = [
            (S::Schedule, A::Confirm1, S::Confirm1),
            (S::Confirm1, A::Confirm2, S::Confirm2),
            (S::Confirm2, A::CheckIn, S::CheckIn),
            (S::CheckIn, A::Ready, S::Ready),
            (S::Ready, A::InProgress, S::InProgress),
            (S::InProgress, A::ReleasePatient, S::ReleasePatient),
        ];
        for (from, action, to) in steps {
            assert_eq!(lookup(from, action), Some(Outcome::Advance(to)), "{from} + {action}");
        }
    }

    #[test]
    fn test_pipeline_stages_cannot_be_skipped() {
        assert_eq!(lookup(S::Schedule, A::CheckIn), None);
        assert_eq!(lookup(S::Schedule, A::Confirm2), None);
        assert_eq!(lookup(S::Confirm1, A::Ready), None);
        assert_eq!(lookup(S::CheckIn, A::InProgress), None);
    }

    #[test]
    fn test_canceled_accepts_only_reactivate() {
        assert_eq!(allowed_actions(S::Cancel), vec![A::Reactivate]);
    }

    #[test]
    fn test_released_accepts_nothing() {
        assert!(allowed_actions(S::ReleasePatient).is_empty());
    }

    #[test]
    fn test_reactivate_leads_back_to_schedule() {
        assert_eq!(lookup(S::Cancel, A::Reactivate), Some(Outcome::Advance(S::Reactivate)));
        assert_eq!(lookup(S::Reactivate, A::Schedule), Some(Outcome::Advance(S::Schedule)));
    }

    #[test]
    fn test_every_non_terminal_status_can_cancel_and_edit() {
        for status in S::ALL.into_iter().filter(|s| !s.is_terminal()) {
            assert_eq!(lookup(status, A::Cancel), Some(Outcome::Advance(S::Cancel)));
            for edit in [A::ChangeDate, A::ChangeDoctor, A::ChangeApptType] {
                assert_eq!(lookup(status, edit), Some(Outcome::SelfLoop), "{status} + {edit}");
            }
        }
    }

    #[test]
    fn test_exhaustive_product_matches_terminal_rules() {
        for status in S::ALL {
            for action in A::ALL {
                let outcome = lookup(status, action);
                match status {
                    S::Cancel => assert_eq!(outcome.is_some(), action == A::Reactivate),
                    S::ReleasePatient => assert!(outcome.is_none()),
                    _ => {
                        if action == A::Reactivate {
                            assert!(outcome.is_none(), "{status} cannot reactivate");
                        }
                    }
                }
                if let Some(outcome) = outcome {
                    let next = outcome.resulting_status(status);
                    if next == S::Reactivate {
                        assert_eq!(status, S::Cancel);
                    }
                }
            }
        }
    }

    #[test]
    fn test_reschedule_stops_at_check_in() {
        for status in [S::CheckIn, S::Ready, S::InProgress] {
            assert_eq!(lookup(status, A::RescheduleAppt), None);
        }
        assert_eq!(
            Outcome::Reschedule.resulting_status(S::Confirm1),
            S::Cancel
        );
    }

    #[test]
    fn test_decline_only_from_pending_visit() {
        for status in S::ALL {
            let expected = status == S::VPending;
            assert_eq!(lookup(status, A::DeclineRequest).is_some(), expected, "{status}");
        }
    }
}

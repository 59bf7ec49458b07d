use std::fmt;

use thiserror::Error;
use ulid::Ulid;

pub const CONFLICT_MESSAGE: &str =
    "This time slot is no longer available. Please pick a different time.";
pub const GENERIC_MESSAGE: &str = "Something went wrong. Please try again.";

/// Coarse classification every boundary error falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or missing input the caller can fix.
    Validation,
    /// Well-formed input that scheduling rules reject.
    Policy,
    /// The slot is taken. Expected traffic, not a failure.
    Conflict,
    /// An external dependency failed or timed out.
    Transient,
    /// Unexpected persistence or internal failure.
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyRule {
    InPast,
    InsufficientNotice,
    BeyondBookingWindow,
    AlreadyCancelled,
    AlreadyCompleted,
    AlreadyStarted,
    AlreadyOccurred,
}

/// A scheduling rule that rejected the request, with its rendered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyViolation {
    pub rule: PolicyRule,
    pub message: String,
}

impl PolicyViolation {
    pub fn new(rule: PolicyRule, message: impl Into<String>) -> Self {
        Self { rule, message: message.into() }
    }
}

impl fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BookingError {
    #[error("invalid {field}: {message}")]
    Parse { field: &'static str, message: String },
    #[error("{0}")]
    Validation(String),
    #[error("an organizer is required to book a meeting")]
    OrganizerRequired,
    #[error("meeting type is no longer active")]
    MeetingTypeInactive,
    #[error("{0}")]
    Policy(PolicyViolation),
    #[error("slot unavailable")]
    SlotUnavailable,
    #[error("time conflict with an existing meeting")]
    TimeConflict,
    #[error("meeting not found: {0}")]
    NotFound(Ulid),
    #[error("external dependency failed: {0}")]
    Transient(String),
    #[error("internal error: {0}")]
    System(String),
}

impl BookingError {
    pub fn parse(field: &'static str, message: impl Into<String>) -> Self {
        BookingError::Parse { field, message: message.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BookingError::Parse { .. }
            | BookingError::Validation(_)
            | BookingError::OrganizerRequired
            | BookingError::NotFound(_) => ErrorKind::Validation,
            BookingError::MeetingTypeInactive | BookingError::Policy(_) => ErrorKind::Policy,
            BookingError::SlotUnavailable | BookingError::TimeConflict => ErrorKind::Conflict,
            BookingError::Transient(_) => ErrorKind::Transient,
            BookingError::System(_) => ErrorKind::System,
        }
    }

    /// Short stable tag for logs and metric labels.
    pub fn reason(&self) -> &'static str {
        match self {
            BookingError::Parse { .. } => "parse_error",
            BookingError::Validation(_) => "validation_error",
            BookingError::OrganizerRequired => "organizer_required",
            BookingError::MeetingTypeInactive => "meeting_type_inactive",
            BookingError::Policy(_) => "policy_violation",
            BookingError::SlotUnavailable => "slot_unavailable",
            BookingError::TimeConflict => "time_conflict",
            BookingError::NotFound(_) => "not_found",
            BookingError::Transient(_) => "transient",
            BookingError::System(_) => "system",
        }
    }

    pub fn policy_rule(&self) -> Option<PolicyRule> {
        match self {
            BookingError::Policy(v) => Some(v.rule),
            _ => None,
        }
    }

    /// Message safe to show an attendee. System details never leak.
    pub fn user_message(&self) -> String {
        match self {
            BookingError::Parse { field, message } => format!("Invalid {field}: {message}"),
            BookingError::Validation(msg) => msg.clone(),
            BookingError::OrganizerRequired => "An organizer is required to book a meeting.".into(),
            BookingError::MeetingTypeInactive => {
                "This meeting type is no longer available.".into()
            }
            BookingError::Policy(v) => v.message.clone(),
            BookingError::SlotUnavailable | BookingError::TimeConflict => CONFLICT_MESSAGE.into(),
            BookingError::NotFound(_) => "Meeting not found.".into(),
            BookingError::Transient(_) => {
                "We could not confirm availability right now. Please try again.".into()
            }
            BookingError::System(_) => GENERIC_MESSAGE.into(),
        }
    }
}

impl From<PolicyViolation> for BookingError {
    fn from(v: PolicyViolation) -> Self {
        BookingError::Policy(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_variants_share_user_message() {
        assert_eq!(BookingError::SlotUnavailable.kind(), ErrorKind::Conflict);
        assert_eq!(BookingError::TimeConflict.kind(), ErrorKind::Conflict);
        assert_eq!(
            BookingError::SlotUnavailable.user_message(),
            BookingError::TimeConflict.user_message()
        );
    }

    #[test]
    fn system_errors_do_not_leak_detail() {
        let err = BookingError::System("WAL writer dropped response".into());
        assert_eq!(err.kind(), ErrorKind::System);
        assert_eq!(err.user_message(), GENERIC_MESSAGE);
        assert!(err.to_string().contains("WAL writer"));
    }

    #[test]
    fn policy_violation_surfaces_its_message() {
        let err: BookingError =
            PolicyViolation::new(PolicyRule::AlreadyCancelled, "Meeting is already cancelled").into();
        assert_eq!(err.kind(), ErrorKind::Policy);
        assert_eq!(err.policy_rule(), Some(PolicyRule::AlreadyCancelled));
        assert_eq!(err.user_message(), "Meeting is already cancelled");
        assert_eq!(err.to_string(), "Meeting is already cancelled");
    }

    #[test]
    fn parse_errors_are_user_correctable() {
        let err = BookingError::parse("date", "expected YYYY-MM-DD");
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.reason(), "parse_error");
        assert_eq!(err.user_message(), "Invalid date: expected YYYY-MM-DD");
    }
}

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::BookingError;
use crate::model::{OrganizerProfile, Span};
use crate::observability::{AVAILABILITY_CHECK_SECONDS, AVAILABILITY_CHECKS_TOTAL};
use crate::policy;
use crate::providers::GuardedCalendar;
use crate::validation;

/// What an inconclusive calendar read means for the booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CalendarFailurePolicy {
    /// Book anyway; background sync and the store constraint catch clashes.
    #[default]
    Optimistic,
    /// Refuse the booking with a transient error.
    Strict,
}

impl CalendarFailurePolicy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "optimistic" => Some(CalendarFailurePolicy::Optimistic),
            "strict" => Some(CalendarFailurePolicy::Strict),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CalendarFailurePolicy::Optimistic => "optimistic",
            CalendarFailurePolicy::Strict => "strict",
        }
    }

    /// Turn a check result into go / no-go for the booking.
    pub fn apply(self, outcome: AvailabilityOutcome) -> Result<AvailabilityOutcome, BookingError> {
        match outcome {
            AvailabilityOutcome::Blocked => Err(BookingError::SlotUnavailable),
            AvailabilityOutcome::ProceedOptimistically { reason } if self == CalendarFailurePolicy::Strict => {
                Err(BookingError::Transient(reason))
            }
            other => Ok(other),
        }
    }
}

/// Result of the just-in-time calendar read done before committing a booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvailabilityOutcome {
    /// The provider answered and the slot is free.
    Available,
    /// The provider reported an event clashing with the slot.
    Blocked,
    /// The read failed or timed out; the booking goes ahead unverified.
    ProceedOptimistically { reason: String },
    /// The caller asked to skip the check, or there is no calendar to read.
    Skipped,
}

impl AvailabilityOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AvailabilityOutcome::Available => "available",
            AvailabilityOutcome::Blocked => "blocked",
            AvailabilityOutcome::ProceedOptimistically { .. } => "proceed_optimistically",
            AvailabilityOutcome::Skipped => "skipped",
        }
    }

    pub fn is_optimistic(&self) -> bool {
        matches!(self, AvailabilityOutcome::ProceedOptimistically { .. })
    }
}

/// Read the organizer's calendars around `window` and look for clashes.
///
/// The read runs as its own task under `ceiling`; on expiry the task is
/// aborted and the outcome is `ProceedOptimistically`.
pub async fn check_fresh_availability(
    calendar: &GuardedCalendar,
    organizer: &OrganizerProfile,
    window: Span,
    buffer_minutes: u32,
    ceiling: Duration,
) -> AvailabilityOutcome {
    if organizer.calendar_integrations.is_empty() {
        return record(AvailabilityOutcome::Skipped, None);
    }

    let range = policy::availability_window(&window, buffer_minutes);
    let calendar = calendar.clone();
    let integrations = organizer.calendar_integrations.clone();
    let organizer_id = organizer.user_id;
    let started = Instant::now();

    let mut fetch = tokio::spawn(async move {
        calendar
            .events_for_range_fresh(organizer_id, &integrations, range.start, range.end)
            .await
    });

    let outcome = match tokio::time::timeout(ceiling, &mut fetch).await {
        Ok(Ok(Ok(events))) => match validation::check_slot_availability(&window, &events, buffer_minutes) {
            Ok(()) => AvailabilityOutcome::Available,
            Err(reason) if policy::should_block_on_calendar_failure(&reason) => AvailabilityOutcome::Blocked,
            Err(reason) => AvailabilityOutcome::ProceedOptimistically { reason: reason.to_string() },
        },
        Ok(Ok(Err(e))) => AvailabilityOutcome::ProceedOptimistically { reason: e.to_string() },
        Ok(Err(join)) => AvailabilityOutcome::ProceedOptimistically {
            reason: format!("calendar read task failed: {join}"),
        },
        Err(_) => {
            fetch.abort();
            AvailabilityOutcome::ProceedOptimistically {
                reason: format!("calendar read timed out after {}ms", ceiling.as_millis()),
            }
        }
    };

    match &outcome {
        AvailabilityOutcome::ProceedOptimistically { reason } => {
            warn!(organizer = organizer_id, start = %window.start, "availability check inconclusive, proceeding: {reason}");
        }
        other => debug!(organizer = organizer_id, start = %window.start, outcome = other.as_str(), "availability checked"),
    }
    record(outcome, Some(started))
}

fn record(outcome: AvailabilityOutcome, started: Option<Instant>) -> AvailabilityOutcome {
    metrics::counter!(AVAILABILITY_CHECKS_TOTAL, "outcome" => outcome.as_str()).increment(1);
    if let Some(started) = started {
        metrics::histogram!(AVAILABILITY_CHECK_SECONDS).record(started.elapsed().as_secs_f64());
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_names() {
        assert_eq!(CalendarFailurePolicy::from_name("Strict"), Some(CalendarFailurePolicy::Strict));
        assert_eq!(CalendarFailurePolicy::from_name(" optimistic "), Some(CalendarFailurePolicy::Optimistic));
        assert_eq!(CalendarFailurePolicy::from_name("lenient"), None);
        assert_eq!(CalendarFailurePolicy::default().as_str(), "optimistic");
    }

    #[test]
    fn blocked_always_refuses() {
        for policy in [CalendarFailurePolicy::Optimistic, CalendarFailurePolicy::Strict] {
            assert_eq!(policy.apply(AvailabilityOutcome::Blocked), Err(BookingError::SlotUnavailable));
        }
    }

    #[test]
    fn inconclusive_read_depends_on_policy() {
        let outcome = AvailabilityOutcome::ProceedOptimistically { reason: "request timed out".into() };
        assert_eq!(CalendarFailurePolicy::Optimistic.apply(outcome.clone()), Ok(outcome.clone()));
        assert_eq!(
            CalendarFailurePolicy::Strict.apply(outcome),
            Err(BookingError::Transient("request timed out".into()))
        );
    }

    #[test]
    fn conclusive_outcomes_pass_through() {
        for outcome in [AvailabilityOutcome::Available, AvailabilityOutcome::Skipped] {
            assert_eq!(CalendarFailurePolicy::Strict.apply(outcome.clone()), Ok(outcome));
        }
    }
}

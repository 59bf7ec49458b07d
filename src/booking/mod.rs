//! Booking orchestration: the creation pipeline and the reschedule, cancel
//! and reschedule-request coordinators.
//!
//! Every flow re-reads the meeting inside the repository's transaction and
//! commits the row together with its background job. Notifications and
//! video rooms run after the commit and never undo it.

mod availability;
mod coordinators;
mod pipeline;


use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

pub use availability::{AvailabilityOutcome, CalendarFailurePolicy, check_fresh_availability};

use crate::clock::Clock;
use crate::error::{BookingError, ErrorKind};
use crate::model::{
    AttendeeForm, EnqueueOutcome, JobAction, JobRequest, JobState, Meeting, MeetingTypeId, OrganizerId,
    Span,
};
use crate::observability::{BOOKING_DURATION_SECONDS, BOOKINGS_TOTAL, SIDE_EFFECT_FAILURES_TOTAL};
use crate::policy::PolicyDefaults;
use crate::ports::{Directory, MeetingRepository, Notifier, VideoRooms};
use crate::providers::{GuardedCalendar, ProviderError};
use crate::resilience::{BreakerRegistry, Dependency};
use crate::validation;

/// Tunables for the booking flows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingSettings {
    /// Ceiling on the fresh calendar read.
    pub availability_timeout: Duration,
    pub calendar_failure_policy: CalendarFailurePolicy,
    /// Repeat enqueues of the same job inside this window are absorbed.
    pub job_unique_window: chrono::Duration,
    pub policy: PolicyDefaults,
}

impl Default for BookingSettings {
    fn default() -> Self {
        Self {
            availability_timeout: Duration::from_secs(5),
            calendar_failure_policy: CalendarFailurePolicy::Optimistic,
            job_unique_window: chrono::Duration::seconds(60),
            policy: PolicyDefaults::default(),
        }
    }
}

/// Everything the service calls out to. Built by the embedding application.
#[derive(Clone)]
pub struct Collaborators {
    pub directory: Arc<dyn Directory>,
    pub repository: Arc<dyn MeetingRepository>,
    pub calendar: GuardedCalendar,
    pub notifier: Arc<dyn Notifier>,
    pub video: Arc<dyn VideoRooms>,
    pub breakers: Arc<BreakerRegistry>,
    pub clock: Arc<dyn Clock>,
}

/// Raw slot fields as submitted by the attendee.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotInput {
    /// `YYYY-MM-DD`
    pub date: String,
    pub time: String,
    /// Minutes, optionally suffixed `m` or `min`.
    pub duration: String,
    /// IANA name; blank means UTC.
    pub timezone: String,
}

impl SlotInput {
    pub fn new(date: &str, time: &str, duration: &str, timezone: &str) -> Self {
        Self {
            date: date.into(),
            time: time.into(),
            duration: duration.into(),
            timezone: timezone.into(),
        }
    }

    pub fn parse(&self) -> Result<Span, BookingError> {
        validation::parse_time_window(&self.date, &self.time, &self.duration, &self.timezone)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingRequest {
    /// Falls back to the meeting type's owner when absent.
    pub organizer_id: Option<OrganizerId>,
    pub meeting_type_id: Option<MeetingTypeId>,
    pub slot: SlotInput,
    pub attendee: AttendeeForm,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BookingOptions {
    pub skip_availability_check: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingConfirmation {
    pub meeting: Meeting,
    pub availability: AvailabilityOutcome,
    pub job: EnqueueOutcome,
}

pub struct BookingService {
    deps: Collaborators,
    settings: BookingSettings,
}

impl BookingService {
    pub fn new(deps: Collaborators, settings: BookingSettings) -> Self {
        Self { deps, settings }
    }

    pub fn settings(&self) -> &BookingSettings {
        &self.settings
    }

    fn job_request(&self, action: JobAction, meeting: &Meeting) -> JobRequest {
        let payload = serde_json::json!({
            "meeting_id": meeting.id.to_string(),
            "uid": meeting.uid.to_string(),
            "organizer_id": meeting.organizer_user_id,
            "calendar_integration_id": meeting.calendar_integration_id,
        });
        JobRequest {
            action,
            meeting_id: meeting.id,
            queue: action.queue().to_string(),
            priority: match action {
                JobAction::SendRescheduleRequest => 2,
                _ => 1,
            },
            payload: payload.to_string(),
            unique_window: self.settings.job_unique_window,
            unique_states: vec![JobState::Available, JobState::Executing],
        }
    }

    /// Log and count a finished flow. The log level follows the error kind.
    fn finish<T>(&self, operation: &'static str, started: Instant, result: &Result<T, BookingError>) {
        metrics::histogram!(BOOKING_DURATION_SECONDS, "operation" => operation)
            .record(started.elapsed().as_secs_f64());
        let outcome = match result {
            Ok(_) => "ok",
            Err(e) => e.reason(),
        };
        metrics::counter!(BOOKINGS_TOTAL, "operation" => operation, "outcome" => outcome).increment(1);

        let Err(e) = result else { return };
        match e.kind() {
            ErrorKind::Validation => debug!(operation, reason = e.reason(), "rejected: {e}"),
            ErrorKind::Policy | ErrorKind::Conflict => info!(operation, reason = e.reason(), "refused: {e}"),
            ErrorKind::Transient => warn!(operation, reason = e.reason(), "dependency failure: {e}"),
            ErrorKind::System => error!(operation, "{e}"),
        }
    }
}

/// Run `op` through `dep`'s breaker if one is registered.
async fn guarded<F, Fut>(breakers: &BreakerRegistry, dep: &Dependency, op: F) -> Result<(), ProviderError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(), ProviderError>>,
{
    match breakers.get(dep) {
        Some(breaker) => breaker.call(op).await,
        None => op().await,
    }
}

fn side_effect_failed(effect: &'static str, meeting: &Meeting, e: &ProviderError) {
    metrics::counter!(SIDE_EFFECT_FAILURES_TOTAL, "effect" => effect).increment(1);
    warn!(effect, meeting = %meeting.uid, "side effect failed: {e}");
}

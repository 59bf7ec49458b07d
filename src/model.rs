use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::providers::{CalendarProviderKind, VideoProviderKind};

/// UTC instant. The only wall-clock time type.
pub type Timestamp = DateTime<Utc>;

pub type OrganizerId = u64;
pub type MeetingTypeId = u64;
pub type IntegrationId = u64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl Span {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Timestamp) -> bool {
        self.start <= t && t < self.end
    }
}

// ── Meetings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
    RescheduleRequested,
}

impl MeetingStatus {
    /// Statuses that occupy the organizer's time slot.
    pub fn holds_slot(self) -> bool {
        matches!(self, MeetingStatus::Confirmed | MeetingStatus::RescheduleRequested)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MeetingStatus::Pending => "pending",
            MeetingStatus::Confirmed => "confirmed",
            MeetingStatus::Cancelled => "cancelled",
            MeetingStatus::Completed => "completed",
            MeetingStatus::RescheduleRequested => "reschedule_requested",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderUnit {
    Minutes,
    Hours,
    Days,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub value: u32,
    pub unit: ReminderUnit,
}

impl Reminder {
    pub fn minutes(value: u32) -> Self {
        Self { value, unit: ReminderUnit::Minutes }
    }

    pub fn offset(&self) -> Duration {
        let v = i64::from(self.value);
        match self.unit {
            ReminderUnit::Minutes => Duration::minutes(v),
            ReminderUnit::Hours => Duration::hours(v),
            ReminderUnit::Days => Duration::days(v),
        }
    }
}

/// A persisted meeting row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meeting {
    pub id: Ulid,
    /// Public identifier used in booking-management links.
    pub uid: Ulid,
    pub title: String,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub duration_minutes: u32,
    pub attendee_timezone: String,
    pub status: MeetingStatus,
    pub organizer_user_id: OrganizerId,
    pub organizer_name: String,
    pub organizer_email: String,
    pub attendee_name: String,
    pub attendee_email: String,
    pub attendee_phone: Option<String>,
    pub attendee_message: Option<String>,
    pub meeting_type_id: Option<MeetingTypeId>,
    pub calendar_integration_id: Option<IntegrationId>,
    pub calendar_path: Option<String>,
    pub video_integration_id: Option<IntegrationId>,
    pub reminders: Vec<Reminder>,
    pub view_url: String,
    pub reschedule_url: String,
    pub cancel_url: String,
    pub cancelled_at: Option<Timestamp>,
    pub cancellation_reason: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Meeting {
    pub fn span(&self) -> Span {
        Span::new(self.start_time, self.end_time)
    }

    /// Stored status with completion derived from the clock.
    pub fn effective_status(&self, now: Timestamp) -> MeetingStatus {
        match self.status {
            MeetingStatus::Confirmed | MeetingStatus::Pending if now >= self.end_time => {
                MeetingStatus::Completed
            }
            other => other,
        }
    }
}

// ── Scheduling inputs ────────────────────────────────────────────

/// Per-organizer snapshot used at validation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulingConfig {
    pub buffer_minutes: u32,
    pub min_advance_hours: u32,
    pub max_advance_booking_days: u32,
    pub owner_timezone: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarIntegration {
    pub id: IntegrationId,
    pub provider: CalendarProviderKind,
    pub calendar_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoIntegration {
    pub id: IntegrationId,
    pub provider: VideoProviderKind,
}

/// Organizer profile settings, as read from the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrganizerProfile {
    pub user_id: OrganizerId,
    pub full_name: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub timezone: Option<String>,
    pub buffer_minutes: Option<u32>,
    pub min_advance_hours: Option<u32>,
    pub max_advance_booking_days: Option<u32>,
    /// Calendars consulted for conflicts; the first one receives new events.
    pub calendar_integrations: Vec<CalendarIntegration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeetingType {
    pub id: MeetingTypeId,
    pub organizer_user_id: OrganizerId,
    pub name: String,
    pub duration_minutes: u32,
    pub active: bool,
    pub reminders: Vec<Reminder>,
    pub video_integration: Option<VideoIntegration>,
}

/// Raw attendee form fields as submitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttendeeForm {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub message: Option<String>,
}

/// An event as reported by an external calendar. Providers may omit the end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEvent {
    pub start_time: Timestamp,
    pub end_time: Option<Timestamp>,
}

impl CalendarEvent {
    pub fn new(start_time: Timestamp, end_time: Timestamp) -> Self {
        Self { start_time, end_time: Some(end_time) }
    }
}

// ── Background jobs ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobAction {
    CreateCalendarEvent,
    UpdateCalendarEvent,
    DeleteCalendarEvent,
    SendRescheduleRequest,
}

impl JobAction {
    pub fn as_str(self) -> &'static str {
        match self {
            JobAction::CreateCalendarEvent => "create",
            JobAction::UpdateCalendarEvent => "update",
            JobAction::DeleteCalendarEvent => "delete",
            JobAction::SendRescheduleRequest => "reschedule_request",
        }
    }

    pub fn queue(self) -> &'static str {
        match self {
            JobAction::SendRescheduleRequest => "emails",
            _ => "calendar_integrations",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Available,
    Executing,
    Completed,
    Discarded,
}

/// What a caller asks the queue to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub action: JobAction,
    pub meeting_id: Ulid,
    pub queue: String,
    pub priority: u8,
    pub payload: String,
    pub unique_window: Duration,
    /// A prior job with the same key only counts as a duplicate in these states.
    pub unique_states: Vec<JobState>,
}

impl JobRequest {
    pub fn unique_key(&self) -> String {
        format!("{}:{}", self.action.as_str(), self.meeting_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: Ulid,
    pub action: JobAction,
    pub meeting_id: Ulid,
    pub queue: String,
    pub priority: u8,
    pub payload: String,
    pub unique_key: String,
    pub state: JobState,
    pub enqueued_at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued(Ulid),
    /// A live job with the same key already exists; treated as success.
    Duplicate(Ulid),
}

impl EnqueueOutcome {
    pub fn job_id(&self) -> Ulid {
        match self {
            EnqueueOutcome::Enqueued(id) | EnqueueOutcome::Duplicate(id) => *id,
        }
    }
}

/// The WAL record format. One record is one atomic commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreEvent {
    /// Insert or replace a meeting row, with the job enqueued in the same commit.
    MeetingCommitted { meeting: Meeting, job: Option<Job> },
    JobEnqueued { job: Job },
    JobStateChanged { id: Ulid, state: JobState },
}

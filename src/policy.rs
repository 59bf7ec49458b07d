//! Scheduling policy: per-organizer config resolution, the canonical meeting
//! record, and which lifecycle transitions are legal when.

use chrono::Duration;
use ulid::Ulid;

use crate::error::{BookingError, PolicyRule, PolicyViolation};
use crate::model::{
    AttendeeForm, Meeting, MeetingStatus, MeetingType, OrganizerId, OrganizerProfile, Reminder,
    SchedulingConfig, Span, Timestamp,
};

pub const DEFAULT_REMINDER_MINUTES: u32 = 30;

/// Values used when an organizer or profile field is missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDefaults {
    pub scheduling: SchedulingConfig,
    pub organizer_name: String,
    pub organizer_email: String,
    /// Prefix for booking-management links.
    pub base_url: String,
}

impl Default for PolicyDefaults {
    fn default() -> Self {
        Self {
            scheduling: SchedulingConfig {
                buffer_minutes: 15,
                min_advance_hours: 3,
                max_advance_booking_days: 90,
                owner_timezone: "UTC".to_string(),
            },
            organizer_name: "Slotkeep".to_string(),
            organizer_email: "noreply@slotkeep.local".to_string(),
            base_url: "http://localhost:4000".to_string(),
        }
    }
}

/// Resolve an organizer's thresholds, field by field, over the defaults.
/// No organizer means the defaults as-is.
pub fn scheduling_config(profile: Option<&OrganizerProfile>, defaults: &PolicyDefaults) -> SchedulingConfig {
    let fallback = &defaults.scheduling;
    let Some(p) = profile else {
        return fallback.clone();
    };
    SchedulingConfig {
        buffer_minutes: p.buffer_minutes.unwrap_or(fallback.buffer_minutes),
        min_advance_hours: p.min_advance_hours.unwrap_or(fallback.min_advance_hours),
        max_advance_booking_days: p
            .max_advance_booking_days
            .unwrap_or(fallback.max_advance_booking_days),
        owner_timezone: p
            .timezone
            .clone()
            .filter(|tz| !tz.trim().is_empty())
            .unwrap_or_else(|| fallback.owner_timezone.clone()),
    }
}

/// Everything needed to build a meeting row. Ids and `now` are supplied by
/// the caller so that building stays deterministic.
#[derive(Debug, Clone)]
pub struct MeetingDraft<'a> {
    pub id: Ulid,
    pub uid: Ulid,
    pub window: Span,
    pub attendee_timezone: &'a str,
    pub attendee: &'a AttendeeForm,
    pub organizer_user_id: OrganizerId,
    pub organizer: Option<&'a OrganizerProfile>,
    pub meeting_type: Option<&'a MeetingType>,
    pub now: Timestamp,
}

pub fn management_urls(base_url: &str, uid: Ulid) -> (String, String, String) {
    let base = base_url.trim_end_matches('/');
    (
        format!("{base}/meeting/{uid}"),
        format!("{base}/meeting/{uid}/reschedule"),
        format!("{base}/meeting/{uid}/cancel"),
    )
}

pub fn build_meeting_attributes(draft: &MeetingDraft<'_>, defaults: &PolicyDefaults) -> Meeting {
    let attendee = draft.attendee;
    let title = match draft.meeting_type {
        Some(mt) => format!("{} with {}", mt.name, attendee.name),
        None => format!("Meeting with {}", attendee.name),
    };
    let reminders = draft
        .meeting_type
        .map(|mt| mt.reminders.clone())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| vec![Reminder::minutes(DEFAULT_REMINDER_MINUTES)]);

    let organizer_name = draft
        .organizer
        .and_then(|p| p.full_name.clone().or_else(|| p.username.clone()))
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| defaults.organizer_name.clone());
    let organizer_email = draft
        .organizer
        .and_then(|p| p.email.clone())
        .filter(|e| !e.trim().is_empty())
        .unwrap_or_else(|| defaults.organizer_email.clone());
    let calendar = draft.organizer.and_then(|p| p.calendar_integrations.first());

    let (view_url, reschedule_url, cancel_url) = management_urls(&defaults.base_url, draft.uid);
    let minutes = draft.window.duration().num_minutes().max(0) as u32;

    Meeting {
        id: draft.id,
        uid: draft.uid,
        title,
        start_time: draft.window.start,
        end_time: draft.window.end,
        duration_minutes: minutes,
        attendee_timezone: draft.attendee_timezone.to_string(),
        status: MeetingStatus::Confirmed,
        organizer_user_id: draft.organizer_user_id,
        organizer_name,
        organizer_email,
        attendee_name: attendee.name.clone(),
        attendee_email: attendee.email.clone(),
        attendee_phone: attendee.phone.clone(),
        attendee_message: attendee.message.clone(),
        meeting_type_id: draft.meeting_type.map(|mt| mt.id),
        calendar_integration_id: calendar.map(|c| c.id),
        calendar_path: calendar.and_then(|c| c.calendar_path.clone()),
        video_integration_id: draft
            .meeting_type
            .and_then(|mt| mt.video_integration.as_ref())
            .map(|v| v.id),
        reminders,
        view_url,
        reschedule_url,
        cancel_url,
        cancelled_at: None,
        cancellation_reason: None,
        created_at: draft.now,
        updated_at: draft.now,
    }
}

/// Move a meeting to a new window, keeping its identity.
pub fn rescheduled(meeting: &Meeting, window: Span, attendee_timezone: &str, now: Timestamp) -> Meeting {
    Meeting {
        start_time: window.start,
        end_time: window.end,
        duration_minutes: window.duration().num_minutes().max(0) as u32,
        attendee_timezone: attendee_timezone.to_string(),
        status: MeetingStatus::Confirmed,
        updated_at: now,
        ..meeting.clone()
    }
}

pub fn cancelled(meeting: &Meeting, reason: Option<&str>, now: Timestamp) -> Meeting {
    Meeting {
        status: MeetingStatus::Cancelled,
        cancelled_at: Some(now),
        cancellation_reason: reason.map(str::to_string),
        updated_at: now,
        ..meeting.clone()
    }
}

pub fn reschedule_requested(meeting: &Meeting, now: Timestamp) -> Meeting {
    Meeting {
        status: MeetingStatus::RescheduleRequested,
        updated_at: now,
        ..meeting.clone()
    }
}

// ── Transition legality ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeetingAction {
    Cancel,
    Reschedule,
}

/// Whether `action` may be applied to `meeting` at `now`.
///
/// Cancel reports the stored status first. Reschedule reports a past end
/// first, whatever the status.
pub fn check_transition(action: MeetingAction, meeting: &Meeting, now: Timestamp) -> Result<(), PolicyViolation> {
    use MeetingAction::*;
    use MeetingStatus::*;
    use PolicyRule::*;

    let occurred = now >= meeting.end_time;
    let started = now >= meeting.start_time;

    let blocked = match (action, meeting.status) {
        (Reschedule, _) if occurred => Some((AlreadyOccurred, "Cannot reschedule a meeting that has already occurred")),
        (Cancel, Cancelled) => Some((AlreadyCancelled, "Meeting is already cancelled")),
        (Cancel, Completed) => Some((AlreadyCompleted, "Meeting is already completed")),
        (Reschedule, Cancelled) => Some((AlreadyCancelled, "Cannot reschedule a cancelled meeting")),
        (Reschedule, Completed) => Some((AlreadyCompleted, "Cannot reschedule a completed meeting")),
        (Cancel, _) if occurred => Some((AlreadyOccurred, "Cannot cancel a meeting that has already occurred")),
        (Cancel, _) if started => Some((AlreadyStarted, "Cannot cancel a meeting that has already started")),
        (Reschedule, _) if started => Some((AlreadyStarted, "Cannot reschedule a meeting that has already started")),
        _ => None,
    };

    match blocked {
        Some((rule, message)) => Err(PolicyViolation::new(rule, message)),
        None => Ok(()),
    }
}

pub fn can_cancel(meeting: &Meeting, now: Timestamp) -> Result<(), PolicyViolation> {
    check_transition(MeetingAction::Cancel, meeting, now)
}

pub fn can_reschedule(meeting: &Meeting, now: Timestamp) -> Result<(), PolicyViolation> {
    check_transition(MeetingAction::Reschedule, meeting, now)
}

/// Only a detected conflict blocks a booking. Any other failure of the
/// fresh calendar read is treated as inconclusive.
pub fn should_block_on_calendar_failure(reason: &BookingError) -> bool {
    matches!(reason, BookingError::SlotUnavailable)
}

/// Window around a proposed slot to read from the organizer's calendars:
/// the whole UTC day(s) of the slot, widened by the buffer.
pub fn availability_window(proposed: &Span, buffer_minutes: u32) -> Span {
    let pad = Duration::minutes(i64::from(buffer_minutes));
    let day_start = proposed
        .start
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|d| d.and_utc())
        .unwrap_or(proposed.start);
    let last_day = (proposed.end - Duration::nanoseconds(1)).date_naive();
    let day_end = last_day
        .succ_opt()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
        .unwrap_or(proposed.end);
    Span::new(day_start - pad, day_end + pad)
}

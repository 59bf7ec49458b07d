use std::time::Instant;

use tracing::info;
use ulid::Ulid;

use super::{BookingService, SlotInput, guarded, side_effect_failed};
use crate::error::BookingError;
use crate::model::{JobAction, Meeting};
use crate::policy;
use crate::resilience::Dependency;
use crate::validation;

impl BookingService {
    async fn load(&self, uid: Ulid) -> Result<Meeting, BookingError> {
        self.deps
            .repository
            .get_meeting(uid)
            .await?
            .ok_or(BookingError::NotFound(uid))
    }

    /// Cancel a meeting and queue removal of its calendar event. The
    /// cancellation email is best-effort.
    pub async fn cancel(&self, uid: Ulid, reason: Option<&str>) -> Result<Meeting, BookingError> {
        let started = Instant::now();
        let result = self.cancel_inner(uid, reason).await;
        self.finish("cancel", started, &result);
        result
    }

    async fn cancel_inner(&self, uid: Ulid, reason: Option<&str>) -> Result<Meeting, BookingError> {
        let meeting = self.load(uid).await?;
        policy::can_cancel(&meeting, self.deps.clock.now())?;

        let clock = &self.deps.clock;
        let mutate = |current: &Meeting| -> Result<Meeting, BookingError> {
            let now = clock.now();
            policy::can_cancel(current, now)?;
            Ok(policy::cancelled(current, reason, now))
        };
        let job = self.job_request(JobAction::DeleteCalendarEvent, &meeting);
        let (meeting, _) = self
            .deps
            .repository
            .update_meeting_with_conflict_check(uid, &mutate, job)
            .await?;
        info!(meeting = %meeting.uid, organizer = meeting.organizer_user_id, "meeting cancelled");

        let breakers = self.deps.breakers.clone();
        let notifier = self.deps.notifier.clone();
        let cancelled = meeting.clone();
        tokio::spawn(async move {
            let result = guarded(&breakers, &Dependency::EmailService, || {
                notifier.meeting_cancelled(&cancelled)
            })
            .await;
            if let Err(e) = result {
                side_effect_failed("meeting_cancelled_email", &cancelled, &e);
            }
        });
        Ok(meeting)
    }

    /// Move a meeting to a new slot. The new slot goes through the same time
    /// policy as a fresh booking and the store's conflict check.
    pub async fn reschedule(&self, uid: Ulid, slot: SlotInput) -> Result<Meeting, BookingError> {
        let started = Instant::now();
        let result = self.reschedule_inner(uid, slot).await;
        self.finish("reschedule", started, &result);
        result
    }

    async fn reschedule_inner(&self, uid: Ulid, mut slot: SlotInput) -> Result<Meeting, BookingError> {
        let meeting = self.load(uid).await?;
        // Legality comes before the new slot is even looked at.
        policy::can_reschedule(&meeting, self.deps.clock.now())?;

        if slot.timezone.trim().is_empty() {
            slot.timezone = meeting.attendee_timezone.clone();
        }
        let window = slot.parse()?;
        let profile = self
            .deps
            .directory
            .organizer_profile(meeting.organizer_user_id)
            .await?;
        let config = policy::scheduling_config(profile.as_ref(), &self.settings.policy);
        validation::validate_booking_time(window.start, &config, self.deps.clock.now())?;

        let clock = &self.deps.clock;
        let timezone = slot.timezone.trim();
        let mutate = |current: &Meeting| -> Result<Meeting, BookingError> {
            let now = clock.now();
            policy::can_reschedule(current, now)?;
            Ok(policy::rescheduled(current, window, timezone, now))
        };
        let job = self.job_request(JobAction::UpdateCalendarEvent, &meeting);
        let (meeting, _) = self
            .deps
            .repository
            .update_meeting_with_conflict_check(uid, &mutate, job)
            .await?;
        info!(meeting = %meeting.uid, start = %meeting.start_time, "meeting rescheduled");
        Ok(meeting)
    }

    /// Ask the attendee to pick a new time. Times stay as they are.
    pub async fn request_reschedule(&self, uid: Ulid) -> Result<Meeting, BookingError> {
        let started = Instant::now();
        let result = self.request_reschedule_inner(uid).await;
        self.finish("request_reschedule", started, &result);
        result
    }

    async fn request_reschedule_inner(&self, uid: Ulid) -> Result<Meeting, BookingError> {
        let meeting = self.load(uid).await?;
        policy::can_reschedule(&meeting, self.deps.clock.now())?;

        let clock = &self.deps.clock;
        let mutate = |current: &Meeting| -> Result<Meeting, BookingError> {
            let now = clock.now();
            policy::can_reschedule(current, now)?;
            Ok(policy::reschedule_requested(current, now))
        };
        let job = self.job_request(JobAction::SendRescheduleRequest, &meeting);
        let (meeting, _) = self
            .deps
            .repository
            .update_meeting_with_conflict_check(uid, &mutate, job)
            .await?;
        info!(meeting = %meeting.uid, "reschedule requested");
        Ok(meeting)
    }
}

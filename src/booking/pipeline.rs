use std::time::Instant;

use tracing::info;
use ulid::Ulid;

use super::{
    AvailabilityOutcome, BookingConfirmation, BookingOptions, BookingRequest, BookingService, guarded,
    side_effect_failed,
};
use crate::error::BookingError;
use crate::model::{JobAction, Meeting, MeetingType, MeetingTypeId};
use crate::policy::{self, MeetingDraft};
use crate::providers::VideoProviderKind;
use crate::resilience::Dependency;
use crate::validation;

impl BookingService {
    /// Book a slot: validate, re-check the organizer's calendar, then commit
    /// the meeting and its calendar-sync job atomically.
    pub async fn create(
        &self,
        request: BookingRequest,
        options: BookingOptions,
    ) -> Result<BookingConfirmation, BookingError> {
        let started = Instant::now();
        let result = self.create_inner(request, options).await;
        self.finish("create", started, &result);
        result
    }

    async fn create_inner(
        &self,
        request: BookingRequest,
        options: BookingOptions,
    ) -> Result<BookingConfirmation, BookingError> {
        let window = request.slot.parse()?;

        let meeting_type = match request.meeting_type_id {
            Some(id) => Some(self.active_meeting_type(id).await?),
            None => None,
        };
        let organizer_id = request
            .organizer_id
            .or(meeting_type.as_ref().map(|mt| mt.organizer_user_id))
            .ok_or(BookingError::OrganizerRequired)?;
        let organizer = self
            .deps
            .directory
            .organizer_profile(organizer_id)
            .await?
            .ok_or(BookingError::OrganizerRequired)?;

        let config = policy::scheduling_config(Some(&organizer), &self.settings.policy);
        let now = self.deps.clock.now();
        validation::validate_booking_time(window.start, &config, now)?;
        let attendee = validation::validate_attendee(&request.attendee)?;

        let availability = if options.skip_availability_check {
            AvailabilityOutcome::Skipped
        } else {
            let outcome = super::check_fresh_availability(
                &self.deps.calendar,
                &organizer,
                window,
                config.buffer_minutes,
                self.settings.availability_timeout,
            )
            .await;
            self.settings.calendar_failure_policy.apply(outcome)?
        };

        let attendee_timezone = match request.slot.timezone.trim() {
            "" => "UTC",
            tz => tz,
        };
        let draft = MeetingDraft {
            id: Ulid::new(),
            uid: Ulid::new(),
            window,
            attendee_timezone,
            attendee: &attendee,
            organizer_user_id: organizer_id,
            organizer: Some(&organizer),
            meeting_type: meeting_type.as_ref(),
            // Re-read: the calendar check may have taken a while.
            now: self.deps.clock.now(),
        };
        let meeting = policy::build_meeting_attributes(&draft, &self.settings.policy);
        let job = self.job_request(JobAction::CreateCalendarEvent, &meeting);

        let (meeting, job) = self
            .deps
            .repository
            .create_meeting_with_conflict_check(meeting, job)
            .await?;
        info!(
            meeting = %meeting.uid,
            organizer = organizer_id,
            start = %meeting.start_time,
            availability = availability.as_str(),
            "meeting booked"
        );

        let video = meeting_type
            .as_ref()
            .and_then(|mt| mt.video_integration.as_ref())
            .map(|v| v.provider)
            .filter(|p| p.supports_api_room_creation());
        self.spawn_created_effects(&meeting, video);

        Ok(BookingConfirmation { meeting, availability, job })
    }

    async fn active_meeting_type(&self, id: MeetingTypeId) -> Result<MeetingType, BookingError> {
        match self.deps.directory.meeting_type(id).await? {
            Some(mt) if mt.active => Ok(mt),
            _ => Err(BookingError::MeetingTypeInactive),
        }
    }

    /// Video rooms send the confirmation emails themselves once the link
    /// exists; without one the emails go out directly.
    fn spawn_created_effects(&self, meeting: &Meeting, video: Option<VideoProviderKind>) {
        let breakers = self.deps.breakers.clone();
        let meeting = meeting.clone();
        match video {
            Some(kind) => {
                let rooms = self.deps.video.clone();
                tokio::spawn(async move {
                    let dep = Dependency::Video(kind);
                    let result = guarded(&breakers, &dep, || {
                        rooms.schedule_video_room_creation_with_emails(meeting.id)
                    })
                    .await;
                    if let Err(e) = result {
                        side_effect_failed("video_room", &meeting, &e);
                    }
                });
            }
            None => {
                let notifier = self.deps.notifier.clone();
                tokio::spawn(async move {
                    let result = guarded(&breakers, &Dependency::EmailService, || {
                        notifier.meeting_created(&meeting)
                    })
                    .await;
                    if let Err(e) = result {
                        side_effect_failed("meeting_created_email", &meeting, &e);
                    }
                });
            }
        }
    }
}

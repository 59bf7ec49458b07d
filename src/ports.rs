//! Collaborators the booking service calls out to.

use async_trait::async_trait;
use ulid::Ulid;

use crate::error::BookingError;
use crate::model::{
    EnqueueOutcome, JobRequest, Meeting, MeetingType, MeetingTypeId, OrganizerId, OrganizerProfile,
};
use crate::providers::ProviderError;

/// Read-only organizer and meeting-type lookups.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn organizer_profile(&self, id: OrganizerId) -> Result<Option<OrganizerProfile>, BookingError>;
    async fn meeting_type(&self, id: MeetingTypeId) -> Result<Option<MeetingType>, BookingError>;
}

/// Attendee and organizer emails.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn meeting_created(&self, meeting: &Meeting) -> Result<(), ProviderError>;
    async fn meeting_cancelled(&self, meeting: &Meeting) -> Result<(), ProviderError>;
}

#[async_trait]
pub trait VideoRooms: Send + Sync {
    /// Provision a room for the meeting, then send the confirmation emails
    /// carrying its link.
    async fn schedule_video_room_creation_with_emails(&self, meeting_id: Ulid) -> Result<(), ProviderError>;
}

/// Replaces a meeting inside an update transaction. Sees the freshest
/// stored row; an `Err` aborts the transaction.
pub type MeetingMutation<'a> = &'a (dyn Fn(&Meeting) -> Result<Meeting, BookingError> + Send + Sync);

/// Meeting persistence. Writes and their job enqueue commit together or not
/// at all; slot clashes surface as [`BookingError::TimeConflict`].
///
/// The minimum an implementation must refuse is a second slot-holding
/// meeting with the same organizer and start time. [`crate::store::MeetingStore`]
/// is stricter: it refuses any overlap between slot-holding meetings of one
/// organizer.
#[async_trait]
pub trait MeetingRepository: Send + Sync {
    async fn get_meeting(&self, uid: Ulid) -> Result<Option<Meeting>, BookingError>;

    async fn create_meeting_with_conflict_check(
        &self,
        meeting: Meeting,
        job: JobRequest,
    ) -> Result<(Meeting, EnqueueOutcome), BookingError>;

    async fn update_meeting_with_conflict_check(
        &self,
        uid: Ulid,
        mutate: MeetingMutation<'_>,
        job: JobRequest,
    ) -> Result<(Meeting, EnqueueOutcome), BookingError>;
}

/// Idempotent-by-key background job queue.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: JobRequest) -> Result<EnqueueOutcome, BookingError>;
}

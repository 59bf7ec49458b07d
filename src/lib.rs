//! Conflict-safe meeting booking.
//!
//! A [`booking::BookingService`] validates a requested slot, re-reads the
//! organizer's calendars under a hard timeout, and commits the meeting with
//! its background sync job in one atomic write. External calls go through
//! per-dependency circuit breakers and retry with backoff.

pub mod booking;
pub mod clock;
pub mod config;
pub mod error;
pub mod feed;
pub mod maintenance;
pub mod model;
pub mod observability;
pub mod policy;
pub mod ports;
pub mod providers;
pub mod resilience;
pub mod store;
pub mod time_range;
pub mod validation;

pub use booking::{
    AvailabilityOutcome, BookingConfirmation, BookingOptions, BookingRequest, BookingService,
    BookingSettings, CalendarFailurePolicy, Collaborators, SlotInput,
};
pub use config::Config;
pub use error::{BookingError, ErrorKind};
pub use store::MeetingStore;

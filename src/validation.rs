//! Pure booking validation: parsing raw form values into instants and
//! checking them against an organizer's thresholds. Nothing here reads
//! the clock or touches storage; "now" is always passed in.

use chrono::{Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{BookingError, PolicyRule, PolicyViolation};
use crate::model::{AttendeeForm, CalendarEvent, SchedulingConfig, Span, Timestamp};
use crate::time_range;

/// Assumed length of calendar events reported without an end.
pub const DEFAULT_EVENT_MINUTES: i64 = 30;
pub const MAX_DURATION_MINUTES: u32 = 24 * 60;

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_PHONE_LEN: usize = 40;
pub const MAX_MESSAGE_LEN: usize = 2000;

const TIME_FORMATS: [&str; 4] = ["%H:%M", "%H:%M:%S", "%I:%M %p", "%I:%M%p"];

/// Resolve a timezone name. Blank means UTC.
pub fn parse_timezone(timezone: &str) -> Result<Tz, BookingError> {
    let name = timezone.trim();
    if name.is_empty() {
        return Ok(Tz::UTC);
    }
    name.parse::<Tz>()
        .map_err(|_| BookingError::parse("timezone", format!("unknown timezone '{name}'")))
}

pub fn parse_duration_minutes(duration: &str) -> Result<u32, BookingError> {
    let raw = duration.trim();
    let digits = raw
        .strip_suffix("min")
        .or_else(|| raw.strip_suffix('m'))
        .unwrap_or(raw)
        .trim();
    let minutes: u32 = digits
        .parse()
        .map_err(|_| BookingError::parse("duration", format!("'{raw}' is not a number of minutes")))?;
    if minutes == 0 || minutes > MAX_DURATION_MINUTES {
        return Err(BookingError::parse(
            "duration",
            format!("must be between 1 and {MAX_DURATION_MINUTES} minutes"),
        ));
    }
    Ok(minutes)
}

fn parse_time(time: &str) -> Result<NaiveTime, BookingError> {
    let raw = time.trim();
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(raw, fmt).ok())
        .ok_or_else(|| BookingError::parse("time", format!("'{raw}' is not a time of day")))
}

/// Turn raw date/time/duration/timezone strings into a UTC window.
///
/// Ambiguous local times (DST fall-back) resolve to the earlier instant;
/// local times skipped by a DST jump are rejected.
pub fn parse_time_window(
    date: &str,
    time: &str,
    duration: &str,
    timezone: &str,
) -> Result<Span, BookingError> {
    let tz = parse_timezone(timezone)?;
    let day = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|_| BookingError::parse("date", "expected YYYY-MM-DD"))?;
    let local = NaiveDateTime::new(day, parse_time(time)?);
    let minutes = parse_duration_minutes(duration)?;

    let start = match tz.from_local_datetime(&local) {
        LocalResult::Single(t) => t,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => {
            return Err(BookingError::parse(
                "time",
                format!("{local} does not exist in {tz}"),
            ));
        }
    }
    .with_timezone(&Utc);

    Ok(Span::new(start, start + Duration::minutes(i64::from(minutes))))
}

// ── Time policy ──────────────────────────────────────────────────

/// Which threshold a proposed start failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeCheck {
    InPast,
    InsufficientNotice { min_advance_hours: u32 },
    BeyondBookingWindow { max_advance_booking_days: u32 },
}

impl TimeCheck {
    fn rule(self) -> PolicyRule {
        match self {
            TimeCheck::InPast => PolicyRule::InPast,
            TimeCheck::InsufficientNotice { .. } => PolicyRule::InsufficientNotice,
            TimeCheck::BeyondBookingWindow { .. } => PolicyRule::BeyondBookingWindow,
        }
    }
}

fn plural(n: u32, unit: &str) -> String {
    if n == 1 { format!("1 {unit}") } else { format!("{n} {unit}s") }
}

pub fn default_time_message(check: &TimeCheck) -> String {
    match *check {
        TimeCheck::InPast => "Selected time must be in the future.".into(),
        TimeCheck::InsufficientNotice { min_advance_hours } => format!(
            "Bookings require at least {} notice.",
            plural(min_advance_hours, "hour")
        ),
        TimeCheck::BeyondBookingWindow { max_advance_booking_days } => format!(
            "Bookings can only be made up to {} in advance.",
            plural(max_advance_booking_days, "day")
        ),
    }
}

pub fn validate_booking_time(
    start: Timestamp,
    config: &SchedulingConfig,
    now: Timestamp,
) -> Result<(), BookingError> {
    validate_booking_time_with(start, config, now, default_time_message)
}

/// Same thresholds as [`validate_booking_time`], with caller-supplied wording.
pub fn validate_booking_time_with<F>(
    start: Timestamp,
    config: &SchedulingConfig,
    now: Timestamp,
    message: F,
) -> Result<(), BookingError>
where
    F: Fn(&TimeCheck) -> String,
{
    let failed = if start <= now {
        Some(TimeCheck::InPast)
    } else if !config
        .min_advance_hours
        .checked_mul(60)
        .is_some_and(|minutes| time_range::meets_minimum_notice(start, now, minutes))
    {
        Some(TimeCheck::InsufficientNotice { min_advance_hours: config.min_advance_hours })
    } else if !time_range::within_booking_window(start, now, config.max_advance_booking_days) {
        Some(TimeCheck::BeyondBookingWindow {
            max_advance_booking_days: config.max_advance_booking_days,
        })
    } else {
        None
    };

    match failed {
        None => Ok(()),
        Some(check) => Err(PolicyViolation::new(check.rule(), message(&check)).into()),
    }
}

// ── Conflicts ────────────────────────────────────────────────────

/// Give every event a usable end. Missing or non-positive ends become
/// `start + DEFAULT_EVENT_MINUTES`.
pub fn normalize_events(events: &[CalendarEvent]) -> Vec<Span> {
    events
        .iter()
        .map(|e| {
            let end = e
                .end_time
                .filter(|end| *end > e.start_time)
                .unwrap_or(e.start_time + Duration::minutes(DEFAULT_EVENT_MINUTES));
            Span::new(e.start_time, end)
        })
        .collect()
}

pub fn check_slot_availability(
    proposed: &Span,
    events: &[CalendarEvent],
    buffer_minutes: u32,
) -> Result<(), BookingError> {
    let spans = normalize_events(events);
    if time_range::has_conflict_with_events(proposed, &spans, buffer_minutes) {
        Err(BookingError::SlotUnavailable)
    } else {
        Ok(())
    }
}

// ── Attendee fields ──────────────────────────────────────────────

fn looks_like_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}

fn optional_field(value: &Option<String>, field: &str, max: usize) -> Result<Option<String>, BookingError> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) if v.chars().count() > max => Err(BookingError::Validation(format!(
            "{field} must be at most {max} characters"
        ))),
        Some(v) => Ok(Some(v.to_string())),
    }
}

/// Trim and check the attendee's form fields.
pub fn validate_attendee(form: &AttendeeForm) -> Result<AttendeeForm, BookingError> {
    let name = form.name.trim();
    if name.is_empty() {
        return Err(BookingError::Validation("Name is required".into()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(BookingError::Validation(format!(
            "Name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    let email = form.email.trim().to_lowercase();
    if email.is_empty() {
        return Err(BookingError::Validation("Email is required".into()));
    }
    if email.len() > MAX_EMAIL_LEN || !looks_like_email(&email) {
        return Err(BookingError::Validation("Email address is not valid".into()));
    }

    Ok(AttendeeForm {
        name: name.to_string(),
        email,
        phone: optional_field(&form.phone, "Phone", MAX_PHONE_LEN)?,
        message: optional_field(&form.message, "Message", MAX_MESSAGE_LEN)?,
    })
}

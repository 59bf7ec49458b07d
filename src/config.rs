use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::booking::{BookingSettings, CalendarFailurePolicy};
use crate::policy::PolicyDefaults;

const DEFAULT_JOB_UNIQUE_WINDOW_SECS: i64 = 60;

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

/// Non-negative and representable as a `chrono::Duration`.
fn unique_window(secs: i64) -> Option<chrono::Duration> {
    if secs < 0 { None } else { chrono::Duration::try_seconds(secs) }
}

/// Process configuration, read from `SLOTKEEP_*` variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub data_dir: PathBuf,
    /// Prefix for view/reschedule/cancel links.
    pub base_url: String,
    pub availability_timeout_ms: u64,
    pub calendar_failure_policy: CalendarFailurePolicy,
    pub job_unique_window_secs: i64,
    /// WAL appends between compactions.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub default_organizer_name: Option<String>,
    pub default_organizer_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key → value source. Unparseable values fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str| lookup(key).map(|s| s.trim().to_string()).filter(|s| !s.is_empty());

        Self {
            data_dir: PathBuf::from(text("SLOTKEEP_DATA_DIR").unwrap_or_else(|| "./data".into())),
            base_url: text("SLOTKEEP_BASE_URL").unwrap_or_else(|| "http://localhost:4000".into()),
            availability_timeout_ms: parsed(&lookup, "SLOTKEEP_AVAILABILITY_TIMEOUT_MS").unwrap_or(5000),
            calendar_failure_policy: text("SLOTKEEP_CALENDAR_FAILURE_POLICY")
                .and_then(|s| CalendarFailurePolicy::from_name(&s))
                .unwrap_or_default(),
            job_unique_window_secs: parsed::<i64>(&lookup, "SLOTKEEP_JOB_UNIQUE_WINDOW_SECS")
                .filter(|secs| unique_window(*secs).is_some())
                .unwrap_or(DEFAULT_JOB_UNIQUE_WINDOW_SECS),
            compact_threshold: parsed(&lookup, "SLOTKEEP_COMPACT_THRESHOLD").unwrap_or(1000),
            metrics_port: parsed(&lookup, "SLOTKEEP_METRICS_PORT"),
            default_organizer_name: text("SLOTKEEP_DEFAULT_ORGANIZER_NAME"),
            default_organizer_email: text("SLOTKEEP_DEFAULT_ORGANIZER_EMAIL"),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("meetings.wal")
    }

    pub fn booking_settings(&self) -> BookingSettings {
        let mut policy = PolicyDefaults { base_url: self.base_url.clone(), ..PolicyDefaults::default() };
        if let Some(name) = &self.default_organizer_name {
            policy.organizer_name = name.clone();
        }
        if let Some(email) = &self.default_organizer_email {
            policy.organizer_email = email.clone();
        }
        BookingSettings {
            availability_timeout: Duration::from_millis(self.availability_timeout_ms),
            calendar_failure_policy: self.calendar_failure_policy,
            job_unique_window: unique_window(self.job_unique_window_secs)
                .unwrap_or(chrono::Duration::seconds(DEFAULT_JOB_UNIQUE_WINDOW_SECS)),
            policy,
        }
    }
}

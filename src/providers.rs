//! External provider kinds and guarded calendar access.
//!
//! Provider names stored on integrations resolve to closed enums through a
//! static `match`; clients are looked up in [`CalendarProviders`] by kind.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::model::{CalendarEvent, CalendarIntegration, OrganizerId, Timestamp};
use crate::resilience::breaker::CircuitOpen;
use crate::resilience::registry::{BreakerRegistry, Dependency};
use crate::resilience::retry::{self, RetryError, RetryOptions, Retriable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CalendarProviderKind {
    CalDav,
    Google,
    Outlook,
    Nextcloud,
    Radicale,
}

impl CalendarProviderKind {
    pub const ALL: [CalendarProviderKind; 5] = [
        CalendarProviderKind::CalDav,
        CalendarProviderKind::Google,
        CalendarProviderKind::Outlook,
        CalendarProviderKind::Nextcloud,
        CalendarProviderKind::Radicale,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "caldav" => Some(CalendarProviderKind::CalDav),
            "google" => Some(CalendarProviderKind::Google),
            "outlook" => Some(CalendarProviderKind::Outlook),
            "nextcloud" => Some(CalendarProviderKind::Nextcloud),
            "radicale" => Some(CalendarProviderKind::Radicale),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CalendarProviderKind::CalDav => "caldav",
            CalendarProviderKind::Google => "google",
            CalendarProviderKind::Outlook => "outlook",
            CalendarProviderKind::Nextcloud => "nextcloud",
            CalendarProviderKind::Radicale => "radicale",
        }
    }

    /// Servers speaking plain CalDAV.
    pub fn is_caldav_family(self) -> bool {
        matches!(
            self,
            CalendarProviderKind::CalDav | CalendarProviderKind::Nextcloud | CalendarProviderKind::Radicale
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoProviderKind {
    MiroTalk,
    GoogleMeet,
    Teams,
    /// A static link supplied by the organizer.
    Custom,
    None,
}

impl VideoProviderKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "mirotalk" => Some(VideoProviderKind::MiroTalk),
            "google_meet" => Some(VideoProviderKind::GoogleMeet),
            "teams" => Some(VideoProviderKind::Teams),
            "custom" => Some(VideoProviderKind::Custom),
            "none" | "" => Some(VideoProviderKind::None),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VideoProviderKind::MiroTalk => "mirotalk",
            VideoProviderKind::GoogleMeet => "google_meet",
            VideoProviderKind::Teams => "teams",
            VideoProviderKind::Custom => "custom",
            VideoProviderKind::None => "none",
        }
    }

    /// Whether rooms are provisioned through the provider's API.
    pub fn supports_api_room_creation(self) -> bool {
        matches!(
            self,
            VideoProviderKind::MiroTalk | VideoProviderKind::GoogleMeet | VideoProviderKind::Teams
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OAuthProvider {
    Google,
    Microsoft,
}

impl OAuthProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            OAuthProvider::Google => "google",
            OAuthProvider::Microsoft => "microsoft",
        }
    }
}

// ── Errors ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("credentials rejected")]
    Unauthorized,
    #[error("no client registered for provider {0}")]
    Unsupported(&'static str),
    #[error("circuit breaker '{breaker}' is open")]
    CircuitOpen { breaker: String },
    #[error("gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
    #[error("{0}")]
    Other(String),
}

impl Retriable for ProviderError {
    fn is_retriable(&self) -> bool {
        match self {
            ProviderError::Timeout | ProviderError::Network(_) => true,
            ProviderError::Http { status, .. } => retry::is_server_error_status(*status),
            ProviderError::Other(message) => retry::is_transient_message(message),
            ProviderError::Unauthorized
            | ProviderError::Unsupported(_)
            | ProviderError::CircuitOpen { .. }
            | ProviderError::RetriesExhausted { .. } => false,
        }
    }
}

impl From<CircuitOpen> for ProviderError {
    fn from(e: CircuitOpen) -> Self {
        ProviderError::CircuitOpen { breaker: e.breaker }
    }
}

impl From<RetryError<ProviderError>> for ProviderError {
    fn from(e: RetryError<ProviderError>) -> Self {
        match e {
            RetryError::Failed(inner) => inner,
            RetryError::MaxAttemptsExceeded { attempts, last_error } => ProviderError::RetriesExhausted {
                attempts,
                last_error: last_error.to_string(),
            },
        }
    }
}

// ── Calendar clients ─────────────────────────────────────────────

/// One implementation per calendar provider.
#[async_trait]
pub trait CalendarClient: Send + Sync {
    fn provider(&self) -> CalendarProviderKind;

    /// Events in `[from, to)` read straight from the provider, bypassing caches.
    async fn events_for_range_fresh(
        &self,
        organizer: OrganizerId,
        integration: &CalendarIntegration,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<CalendarEvent>, ProviderError>;
}

/// Static provider → client table.
#[derive(Clone, Default)]
pub struct CalendarProviders {
    clients: HashMap<CalendarProviderKind, Arc<dyn CalendarClient>>,
}

impl fmt::Debug for CalendarProviders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.clients.keys()).finish()
    }
}

impl CalendarProviders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `client` under the provider it reports.
    pub fn with(mut self, client: Arc<dyn CalendarClient>) -> Self {
        self.clients.insert(client.provider(), client);
        self
    }

    pub fn get(&self, kind: CalendarProviderKind) -> Option<&Arc<dyn CalendarClient>> {
        self.clients.get(&kind)
    }
}

/// Calendar reads wrapped in retry and the provider's circuit breaker.
///
/// Retries sit outside the breaker: each attempt is one breaker call, and an
/// open breaker ends the retry loop at once.
#[derive(Clone, Debug)]
pub struct GuardedCalendar {
    providers: CalendarProviders,
    breakers: Arc<BreakerRegistry>,
    retry: RetryOptions,
}

impl GuardedCalendar {
    pub fn new(providers: CalendarProviders, breakers: Arc<BreakerRegistry>, retry: RetryOptions) -> Self {
        Self { providers, breakers, retry }
    }

    /// Events from every calendar the organizer has connected, concatenated.
    /// The first failing calendar fails the whole read.
    pub async fn events_for_range_fresh(
        &self,
        organizer: OrganizerId,
        integrations: &[CalendarIntegration],
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<CalendarEvent>, ProviderError> {
        let mut events = Vec::new();
        for integration in integrations {
            let mut batch = self.fetch_one(organizer, integration, from, to).await?;
            debug!(organizer, provider = integration.provider.as_str(), count = batch.len(), "fetched events");
            events.append(&mut batch);
        }
        Ok(events)
    }

    async fn fetch_one(
        &self,
        organizer: OrganizerId,
        integration: &CalendarIntegration,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<CalendarEvent>, ProviderError> {
        let kind = integration.provider;
        let client = self
            .providers
            .get(kind)
            .ok_or(ProviderError::Unsupported(kind.as_str()))?;
        let breaker = self.breakers.get(&Dependency::Calendar(kind));

        let result = retry::with_backoff(
            move || async move {
                match breaker {
                    Some(b) => {
                        b.call(|| client.events_for_range_fresh(organizer, integration, from, to))
                            .await
                    }
                    None => client.events_for_range_fresh(organizer, integration, from, to).await,
                }
            },
            &self.retry,
        )
        .await;
        result.map_err(ProviderError::from)
    }
}

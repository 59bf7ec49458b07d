use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::providers::{CalendarProviderKind, OAuthProvider, VideoProviderKind};

use super::breaker::{BreakerConfig, BreakerSnapshot, CircuitBreaker};

/// An external system that gets its own breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dependency {
    Calendar(CalendarProviderKind),
    OAuth(OAuthProvider),
    EmailService,
    Video(VideoProviderKind),
}

impl Dependency {
    pub fn name(&self) -> String {
        match self {
            Dependency::Calendar(kind) => format!("calendar_{}", kind.as_str()),
            Dependency::OAuth(provider) => format!("oauth_{}", provider.as_str()),
            Dependency::EmailService => "email_service".to_string(),
            Dependency::Video(kind) => format!("video_{}", kind.as_str()),
        }
    }

    /// Every dependency that gets a breaker by default.
    pub fn defaults() -> Vec<Dependency> {
        let mut deps: Vec<Dependency> = CalendarProviderKind::ALL
            .into_iter()
            .map(Dependency::Calendar)
            .collect();
        deps.push(Dependency::OAuth(OAuthProvider::Google));
        deps.push(Dependency::OAuth(OAuthProvider::Microsoft));
        deps.push(Dependency::EmailService);
        deps.extend(
            [VideoProviderKind::MiroTalk, VideoProviderKind::GoogleMeet, VideoProviderKind::Teams]
                .into_iter()
                .map(Dependency::Video),
        );
        deps
    }
}

impl BreakerConfig {
    /// Stock tuning. Self-hosted CalDAV servers trip early and recover fast;
    /// OAuth endpoints get a longer window and cool-down.
    pub fn for_dependency(dep: &Dependency) -> Self {
        let (failure_threshold, window_secs, recovery_secs, half_open_requests) = match dep {
            Dependency::Calendar(kind) if kind.is_caldav_family() => (3, 60, 15, 1),
            Dependency::Calendar(_) => (5, 60, 30, 2),
            Dependency::OAuth(_) => (5, 120, 60, 1),
            Dependency::EmailService => (10, 60, 30, 2),
            Dependency::Video(_) => (5, 60, 30, 1),
        };
        BreakerConfig {
            name: dep.name(),
            failure_threshold,
            time_window: Duration::from_secs(window_secs),
            recovery_timeout: Duration::from_secs(recovery_secs),
            half_open_requests,
        }
    }
}

/// One breaker per dependency, built at startup and handed to whoever
/// calls out.
#[derive(Default)]
pub struct BreakerRegistry {
    breakers: HashMap<Dependency, CircuitBreaker>,
}

impl fmt::Debug for BreakerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.breakers.keys()).finish()
    }
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with stock tuning for [`Dependency::defaults`].
    /// Must be called inside a Tokio runtime.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for dep in Dependency::defaults() {
            registry.register(dep, BreakerConfig::for_dependency(&dep));
        }
        registry
    }

    /// Spawn a breaker for `dep`, replacing any existing one.
    pub fn register(&mut self, dep: Dependency, config: BreakerConfig) -> &CircuitBreaker {
        self.breakers.insert(dep, CircuitBreaker::spawn(config));
        &self.breakers[&dep]
    }

    pub fn get(&self, dep: &Dependency) -> Option<&CircuitBreaker> {
        self.breakers.get(dep)
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Current state of every breaker, sorted by name.
    pub async fn snapshot_all(&self) -> Vec<BreakerSnapshot> {
        let mut out = Vec::with_capacity(self.breakers.len());
        for breaker in self.breakers.values() {
            if let Some(snapshot) = breaker.snapshot().await {
                out.push(snapshot);
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}

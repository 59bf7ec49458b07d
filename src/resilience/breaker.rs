//! Per-dependency circuit breaker.
//!
//! State lives in [`BreakerCore`], a plain state machine. [`CircuitBreaker`]
//! is a cloneable handle to a task that owns one core and applies commands
//! in arrival order, so a breaker is never mutated from two places at once.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::observability::{BREAKER_REJECTIONS_TOTAL, BREAKER_STATE, BREAKER_TRANSITIONS_TOTAL};

const COMMAND_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    fn gauge_value(self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerConfig {
    pub name: String,
    /// Failures within `time_window` that open the breaker.
    pub failure_threshold: u32,
    pub time_window: Duration,
    /// How long the breaker stays open before letting trial calls through.
    pub recovery_timeout: Duration,
    /// Trial calls allowed while half-open; all must succeed to close.
    /// Values below 1 are treated as 1.
    pub half_open_requests: u32,
}

/// Returned instead of running the operation while the breaker is open.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit breaker '{breaker}' is open")]
pub struct CircuitOpen {
    pub breaker: String,
}

/// Decision for a single call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// Let through as one of the half-open trial calls.
    Trial,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: usize,
    pub opened_at: Option<Instant>,
}

// ── State machine ────────────────────────────────────────────────

#[derive(Debug)]
pub struct BreakerCore {
    config: BreakerConfig,
    state: CircuitState,
    /// Failure instants inside the rolling window, oldest first.
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    /// When the current trial budget was handed out.
    trials_started_at: Option<Instant>,
    trials_issued: u32,
    trial_successes: u32,
}

impl BreakerCore {
    pub fn new(mut config: BreakerConfig) -> Self {
        config.half_open_requests = config.half_open_requests.max(1);
        Self {
            config,
            state: CircuitState::Closed,
            failures: VecDeque::new(),
            opened_at: None,
            trials_started_at: None,
            trials_issued: 0,
            trial_successes: 0,
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Current state, promoting open → half-open once recovery has elapsed.
    pub fn state(&mut self, now: Instant) -> CircuitState {
        if self.state == CircuitState::Open
            && let Some(opened) = self.opened_at
            && now.duration_since(opened) >= self.config.recovery_timeout
        {
            self.transition(CircuitState::HalfOpen, now);
        }
        self.reissue_stale_trials(now);
        self.state
    }

    /// Trials unreported for a full recovery timeout are treated as lost and
    /// the half-open budget is handed out again.
    fn reissue_stale_trials(&mut self, now: Instant) {
        if self.state == CircuitState::HalfOpen
            && self.trials_issued >= self.config.half_open_requests
            && let Some(started) = self.trials_started_at
            && now.duration_since(started) >= self.config.recovery_timeout
        {
            warn!(
                breaker = %self.config.name,
                outstanding = self.trials_issued.saturating_sub(self.trial_successes),
                "half-open trials unreported, reissuing"
            );
            self.trials_issued = 0;
            self.trial_successes = 0;
            self.trials_started_at = None;
        }
    }

    pub fn failure_count(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.failures.len()
    }

    pub fn snapshot(&mut self, now: Instant) -> BreakerSnapshot {
        BreakerSnapshot {
            name: self.config.name.clone(),
            state: self.state(now),
            failure_count: self.failure_count(now),
            opened_at: self.opened_at,
        }
    }

    pub fn admit(&mut self, now: Instant) -> Admission {
        match self.state(now) {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => Admission::Rejected,
            CircuitState::HalfOpen if self.trials_issued < self.config.half_open_requests => {
                if self.trials_issued == 0 {
                    self.trials_started_at = Some(now);
                }
                self.trials_issued += 1;
                Admission::Trial
            }
            CircuitState::HalfOpen => Admission::Rejected,
        }
    }

    pub fn record_success(&mut self, admission: Admission, now: Instant) {
        if admission == Admission::Trial && self.state == CircuitState::HalfOpen {
            self.trial_successes += 1;
            if self.trial_successes >= self.config.half_open_requests {
                self.failures.clear();
                self.transition(CircuitState::Closed, now);
            }
        }
    }

    pub fn record_failure(&mut self, admission: Admission, now: Instant) {
        match (self.state, admission) {
            (CircuitState::Closed, Admission::Allowed) => {
                self.failures.push_back(now);
                self.prune(now);
                if self.failures.len() >= self.config.failure_threshold as usize {
                    self.transition(CircuitState::Open, now);
                }
            }
            (CircuitState::HalfOpen, Admission::Trial) => {
                self.transition(CircuitState::Open, now);
            }
            // Late reports from calls admitted under an earlier state.
            _ => {}
        }
    }

    pub fn reset(&mut self, now: Instant) {
        self.failures.clear();
        if self.state != CircuitState::Closed {
            self.transition(CircuitState::Closed, now);
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.failures.front() {
            if now.duration_since(oldest) >= self.config.time_window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn transition(&mut self, to: CircuitState, now: Instant) {
        let from = self.state;
        self.state = to;
        self.trials_issued = 0;
        self.trial_successes = 0;
        self.trials_started_at = None;
        self.opened_at = if to == CircuitState::Open { Some(now) } else { None };

        let name = &self.config.name;
        match to {
            CircuitState::Open => warn!(breaker = %name, %from, "circuit opened"),
            _ => info!(breaker = %name, %from, %to, "circuit state changed"),
        }
        metrics::counter!(BREAKER_TRANSITIONS_TOTAL, "breaker" => name.clone(), "to" => to.as_str())
            .increment(1);
        metrics::gauge!(BREAKER_STATE, "breaker" => name.clone()).set(to.gauge_value());
    }
}

// ── Owning task ──────────────────────────────────────────────────

enum Command {
    Admit { respond_to: oneshot::Sender<Admission> },
    Record { admission: Admission, success: bool },
    Snapshot { respond_to: oneshot::Sender<BreakerSnapshot> },
    Reset,
}

async fn breaker_loop(mut core: BreakerCore, mut rx: mpsc::Receiver<Command>) {
    while let Some(cmd) = rx.recv().await {
        let now = Instant::now();
        match cmd {
            Command::Admit { respond_to } => {
                let _ = respond_to.send(core.admit(now));
            }
            Command::Record { admission, success: true } => core.record_success(admission, now),
            Command::Record { admission, success: false } => core.record_failure(admission, now),
            Command::Snapshot { respond_to } => {
                let _ = respond_to.send(core.snapshot(now));
            }
            Command::Reset => core.reset(now),
        }
    }
}

/// Armed while a call is in flight. Dropping it armed means the caller
/// abandoned the call (e.g. timed out), which counts as a failure.
struct Permit {
    tx: mpsc::Sender<Command>,
    admission: Admission,
    armed: bool,
}

impl Drop for Permit {
    fn drop(&mut self) {
        if self.armed {
            // Best effort from a sync context; a lost trial report is
            // recovered by the half-open reissue.
            let _ = self.tx.try_send(Command::Record { admission: self.admission, success: false });
        }
    }
}

/// Handle to one breaker's owning task.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    tx: mpsc::Sender<Command>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker").field("name", &self.name).finish()
    }
}

impl CircuitBreaker {
    /// Spawn the owning task. Must be called inside a Tokio runtime.
    pub fn spawn(config: BreakerConfig) -> Self {
        let name: Arc<str> = Arc::from(config.name.as_str());
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        metrics::gauge!(BREAKER_STATE, "breaker" => config.name.clone())
            .set(CircuitState::Closed.gauge_value());
        tokio::spawn(breaker_loop(BreakerCore::new(config), rx));
        Self { name, tx }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn admit(&self) -> Admission {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Command::Admit { respond_to: tx }).await.is_err() {
            warn!(breaker = %self.name, "breaker task gone, letting call through");
            return Admission::Allowed;
        }
        rx.await.unwrap_or(Admission::Allowed)
    }

    /// Run `operation` unless the breaker is open. Any `Err` counts as a failure.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitOpen>,
    {
        let admission = self.admit().await;
        if admission == Admission::Rejected {
            metrics::counter!(BREAKER_REJECTIONS_TOTAL, "breaker" => self.name.to_string()).increment(1);
            return Err(CircuitOpen { breaker: self.name.to_string() }.into());
        }

        let mut permit = Permit { tx: self.tx.clone(), admission, armed: true };
        let result = operation().await;
        let report = Command::Record { admission, success: result.is_ok() };
        if self.tx.send(report).await.is_err() {
            warn!(breaker = %self.name, "breaker task gone, outcome not recorded");
        }
        permit.armed = false;
        result
    }

    pub async fn snapshot(&self) -> Option<BreakerSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(Command::Snapshot { respond_to: tx }).await.ok()?;
        rx.await.ok()
    }

    pub async fn state(&self) -> Option<CircuitState> {
        self.snapshot().await.map(|s| s.state)
    }

    /// Force the breaker closed and forget recorded failures.
    pub async fn reset(&self) {
        let _ = self.tx.send(Command::Reset).await;
    }
}

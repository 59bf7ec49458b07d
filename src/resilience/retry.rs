use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::debug;

/// Message fragments that mark a failure as transient.
const TRANSIENT_SIGNATURES: [&str; 10] = [
    "timeout",
    "timed out",
    "connection refused",
    "econnrefused",
    "connection reset",
    "econnreset",
    "connection closed",
    "nxdomain",
    "temporarily unavailable",
    "broken pipe",
];

/// Words that mark a following number as a status code.
const STATUS_MARKERS: [&str; 5] = ["http", "status", "code", "returned", "responded"];

/// How many tokens back a status marker may sit ("HTTP/1.1 503").
const STATUS_MARKER_REACH: usize = 3;

/// Whether an error is worth another attempt.
pub trait Retriable {
    fn is_retriable(&self) -> bool;
}

/// Default classification for free-form error messages: known network and
/// timeout signatures, and 5xx status codes. A number only reads as a status
/// when it follows a status marker or is the whole message.
pub fn is_transient_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    if TRANSIENT_SIGNATURES.iter().any(|sig| lower.contains(sig)) {
        return true;
    }
    let tokens: Vec<&str> = lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    tokens.iter().enumerate().any(|(i, tok)| {
        let is_5xx = tok.len() == 3 && tok.parse::<u16>().is_ok_and(is_server_error_status);
        let marked = tokens.len() == 1
            || tokens[i.saturating_sub(STATUS_MARKER_REACH)..i]
                .iter()
                .any(|prev| STATUS_MARKERS.contains(prev));
        is_5xx && marked
    })
}

pub fn is_server_error_status(status: u16) -> bool {
    (500..600).contains(&status)
}

impl Retriable for String {
    fn is_retriable(&self) -> bool {
        is_transient_message(self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryOptions {
    /// Total calls, including the first.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Fractional spread applied to each delay, e.g. 0.25 for ±25%.
    pub jitter: f64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            jitter: 0.25,
        }
    }
}

impl RetryOptions {
    /// Un-jittered delay before retry number `attempt` (1-based):
    /// `min(initial * 2^(attempt-1), max)`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }

    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let spread = self.jitter.min(1.0);
        let factor = 1.0 + rand::thread_rng().gen_range(-spread..=spread);
        base.mul_f64(factor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryError<E> {
    /// The operation failed with an error not worth retrying.
    #[error("operation failed: {0}")]
    Failed(E),
    #[error("gave up after {attempts} attempts: {last_error}")]
    MaxAttemptsExceeded { attempts: u32, last_error: E },
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Failed(e) | RetryError::MaxAttemptsExceeded { last_error: e, .. } => e,
        }
    }

    pub fn inner(&self) -> &E {
        match self {
            RetryError::Failed(e) | RetryError::MaxAttemptsExceeded { last_error: e, .. } => e,
        }
    }
}

/// Retry `operation` while its error is [`Retriable`].
pub async fn with_backoff<F, Fut, T, E>(operation: F, options: &RetryOptions) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retriable + std::fmt::Display,
{
    with_backoff_if(operation, options, |e: &E| e.is_retriable()).await
}

/// Retry `operation` while `retriable(&error)` holds and attempts remain.
/// Non-retriable errors return immediately without sleeping.
pub async fn with_backoff_if<F, Fut, T, E, P>(
    mut operation: F,
    options: &RetryOptions,
    retriable: P,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = options.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if !retriable(&e) => return Err(RetryError::Failed(e)),
            Err(e) if attempt >= max_attempts => {
                metrics::counter!(crate::observability::RETRY_EXHAUSTED_TOTAL).increment(1);
                return Err(RetryError::MaxAttemptsExceeded { attempts: attempt, last_error: e });
            }
            Err(e) => {
                let delay = options.jittered_delay(attempt);
                debug!(attempt, ?delay, "retrying after transient error: {e}");
                metrics::counter!(crate::observability::RETRY_ATTEMPTS_TOTAL).increment(1);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

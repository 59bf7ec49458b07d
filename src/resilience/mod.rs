//! Failure isolation for calls to external systems.

pub mod breaker;
pub mod registry;
pub mod retry;

pub use breaker::{BreakerConfig, BreakerSnapshot, CircuitBreaker, CircuitOpen, CircuitState};
pub use registry::{BreakerRegistry, Dependency};
pub use retry::{RetryError, RetryOptions, Retriable, with_backoff, with_backoff_if};

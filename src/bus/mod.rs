//! Event bus - prioritized typed pub/sub with middleware, back-pressure,
//! and retry

pub mod bus;
pub mod event;
pub mod filter;
pub mod middleware;

use std::time::Duration;

use thiserror::Error;

pub use bus::{BusStatsSnapshot, EventBus, SubscribeOptions, SubscriptionId};
pub use event::{is_valid_event_type, types, Event, EventPriority};
pub use filter::EventFilter;
pub use middleware::{
    handler_fn, CircuitBreakerMiddleware, EventHandler, FilterMiddleware, LoggingMiddleware,
    MetricsMiddleware, MetricsSnapshot, Middleware, RecoveryMiddleware, RetryMiddleware,
    TimeoutMiddleware, TransformMiddleware, ValidationMiddleware,
};

/// Event bus errors
#[derive(Debug, Clone, Error)]
pub enum BusError {
    /// The queue is full; the producer decides whether to drop or retry
    #[error("event queue is full")]
    Backpressure,

    #[error("event bus is closed")]
    Closed,

    #[error("handler failed: {0}")]
    Handler(String),

    #[error("handler panicked: {0}")]
    HandlerPanic(String),

    #[error("handler timed out after {0:?}")]
    HandlerTimeout(Duration),

    #[error("event rejected by validation")]
    Invalid,

    #[error("circuit breaker open")]
    CircuitOpen,
}

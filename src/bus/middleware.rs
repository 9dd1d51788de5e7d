//! Handler middleware - composable wrappers around event handlers

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;

use super::event::Event;
use super::filter::EventFilter;
use super::BusError;

/// An event handler. Implementations must be cheap to share; the bus clones
/// the `Arc` into each dispatch task.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Event) -> Result<(), BusError>;
}

struct FnHandler {
    f: Box<dyn Fn(Event) -> BoxFuture<'static, Result<(), BusError>> + Send + Sync>,
}

#[async_trait]
impl EventHandler for FnHandler {
    async fn handle(&self, event: Event) -> Result<(), BusError> {
        (self.f)(event).await
    }
}

/// Wrap an async closure as an [`EventHandler`]
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BusError>> + Send + 'static,
{
    Arc::new(FnHandler {
        f: Box::new(move |event| f(event).boxed()),
    })
}

/// Middleware wraps `handler → handler`. The first middleware in a chain is
/// the outermost wrapper.
pub trait Middleware: Send + Sync {
    fn name(&self) -> &'static str;
    fn wrap(&self, next: Arc<dyn EventHandler>) -> Arc<dyn EventHandler>;
}

/// Compose a chain around a handler, first element outermost.
pub fn apply_chain(
    chain: &[Arc<dyn Middleware>],
    handler: Arc<dyn EventHandler>,
) -> Arc<dyn EventHandler> {
    chain.iter().rev().fold(handler, |inner, mw| mw.wrap(inner))
}

// ───────────────────────────── logging ─────────────────────────────

/// Logs each delivery with its outcome and elapsed time
#[derive(Debug, Default)]
pub struct LoggingMiddleware;

struct LoggedHandler {
    next: Arc<dyn EventHandler>,
}

#[async_trait]
impl EventHandler for LoggedHandler {
    async fn handle(&self, event: Event) -> Result<(), BusError> {
        let event_type = event.event_type.clone();
        let started = Instant::now();
        let result = self.next.handle(event).await;
        tracing::debug!(
            event_type = %event_type,
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "event handled"
        );
        result
    }
}

impl Middleware for LoggingMiddleware {
    fn name(&self) -> &'static str {
        "logging"
    }

    fn wrap(&self, next: Arc<dyn EventHandler>) -> Arc<dyn EventHandler> {
        Arc::new(LoggedHandler { next })
    }
}

// ───────────────────────────── recovery ─────────────────────────────

/// Converts handler panics into error returns
#[derive(Debug, Default)]
pub struct RecoveryMiddleware;

struct RecoveredHandler {
    next: Arc<dyn EventHandler>,
}

#[async_trait]
impl EventHandler for RecoveredHandler {
    async fn handle(&self, event: Event) -> Result<(), BusError> {
        let outcome = std::panic::AssertUnwindSafe(self.next.handle(event))
            .catch_unwind()
            .await;
        match outcome {
            Ok(result) => result,
            Err(panic) => Err(BusError::HandlerPanic(panic_message(&panic))),
        }
    }
}

impl Middleware for RecoveryMiddleware {
    fn name(&self) -> &'static str {
        "recovery"
    }

    fn wrap(&self, next: Arc<dyn EventHandler>) -> Arc<dyn EventHandler> {
        Arc::new(RecoveredHandler { next })
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ───────────────────────────── timeout ─────────────────────────────

/// Cancels the handler after a bound
#[derive(Debug)]
pub struct TimeoutMiddleware {
    limit: Duration,
}

impl TimeoutMiddleware {
    pub fn new(limit: Duration) -> Self {
        Self { limit }
    }
}

struct TimedOutHandler {
    next: Arc<dyn EventHandler>,
    limit: Duration,
}

#[async_trait]
impl EventHandler for TimedOutHandler {
    async fn handle(&self, event: Event) -> Result<(), BusError> {
        tokio::time::timeout(self.limit, self.next.handle(event))
            .await
            .unwrap_or(Err(BusError::HandlerTimeout(self.limit)))
    }
}

impl Middleware for TimeoutMiddleware {
    fn name(&self) -> &'static str {
        "timeout"
    }

    fn wrap(&self, next: Arc<dyn EventHandler>) -> Arc<dyn EventHandler> {
        Arc::new(TimedOutHandler {
            next,
            limit: self.limit,
        })
    }
}

// ───────────────────────────── validation ─────────────────────────────

/// Rejects events failing a predicate
pub struct ValidationMiddleware {
    predicate: Arc<dyn Fn(&Event) -> bool + Send + Sync>,
}

impl ValidationMiddleware {
    pub fn new(predicate: impl Fn(&Event) -> bool + Send + Sync + 'static) -> Self {
        Self {
            predicate: Arc::new(predicate),
        }
    }
}

struct ValidatedHandler {
    next: Arc<dyn EventHandler>,
    predicate: Arc<dyn Fn(&Event) -> bool + Send + Sync>,
}

#[async_trait]
impl EventHandler for ValidatedHandler {
    async fn handle(&self, event: Event) -> Result<(), BusError> {
        if !(self.predicate)(&event) {
            return Err(BusError::Invalid);
        }
        self.next.handle(event).await
    }
}

impl Middleware for ValidationMiddleware {
    fn name(&self) -> &'static str {
        "validation"
    }

    fn wrap(&self, next: Arc<dyn EventHandler>) -> Arc<dyn EventHandler> {
        Arc::new(ValidatedHandler {
            next,
            predicate: Arc::clone(&self.predicate),
        })
    }
}

// ───────────────────────────── transformation ─────────────────────────────

/// Replaces the event before the handler sees it
pub struct TransformMiddleware {
    transform: Arc<dyn Fn(Event) -> Event + Send + Sync>,
}

impl TransformMiddleware {
    pub fn new(transform: impl Fn(Event) -> Event + Send + Sync + 'static) -> Self {
        Self {
            transform: Arc::new(transform),
        }
    }
}

struct TransformedHandler {
    next: Arc<dyn EventHandler>,
    transform: Arc<dyn Fn(Event) -> Event + Send + Sync>,
}

#[async_trait]
impl EventHandler for TransformedHandler {
    async fn handle(&self, event: Event) -> Result<(), BusError> {
        self.next.handle((self.transform)(event)).await
    }
}

impl Middleware for TransformMiddleware {
    fn name(&self) -> &'static str {
        "transformation"
    }

    fn wrap(&self, next: Arc<dyn EventHandler>) -> Arc<dyn EventHandler> {
        Arc::new(TransformedHandler {
            next,
            transform: Arc::clone(&self.transform),
        })
    }
}

// ───────────────────────────── retry ─────────────────────────────

/// Fixed-ratio retries with linear back-off (`delay * attempt`)
#[derive(Debug)]
pub struct RetryMiddleware {
    max_retries: u32,
    delay: Duration,
}

impl RetryMiddleware {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }
}

struct RetriedHandler {
    next: Arc<dyn EventHandler>,
    max_retries: u32,
    delay: Duration,
}

#[async_trait]
impl EventHandler for RetriedHandler {
    async fn handle(&self, event: Event) -> Result<(), BusError> {
        let mut attempt = 0u32;
        loop {
            match self.next.handle(event.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    attempt += 1;
                    if attempt > self.max_retries {
                        return Err(e);
                    }
                    tokio::time::sleep(self.delay * attempt).await;
                }
            }
        }
    }
}

impl Middleware for RetryMiddleware {
    fn name(&self) -> &'static str {
        "retry"
    }

    fn wrap(&self, next: Arc<dyn EventHandler>) -> Arc<dyn EventHandler> {
        Arc::new(RetriedHandler {
            next,
            max_retries: self.max_retries,
            delay: self.delay,
        })
    }
}

// ───────────────────────────── filter ─────────────────────────────

/// Silently skips events the filter rejects
#[derive(Debug)]
pub struct FilterMiddleware {
    filter: EventFilter,
}

impl FilterMiddleware {
    pub fn new(filter: EventFilter) -> Self {
        Self { filter }
    }
}

struct FilteredHandler {
    next: Arc<dyn EventHandler>,
    filter: EventFilter,
}

#[async_trait]
impl EventHandler for FilteredHandler {
    async fn handle(&self, event: Event) -> Result<(), BusError> {
        if !self.filter.accepts(&event) {
            return Ok(());
        }
        self.next.handle(event).await
    }
}

impl Middleware for FilterMiddleware {
    fn name(&self) -> &'static str {
        "filter"
    }

    fn wrap(&self, next: Arc<dyn EventHandler>) -> Arc<dyn EventHandler> {
        Arc::new(FilteredHandler {
            next,
            filter: self.filter.clone(),
        })
    }
}

// ───────────────────────────── metrics ─────────────────────────────

/// Delivery counts plus a coarse latency histogram
#[derive(Debug, Default)]
struct MetricsInner {
    handled: AtomicU64,
    failed: AtomicU64,
    // Buckets: <1ms, <10ms, <100ms, <1s, >=1s
    buckets: [AtomicU64; 5],
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub handled: u64,
    pub failed: u64,
    pub latency_buckets: [u64; 5],
}

#[derive(Debug, Default, Clone)]
pub struct MetricsMiddleware {
    inner: Arc<MetricsInner>,
}

impl MetricsMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            handled: self.inner.handled.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
            latency_buckets: std::array::from_fn(|i| self.inner.buckets[i].load(Ordering::Relaxed)),
        }
    }
}

struct MeteredHandler {
    next: Arc<dyn EventHandler>,
    inner: Arc<MetricsInner>,
}

#[async_trait]
impl EventHandler for MeteredHandler {
    async fn handle(&self, event: Event) -> Result<(), BusError> {
        let started = Instant::now();
        let result = self.next.handle(event).await;
        let elapsed = started.elapsed();

        self.inner.handled.fetch_add(1, Ordering::Relaxed);
        if result.is_err() {
            self.inner.failed.fetch_add(1, Ordering::Relaxed);
        }
        let bucket = match elapsed.as_millis() {
            0 => 0,
            1..=9 => 1,
            10..=99 => 2,
            100..=999 => 3,
            _ => 4,
        };
        self.inner.buckets[bucket].fetch_add(1, Ordering::Relaxed);
        result
    }
}

impl Middleware for MetricsMiddleware {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn wrap(&self, next: Arc<dyn EventHandler>) -> Arc<dyn EventHandler> {
        Arc::new(MeteredHandler {
            next,
            inner: Arc::clone(&self.inner),
        })
    }
}

// ───────────────────────────── circuit breaker ─────────────────────────────

#[derive(Debug)]
struct BreakerState {
    consecutive_failures: u32,
    opened_at: Option<tokio::time::Instant>,
}

/// Per-subscription circuit breaker: opens after N consecutive failures,
/// half-opens after the reset timeout, closes again on a successful trial.
///
/// Each `wrap` call gets fresh state, so one middleware instance attached to
/// several subscriptions tracks each independently.
#[derive(Debug)]
pub struct CircuitBreakerMiddleware {
    failure_threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreakerMiddleware {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            reset_timeout,
        }
    }
}

struct BreakerHandler {
    next: Arc<dyn EventHandler>,
    failure_threshold: u32,
    reset_timeout: Duration,
    state: Mutex<BreakerState>,
}

#[async_trait]
impl EventHandler for BreakerHandler {
    async fn handle(&self, event: Event) -> Result<(), BusError> {
        {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(opened_at) = state.opened_at {
                if opened_at.elapsed() < self.reset_timeout {
                    return Err(BusError::CircuitOpen);
                }
                // Half-open: allow one trial delivery
                state.opened_at = None;
            }
        }

        let result = self.next.handle(event).await;

        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        match &result {
            Ok(()) => {
                state.consecutive_failures = 0;
            }
            Err(_) => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.failure_threshold {
                    state.opened_at = Some(tokio::time::Instant::now());
                }
            }
        }
        result
    }
}

impl Middleware for CircuitBreakerMiddleware {
    fn name(&self) -> &'static str {
        "circuit_breaker"
    }

    fn wrap(&self, next: Arc<dyn EventHandler>) -> Arc<dyn EventHandler> {
        Arc::new(BreakerHandler {
            next,
            failure_threshold: self.failure_threshold,
            reset_timeout: self.reset_timeout,
            state: Mutex::new(BreakerState {
                consecutive_failures: 0,
                opened_at: None,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    use super::super::event::types;
    use super::*;

    fn event() -> Event {
        Event::new(types::TOOL_START, HashMap::new())
    }

    fn counting_handler() -> (Arc<dyn EventHandler>, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&count);
        let handler = handler_fn(move |_| {
            let counted = Arc::clone(&counted);
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        (handler, count)
    }

    fn failing_handler() -> Arc<dyn EventHandler> {
        handler_fn(|_| async { Err(BusError::Handler("boom".into())) })
    }

    #[tokio::test]
    async fn test_chain_order_outermost_first() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let trace = |label: &'static str, order: Arc<Mutex<Vec<&'static str>>>| {
            TransformMiddleware::new(move |event| {
                order.lock().unwrap().push(label);
                event
            })
        };

        let chain: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(trace("first", Arc::clone(&order))),
            Arc::new(trace("second", Arc::clone(&order))),
        ];
        let (handler, _count) = counting_handler();
        let wrapped = apply_chain(&chain, handler);
        wrapped.handle(event()).await.unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_recovery_converts_panics() {
        let panicking = handler_fn(|_| async { panic!("handler exploded") });
        let wrapped = RecoveryMiddleware.wrap(panicking);
        let err = wrapped.handle(event()).await.unwrap_err();
        assert!(matches!(err, BusError::HandlerPanic(msg) if msg.contains("exploded")));
    }

    #[tokio::test]
    async fn test_timeout_cancels_slow_handler() {
        let slow = handler_fn(|_| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        });
        let wrapped = TimeoutMiddleware::new(Duration::from_millis(10)).wrap(slow);
        let err = wrapped.handle(event()).await.unwrap_err();
        assert!(matches!(err, BusError::HandlerTimeout(_)));
    }

    #[tokio::test]
    async fn test_validation_rejects() {
        let (handler, count) = counting_handler();
        let wrapped = ValidationMiddleware::new(|e| e.event_type.starts_with("llm.")).wrap(handler);
        assert!(matches!(wrapped.handle(event()).await, Err(BusError::Invalid)));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transformation_replaces_event() {
        let seen = Arc::new(Mutex::new(String::new()));
        let seen_in = Arc::clone(&seen);
        let handler = handler_fn(move |event: Event| {
            let seen_in = Arc::clone(&seen_in);
            async move {
                *seen_in.lock().unwrap() = event.event_type;
                Ok(())
            }
        });
        let wrapped = TransformMiddleware::new(|mut event: Event| {
            event.event_type = "tool.output".to_string();
            event
        })
        .wrap(handler);

        wrapped.handle(event()).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), "tool.output");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_retries_then_succeeds() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in = Arc::clone(&calls);
        let flaky = handler_fn(move |_| {
            let calls_in = Arc::clone(&calls_in);
            async move {
                if calls_in.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(BusError::Handler("flaky".into()))
                } else {
                    Ok(())
                }
            }
        });
        let wrapped = RetryMiddleware::new(3, Duration::from_millis(10)).wrap(flaky);
        wrapped.handle(event()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion() {
        let wrapped = RetryMiddleware::new(2, Duration::from_millis(1)).wrap(failing_handler());
        assert!(wrapped.handle(event()).await.is_err());
    }

    #[tokio::test]
    async fn test_filter_skips_silently() {
        let (handler, count) = counting_handler();
        let wrapped =
            FilterMiddleware::new(EventFilter::Type("llm.error".to_string())).wrap(handler);
        wrapped.handle(event()).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_metrics_counts_and_buckets() {
        let metrics = MetricsMiddleware::new();
        let (handler, _count) = counting_handler();
        let wrapped = metrics.wrap(handler);
        wrapped.handle(event()).await.unwrap();
        wrapped.handle(event()).await.unwrap();

        let failing = metrics.wrap(failing_handler());
        let _ = failing.handle(event()).await;

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.handled, 3);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.latency_buckets.iter().sum::<u64>(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_opens_and_recovers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in = Arc::clone(&calls);
        let fail_twice = handler_fn(move |_| {
            let calls_in = Arc::clone(&calls_in);
            async move {
                if calls_in.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(BusError::Handler("down".into()))
                } else {
                    Ok(())
                }
            }
        });

        let breaker = CircuitBreakerMiddleware::new(2, Duration::from_millis(100));
        let wrapped = breaker.wrap(fail_twice);

        assert!(wrapped.handle(event()).await.is_err());
        assert!(wrapped.handle(event()).await.is_err());

        // Open: delivery short-circuits without reaching the handler
        let err = wrapped.handle(event()).await.unwrap_err();
        assert!(matches!(err, BusError::CircuitOpen));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // After the reset timeout, a half-open trial succeeds and closes it
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(wrapped.handle(event()).await.is_ok());
        assert!(wrapped.handle(event()).await.is_ok());
    }

    #[tokio::test]
    async fn test_breaker_state_is_per_wrap() {
        let breaker = CircuitBreakerMiddleware::new(1, Duration::from_secs(60));
        let tripped = breaker.wrap(failing_handler());
        let (healthy_handler, count) = counting_handler();
        let healthy = breaker.wrap(healthy_handler);

        let _ = tripped.handle(event()).await;
        let err = tripped.handle(event()).await.unwrap_err();
        assert!(matches!(err, BusError::CircuitOpen));

        // The other wrapped handler is unaffected
        healthy.handle(event()).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}

//! The event bus - bounded queue, dispatch worker, subscriptions, stats

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::BusSettings;

use super::event::{Event, EventPriority};
use super::filter::EventFilter;
use super::middleware::{apply_chain, EventHandler, Middleware};
use super::BusError;

/// Opaque subscription handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

/// Options for [`EventBus::subscribe_with`]
#[derive(Default)]
pub struct SubscribeOptions {
    /// Dispatch ordering among subscribers of one bucket (higher first)
    pub priority: i32,
    /// Unsubscribe after the first delivery
    pub once: bool,
    /// Filter chain; every filter must accept the event
    pub filters: Vec<EventFilter>,
    /// Per-subscription middleware (e.g. a circuit breaker)
    pub middleware: Vec<Arc<dyn Middleware>>,
}

#[derive(Clone)]
struct Subscription {
    id: SubscriptionId,
    priority: i32,
    once: bool,
    filters: Vec<EventFilter>,
    handler: Arc<dyn EventHandler>,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl Subscription {
    fn accepts(&self, event: &Event) -> bool {
        self.filters.iter().all(|f| f.accepts(event))
    }
}

/// Counter snapshot from [`EventBus::get_stats`].
///
/// `events_processed` counts successful handler deliveries and
/// `events_failed` deliveries that exhausted their retries.
#[derive(Debug, Clone, Default)]
pub struct BusStatsSnapshot {
    pub events_published: u64,
    pub events_processed: u64,
    pub events_failed: u64,
    pub subscriber_count: usize,
    pub last_error: Option<String>,
    pub last_error_time: Option<DateTime<Utc>>,
}

struct BusInner {
    typed: RwLock<HashMap<String, Vec<Subscription>>>,
    global: RwLock<Vec<Subscription>>,
    middleware: RwLock<Vec<Arc<dyn Middleware>>>,
    settings: BusSettings,
    closed: AtomicBool,
    shutdown: CancellationToken,
    published: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    subscriber_count: AtomicUsize,
    last_error: Mutex<Option<(String, DateTime<Utc>)>>,
}

/// Process-wide prioritized pub/sub.
///
/// Publishing is non-blocking: a full queue returns
/// [`BusError::Backpressure`] and the producer decides what to do. A single
/// worker drains the queue and spawns one task per accepting subscription.
///
/// Events carry a priority, but the queue is a single FIFO: priority orders
/// handlers within a bucket and annotates logging, it does not reorder
/// pending events. Producers needing strict priority lanes should use
/// separate subscriptions.
pub struct EventBus {
    inner: Arc<BusInner>,
    tx: mpsc::Sender<Event>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventBus {
    /// Create the bus and start its dispatch worker
    pub fn new(settings: BusSettings) -> Self {
        let (tx, mut rx) = mpsc::channel::<Event>(settings.capacity.max(1));
        let inner = Arc::new(BusInner {
            typed: RwLock::new(HashMap::new()),
            global: RwLock::new(Vec::new()),
            middleware: RwLock::new(Vec::new()),
            settings,
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            published: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            subscriber_count: AtomicUsize::new(0),
            last_error: Mutex::new(None),
        });

        let worker_inner = Arc::clone(&inner);
        let worker = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = worker_inner.shutdown.cancelled() => break,
                    received = rx.recv() => match received {
                        Some(event) => dispatch_event(&worker_inner, event, true).await,
                        None => break,
                    },
                }
            }
            tracing::debug!("event bus dispatcher stopped");
        });

        Self {
            inner,
            tx,
            worker: Mutex::new(Some(worker)),
        }
    }

    // ── subscriptions ──────────────────────────────────────────────────

    pub fn subscribe(&self, event_type: &str, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        self.subscribe_with(Some(event_type), handler, SubscribeOptions::default())
    }

    /// Subscribe to every event regardless of type
    pub fn subscribe_global(&self, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        self.subscribe_with(None, handler, SubscribeOptions::default())
    }

    pub fn subscribe_with(
        &self,
        event_type: Option<&str>,
        handler: Arc<dyn EventHandler>,
        options: SubscribeOptions,
    ) -> SubscriptionId {
        let subscription = Subscription {
            id: SubscriptionId(Uuid::new_v4()),
            priority: options.priority,
            once: options.once,
            filters: options.filters,
            handler,
            middleware: options.middleware,
        };
        let id = subscription.id;

        match event_type {
            Some(ty) => {
                let mut typed = write(&self.inner.typed);
                insert_by_priority(typed.entry(ty.to_string()).or_default(), subscription);
            }
            None => insert_by_priority(&mut write(&self.inner.global), subscription),
        }
        self.inner.subscriber_count.fetch_add(1, Ordering::SeqCst);
        id
    }

    /// Remove a subscription. Idempotent; safe to call after close.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.remove_subscription(id);
    }

    /// Append a middleware to the bus-wide chain (outermost first)
    pub fn add_middleware(&self, middleware: Arc<dyn Middleware>) {
        write(&self.inner.middleware).push(middleware);
    }

    // ── publishing ─────────────────────────────────────────────────────

    /// Non-blocking publish; a full queue yields back-pressure
    pub fn publish(
        &self,
        event_type: impl Into<String>,
        data: HashMap<String, Value>,
    ) -> Result<(), BusError> {
        self.publish_event(Event::new(event_type, data))
    }

    /// Publish with an explicit priority. The priority rides on the event;
    /// it does not reorder the FIFO queue.
    pub fn publish_with_priority(
        &self,
        event_type: impl Into<String>,
        data: HashMap<String, Value>,
        priority: EventPriority,
    ) -> Result<(), BusError> {
        self.publish_event(Event::new(event_type, data).with_priority(priority))
    }

    pub fn publish_event(&self, event: Event) -> Result<(), BusError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        match self.tx.try_send(event) {
            Ok(()) => {
                self.inner.published.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(BusError::Backpressure),
            Err(TrySendError::Closed(_)) => Err(BusError::Closed),
        }
    }

    /// Bypass the queue and dispatch on the caller's stack, returning after
    /// every accepting handler has finished.
    pub async fn publish_sync(&self, event: Event) -> Result<(), BusError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        self.inner.published.fetch_add(1, Ordering::SeqCst);
        dispatch_event(&self.inner, event, false).await;
        Ok(())
    }

    // ── lifecycle & stats ──────────────────────────────────────────────

    /// Cancel dispatch, wait for the worker, and reject further publishes
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.shutdown.cancel();
        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        tracing::debug!("event bus closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscriber_count.load(Ordering::SeqCst)
    }

    pub fn get_stats(&self) -> BusStatsSnapshot {
        let last = lock(&self.inner.last_error).clone();
        BusStatsSnapshot {
            events_published: self.inner.published.load(Ordering::SeqCst),
            events_processed: self.inner.processed.load(Ordering::SeqCst),
            events_failed: self.inner.failed.load(Ordering::SeqCst),
            subscriber_count: self.inner.subscriber_count.load(Ordering::SeqCst),
            last_error: last.as_ref().map(|(msg, _)| msg.clone()),
            last_error_time: last.map(|(_, at)| at),
        }
    }

    pub fn reset_stats(&self) {
        self.inner.published.store(0, Ordering::SeqCst);
        self.inner.processed.store(0, Ordering::SeqCst);
        self.inner.failed.store(0, Ordering::SeqCst);
        *lock(&self.inner.last_error) = None;
    }
}

impl BusInner {
    fn remove_subscription(&self, id: SubscriptionId) {
        let mut removed = false;
        {
            let mut global = write(&self.global);
            let before = global.len();
            global.retain(|s| s.id != id);
            removed |= global.len() != before;
        }
        if !removed {
            let mut typed = write(&self.typed);
            for list in typed.values_mut() {
                let before = list.len();
                list.retain(|s| s.id != id);
                if list.len() != before {
                    removed = true;
                    break;
                }
            }
        }
        if removed {
            self.subscriber_count.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn record_failure(&self, error: &BusError) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        *lock(&self.last_error) = Some((error.to_string(), Utc::now()));
    }
}

/// Higher priority first; ties keep insertion order.
fn insert_by_priority(list: &mut Vec<Subscription>, subscription: Subscription) {
    let index = list.partition_point(|s| s.priority >= subscription.priority);
    list.insert(index, subscription);
}

/// Snapshot accepting subscribers under the read lock, release it, then
/// deliver: spawned when draining the queue, inline for `publish_sync`.
async fn dispatch_event(inner: &Arc<BusInner>, event: Event, spawn: bool) {
    let mut targets: Vec<Subscription> = Vec::new();
    {
        let global = read(&inner.global);
        targets.extend(global.iter().filter(|s| s.accepts(&event)).cloned());
    }
    {
        let typed = read(&inner.typed);
        if let Some(list) = typed.get(&event.event_type) {
            targets.extend(list.iter().filter(|s| s.accepts(&event)).cloned());
        }
    }
    let bus_chain: Vec<Arc<dyn Middleware>> = read(&inner.middleware).clone();

    for subscription in targets {
        let handler = apply_chain(
            &bus_chain,
            apply_chain(&subscription.middleware, Arc::clone(&subscription.handler)),
        );
        let delivery = deliver(Arc::clone(inner), subscription, handler, event.clone());
        if spawn {
            tokio::spawn(delivery);
        } else {
            delivery.await;
        }
    }
}

/// One delivery: per-event timeout bounds the handler including retries;
/// bus shutdown cancels immediately.
async fn deliver(
    inner: Arc<BusInner>,
    subscription: Subscription,
    handler: Arc<dyn EventHandler>,
    event: Event,
) {
    let timeout = inner.settings.handler_timeout();
    let max_retries = inner.settings.max_retries;
    let delay = inner.settings.retry_delay();
    let event_type = event.event_type.clone();
    let priority = event.priority;

    let attempts = async {
        let mut attempt = 0u32;
        loop {
            match handler.handle(event.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    attempt += 1;
                    if attempt > max_retries {
                        return Err(e);
                    }
                    tracing::debug!(
                        event_type = %event_type,
                        attempt,
                        "handler failed, retrying"
                    );
                    tokio::time::sleep(delay * attempt).await;
                }
            }
        }
    };

    let outcome = tokio::select! {
        _ = inner.shutdown.cancelled() => Err(BusError::Closed),
        bounded = tokio::time::timeout(timeout, attempts) => {
            bounded.unwrap_or(Err(BusError::HandlerTimeout(timeout)))
        }
    };

    match outcome {
        Ok(()) => {
            inner.processed.fetch_add(1, Ordering::SeqCst);
        }
        Err(e) => {
            tracing::warn!(event_type = %event_type, ?priority, error = %e, "event delivery failed");
            inner.record_failure(&e);
        }
    }

    if subscription.once {
        inner.remove_subscription(subscription.id);
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|p| p.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|p| p.into_inner())
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::super::event::types;
    use super::super::middleware::handler_fn;
    use super::*;

    fn test_settings() -> BusSettings {
        BusSettings {
            capacity: 64,
            handler_timeout_ms: 1000,
            max_retries: 3,
            retry_delay_ms: 1,
        }
    }

    /// Handler that forwards each received event type into a channel
    fn forwarding_handler(tx: mpsc::UnboundedSender<String>) -> Arc<dyn EventHandler> {
        handler_fn(move |event: Event| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(event.event_type);
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn test_typed_delivery() {
        let bus = EventBus::new(test_settings());
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe(types::TOOL_START, forwarding_handler(tx));

        bus.publish(types::TOOL_START, HashMap::new()).unwrap();
        bus.publish(types::LLM_ERROR, HashMap::new()).unwrap();
        bus.publish(types::TOOL_START, HashMap::new()).unwrap();

        assert_eq!(rx.recv().await.unwrap(), "tool.start");
        assert_eq!(rx.recv().await.unwrap(), "tool.start");
        assert!(rx.try_recv().is_err());
        bus.close().await;
    }

    #[tokio::test]
    async fn test_global_subscriber_sees_everything_in_order() {
        let bus = EventBus::new(test_settings());
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe_global(forwarding_handler(tx));

        bus.publish(types::SESSION_CREATED, HashMap::new()).unwrap();
        bus.publish(types::TOOL_START, HashMap::new()).unwrap();
        bus.publish(types::AGENT_COMPLETED, HashMap::new()).unwrap();

        // Queue order is FIFO for a global subscriber
        assert_eq!(rx.recv().await.unwrap(), "session.created");
        assert_eq!(rx.recv().await.unwrap(), "tool.start");
        assert_eq!(rx.recv().await.unwrap(), "agent.completed");
        bus.close().await;
    }

    #[tokio::test]
    async fn test_backpressure_on_full_queue() {
        let settings = BusSettings {
            capacity: 2,
            ..test_settings()
        };
        let bus = EventBus::new(settings);
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe(types::TOOL_START, forwarding_handler(tx));

        // Current-thread runtime: the dispatcher task has not been polled
        // yet, so nothing drains between these publishes.
        let mut accepted = 0;
        let mut rejected = 0;
        for _ in 0..5 {
            match bus.publish(types::TOOL_START, HashMap::new()) {
                Ok(()) => accepted += 1,
                Err(BusError::Backpressure) => rejected += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(accepted, 2);
        assert_eq!(rejected, 3);

        // Once the dispatcher runs, the enqueued events are delivered
        assert_eq!(rx.recv().await.unwrap(), "tool.start");
        assert_eq!(rx.recv().await.unwrap(), "tool.start");
        bus.close().await;
    }

    #[tokio::test]
    async fn test_once_subscription() {
        let bus = EventBus::new(test_settings());
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe_with(
            Some(types::TOOL_START),
            forwarding_handler(tx),
            SubscribeOptions {
                once: true,
                ..Default::default()
            },
        );
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish(types::TOOL_START, HashMap::new()).unwrap();
        assert_eq!(rx.recv().await.unwrap(), "tool.start");

        // Wait for the async unsubscribe, then publish again
        while bus.subscriber_count() != 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        bus.publish(types::TOOL_START, HashMap::new()).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
        bus.close().await;
    }

    #[tokio::test]
    async fn test_priority_orders_handlers_within_bucket() {
        let bus = EventBus::new(test_settings());
        let order = Arc::new(Mutex::new(Vec::new()));

        for (label, priority) in [("low", -1), ("high", 10), ("mid", 5)] {
            let order = Arc::clone(&order);
            bus.subscribe_with(
                Some(types::TOOL_START),
                handler_fn(move |_| {
                    let order = Arc::clone(&order);
                    async move {
                        order.lock().unwrap().push(label);
                        Ok(())
                    }
                }),
                SubscribeOptions {
                    priority,
                    ..Default::default()
                },
            );
        }

        // publish_sync dispatches inline, making the order observable
        bus.publish_sync(Event::new(types::TOOL_START, HashMap::new()))
            .await
            .unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["high", "mid", "low"]);
        bus.close().await;
    }

    #[tokio::test]
    async fn test_subscription_filters() {
        let bus = EventBus::new(test_settings());
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe_with(
            Some(types::TOOL_START),
            forwarding_handler(tx),
            SubscribeOptions {
                filters: vec![EventFilter::MinPriority(EventPriority::High)],
                ..Default::default()
            },
        );

        bus.publish(types::TOOL_START, HashMap::new()).unwrap();
        bus.publish_with_priority(types::TOOL_START, HashMap::new(), EventPriority::Critical)
            .unwrap();

        // Only the high-priority event arrives
        assert_eq!(rx.recv().await.unwrap(), "tool.start");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
        bus.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_failure_counts() {
        let bus = EventBus::new(BusSettings {
            max_retries: 2,
            retry_delay_ms: 1,
            ..test_settings()
        });
        bus.subscribe(
            types::TOOL_START,
            handler_fn(|_| async { Err(BusError::Handler("always fails".into())) }),
        );

        bus.publish_sync(Event::new(types::TOOL_START, HashMap::new()))
            .await
            .unwrap();

        let stats = bus.get_stats();
        assert_eq!(stats.events_failed, 1);
        assert_eq!(stats.events_processed, 0);
        assert!(stats.last_error.unwrap().contains("always fails"));
        assert!(stats.last_error_time.is_some());
        bus.close().await;
    }

    #[tokio::test]
    async fn test_stats_and_reset() {
        let bus = EventBus::new(test_settings());
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe(types::TOOL_START, forwarding_handler(tx));

        bus.publish(types::TOOL_START, HashMap::new()).unwrap();
        rx.recv().await.unwrap();

        // processed is incremented after the handler returns
        while bus.get_stats().events_processed == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        let stats = bus.get_stats();
        assert_eq!(stats.events_published, 1);
        assert_eq!(stats.events_processed, 1);
        assert_eq!(stats.subscriber_count, 1);

        bus.reset_stats();
        let stats = bus.get_stats();
        assert_eq!(stats.events_published, 0);
        assert_eq!(stats.events_processed, 0);
        // Subscribers survive a stats reset
        assert_eq!(stats.subscriber_count, 1);
        bus.close().await;
    }

    #[tokio::test]
    async fn test_close_rejects_publish_and_unsubscribe_stays_safe() {
        let bus = EventBus::new(test_settings());
        let id = bus.subscribe(types::TOOL_START, handler_fn(|_| async { Ok(()) }));

        bus.close().await;
        assert!(matches!(
            bus.publish(types::TOOL_START, HashMap::new()),
            Err(BusError::Closed)
        ));
        assert!(matches!(
            bus.publish_sync(Event::new(types::TOOL_START, HashMap::new())).await,
            Err(BusError::Closed)
        ));

        // Unsubscribe after close is idempotent and safe
        bus.unsubscribe(id);
        bus.unsubscribe(id);
        assert_eq!(bus.subscriber_count(), 0);

        // Closing again is a no-op
        bus.close().await;
    }

    #[tokio::test]
    async fn test_bus_middleware_applies_to_all_subscriptions() {
        use super::super::middleware::MetricsMiddleware;

        let bus = EventBus::new(test_settings());
        let metrics = MetricsMiddleware::new();
        bus.add_middleware(Arc::new(metrics.clone()));

        bus.subscribe(types::TOOL_START, handler_fn(|_| async { Ok(()) }));
        bus.subscribe_global(handler_fn(|_| async { Ok(()) }));

        bus.publish_sync(Event::new(types::TOOL_START, HashMap::new()))
            .await
            .unwrap();

        assert_eq!(metrics.snapshot().handled, 2);
        bus.close().await;
    }
}

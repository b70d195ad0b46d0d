//! The event cache.

use super::flush::{
    execute_flush, flush_scope, Batch, CutReason, FlushHandle, FlushReport, InFlightGuard,
};
use crate::config::validate_cache_name;
use crate::event::LoggingEvent;
use crate::health::{HealthCheck, COMPONENT_CACHE, COMPONENT_SINK};
use crate::metrics::CacheMetrics;
use crate::monitor::BufferMonitor;
use crate::publish::BufferPublisher;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Everything guarded by the cache's critical section.
struct CacheState {
    buffer: Vec<LoggingEvent>,
    monitor: Box<dyn BufferMonitor>,
    next_batch_id: u64,
    closed: bool,
    /// Released after the shutdown drain.
    publisher: Option<Arc<dyn BufferPublisher>>,
}

/// A cut that still needs its flush task.
struct PendingFlush {
    batch: Batch,
    publisher: Arc<dyn BufferPublisher>,
    guard: InFlightGuard,
}

struct Inner {
    name: String,
    state: Mutex<CacheState>,
    metrics: Arc<CacheMetrics>,
    health: Arc<HealthCheck>,
    runtime: Handle,
    in_flight: Arc<watch::Sender<usize>>,
    shutdown_tx: broadcast::Sender<()>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    /// Swap the live buffer for an empty one and register the flush.
    /// Must be called with the state lock held.
    fn cut_locked(&self, state: &mut CacheState, reason: CutReason) -> Result<PendingFlush> {
        let publisher = state.publisher.clone().ok_or(Error::CacheClosed)?;

        let events = std::mem::take(&mut state.buffer);
        state.monitor.on_cut();

        let id = state.next_batch_id;
        state.next_batch_id += 1;

        let guard = InFlightGuard::register(
            id,
            Arc::clone(&self.in_flight),
            Arc::clone(&self.metrics),
            Arc::clone(&self.health),
        );
        self.metrics.record_batch_cut();
        self.metrics.set_buffer_event_count(0);

        debug!(
            cache = %self.name,
            batch_id = id,
            events = events.len(),
            reason = %reason,
            "Batch cut"
        );

        Ok(PendingFlush {
            batch: Batch::new(id, self.name.clone(), events, reason),
            publisher,
            guard,
        })
    }

    /// Spawn the flush cycle for a cut. Call after releasing the state lock.
    fn spawn_flush(&self, pending: PendingFlush) -> FlushHandle {
        let PendingFlush {
            batch,
            publisher,
            guard,
        } = pending;
        let batch_id = batch.id;
        let metrics = Arc::clone(&self.metrics);
        let health = Arc::clone(&self.health);

        // Tracing events from inside the cycle are never fed back into a cache.
        let task = self.runtime.spawn(flush_scope(batch_id, async move {
            let mut guard = guard;
            let result = execute_flush(publisher, batch, metrics, health).await;
            guard.settle();
            result
        }));

        FlushHandle::new(batch_id, task)
    }
}

/// Buffers events and publishes them in batches.
///
/// Cloning is cheap; all clones share one buffer. `add` never waits on I/O:
/// the cut happens inside a short critical section and the flush cycle runs
/// as a separate task.
#[derive(Clone)]
pub struct LoggingEventCache {
    inner: Arc<Inner>,
}

/// Builder for [`LoggingEventCache`].
pub struct LoggingEventCacheBuilder {
    name: String,
    monitor: Option<Box<dyn BufferMonitor>>,
    publisher: Option<Arc<dyn BufferPublisher>>,
    metrics: Option<Arc<CacheMetrics>>,
    health: Option<Arc<HealthCheck>>,
    runtime: Option<Handle>,
}

impl LoggingEventCacheBuilder {
    /// Trigger policy.
    pub fn monitor(mut self, monitor: Box<dyn BufferMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Publish sink.
    pub fn publisher(mut self, publisher: Arc<dyn BufferPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Share an existing metrics instance (e.g. with an HTTP exporter).
    pub fn metrics(mut self, metrics: Arc<CacheMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Share an existing health registry.
    pub fn health(mut self, health: Arc<HealthCheck>) -> Self {
        self.health = Some(health);
        self
    }

    /// Runtime for flush and timer tasks. Defaults to the current runtime.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Validate and build the cache.
    pub fn build(self) -> Result<LoggingEventCache> {
        validate_cache_name(&self.name)?;

        let monitor = self
            .monitor
            .ok_or_else(|| Error::InvalidConfiguration("a trigger policy is required".into()))?;
        let publisher = self
            .publisher
            .ok_or_else(|| Error::InvalidConfiguration("a publisher is required".into()))?;
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| {
                Error::InvalidConfiguration("no tokio runtime available for flush tasks".into())
            })?,
        };

        let metrics = self.metrics.unwrap_or_default();
        let health = self.health.unwrap_or_default();
        health.register_component(COMPONENT_CACHE);
        health.register_component(COMPONENT_SINK);
        health.mark_healthy(COMPONENT_CACHE);

        let has_deadline = monitor.next_deadline().is_some();
        let policy = monitor.name();

        let (in_flight, _) = watch::channel(0usize);
        let (shutdown_tx, _) = broadcast::channel(1);

        let inner = Arc::new(Inner {
            name: self.name,
            state: Mutex::new(CacheState {
                buffer: Vec::new(),
                monitor,
                next_batch_id: 0,
                closed: false,
                publisher: Some(publisher),
            }),
            metrics,
            health,
            runtime,
            in_flight: Arc::new(in_flight),
            shutdown_tx,
            timer: Mutex::new(None),
        });

        if has_deadline {
            let shutdown_rx = inner.shutdown_tx.subscribe();
            let task = inner
                .runtime
                .spawn(run_timer(Arc::downgrade(&inner), shutdown_rx));
            *inner.timer.lock() = Some(task);
        }

        info!(
            cache = %inner.name,
            policy,
            timer = has_deadline,
            "Event cache created"
        );

        Ok(LoggingEventCache { inner })
    }
}

impl LoggingEventCache {
    /// Create a cache with default metrics and health on the current runtime.
    pub fn new(
        name: impl Into<String>,
        monitor: Box<dyn BufferMonitor>,
        publisher: Arc<dyn BufferPublisher>,
    ) -> Result<Self> {
        Self::builder(name).monitor(monitor).publisher(publisher).build()
    }

    /// Start building a cache.
    pub fn builder(name: impl Into<String>) -> LoggingEventCacheBuilder {
        LoggingEventCacheBuilder {
            name: name.into(),
            monitor: None,
            publisher: None,
            metrics: None,
            health: None,
            runtime: None,
        }
    }

    /// Append an event; cut and schedule a flush if the policy says so.
    ///
    /// Sink failures are never reported here.
    pub fn add(&self, event: LoggingEvent) -> Result<()> {
        let pending = {
            let mut state = self.inner.state.lock();
            if state.closed {
                self.inner.metrics.record_event_rejected();
                return Err(Error::CacheClosed);
            }

            state.buffer.push(event);
            self.inner.metrics.record_event_added();

            let len = state.buffer.len();
            if state.monitor.on_event_added(len) {
                Some(self.inner.cut_locked(&mut state, CutReason::Trigger)?)
            } else {
                self.inner.metrics.set_buffer_event_count(len);
                None
            }
        };

        if let Some(pending) = pending {
            // Detached; the outcome is recorded by the task.
            drop(self.inner.spawn_flush(pending));
        }
        Ok(())
    }

    /// Cut now, even if the buffer is empty, and return a handle to the flush.
    pub fn flush_and_publish(&self) -> Result<FlushHandle> {
        let pending = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(Error::CacheClosed);
            }
            self.inner.cut_locked(&mut state, CutReason::Manual)?
        };

        Ok(self.inner.spawn_flush(pending))
    }

    /// Close the cache, flush what is left and wait for every scheduled
    /// flush to settle.
    ///
    /// Returns the outcome of the final flush.
    pub async fn shutdown(&self) -> Result<FlushReport> {
        let pending = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(Error::CacheClosed);
            }
            state.closed = true;
            self.inner.cut_locked(&mut state, CutReason::Shutdown)?
        };

        info!(
            cache = %self.inner.name,
            events = pending.batch.len(),
            in_flight = self.in_flight(),
            "Shutting down event cache"
        );

        let _ = self.inner.shutdown_tx.send(());
        let timer = self.inner.timer.lock().take();
        if let Some(timer) = timer {
            let _ = timer.await;
        }

        let result = self.inner.spawn_flush(pending).await;

        let mut in_flight = self.inner.in_flight.subscribe();
        if in_flight.wait_for(|n| *n == 0).await.is_err() {
            warn!(cache = %self.inner.name, "In-flight counter dropped during shutdown");
        }

        self.inner.state.lock().publisher = None;
        self.inner
            .health
            .mark_unhealthy(COMPONENT_CACHE, "cache is shut down");

        match &result {
            Ok(report) => info!(
                cache = %self.inner.name,
                batch_id = report.batch_id,
                events = report.events_published,
                "Event cache shut down"
            ),
            Err(e) => warn!(
                cache = %self.inner.name,
                error = %e,
                "Event cache shut down with a failed final flush"
            ),
        }

        result
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Events in the live buffer.
    pub fn buffered_len(&self) -> usize {
        self.inner.state.lock().buffer.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Id the next cut will get.
    pub fn current_batch_id(&self) -> u64 {
        self.inner.state.lock().next_batch_id
    }

    /// Flush cycles scheduled but not yet settled.
    pub fn in_flight(&self) -> usize {
        *self.inner.in_flight.borrow()
    }

    pub fn metrics(&self) -> Arc<CacheMetrics> {
        Arc::clone(&self.inner.metrics)
    }

    pub fn health(&self) -> Arc<HealthCheck> {
        Arc::clone(&self.inner.health)
    }
}

impl fmt::Debug for LoggingEventCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingEventCache")
            .field("name", &self.inner.name)
            .field("buffered", &self.buffered_len())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// Cut on the policy's deadline even when no events arrive.
///
/// Holds only a weak reference while sleeping so a dropped cache stops it.
async fn run_timer(inner: Weak<Inner>, mut shutdown_rx: broadcast::Receiver<()>) {
    loop {
        let deadline = {
            let Some(inner) = inner.upgrade() else { break };
            let state = inner.state.lock();
            if state.closed {
                break;
            }
            match state.monitor.next_deadline() {
                Some(deadline) => deadline,
                None => break,
            }
        };

        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("Cache timer received shutdown signal");
                break;
            }
            _ = tokio::time::sleep_until(deadline) => {}
        }

        let Some(inner) = inner.upgrade() else { break };
        let pending = {
            let mut state = inner.state.lock();
            if state.closed {
                break;
            }
            match state.monitor.next_deadline() {
                Some(due) if due <= Instant::now() => {
                    if state.buffer.is_empty() {
                        // Nothing to publish; restart the period.
                        state.monitor.on_cut();
                        None
                    } else {
                        match inner.cut_locked(&mut state, CutReason::Timer) {
                            Ok(pending) => Some(pending),
                            Err(_) => break,
                        }
                    }
                }
                _ => None,
            }
        };

        if let Some(pending) = pending {
            drop(inner.spawn_flush(pending));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Level;
    use crate::monitor::{CapacityBasedBufferMonitor, TimePeriodBasedBufferMonitor};
    use crate::publish::PublishContext;
    use async_trait::async_trait;
    use std::time::Duration;

    #[derive(Default)]
    struct CollectingPublisher {
        batches: parking_lot::Mutex<Vec<(u64, Vec<String>)>>,
    }

    #[async_trait]
    impl BufferPublisher for CollectingPublisher {
        async fn start_publish(&self, cache_name: &str, batch_id: u64) -> Result<PublishContext> {
            Ok(PublishContext::new(cache_name, batch_id))
        }

        async fn publish(
            &self,
            context: &mut PublishContext,
            _sequence: usize,
            event: &LoggingEvent,
        ) {
            context.append(event);
        }

        async fn end_publish(&self, context: PublishContext) -> Result<()> {
            let messages = context.payload().lines().map(str::to_string).collect();
            self.batches.lock().push((context.batch_id, messages));
            Ok(())
        }
    }

    fn event(message: &str) -> LoggingEvent {
        LoggingEvent::new("test", Level::Info, message)
    }

    fn capacity(threshold: usize) -> Box<dyn BufferMonitor> {
        Box::new(CapacityBasedBufferMonitor::new(threshold).unwrap())
    }

    #[tokio::test]
    async fn test_invalid_name_rejected() {
        let publisher = Arc::new(CollectingPublisher::default());
        for name in ["", "has space", "a/b"] {
            let result = LoggingEventCache::new(name, capacity(1), publisher.clone());
            assert!(matches!(result, Err(Error::InvalidConfiguration(_))));
        }
    }

    #[tokio::test]
    async fn test_missing_parts_rejected() {
        let result = LoggingEventCache::builder("c").monitor(capacity(1)).build();
        assert!(matches!(result, Err(Error::InvalidConfiguration(_))));

        let result = LoggingEventCache::builder("c")
            .publisher(Arc::new(CollectingPublisher::default()))
            .build();
        assert!(matches!(result, Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn test_no_runtime_rejected() {
        let result = LoggingEventCache::new(
            "c",
            capacity(1),
            Arc::new(CollectingPublisher::default()),
        );
        assert!(matches!(result, Err(Error::InvalidConfiguration(_))));
    }

    #[tokio::test]
    async fn test_capacity_cut_swaps_buffer() {
        let publisher = Arc::new(CollectingPublisher::default());
        let cache = LoggingEventCache::new("c", capacity(3), publisher.clone()).unwrap();

        cache.add(event("1")).unwrap();
        cache.add(event("2")).unwrap();
        assert_eq!(cache.buffered_len(), 2);
        assert_eq!(cache.current_batch_id(), 0);

        cache.add(event("3")).unwrap();
        assert_eq!(cache.buffered_len(), 0);
        assert_eq!(cache.current_batch_id(), 1);

        cache.add(event("4")).unwrap();
        cache.shutdown().await.unwrap();

        let mut batches = publisher.batches.lock().clone();
        batches.sort_by_key(|(id, _)| *id);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].1.len(), 3);
        assert_eq!(batches[1].1.len(), 1);
    }

    #[tokio::test]
    async fn test_manual_flush_handle() {
        let publisher = Arc::new(CollectingPublisher::default());
        let cache = LoggingEventCache::new("c", capacity(100), publisher.clone()).unwrap();

        cache.add(event("a")).unwrap();
        let handle = cache.flush_and_publish().unwrap();
        assert_eq!(handle.batch_id(), 0);

        let report = handle.await.unwrap();
        assert_eq!(report.events_published, 1);
        assert_eq!(report.reason, CutReason::Manual);
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_closed_cache_rejects_everything() {
        let cache = LoggingEventCache::new(
            "c",
            capacity(10),
            Arc::new(CollectingPublisher::default()),
        )
        .unwrap();
        cache.shutdown().await.unwrap();

        assert!(cache.is_closed());
        assert!(matches!(cache.add(event("late")), Err(Error::CacheClosed)));
        assert!(matches!(cache.flush_and_publish(), Err(Error::CacheClosed)));
        assert!(matches!(cache.shutdown().await, Err(Error::CacheClosed)));
        assert_eq!(cache.metrics().events_rejected_total(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_cuts_without_adds() {
        let publisher = Arc::new(CollectingPublisher::default());
        let monitor = Box::new(TimePeriodBasedBufferMonitor::new(Duration::from_secs(2)).unwrap());
        let cache = LoggingEventCache::new("c", monitor, publisher.clone()).unwrap();

        cache.add(event("quiet")).unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;

        assert_eq!(cache.buffered_len(), 0);
        assert_eq!(publisher.batches.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_skips_empty_buffer() {
        let publisher = Arc::new(CollectingPublisher::default());
        let monitor = Box::new(TimePeriodBasedBufferMonitor::new(Duration::from_secs(1)).unwrap());
        let cache = LoggingEventCache::new("c", monitor, publisher.clone()).unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(publisher.batches.lock().is_empty());
        assert_eq!(cache.current_batch_id(), 0);
    }

    #[tokio::test]
    async fn test_shared_metrics_and_health() {
        let metrics = Arc::new(CacheMetrics::new());
        let health = Arc::new(HealthCheck::new());
        let cache = LoggingEventCache::builder("c")
            .monitor(capacity(2))
            .publisher(Arc::new(CollectingPublisher::default()))
            .metrics(metrics.clone())
            .health(health.clone())
            .build()
            .unwrap();

        cache.add(event("a")).unwrap();
        cache.add(event("b")).unwrap();
        cache.shutdown().await.unwrap();

        assert_eq!(metrics.events_added_total(), 2);
        assert_eq!(metrics.batches_cut_total(), 2);
        assert_eq!(metrics.flushes_total(), 2);
        assert_eq!(metrics.events_published_total(), 2);
        assert_eq!(
            health.get_component_status(COMPONENT_SINK),
            Some(crate::health::ComponentStatus::Healthy)
        );
    }
}

//! Flush cycle: publish one cut batch through a sink.

use crate::event::LoggingEvent;
use crate::health::HealthCheck;
use crate::metrics::{CacheMetrics, FailureKind};
use crate::publish::BufferPublisher;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

tokio::task_local! {
    /// Batch id of the flush cycle running on the current task.
    static FLUSH_SCOPE: u64;
}

/// Whether the caller runs inside a flush cycle.
///
/// Also true for anything a sink emits while it is being polled by a cycle.
pub fn in_flush_cycle() -> bool {
    FLUSH_SCOPE.try_with(|_| ()).is_ok()
}

/// Run `future` as part of the flush cycle for `batch_id`.
pub(crate) async fn flush_scope<F: Future>(batch_id: u64, future: F) -> F::Output {
    FLUSH_SCOPE.scope(batch_id, future).await
}

/// Why a batch was cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutReason {
    /// The trigger policy fired on `add`
    Trigger,
    /// The background timer fired
    Timer,
    /// `flush_and_publish` was called
    Manual,
    /// Final flush during shutdown
    Shutdown,
}

impl CutReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CutReason::Trigger => "trigger",
            CutReason::Timer => "timer",
            CutReason::Manual => "manual",
            CutReason::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for CutReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events taken from the live buffer by one cut.
///
/// Owned by exactly one flush cycle.
#[derive(Debug)]
pub struct Batch {
    pub id: u64,
    pub cache_name: String,
    /// Events in add order
    pub events: Vec<LoggingEvent>,
    pub reason: CutReason,
    pub cut_at: DateTime<Utc>,
}

impl Batch {
    pub fn new(
        id: u64,
        cache_name: impl Into<String>,
        events: Vec<LoggingEvent>,
        reason: CutReason,
    ) -> Self {
        Self {
            id,
            cache_name: cache_name.into(),
            events,
            reason,
            cut_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Outcome of a successful flush cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct FlushReport {
    pub batch_id: u64,
    /// Durable name the sink published under
    pub batch_name: String,
    pub events_published: usize,
    pub reason: CutReason,
    pub duration: Duration,
}

/// Drive `publisher` through one start / publish-each / end sequence.
///
/// `end_publish` is not called when `start_publish` fails. An empty batch
/// still gets a start and an end.
pub async fn run_flush_cycle(
    publisher: &dyn BufferPublisher,
    batch: Batch,
) -> Result<FlushReport> {
    let started = Instant::now();

    let mut context = publisher.start_publish(&batch.cache_name, batch.id).await?;
    let batch_name = context.batch_name.clone();

    for (sequence, event) in batch.events.iter().enumerate() {
        publisher.publish(&mut context, sequence, event).await;
    }

    publisher.end_publish(context).await?;

    Ok(FlushReport {
        batch_id: batch.id,
        batch_name,
        events_published: batch.events.len(),
        reason: batch.reason,
        duration: started.elapsed(),
    })
}

/// Run a cycle and record its outcome in metrics, health and logs.
pub(crate) async fn execute_flush(
    publisher: Arc<dyn BufferPublisher>,
    batch: Batch,
    metrics: Arc<CacheMetrics>,
    health: Arc<HealthCheck>,
) -> Result<FlushReport> {
    let started = Instant::now();
    let batch_id = batch.id;
    let reason = batch.reason;
    let events = batch.len();

    let result = run_flush_cycle(publisher.as_ref(), batch).await;

    match &result {
        Ok(report) => {
            metrics.record_flush(report.events_published, report.duration);
            health.record_sink_success();
            info!(
                batch_id,
                batch_name = %report.batch_name,
                events = report.events_published,
                reason = %reason,
                duration_ms = report.duration.as_millis() as u64,
                "Batch flushed"
            );
        }
        Err(e) => {
            metrics.record_flush_failure(FailureKind::from(e), started.elapsed());
            health.record_sink_failure(&e.to_string());
            warn!(
                batch_id,
                events,
                reason = %reason,
                error = %e,
                "Batch flush failed"
            );
        }
    }

    result
}

/// Counts a scheduled flush until the task owning it finishes, however it
/// finishes.
///
/// A guard dropped before [`settle`](Self::settle) belongs to a cycle that was
/// cancelled or panicked; its batch is recorded as aborted.
pub(crate) struct InFlightGuard {
    batch_id: u64,
    counter: Arc<watch::Sender<usize>>,
    metrics: Arc<CacheMetrics>,
    health: Arc<HealthCheck>,
    settled: bool,
}

impl InFlightGuard {
    /// Register one more flush. Call inside the cache's critical section.
    pub(crate) fn register(
        batch_id: u64,
        counter: Arc<watch::Sender<usize>>,
        metrics: Arc<CacheMetrics>,
        health: Arc<HealthCheck>,
    ) -> Self {
        counter.send_modify(|n| *n += 1);
        metrics.set_flushes_in_flight(*counter.borrow());
        Self {
            batch_id,
            counter,
            metrics,
            health,
            settled: false,
        }
    }

    /// The cycle ran to completion and recorded its own outcome.
    pub(crate) fn settle(&mut self) {
        self.settled = true;
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if !self.settled {
            self.metrics
                .record_flush_failure(FailureKind::Aborted, Duration::ZERO);
            self.health
                .record_sink_failure(&format!("flush of batch {} aborted", self.batch_id));
            debug!(batch_id = self.batch_id, "Flush task aborted");
        }
        self.counter.send_modify(|n| *n = n.saturating_sub(1));
        self.metrics.set_flushes_in_flight(*self.counter.borrow());
    }
}

/// Handle to a scheduled flush cycle.
///
/// Resolves to the cycle's result. Dropping it detaches: the cycle still
/// runs to completion.
pub struct FlushHandle {
    batch_id: u64,
    task: JoinHandle<Result<FlushReport>>,
}

impl FlushHandle {
    pub(crate) fn new(batch_id: u64, task: JoinHandle<Result<FlushReport>>) -> Self {
        Self { batch_id, task }
    }

    /// Batch this handle belongs to.
    pub fn batch_id(&self) -> u64 {
        self.batch_id
    }

    /// Whether the cycle has settled.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Abort the cycle. The handle then resolves to `FlushAborted` unless
    /// the cycle already finished.
    pub fn cancel(&self) {
        self.task.abort();
    }

    /// Wait for the cycle and report only whether it succeeded.
    pub async fn succeeded(self) -> bool {
        self.await.is_ok()
    }
}

impl Future for FlushHandle {
    type Output = Result<FlushReport>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.task).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(join_err)) => {
                let reason = if join_err.is_cancelled() {
                    "cancelled"
                } else {
                    "panicked"
                };
                Poll::Ready(Err(Error::FlushAborted(format!(
                    "flush of batch {} {}",
                    self.batch_id, reason
                ))))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl fmt::Debug for FlushHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlushHandle")
            .field("batch_id", &self.batch_id)
            .field("finished", &self.task.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SinkError;
    use crate::event::Level;
    use crate::health::{ComponentStatus, COMPONENT_SINK};
    use crate::publish::PublishContext;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct ScriptedPublisher {
        calls: Mutex<Vec<String>>,
        fail_start: bool,
        fail_end: bool,
    }

    #[async_trait]
    impl BufferPublisher for ScriptedPublisher {
        async fn start_publish(&self, cache_name: &str, batch_id: u64) -> Result<PublishContext> {
            self.calls.lock().push("start".into());
            if self.fail_start {
                return Err(SinkError::Provisioning {
                    destination: "bucket".into(),
                    message: "unreachable".into(),
                }
                .into());
            }
            Ok(PublishContext::new(cache_name, batch_id))
        }

        async fn publish(
            &self,
            context: &mut PublishContext,
            sequence: usize,
            event: &LoggingEvent,
        ) {
            self.calls
                .lock()
                .push(format!("publish {} {}", sequence, event.message));
            context.append(event);
        }

        async fn end_publish(&self, context: PublishContext) -> Result<()> {
            self.calls
                .lock()
                .push(format!("end {}", context.event_count()));
            if self.fail_end {
                return Err(SinkError::Transfer {
                    key: context.batch_name,
                    message: "connection reset".into(),
                }
                .into());
            }
            Ok(())
        }
    }

    fn batch(messages: &[&str]) -> Batch {
        let events = messages
            .iter()
            .map(|m| LoggingEvent::new("test", Level::Info, *m))
            .collect();
        Batch::new(7, "unit", events, CutReason::Manual)
    }

    #[tokio::test]
    async fn test_cycle_order_and_sequences() {
        let publisher = ScriptedPublisher::default();
        let report = run_flush_cycle(&publisher, batch(&["a", "b", "c"]))
            .await
            .unwrap();

        assert_eq!(
            *publisher.calls.lock(),
            vec!["start", "publish 0 a", "publish 1 b", "publish 2 c", "end 3"]
        );
        assert_eq!(report.batch_id, 7);
        assert_eq!(report.events_published, 3);
        assert_eq!(report.reason, CutReason::Manual);
        assert!(report.batch_name.starts_with("unit_"));
    }

    #[tokio::test]
    async fn test_empty_batch_still_starts_and_ends() {
        let publisher = ScriptedPublisher::default();
        let report = run_flush_cycle(&publisher, batch(&[])).await.unwrap();

        assert_eq!(*publisher.calls.lock(), vec!["start", "end 0"]);
        assert_eq!(report.events_published, 0);
    }

    #[tokio::test]
    async fn test_start_failure_skips_end() {
        let publisher = ScriptedPublisher {
            fail_start: true,
            ..Default::default()
        };
        let err = run_flush_cycle(&publisher, batch(&["a"])).await.unwrap_err();

        assert!(matches!(err, Error::Sink(SinkError::Provisioning { .. })));
        assert_eq!(*publisher.calls.lock(), vec!["start"]);
    }

    #[tokio::test]
    async fn test_end_failure_is_reported() {
        let publisher = ScriptedPublisher {
            fail_end: true,
            ..Default::default()
        };
        let err = run_flush_cycle(&publisher, batch(&["a"])).await.unwrap_err();
        assert!(matches!(err, Error::Sink(SinkError::Transfer { .. })));
    }

    #[tokio::test]
    async fn test_execute_records_outcome() {
        let metrics = Arc::new(CacheMetrics::new());
        let health = Arc::new(HealthCheck::new());

        let failing: Arc<dyn BufferPublisher> = Arc::new(ScriptedPublisher {
            fail_end: true,
            ..Default::default()
        });
        let _ = execute_flush(failing, batch(&["a"]), metrics.clone(), health.clone()).await;
        assert_eq!(metrics.flush_failures(FailureKind::Transfer), 1);
        assert!(health.is_operational());

        let ok: Arc<dyn BufferPublisher> = Arc::new(ScriptedPublisher::default());
        execute_flush(ok, batch(&["a", "b"]), metrics.clone(), health.clone())
            .await
            .unwrap();
        assert_eq!(metrics.flushes_total(), 1);
        assert_eq!(metrics.events_published_total(), 2);
    }

    #[tokio::test]
    async fn test_in_flight_guard() {
        let (tx, rx) = watch::channel(0usize);
        let counter = Arc::new(tx);
        let metrics = Arc::new(CacheMetrics::new());
        let health = Arc::new(HealthCheck::new());

        let mut a = InFlightGuard::register(0, counter.clone(), metrics.clone(), health.clone());
        let mut b = InFlightGuard::register(1, counter.clone(), metrics.clone(), health.clone());
        assert_eq!(*rx.borrow(), 2);
        assert_eq!(metrics.flushes_in_flight(), 2);

        a.settle();
        b.settle();
        drop(a);
        drop(b);
        assert_eq!(*rx.borrow(), 0);
        assert_eq!(metrics.flushes_in_flight(), 0);
        assert_eq!(metrics.flush_failures(FailureKind::Aborted), 0);
    }

    fn sleeping_flush(
        guard: InFlightGuard,
    ) -> impl Future<Output = Result<FlushReport>> + Send + 'static {
        async move {
            let mut guard = guard;
            tokio::time::sleep(Duration::from_secs(3600)).await;
            guard.settle();
            Ok(FlushReport {
                batch_id: 1,
                batch_name: "never".into(),
                events_published: 0,
                reason: CutReason::Manual,
                duration: Duration::ZERO,
            })
        }
    }

    #[tokio::test]
    async fn test_cancelled_handle_resolves_aborted() {
        let (tx, _rx) = watch::channel(0usize);
        let metrics = Arc::new(CacheMetrics::new());
        let guard = InFlightGuard::register(
            1,
            Arc::new(tx),
            metrics.clone(),
            Arc::new(HealthCheck::new()),
        );
        let handle = FlushHandle::new(1, tokio::spawn(sleeping_flush(guard)));
        handle.cancel();

        let err = handle.await.unwrap_err();
        assert!(matches!(err, Error::FlushAborted(_)));
        assert_eq!(metrics.flush_failures(FailureKind::Aborted), 1);
    }

    #[tokio::test]
    async fn test_dropped_cancelled_handle_still_records_abort() {
        let (tx, mut rx) = watch::channel(0usize);
        let metrics = Arc::new(CacheMetrics::new());
        let health = Arc::new(HealthCheck::new());
        health.register_component(COMPONENT_SINK);
        let guard = InFlightGuard::register(1, Arc::new(tx), metrics.clone(), health.clone());

        let handle = FlushHandle::new(1, tokio::spawn(sleeping_flush(guard)));
        handle.cancel();
        drop(handle);

        rx.wait_for(|n| *n == 0).await.unwrap();
        assert_eq!(metrics.flush_failures(FailureKind::Aborted), 1);
        assert!(matches!(
            health.get_component_status(COMPONENT_SINK),
            Some(ComponentStatus::Degraded(_))
        ));
    }

    #[tokio::test]
    async fn test_flush_scope() {
        assert!(!in_flush_cycle());
        assert!(flush_scope(3, async { in_flush_cycle() }).await);
        assert!(!in_flush_cycle());
    }
}

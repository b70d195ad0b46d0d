//! Publish sink contract.
//!
//! A flush cycle drives a [`BufferPublisher`] through exactly one
//! start / publish-each / end sequence per batch:
//!
//! 1. `start_publish` returns a fresh [`PublishContext`] (setup, provisioning)
//! 2. `publish` once per event, in add order, sequence numbers from 0
//! 3. `end_publish` consumes the context and commits the batch
//!
//! `end_publish` is skipped when `start_publish` fails.

mod provision;
mod store;

pub use provision::{
    classify, ContainerProvisioner, LocalDirProvisioner, NoopProvisioner, ProvisionError,
    ProvisionOutcome, S3BucketProvisioner,
};
pub use store::{normalize_prefix, ObjectStorePublisher, ObjectStorePublisherBuilder};

use crate::event::{Layout, LoggingEvent};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Hex digits of random suffix in a batch name.
const BATCH_SUFFIX_LEN: usize = 12;

/// Per-cycle metadata and payload accumulator.
///
/// Owned by exactly one flush cycle and dropped when `end_publish` returns.
#[derive(Debug, Clone)]
pub struct PublishContext {
    /// Name of the cache that cut the batch
    pub cache_name: String,
    /// Batch identifier, increasing in cut order
    pub batch_id: u64,
    /// Durable name for this batch, unique across cache instances
    pub batch_name: String,
    /// Host that produced the events
    pub host_name: Option<String>,
    /// Free-form tags
    pub tags: Vec<String>,
    /// Layout for rendering events
    pub layout: Layout,
    /// When the cycle started
    pub started_at: DateTime<Utc>,
    payload: String,
    event_count: usize,
}

impl PublishContext {
    /// Create a context for one batch of `cache_name`.
    ///
    /// The batch name is `{cache}_{yyyyMMddHHmmss}_{id:06}_{suffix}`. Batch
    /// ids restart with every cache instance, so the random suffix keeps two
    /// runs of the same cache within one second from sharing a name.
    pub fn new(cache_name: impl Into<String>, batch_id: u64) -> Self {
        let cache_name = cache_name.into();
        let started_at = Utc::now();
        let uuid = Uuid::new_v4().simple().to_string();
        let batch_name = format!(
            "{}_{}_{:06}_{}",
            cache_name,
            started_at.format("%Y%m%d%H%M%S"),
            batch_id,
            &uuid[..BATCH_SUFFIX_LEN]
        );
        Self {
            cache_name,
            batch_id,
            batch_name,
            host_name: None,
            tags: Vec::new(),
            layout: Layout::default(),
            started_at,
            payload: String::new(),
            event_count: 0,
        }
    }

    /// Set the layout.
    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    /// Set the tags.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Set the host name.
    pub fn with_host_name(mut self, host_name: Option<String>) -> Self {
        self.host_name = host_name;
        self
    }

    /// Render an event with this context's layout and append it to the payload.
    pub fn append(&mut self, event: &LoggingEvent) {
        self.layout.write_to(event, &mut self.payload);
        self.event_count += 1;
    }

    /// Accumulated payload.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Take the accumulated payload.
    pub fn into_payload(self) -> String {
        self.payload
    }

    /// Number of events appended.
    pub fn event_count(&self) -> usize {
        self.event_count
    }
}

/// Destination for flushed batches.
///
/// Shared by every flush cycle of a cache, so concurrent cycles for different
/// batches may call it at the same time; per-batch state belongs in the
/// [`PublishContext`].
#[async_trait]
pub trait BufferPublisher: Send + Sync {
    /// Begin a cycle. Side effects (e.g. creating a bucket) must tolerate
    /// repetition.
    async fn start_publish(&self, cache_name: &str, batch_id: u64) -> Result<PublishContext>;

    /// Handle one event. Routine per-event problems are absorbed here.
    async fn publish(&self, context: &mut PublishContext, sequence: usize, event: &LoggingEvent);

    /// Commit the batch. Called once per successfully started cycle, also for
    /// empty batches.
    async fn end_publish(&self, context: PublishContext) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Level;

    #[test]
    fn test_batch_name() {
        let ctx = PublishContext::new("web-01", 42);
        let parts: Vec<&str> = ctx.batch_name.rsplitn(3, '_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2].len(), "web-01_".len() + 14);
        assert!(parts[2].starts_with("web-01_"));
        assert_eq!(parts[1], "000042");
        assert_eq!(parts[0].len(), BATCH_SUFFIX_LEN);
        assert!(parts[0].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_batch_names_differ_for_same_id() {
        let first = PublishContext::new("svc", 0);
        let second = PublishContext::new("svc", 0);
        assert_ne!(first.batch_name, second.batch_name);
    }

    #[test]
    fn test_append_uses_layout() {
        let mut ctx = PublishContext::new("c", 0).with_layout(Layout::Simple);
        ctx.append(&LoggingEvent::new("src", Level::Info, "one"));
        ctx.append(&LoggingEvent::new("src", Level::Warn, "two"));

        assert_eq!(ctx.event_count(), 2);
        assert_eq!(ctx.payload(), "INFO - one\nWARN - two\n");
        assert_eq!(ctx.into_payload(), "INFO - one\nWARN - two\n");
    }

    #[test]
    fn test_builders() {
        let ctx = PublishContext::new("c", 1)
            .with_tags(vec!["prod".into()])
            .with_host_name(Some("node-1".into()));
        assert_eq!(ctx.tags, vec!["prod".to_string()]);
        assert_eq!(ctx.host_name.as_deref(), Some("node-1"));
        assert_eq!(ctx.layout, Layout::Text);
    }
}

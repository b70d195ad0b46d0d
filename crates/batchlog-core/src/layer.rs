//! `tracing` bridge: route application tracing events into a cache.
//!
//! ```no_run
//! use batchlog_core::layer::CacheLayer;
//! use tracing_subscriber::prelude::*;
//!
//! # fn wire(cache: batchlog_core::LoggingEventCache) {
//! tracing_subscriber::registry()
//!     .with(CacheLayer::new(cache))
//!     .init();
//! # }
//! ```

use crate::cache::{in_flush_cycle, LoggingEventCache};
use crate::event::{Level, LoggingEvent};
use std::fmt;
use std::fmt::Write as _;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// Targets never forwarded: batchlog itself and the crates a sink talks
/// through. Connection tasks spawned by those crates run outside any flush
/// scope, so they are filtered by target.
const IGNORED_TARGETS: [&str; 12] = [
    "batchlog_core",
    "batchlog",
    "aws_config",
    "aws_sdk_s3",
    "aws_smithy_runtime",
    "aws_smithy_http_client",
    "aws_credential_types",
    "hyper",
    "hyper_util",
    "h2",
    "reqwest",
    "object_store",
];

/// Prefix match on whole path segments.
fn target_matches(target: &str, prefix: &str) -> bool {
    target
        .strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
}

/// Layer that adds every tracing event to a [`LoggingEventCache`].
pub struct CacheLayer {
    cache: LoggingEventCache,
}

impl CacheLayer {
    pub fn new(cache: LoggingEventCache) -> Self {
        Self { cache }
    }

    /// Whether events from `target` are forwarded.
    pub fn forwards(target: &str) -> bool {
        !target.starts_with("rustls")
            && !IGNORED_TARGETS
                .iter()
                .any(|ignored| target_matches(target, ignored))
    }
}

impl<S: Subscriber> Layer<S> for CacheLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if in_flush_cycle() || !Self::forwards(metadata.target()) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let mut logging_event = LoggingEvent::new(
            metadata.target(),
            Level::from(metadata.level()),
            visitor.finish(),
        );
        if let Some(name) = std::thread::current().name() {
            logging_event = logging_event.with_thread(name);
        }

        // A layer has nowhere to report a closed cache.
        let _ = self.cache.add(logging_event);
    }
}

/// Collects the `message` field plus `key=value` for the rest.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        match (self.message.is_empty(), self.fields.is_empty()) {
            (_, true) => self.message,
            (true, false) => self.fields,
            (false, false) => format!("{} {}", self.message, self.fields),
        }
    }

    fn push_field(&mut self, name: &str, value: fmt::Arguments<'_>) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{}={}", name, value);
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            self.push_field(field.name(), format_args!("{}", value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            self.push_field(field.name(), format_args!("{:?}", value));
        }
    }
}

//! batchlog core - batched shipping of log events to durable storage
//!
//! Events are buffered in memory and published in batches so high-frequency
//! logging does not cost one network write per event:
//!
//! - Pluggable trigger policies (event count, time period, or both)
//! - Atomic buffer swap with no event loss across a cut
//! - Asynchronous flush cycles through a pluggable publish sink
//! - Object storage sink for S3 and local directories

pub mod cache;
pub mod config;
pub mod error;
pub mod event;
pub mod health;
pub mod layer;
pub mod metrics;
pub mod monitor;
pub mod publish;

// Re-export commonly used types
pub use cache::{FlushHandle, FlushReport, LoggingEventCache};
pub use config::Config;
pub use error::SinkError;
pub use error::{Error, Result};
pub use event::{Layout, Level, LoggingEvent};
pub use monitor::{build_monitor, BufferMonitor};
pub use publish::{BufferPublisher, PublishContext};

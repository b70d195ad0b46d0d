//! Event buffering and flush coordination.
//!
//! ```text
//! add ──► live buffer ──(policy fires)──► cut ──► Batch ──► flush task ──► sink
//!              ▲                           │
//!              └──── fresh empty buffer ◄──┘
//! ```
//!
//! A cut happens inside the cache's critical section: the live buffer is
//! swapped for an empty one, the policy is reset, the batch id advances and
//! the flush is registered as in flight. The flush task itself is spawned
//! after the lock is released, so producers never wait on the sink.
//!
//! Every event lands in exactly one batch. Batches are published at least
//! once; a failed batch is not retried.

mod flush;
mod logging_cache;

pub use flush::{in_flush_cycle, run_flush_cycle, Batch, CutReason, FlushHandle, FlushReport};
pub use logging_cache::{LoggingEventCache, LoggingEventCacheBuilder};

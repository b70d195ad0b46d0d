//! Log event model and layouts.
//!
//! A [`LoggingEvent`] is immutable once created. The cache owns it from
//! `add` until the flush cycle that publishes its batch drops it.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Write as _;
use std::str::FromStr;

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Level {
    /// Upper-case label used by the text layouts.
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Level::Trace),
            "debug" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "warn" | "warning" => Ok(Level::Warn),
            "error" => Ok(Level::Error),
            "fatal" => Ok(Level::Fatal),
            other => Err(format!("unknown level: {}", other)),
        }
    }
}

impl From<&tracing::Level> for Level {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE => Level::Trace,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Info,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

/// One log occurrence.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LoggingEvent {
    /// When the event happened
    pub timestamp: DateTime<Utc>,
    /// Severity
    pub level: Level,
    /// Logger or module that produced the event
    pub source: String,
    /// Rendered message
    pub message: String,
    /// Producing thread, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<String>,
}

impl LoggingEvent {
    /// Create an event stamped with the current time.
    pub fn new(source: impl Into<String>, level: Level, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            source: source.into(),
            message: message.into(),
            thread: None,
        }
    }

    /// Override the timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Attach the producing thread name.
    pub fn with_thread(mut self, thread: impl Into<String>) -> Self {
        self.thread = Some(thread.into());
        self
    }
}

/// How events are rendered into a batch payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// `LEVEL - message`
    Simple,
    /// Timestamp, level, thread, source and message
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

impl Layout {
    /// Render one event, including the trailing newline.
    pub fn format(&self, event: &LoggingEvent) -> String {
        let mut out = String::with_capacity(event.message.len() + 64);
        self.write_to(event, &mut out);
        out
    }

    /// Append one rendered event to `out`.
    pub fn write_to(&self, event: &LoggingEvent, out: &mut String) {
        match self {
            Layout::Simple => {
                let _ = writeln!(out, "{} - {}", event.level, event.message);
            }
            Layout::Text => {
                let ts = event.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true);
                match &event.thread {
                    Some(thread) => {
                        let _ = writeln!(
                            out,
                            "{} {:<5} [{}] {} - {}",
                            ts, event.level, thread, event.source, event.message
                        );
                    }
                    None => {
                        let _ = writeln!(
                            out,
                            "{} {:<5} {} - {}",
                            ts, event.level, event.source, event.message
                        );
                    }
                }
            }
            Layout::Json => {
                // Serializing plain strings, enums and a timestamp cannot fail.
                if let Ok(line) = serde_json::to_string(event) {
                    out.push_str(&line);
                    out.push('\n');
                }
            }
        }
    }
}

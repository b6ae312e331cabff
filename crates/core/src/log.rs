//! Operator-facing log sinks
//!
//! Components never log through a global; they receive an
//! `Arc<dyn LogSink>` and emit one line per observable step.

use chrono::{DateTime, Utc};
use std::io::Write;
use std::sync::{Arc, Mutex};

/// Timestamp format for console lines (`2020-03-04T10:11:12.345Z`)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Single-operation logging capability
pub trait LogSink: Send + Sync {
    fn log(&self, message: &str);
}

impl<F> LogSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn log(&self, message: &str) {
        self(message)
    }
}

/// Format one console line
pub fn format_line(time: DateTime<Utc>, tag: &str, message: &str) -> String {
    format!("{} [{}] {}", time.format(TIMESTAMP_FORMAT), tag, message)
}

/// Writes timestamped lines to stdout
pub struct ConsoleSink {
    tag: String,
}

impl ConsoleSink {
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into() }
    }
}

impl LogSink for ConsoleSink {
    fn log(&self, message: &str) {
        let line = format_line(Utc::now(), &self.tag, message);
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{}", line);
        let _ = stdout.flush();
    }
}

/// Forwards lines to `tracing` at info level
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, message: &str) {
        tracing::info!(target: "capi", "{}", message);
    }
}

/// Keeps every line in memory (tests, post-run inspection)
#[derive(Clone, Default)]
pub struct RecordingSink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all lines logged so far
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    /// Number of lines containing `needle`
    pub fn count_containing(&self, needle: &str) -> usize {
        self.lines().iter().filter(|l| l.contains(needle)).count()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.count_containing(needle) > 0
    }
}

impl LogSink for RecordingSink {
    fn log(&self, message: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(message.to_string());
        }
    }
}

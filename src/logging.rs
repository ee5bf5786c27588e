//! Diagnostic sinks.
//!
//! Components never log through a global; they receive an
//! `Arc<dyn DiagnosticSink>` at construction and hand it to plugins through
//! the [`ValidationContext`](crate::models::ValidationContext).

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// Level of a diagnostic record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

/// Destination for engine and plugin diagnostics.
pub trait DiagnosticSink: Send + Sync {
    /// Record one message emitted by `component`.
    fn record(&self, level: Level, component: &str, message: &str);

    fn debug(&self, component: &str, message: &str) {
        self.record(Level::Debug, component, message);
    }

    fn info(&self, component: &str, message: &str) {
        self.record(Level::Info, component, message);
    }

    fn warn(&self, component: &str, message: &str) {
        self.record(Level::Warn, component, message);
    }

    fn error(&self, component: &str, message: &str) {
        self.record(Level::Error, component, message);
    }
}

/// Shared handle to a sink.
pub type SharedSink = Arc<dyn DiagnosticSink>;

/// Forwards records to `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn record(&self, level: Level, component: &str, message: &str) {
        match level {
            Level::Debug => tracing::debug!(component, "{message}"),
            Level::Info => tracing::info!(component, "{message}"),
            Level::Warn => tracing::warn!(component, "{message}"),
            Level::Error => tracing::error!(component, "{message}"),
        }
    }
}

/// The default sink used when none is supplied.
#[must_use]
pub fn default_sink() -> SharedSink {
    Arc::new(TracingSink)
}

/// A recorded diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub level: Level,
    pub component: String,
    pub message: String,
}

/// Keeps every record in memory. Useful for tests and for callers that want
/// to attach engine diagnostics to their own output.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<Record>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all records so far.
    #[must_use]
    pub fn records(&self) -> Vec<Record> {
        self.records.lock().clone()
    }

    /// Records at `level` or above whose message contains `needle`.
    #[must_use]
    pub fn find(&self, level: Level, needle: &str) -> Vec<Record> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.level >= level && r.message.contains(needle))
            .cloned()
            .collect()
    }
}

impl fmt::Debug for MemorySink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySink")
            .field("records", &self.records.lock().len())
            .finish()
    }
}

impl DiagnosticSink for MemorySink {
    fn record(&self, level: Level, component: &str, message: &str) {
        self.records.lock().push(Record {
            level,
            component: component.to_string(),
            message: message.to_string(),
        });
    }
}

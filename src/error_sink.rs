use crate::workers::WorkerRole;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

/// One failure observed during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    pub role: WorkerRole,
    pub message: String,
    /// Time since the sink was created
    pub at: Duration,
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:>8.3}s] {}: {}",
            self.at.as_secs_f64(),
            self.role.label(),
            self.message
        )
    }
}

/// Append-only, thread-safe log of failures.
#[derive(Debug)]
pub struct ErrorSink {
    started: Instant,
    records: Mutex<Vec<ErrorRecord>>,
}

impl Default for ErrorSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorSink {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn record(&self, role: WorkerRole, message: impl Into<String>) {
        let record = ErrorRecord {
            role,
            message: message.into(),
            at: self.started.elapsed(),
        };
        self.records.lock().push(record);
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all(&self) -> Vec<ErrorRecord> {
        self.records.lock().clone()
    }

    /// The last `n` records in append order.
    pub fn tail(&self, n: usize) -> Vec<ErrorRecord> {
        let records = self.records.lock();
        let start = records.len().saturating_sub(n);
        records[start..].to_vec()
    }
}

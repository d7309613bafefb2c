//! Log capture for tests.
//!
//! Installs a thread-local JSON subscriber so tests can assert on emitted
//! events without touching the global subscriber or the environment.

use std::io::Write;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;

/// In-memory writer shared with the subscriber.
#[derive(Clone, Default)]
struct Buffer(Arc<Mutex<Vec<u8>>>);

impl Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Captured log events. Capturing stops when the value is dropped.
pub struct LogCapture {
    buf: Buffer,
    _guard: DefaultGuard,
}

impl std::fmt::Debug for LogCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogCapture").finish_non_exhaustive()
    }
}

/// Capture events at `INFO` and above on the current thread.
#[must_use]
pub fn capture_logs() -> LogCapture {
    capture_logs_at(LevelFilter::INFO)
}

/// Capture events at `level` and above on the current thread.
#[must_use]
pub fn capture_logs_at(level: LevelFilter) -> LogCapture {
    let buf = Buffer::default();
    let writer = buf.clone();
    let subscriber = tracing_subscriber::registry().with(
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(move || writer.clone())
            .with_filter(level),
    );
    LogCapture {
        buf,
        _guard: tracing::subscriber::set_default(subscriber),
    }
}

impl LogCapture {
    /// Every captured event as parsed JSON.
    #[must_use]
    pub fn events(&self) -> Vec<Value> {
        let raw = self
            .buf
            .0
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        String::from_utf8_lossy(&raw)
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    /// Captured events whose message equals `message`.
    #[must_use]
    pub fn with_message(&self, message: &str) -> Vec<Value> {
        self.events()
            .into_iter()
            .filter(|event| event["fields"]["message"] == message)
            .collect()
    }
}

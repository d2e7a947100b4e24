// src/progress.rs

//! Progress reporting for long-running store operations (schema
//! migration, changeset commit, clone).
//!
//! `ProgressSink` is a minimal three-method interface — `start`,
//! `advance`, `finish` — rather than a stateful position/length object:
//! callers drive it forward and never read it back, so there is nothing
//! to keep in sync.

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Receives progress notifications for a single bounded operation.
///
/// Implementations must be `Send + Sync`: migrations and commits may
/// report progress from worker threads.
pub trait ProgressSink: Send + Sync {
    /// Called once, before any `advance`, with the total unit count.
    fn start(&self, total: u64);

    /// Called as `n` additional units complete, with a short
    /// human-readable description of what just happened.
    fn advance(&self, n: u64, message: &str);

    /// Called once the operation is done, successfully or not.
    fn finish(&self, message: &str);
}

/// No-op sink for quiet/scripted callers.
#[derive(Debug, Default)]
pub struct SilentSink {
    position: AtomicU64,
}

impl SilentSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }
}

impl ProgressSink for SilentSink {
    fn start(&self, _total: u64) {}

    fn advance(&self, n: u64, _message: &str) {
        self.position.fetch_add(n, Ordering::Relaxed);
    }

    fn finish(&self, _message: &str) {}
}

/// Logs progress to `tracing` at info level, throttled so that large
/// operations (e.g. a 100k-row `rebuildLatest` pass) don't flood logs.
pub struct LogSink {
    name: String,
    total: AtomicU64,
    position: AtomicU64,
    log_interval: AtomicU64,
}

impl LogSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            total: AtomicU64::new(0),
            position: AtomicU64::new(0),
            log_interval: AtomicU64::new(1),
        }
    }
}

impl ProgressSink for LogSink {
    fn start(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
        self.log_interval.store(std::cmp::max(1, total / 10), Ordering::Relaxed);
        info!("{}: starting ({} units)", self.name, total);
    }

    fn advance(&self, n: u64, message: &str) {
        let old_pos = self.position.fetch_add(n, Ordering::Relaxed);
        let new_pos = old_pos + n;
        let total = self.total.load(Ordering::Relaxed);
        let interval = self.log_interval.load(Ordering::Relaxed);

        if total > 0 && interval > 0 {
            let old_bucket = old_pos / interval;
            let new_bucket = new_pos / interval;
            if new_bucket > old_bucket {
                let percent = (new_pos * 100) / total;
                info!("{}: {}% ({}/{}) {}", self.name, percent, new_pos, total, message);
            }
        } else if !message.is_empty() {
            info!("{}: {}", self.name, message);
        }
    }

    fn finish(&self, message: &str) {
        info!("{}: {}", self.name, message);
    }
}

/// Calls a user-supplied closure on every notification. Useful for
/// wiring progress into a caller's own reporting (CLI bar, RPC stream).
pub struct CallbackSink<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    callback: F,
}

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Start { total: u64 },
    Advance { n: u64, message: String },
    Finish { message: String },
}

impl<F> CallbackSink<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ProgressSink for CallbackSink<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn start(&self, total: u64) {
        (self.callback)(ProgressEvent::Start { total });
    }

    fn advance(&self, n: u64, message: &str) {
        (self.callback)(ProgressEvent::Advance { n, message: message.to_string() });
    }

    fn finish(&self, message: &str) {
        (self.callback)(ProgressEvent::Finish { message: message.to_string() });
    }
}

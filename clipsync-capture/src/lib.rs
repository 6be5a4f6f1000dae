//! Clipboard capture monitor.
//!
//! Polls a [`ClipboardSource`] on an interval, hashes what it sees, and
//! emits exactly one [`CaptureEvent`] per content change. The last-seen
//! hash is scoped to the monitor instance, so independent monitors (for
//! instance with injected sources under test) never interfere.
//!
//! The monitor is a small state machine: `Idle → Watching → Idle`.
//! `start()` while watching is a no-op; `stop()` joins the polling task,
//! so no event is left in flight when it returns.

mod monitor;
mod source;

pub use monitor::{CaptureEvent, CaptureMonitor, MonitorConfig};
pub use source::{ClipboardRead, ClipboardSource};

#[cfg(feature = "os-clipboard")]
pub use source::SystemClipboard;

use thiserror::Error;

/// Result type for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("clipboard read failed: {0}")]
    Source(String),
}

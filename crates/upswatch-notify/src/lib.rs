//! ---
//! upswatch_section: "03-notifications"
//! upswatch_subsection: "module"
//! upswatch_type: "source"
//! upswatch_scope: "code"
//! upswatch_description: "Notification queue, worker, and sink dispatch."
//! upswatch_version: "v0.1.0"
//! upswatch_owner: "tbd"
//! ---
//! Notification delivery for the upswatch daemon.
//!
//! Producers enqueue through a cheap, non-blocking [`Notifier`] handle; a
//! single background worker drains the queue in strict FIFO order and
//! retries each message until the configured sinks acknowledge it. The
//! critical monitoring path never waits on the network.

use chrono::{DateTime, Utc};

pub mod dispatch;
pub mod queue;

pub use dispatch::{Dispatch, WebhookDispatcher};
pub use queue::{spawn_worker, Notifier, NotifyWorkerHandle};

/// Result alias used throughout the notification crate.
pub type Result<T> = std::result::Result<T, NotifyError>;

/// Error type for the notification subsystem. Queue-side problems never
/// surface as errors: enqueue is fire-and-forget by design.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Wrapper for HTTP client construction failures.
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Severity attached to every message; sinks map it to colours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Crisis,
}

impl Severity {
    /// Discord embed colour for this severity.
    pub fn embed_color(self) -> u32 {
        match self {
            Severity::Info => 3447003,      // blue
            Severity::Success => 3066993,   // green
            Severity::Warning => 15105570,  // orange
            Severity::Crisis => 15158332,   // red
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Crisis => "crisis",
        }
    }
}

/// One queued notification.
#[derive(Debug, Clone)]
pub struct Message {
    /// Monotonically increasing FIFO key assigned at enqueue time.
    pub sequence: u64,
    pub title: Option<String>,
    pub body: String,
    pub severity: Severity,
    pub enqueued_at: DateTime<Utc>,
}

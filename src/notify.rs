//! User-visible notification sink.

use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// Receives `(message, severity, duration)` toasts destined for the user.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str, severity: Severity, duration: Duration);
}

/// Writes notifications to the log; used when no UI is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str, severity: Severity, duration: Duration) {
        let duration_ms = duration.as_millis() as u64;
        match severity {
            Severity::Info | Severity::Success => info!(duration_ms, "{}", message),
            Severity::Warning => warn!(duration_ms, "{}", message),
            Severity::Error => error!(duration_ms, "{}", message),
        }
    }
}

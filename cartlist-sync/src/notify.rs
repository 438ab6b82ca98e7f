//! Push-notification seam.
//!
//! Delivery is a black box behind the [`Notifier`] trait: the server
//! decides *who* gets notified (every subscribed user except the one who
//! signaled), a notifier decides *how*. The default implementation only
//! logs, which is all the sync engine itself needs.

use std::sync::Mutex;

/// Sends a payload to a set of users' push subscriptions.
pub trait Notifier: Send + Sync {
    fn send(&self, user_ids: &[String], payload: &str);
}

/// Notifier that logs instead of delivering.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, user_ids: &[String], payload: &str) {
        log::info!("push to {} user(s): {payload}", user_ids.len());
    }
}

/// Notifier that records every call, for assertions in tests.
pub struct RecordingNotifier {
    calls: Mutex<Vec<(Vec<String>, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(Vec<String>, String)> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Default for RecordingNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for RecordingNotifier {
    fn send(&self, user_ids: &[String], payload: &str) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((user_ids.to_vec(), payload.to_string()));
    }
}

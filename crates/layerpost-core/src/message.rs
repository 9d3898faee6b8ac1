//! Notification sink
//!
//! One-way "show message" channel used to report degraded or partial
//! results after a pass. Nothing the sink does feeds back into processing.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// A message shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub title: String,
    pub text: String,
}

impl Message {
    /// Create a new message
    pub fn new(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            text: text.into(),
        }
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.title, self.text)
    }
}

/// Sink for user-facing messages
pub trait Notifier: Send + Sync {
    /// Show a message; must not block
    fn show_message(&self, title: &str, text: &str);
}

/// Arc-wrapped notifier for sharing across passes
pub type NotifierHandle = Arc<dyn Notifier>;

/// Notifier that writes every message to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn show_message(&self, title: &str, text: &str) {
        tracing::warn!("{}: {}", title, text);
    }
}

/// Notifier that keeps every message for later inspection
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<Message>>,
}

impl RecordingNotifier {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded messages
    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().clone()
    }

    /// Number of recorded messages
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    /// True when nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    /// Remove and return every recorded message
    pub fn drain(&self) -> Vec<Message> {
        std::mem::take(&mut *self.messages.lock())
    }
}

impl Notifier for RecordingNotifier {
    fn show_message(&self, title: &str, text: &str) {
        tracing::debug!("Recorded message '{}'", title);
        self.messages.lock().push(Message::new(title, text));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_notifier() {
        let notifier = RecordingNotifier::new();
        assert!(notifier.is_empty());
        notifier.show_message("Pause at layer", "1 of 2 requested layers were found");
        assert_eq!(notifier.len(), 1);
        assert_eq!(
            notifier.messages()[0].to_string(),
            "[Pause at layer] 1 of 2 requested layers were found"
        );
        assert_eq!(notifier.drain().len(), 1);
        assert!(notifier.is_empty());
    }

    #[test]
    fn test_notifier_handle() {
        let recorder = Arc::new(RecordingNotifier::new());
        let handle: NotifierHandle = recorder.clone();
        handle.show_message("t", "x");
        assert_eq!(recorder.len(), 1);
        TracingNotifier.show_message("t", "x");
    }
}

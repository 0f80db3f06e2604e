//! Fire-and-forget user notifications.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Success,
    Error,
}

pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, level: Level, message: &str);
}

/// Prints notifications; errors go to stderr.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, level: Level, message: &str) {
        match level {
            Level::Error => eprintln!("[notify] error: {message}"),
            Level::Info => println!("[notify] {message}"),
            Level::Success => println!("[notify] ok: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub level: Level,
    pub message: String,
}

/// Keeps notifications until drained, for clients that poll.
#[derive(Clone, Default)]
pub struct MemoryNotifier {
    inbox: Arc<Mutex<Vec<Notification>>>,
}

impl MemoryNotifier {
    /// Take every notification recorded so far, oldest first.
    pub fn drain(&self) -> Vec<Notification> {
        let mut inbox = self.inbox.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *inbox)
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, level: Level, message: &str) {
        self.inbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Notification {
                level,
                message: message.to_string(),
            });
    }
}

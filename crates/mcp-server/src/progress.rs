use async_trait::async_trait;
use colloquy_protocol::{Notification, PROGRESS_NOTIFICATION};
use serde_json::{json, Value};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Outbound channel for server-initiated notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: Notification) -> io::Result<()>;
}

/// Emits ordered `notifications/progress` frames for one request.
///
/// A reporter without a sink or token is inert, so handlers can call it unconditionally.
pub struct ProgressReporter {
    sink: Option<Arc<dyn NotificationSink>>,
    token: Option<Value>,
    sent: AtomicU64,
}

impl ProgressReporter {
    pub fn disabled() -> Self {
        Self {
            sink: None,
            token: None,
            sent: AtomicU64::new(0),
        }
    }

    pub fn new(sink: Arc<dyn NotificationSink>, token: Value) -> Self {
        Self {
            sink: Some(sink),
            token: Some(token),
            sent: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some() && self.token.is_some()
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Sends one partial result. Failures are logged; the final response is still attempted.
    pub async fn report(&self, message: &str) {
        let (Some(sink), Some(token)) = (self.sink.as_ref(), self.token.as_ref()) else {
            return;
        };
        let progress = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        let notification = Notification::new(
            PROGRESS_NOTIFICATION,
            json!({
                "progressToken": token,
                "progress": progress,
                "message": message,
            }),
        );
        if let Err(err) = sink.notify(notification).await {
            log::warn!("Dropping progress notification {progress}: {err}");
        }
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("token", &self.token)
            .field("sent", &self.sent())
            .finish()
    }
}

/// Collects notifications in memory.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingSink {
    pub(crate) seen: std::sync::Mutex<Vec<Notification>>,
}

#[cfg(test)]
#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, notification: Notification) -> io::Result<()> {
        self.seen
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(notification);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn numbers_progress_from_one_and_echoes_the_token() {
        let sink = Arc::new(RecordingSink::default());
        let reporter = ProgressReporter::new(sink.clone(), json!("tok-1"));
        reporter.report("first").await;
        reporter.report("second").await;

        let seen = sink.seen.lock().expect("lock");
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].method, PROGRESS_NOTIFICATION);
        assert_eq!(seen[0].params["progressToken"], "tok-1");
        assert_eq!(seen[1].params["progress"], 2);
        assert_eq!(seen[1].params["message"], "second");
    }

    #[tokio::test]
    async fn disabled_reporter_sends_nothing() {
        let reporter = ProgressReporter::disabled();
        reporter.report("ignored").await;
        assert!(!reporter.is_enabled());
        assert_eq!(reporter.sent(), 0);
    }
}

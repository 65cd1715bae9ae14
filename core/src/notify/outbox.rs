//! At-least-once notification queue
//!
//! `enqueue` never blocks or fails. A single worker drains the queue,
//! retrying each message with exponential backoff; messages that exhaust
//! their retries are kept as dead letters for inspection.

use super::{Notification, Notifier};
use crate::config::RetryConfig;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub notification: Notification,
    pub attempts: u32,
    pub last_error: String,
    pub failed_at: DateTime<Utc>,
}

pub struct NotificationOutbox {
    notifier: Arc<dyn Notifier>,
    retry: RetryConfig,
    tx: mpsc::UnboundedSender<Notification>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Notification>>>,
    dead_letters: Mutex<Vec<DeadLetter>>,
    delivered: AtomicU64,
}

impl NotificationOutbox {
    pub fn new(notifier: Arc<dyn Notifier>, retry: RetryConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            notifier,
            retry,
            tx,
            rx: Mutex::new(Some(rx)),
            dead_letters: Mutex::new(Vec::new()),
            delivered: AtomicU64::new(0),
        }
    }

    /// Queue a notification for background delivery
    pub fn enqueue(&self, notification: Notification) {
        debug!(recipient = %notification.recipient, title = %notification.title, "notification queued");
        if let Err(mpsc::error::SendError(notification)) = self.tx.send(notification) {
            warn!(recipient = %notification.recipient, "outbox worker gone, dead-lettering notification");
            self.dead_letters.lock().push(DeadLetter {
                notification,
                attempts: 0,
                last_error: "outbox closed".to_string(),
                failed_at: Utc::now(),
            });
        }
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().clone()
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let outbox = Arc::clone(self);
        tokio::spawn(async move { outbox.run(cancel).await })
    }

    /// Drain the queue until cancelled, then flush what is already queued
    pub async fn run(&self, cancel: CancellationToken) {
        let Some(mut rx) = self.rx.lock().take() else {
            warn!("outbox worker already running");
            return;
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = rx.recv() => match next {
                    Some(notification) => self.deliver(notification).await,
                    None => return,
                },
            }
        }

        while let Ok(notification) = rx.try_recv() {
            self.deliver(notification).await;
        }
    }

    async fn deliver(&self, notification: Notification) {
        let mut last_error = String::new();

        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                sleep(self.retry.delay_for_attempt(attempt)).await;
            }
            match self.notifier.send(&notification).await {
                Ok(()) => {
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(err) => {
                    debug!(recipient = %notification.recipient, attempt, error = %err, "notification attempt failed");
                    last_error = err.to_string();
                }
            }
        }

        warn!(
            recipient = %notification.recipient,
            title = %notification.title,
            error = %last_error,
            "notification dead-lettered"
        );
        self.dead_letters.lock().push(DeadLetter {
            notification,
            attempts: self.retry.max_retries + 1,
            last_error,
            failed_at: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotifyError;
    use crate::types::AccountId;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    /// Fails the first `failures` sends, then succeeds
    struct FlakyNotifier {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl Notifier for FlakyNotifier {
        async fn send(&self, _notification: &Notification) -> Result<(), NotifyError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(NotifyError::Delivery("smtp down".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn note() -> Notification {
        Notification::new(AccountId::new("buyer"), "Intent awarded", "agent-1 won at 80.00")
    }

    async fn wait_until(mut done: impl FnMut() -> bool) {
        for _ in 0..1000 {
            if done() {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let notifier = Arc::new(FlakyNotifier {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let outbox = Arc::new(NotificationOutbox::new(notifier.clone(), RetryConfig::default()));
        let cancel = CancellationToken::new();
        let worker = outbox.spawn(cancel.clone());

        outbox.enqueue(note());
        wait_until(|| outbox.delivered_count() == 1).await;

        assert_eq!(outbox.delivered_count(), 1);
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 3);
        assert!(outbox.dead_letters().is_empty());

        cancel.cancel();
        worker.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_messages_are_dead_lettered() {
        let notifier = Arc::new(FlakyNotifier {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let retry = RetryConfig::default();
        let outbox = Arc::new(NotificationOutbox::new(notifier.clone(), retry.clone()));
        let cancel = CancellationToken::new();
        let worker = outbox.spawn(cancel.clone());

        outbox.enqueue(note());
        wait_until(|| !outbox.dead_letters().is_empty()).await;

        let dead = outbox.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, retry.max_retries + 1);
        assert!(dead[0].last_error.contains("smtp down"));
        assert_eq!(outbox.delivered_count(), 0);

        cancel.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_queued_messages_flush_on_shutdown() {
        let notifier = Arc::new(FlakyNotifier {
            failures: 0,
            calls: AtomicU32::new(0),
        });
        let outbox = Arc::new(NotificationOutbox::new(notifier, RetryConfig::no_retry()));
        outbox.enqueue(note());
        outbox.enqueue(note());

        let cancel = CancellationToken::new();
        cancel.cancel();
        outbox.run(cancel).await;

        assert_eq!(outbox.delivered_count(), 2);
    }
}

//! ---
//! upswatch_section: "03-notifications"
//! upswatch_subsection: "module"
//! upswatch_type: "source"
//! upswatch_scope: "code"
//! upswatch_description: "Notification queue, worker, and sink dispatch."
//! upswatch_version: "v0.1.0"
//! upswatch_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use upswatch_common::config::NotificationsConfig;

use crate::dispatch::Dispatch;
use crate::{Message, Severity};

/// Cheap cloneable producer handle. `enqueue` is a bounded memory write and
/// never waits on the network.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: Option<mpsc::UnboundedSender<Message>>,
    sequence: Arc<AtomicU64>,
    depth: Arc<AtomicU64>,
    default_title: Option<String>,
}

impl Notifier {
    /// A notifier with no sinks configured; every enqueue is a no-op.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            sequence: Arc::new(AtomicU64::new(0)),
            depth: Arc::new(AtomicU64::new(0)),
            default_title: None,
        }
    }

    pub fn enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Queue a message with the configured default title.
    pub fn enqueue(&self, severity: Severity, body: impl Into<String>) {
        self.enqueue_titled(severity, self.default_title.clone(), body);
    }

    /// Queue a message with an explicit title override.
    pub fn enqueue_titled(
        &self,
        severity: Severity,
        title: Option<String>,
        body: impl Into<String>,
    ) {
        let Some(tx) = &self.tx else {
            return;
        };
        let message = Message {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            title,
            body: body.into(),
            severity,
            enqueued_at: Utc::now(),
        };
        self.depth.fetch_add(1, Ordering::SeqCst);
        if tx.send(message).is_err() {
            // Worker already stopped; the process is exiting anyway.
            self.depth.fetch_sub(1, Ordering::SeqCst);
            debug!("notification enqueued after worker stopped; dropped");
        }
    }

    /// Current number of undelivered messages.
    pub fn depth(&self) -> u64 {
        self.depth.load(Ordering::SeqCst)
    }
}

/// Lifecycle handle for the background worker task.
pub struct NotifyWorkerHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
    depth: Arc<AtomicU64>,
    drain_bound: Duration,
}

impl NotifyWorkerHandle {
    /// Signal the worker to drain, wait out the bounded drain window, and
    /// log whatever is left. Undelivered messages are lost by design; the
    /// host is going away.
    pub async fn shutdown(mut self) {
        let _ = self.stop_tx.send(true);
        match tokio::time::timeout(self.drain_bound, &mut self.task).await {
            Ok(_) => {
                let remaining = self.depth.load(Ordering::SeqCst);
                info!(remaining, "notification worker drained");
            }
            Err(_) => {
                self.task.abort();
                let remaining = self.depth.load(Ordering::SeqCst);
                warn!(
                    remaining,
                    "notification worker did not drain within the bound; queue discarded"
                );
            }
        }
    }
}

/// Start the single consumer task and return the producer handle plus its
/// lifecycle handle. With no configured URLs the worker is not spawned and
/// the returned notifier swallows everything.
pub fn spawn_worker(
    config: &NotificationsConfig,
    dispatch: Arc<dyn Dispatch>,
) -> (Notifier, Option<NotifyWorkerHandle>) {
    if !config.enabled() {
        info!("notifications disabled; no sink urls configured");
        return (Notifier::disabled(), None);
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let (stop_tx, stop_rx) = watch::channel(false);
    let depth = Arc::new(AtomicU64::new(0));

    let worker = NotifyWorker {
        rx,
        stop: stop_rx,
        dispatch,
        urls: config.urls.clone(),
        send_timeout: config.send_timeout,
        retry_interval: config.retry_interval,
        depth: depth.clone(),
    };
    let task = tokio::spawn(worker.run());

    let notifier = Notifier {
        tx: Some(tx),
        sequence: Arc::new(AtomicU64::new(0)),
        depth: depth.clone(),
        default_title: config.title.clone(),
    };
    let handle = NotifyWorkerHandle {
        stop_tx,
        task,
        depth,
        drain_bound: config.send_timeout + config.retry_interval,
    };
    (notifier, Some(handle))
}

struct NotifyWorker {
    rx: mpsc::UnboundedReceiver<Message>,
    stop: watch::Receiver<bool>,
    dispatch: Arc<dyn Dispatch>,
    urls: Vec<String>,
    send_timeout: Duration,
    retry_interval: Duration,
    depth: Arc<AtomicU64>,
}

impl NotifyWorker {
    async fn run(mut self) {
        info!(sinks = self.urls.len(), "notification worker started");
        loop {
            tokio::select! {
                changed = self.stop.changed() => {
                    if changed.is_err() || *self.stop.borrow() {
                        self.drain().await;
                        return;
                    }
                }
                message = self.rx.recv() => {
                    let Some(message) = message else {
                        return;
                    };
                    self.deliver_until_sent(message).await;
                }
            }
        }
    }

    /// Process whatever is already queued, still in FIFO order and still
    /// with persistent retry. The caller bounds this with a hard timeout.
    async fn drain(&mut self) {
        debug!(remaining = self.depth.load(Ordering::SeqCst), "draining notification queue");
        while let Ok(message) = self.rx.try_recv() {
            self.deliver_until_sent(message).await;
        }
    }

    /// Retry a single message until every sink acknowledges it. The next
    /// message is not attempted before this one is through; FIFO ordering
    /// is worth the head-of-line blocking during an outage.
    async fn deliver_until_sent(&self, message: Message) {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if self
                .dispatch
                .send(&message, &self.urls, self.send_timeout)
                .await
            {
                self.depth.fetch_sub(1, Ordering::SeqCst);
                if attempt > 1 {
                    info!(
                        sequence = message.sequence,
                        attempts = attempt,
                        "notification delivered after retry"
                    );
                }
                return;
            }
            if attempt == 1 {
                warn!(
                    sequence = message.sequence,
                    severity = message.severity.as_str(),
                    "notification delivery failed; retrying until acknowledged"
                );
            } else {
                debug!(sequence = message.sequence, attempt, "notification retry failed");
            }
            tokio::time::sleep(self.retry_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records delivered bodies; fails the first `fail_first` attempts.
    struct FlakySink {
        fail_first: AtomicU64,
        delivered: Mutex<Vec<String>>,
        attempts: AtomicU64,
    }

    impl FlakySink {
        fn new(fail_first: u64) -> Arc<Self> {
            Arc::new(Self {
                fail_first: AtomicU64::new(fail_first),
                delivered: Mutex::new(Vec::new()),
                attempts: AtomicU64::new(0),
            })
        }

        fn delivered(&self) -> Vec<String> {
            self.delivered.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Dispatch for FlakySink {
        async fn send(&self, message: &Message, _urls: &[String], _timeout: Duration) -> bool {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail_first.load(Ordering::SeqCst) > 0 {
                self.fail_first.fetch_sub(1, Ordering::SeqCst);
                return false;
            }
            self.delivered.lock().unwrap().push(message.body.clone());
            true
        }
    }

    fn test_config() -> NotificationsConfig {
        let mut config = NotificationsConfig::default();
        config.urls = vec!["https://example.invalid/hook".to_owned()];
        config.send_timeout = Duration::from_secs(1);
        config.retry_interval = Duration::from_millis(50);
        config
    }

    #[tokio::test(start_paused = true)]
    async fn fifo_order_survives_sink_outage() {
        let sink = FlakySink::new(3);
        let (notifier, handle) = spawn_worker(&test_config(), sink.clone());
        let handle = handle.expect("worker spawned");

        notifier.enqueue(Severity::Warning, "m1");
        notifier.enqueue(Severity::Info, "m2");
        notifier.enqueue(Severity::Crisis, "m3");

        while sink.delivered().len() < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sink.delivered(), vec!["m1", "m2", "m3"]);
        assert_eq!(notifier.depth(), 0);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn identical_bodies_are_distinct_messages() {
        let sink = FlakySink::new(0);
        let (notifier, handle) = spawn_worker(&test_config(), sink.clone());
        let handle = handle.expect("worker spawned");

        notifier.enqueue(Severity::Info, "probe");
        notifier.enqueue(Severity::Info, "probe");

        while sink.delivered().len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sink.delivered(), vec!["probe", "probe"]);
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 2);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drains_pending_messages() {
        let sink = FlakySink::new(0);
        let (notifier, handle) = spawn_worker(&test_config(), sink.clone());
        let handle = handle.expect("worker spawned");

        notifier.enqueue(Severity::Info, "last words");
        handle.shutdown().await;
        assert_eq!(sink.delivered(), vec!["last words"]);
    }

    #[test]
    fn disabled_notifier_swallows_enqueues() {
        let notifier = Notifier::disabled();
        notifier.enqueue(Severity::Crisis, "into the void");
        assert_eq!(notifier.depth(), 0);
        assert!(!notifier.enabled());
    }
}

//! Fire-and-forget notification dispatch
//!
//! Submitted events go into a bounded mpsc queue drained by a fixed pool of
//! worker tasks. Submission never waits: when the queue is full the event
//! being submitted is dropped and counted. Each outbound call runs under a
//! timeout and its failure stays inside the worker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::analytics::VisitorEvent;
use crate::config::NotifyConfig;
use crate::notify::message::format_message;
use crate::notify::webhook::{Notifier, WebhookNotifier};

#[derive(Debug, Clone, Copy)]
pub struct DispatcherOptions {
    pub queue_capacity: usize,
    pub workers: usize,
    /// Upper bound on a single outbound call
    pub timeout: Duration,
}

impl From<&NotifyConfig> for DispatcherOptions {
    fn from(config: &NotifyConfig) -> Self {
        Self {
            queue_capacity: config.queue_capacity,
            workers: config.workers,
            timeout: config.timeout(),
        }
    }
}

#[derive(Debug, Default)]
struct DispatcherStats {
    submitted: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of the dispatcher counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub submitted: u64,
    pub dropped: u64,
    pub delivered: u64,
    pub failed: u64,
}

struct WorkerContext {
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
    stats: Arc<DispatcherStats>,
}

pub struct NotificationDispatcher {
    /// `None` when notifications are disabled
    sender: Option<mpsc::Sender<VisitorEvent>>,
    stats: Arc<DispatcherStats>,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl NotificationDispatcher {
    /// Start `options.workers` background senders feeding `notifier`.
    pub fn new(notifier: Arc<dyn Notifier>, options: DispatcherOptions) -> Self {
        let (sender, receiver) = mpsc::channel(options.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let (shutdown_tx, _) = watch::channel(false);
        let stats = Arc::new(DispatcherStats::default());

        let context = Arc::new(WorkerContext {
            notifier,
            timeout: options.timeout,
            stats: Arc::clone(&stats),
        });

        let workers = (0..options.workers.max(1))
            .map(|id| {
                let receiver = Arc::clone(&receiver);
                let shutdown_rx = shutdown_tx.subscribe();
                let context = Arc::clone(&context);
                tokio::spawn(run_worker(id, receiver, shutdown_rx, context))
            })
            .collect();

        Self {
            sender: Some(sender),
            stats,
            shutdown_tx,
            workers: Mutex::new(workers),
        }
    }

    /// Dispatcher that accepts and discards everything.
    pub fn disabled() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            sender: None,
            stats: Arc::new(DispatcherStats::default()),
            shutdown_tx,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Webhook dispatcher, or a disabled one when no URL is configured.
    pub fn from_config(config: &NotifyConfig) -> anyhow::Result<Self> {
        let Some(url) = config.webhook_url.as_deref() else {
            info!("No notification webhook configured, notifications disabled");
            return Ok(Self::disabled());
        };

        let notifier = WebhookNotifier::new(url, config.timeout())?;
        info!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            "Visitor notifications enabled"
        );
        Ok(Self::new(Arc::new(notifier), config.into()))
    }

    pub fn is_enabled(&self) -> bool {
        self.sender.is_some()
    }

    /// Queue an event for notification. Never blocks.
    pub fn submit(&self, event: VisitorEvent) {
        let Some(sender) = &self.sender else {
            return;
        };

        self.stats.submitted.fetch_add(1, Ordering::Relaxed);

        match sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(client = %event.client_address, "Notification queue full, dropping event");
            }
            Err(TrySendError::Closed(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Notification dispatcher is shut down, dropping event");
            }
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.stats.submitted.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting events, deliver what is already queued and wait for
    /// the workers to finish.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);

        let workers = std::mem::take(&mut *self.workers.lock().await);
        if workers.is_empty() {
            return;
        }

        info!("Draining notification queue...");
        for handle in workers {
            if let Err(err) = handle.await {
                warn!("Notification worker ended abnormally: {}", err);
            }
        }

        let stats = self.stats();
        info!(
            delivered = stats.delivered,
            failed = stats.failed,
            dropped = stats.dropped,
            "Notification dispatcher stopped"
        );
    }
}

async fn run_worker(
    id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<VisitorEvent>>>,
    mut shutdown_rx: watch::Receiver<bool>,
    context: Arc<WorkerContext>,
) {
    loop {
        let next = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                event = receiver.recv() => event,
                _ = shutdown_rx.changed() => {
                    // Refuse new events but hand out whatever is still queued
                    receiver.close();
                    receiver.recv().await
                }
            }
        };

        match next {
            Some(event) => context.deliver(id, event).await,
            None => break,
        }
    }

    debug!(worker = id, "Notification worker stopped");
}

impl WorkerContext {
    async fn deliver(&self, worker: usize, event: VisitorEvent) {
        let message = format_message(&event);

        match tokio::time::timeout(self.timeout, self.notifier.send(&message)).await {
            Ok(Ok(())) => {
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                debug!(worker, client = %event.client_address, "Notification delivered");
            }
            Ok(Err(err)) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(worker, client = %event.client_address, "Notification delivery failed: {:#}", err);
            }
            Err(_) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    worker,
                    client = %event.client_address,
                    "Notification delivery timed out after {:?}",
                    self.timeout
                );
            }
        }
    }
}

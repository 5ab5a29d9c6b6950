use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::RateLimitConfig;

/// Outcome of a rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allow {
        /// Requests left in the current window
        remaining: u32,
    },
    Reject {
        /// Time until the current window elapses
        retry_after: Duration,
    },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allow { .. })
    }
}

#[derive(Debug)]
struct WindowCounter {
    window_start: Instant,
    count: u32,
}

/// Per-client fixed-window rate limiter.
///
/// Counters live in a sharded `DashMap`: the read-increment-compare for one
/// client happens under that entry's shard lock, so updates for a client are
/// linearizable while unrelated clients proceed in parallel.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

struct Inner {
    window: Duration,
    max_requests: u32,
    counters: DashMap<String, WindowCounter>,
    shutdown_tx: watch::Sender<bool>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                window,
                max_requests,
                counters: DashMap::new(),
                shutdown_tx,
            }),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.window(), config.max_requests)
    }

    pub fn window(&self) -> Duration {
        self.inner.window
    }

    pub fn max_requests(&self) -> u32 {
        self.inner.max_requests
    }

    /// Count a request from `client` and decide whether to admit it.
    pub fn admit(&self, client: &str) -> Admission {
        self.admit_at(client, Instant::now())
    }

    /// `admit` against an explicit clock reading.
    pub fn admit_at(&self, client: &str, now: Instant) -> Admission {
        // Fast path avoids allocating the key for known clients
        if let Some(mut counter) = self.inner.counters.get_mut(client) {
            return self.count(&mut counter, now);
        }

        let mut counter = self
            .inner
            .counters
            .entry(client.to_owned())
            .or_insert_with(|| WindowCounter {
                window_start: now,
                count: 0,
            });
        self.count(&mut counter, now)
    }

    fn count(&self, counter: &mut WindowCounter, now: Instant) -> Admission {
        let window = self.inner.window;

        if now.saturating_duration_since(counter.window_start) >= window {
            counter.window_start = now;
            counter.count = 0;
        }

        counter.count = counter.count.saturating_add(1);

        if counter.count > self.inner.max_requests {
            Admission::Reject {
                retry_after: window.saturating_sub(now.saturating_duration_since(counter.window_start)),
            }
        } else {
            Admission::Allow {
                remaining: self.inner.max_requests - counter.count,
            }
        }
    }

    /// Evict counters whose window has elapsed. Returns how many were removed.
    ///
    /// An evicted counter behaves exactly like one that would have been reset
    /// on its next request, so eviction never changes a decision.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let window = self.inner.window;
        let before = self.inner.counters.len();
        self.inner
            .counters
            .retain(|_, counter| now.saturating_duration_since(counter.window_start) < window);
        before.saturating_sub(self.inner.counters.len())
    }

    /// Number of clients currently holding a counter
    pub fn tracked_clients(&self) -> usize {
        self.inner.counters.len()
    }

    /// Start the periodic eviction sweep.
    ///
    /// The task ends on `shutdown` or once every handle to the limiter is dropped.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        let limiter = RateLimiter { inner };
                        let evicted = limiter.sweep();
                        if evicted > 0 {
                            debug!(evicted, remaining = limiter.tracked_clients(), "Evicted expired rate limit counters");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("Rate limit sweeper shutting down");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Stop the eviction sweeper
    pub fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(true);
    }
}

//! Request coalescing for position queries.
//!
//! Any number of callers may ask for a position while a cycle is running;
//! they all wait for that cycle's outcome instead of starting their own.
//!
//! ```text
//! Caller A ─┐
//!           │                              Acquisition
//! Caller B ─┼──► RequestCoalescer ───────► Controller
//!           │        │                        │
//! Caller C ─┘        │                        │
//!                    ▼                        ▼
//!              [A, B, C all              [one cycle]
//!               receive the same              │
//!               outcome once]◄───────────────┘
//! ```
//!
//! Each waiter is a one-shot channel. Resolving sends the outcome into every
//! channel and clears the set; sending never runs caller code, so fan-out is
//! safe from inside the manager daemon. Callers consume the outcome through a
//! [`LocationTicket`].

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::error::{LocationError, LocationResult};
use crate::fix::Fix;

/// A caller waiting for the outcome of the current cycle.
#[derive(Debug)]
pub struct Waiter {
    reply: oneshot::Sender<LocationResult>,
}

impl Waiter {
    /// Create a waiter and the ticket its outcome will be delivered to.
    pub fn channel() -> (Waiter, LocationTicket) {
        let (reply, rx) = oneshot::channel();
        (Waiter { reply }, LocationTicket { rx })
    }

    /// Deliver the outcome. Returns false if the caller stopped listening.
    pub fn resolve(self, outcome: LocationResult) -> bool {
        self.reply.send(outcome).is_ok()
    }
}

/// Future side of a [`Waiter`].
///
/// Resolves exactly once. If the manager goes away before answering, the
/// ticket resolves to [`LocationError::Cancelled`].
#[derive(Debug)]
pub struct LocationTicket {
    rx: oneshot::Receiver<LocationResult>,
}

impl Future for LocationTicket {
    type Output = LocationResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(LocationError::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Statistics for monitoring coalescing effectiveness.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CoalescerStats {
    /// Total requests received.
    pub total_requests: u64,
    /// Requests answered straight from the cache.
    pub cache_hits: u64,
    /// Requests that joined an already running cycle.
    pub coalesced_requests: u64,
    /// Cycles started.
    pub cycles_started: u64,
    /// Outcomes delivered to waiters (success or failure).
    pub outcomes_delivered: u64,
}

impl CoalescerStats {
    /// Fraction of requests that joined a running cycle (0.0 to 1.0).
    pub fn coalescing_ratio(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.coalesced_requests as f64 / self.total_requests as f64
        }
    }
}

/// Atomic counters behind [`CoalescerStats`], shared with the facade.
#[derive(Debug, Default)]
pub struct CoalescerCounters {
    total_requests: AtomicU64,
    cache_hits: AtomicU64,
    coalesced_requests: AtomicU64,
    cycles_started: AtomicU64,
    outcomes_delivered: AtomicU64,
}

impl CoalescerCounters {
    /// Snapshot of the counters.
    pub fn snapshot(&self) -> CoalescerStats {
        CoalescerStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            coalesced_requests: self.coalesced_requests.load(Ordering::Relaxed),
            cycles_started: self.cycles_started.load(Ordering::Relaxed),
            outcomes_delivered: self.outcomes_delivered.load(Ordering::Relaxed),
        }
    }
}

/// The set of waiters attached to the current cycle.
#[derive(Debug, Default)]
pub struct RequestCoalescer {
    waiters: Vec<Waiter>,
    counters: Arc<CoalescerCounters>,
}

impl RequestCoalescer {
    /// Create an empty coalescer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a coalescer reporting into shared counters.
    pub fn with_counters(counters: Arc<CoalescerCounters>) -> Self {
        Self {
            waiters: Vec::new(),
            counters,
        }
    }

    /// Shared counters.
    pub fn counters(&self) -> Arc<CoalescerCounters> {
        Arc::clone(&self.counters)
    }

    /// Answer a request immediately from the cache.
    pub fn answer_from_cache(&self, waiter: Waiter, fix: Fix) {
        self.counters.total_requests.fetch_add(1, Ordering::Relaxed);
        self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
        debug!(accuracy_m = fix.horizontal_accuracy, "Answering request from cache");
        self.deliver(waiter, Ok(fix));
    }

    /// Answer a request immediately with a failure, without attaching it.
    pub fn reject(&self, waiter: Waiter, error: LocationError) {
        self.counters.total_requests.fetch_add(1, Ordering::Relaxed);
        debug!(error = %error, "Rejecting request");
        self.deliver(waiter, Err(error));
    }

    /// Attach the first waiter of a new cycle.
    pub fn attach_new(&mut self, waiter: Waiter) {
        self.counters.total_requests.fetch_add(1, Ordering::Relaxed);
        self.counters.cycles_started.fetch_add(1, Ordering::Relaxed);
        self.waiters.push(waiter);
        debug!(waiters = self.waiters.len(), "New request - starting cycle");
    }

    /// Attach a waiter to the running cycle.
    pub fn attach_coalesced(&mut self, waiter: Waiter) {
        self.counters.total_requests.fetch_add(1, Ordering::Relaxed);
        self.counters
            .coalesced_requests
            .fetch_add(1, Ordering::Relaxed);
        self.waiters.push(waiter);
        debug!(
            waiters = self.waiters.len(),
            "Coalescing request - waiting for running cycle"
        );
    }

    /// Record a cycle that started without a waiter (continuous mode loop).
    pub fn record_cycle(&self) {
        self.counters.cycles_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Deliver `outcome` to every attached waiter once and clear the set.
    ///
    /// Returns the number of waiters the outcome was delivered to.
    pub fn resolve(&mut self, outcome: &LocationResult) -> usize {
        let waiters = std::mem::take(&mut self.waiters);
        let count = waiters.len();
        for waiter in waiters {
            self.deliver(waiter, outcome.clone());
        }
        if count > 0 {
            debug!(
                waiters = count,
                success = outcome.is_ok(),
                "Broadcast outcome to {} waiters",
                count
            );
        }
        count
    }

    /// Number of attached waiters.
    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }

    /// Whether no waiter is attached.
    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    /// Snapshot of the statistics.
    pub fn stats(&self) -> CoalescerStats {
        self.counters.snapshot()
    }

    /// Log current statistics.
    pub fn log_stats(&self) {
        let stats = self.stats();
        info!(
            total_requests = stats.total_requests,
            cache_hits = stats.cache_hits,
            coalesced = stats.coalesced_requests,
            cycles_started = stats.cycles_started,
            waiting = self.waiters.len(),
            coalescing_ratio = format!("{:.1}%", stats.coalescing_ratio() * 100.0),
            "Request coalescing statistics"
        );
    }

    fn deliver(&self, waiter: Waiter, outcome: LocationResult) {
        self.counters
            .outcomes_delivered
            .fetch_add(1, Ordering::Relaxed);
        // A dropped ticket (fire-and-forget refresh) is not an error
        let _ = waiter.resolve(outcome);
    }
}

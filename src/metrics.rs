use std::sync::atomic::{AtomicUsize, Ordering};

/// Runtime counters for one feed client.
///
/// Purpose:
/// - Track connection churn (attempts, opens, scheduled retries)
/// - Track throughput (frames in, snapshots out)
/// - Track parse failures
///
/// Design:
/// - Lock-free (Atomics)
/// - Owned by the client and shared via `Arc`, no process global
#[derive(Default, Debug)]
pub struct FeedMetrics {
    // Connection level
    pub connect_attempts: AtomicUsize,
    pub connections_opened: AtomicUsize,
    pub reconnects_scheduled: AtomicUsize,
    pub forced_reconnects: AtomicUsize,

    // Throughput
    pub frames_received: AtomicUsize,
    pub snapshots_published: AtomicUsize,
    pub parse_errors: AtomicUsize,

    // Consumers
    pub subscribers_active: AtomicUsize,
}

impl FeedMetrics {
    pub(crate) fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// One-line summary for the periodic reporter.
    pub fn report_line(&self) -> String {
        format!(
            "[METRICS] subs={} attempts={} opened={} retries={} forced={} frames={} snapshots={} parse_err={}",
            self.subscribers_active.load(Ordering::Relaxed),
            self.connect_attempts.load(Ordering::Relaxed),
            self.connections_opened.load(Ordering::Relaxed),
            self.reconnects_scheduled.load(Ordering::Relaxed),
            self.forced_reconnects.load(Ordering::Relaxed),
            self.frames_received.load(Ordering::Relaxed),
            self.snapshots_published.load(Ordering::Relaxed),
            self.parse_errors.load(Ordering::Relaxed),
        )
    }
}

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;

use crate::{
    config::FeedConfig,
    feed::machine::{FeedMachine, Input},
    feed::runner::run_driver,
    feed::state::ConnectionState,
    feed::subscribers::{Subscriber, SubscriberId},
    metrics::FeedMetrics,
    schema::Snapshot,
};

/// ============================================================
/// FeedClient
/// ============================================================
///
/// Handle to the single upstream feed connection.
///
/// Responsibilities:
/// - Register and remove subscribers
/// - Forward manual reconnect / resume / shutdown requests
/// - Expose the latest snapshot and connection state
///
/// Design constraints:
/// - Cloning the handle never opens another connection; all clones
///   talk to the same driver task
/// - No method blocks; results arrive later through callbacks
///
/// Construct one per application in the composition root and pass
/// clones to whoever needs it.
#[derive(Clone)]
pub struct FeedClient {
    inner: Arc<Inner>,
}

struct Inner {
    tx: mpsc::UnboundedSender<Input>,
    state_rx: watch::Receiver<ConnectionState>,
    snapshot_rx: watch::Receiver<Option<Arc<Snapshot>>>,
    metrics: Arc<FeedMetrics>,
    next_subscriber: AtomicU64,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Last handle gone: close the socket rather than leak it.
        let _ = self.tx.send(Input::Shutdown);
    }
}

impl FeedClient {
    /// Starts the driver task. Must be called from inside a tokio runtime.
    ///
    /// No connection is opened until the first subscriber arrives (or
    /// `connect` is called); the refresh schedule starts immediately.
    pub fn spawn(config: FeedConfig) -> Self {
        let metrics = Arc::new(FeedMetrics::default());
        let url = config.url.clone();
        Self::spawn_machine(FeedMachine::new(config, metrics.clone()), url, metrics)
    }

    /// Starts the driver around a pre-built machine (e.g. with a custom clock).
    pub fn spawn_machine(machine: FeedMachine, url: String, metrics: Arc<FeedMetrics>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let state_rx = machine.watch_state();
        let snapshot_rx = machine.watch_snapshots();

        let driver = tokio::spawn(run_driver(machine, url, tx.clone(), rx));

        Self {
            inner: Arc::new(Inner {
                tx,
                state_rx,
                snapshot_rx,
                metrics,
                next_subscriber: AtomicU64::new(1),
                driver: Mutex::new(Some(driver)),
            }),
        }
    }

    /// Registers a pair of callbacks.
    ///
    /// The new subscriber is immediately handed the current connection
    /// state and, if one exists, the latest snapshot. The first subscriber
    /// triggers the initial connect.
    ///
    /// Dropping the returned [`Subscription`] unsubscribes.
    pub fn subscribe<S, C>(&self, on_snapshot: S, on_connection_change: C) -> Subscription
    where
        S: FnMut(&Arc<Snapshot>) + Send + 'static,
        C: FnMut(&ConnectionState) + Send + 'static,
    {
        let id = SubscriberId(self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed));
        self.send(Input::Subscribe(
            id,
            Subscriber::new(on_snapshot, on_connection_change),
        ));

        Subscription {
            id,
            tx: self.inner.tx.clone(),
            active: true,
        }
    }

    /// Opens the connection unless one is open or already being opened.
    pub fn connect(&self) {
        self.send(Input::Connect);
    }

    /// Tears down the current connection and reconnects with a fresh
    /// retry budget. Safe to call at any time, any number of times.
    pub fn force_reconnect(&self) {
        self.send(Input::ForceReconnect);
    }

    /// Tells the client the host is active again (e.g. after suspend).
    pub fn resume(&self) {
        self.send(Input::Resume);
    }

    pub fn latest_snapshot(&self) -> Option<Arc<Snapshot>> {
        self.inner.snapshot_rx.borrow().clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state_rx.borrow().clone()
    }

    pub fn watch_snapshots(&self) -> watch::Receiver<Option<Arc<Snapshot>>> {
        self.inner.snapshot_rx.clone()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_rx.clone()
    }

    pub fn metrics(&self) -> Arc<FeedMetrics> {
        self.inner.metrics.clone()
    }

    /// Closes the connection deliberately and waits for the driver to stop.
    pub async fn shutdown(&self) {
        self.send(Input::Shutdown);

        let driver = self.inner.driver.lock().await.take();
        if let Some(driver) = driver {
            if let Err(e) = driver.await {
                log::error!("feed driver ended abnormally: {e}");
            }
        }
    }

    fn send(&self, input: Input) {
        if self.inner.tx.send(input).is_err() {
            log::debug!("feed driver already stopped");
        }
    }
}

/// Registration handle returned by [`FeedClient::subscribe`].
///
/// Unsubscribes on drop. Use [`Subscription::detach`] to keep the
/// callbacks registered for the rest of the session.
pub struct Subscription {
    id: SubscriberId,
    tx: mpsc::UnboundedSender<Input>,
    active: bool,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn unsubscribe(mut self) {
        self.cancel();
    }

    /// Leaves the callbacks registered until the client shuts down.
    pub fn detach(mut self) {
        self.active = false;
    }

    fn cancel(&mut self) {
        if std::mem::take(&mut self.active) {
            let _ = self.tx.send(Input::Unsubscribe(self.id));
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

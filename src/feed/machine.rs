use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::{
    config::FeedConfig,
    error::FeedError,
    feed::state::{ConnectionState, Phase},
    feed::subscribers::{Subscriber, SubscriberId, SubscriberRegistry},
    metrics::FeedMetrics,
    schema::{FeedFrame, SequenceId, Snapshot},
    util,
};

/// Identity of one physical socket. Never reused within a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(pub u64);

impl std::fmt::Display for SocketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ws-{}", self.0)
    }
}

/// The independent timers the client can have armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Failure-driven reconnect
    Backoff,
    /// Pause between a forced close and the following connect
    Settle,
    /// Clock-aligned forced refresh
    Refresh,
    /// Reconnect check after the host came back to the foreground
    Resume,
}

/// Identifies one arming of a timer. A firing whose token is no longer
/// armed is stale and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerToken(pub u64);

/// Side effects requested by the machine. The driver executes them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Open a new socket to the configured endpoint
    Open(SocketId),
    /// Close this socket deliberately
    Close(SocketId),
    /// Deliver `Input::Timer(timer, token)` after `delay`, replacing any
    /// pending timer of the same kind
    Arm {
        timer: TimerKind,
        token: TimerToken,
        delay: Duration,
    },
    /// Drop the pending timer of this kind
    Disarm(TimerKind),
}

/// What a socket task reports back.
#[derive(Debug)]
pub enum TransportEvent {
    Opened,
    Frame(Vec<u8>),
    /// Always followed by `Closed` for the same socket.
    Error(String),
    Closed,
}

/// Everything that can happen to the client, serialized onto one queue.
#[derive(Debug)]
pub enum Input {
    Subscribe(SubscriberId, Subscriber),
    Unsubscribe(SubscriberId),
    Connect,
    ForceReconnect,
    Resume,
    Shutdown,
    Transport(SocketId, TransportEvent),
    Timer(TimerKind, TimerToken),
}

pub type Clock = Box<dyn Fn() -> DateTime<Utc> + Send>;

struct Socket {
    id: SocketId,
    open: bool,
    /// Set when we closed it ourselves. Its close event never schedules a retry.
    intentional: bool,
}

/// The feed client's state machine.
///
/// Every input is dispatched synchronously by [`FeedMachine::handle`], which
/// mutates state, notifies subscribers, and returns the effects the driver
/// must perform. Nothing in here does I/O or reads a timer, so the whole
/// reconnect policy can be exercised without a network.
///
/// INVARIANTS:
/// - At most one socket is `current`; every other socket ever opened has
///   been sent `Effect::Close` and sits in `retiring` until its close event.
/// - `connecting` is the only admission check for new sockets.
/// - A published snapshot is never touched again.
pub struct FeedMachine {
    cfg: FeedConfig,
    state: ConnectionState,

    connecting: bool,
    current: Option<Socket>,
    retiring: Vec<Socket>,

    armed: HashMap<TimerKind, TimerToken>,
    next_socket: u64,
    next_token: u64,
    next_sequence: u64,

    latest: Option<Arc<Snapshot>>,
    subscribers: SubscriberRegistry,
    state_tx: watch::Sender<ConnectionState>,
    snapshot_tx: watch::Sender<Option<Arc<Snapshot>>>,

    metrics: Arc<FeedMetrics>,
    clock: Clock,
    stopped: bool,
    effects: Vec<Effect>,
}

impl FeedMachine {
    pub fn new(cfg: FeedConfig, metrics: Arc<FeedMetrics>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::default());
        let (snapshot_tx, _) = watch::channel(None);

        Self {
            cfg,
            state: ConnectionState::default(),
            connecting: false,
            current: None,
            retiring: Vec::new(),
            armed: HashMap::new(),
            next_socket: 1,
            next_token: 1,
            next_sequence: 1,
            latest: None,
            subscribers: SubscriberRegistry::default(),
            state_tx,
            snapshot_tx,
            metrics,
            clock: Box::new(Utc::now),
            stopped: false,
            effects: Vec::new(),
        }
    }

    /// Replaces the wall clock used for `captured_at` and refresh alignment.
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn watch_snapshots(&self) -> watch::Receiver<Option<Arc<Snapshot>>> {
        self.snapshot_tx.subscribe()
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn latest(&self) -> Option<&Arc<Snapshot>> {
        self.latest.as_ref()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Arms the first scheduled refresh. Called once by the driver.
    pub fn start(&mut self) -> Vec<Effect> {
        self.arm_refresh();
        self.notify_connection();
        std::mem::take(&mut self.effects)
    }

    /// Dispatches one input.
    pub fn handle(&mut self, input: Input) -> Vec<Effect> {
        if self.stopped {
            if let Input::Transport(id, TransportEvent::Closed) = input {
                self.retiring.retain(|s| s.id != id);
            }
            return Vec::new();
        }

        match input {
            Input::Subscribe(id, sub) => self.subscribe(id, sub),
            Input::Unsubscribe(id) => self.unsubscribe(id),
            Input::Connect => self.connect(),
            Input::ForceReconnect => self.force_reconnect(),
            Input::Resume => self.resume(),
            Input::Shutdown => self.shutdown(),
            Input::Transport(id, event) => self.on_transport(id, event),
            Input::Timer(kind, token) => self.on_timer(kind, token),
        }

        std::mem::take(&mut self.effects)
    }

    // --------------------------------------------------------
    // Consumer operations
    // --------------------------------------------------------

    fn subscribe(&mut self, id: SubscriberId, sub: Subscriber) {
        let first = self.subscribers.is_empty();
        self.subscribers
            .add(id, sub, self.latest.as_ref(), &self.state);
        self.metrics
            .subscribers_active
            .store(self.subscribers.len(), std::sync::atomic::Ordering::Relaxed);

        if first && self.current.is_none() && !self.connecting {
            self.connect();
        }
    }

    fn unsubscribe(&mut self, id: SubscriberId) {
        if self.subscribers.remove(id) {
            self.metrics
                .subscribers_active
                .store(self.subscribers.len(), std::sync::atomic::Ordering::Relaxed);
        }
    }

    fn connect(&mut self) {
        if self.connecting || self.current.as_ref().is_some_and(|s| s.open) {
            log::debug!(
                "connect ignored, connection already {}",
                if self.connecting { "in progress" } else { "open" }
            );
            return;
        }

        if self.state.consecutive_failures >= self.cfg.max_attempts {
            let err = FeedError::AttemptsExhausted(self.cfg.max_attempts);
            log::warn!("{err}");
            self.state.last_error = Some(err.to_string());
            self.notify_connection();
            return;
        }

        // A socket that errored but has not reported its close yet.
        if let Some(stale) = self.current.take() {
            self.retire(stale);
        }

        let id = SocketId(self.next_socket);
        self.next_socket += 1;

        self.connecting = true;
        self.current = Some(Socket {
            id,
            open: false,
            intentional: false,
        });
        self.state.phase = Phase::Connecting;
        FeedMetrics::bump(&self.metrics.connect_attempts);

        log::info!(
            "Feed connection attempt {} ({id})",
            self.state.consecutive_failures + 1
        );
        self.effects.push(Effect::Open(id));
        self.notify_connection();
    }

    fn force_reconnect(&mut self) {
        log::info!("Force reconnecting feed");
        FeedMetrics::bump(&self.metrics.forced_reconnects);

        self.disarm(TimerKind::Backoff);
        if let Some(socket) = self.current.take() {
            self.retire(socket);
        }

        self.connecting = false;
        self.state.phase = Phase::Disconnected;
        self.state.consecutive_failures = 0;
        self.state.last_error = None;

        self.arm(TimerKind::Settle, self.cfg.settle_delay());
        self.notify_connection();
    }

    fn resume(&mut self) {
        if self.state.phase == Phase::Connected {
            log::debug!("resume: feed already connected");
            return;
        }
        log::info!("Host resumed while {}, checking connection", self.state.phase);
        self.arm(TimerKind::Resume, self.cfg.resume_delay());
    }

    fn shutdown(&mut self) {
        log::info!("Shutting down feed client");
        self.stopped = true;

        let kinds: Vec<TimerKind> = self.armed.keys().copied().collect();
        for kind in kinds {
            self.disarm(kind);
        }
        if let Some(socket) = self.current.take() {
            self.retire(socket);
        }

        self.connecting = false;
        self.state.phase = Phase::Disconnected;
        self.state.next_refresh_at = None;
        self.notify_connection();
    }

    // --------------------------------------------------------
    // Transport events
    // --------------------------------------------------------

    fn on_transport(&mut self, id: SocketId, event: TransportEvent) {
        let is_current = self.current.as_ref().is_some_and(|s| s.id == id);

        if !is_current {
            match event {
                TransportEvent::Closed => {
                    if let Some(pos) = self.retiring.iter().position(|s| s.id == id) {
                        let socket = self.retiring.swap_remove(pos);
                        self.on_close(socket);
                    }
                }
                other => log::debug!("dropping {other:?} from retired socket {id}"),
            }
            return;
        }

        match event {
            TransportEvent::Opened => self.on_open(),
            TransportEvent::Frame(raw) => self.on_frame(&raw),
            TransportEvent::Error(reason) => self.on_error(id, reason),
            TransportEvent::Closed => {
                if let Some(socket) = self.current.take() {
                    self.on_close(socket);
                }
            }
        }
    }

    fn on_open(&mut self) {
        let Some(socket) = self.current.as_mut() else {
            return;
        };
        socket.open = true;
        log::info!("Feed connected ({})", socket.id);

        self.connecting = false;
        self.state.phase = Phase::Connected;
        self.state.consecutive_failures = 0;
        self.state.last_error = None;
        FeedMetrics::bump(&self.metrics.connections_opened);
        self.notify_connection();
    }

    fn on_frame(&mut self, raw: &[u8]) {
        FeedMetrics::bump(&self.metrics.frames_received);
        if self.cfg.log_raw_frames {
            log::debug!("[FEED RECV] {}", String::from_utf8_lossy(raw));
        }

        let frame = match FeedFrame::decode(raw) {
            Ok(frame) => frame,
            Err(err) => {
                // A bad frame never tears the stream down.
                FeedMetrics::bump(&self.metrics.parse_errors);
                log::warn!("{err}");
                self.state.last_error = Some(err.to_string());
                self.notify_connection();
                return;
            }
        };

        let sequence_id = SequenceId(self.next_sequence);
        self.next_sequence += 1;

        let snapshot = Arc::new(frame.into_snapshot(sequence_id, (self.clock)()));
        log::debug!(
            "snapshot {sequence_id}: {} items, {} weather",
            snapshot.item_count(),
            snapshot.weather.len()
        );

        self.latest = Some(snapshot.clone());
        FeedMetrics::bump(&self.metrics.snapshots_published);
        self.snapshot_tx.send_replace(Some(snapshot.clone()));
        self.subscribers.publish_snapshot(&snapshot);
    }

    fn on_error(&mut self, id: SocketId, reason: String) {
        let err = FeedError::Transport(reason);
        log::warn!("{id}: {err}");

        if let Some(socket) = self.current.as_mut() {
            socket.open = false;
        }
        self.connecting = false;
        self.state.phase = Phase::Disconnected;
        self.state.last_error = Some(err.to_string());
        self.notify_connection();
    }

    fn on_close(&mut self, socket: Socket) {
        if socket.intentional {
            log::debug!("{} closed deliberately", socket.id);
            return;
        }

        self.connecting = false;
        self.state.phase = Phase::Disconnected;

        let failures = self.state.consecutive_failures;
        if failures < self.cfg.max_attempts {
            let delay = util::backoff_delay(failures, &self.cfg.reconnect);
            self.state.consecutive_failures = failures + 1;
            self.arm(TimerKind::Backoff, delay);
            FeedMetrics::bump(&self.metrics.reconnects_scheduled);

            log::info!(
                "{} disconnected, reconnecting in {}ms (attempt {}/{})",
                socket.id,
                delay.as_millis(),
                failures + 1,
                self.cfg.max_attempts
            );
        } else {
            let err = FeedError::AttemptsExhausted(self.cfg.max_attempts);
            log::warn!("{} disconnected: {err}", socket.id);
            self.state.last_error = Some(err.to_string());
        }

        self.notify_connection();
    }

    // --------------------------------------------------------
    // Timers
    // --------------------------------------------------------

    fn on_timer(&mut self, kind: TimerKind, token: TimerToken) {
        if self.armed.get(&kind) != Some(&token) {
            log::debug!("stale {kind:?} timer ignored");
            return;
        }
        self.armed.remove(&kind);

        match kind {
            TimerKind::Backoff | TimerKind::Settle | TimerKind::Resume => self.connect(),
            TimerKind::Refresh => {
                log::info!("Scheduled refresh: reconnecting to get fresh data");
                self.arm_refresh();
                self.force_reconnect();
            }
        }
    }

    fn arm_refresh(&mut self) {
        let now = (self.clock)();
        // Never re-arm for the boundary that just fired.
        let from = self.state.next_refresh_at.map_or(now, |prev| prev.max(now));

        let at = util::next_refresh_at(
            from,
            Duration::from_secs(self.cfg.refresh.cadence_secs),
            Duration::from_secs(self.cfg.refresh.grace_secs),
        );
        let delay = util::until(now, at);

        log::info!(
            "Next refresh scheduled for {} (in {}s)",
            at.format("%H:%M:%S"),
            delay.as_secs()
        );
        self.state.next_refresh_at = Some(at);
        self.arm(TimerKind::Refresh, delay);
    }

    fn arm(&mut self, timer: TimerKind, delay: Duration) {
        let token = TimerToken(self.next_token);
        self.next_token += 1;
        self.armed.insert(timer, token);
        self.effects.push(Effect::Arm {
            timer,
            token,
            delay,
        });
    }

    fn disarm(&mut self, timer: TimerKind) {
        if self.armed.remove(&timer).is_some() {
            self.effects.push(Effect::Disarm(timer));
        }
    }

    // --------------------------------------------------------
    // Helpers
    // --------------------------------------------------------

    fn retire(&mut self, mut socket: Socket) {
        socket.intentional = true;
        self.effects.push(Effect::Close(socket.id));
        self.retiring.push(socket);
    }

    fn notify_connection(&mut self) {
        self.state_tx.send_replace(self.state.clone());
        self.subscribers.publish_connection(&self.state);
    }
}

use std::collections::HashMap;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep, timeout};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        Message, Utf8Bytes,
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};

use crate::feed::machine::{Effect, FeedMachine, Input, SocketId, TimerKind, TransportEvent};

/// How long shutdown waits for a socket to finish its close handshake.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Runs the feed client until shutdown.
///
/// This loop:
/// - Drains the single input queue (commands, socket events, timers)
/// - Dispatches each input to the state machine
/// - Executes the effects the machine asks for
///
/// GUARANTEES:
/// - Inputs are handled strictly one at a time, in arrival order
/// - Socket and timer tasks never touch client state; they only
///   post inputs back onto the queue
///
pub(crate) async fn run_driver(
    mut machine: FeedMachine,
    url: String,
    tx: mpsc::UnboundedSender<Input>,
    mut rx: mpsc::UnboundedReceiver<Input>,
) {
    let mut driver = Driver {
        url,
        tx,
        sockets: HashMap::new(),
        timers: HashMap::new(),
    };

    driver.apply(machine.start());

    while let Some(input) = rx.recv().await {
        let effects = machine.handle(input);
        driver.apply(effects);

        if machine.is_stopped() {
            break;
        }
    }

    driver.drain().await;
    log::info!("Feed driver stopped");
}

struct SocketTask {
    close: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

struct Driver {
    url: String,
    tx: mpsc::UnboundedSender<Input>,
    sockets: HashMap<SocketId, SocketTask>,
    timers: HashMap<TimerKind, JoinHandle<()>>,
}

impl Driver {
    fn apply(&mut self, effects: Vec<Effect>) {
        self.sockets.retain(|_, s| !s.task.is_finished());

        for effect in effects {
            match effect {
                Effect::Open(id) => {
                    let (close_tx, close_rx) = oneshot::channel();
                    let task = tokio::spawn(run_socket(
                        id,
                        self.url.clone(),
                        self.tx.clone(),
                        close_rx,
                    ));
                    self.sockets.insert(
                        id,
                        SocketTask {
                            close: Some(close_tx),
                            task,
                        },
                    );
                }

                Effect::Close(id) => {
                    if let Some(close) = self.sockets.get_mut(&id).and_then(|s| s.close.take()) {
                        let _ = close.send(());
                    }
                }

                Effect::Arm {
                    timer,
                    token,
                    delay,
                } => {
                    let tx = self.tx.clone();
                    let handle = tokio::spawn(async move {
                        sleep(delay).await;
                        let _ = tx.send(Input::Timer(timer, token));
                    });
                    if let Some(previous) = self.timers.insert(timer, handle) {
                        previous.abort();
                    }
                }

                Effect::Disarm(timer) => {
                    if let Some(handle) = self.timers.remove(&timer) {
                        handle.abort();
                    }
                }
            }
        }
    }

    /// Cancels timers and gives every socket a bounded chance to close cleanly.
    async fn drain(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }

        for (id, mut socket) in self.sockets.drain() {
            if let Some(close) = socket.close.take() {
                let _ = close.send(());
            }
            if timeout(CLOSE_GRACE, &mut socket.task).await.is_err() {
                log::warn!("{id} did not close within {CLOSE_GRACE:?}, aborting");
                socket.task.abort();
            }
        }
    }
}

/// Owns one physical WebSocket from connect to close.
///
/// Reports, in order: `Opened` (on success), any number of `Frame`s, an
/// optional `Error`, and always exactly one `Closed` last. A signal on
/// `close_rx` (or its sender being dropped) closes the socket with a normal
/// close frame.
async fn run_socket(
    id: SocketId,
    url: String,
    tx: mpsc::UnboundedSender<Input>,
    mut close_rx: oneshot::Receiver<()>,
) {
    let emit = |event: TransportEvent| {
        let _ = tx.send(Input::Transport(id, event));
    };

    let connected = tokio::select! {
        res = connect_async(url.as_str()) => res,
        _ = &mut close_rx => {
            log::debug!("{id} cancelled before the handshake finished");
            emit(TransportEvent::Closed);
            return;
        }
    };

    let ws = match connected {
        Ok((ws, _)) => ws,
        Err(e) => {
            log::warn!("{id} connect to {url} failed: {e}");
            emit(TransportEvent::Error(e.to_string()));
            emit(TransportEvent::Closed);
            return;
        }
    };

    emit(TransportEvent::Opened);
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            _ = &mut close_rx => {
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: Utf8Bytes::from_static("client reconnect"),
                };
                if let Err(e) = write.send(Message::Close(Some(frame))).await {
                    log::debug!("{id} close frame not sent: {e}");
                }
                break;
            }

            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    emit(TransportEvent::Frame(text.as_bytes().to_vec()));
                }
                Some(Ok(Message::Binary(bin))) => {
                    emit(TransportEvent::Frame(bin.to_vec()));
                }
                Some(Ok(Message::Close(frame))) => {
                    match frame {
                        Some(f) => log::info!("{id} closed by server: {} {}", u16::from(f.code), f.reason),
                        None => log::info!("{id} closed by server"),
                    }
                    break;
                }

                // Ping / pong / raw frames
                Some(Ok(_)) => {}

                Some(Err(e)) => {
                    emit(TransportEvent::Error(e.to_string()));
                    break;
                }
                None => {
                    log::info!("{id} stream ended");
                    break;
                }
            }
        }
    }

    emit(TransportEvent::Closed);
}

//! Channel client — one logical full-duplex connection to the relay.
//!
//! Lifecycle: `connect` opens the websocket and immediately registers the
//! local identity; inbound frames are parsed once at this boundary and
//! pushed onto a single mpsc stream for the dispatcher. On abnormal
//! closure exactly one reconnect is scheduled after a fixed delay; the
//! `reconnecting` flag keeps a second failure inside the pending window
//! from spawning a duplicate task. Registration is re-sent on every
//! reopen.
//!
//! `send` never errors: it retries up to a bounded attempt budget with a
//! linearly growing pause and reports `false` once exhausted — callers
//! must treat `false` as "not confirmed sent".

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use veil_crypto::Identity;
use veil_proto::Frame;

use crate::config::ChannelConfig;
use crate::error::ClientError;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Anything the engine can push frames through. The channel handle is the
/// production impl; tests substitute a capturing sink.
pub trait FrameSink {
    /// Ordinary frame, ordinary attempt budget.
    fn send(&self, frame: Frame) -> impl Future<Output = bool> + Send;
    /// File chunk, larger attempt budget.
    fn send_chunk(&self, frame: Frame) -> impl Future<Output = bool> + Send;
}

struct Shared {
    config: ChannelConfig,
    peer_id: String,
    public_key: String,
    sink: Mutex<Option<WsSink>>,
    /// Bumped on every successful open. A read loop carries the value it
    /// was spawned under; a stale loop waking on a half-open socket after
    /// a reconnect must not touch the newer connection's sink.
    generation: AtomicU64,
    reconnecting: AtomicBool,
    shutdown: AtomicBool,
    inbound_tx: mpsc::Sender<Frame>,
}

/// Owns the connection lifecycle. Constructed once by the composing
/// application and torn down with `disconnect`.
pub struct ChannelClient {
    shared: Arc<Shared>,
}

/// Cheap-to-clone sending side, handed to the engine and coordinator.
#[derive(Clone)]
pub struct ChannelHandle {
    shared: Arc<Shared>,
}

impl ChannelClient {
    /// Open the transport and register `identity` with the relay.
    /// Returns the send handle and the single inbound frame stream.
    pub async fn connect(
        config: ChannelConfig,
        identity: &Identity,
    ) -> Result<(Self, mpsc::Receiver<Frame>), ClientError> {
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_buffer);
        let shared = Arc::new(Shared {
            peer_id: identity.peer_id.clone(),
            public_key: identity.public_key_b64()?,
            config,
            sink: Mutex::new(None),
            generation: AtomicU64::new(0),
            reconnecting: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            inbound_tx,
        });
        open(&shared).await?;
        Ok((Self { shared }, inbound_rx))
    }

    pub fn handle(&self) -> ChannelHandle {
        ChannelHandle {
            shared: self.shared.clone(),
        }
    }

    /// Orderly teardown; suppresses the reconnect machinery.
    pub async fn disconnect(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        if let Some(mut sink) = self.shared.sink.lock().await.take() {
            let _ = sink.send(Message::Close(None)).await;
        }
        info!("channel disconnected");
    }
}

/// Dial, register, store the write half, spawn the read loop.
async fn open(shared: &Arc<Shared>) -> Result<(), ClientError> {
    let (ws, _) = connect_async(&shared.config.url).await?;
    let (mut sink, stream) = ws.split();

    let register = Frame::Register {
        peer_id: shared.peer_id.clone(),
        public_key: shared.public_key.clone(),
    };
    sink.send(Message::Text(register.to_json()?)).await?;
    let generation = {
        let mut guard = shared.sink.lock().await;
        let generation = shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *guard = Some(sink);
        generation
    };
    info!(peer_id = %shared.peer_id, generation, "connected and registered");

    let reader = shared.clone();
    tokio::spawn(read_loop(reader, stream, generation));
    Ok(())
}

async fn read_loop(shared: Arc<Shared>, mut stream: WsStream, generation: u64) {
    while let Some(item) = stream.next().await {
        match item {
            Ok(Message::Text(text)) => match Frame::parse(&text) {
                Ok(frame) => {
                    // Dispatcher gone means the application is shutting down.
                    if shared.inbound_tx.send(frame).await.is_err() {
                        return;
                    }
                }
                Err(e) => warn!(error = %e, "unparseable inbound frame dropped"),
            },
            Ok(Message::Close(frame)) => {
                debug!(?frame, "relay closed the connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "websocket read failed");
                break;
            }
        }
    }
    if shared.shutdown.load(Ordering::SeqCst) {
        return;
    }
    {
        let mut guard = shared.sink.lock().await;
        // A newer connection owns the sink; this loop is history.
        if shared.generation.load(Ordering::SeqCst) != generation {
            debug!(generation, "stale read loop exiting");
            return;
        }
        guard.take();
    }
    schedule_reconnect(&shared);
}

/// Exactly one pending reconnect at a time. The flag is held for the whole
/// delay-plus-attempt window and released before any follow-up schedule,
/// so repeated failures chain single reconnects instead of stacking them.
fn schedule_reconnect(shared: &Arc<Shared>) {
    if shared.shutdown.load(Ordering::SeqCst) {
        return;
    }
    if shared.reconnecting.swap(true, Ordering::SeqCst) {
        return;
    }
    let shared = shared.clone();
    tokio::spawn(async move {
        tokio::time::sleep(shared.config.reconnect_delay).await;
        let result = open(&shared).await;
        shared.reconnecting.store(false, Ordering::SeqCst);
        if let Err(e) = result {
            warn!(error = %e, "reconnect attempt failed");
            schedule_reconnect(&shared);
        }
    });
}

impl ChannelHandle {
    async fn send_with_attempts(&self, frame: Frame, attempts: u32) -> bool {
        let json = match frame.to_json() {
            Ok(j) => j,
            Err(e) => {
                warn!(error = %e, "outbound frame failed to serialize");
                return false;
            }
        };
        for attempt in 0..attempts {
            let mut socket_died = false;
            {
                let mut guard = self.shared.sink.lock().await;
                match guard.as_mut() {
                    Some(sink) => match sink.send(Message::Text(json.clone())).await {
                        Ok(()) => return true,
                        Err(e) => {
                            warn!(attempt, error = %e, "send failed, socket presumed dead");
                            socket_died = true;
                        }
                    },
                    None => debug!(attempt, "no socket, waiting before retry"),
                }
                if socket_died {
                    guard.take();
                }
            }
            if socket_died {
                schedule_reconnect(&self.shared);
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(self.shared.config.retry_pause * (attempt + 1)).await;
            }
        }
        warn!(attempts, "send attempts exhausted");
        false
    }
}

impl FrameSink for ChannelHandle {
    async fn send(&self, frame: Frame) -> bool {
        self.send_with_attempts(frame, self.shared.config.send_attempts)
            .await
    }

    async fn send_chunk(&self, frame: Frame) -> bool {
        self.send_with_attempts(frame, self.shared.config.chunk_send_attempts)
            .await
    }
}

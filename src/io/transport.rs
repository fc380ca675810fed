//! Single-client TCP transport to the browser frontend
//!
//! Newline-delimited text protocol on a local TCP port. Exactly one peer is
//! served at a time: a connection only becomes the peer after sending the
//! `hello` handshake line, and a newcomer only displaces the current peer
//! when the current peer fails a liveness probe. All socket work runs on a
//! transport-owned actor loop.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::domain::{BrowserMessage, Command, ControlError, Result};
use crate::infra::ActorLoop;

/// How long a peer write may take before the peer counts as dead.
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A peer completed the handshake and is now the current peer.
    PeerConnected,
    /// The current peer went away.
    PeerDisconnected,
    /// A protocol message from the current peer.
    Message(BrowserMessage),
}

type EmitFn = Arc<dyn Fn(TransportEvent) + Send + Sync>;

type SharedWriter = Arc<tokio::sync::Mutex<OwnedWriteHalf>>;

#[derive(Clone)]
struct Peer {
    id: u64,
    writer: SharedWriter,
}

struct Inner {
    current: parking_lot::Mutex<Option<Peer>>,
    next_id: AtomicU64,
    emit: EmitFn,
    shutdown: watch::Sender<bool>,
}

impl Inner {
    fn peer(&self) -> Option<Peer> {
        self.current.lock().clone()
    }

    fn is_current(&self, id: u64) -> bool {
        self.current.lock().as_ref().map(|p| p.id) == Some(id)
    }

    /// Clear the peer slot if `id` still owns it. Returns true when it did.
    fn drop_peer(&self, id: u64) -> bool {
        let mut current = self.current.lock();
        if current.as_ref().map(|p| p.id) == Some(id) {
            *current = None;
            true
        } else {
            false
        }
    }
}

pub struct Transport {
    actor: ActorLoop,
    inner: Arc<Inner>,
    local_addr: SocketAddr,
}

impl Transport {
    /// Bind the listening socket and start serving on a dedicated loop.
    pub fn start<E>(host: &str, port: u16, emit: E) -> Result<Self>
    where
        E: Fn(TransportEvent) + Send + Sync + 'static,
    {
        let listener = std::net::TcpListener::bind((host, port))
            .map_err(|e| ControlError::Transport(format!("bind {host}:{port}: {e}")))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| ControlError::Transport(format!("set_nonblocking: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ControlError::Transport(format!("local_addr: {e}")))?;

        let (shutdown, _) = watch::channel(false);
        let inner = Arc::new(Inner {
            current: parking_lot::Mutex::new(None),
            next_id: AtomicU64::new(1),
            emit: Arc::new(emit),
            shutdown,
        });

        let actor = ActorLoop::spawn("transport");
        let accept_inner = inner.clone();
        actor.submit(async move {
            let listener = match TcpListener::from_std(listener) {
                Ok(listener) => listener,
                Err(e) => {
                    error!(event = "transport_listener_failed", error = %e);
                    return;
                }
            };
            info!(event = "transport_listening", addr = %local_addr);
            let mut shut = accept_inner.shutdown.subscribe();
            loop {
                tokio::select! {
                    _ = shut.changed() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, remote)) => {
                            let inner = accept_inner.clone();
                            tokio::task::spawn_local(handle_conn(inner, stream, remote));
                        }
                        Err(e) => {
                            warn!(event = "transport_accept_failed", error = %e);
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                    }
                }
            }
        });

        Ok(Self { actor, inner, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn has_peer(&self) -> bool {
        self.inner.peer().is_some()
    }

    /// Queue a command for the current peer. Resolves to false when no peer
    /// is connected or the write failed.
    pub fn send(&self, cmd: Command) -> impl Future<Output = bool> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        let inner = self.inner.clone();
        self.actor.submit(async move {
            let delivered = match inner.peer() {
                Some(peer) => {
                    let line = cmd.to_string();
                    debug!(event = "peer_send", command = %line);
                    let ok = write_line(&peer.writer, &line).await;
                    if !ok && inner.drop_peer(peer.id) {
                        warn!(event = "peer_write_failed", command = %line);
                        (inner.emit)(TransportEvent::PeerDisconnected);
                    }
                    ok
                }
                None => false,
            };
            let _ = tx.send(delivered);
        });
        async move { rx.await.unwrap_or(false) }
    }

    /// Stop accepting and wind down all connection tasks, then join the
    /// transport loop.
    pub fn stop(&self) {
        let _ = self.inner.shutdown.send(true);
        self.actor.stop();
    }
}

async fn write_line(writer: &SharedWriter, line: &str) -> bool {
    let attempt = async {
        let mut writer = writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await
    };
    matches!(tokio::time::timeout(WRITE_TIMEOUT, attempt).await, Ok(Ok(())))
}

async fn handle_conn(inner: Arc<Inner>, stream: TcpStream, remote: SocketAddr) {
    let mut shut = inner.shutdown.subscribe();
    let (read_half, write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    // a connection is nobody until it says hello
    let first = tokio::select! {
        _ = shut.changed() => return,
        line = lines.next_line() => line,
    };
    match first {
        Ok(Some(line)) if line.trim() == "hello" => {}
        _ => {
            debug!(event = "peer_handshake_rejected", %remote);
            return;
        }
    }

    // probe the incumbent; only a dead peer gets displaced
    if let Some(prior) = inner.peer() {
        if write_line(&prior.writer, &Command::Status.to_string()).await {
            info!(event = "peer_rejected_busy", %remote);
            return;
        }
        if inner.drop_peer(prior.id) {
            (inner.emit)(TransportEvent::PeerDisconnected);
        }
    }

    let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
    let writer = Arc::new(tokio::sync::Mutex::new(write_half));
    *inner.current.lock() = Some(Peer { id, writer });
    info!(event = "peer_connected", %remote);
    (inner.emit)(TransportEvent::PeerConnected);

    loop {
        let line = tokio::select! {
            _ = shut.changed() => return,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                if !inner.is_current(id) {
                    debug!(event = "peer_superseded", %remote);
                    return;
                }
                match BrowserMessage::parse(&line) {
                    Ok(msg) => (inner.emit)(TransportEvent::Message(msg)),
                    Err(e) => warn!(event = "peer_bad_message", %remote, error = %e),
                }
            }
            Ok(None) | Err(_) => break,
        }
    }

    if inner.drop_peer(id) {
        info!(event = "peer_disconnected", %remote);
        (inner.emit)(TransportEvent::PeerDisconnected);
    }
}

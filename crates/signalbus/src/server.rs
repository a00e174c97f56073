//! The bus server: listener, per-peer read tasks, and the liveness sweep.
//!
//! One coarse mutex over the signal table serializes every signal write and
//! the broadcast that follows it, whether the write came from the local API
//! or from an inbound frame on some peer's read task. The peer set is an
//! independent concurrent map; insert/remove happen from the accept task,
//! read tasks, and the sweep without touching the signal lock.

use crate::hooks::{run_hook, PeerHook, ServerCommandHook, ServerSignalHook, ServerTextHook};
use crate::peer::{Peer, PeerId, PeerSet};
use crate::reader::{LineEvent, LineReader};
use crate::slot::SignalTable;
use signalbus_types::{BusConfig, BusError, BusResult, Value};
use signalbus_wire::{convert, decode, encode_command, encode_signal, encode_text, Frame};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How long `stop()` waits for background tasks before giving up on them.
const STOP_GRACE: Duration = Duration::from_millis(500);

/// The server side of the bus. Cheap to clone; all clones share one bus.
#[derive(Clone)]
pub struct BusServer {
    inner: Arc<ServerInner>,
}

pub(crate) struct ServerInner {
    config: BusConfig,
    /// The canonical signal table, under the one coarse bus lock.
    signals: Mutex<SignalTable>,
    signal_hooks: HashMap<String, ServerSignalHook>,
    commands: HashMap<String, ServerCommandHook>,
    on_message: Option<ServerTextHook>,
    on_connect: Option<PeerHook>,
    on_disconnect: Option<PeerHook>,
    peers: PeerSet,
    next_peer_id: AtomicU64,
    running: AtomicBool,
    local_addr: std::sync::Mutex<Option<SocketAddr>>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl BusServer {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        config: BusConfig,
        signals: SignalTable,
        signal_hooks: HashMap<String, ServerSignalHook>,
        commands: HashMap<String, ServerCommandHook>,
        on_message: Option<ServerTextHook>,
        on_connect: Option<PeerHook>,
        on_disconnect: Option<PeerHook>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(ServerInner {
                config,
                signals: Mutex::new(signals),
                signal_hooks,
                commands,
                on_message,
                on_connect,
                on_disconnect,
                peers: PeerSet::new(),
                next_peer_id: AtomicU64::new(1),
                running: AtomicBool::new(false),
                local_addr: std::sync::Mutex::new(None),
                tasks: std::sync::Mutex::new(Vec::new()),
                shutdown,
            }),
        }
    }

    /// Bind the listener and launch the accept loop and the liveness sweep.
    /// Idempotent after the first successful start.
    pub async fn start(&self) -> BusResult<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.shutdown.send_replace(false);

        let listener = match TcpListener::bind(self.inner.config.addr()).await {
            Ok(l) => l,
            Err(e) => {
                self.inner.running.store(false, Ordering::SeqCst);
                return Err(BusError::Io(e));
            }
        };
        let local_addr = listener.local_addr()?;
        *lock_std(&self.inner.local_addr) = Some(local_addr);
        info!(addr = %local_addr, "Bus server listening");

        let accept_inner = Arc::clone(&self.inner);
        let accept_shutdown = self.inner.shutdown.subscribe();
        let accept = tokio::spawn(async move {
            accept_loop(accept_inner, listener, accept_shutdown).await;
        });

        let sweep_inner = Arc::clone(&self.inner);
        let sweep_shutdown = self.inner.shutdown.subscribe();
        let sweep = tokio::spawn(async move {
            sweep_loop(sweep_inner, sweep_shutdown).await;
        });

        let mut tasks = lock_std(&self.inner.tasks);
        tasks.push(accept);
        tasks.push(sweep);
        Ok(())
    }

    /// Stop accepting, close every peer (firing its disconnect hook), release
    /// the listener. Safe when never started; waits a bounded grace period
    /// for background tasks rather than hanging on a stuck client.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.shutdown.send_replace(true);

        for peer in self.inner.peers.snapshot() {
            close_peer_inner(&self.inner, peer.id).await;
        }

        let handles: Vec<JoinHandle<()>> = lock_std(&self.inner.tasks).drain(..).collect();
        for handle in handles {
            let _ = tokio::time::timeout(STOP_GRACE, handle).await;
        }
        *lock_std(&self.inner.local_addr) = None;
        info!("Bus server stopped");
    }

    /// The bound address, once started. Useful when binding port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock_std(&self.inner.local_addr)
    }

    /// Number of currently connected peers.
    pub fn peer_count(&self) -> usize {
        self.inner.peers.len()
    }

    /// Send a plain text message to every peer, best-effort. A failing peer
    /// is closed; the rest still receive the message.
    pub async fn broadcast(&self, text: &str) {
        let line = encode_text(text);
        let failed = deliver(&self.inner.peers.snapshot(), &line).await;
        close_failed(&self.inner, failed).await;
    }

    /// [`broadcast`](Self::broadcast) to everyone except one peer.
    pub async fn broadcast_except(&self, skip: PeerId, text: &str) {
        let line = encode_text(text);
        let failed = deliver(&self.inner.peers.snapshot_except(skip), &line).await;
        close_failed(&self.inner, failed).await;
    }

    /// Write a signal. No-op when the value equals the cache; otherwise the
    /// frame is broadcast to every peer, the cache commits, and the change
    /// hook fires with no origin peer.
    pub async fn set_signal(&self, name: &str, value: impl Into<Value>) -> BusResult<()> {
        let value = value.into();
        let changed = {
            let mut table = self.inner.signals.lock().await;
            let slot = table
                .get_mut(name)
                .ok_or_else(|| BusError::UnknownSignal(name.to_string()))?;
            slot.accepts(&value)?;
            if !slot.differs(&value) {
                return Ok(());
            }
            let line = encode_signal(name, &value);
            let failed = deliver(&self.inner.peers.snapshot(), &line).await;
            let old = slot.store(value.clone());
            (old, value, failed)
        };

        let (old, new, failed) = changed;
        close_failed(&self.inner, failed).await;
        if let Some(hook) = self.inner.signal_hooks.get(name) {
            run_hook("signal_changed", || hook(None, &old, &new));
        }
        Ok(())
    }

    /// Read a signal's cached value.
    pub async fn get_signal(&self, name: &str) -> Option<Value> {
        let table = self.inner.signals.lock().await;
        table.get(name).map(|slot| slot.get())
    }

    /// Fire a command: broadcast to every peer, then invoke the server-side
    /// callback with no origin peer. Commands are never deduplicated.
    pub async fn fire_command(&self, name: &str) -> BusResult<()> {
        let hook = self
            .inner
            .commands
            .get(name)
            .ok_or_else(|| BusError::UnknownCommand(name.to_string()))?;
        let line = encode_command(name);
        let failed = deliver(&self.inner.peers.snapshot(), &line).await;
        close_failed(&self.inner, failed).await;
        run_hook("command", || hook(None));
        Ok(())
    }

    /// Close one peer: disconnect hook, cancel its read task, close the
    /// socket. Closing twice is a no-op.
    pub async fn close_peer(&self, id: PeerId) {
        close_peer_inner(&self.inner, id).await;
    }
}

/// Poisoning only happens when a hook panicked while holding the lock; the
/// data is still sound for our purposes.
fn lock_std<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Write one line to each peer; returns the peers whose write failed.
async fn deliver(peers: &[Arc<Peer>], line: &str) -> Vec<PeerId> {
    let mut failed = Vec::new();
    for peer in peers {
        if let Err(e) = peer.send_line(line).await {
            debug!(peer = %peer.id, error = %e, "Write failed");
            failed.push(peer.id);
        }
    }
    failed
}

async fn close_failed(inner: &ServerInner, failed: Vec<PeerId>) {
    for id in failed {
        close_peer_inner(inner, id).await;
    }
}

async fn close_peer_inner(inner: &ServerInner, id: PeerId) {
    let Some(peer) = inner.peers.remove(id) else {
        return;
    };
    if !peer.begin_close() {
        return;
    }
    if let Some(hook) = &inner.on_disconnect {
        run_hook("disconnect", || hook(id));
    }
    peer.teardown().await;
    info!(
        peer = %id,
        addr = %peer.addr,
        connected_at = %peer.connected_at,
        "Peer closed"
    );
}

async fn accept_loop(
    inner: Arc<ServerInner>,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            res = listener.accept() => match res {
                Ok((stream, addr)) => handle_accept(&inner, stream, addr).await,
                Err(e) => {
                    error!(error = %e, "Accept error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
    debug!("Accept loop exited");
}

async fn handle_accept(inner: &Arc<ServerInner>, stream: TcpStream, addr: SocketAddr) {
    if inner.peers.len() >= inner.config.max_peers {
        warn!(%addr, max = inner.config.max_peers, "Peer limit reached, refusing connection");
        drop(stream);
        return;
    }

    let id = PeerId(inner.next_peer_id.fetch_add(1, Ordering::Relaxed));
    let (reader, writer) = stream.into_split();
    let (peer, peer_shutdown) = Peer::new(id, addr, writer);

    // Replicate the whole table before any other traffic so the new peer
    // starts consistent with the server. Insert and replication share one
    // critical section on the bus lock: a concurrent write snapshots the
    // peer set under the same lock, so it either misses the peer entirely
    // or its change frame queues behind the full replication.
    let mut replicated = true;
    {
        let table = inner.signals.lock().await;
        inner.peers.insert(Arc::clone(&peer));
        for frame in table.replication_frames() {
            if let Err(e) = peer.send_line(&frame).await {
                warn!(peer = %id, error = %e, "State replication failed");
                replicated = false;
                break;
            }
        }
    }
    if !replicated {
        close_peer_inner(inner, id).await;
        return;
    }

    info!(peer = %id, %addr, "Peer connected");
    if let Some(hook) = &inner.on_connect {
        run_hook("connect", || hook(id));
    }

    let loop_inner = Arc::clone(inner);
    let global_shutdown = inner.shutdown.subscribe();
    tokio::spawn(async move {
        read_loop(loop_inner, peer, reader, peer_shutdown, global_shutdown).await;
    });
}

async fn read_loop(
    inner: Arc<ServerInner>,
    peer: Arc<Peer>,
    reader: OwnedReadHalf,
    mut peer_shutdown: watch::Receiver<bool>,
    mut global_shutdown: watch::Receiver<bool>,
) {
    // `subscribe` marks the current value as seen, so a stop that raced the
    // accept must be caught by looking at the flag itself.
    if *global_shutdown.borrow() || *peer_shutdown.borrow() {
        close_peer_inner(&inner, peer.id).await;
        return;
    }
    let mut lines = LineReader::new(reader, inner.config.max_frame_bytes);
    loop {
        tokio::select! {
            res = peer_shutdown.changed() => {
                if res.is_err() || *peer_shutdown.borrow() {
                    break;
                }
            }
            res = global_shutdown.changed() => {
                if res.is_err() || *global_shutdown.borrow() {
                    break;
                }
            }
            event = lines.next() => match event {
                Ok(LineEvent::Line(line)) => {
                    peer.touch();
                    dispatch(&inner, &peer, line).await;
                }
                Ok(LineEvent::Oversized { seen }) => {
                    peer.touch();
                    let err = BusError::FrameTooLarge {
                        len: seen,
                        max: inner.config.max_frame_bytes,
                    };
                    warn!(peer = %peer.id, error = %err, "Dropping oversized frame");
                }
                Ok(LineEvent::Eof) => {
                    debug!(peer = %peer.id, "Connection closed by peer");
                    break;
                }
                Err(e) => {
                    debug!(peer = %peer.id, error = %e, "Read error");
                    break;
                }
            }
        }
    }
    close_peer_inner(&inner, peer.id).await;
}

/// Handle one inbound line from a peer. Decode errors condemn the single
/// frame only; the connection survives.
async fn dispatch(inner: &Arc<ServerInner>, peer: &Arc<Peer>, line: String) {
    match decode(&line) {
        Frame::Signal { name, value: raw } => {
            let changed = {
                let mut table = inner.signals.lock().await;
                let Some(slot) = table.get_mut(&name) else {
                    warn!(peer = %peer.id, signal = %name, "Dropping frame for unknown signal");
                    return;
                };
                let value = match convert(&raw, slot.kind()) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(peer = %peer.id, signal = %name, error = %e, "Dropping unparseable frame");
                        return;
                    }
                };
                if !slot.differs(&value) {
                    return;
                }
                // Forward the original raw line, not a re-encoding, to every
                // peer but the sender.
                let failed = deliver(&inner.peers.snapshot_except(peer.id), &line).await;
                let old = slot.store(value.clone());
                (old, value, failed)
            };

            let (old, new, failed) = changed;
            close_failed(inner, failed).await;
            if let Some(hook) = inner.signal_hooks.get(&name) {
                run_hook("signal_changed", || hook(Some(peer.id), &old, &new));
            }
        }
        Frame::Command(name) => {
            let failed = deliver(&inner.peers.snapshot_except(peer.id), &line).await;
            close_failed(inner, failed).await;
            match inner.commands.get(&name) {
                Some(hook) => run_hook("command", || hook(Some(peer.id))),
                None => debug!(peer = %peer.id, command = %name, "No server callback for command"),
            }
        }
        Frame::Text(text) => {
            if let Some(hook) = &inner.on_message {
                run_hook("message", || hook(peer.id, &text));
            }
        }
    }
}

/// Periodic liveness sweep: any inbound frame counts as liveness, and a peer
/// silent longer than the heartbeat timeout is evicted. There is no ping
/// frame on this wire.
async fn sweep_loop(inner: Arc<ServerInner>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(inner.config.sweep_interval());
    // The first tick fires immediately; every peer is fresh then.
    loop {
        tokio::select! {
            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let timeout = inner.config.heartbeat_timeout();
                for peer in inner.peers.snapshot() {
                    let idle = peer.idle();
                    if idle > timeout {
                        warn!(
                            peer = %peer.id,
                            idle_secs = idle.as_secs(),
                            timeout_secs = timeout.as_secs(),
                            "Evicting silent peer"
                        );
                        close_peer_inner(&inner, peer.id).await;
                    }
                }
            }
        }
    }
    debug!("Sweep loop exited");
}

//! Server-side peer handles and the concurrent peer set.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{watch, Mutex};

/// Connection identity of one accepted peer. Monotonic per server; never
/// reused, so a reconnecting client is a new peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub(crate) u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// One accepted connection. The peer owns the write half; the read half
/// lives in the peer's read task.
pub(crate) struct Peer {
    /// Connection identity.
    pub id: PeerId,
    /// Remote address.
    pub addr: SocketAddr,
    /// When the connection was accepted; logged when the peer closes.
    pub connected_at: DateTime<Utc>,
    /// Write half, serialized across broadcast/replication writers.
    writer: Mutex<OwnedWriteHalf>,
    /// Cancellation signal for the read task.
    pub shutdown: watch::Sender<bool>,
    /// Refreshed by every inbound frame; read by the liveness sweep.
    last_seen: std::sync::Mutex<Instant>,
    /// Guards the one-shot parts of close.
    closed: AtomicBool,
}

impl Peer {
    /// Wrap an accepted connection's write half. Returns the peer and the
    /// read task's shutdown receiver.
    pub fn new(id: PeerId, addr: SocketAddr, writer: OwnedWriteHalf) -> (Arc<Self>, watch::Receiver<bool>) {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let peer = Arc::new(Self {
            id,
            addr,
            connected_at: Utc::now(),
            writer: Mutex::new(writer),
            shutdown,
            last_seen: std::sync::Mutex::new(Instant::now()),
            closed: AtomicBool::new(false),
        });
        (peer, shutdown_rx)
    }

    /// Record inbound activity.
    pub fn touch(&self) {
        let mut last = self.last_seen.lock().unwrap_or_else(|e| e.into_inner());
        *last = Instant::now();
    }

    /// Time since the last inbound frame.
    pub fn idle(&self) -> Duration {
        let last = self.last_seen.lock().unwrap_or_else(|e| e.into_inner());
        last.elapsed()
    }

    /// Write one frame plus the line terminator.
    pub async fn send_line(&self, line: &str) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await
    }

    /// First caller wins; later calls see `false` and skip the teardown.
    pub fn begin_close(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    /// Signal the read task and shut the socket down to unblock any
    /// in-flight read on the remote side.
    pub async fn teardown(&self) {
        self.shutdown.send_replace(true);
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

/// Concurrency-safe set of live peers, keyed by connection identity.
/// Insert/remove are safe from the accept task, any read task, and the
/// sweep simultaneously.
#[derive(Default)]
pub(crate) struct PeerSet {
    peers: DashMap<PeerId, Arc<Peer>>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, peer: Arc<Peer>) {
        self.peers.insert(peer.id, peer);
    }

    /// Remove a peer; `None` means someone else already removed it.
    pub fn remove(&self, id: PeerId) -> Option<Arc<Peer>> {
        self.peers.remove(&id).map(|(_, peer)| peer)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Snapshot of every live peer. Broadcasts iterate the snapshot so a
    /// concurrent insert/remove never invalidates the walk.
    pub fn snapshot(&self) -> Vec<Arc<Peer>> {
        self.peers.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    /// Snapshot of every peer but one (the no-echo rule).
    pub fn snapshot_except(&self, skip: PeerId) -> Vec<Arc<Peer>> {
        self.peers
            .iter()
            .filter(|entry| *entry.key() != skip)
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}

//! The client side of the bus: one outbound connection plus private copies
//! of every declared signal and command.
//!
//! Local writes are optimistic: the cache updates and the frame goes out
//! without waiting for the server to echo anything back (it never does).

use crate::hooks::{run_hook, SessionCommandHook, SessionSignalHook, SessionTextHook};
use crate::reader::{LineEvent, LineReader};
use crate::slot::SignalTable;
use signalbus_types::{BusConfig, BusError, BusResult, Value};
use signalbus_wire::{convert, decode, encode_command, encode_signal, encode_text, Frame};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long `disconnect()` waits for the receive task.
const DISCONNECT_GRACE: Duration = Duration::from_millis(500);

/// A client session. Cheap to clone; all clones share one connection and one
/// private signal table.
#[derive(Clone)]
pub struct BusSession {
    inner: Arc<SessionInner>,
}

pub(crate) struct SessionInner {
    config: BusConfig,
    /// This session's private signal copies, under the coarse bus lock.
    signals: Mutex<SignalTable>,
    signal_hooks: HashMap<String, SessionSignalHook>,
    commands: HashMap<String, SessionCommandHook>,
    on_message: Option<SessionTextHook>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    connected: AtomicBool,
    shutdown: watch::Sender<bool>,
    recv_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl BusSession {
    pub(crate) fn from_parts(
        config: BusConfig,
        signals: SignalTable,
        signal_hooks: HashMap<String, SessionSignalHook>,
        commands: HashMap<String, SessionCommandHook>,
        on_message: Option<SessionTextHook>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(SessionInner {
                config,
                signals: Mutex::new(signals),
                signal_hooks,
                commands,
                on_message,
                writer: Mutex::new(None),
                connected: AtomicBool::new(false),
                shutdown,
                recv_task: std::sync::Mutex::new(None),
            }),
        }
    }

    /// Open the connection and launch the receive loop. Failure leaves the
    /// session not connected.
    pub async fn connect(&self) -> BusResult<()> {
        if self.inner.connected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.shutdown.send_replace(false);

        let stream = match TcpStream::connect(self.inner.config.addr()).await {
            Ok(s) => s,
            Err(e) => {
                self.inner.connected.store(false, Ordering::SeqCst);
                return Err(BusError::Io(e));
            }
        };
        info!(addr = %self.inner.config.addr(), "Session connected");

        let (reader, writer) = stream.into_split();
        *self.inner.writer.lock().await = Some(writer);

        let recv_inner = Arc::clone(&self.inner);
        let shutdown_rx = self.inner.shutdown.subscribe();
        let task = tokio::spawn(async move {
            recv_loop(recv_inner, reader, shutdown_rx).await;
        });
        *self
            .inner
            .recv_task
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(task);
        Ok(())
    }

    /// Stop the receive loop and close the connection. Idempotent.
    pub async fn disconnect(&self) {
        if !self.inner.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.shutdown.send_replace(true);

        if let Some(mut writer) = self.inner.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        let task = self
            .inner
            .recv_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            let _ = tokio::time::timeout(DISCONNECT_GRACE, task).await;
        }
        info!("Session disconnected");
    }

    /// Whether the session currently holds a live connection.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Send a plain text message to the server.
    pub async fn send(&self, text: &str) -> BusResult<()> {
        send_line(&self.inner, &encode_text(text)).await
    }

    /// Write a signal. No-op when the value equals the cache; otherwise the
    /// frame is sent, the cache commits, and the client-side change hook
    /// fires with `(old, new)`. A failed send propagates and leaves the
    /// cache unmodified.
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
            send_line(&self.inner, &encode_signal(name, &value)).await?;
            let old = slot.store(value.clone());
            (old, value)
        };

        let (old, new) = changed;
        if let Some(hook) = self.inner.signal_hooks.get(name) {
            run_hook("signal_changed", || hook(&old, &new));
        }
        Ok(())
    }

    /// Read a signal's cached value. Never touches the network.
    pub async fn get_signal(&self, name: &str) -> Option<Value> {
        let table = self.inner.signals.lock().await;
        table.get(name).map(|slot| slot.get())
    }

    /// Fire a command: send it, then invoke the local callback immediately.
    /// Fire-and-forget; no acknowledgement is awaited.
    pub async fn fire_command(&self, name: &str) -> BusResult<()> {
        let hook = self
            .inner
            .commands
            .get(name)
            .ok_or_else(|| BusError::UnknownCommand(name.to_string()))?;
        send_line(&self.inner, &encode_command(name)).await?;
        run_hook("command", || hook());
        Ok(())
    }
}

async fn send_line(inner: &SessionInner, line: &str) -> BusResult<()> {
    let mut guard = inner.writer.lock().await;
    let writer = guard.as_mut().ok_or(BusError::NotConnected)?;
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

async fn recv_loop(
    inner: Arc<SessionInner>,
    reader: OwnedReadHalf,
    mut shutdown: watch::Receiver<bool>,
) {
    // `subscribe` marks the current value as seen; catch a disconnect that
    // raced the connect by looking at the flag itself.
    if *shutdown.borrow() {
        inner.connected.store(false, Ordering::SeqCst);
        inner.writer.lock().await.take();
        return;
    }
    let mut lines = LineReader::new(reader, inner.config.max_frame_bytes);
    loop {
        tokio::select! {
            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            event = lines.next() => match event {
                Ok(LineEvent::Line(line)) => dispatch(&inner, line).await,
                Ok(LineEvent::Oversized { seen }) => {
                    let err = BusError::FrameTooLarge {
                        len: seen,
                        max: inner.config.max_frame_bytes,
                    };
                    warn!(error = %err, "Dropping oversized frame");
                }
                Ok(LineEvent::Eof) => {
                    info!("Server closed the connection");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Read error, dropping connection");
                    break;
                }
            }
        }
    }
    inner.connected.store(false, Ordering::SeqCst);
    inner.writer.lock().await.take();
}

/// Client frame handling mirrors the server's, minus the rebroadcast step.
async fn dispatch(inner: &Arc<SessionInner>, line: String) {
    match decode(&line) {
        Frame::Signal { name, value: raw } => {
            let changed = {
                let mut table = inner.signals.lock().await;
                let Some(slot) = table.get_mut(&name) else {
                    warn!(signal = %name, "Dropping frame for unknown signal");
                    return;
                };
                let value = match convert(&raw, slot.kind()) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(signal = %name, error = %e, "Dropping unparseable frame");
                        return;
                    }
                };
                if !slot.differs(&value) {
                    return;
                }
                let old = slot.store(value.clone());
                (old, value)
            };

            let (old, new) = changed;
            if let Some(hook) = inner.signal_hooks.get(&name) {
                run_hook("signal_changed", || hook(&old, &new));
            }
        }
        Frame::Command(name) => match inner.commands.get(&name) {
            Some(hook) => run_hook("command", || hook()),
            None => debug!(command = %name, "No local callback for command"),
        },
        Frame::Text(text) => {
            if let Some(hook) = &inner.on_message {
                run_hook("message", || hook(&text));
            }
        }
    }
}

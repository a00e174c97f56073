//! Fluent builders assembling a [`BusServer`] or [`BusSession`] from
//! declared signals and commands.
//!
//! Construction is pure: no socket is touched until `start()`/`connect()`.
//! Duplicate names are caught here, synchronously, as hard failures.

use crate::hooks::{
    PeerHook, ServerCommandHook, ServerSignalHook, ServerTextHook, SessionCommandHook,
    SessionSignalHook, SessionTextHook,
};
use crate::peer::PeerId;
use crate::server::BusServer;
use crate::session::BusSession;
use crate::slot::SignalTable;
use signalbus_types::{BusConfig, BusError, BusResult, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Builder for the server side of the bus.
#[derive(Default)]
pub struct ServerBuilder {
    config: BusConfig,
    signals: Vec<(String, Value)>,
    signal_hooks: HashMap<String, ServerSignalHook>,
    commands: Vec<(String, ServerCommandHook)>,
    on_message: Option<ServerTextHook>,
    on_connect: Option<PeerHook>,
    on_disconnect: Option<PeerHook>,
}

impl ServerBuilder {
    /// Start from default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: BusConfig) -> Self {
        self.config = config;
        self
    }

    /// Bind host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Bind port (0 picks a free port; see [`BusServer::local_addr`]).
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Declare a signal. The default's kind becomes the signal's kind.
    pub fn signal(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        self.signals.push((name.into(), default.into()));
        self
    }

    /// Declare a signal with a change callback `(origin peer, old, new)`.
    pub fn signal_with(
        mut self,
        name: impl Into<String>,
        default: impl Into<Value>,
        hook: impl Fn(Option<PeerId>, &Value, &Value) + Send + Sync + 'static,
    ) -> Self {
        let name = name.into();
        self.signal_hooks.insert(name.clone(), Arc::new(hook));
        self.signals.push((name, default.into()));
        self
    }

    /// Declare a command with its server-side callback.
    pub fn command(
        mut self,
        name: impl Into<String>,
        hook: impl Fn(Option<PeerId>) + Send + Sync + 'static,
    ) -> Self {
        self.commands.push((name.into(), Arc::new(hook)));
        self
    }

    /// Called with every inbound plain text message.
    pub fn on_message(mut self, hook: impl Fn(PeerId, &str) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Arc::new(hook));
        self
    }

    /// Called after a peer is accepted and its state replicated.
    pub fn on_connect(mut self, hook: impl Fn(PeerId) + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(hook));
        self
    }

    /// Called exactly once when a peer is closed, for any reason.
    pub fn on_disconnect(mut self, hook: impl Fn(PeerId) + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(hook));
        self
    }

    /// Assemble the server. Fails on duplicate signal or command names.
    pub fn build(self) -> BusResult<BusServer> {
        let mut table = SignalTable::new();
        for (name, default) in self.signals {
            table.register(name, default)?;
        }
        let mut commands = HashMap::new();
        for (name, hook) in self.commands {
            if commands.insert(name.clone(), hook).is_some() {
                return Err(BusError::DuplicateCommand(name));
            }
        }
        Ok(BusServer::from_parts(
            self.config,
            table,
            self.signal_hooks,
            commands,
            self.on_message,
            self.on_connect,
            self.on_disconnect,
        ))
    }
}

/// Builder for a client session.
#[derive(Default)]
pub struct SessionBuilder {
    config: BusConfig,
    signals: Vec<(String, Value)>,
    signal_hooks: HashMap<String, SessionSignalHook>,
    commands: Vec<(String, SessionCommandHook)>,
    on_message: Option<SessionTextHook>,
}

impl SessionBuilder {
    /// Start from default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: BusConfig) -> Self {
        self.config = config;
        self
    }

    /// Server host to dial.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Server port to dial.
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Declare this session's private copy of a signal. Names and kinds must
    /// mirror the server's declarations for replication to land.
    pub fn signal(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        self.signals.push((name.into(), default.into()));
        self
    }

    /// Declare a signal with a change callback `(old, new)`.
    pub fn signal_with(
        mut self,
        name: impl Into<String>,
        default: impl Into<Value>,
        hook: impl Fn(&Value, &Value) + Send + Sync + 'static,
    ) -> Self {
        let name = name.into();
        self.signal_hooks.insert(name.clone(), Arc::new(hook));
        self.signals.push((name, default.into()));
        self
    }

    /// Declare a command with its client-side callback.
    pub fn command(
        mut self,
        name: impl Into<String>,
        hook: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        self.commands.push((name.into(), Arc::new(hook)));
        self
    }

    /// Called with every inbound plain text message.
    pub fn on_message(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Arc::new(hook));
        self
    }

    /// Assemble the session. Fails on duplicate signal or command names.
    pub fn build(self) -> BusResult<BusSession> {
        let mut table = SignalTable::new();
        for (name, default) in self.signals {
            table.register(name, default)?;
        }
        let mut commands = HashMap::new();
        for (name, hook) in self.commands {
            if commands.insert(name.clone(), hook).is_some() {
                return Err(BusError::DuplicateCommand(name));
            }
        }
        Ok(BusSession::from_parts(
            self.config,
            table,
            self.signal_hooks,
            commands,
            self.on_message,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_signal_rejected() {
        let result = ServerBuilder::new()
            .signal("X", 1i64)
            .signal("X", 2i64)
            .build();
        match result {
            Err(BusError::DuplicateSignal(name)) => assert_eq!(name, "X"),
            other => panic!("Expected DuplicateSignal, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_duplicate_command_rejected() {
        let result = ServerBuilder::new()
            .command("GO", |_| {})
            .command("GO", |_| {})
            .build();
        match result {
            Err(BusError::DuplicateCommand(name)) => assert_eq!(name, "GO"),
            other => panic!("Expected DuplicateCommand, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_session_duplicate_signal_rejected() {
        let result = SessionBuilder::new()
            .signal("X", false)
            .signal_with("X", true, |_, _| {})
            .build();
        assert!(matches!(result, Err(BusError::DuplicateSignal(_))));
    }

    #[test]
    fn test_fluent_config() {
        let server = ServerBuilder::new()
            .host("0.0.0.0")
            .port(0)
            .signal("ready", false)
            .build()
            .unwrap();
        assert_eq!(server.peer_count(), 0);
    }
}

//! Shared error types for the signalbus system.

use crate::value::ValueKind;
use thiserror::Error;

/// Top-level error type for the signalbus system.
#[derive(Error, Debug)]
pub enum BusError {
    /// An I/O error on the listener or a connection.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The session has no live connection.
    #[error("Not connected")]
    NotConnected,

    /// A signal with this name is already registered.
    #[error("Signal already registered: {0}")]
    DuplicateSignal(String),

    /// A command with this name is already registered.
    #[error("Command already registered: {0}")]
    DuplicateCommand(String),

    /// The named signal was never registered.
    #[error("Unknown signal: {0}")]
    UnknownSignal(String),

    /// The named command was never registered.
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// The value's kind does not match the slot's registered kind.
    #[error("Type mismatch on signal '{name}': expected {expected}, got {found}")]
    TypeMismatch {
        /// The signal being written.
        name: String,
        /// The kind fixed at registration.
        expected: ValueKind,
        /// The kind of the rejected value.
        found: ValueKind,
    },

    /// A raw wire value could not be parsed into the slot's kind.
    #[error("Cannot parse {raw:?} as {expected}")]
    Parse {
        /// The raw value text from the wire.
        raw: String,
        /// The kind the slot requires.
        expected: ValueKind,
    },

    /// A single inbound line exceeded the configured frame size limit.
    #[error("Frame too large: {len} bytes (max {max})")]
    FrameTooLarge {
        /// Length of the offending line.
        len: usize,
        /// Configured maximum.
        max: usize,
    },
}

/// Alias for Result with BusError.
pub type BusResult<T> = Result<T, BusError>;

//! Shared data model for the signalbus system.
//!
//! This crate holds the pieces every other signalbus crate agrees on: the
//! tagged [`Value`] type that signals carry, the [`BusError`] taxonomy, and
//! the [`BusConfig`] tuning surface.

pub mod config;
pub mod error;
pub mod value;

pub use config::{load_config, BusConfig};
pub use error::{BusError, BusResult};
pub use value::{Value, ValueKind};

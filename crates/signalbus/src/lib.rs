//! signalbus — a small symmetric bus for shared typed values and triggers.
//!
//! One [`BusServer`] and many [`BusSession`]s share named typed values
//! ("signals") and fire named triggers ("commands") over one long-lived TCP
//! connection each. State replicates to newly joined peers automatically, and
//! a periodic liveness sweep evicts peers that have gone silent.
//!
//! Declare the shape of the bus up front with the builders, then start it:
//!
//! ```no_run
//! use signalbus::{ServerBuilder, SessionBuilder};
//!
//! # async fn demo() -> signalbus_types::BusResult<()> {
//! let server = ServerBuilder::new()
//!     .port(4520)
//!     .signal("D2816", false)
//!     .command("RESET_SYSTEM", |peer| println!("reset requested by {peer:?}"))
//!     .build()?;
//! server.start().await?;
//!
//! let session = SessionBuilder::new()
//!     .port(4520)
//!     .signal_with("D2816", false, |old, new| println!("{old} -> {new}"))
//!     .command("RESET_SYSTEM", || println!("reset"))
//!     .build()?;
//! session.connect().await?;
//! session.set_signal("D2816", true).await?;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod hooks;
pub mod peer;
mod reader;
pub mod server;
pub mod session;
pub mod slot;

pub use builder::{ServerBuilder, SessionBuilder};
pub use peer::PeerId;
pub use server::BusServer;
pub use session::BusSession;
pub use signalbus_types::{BusConfig, BusError, BusResult, Value, ValueKind};

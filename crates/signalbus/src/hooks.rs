//! User-supplied callback types and the guard that keeps them from killing
//! background tasks.

use crate::peer::PeerId;
use signalbus_types::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::error;

/// Server-side signal change callback: `(origin peer, old, new)`.
/// `origin` is `None` for local writes.
pub type ServerSignalHook = Arc<dyn Fn(Option<PeerId>, &Value, &Value) + Send + Sync>;

/// Server-side command callback: `(origin peer)`, `None` for local fires.
pub type ServerCommandHook = Arc<dyn Fn(Option<PeerId>) + Send + Sync>;

/// Server-side free-text callback: `(sending peer, text)`.
pub type ServerTextHook = Arc<dyn Fn(PeerId, &str) + Send + Sync>;

/// Connect/disconnect callback.
pub type PeerHook = Arc<dyn Fn(PeerId) + Send + Sync>;

/// Client-side signal change callback: `(old, new)`.
pub type SessionSignalHook = Arc<dyn Fn(&Value, &Value) + Send + Sync>;

/// Client-side command callback.
pub type SessionCommandHook = Arc<dyn Fn() + Send + Sync>;

/// Client-side free-text callback.
pub type SessionTextHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Run a user hook, containing any panic to a log line. Hooks run on bus
/// tasks; a panicking callback must not take the accept loop, a read loop,
/// or the sweep down with it.
pub(crate) fn run_hook(name: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!(hook = name, "User hook panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_hook_contains_panic() {
        run_hook("exploding", || panic!("boom"));
        // Still here.
    }

    #[test]
    fn test_run_hook_runs() {
        let mut hit = false;
        run_hook("ok", || hit = true);
        assert!(hit);
    }
}

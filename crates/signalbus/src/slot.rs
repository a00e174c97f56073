//! Typed signal slots and the per-bus signal table.
//!
//! A slot holds one cached [`Value`] of the kind fixed at registration.
//! The slot itself carries no lock; the owning server/session serializes all
//! access through one coarse mutex over the whole table.

use signalbus_types::{BusError, BusResult, Value};
use signalbus_wire::encode_signal;
use std::collections::HashMap;

/// One named, typed, cached value.
#[derive(Debug, Clone)]
pub struct SignalSlot {
    name: String,
    value: Value,
}

impl SignalSlot {
    /// Create a slot from its declared default. The default's kind becomes
    /// the slot's kind for good.
    pub fn new(name: impl Into<String>, default: Value) -> Self {
        Self {
            name: name.into(),
            value: default,
        }
    }

    /// Slot name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The kind fixed at registration.
    pub fn kind(&self) -> signalbus_types::ValueKind {
        self.value.kind()
    }

    /// Current cached value. Never blocks; the caller holds the table lock.
    pub fn get(&self) -> Value {
        self.value.clone()
    }

    /// Reject values of the wrong kind. Writing a signal as a different type
    /// is a programming error surfaced at the call site, not something the
    /// bus recovers from.
    pub fn accepts(&self, value: &Value) -> BusResult<()> {
        if value.kind() == self.value.kind() {
            Ok(())
        } else {
            Err(BusError::TypeMismatch {
                name: self.name.clone(),
                expected: self.value.kind(),
                found: value.kind(),
            })
        }
    }

    /// Equality-based change detection.
    pub fn differs(&self, value: &Value) -> bool {
        self.value != *value
    }

    /// Commit a new value, returning the old one. The caller has already run
    /// `accepts`/`differs` and any side-effecting send; a failed send means
    /// this is never called and the cache stays put.
    pub fn store(&mut self, value: Value) -> Value {
        std::mem::replace(&mut self.value, value)
    }

    /// This slot as a wire frame.
    pub fn frame(&self) -> String {
        encode_signal(&self.name, &self.value)
    }
}

/// All slots of one bus instance.
#[derive(Debug, Default)]
pub struct SignalTable {
    slots: HashMap<String, SignalSlot>,
}

impl SignalTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a slot. Duplicate names are a hard builder-time failure.
    pub fn register(&mut self, name: impl Into<String>, default: Value) -> BusResult<()> {
        let name = name.into();
        if self.slots.contains_key(&name) {
            return Err(BusError::DuplicateSignal(name));
        }
        self.slots.insert(name.clone(), SignalSlot::new(name, default));
        Ok(())
    }

    /// Look up a slot.
    pub fn get(&self, name: &str) -> Option<&SignalSlot> {
        self.slots.get(name)
    }

    /// Look up a slot for mutation.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut SignalSlot> {
        self.slots.get_mut(name)
    }

    /// Number of registered signals.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no signals are registered.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// One encoded frame per slot, for replicating the whole table to a
    /// newly joined peer.
    pub fn replication_frames(&self) -> Vec<String> {
        self.slots.values().map(SignalSlot::frame).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use signalbus_types::ValueKind;

    #[test]
    fn test_register_and_get() {
        let mut table = SignalTable::new();
        table.register("D2816", Value::Bool(false)).unwrap();
        let slot = table.get("D2816").unwrap();
        assert_eq!(slot.kind(), ValueKind::Bool);
        assert_eq!(slot.get(), Value::Bool(false));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut table = SignalTable::new();
        table.register("X", Value::Int(0)).unwrap();
        match table.register("X", Value::Int(1)) {
            Err(BusError::DuplicateSignal(name)) => assert_eq!(name, "X"),
            other => panic!("Expected DuplicateSignal, got {other:?}"),
        }
    }

    #[test]
    fn test_kind_is_fixed_at_registration() {
        let mut table = SignalTable::new();
        table.register("X", Value::Int(0)).unwrap();
        let slot = table.get("X").unwrap();
        assert!(slot.accepts(&Value::Int(5)).is_ok());
        match slot.accepts(&Value::Text("5".into())) {
            Err(BusError::TypeMismatch {
                expected, found, ..
            }) => {
                assert_eq!(expected, ValueKind::Int);
                assert_eq!(found, ValueKind::Text);
            }
            other => panic!("Expected TypeMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_change_detection() {
        let mut table = SignalTable::new();
        table.register("X", Value::Int(0)).unwrap();
        let slot = table.get_mut("X").unwrap();
        assert!(!slot.differs(&Value::Int(0)));
        assert!(slot.differs(&Value::Int(1)));
        let old = slot.store(Value::Int(1));
        assert_eq!(old, Value::Int(0));
        assert_eq!(slot.get(), Value::Int(1));
    }

    #[test]
    fn test_replication_frames_cover_every_slot() {
        let mut table = SignalTable::new();
        table.register("A", Value::Bool(true)).unwrap();
        table.register("B", Value::Text("hi".into())).unwrap();
        let mut frames = table.replication_frames();
        frames.sort();
        assert_eq!(frames, vec!["$A=true", "$B=\"hi\""]);
    }
}

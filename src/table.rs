//! Transition table: maps (current state, event) to the next state.

use crate::error::MachineError;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

/// Bounds required of a state key.
pub trait StateKey: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

impl<T: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static> StateKey for T {}

/// Bounds required of an event key.
pub trait EventKey: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

impl<T: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static> EventKey for T {}

/// Transition rules indexed by (from_state, event) -> to_state.
#[derive(Debug, Clone)]
pub struct TransitionTable<S, E> {
    rules: HashMap<(S, E), S>,
    allow_overriding: bool,
}

impl<S: StateKey, E: EventKey> TransitionTable<S, E> {
    /// Creates a table that rejects duplicate registrations.
    pub fn new() -> Self {
        Self::with_overriding(false)
    }

    /// Creates a table with the given overriding policy. When overriding is
    /// enabled, re-registering an existing (state, event) pair replaces the
    /// previous target (last write wins).
    pub fn with_overriding(allow_overriding: bool) -> Self {
        Self {
            rules: HashMap::new(),
            allow_overriding,
        }
    }

    /// Registers a (from, event) -> to rule.
    pub fn insert(&mut self, from: S, event: E, to: S) -> Result<(), MachineError> {
        let key = (from, event);
        if !self.allow_overriding && self.rules.contains_key(&key) {
            return Err(MachineError::DuplicateTransition {
                from: format!("{:?}", key.0),
                event: format!("{:?}", key.1),
            });
        }
        self.rules.insert(key, to);
        Ok(())
    }

    /// Looks up the target state for the given state and event.
    ///
    /// A miss means "no transition" and leaves the machine where it is; it is
    /// not an error at this layer.
    pub fn next(&self, from: &S, event: &E) -> Option<&S> {
        self.rules.get(&(from.clone(), event.clone()))
    }

    /// Returns all events with a rule from the given state.
    pub fn events_from(&self, from: &S) -> Vec<&E> {
        self.rules
            .keys()
            .filter(|(s, _)| s == from)
            .map(|(_, e)| e)
            .collect()
    }

    /// Returns the number of registered rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl<S: StateKey, E: EventKey> Default for TransitionTable<S, E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_lookup() {
        let mut table = TransitionTable::new();
        table.insert("idle", "start", "running").unwrap();
        table.insert("running", "finish", "done").unwrap();

        assert_eq!(table.next(&"idle", &"start"), Some(&"running"));
        assert_eq!(table.next(&"running", &"finish"), Some(&"done"));
        assert_eq!(table.next(&"idle", &"finish"), None);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_duplicate_rejected_without_overriding() {
        let mut table = TransitionTable::new();
        table.insert("idle", "start", "running").unwrap();

        let result = table.insert("idle", "start", "done");
        assert!(matches!(
            result,
            Err(MachineError::DuplicateTransition { .. })
        ));
        // The original rule survives.
        assert_eq!(table.next(&"idle", &"start"), Some(&"running"));
    }

    #[test]
    fn test_overriding_is_last_write_wins() {
        let mut table = TransitionTable::with_overriding(true);
        table.insert("idle", "start", "running").unwrap();
        table.insert("idle", "start", "done").unwrap();

        assert_eq!(table.next(&"idle", &"start"), Some(&"done"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_self_transition_registers_freely() {
        // Gating happens at dispatch time, not registration time.
        let mut table = TransitionTable::new();
        table.insert("running", "retry", "running").unwrap();
        assert_eq!(table.next(&"running", &"retry"), Some(&"running"));
    }

    #[test]
    fn test_events_from() {
        let mut table = TransitionTable::new();
        table.insert("idle", "start", "running").unwrap();
        table.insert("idle", "abort", "done").unwrap();
        table.insert("running", "finish", "done").unwrap();

        let mut events = table.events_from(&"idle");
        events.sort();
        assert_eq!(events, vec![&"abort", &"start"]);
        assert!(table.events_from(&"done").is_empty());
    }
}

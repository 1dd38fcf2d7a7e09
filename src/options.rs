//! Machine configuration.

use crate::queue::QueueMode;
use tracing::Level;

/// Default buffered capacity of each per-state phase channel.
pub const DEFAULT_PHASE_CAPACITY: usize = 64;

/// Configuration for a state machine.
///
/// Set before the machine is built and immutable thereafter.
#[derive(Debug, Clone)]
pub struct MachineOptions {
    /// Policy for events arriving while a transition is in flight.
    pub queue_mode: QueueMode,
    /// Allows re-registering an existing (state, event) rule, last write wins.
    pub enable_overriding: bool,
    /// Allows transitions whose target equals the current state. When
    /// allowed, the full exit/enter cycle still runs.
    pub enable_self_transition: bool,
    /// Treats a missing transition rule as an error instead of ignoring the
    /// event.
    pub strict_transitions: bool,
    /// Bound on the event queue. `None` means unbounded.
    pub queue_capacity: Option<usize>,
    /// Buffered capacity of each per-state phase channel.
    pub phase_capacity: usize,
    /// Most verbose severity the machine will emit through `tracing`.
    pub min_log_level: Level,
}

impl MachineOptions {
    pub fn new() -> Self {
        Self {
            queue_mode: QueueMode::UntilFailures,
            enable_overriding: false,
            enable_self_transition: false,
            strict_transitions: false,
            queue_capacity: None,
            phase_capacity: DEFAULT_PHASE_CAPACITY,
            min_log_level: Level::INFO,
        }
    }

    pub fn with_queue_mode(mut self, mode: QueueMode) -> Self {
        self.queue_mode = mode;
        self
    }

    pub fn with_overriding(mut self, enabled: bool) -> Self {
        self.enable_overriding = enabled;
        self
    }

    pub fn with_self_transitions(mut self, enabled: bool) -> Self {
        self.enable_self_transition = enabled;
        self
    }

    pub fn with_strict_transitions(mut self, enabled: bool) -> Self {
        self.strict_transitions = enabled;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    pub fn with_phase_capacity(mut self, capacity: usize) -> Self {
        self.phase_capacity = capacity;
        self
    }

    pub fn with_min_log_level(mut self, level: Level) -> Self {
        self.min_log_level = level;
        self
    }

    /// Returns whether an event at `level` should be emitted.
    pub(crate) fn log_allows(&self, level: Level) -> bool {
        // tracing orders severities ERROR < WARN < INFO < DEBUG < TRACE.
        level <= self.min_log_level
    }
}

impl Default for MachineOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = MachineOptions::default();
        assert_eq!(options.queue_mode, QueueMode::UntilFailures);
        assert!(!options.enable_overriding);
        assert!(!options.enable_self_transition);
        assert!(!options.strict_transitions);
        assert_eq!(options.queue_capacity, None);
        assert_eq!(options.phase_capacity, DEFAULT_PHASE_CAPACITY);
        assert_eq!(options.min_log_level, Level::INFO);
    }

    #[test]
    fn test_builder_chain() {
        let options = MachineOptions::new()
            .with_queue_mode(QueueMode::DropWhileRunning)
            .with_overriding(true)
            .with_self_transitions(true)
            .with_strict_transitions(true)
            .with_queue_capacity(8)
            .with_phase_capacity(4)
            .with_min_log_level(Level::TRACE);

        assert_eq!(options.queue_mode, QueueMode::DropWhileRunning);
        assert!(options.enable_overriding);
        assert!(options.enable_self_transition);
        assert!(options.strict_transitions);
        assert_eq!(options.queue_capacity, Some(8));
        assert_eq!(options.phase_capacity, 4);
        assert_eq!(options.min_log_level, Level::TRACE);
    }

    #[test]
    fn test_log_allows_tracks_severity_order() {
        let options = MachineOptions::new().with_min_log_level(Level::INFO);
        assert!(options.log_allows(Level::ERROR));
        assert!(options.log_allows(Level::WARN));
        assert!(options.log_allows(Level::INFO));
        assert!(!options.log_allows(Level::DEBUG));
        assert!(!options.log_allows(Level::TRACE));
    }
}

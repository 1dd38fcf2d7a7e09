//! Per-state transition-phase observables and the `StateInfo` record.

use crate::state::StateHandler;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Phase signal published immediately *before* the corresponding lifecycle
/// hook runs, so subscribers react to "about to enter/exit" rather than
/// "already entered/exited".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum TransitionPhase {
    Entering,
    Exiting,
}

/// Fan-out channel for one state's phase signals.
#[derive(Debug, Clone)]
pub(crate) struct PhaseChannel {
    tx: broadcast::Sender<TransitionPhase>,
}

impl PhaseChannel {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<TransitionPhase> {
        self.tx.subscribe()
    }

    pub(crate) fn publish(&self, phase: TransitionPhase) {
        // Ignore send errors (no receivers)
        let _ = self.tx.send(phase);
    }
}

/// Per-state record: identity, the owned state instance, and the state's
/// phase channel.
///
/// Created lazily on first reference to a state key; exactly one exists per
/// distinct key per machine, and it lives until the machine is disposed.
#[derive(Debug)]
pub struct StateInfo<C> {
    id: Uuid,
    handler: StateHandler<C>,
    channel: PhaseChannel,
}

impl<C> StateInfo<C> {
    pub(crate) fn new(handler: StateHandler<C>, channel: PhaseChannel) -> Self {
        Self {
            id: Uuid::new_v4(),
            handler,
            channel,
        }
    }

    /// Stable identity of this record. Repeated get-or-create calls for the
    /// same key observe the same id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns whether the held state may suspend in its hooks.
    pub fn is_suspendable(&self) -> bool {
        self.handler.is_suspendable()
    }

    pub(crate) fn handler_mut(&mut self) -> &mut StateHandler<C> {
        &mut self.handler
    }

    /// Replaces the held state instance, preserving identity and subscribers.
    pub(crate) fn set_handler(&mut self, handler: StateHandler<C>) {
        self.handler = handler;
    }

    pub(crate) fn publish(&self, phase: TransitionPhase) {
        self.channel.publish(phase);
    }

    #[cfg(test)]
    pub(crate) fn subscribe(&self) -> broadcast::Receiver<TransitionPhase> {
        self.channel.subscribe()
    }
}

/// Subscription to a state's phase signals, optionally filtered to a single
/// phase.
///
/// Subscriptions are independent: dropping one never affects others. The
/// stream completes (yields `None`) once the machine is disposed. A
/// subscription taken from a disposed machine, or through a handle whose
/// machine is gone, is [`PhaseEvents::empty`]: it completes immediately
/// instead of failing.
pub struct PhaseEvents {
    rx: Option<broadcast::Receiver<TransitionPhase>>,
    filter: Option<TransitionPhase>,
}

impl PhaseEvents {
    /// A stream that yields nothing and completes immediately.
    pub fn empty() -> Self {
        Self {
            rx: None,
            filter: None,
        }
    }

    pub(crate) fn live(rx: broadcast::Receiver<TransitionPhase>, filter: Option<TransitionPhase>) -> Self {
        Self {
            rx: Some(rx),
            filter,
        }
    }

    /// Returns whether this subscription is attached to a live machine.
    pub fn is_live(&self) -> bool {
        self.rx.is_some()
    }

    /// Waits for the next matching phase; `None` once the stream completes.
    ///
    /// A subscriber that falls behind the channel capacity skips the missed
    /// phases and resumes with the newest.
    pub async fn next(&mut self) -> Option<TransitionPhase> {
        let filter = self.filter;
        let rx = self.rx.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(phase) => {
                    if filter.map_or(true, |f| f == phase) {
                        return Some(phase);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        self.rx = None;
        None
    }
}

impl std::fmt::Debug for PhaseEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseEvents")
            .field("live", &self.is_live())
            .field("filter", &self.filter)
            .finish()
    }
}

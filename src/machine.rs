//! The state machine: coordinates lookups, drives enter/exit/update, owns the
//! event queue and error routing.
//!
//! A machine has a single logical owner: all entry points take `&mut self`,
//! so transitions are strictly serialized and no two lifecycle hooks ever run
//! concurrently against the shared context. Events arriving while a
//! transition is in flight come in through [`MachineHandle::post`] and are
//! replayed in strict FIFO arrival order.

use crate::block::BlockId;
use crate::error::{ErrorHandler, MachineError};
use crate::executor;
use crate::observe::{PhaseChannel, PhaseEvents, StateInfo, TransitionPhase};
use crate::options::MachineOptions;
use crate::queue::{EventQueue, FifoQueue, QueueMode};
use crate::state::{Idle, StateHandler};
use crate::table::{EventKey, StateKey, TransitionTable};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Level;

type SharedQueue<E> = Arc<Mutex<Box<dyn EventQueue<E>>>>;
type PhaseChannels<S> = Arc<DashMap<S, PhaseChannel>>;

/// A hierarchical, event-driven state machine over a shared context `C`,
/// state keys `S`, and event keys `E`.
///
/// Lifecycle: construct, register states and transitions, [`awake`] exactly
/// once, then [`send`]/[`update`] until [`dispose`]. Disposal is terminal.
///
/// [`awake`]: StateMachine::awake
/// [`send`]: StateMachine::send
/// [`update`]: StateMachine::update
/// [`dispose`]: StateMachine::dispose
pub struct StateMachine<C, S, E>
where
    S: StateKey,
    E: EventKey,
{
    ctx: C,
    table: TransitionTable<S, E>,
    states: HashMap<S, StateInfo<C>>,
    channels: PhaseChannels<S>,
    queue: SharedQueue<E>,
    current: Option<S>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    parent: Option<BlockId>,
    cancel: CancellationToken,
    running: Arc<AtomicBool>,
    disposed: Arc<AtomicBool>,
    awaked: bool,
    options: MachineOptions,
}

impl<C, S, E> StateMachine<C, S, E>
where
    S: StateKey,
    E: EventKey,
{
    /// Creates a machine over the shared context with default options.
    pub fn new(ctx: C) -> Self {
        Self::with_options(ctx, MachineOptions::default())
    }

    /// Creates a machine with the given options.
    pub fn with_options(ctx: C, options: MachineOptions) -> Self {
        let queue: Box<dyn EventQueue<E>> = match options.queue_capacity {
            Some(capacity) => Box::new(FifoQueue::bounded(capacity)),
            None => Box::new(FifoQueue::new()),
        };
        Self::with_queue(ctx, options, queue)
    }

    /// Creates a machine with a custom event queue implementation.
    pub fn with_queue(ctx: C, options: MachineOptions, queue: Box<dyn EventQueue<E>>) -> Self {
        Self {
            ctx,
            table: TransitionTable::with_overriding(options.enable_overriding),
            states: HashMap::new(),
            channels: Arc::new(DashMap::new()),
            queue: Arc::new(Mutex::new(queue)),
            current: None,
            error_handler: None,
            parent: None,
            cancel: CancellationToken::new(),
            running: Arc::new(AtomicBool::new(false)),
            disposed: Arc::new(AtomicBool::new(false)),
            awaked: false,
            options,
        }
    }

    pub fn options(&self) -> &MachineOptions {
        &self.options
    }

    pub fn context(&self) -> &C {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut C {
        &mut self.ctx
    }

    /// The current state key, once awaked and until disposed.
    pub fn current(&self) -> Option<&S> {
        self.current.as_ref()
    }

    pub fn is_awaked(&self) -> bool {
        self.awaked
    }

    /// Returns whether a transition is in flight.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Non-owning composition back-link, managed by the block layer.
    pub fn parent(&self) -> Option<BlockId> {
        self.parent
    }

    pub fn set_parent(&mut self, parent: Option<BlockId>) {
        self.parent = parent;
    }

    /// Installs the error sink for hook failures. Failures are reported to
    /// the handler in addition to being returned to the caller;
    /// cancellations are never routed here.
    pub fn set_error_handler(&mut self, handler: Arc<dyn ErrorHandler>) {
        self.error_handler = Some(handler);
    }

    /// Registers (or replaces) the state instance for a key. Replacing keeps
    /// the existing `StateInfo` identity, so subscribers are unaffected.
    pub fn add_state(&mut self, key: S, handler: StateHandler<C>) -> Result<(), MachineError> {
        self.ensure_not_disposed()?;
        self.get_or_create(key).set_handler(handler);
        Ok(())
    }

    /// Registers a (from, event) -> to transition rule.
    pub fn add_transition(&mut self, from: S, event: E, to: S) -> Result<(), MachineError> {
        self.ensure_not_disposed()?;
        self.table.insert(from, event, to)
    }

    /// Returns the per-state record for `key`, creating it with an [`Idle`]
    /// handler on first reference. Repeated calls return the same record.
    pub fn get_or_create(&mut self, key: S) -> &mut StateInfo<C> {
        let channel = self.phase_channel(&key);
        self.states
            .entry(key)
            .or_insert_with(|| StateInfo::new(StateHandler::sync(Idle), channel))
    }

    /// `Entering` signals for `key`. Empty and completed once disposed.
    pub fn on_enter(&self, key: S) -> PhaseEvents {
        self.subscribe(key, Some(TransitionPhase::Entering))
    }

    /// `Exiting` signals for `key`. Empty and completed once disposed.
    pub fn on_exit(&self, key: S) -> PhaseEvents {
        self.subscribe(key, Some(TransitionPhase::Exiting))
    }

    /// All phase signals for `key`.
    pub fn phases(&self, key: S) -> PhaseEvents {
        self.subscribe(key, None)
    }

    /// A clone-able handle for posting events and subscribing from hooks or
    /// other tasks. Handles degrade gracefully once the machine is disposed
    /// or dropped: posting fails with [`MachineError::Disposed`] and
    /// subscriptions are empty streams.
    pub fn handle(&self) -> MachineHandle<S, E> {
        MachineHandle {
            queue: Arc::downgrade(&self.queue),
            channels: Arc::downgrade(&self.channels),
            running: Arc::clone(&self.running),
            disposed: Arc::clone(&self.disposed),
            queue_mode: self.options.queue_mode,
            phase_capacity: self.options.phase_capacity,
        }
    }

    /// Performs the initial enter of `initial`. Must be called exactly once
    /// before [`send`]/[`update`]; on failure the machine stays un-awaked.
    ///
    /// [`send`]: StateMachine::send
    /// [`update`]: StateMachine::update
    pub async fn awake(&mut self, initial: S, cancel: &CancellationToken) -> Result<(), MachineError> {
        self.ensure_not_disposed()?;
        if self.awaked {
            return Err(MachineError::AlreadyAwaked);
        }
        if cancel.is_cancelled() || self.cancel.is_cancelled() {
            return Err(MachineError::Cancelled);
        }

        self.get_or_create(initial.clone());
        let op = self.cancel.child_token();
        let result = {
            let (info, ctx) = self.hook_parts(&initial);
            with_cancel(cancel, executor::enter(info, ctx, &op)).await
        };
        match result {
            Ok(()) => {
                if self.options.log_allows(Level::DEBUG) {
                    tracing::debug!("machine awaked in state {:?}", initial);
                }
                self.awaked = true;
                self.current = Some(initial);
                Ok(())
            }
            Err(e) => Err(self.report(e)),
        }
    }

    /// Sends an event: enqueues it, then drives the queue, replaying any
    /// events posted through handles in strict arrival order.
    ///
    /// The current state advances only after an enter hook completes
    /// successfully. On failure or cancellation the remaining queued events
    /// are dropped and the error is surfaced once; side effects already
    /// performed by an exit hook are not rolled back.
    pub async fn send(&mut self, event: E, cancel: &CancellationToken) -> Result<(), MachineError> {
        self.ensure_ready()?;
        self.push(event)?;
        self.drive(cancel).await
    }

    /// Replays pending posted events, then runs the current state's update
    /// hook once. Cancellation mid-update stops politely and never advances
    /// state.
    pub async fn update(&mut self, dt: Duration, cancel: &CancellationToken) -> Result<(), MachineError> {
        self.ensure_ready()?;
        self.drive(cancel).await?;
        if cancel.is_cancelled() || self.cancel.is_cancelled() {
            return Err(MachineError::Cancelled);
        }

        let Some(current) = self.current.clone() else {
            return Err(MachineError::NotAwaked);
        };
        let op = self.cancel.child_token();
        let result = {
            let (info, ctx) = self.hook_parts(&current);
            with_cancel(cancel, executor::update(info, ctx, dt, &op)).await
        };
        result.map_err(|e| self.report(e))
    }

    /// Tears the machine down: cancels machine-owned work, discards queued
    /// events, and completes all subscriber streams. Idempotent; every later
    /// operation fails with [`MachineError::Disposed`].
    pub fn dispose(&mut self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        let dropped = self.queue.lock().clear();
        self.states.clear();
        self.channels.clear();
        self.current = None;
        if self.options.log_allows(Level::DEBUG) {
            tracing::debug!("machine disposed, {} queued event(s) discarded", dropped);
        }
    }

    fn push(&mut self, event: E) -> Result<(), MachineError> {
        let mut queue = self.queue.lock();
        let capacity = queue.capacity();
        queue.push(event).map_err(|_| MachineError::QueueFull {
            capacity: capacity.unwrap_or(0),
        })
    }

    async fn drive(&mut self, cancel: &CancellationToken) -> Result<(), MachineError> {
        if self.running.swap(true, Ordering::AcqRel) {
            // A drive is already active further up the call stack.
            return Ok(());
        }
        let result = self.drain(cancel).await;
        self.running.store(false, Ordering::Release);
        if result.is_err() {
            let dropped = self.queue.lock().clear();
            if dropped > 0 && self.options.log_allows(Level::WARN) {
                tracing::warn!("dropped {} queued event(s) after a failed transition", dropped);
            }
        }
        result
    }

    async fn drain(&mut self, cancel: &CancellationToken) -> Result<(), MachineError> {
        loop {
            let next = self.queue.lock().pop();
            let Some(event) = next else {
                return Ok(());
            };
            self.step(event, cancel).await?;
        }
    }

    async fn step(&mut self, event: E, cancel: &CancellationToken) -> Result<(), MachineError> {
        let Some(current) = self.current.clone() else {
            return Err(MachineError::NotAwaked);
        };
        let Some(next) = self.table.next(&current, &event).cloned() else {
            if self.options.strict_transitions {
                return Err(MachineError::NoTransition {
                    state: format!("{current:?}"),
                    event: format!("{event:?}"),
                });
            }
            if self.options.log_allows(Level::DEBUG) {
                tracing::debug!("no transition from {:?} on {:?}, event ignored", current, event);
            }
            return Ok(());
        };
        if next == current && !self.options.enable_self_transition {
            return Err(MachineError::SelfTransition {
                state: format!("{current:?}"),
            });
        }
        if cancel.is_cancelled() || self.cancel.is_cancelled() {
            return Err(MachineError::Cancelled);
        }

        let op = self.cancel.child_token();

        self.get_or_create(current.clone());
        let exited = {
            let (info, ctx) = self.hook_parts(&current);
            with_cancel(cancel, executor::exit(info, ctx, &op)).await
        };
        if let Err(e) = exited {
            return Err(self.report(e));
        }

        if cancel.is_cancelled() || self.cancel.is_cancelled() {
            return Err(MachineError::Cancelled);
        }

        self.get_or_create(next.clone());
        let entered = {
            let (info, ctx) = self.hook_parts(&next);
            with_cancel(cancel, executor::enter(info, ctx, &op)).await
        };
        if let Err(e) = entered {
            return Err(self.report(e));
        }

        if self.options.log_allows(Level::DEBUG) {
            tracing::debug!("transition applied: {:?} -> {:?} on {:?}", current, next, event);
        }
        self.current = Some(next);
        Ok(())
    }

    /// Routes a failure to the configured handler and returns it to the
    /// caller. Cancellations pass through untouched.
    fn report(&self, error: MachineError) -> MachineError {
        if error.is_cancelled() {
            return error;
        }
        if self.options.log_allows(Level::ERROR) {
            tracing::error!("state machine error: {}", error);
        }
        if let Some(handler) = &self.error_handler {
            handler.handle(&error);
        }
        error
    }

    fn subscribe(&self, key: S, filter: Option<TransitionPhase>) -> PhaseEvents {
        if self.is_disposed() {
            return PhaseEvents::empty();
        }
        PhaseEvents::live(self.phase_channel(&key).subscribe(), filter)
    }

    fn phase_channel(&self, key: &S) -> PhaseChannel {
        self.channels
            .entry(key.clone())
            .or_insert_with(|| PhaseChannel::new(self.options.phase_capacity))
            .clone()
    }

    fn hook_parts(&mut self, key: &S) -> (&mut StateInfo<C>, &mut C) {
        let info = self
            .states
            .get_mut(key)
            .expect("state record exists before hooks run");
        (info, &mut self.ctx)
    }

    fn ensure_not_disposed(&self) -> Result<(), MachineError> {
        if self.is_disposed() {
            return Err(MachineError::Disposed);
        }
        Ok(())
    }

    fn ensure_ready(&self) -> Result<(), MachineError> {
        self.ensure_not_disposed()?;
        if !self.awaked {
            return Err(MachineError::NotAwaked);
        }
        Ok(())
    }
}

impl<C, S, E> Drop for StateMachine<C, S, E>
where
    S: StateKey,
    E: EventKey,
{
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Runs a hook future, aborting at its next suspension point if the caller's
/// token fires first.
async fn with_cancel<F>(cancel: &CancellationToken, hook: F) -> Result<(), MachineError>
where
    F: Future<Output = Result<(), MachineError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(MachineError::Cancelled),
        result = hook => result,
    }
}

/// Clone-able, non-owning access to a machine's queue and phase channels.
///
/// Used by states to post follow-up events from inside hooks and by other
/// tasks to observe transitions without owning the machine.
#[derive(Clone)]
pub struct MachineHandle<S, E>
where
    S: StateKey,
{
    queue: Weak<Mutex<Box<dyn EventQueue<E>>>>,
    channels: Weak<DashMap<S, PhaseChannel>>,
    running: Arc<AtomicBool>,
    disposed: Arc<AtomicBool>,
    queue_mode: QueueMode,
    phase_capacity: usize,
}

impl<S, E> MachineHandle<S, E>
where
    S: StateKey,
    E: EventKey,
{
    /// Posts an event without driving the machine; it is replayed on the next
    /// drive. Returns whether the event was accepted: a `DropWhileRunning`
    /// machine discards events posted while a transition is in flight.
    pub fn post(&self, event: E) -> Result<bool, MachineError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(MachineError::Disposed);
        }
        let Some(queue) = self.queue.upgrade() else {
            return Err(MachineError::Disposed);
        };
        if self.queue_mode == QueueMode::DropWhileRunning && self.running.load(Ordering::Acquire) {
            return Ok(false);
        }
        let mut queue = queue.lock();
        let capacity = queue.capacity();
        queue.push(event).map_err(|_| MachineError::QueueFull {
            capacity: capacity.unwrap_or(0),
        })?;
        Ok(true)
    }

    /// `Entering` signals for `key`; empty once the machine is gone.
    pub fn on_enter(&self, key: S) -> PhaseEvents {
        self.subscribe(key, Some(TransitionPhase::Entering))
    }

    /// `Exiting` signals for `key`; empty once the machine is gone.
    pub fn on_exit(&self, key: S) -> PhaseEvents {
        self.subscribe(key, Some(TransitionPhase::Exiting))
    }

    /// All phase signals for `key`; empty once the machine is gone.
    pub fn phases(&self, key: S) -> PhaseEvents {
        self.subscribe(key, None)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn subscribe(&self, key: S, filter: Option<TransitionPhase>) -> PhaseEvents {
        if self.is_disposed() {
            return PhaseEvents::empty();
        }
        let Some(channels) = self.channels.upgrade() else {
            return PhaseEvents::empty();
        };
        let rx = channels
            .entry(key)
            .or_insert_with(|| PhaseChannel::new(self.phase_capacity))
            .subscribe();
        PhaseEvents::live(rx, filter)
    }
}

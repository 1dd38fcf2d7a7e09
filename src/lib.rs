//! # stator
//!
//! A hierarchical, event-driven state machine engine.
//!
//! This crate provides:
//! - Synchronous and suspendable (async) state lifecycles with cooperative
//!   cancellation
//! - A transition table with overriding and self-transition policies
//! - An event queue that serializes transitions with strict FIFO replay
//! - Per-state transition-phase observables
//! - Block composition for assembling machine hierarchies

pub mod block;
pub mod error;
mod executor;
pub mod machine;
pub mod observe;
pub mod options;
pub mod queue;
pub mod state;
pub mod table;

pub use block::{Block, BlockError, BlockId, Blocks};
pub use error::{ErrorHandler, HookError, MachineError};
pub use machine::{MachineHandle, StateMachine};
pub use observe::{PhaseEvents, StateInfo, TransitionPhase};
pub use options::{MachineOptions, DEFAULT_PHASE_CAPACITY};
pub use queue::{EventQueue, FifoQueue, QueueMode};
pub use state::{completed, AsyncState, HookFuture, HookResult, Idle, State, StateHandler};
pub use table::{EventKey, StateKey, TransitionTable};

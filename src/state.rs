//! State lifecycle traits and the sync/suspendable handler union.

use crate::error::HookError;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Result of a lifecycle hook.
pub type HookResult = Result<(), HookError>;

/// Boxed future returned by suspendable lifecycle hooks.
pub type HookFuture<'a> = Pin<Box<dyn Future<Output = HookResult> + Send + 'a>>;

/// An already-completed, successful hook future.
///
/// Unoverridden suspendable hooks resolve to this.
pub fn completed<'a>() -> HookFuture<'a> {
    Box::pin(std::future::ready(Ok::<(), HookError>(())))
}

/// A synchronous unit of behavior acting on a shared context.
///
/// All hooks default to no-ops, so a state only implements the phases it
/// cares about. Hooks may fail; the machine wraps and routes the error.
pub trait State<C>: Send {
    /// Runs when the machine transitions into this state.
    fn enter(&mut self, ctx: &mut C) -> HookResult {
        let _ = ctx;
        Ok(())
    }

    /// Runs once per machine update tick while this state is current.
    fn update(&mut self, ctx: &mut C, dt: Duration) -> HookResult {
        let _ = (ctx, dt);
        Ok(())
    }

    /// Runs when the machine transitions out of this state.
    fn exit(&mut self, ctx: &mut C) -> HookResult {
        let _ = ctx;
        Ok(())
    }
}

/// A suspendable unit of behavior acting on a shared context.
///
/// Hooks may await external work (I/O, timers, animations) and should honor
/// the cancellation token at their suspension points. Each hook defaults to
/// an already-completed operation when unoverridden.
pub trait AsyncState<C>: Send {
    fn enter_async<'a>(&'a mut self, ctx: &'a mut C, cancel: &'a CancellationToken) -> HookFuture<'a> {
        let _ = (ctx, cancel);
        completed()
    }

    fn update_async<'a>(
        &'a mut self,
        ctx: &'a mut C,
        dt: Duration,
        cancel: &'a CancellationToken,
    ) -> HookFuture<'a> {
        let _ = (ctx, dt, cancel);
        completed()
    }

    fn exit_async<'a>(&'a mut self, ctx: &'a mut C, cancel: &'a CancellationToken) -> HookFuture<'a> {
        let _ = (ctx, cancel);
        completed()
    }
}

/// Tagged union over the two state capability sets.
///
/// The sync/suspendable check happens exactly once, where the executor
/// matches this enum; call sites never inspect state types.
pub enum StateHandler<C> {
    Sync(Box<dyn State<C>>),
    Suspendable(Box<dyn AsyncState<C>>),
}

impl<C> StateHandler<C> {
    /// Wraps a synchronous state.
    pub fn sync<T: State<C> + 'static>(state: T) -> Self {
        Self::Sync(Box::new(state))
    }

    /// Wraps a suspendable state.
    pub fn suspendable<T: AsyncState<C> + 'static>(state: T) -> Self {
        Self::Suspendable(Box::new(state))
    }

    /// Returns whether the held state may suspend in its hooks.
    pub fn is_suspendable(&self) -> bool {
        matches!(self, Self::Suspendable(_))
    }
}

impl<C> std::fmt::Debug for StateHandler<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("StateHandler::Sync"),
            Self::Suspendable(_) => f.write_str("StateHandler::Suspendable"),
        }
    }
}

/// Reusable no-op sentinel state.
///
/// Materialized as the default handler when a state key is referenced before
/// a state instance is registered for it.
#[derive(Debug, Default, Clone, Copy)]
pub struct Idle;

impl<C> State<C> for Idle {}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[test]
    fn test_idle_hooks_are_noops() {
        let mut idle = Idle;
        let mut ctx = 0u32;
        assert!(idle.enter(&mut ctx).is_ok());
        assert!(idle.update(&mut ctx, Duration::from_millis(16)).is_ok());
        assert!(idle.exit(&mut ctx).is_ok());
        assert_eq!(ctx, 0);
    }

    #[test]
    fn test_default_async_hooks_complete_immediately() {
        struct Passive;
        impl AsyncState<u32> for Passive {}

        let mut state = Passive;
        let mut ctx = 0u32;
        let cancel = CancellationToken::new();
        tokio_test::block_on(async {
            tokio_test::assert_ok!(state.enter_async(&mut ctx, &cancel).await);
            tokio_test::assert_ok!(state.update_async(&mut ctx, Duration::ZERO, &cancel).await);
            tokio_test::assert_ok!(state.exit_async(&mut ctx, &cancel).await);
        });
    }

    #[test]
    fn test_handler_capability_tag() {
        struct Passive;
        impl AsyncState<u32> for Passive {}

        let sync: StateHandler<u32> = StateHandler::sync(Idle);
        let suspendable: StateHandler<u32> = StateHandler::suspendable(Passive);
        assert!(!sync.is_suspendable());
        assert!(suspendable.is_suspendable());
    }
}

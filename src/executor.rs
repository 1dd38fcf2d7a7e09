//! Transition driver: publishes the phase signal, then runs the hook.
//!
//! The phase signal always precedes the hook, for both capability sets, so
//! subscribers observe "about to enter/exit". Hook failures are wrapped and
//! propagated to the machine, which routes them; the executor neither logs
//! nor swallows.

use crate::error::MachineError;
use crate::observe::{StateInfo, TransitionPhase};
use crate::state::StateHandler;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Publishes `Entering`, then runs the state's enter hook.
pub(crate) async fn enter<C>(
    info: &mut StateInfo<C>,
    ctx: &mut C,
    cancel: &CancellationToken,
) -> Result<(), MachineError> {
    info.publish(TransitionPhase::Entering);
    let result = match info.handler_mut() {
        StateHandler::Sync(state) => state.enter(ctx),
        StateHandler::Suspendable(state) => state.enter_async(ctx, cancel).await,
    };
    result.map_err(|source| MachineError::Execution {
        hook: "enter",
        source,
    })
}

/// Publishes `Exiting`, then runs the state's exit hook.
pub(crate) async fn exit<C>(
    info: &mut StateInfo<C>,
    ctx: &mut C,
    cancel: &CancellationToken,
) -> Result<(), MachineError> {
    info.publish(TransitionPhase::Exiting);
    let result = match info.handler_mut() {
        StateHandler::Sync(state) => state.exit(ctx),
        StateHandler::Suspendable(state) => state.exit_async(ctx, cancel).await,
    };
    result.map_err(|source| MachineError::Execution {
        hook: "exit",
        source,
    })
}

/// Runs the state's update hook. No phase signal is published for updates.
pub(crate) async fn update<C>(
    info: &mut StateInfo<C>,
    ctx: &mut C,
    dt: Duration,
    cancel: &CancellationToken,
) -> Result<(), MachineError> {
    let result = match info.handler_mut() {
        StateHandler::Sync(state) => state.update(ctx, dt),
        StateHandler::Suspendable(state) => state.update_async(ctx, dt, cancel).await,
    };
    result.map_err(|source| MachineError::Execution {
        hook: "update",
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::PhaseChannel;
    use crate::state::{AsyncState, HookFuture, HookResult, State, StateHandler};
    use std::sync::Arc;
    use parking_lot::Mutex;
    use tokio::sync::broadcast;

    /// Records, at hook time, the phase already visible to a subscriber.
    struct PhaseProbe {
        rx: broadcast::Receiver<TransitionPhase>,
        seen: Arc<Mutex<Vec<TransitionPhase>>>,
    }

    impl State<()> for PhaseProbe {
        fn enter(&mut self, _ctx: &mut ()) -> HookResult {
            self.seen
                .lock()
                .push(self.rx.try_recv().expect("phase published before the enter hook"));
            Ok(())
        }

        fn exit(&mut self, _ctx: &mut ()) -> HookResult {
            self.seen
                .lock()
                .push(self.rx.try_recv().expect("phase published before the exit hook"));
            Ok(())
        }
    }

    fn probe_info(seen: Arc<Mutex<Vec<TransitionPhase>>>) -> StateInfo<()> {
        let channel = PhaseChannel::new(16);
        let probe = PhaseProbe {
            rx: channel.subscribe(),
            seen,
        };
        StateInfo::new(StateHandler::sync(probe), channel)
    }

    #[tokio::test]
    async fn test_enter_publishes_entering_before_hook() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut info = probe_info(Arc::clone(&seen));
        let cancel = CancellationToken::new();

        enter(&mut info, &mut (), &cancel).await.unwrap();

        // The enter path publishes Entering, not Exiting.
        assert_eq!(*seen.lock(), vec![TransitionPhase::Entering]);
    }

    #[tokio::test]
    async fn test_exit_publishes_exiting_before_hook() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut info = probe_info(Arc::clone(&seen));
        let cancel = CancellationToken::new();

        exit(&mut info, &mut (), &cancel).await.unwrap();

        assert_eq!(*seen.lock(), vec![TransitionPhase::Exiting]);
    }

    #[tokio::test]
    async fn test_suspendable_hooks_are_awaited() {
        struct Deferred;
        impl AsyncState<Vec<&'static str>> for Deferred {
            fn enter_async<'a>(
                &'a mut self,
                ctx: &'a mut Vec<&'static str>,
                _cancel: &'a CancellationToken,
            ) -> HookFuture<'a> {
                Box::pin(async move {
                    tokio::task::yield_now().await;
                    ctx.push("entered");
                    Ok(())
                })
            }
        }

        let mut info = StateInfo::new(StateHandler::suspendable(Deferred), PhaseChannel::new(16));
        let mut ctx = Vec::new();
        let cancel = CancellationToken::new();

        enter(&mut info, &mut ctx, &cancel).await.unwrap();
        assert_eq!(ctx, vec!["entered"]);
    }

    #[tokio::test]
    async fn test_hook_failure_is_wrapped_with_hook_name() {
        struct Failing;
        impl State<()> for Failing {
            fn update(&mut self, _ctx: &mut (), _dt: Duration) -> HookResult {
                Err("tick failed".into())
            }
        }

        let mut info = StateInfo::new(StateHandler::sync(Failing), PhaseChannel::new(16));
        let cancel = CancellationToken::new();

        let err = update(&mut info, &mut (), Duration::from_millis(16), &cancel)
            .await
            .unwrap_err();
        match err {
            MachineError::Execution { hook, source } => {
                assert_eq!(hook, "update");
                assert_eq!(source.to_string(), "tick failed");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_update_publishes_no_phase() {
        let channel = PhaseChannel::new(16);
        let mut rx = channel.subscribe();
        let mut info = StateInfo::new(StateHandler::sync(crate::state::Idle), channel);
        let cancel = CancellationToken::new();

        update(&mut info, &mut (), Duration::ZERO, &cancel)
            .await
            .unwrap();
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }
}

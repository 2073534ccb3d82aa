use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use crate::backend::ExploitBackend;
use super::manager::SessionShared;
use super::state::SessionId;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollVerdict {
    Continue,
    Finished,
}

/// Owner side of a running poller. Dropping the handle cancels the task.
pub(crate) struct PollerHandle {
    token: CancellationToken,
}

impl PollerHandle {
    pub(crate) fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Poll `get_logs` for one session id until cancelled, the session is
/// dropped, or the session reaches a terminal state.
///
/// The first fetch happens immediately. The task only holds a weak
/// reference, and an in-flight fetch is abandoned as soon as the token fires.
pub(crate) fn spawn(
    session: Weak<SessionShared>,
    backend: Arc<dyn ExploitBackend>,
    session_id: SessionId,
    generation: u64,
    interval: Duration,
) -> PollerHandle {
    let token = CancellationToken::new();
    let cancel = token.clone();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let fetched = tokio::select! {
                _ = cancel.cancelled() => break,
                result = backend.get_logs(&session_id) => result,
            };

            let Some(shared) = session.upgrade() else { break };
            if cancel.is_cancelled() {
                break;
            }
            let verdict = match fetched {
                Ok(snapshot) => shared.apply_snapshot(&session_id, generation, snapshot).await,
                Err(e) => shared.record_poll_failure(&session_id, generation, &e).await,
            };
            drop(shared);

            if verdict == PollVerdict::Finished {
                break;
            }
        }
        debug!(session_id = %session_id, "Log poller exited");
    });

    PollerHandle { token }
}

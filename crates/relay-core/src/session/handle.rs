use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{SessionOutcome, SessionState};
use crate::cancel::CancellationToken;
use crate::{RelayError, Result};

/// Handle to a session running on a background task.
///
/// Dropping the handle does not stop the session; call [`cancel`](Self::cancel).
pub struct SessionHandle {
    id: Uuid,
    token: CancellationToken,
    state: watch::Receiver<SessionState>,
    task: JoinHandle<SessionOutcome>,
}

impl SessionHandle {
    pub(crate) fn new(
        id: Uuid,
        token: CancellationToken,
        state: watch::Receiver<SessionState>,
        task: JoinHandle<SessionOutcome>,
    ) -> Self {
        Self {
            id,
            token,
            state,
            task,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// A receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// The session's own token, for wiring into other cancellation sources.
    pub fn cancel_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Request an external stop. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the session's terminal outcome.
    pub async fn join(self) -> Result<SessionOutcome> {
        self.task
            .await
            .map_err(|e| RelayError::Other(format!("session task failed: {}", e)))
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

//! Cooperative cancellation shared by every batch task of one pipeline run.

use tokio_util::sync::CancellationToken;

/// A set-once flag readable from any task.
///
/// Clones share the same flag. Cancelling never interrupts a provider call
/// that is already running; it only stops new attempts from starting.
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    token: CancellationToken,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal tied to `parent`: cancelling the parent cancels this one, not
    /// the other way round.
    pub(crate) fn child_of(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
        }
    }

    /// Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the signal has been cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

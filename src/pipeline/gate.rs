//! Counting semaphore bounding in-flight provider calls.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::warn;

use super::CancellationSignal;
use crate::error::EmbeddingError;

pub const DEFAULT_MAX_CONCURRENCY: usize = 3;
pub const DEFAULT_GATE_TIMEOUT: Duration = Duration::from_secs(600);

/// A held slot. The slot is returned when the permit is dropped, so every
/// exit path (error, cancellation, panic unwinding) releases it.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    timeout: Duration,
}

impl ConcurrencyGate {
    pub fn new(capacity: usize, timeout: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            timeout,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a slot, failing with [`EmbeddingError::GateTimeout`] once the
    /// wait ceiling passes.
    pub async fn acquire(&self) -> Result<GatePermit, EmbeddingError> {
        let acquire = Arc::clone(&self.semaphore).acquire_owned();
        match tokio::time::timeout(self.timeout, acquire).await {
            Ok(Ok(permit)) => Ok(GatePermit { _permit: permit }),
            // the semaphore is never closed while the gate is alive
            Ok(Err(_)) => Err(EmbeddingError::Cancelled),
            Err(_) => {
                warn!(
                    timeout_secs = self.timeout.as_secs(),
                    "gave up waiting for a request slot"
                );
                Err(EmbeddingError::GateTimeout(self.timeout.as_secs()))
            }
        }
    }

    /// Like [`acquire`](Self::acquire) but returns `Ok(None)` as soon as the
    /// signal is cancelled while waiting.
    pub async fn acquire_unless_cancelled(
        &self,
        signal: &CancellationSignal,
    ) -> Result<Option<GatePermit>, EmbeddingError> {
        if signal.is_cancelled() {
            return Ok(None);
        }
        tokio::select! {
            biased;
            _ = signal.cancelled() => Ok(None),
            permit = self.acquire() => permit.map(Some),
        }
    }

    /// Give a slot back early. Dropping the permit does the same.
    pub fn release(&self, permit: GatePermit) {
        drop(permit);
    }
}

impl Default for ConcurrencyGate {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENCY, DEFAULT_GATE_TIMEOUT)
    }
}

//! Batched, concurrency-bounded, retrying embedding pipeline.
//!
//! A run plans the input into batches, sends each batch through the
//! provider under a [`ConcurrencyGate`] with [`RetryPolicy`] backoff, and
//! reassembles the outcomes so the output lines up with the input item for
//! item. Batches that fail or are cancelled yield zero vectors instead of
//! failing the whole run.

pub mod assembler;
mod cancel;
pub mod gate;
pub mod planner;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, error, info};

use crate::error::{EmbeddingError, PipelineError};
use crate::models::{Batch, BatchOutcome, EmbeddingResult, InputItem, ItemEmbedding};
use crate::providers::SharedEmbedder;
use crate::utils::retry::{RetryPolicy, RetryResult, with_retry};

pub use assembler::{BatchFailure, PipelineSummary, assemble, summarize};
pub use cancel::CancellationSignal;
pub use gate::{ConcurrencyGate, GatePermit};
pub use planner::plan;

/// Receives each batch outcome as soon as the batch finishes.
pub trait ProgressObserver: Send + Sync {
    fn on_batch_complete(&self, outcome: &BatchOutcome);
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    pub max_batch_size: usize,
    pub max_concurrency: usize,
    pub retry: RetryPolicy,
    pub gate_timeout: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_batch_size: 16,
            max_concurrency: gate::DEFAULT_MAX_CONCURRENCY,
            retry: RetryPolicy::default(),
            gate_timeout: gate::DEFAULT_GATE_TIMEOUT,
        }
    }
}

impl PipelineOptions {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.max_batch_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_batch_size must be at least 1".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.retry.initial_delay > self.retry.max_delay {
            return Err(PipelineError::InvalidConfig(
                "initial backoff must not exceed max backoff".to_string(),
            ));
        }
        Ok(())
    }
}

/// Ordered results of a run plus what happened to each batch.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub results: Vec<EmbeddingResult>,
    pub summary: PipelineSummary,
}

pub struct BatchEmbeddingPipeline {
    provider: SharedEmbedder,
    options: PipelineOptions,
    observer: Option<Arc<dyn ProgressObserver>>,
    /// Parent of every run's signal. `cancel` fires it and swaps in a fresh
    /// one so later runs start uncancelled.
    cancel_root: Mutex<CancellationToken>,
}

impl BatchEmbeddingPipeline {
    pub fn new(provider: SharedEmbedder, options: PipelineOptions) -> Result<Self, PipelineError> {
        options.validate()?;
        if provider.dimension() == 0 {
            return Err(PipelineError::InvalidConfig(
                "provider must declare a vector dimension of at least 1".to_string(),
            ));
        }
        Ok(Self {
            provider,
            options,
            observer: None,
            cancel_root: Mutex::new(CancellationToken::new()),
        })
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Cancel every run currently in progress on this pipeline.
    pub fn cancel(&self) {
        let mut root = self
            .cancel_root
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        root.cancel();
        *root = CancellationToken::new();
    }

    fn run_signal(&self) -> CancellationSignal {
        let root = self
            .cancel_root
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        CancellationSignal::child_of(&root)
    }

    /// Embed `texts`, one result per text in the same order.
    pub async fn embed(&self, texts: Vec<String>) -> Result<Vec<EmbeddingResult>, PipelineError> {
        Ok(self.run(InputItem::from_texts(texts)).await?.results)
    }

    /// Embed a single text, surfacing provider errors directly.
    pub async fn embed_one(&self, text: &str) -> Result<EmbeddingResult, PipelineError> {
        let batch = Batch {
            batch_index: 0,
            items: vec![InputItem::new(0, text)],
        };
        let mut vectors = self.provider.embed_batch(&batch).await?;
        if vectors.len() != 1 {
            return Err(EmbeddingError::ParseError(format!(
                "expected 1 embedding, got {}",
                vectors.len()
            ))
            .into());
        }
        let embedding = vectors.remove(0);
        Ok(EmbeddingResult {
            item_index: 0,
            vector: embedding.vector,
            token_count: embedding.token_count,
        })
    }

    pub async fn run(&self, items: Vec<InputItem>) -> Result<PipelineReport, PipelineError> {
        let signal = self.run_signal();
        self.run_with_signal(items, &signal).await
    }

    /// Run under a caller-owned signal. Cancelling it affects only this run;
    /// [`cancel`](Self::cancel) does not reach it.
    pub async fn run_with_signal(
        &self,
        items: Vec<InputItem>,
        signal: &CancellationSignal,
    ) -> Result<PipelineReport, PipelineError> {
        if items.is_empty() {
            return Ok(PipelineReport {
                results: Vec::new(),
                summary: PipelineSummary::default(),
            });
        }
        if let Some((position, item)) = items.iter().enumerate().find(|(i, item)| item.index != *i)
        {
            return Err(PipelineError::InvalidInput(format!(
                "item at position {position} has index {}",
                item.index
            )));
        }

        let total_items = items.len();
        let batches = plan(&items, self.options.max_batch_size);

        let outcomes = if batches.len() == 1 {
            self.run_single(&batches[0], signal).await
        } else {
            self.run_concurrent(&batches, signal).await
        };

        let summary = summarize(&batches, &outcomes, total_items);
        info!(
            items = summary.total_items,
            batches = summary.total_batches,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            attempts = summary.total_attempts,
            "embedding run finished"
        );

        let results = assemble(&batches, outcomes, total_items, self.provider.dimension());
        Ok(PipelineReport { results, summary })
    }

    /// Everything fits in one request: call the provider once, no gate and
    /// no retries.
    async fn run_single(
        &self,
        batch: &Batch,
        signal: &CancellationSignal,
    ) -> HashMap<usize, BatchOutcome> {
        let outcome = if signal.is_cancelled() {
            BatchOutcome::Skipped {
                batch_index: batch.batch_index,
            }
        } else {
            match embed_checked(&self.provider, batch).await {
                Ok(vectors) => BatchOutcome::Success {
                    batch_index: batch.batch_index,
                    vectors,
                    attempts: 1,
                },
                Err(last_error) => {
                    error!(batch = batch.batch_index, error = %last_error, "batch failed");
                    BatchOutcome::Failed {
                        batch_index: batch.batch_index,
                        last_error,
                        attempts: 1,
                        cancelled: false,
                    }
                }
            }
        };
        if let Some(observer) = &self.observer {
            observer.on_batch_complete(&outcome);
        }
        HashMap::from([(batch.batch_index, outcome)])
    }

    async fn run_concurrent(
        &self,
        batches: &[Batch],
        signal: &CancellationSignal,
    ) -> HashMap<usize, BatchOutcome> {
        let gate = ConcurrencyGate::new(self.options.max_concurrency, self.options.gate_timeout);
        let mut join_set = JoinSet::new();

        for batch in batches {
            let batch = batch.clone();
            let provider = Arc::clone(&self.provider);
            let gate = gate.clone();
            let signal = signal.clone();
            let policy = self.options.retry.clone();
            let observer = self.observer.clone();
            let span = debug_span!("batch", batch = batch.batch_index, items = batch.len());

            join_set.spawn(
                async move {
                    let outcome = run_batch(&provider, &gate, &signal, &policy, &batch).await;
                    if let Some(observer) = observer {
                        observer.on_batch_complete(&outcome);
                    }
                    outcome
                }
                .instrument(span),
            );
        }

        let mut outcomes = HashMap::with_capacity(batches.len());
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(outcome) => {
                    outcomes.insert(outcome.batch_index(), outcome);
                }
                Err(e) => error!(error = %e, "batch task did not finish"),
            }
        }

        // a panicked task leaves no outcome; account for it as a failure
        for batch in batches {
            outcomes
                .entry(batch.batch_index)
                .or_insert_with(|| BatchOutcome::Failed {
                    batch_index: batch.batch_index,
                    last_error: EmbeddingError::TaskFailed("batch task panicked".to_string()),
                    attempts: 0,
                    cancelled: false,
                });
        }

        outcomes
    }
}

/// One provider call whose output must tag every batch position exactly once.
async fn embed_checked(
    provider: &SharedEmbedder,
    batch: &Batch,
) -> Result<Vec<ItemEmbedding>, EmbeddingError> {
    let vectors = provider.embed_batch(batch).await?;
    if vectors.len() != batch.len() {
        return Err(EmbeddingError::ParseError(format!(
            "expected {} embeddings, got {}",
            batch.len(),
            vectors.len()
        )));
    }
    let mut seen = vec![false; batch.len()];
    for embedding in &vectors {
        match seen.get_mut(embedding.item_index) {
            Some(slot) if !*slot => *slot = true,
            _ => {
                return Err(EmbeddingError::ParseError(format!(
                    "embedding tagged with invalid or repeated position {}",
                    embedding.item_index
                )));
            }
        }
    }
    Ok(vectors)
}

/// Drive one batch from `Pending` to a terminal outcome.
async fn run_batch(
    provider: &SharedEmbedder,
    gate: &ConcurrencyGate,
    signal: &CancellationSignal,
    policy: &RetryPolicy,
    batch: &Batch,
) -> BatchOutcome {
    let batch_index = batch.batch_index;

    let permit = match gate.acquire_unless_cancelled(signal).await {
        Ok(Some(permit)) => permit,
        Ok(None) => {
            debug!("cancelled before start, skipping");
            return BatchOutcome::Skipped { batch_index };
        }
        Err(last_error) => {
            error!(error = %last_error, "batch failed");
            return BatchOutcome::Failed {
                batch_index,
                last_error,
                attempts: 0,
                cancelled: false,
            };
        }
    };

    if signal.is_cancelled() {
        gate.release(permit);
        debug!("cancelled before start, skipping");
        return BatchOutcome::Skipped { batch_index };
    }

    debug!("slot acquired");
    let result = with_retry(policy, Some(signal), |attempt| {
        debug!(attempt, "calling provider");
        embed_checked(provider, batch)
    })
    .await;
    gate.release(permit);

    match result {
        RetryResult::Success { value, attempts } => {
            debug!(attempts, "batch succeeded");
            BatchOutcome::Success {
                batch_index,
                vectors: value,
                attempts,
            }
        }
        RetryResult::Failed {
            last_error,
            attempts,
            cancelled,
        } => {
            error!(attempts, cancelled, error = %last_error, "batch failed");
            BatchOutcome::Failed {
                batch_index,
                last_error,
                attempts,
                cancelled,
            }
        }
    }
}

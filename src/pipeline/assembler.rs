//! Reassembles per-batch outcomes into one result per input item.

use std::collections::HashMap;
use std::ops::Range;

use serde::Serialize;
use tracing::error;

use crate::models::{Batch, BatchOutcome, EmbeddingResult};

/// Build the ordered output for a run.
///
/// The output always has `total_items` entries and `output[i].item_index == i`.
/// Items whose batch failed, was skipped, has no recorded outcome, or came
/// back malformed get an all-zero vector of `dimensions` floats.
pub fn assemble(
    batches: &[Batch],
    mut outcomes: HashMap<usize, BatchOutcome>,
    total_items: usize,
    dimensions: usize,
) -> Vec<EmbeddingResult> {
    let mut slots: Vec<Option<EmbeddingResult>> = vec![None; total_items];

    for batch in batches {
        let Some(BatchOutcome::Success { vectors, .. }) = outcomes.remove(&batch.batch_index)
        else {
            continue;
        };

        if vectors.len() != batch.len() {
            error!(
                batch = batch.batch_index,
                expected = batch.len(),
                got = vectors.len(),
                "provider returned the wrong number of vectors, using placeholders"
            );
            continue;
        }

        for embedding in vectors {
            // batch-local position -> global position
            let Some(item) = batch.items.get(embedding.item_index) else {
                error!(
                    batch = batch.batch_index,
                    local_index = embedding.item_index,
                    "vector tagged outside its batch, dropping it"
                );
                continue;
            };
            if let Some(slot) = slots.get_mut(item.index) {
                *slot = Some(EmbeddingResult {
                    item_index: item.index,
                    vector: embedding.vector,
                    token_count: embedding.token_count,
                });
            }
        }
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| slot.unwrap_or_else(|| EmbeddingResult::placeholder(index, dimensions)))
        .collect()
}

/// A batch that did not produce real vectors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchFailure {
    pub batch_index: usize,
    pub item_range: Range<usize>,
    /// `None` for skipped batches.
    pub error: Option<String>,
    pub attempts: u32,
    /// Retrying stopped because the run was cancelled.
    pub cancelled_during_retry: bool,
}

/// Aggregate view of one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineSummary {
    pub total_items: usize,
    pub total_batches: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total_attempts: u32,
    pub failures: Vec<BatchFailure>,
}

impl PipelineSummary {
    /// Every batch produced real vectors.
    pub fn is_complete(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }

    /// Items carrying placeholder vectors.
    pub fn placeholder_items(&self) -> usize {
        self.failures.iter().map(|f| f.item_range.len()).sum()
    }
}

pub fn summarize(
    batches: &[Batch],
    outcomes: &HashMap<usize, BatchOutcome>,
    total_items: usize,
) -> PipelineSummary {
    let mut summary = PipelineSummary {
        total_items,
        total_batches: batches.len(),
        ..Default::default()
    };

    for batch in batches {
        match outcomes.get(&batch.batch_index) {
            Some(BatchOutcome::Success { attempts, .. }) => {
                summary.succeeded += 1;
                summary.total_attempts += attempts;
            }
            Some(BatchOutcome::Failed {
                last_error,
                attempts,
                cancelled,
                ..
            }) => {
                summary.failed += 1;
                summary.total_attempts += attempts;
                summary.failures.push(BatchFailure {
                    batch_index: batch.batch_index,
                    item_range: batch.item_range(),
                    error: Some(last_error.to_string()),
                    attempts: *attempts,
                    cancelled_during_retry: *cancelled,
                });
            }
            Some(BatchOutcome::Skipped { .. }) | None => {
                summary.skipped += 1;
                summary.failures.push(BatchFailure {
                    batch_index: batch.batch_index,
                    item_range: batch.item_range(),
                    error: None,
                    attempts: 0,
                    cancelled_during_retry: false,
                });
            }
        }
    }

    summary
}

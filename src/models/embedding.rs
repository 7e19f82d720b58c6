//! Items, batches and results flowing through the embedding pipeline.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::EmbeddingError;

/// One input text and its position in the original request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputItem {
    pub index: usize,
    pub text: String,
}

impl InputItem {
    pub fn new(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
        }
    }

    /// Number the texts 0..n in the order given.
    pub fn from_texts<I, S>(texts: I) -> Vec<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        texts
            .into_iter()
            .enumerate()
            .map(|(index, text)| Self::new(index, text))
            .collect()
    }
}

/// A contiguous slice of the input sent as one provider request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub batch_index: usize,
    pub items: Vec<InputItem>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn texts(&self) -> Vec<String> {
        self.items.iter().map(|item| item.text.clone()).collect()
    }

    /// Global indices covered by this batch.
    pub fn item_range(&self) -> Range<usize> {
        match (self.items.first(), self.items.last()) {
            (Some(first), Some(last)) => first.index..last.index + 1,
            _ => 0..0,
        }
    }
}

/// A vector returned by a provider for one item of a batch.
///
/// Providers tag `item_index` with the position inside the batch; the
/// assembler translates it back to the global position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemEmbedding {
    pub item_index: usize,
    pub vector: Vec<f32>,
    pub token_count: u32,
}

/// Terminal state of one batch task.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    Success {
        batch_index: usize,
        vectors: Vec<ItemEmbedding>,
        attempts: u32,
    },
    Failed {
        batch_index: usize,
        last_error: EmbeddingError,
        attempts: u32,
        /// Retrying stopped because the run was cancelled.
        cancelled: bool,
    },
    /// Cancelled before any attempt was made.
    Skipped { batch_index: usize },
}

impl BatchOutcome {
    pub fn batch_index(&self) -> usize {
        match self {
            BatchOutcome::Success { batch_index, .. }
            | BatchOutcome::Failed { batch_index, .. }
            | BatchOutcome::Skipped { batch_index } => *batch_index,
        }
    }
}

/// Final per-item output; exactly one per input item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingResult {
    pub item_index: usize,
    pub vector: Vec<f32>,
    pub token_count: u32,
}

impl EmbeddingResult {
    /// All-zero stand-in for an item whose batch did not succeed.
    pub fn placeholder(item_index: usize, dimensions: usize) -> Self {
        Self {
            item_index,
            vector: vec![0.0; dimensions],
            token_count: 0,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.token_count == 0 && self.vector.iter().all(|v| *v == 0.0)
    }
}

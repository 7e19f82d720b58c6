//! Splits input items into provider-sized batches.

use crate::models::{Batch, InputItem};

/// Split `items` into contiguous batches of at most `max_batch_size` items.
///
/// `max_batch_size` of zero is treated as one; callers validate it earlier.
pub fn plan(items: &[InputItem], max_batch_size: usize) -> Vec<Batch> {
    items
        .chunks(max_batch_size.max(1))
        .enumerate()
        .map(|(batch_index, chunk)| Batch {
            batch_index,
            items: chunk.to_vec(),
        })
        .collect()
}

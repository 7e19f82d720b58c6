//! Text processing utilities.

/// Rough token estimate (~4 bytes per token).
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / 4
}

/// Per-text token counts for a batch.
///
/// Providers usually report one total for the whole request. When `total`
/// is known it is split across texts in proportion to their estimated size,
/// with the rounding remainder going to the last text; otherwise the
/// estimates are returned as-is. Non-empty texts always count at least one
/// token.
pub fn distribute_tokens(texts: &[String], total: Option<u32>) -> Vec<u32> {
    let estimates: Vec<u64> = texts
        .iter()
        .map(|t| {
            let estimate = estimate_tokens(t) as u64;
            if estimate == 0 && !t.is_empty() { 1 } else { estimate }
        })
        .collect();

    let Some(total) = total else {
        return estimates
            .into_iter()
            .map(|e| u32::try_from(e).unwrap_or(u32::MAX))
            .collect();
    };

    let sum: u64 = estimates.iter().sum();
    if texts.is_empty() {
        return Vec::new();
    }
    if sum == 0 {
        let mut counts = vec![0; texts.len()];
        if let Some(last) = counts.last_mut() {
            *last = total;
        }
        return counts;
    }

    let mut counts: Vec<u32> = estimates
        .iter()
        .map(|e| u32::try_from(u64::from(total) * e / sum).unwrap_or(u32::MAX))
        .collect();
    let assigned: u32 = counts.iter().sum();
    if let Some(last) = counts.last_mut() {
        *last += total.saturating_sub(assigned);
    }
    counts
}

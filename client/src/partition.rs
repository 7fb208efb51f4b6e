use shared::types::NonceRange;

/// Split `range` into `parts` contiguous chunks of `ceil(len / parts)` nonces.
///
/// Always returns `parts` entries (at least one). Trailing entries are `None`
/// when there are more parts than nonces; the last non-empty chunk is clamped
/// to `range.end`.
pub fn partition(range: NonceRange, parts: usize) -> Vec<Option<NonceRange>> {
    let parts = parts.max(1) as u128;
    let chunk = range.len().div_ceil(parts);
    let start = range.start as u128;
    let end = range.end as u128;

    (0..parts)
        .map(|i| {
            let lo = start + i * chunk;
            if lo > end {
                return None;
            }
            let hi = (lo + chunk - 1).min(end);
            // both bounds lie inside the original u64 range
            Some(NonceRange { start: lo as u64, end: hi as u64 })
        })
        .collect()
}

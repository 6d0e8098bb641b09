use thiserror::Error;

/// Resource-exhaustion and caller-contract errors.
///
/// Soft misses (unknown tag, double remove, stale pick result) are not
/// errors; they surface as `false`/`None`/sentinel returns on the
/// operations themselves. Violated internal invariants are debug
/// assertions, not variants here.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("slot pool is full (capacity {capacity}, no tombstones to reuse)")]
    GroupFull { capacity: usize },

    #[error("every group is full and growth is capped at {max_groups} groups")]
    SetExhausted { max_groups: usize },

    #[error("every page is full and growth is capped at {max_pages} pages")]
    PagesExhausted { max_pages: usize },

    #[error("batch slices disagree: {positions} positions, {labels} label transforms, {bitmaps} bitmaps")]
    MismatchedBatch {
        positions: usize,
        labels: usize,
        bitmaps: usize,
    },
}

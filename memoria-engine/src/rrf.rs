//! Reciprocal rank fusion.

/// `1 / (k + r)` for a 0-based rank `r` and constant `k`. Lower ranks (closer
/// to the top of a result list) score higher; `k` dampens the advantage of
/// rank 0 over rank 1 so a single subsystem can't dominate fusion just by
/// being first.
pub fn rrf(rank: usize, k: u32) -> f32 {
    1.0 / (k as f32 + rank as f32)
}

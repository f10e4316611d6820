//! Deterministic iteration scheduling: write vs verify, and pattern rotation.

use crate::core::types::{IoMode, IterationKind, PatternRotation};

/// Decide what iteration `iter` does under the given mode and cadence.
///
/// A `write_step` of zero is treated as one; config validation rejects it
/// before it can reach here.
pub fn iteration_kind(iter: u64, mode: IoMode, write_step: u64) -> IterationKind {
    match mode {
        IoMode::Write if iter % write_step.max(1) == 0 => IterationKind::Write,
        _ => IterationKind::Verify,
    }
}

/// Index into `patterns` for the write performed at iteration `iter`.
///
/// Returns `None` only for an empty pattern list.
pub fn pattern_index(
    iter: u64,
    write_step: u64,
    len: usize,
    rotation: PatternRotation,
) -> Option<usize> {
    if len == 0 {
        return None;
    }
    let len = len as u64;
    let index = match rotation {
        PatternRotation::RoundRobin => (iter / write_step.max(1)) % len,
        // (i % n) - 1, with -1 wrapping to the last element.
        PatternRotation::Legacy => (iter % len + len - 1) % len,
    };
    Some(index as usize)
}

/// Pattern to write at iteration `iter`.
pub fn select_pattern<'a>(
    patterns: &'a [String],
    iter: u64,
    write_step: u64,
    rotation: PatternRotation,
) -> Option<&'a str> {
    pattern_index(iter, write_step, patterns.len(), rotation).map(|idx| patterns[idx].as_str())
}

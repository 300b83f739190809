// SPDX-License-Identifier: MIT OR Apache-2.0

//! Minimal observability surface (spec.md §7 "Observability"): per-peer
//! counters plus an optional trace hook over raw framed bytes. No metrics
//! crate is introduced — none of the example repos pulls one in for a
//! library at this layer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Atomic request/retry/error counters for one peer's transaction engine.
#[derive(Debug, Default)]
pub struct Counters {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
    framing_errors: AtomicU64,
}

impl Counters {
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn framing_errors(&self) -> u64 {
        self.framing_errors.load(Ordering::Relaxed)
    }

    pub(crate) fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_framing_error(&self) {
        self.framing_errors.fetch_add(1, Ordering::Relaxed);
    }
}

/// One observed frame crossing the wire, handed to a [`TraceHook`].
#[derive(Debug, Clone, Copy)]
pub enum TraceEvent<'a> {
    Sent(&'a [u8]),
    Received(&'a [u8]),
}

/// A callback receiving raw framed bytes as they cross the wire, for
/// protocol-level debugging (spec.md §7 "Observability").
pub type TraceHook = Arc<dyn Fn(TraceEvent<'_>) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let counters = Counters::default();
        assert_eq!(counters.submitted(), 0);
        assert_eq!(counters.failed(), 0);
    }

    #[test]
    fn counters_accumulate() {
        let counters = Counters::default();
        counters.record_submitted();
        counters.record_succeeded();
        counters.record_retry();
        counters.record_retry();
        assert_eq!(counters.submitted(), 1);
        assert_eq!(counters.succeeded(), 1);
        assert_eq!(counters.retries(), 2);
    }
}

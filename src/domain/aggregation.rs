//! Aggregation & Debounce Buffer
//!
//! Opaque payloads are queued and flushed as one batch once no new payload
//! has arrived for the quiet period (trailing-edge debounce). Every append
//! cancels the pending flush timer and arms a new one; the timer carries the
//! generation it was armed for, so a timer that already woke up before being
//! cancelled finds a newer generation and backs off.

use std::time::Instant;
use tokio::task::JoinHandle;

/// Default quiet period before a batch is flushed
pub const DEFAULT_DEBOUNCE_MS: u64 = 300;

#[derive(Default)]
pub struct AggregationBuffer {
    queued: Vec<Vec<u8>>,
    last_arrival: Option<Instant>,
    generation: u64,
    pending_flush: Option<JoinHandle<()>>,
}

impl AggregationBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a payload and return the generation the next flush timer must carry
    pub fn push(&mut self, payload: Vec<u8>, arrived_at: Instant) -> u64 {
        self.queued.push(payload);
        self.last_arrival = Some(arrived_at);
        self.generation = self.generation.wrapping_add(1);
        self.generation
    }

    /// Replace the pending flush timer, cancelling the previous one
    pub fn arm(&mut self, timer: JoinHandle<()>) {
        if let Some(previous) = self.pending_flush.replace(timer) {
            previous.abort();
        }
    }

    /// Take the batch for a timer armed at `generation`.
    ///
    /// Returns `None` when a newer payload re-armed the timer in the meantime.
    pub fn take_if_current(&mut self, generation: u64) -> Option<Vec<Vec<u8>>> {
        if generation != self.generation {
            return None;
        }
        // The caller is the timer itself, dropping the handle does not cancel it
        self.pending_flush = None;
        Some(std::mem::take(&mut self.queued))
    }

    /// Take the batch immediately, cancelling any pending timer
    pub fn take(&mut self) -> Vec<Vec<u8>> {
        if let Some(timer) = self.pending_flush.take() {
            timer.abort();
        }
        self.generation = self.generation.wrapping_add(1);
        std::mem::take(&mut self.queued)
    }

    pub fn len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    pub fn last_arrival(&self) -> Option<Instant> {
        self.last_arrival
    }

    pub fn is_armed(&self) -> bool {
        self.pending_flush.is_some()
    }
}

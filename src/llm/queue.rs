//! Process-wide LLM request admission queue.
//!
//! All outbound LLM calls traverse a single queue that provides back-pressure:
//! callers block until a slot is available, and slots are granted in
//! first-come-first-served order. A bounded `tokio::sync::Semaphore` gives us
//! exactly this — FIFO waiters, no busy-polling — which is the same
//! admission-control shape used elsewhere in this codebase for bounding
//! concurrent subagent fan-out.

use std::sync::Arc;

use tokio::sync::{Semaphore, SemaphorePermit};

/// Guards concurrent access to the LLM backend. One process-wide instance is
/// shared by every agent loop.
pub struct LlmRequestQueue {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl LlmRequestQueue {
    /// `capacity` is the maximum number of LLM requests in flight at once.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { semaphore: Arc::new(Semaphore::new(capacity)), capacity }
    }

    /// Block until a slot is available, then return a permit. Dropping the
    /// permit releases the slot.
    pub async fn admit(&self) -> SemaphorePermit<'_> {
        // A closed semaphore (never happens here — we never call `close`)
        // would make this panic; the queue lives for the process lifetime.
        self.semaphore
            .acquire()
            .await
            .expect("llm request queue semaphore closed unexpectedly")
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of requests currently admitted (in flight).
    pub fn in_flight(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }
}

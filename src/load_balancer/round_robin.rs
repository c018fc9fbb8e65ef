// src/load_balancer/round_robin.rs
use std::sync::atomic::{AtomicUsize, Ordering};

/// Round-robin cursor with liveness skipping.
///
/// Every liveness check claims its own slot with a single `fetch_add`, so concurrent
/// callers never observe the same index and a dead candidate is never
/// re-examined within one call. A call checks at most `pool.len()` slots.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(start: usize) -> Self {
        Self {
            counter: AtomicUsize::new(start),
        }
    }

    /// Returns the index of the next live entry, or `None` once every slot
    /// has been checked without finding one.
    pub fn next<T>(&self, pool: &[T], is_alive: impl Fn(&T) -> bool) -> Option<usize> {
        let len = pool.len();

        for _ in 0..len {
            let index = self.counter.fetch_add(1, Ordering::Relaxed) % len;
            if is_alive(&pool[index]) {
                return Some(index);
            }
        }
        None
    }

    pub fn position(&self) -> usize {
        self.counter.load(Ordering::Relaxed)
    }
}

//! Seeded sleep intervals inserted after every open attempt.
//!
//! The run seed initializes one ChaCha generator before any fork; each worker
//! reads the stream selected by its ordinal, so a worker's sequence depends
//! only on `(seed, ordinal)`.

use std::ops::RangeInclusive;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Seeded generator shared (by copy) across all workers of a run
#[derive(Debug, Clone)]
pub struct JitterSource {
    base: ChaCha8Rng,
    range_ms: RangeInclusive<u64>,
}

impl JitterSource {
    pub fn new(seed: u64, range_ms: RangeInclusive<u64>) -> Self {
        let (lo, hi) = (*range_ms.start(), *range_ms.end());
        Self {
            base: ChaCha8Rng::seed_from_u64(seed),
            range_ms: lo.min(hi)..=lo.max(hi),
        }
    }

    /// Independent stream for worker `ordinal`
    pub fn stream(&self, ordinal: usize) -> Jitter {
        let mut rng = self.base.clone();
        rng.set_stream(ordinal as u64);
        Jitter {
            rng,
            range_ms: self.range_ms.clone(),
        }
    }
}

/// One worker's jitter stream
#[derive(Debug, Clone)]
pub struct Jitter {
    rng: ChaCha8Rng,
    range_ms: RangeInclusive<u64>,
}

impl Jitter {
    /// Draw the next interval without sleeping
    pub fn next_delay(&mut self) -> Duration {
        Duration::from_millis(self.rng.gen_range(self.range_ms.clone()))
    }

    /// Draw the next interval and sleep for it
    pub fn pause(&mut self) -> Duration {
        let delay = self.next_delay();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        delay
    }
}

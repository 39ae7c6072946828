//! Monotonic time source.
//!
//! A [`Clock`] samples a replaceable source function, stores the result as a
//! quantised atomic tick, and hands the raw epoch to the caller. Workers read
//! the stored tick without touching the source. Replacing the source (for
//! simulated or compressed time) changes nothing else about the runtime.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Default tick quantisation, in seconds (1 µs).
pub const DEFAULT_QUANTISATION_S: f64 = 1e-6;

/// Monotonic, quantised time source.
pub struct Clock {
    ticks: AtomicU64,
    quantisation_s: f64,
    now_fn: Box<dyn Fn() -> f64 + Send + Sync>,
}

impl Clock {
    /// Creates a clock over monotonic wall time, rebased so the epoch is zero
    /// at construction.
    #[must_use]
    pub fn new() -> Self {
        let start = Instant::now();
        Self::with_source(move || start.elapsed().as_secs_f64())
    }

    /// Creates a clock over a custom source returning epoch seconds. The
    /// source must be monotonic.
    pub fn with_source<F>(now_fn: F) -> Self
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        Self {
            ticks: AtomicU64::new(0),
            quantisation_s: DEFAULT_QUANTISATION_S,
            now_fn: Box::new(now_fn),
        }
    }

    /// Sets the tick quantisation in seconds.
    #[must_use]
    pub fn with_quantisation(mut self, quantisation_s: f64) -> Self {
        self.quantisation_s = quantisation_s;
        self
    }

    /// Samples the source, stores the quantised tick, and returns the raw
    /// epoch in seconds.
    pub fn update(&self) -> f64 {
        let now = (self.now_fn)();
        let tick = (now / self.quantisation_s) as u64;
        self.ticks.store(tick, Ordering::Release);
        now
    }

    /// Returns the epoch of the most recent [`update`](Self::update), in
    /// seconds, to tick resolution.
    #[must_use]
    pub fn epoch(&self) -> f64 {
        self.ticks.load(Ordering::Acquire) as f64 * self.quantisation_s
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clock")
            .field("epoch", &self.epoch())
            .field("quantisation_s", &self.quantisation_s)
            .finish_non_exhaustive()
    }
}

use std::time::Instant;

/// Helper that periodically logs progress over long grid sweeps.
#[derive(Debug, Clone, Copy)]
pub struct Tick {
    start: Instant,
    last: Instant,
    every: usize,
}

impl Tick {
    /// Create a new `Tick` that will trigger at most once per `every` items.
    #[inline]
    pub fn new(every: usize) -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last: now,
            every: every.max(1),
        }
    }

    /// Returns `true` when the supplied `count` is a multiple of `every` **and**
    /// at least 200 ms have elapsed since the previous log.
    #[inline]
    pub fn should(&mut self, count: usize) -> bool {
        const MIN_INTERVAL: std::time::Duration = std::time::Duration::from_millis(200);
        count % self.every == 0 && self.last.elapsed() >= MIN_INTERVAL
    }

    /// Record the current instant as the time of the latest log.
    #[inline]
    pub fn bump(&mut self) {
        self.last = Instant::now();
    }

    /// Compute the processing rate in million items per second.
    #[inline]
    pub fn rate_mps(&self, count: usize) -> f64 {
        const ONE_MILLION: f64 = 1_000_000.0;

        let elapsed = self.start.elapsed().as_secs_f64().max(1e-9);

        (count as f64) / ONE_MILLION / elapsed
    }
}

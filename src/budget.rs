//! Wall-clock and iteration budgets for bounded passes.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct Budget {
    started: Instant,
    limit: Duration,
    max_iterations: Option<u64>,
    iterations: u64,
}

impl Budget {
    pub fn new(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit,
            max_iterations: None,
            iterations: 0,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u64) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    /// Counts one unit of work. Returns `false` once the budget is spent.
    pub fn tick(&mut self) -> bool {
        if self.exhausted() {
            return false;
        }
        self.iterations += 1;
        true
    }

    pub fn exhausted(&self) -> bool {
        self.started.elapsed() >= self.limit
            || self.max_iterations.is_some_and(|max| self.iterations >= max)
    }

    /// True only when the clock, not the iteration cap, ran out.
    pub fn timed_out(&self) -> bool {
        self.started.elapsed() >= self.limit
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

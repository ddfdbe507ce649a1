//! Sliding-window log of dispatch instants

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Instants at which calls were actually dispatched, trimmed to the trailing window
///
/// The owner asks `delay_until_admit` before each dispatch and calls `record`
/// only when admission was granted, which keeps the count of entries younger
/// than the window at or below the budget.
#[derive(Debug, Clone)]
pub struct RequestLog {
    window: Duration,
    budget: usize,
    times: VecDeque<Instant>,
}

impl RequestLog {
    pub fn new(window: Duration, budget: u32) -> Self {
        debug!(?window, budget, "RequestLog::new: called");
        Self {
            window,
            budget: budget as usize,
            times: VecDeque::new(),
        }
    }

    /// Drop entries that are a full window old or older
    pub fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.times.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                self.times.pop_front();
            } else {
                break;
            }
        }
    }

    /// How long to wait before a dispatch at `now` would fit the budget
    ///
    /// `None` means admit now. Otherwise the wait runs until the oldest counted
    /// entry leaves the window, plus `guard`.
    pub fn delay_until_admit(&mut self, now: Instant, guard: Duration) -> Option<Duration> {
        self.prune(now);
        if self.times.len() < self.budget {
            return None;
        }
        let oldest = *self.times.front()?;
        let age = now.saturating_duration_since(oldest);
        Some(self.window.saturating_sub(age) + guard)
    }

    pub fn record(&mut self, now: Instant) {
        self.times.push_back(now);
    }

    /// Dispatches still inside the window at `now`
    pub fn in_window(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.times.len()
    }
}

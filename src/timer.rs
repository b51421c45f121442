use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Draws a timeout uniformly from `[min_ms, max_ms)`.
pub fn randomized_election_timeout(min_ms: u64, max_ms: u64) -> Duration {
    let ms = rand::thread_rng().gen_range(min_ms..max_ms);
    Duration::from_millis(ms)
}

/// Single-shot election deadline. Lives inside the node record, so arming
/// happens under the node lock; the control loop is told through `rearmed`
/// that any deadline it was sleeping towards is void.
#[derive(Debug)]
pub struct ElectionTimer {
    min_ms: u64,
    max_ms: u64,
    due: Instant,
    rearmed: Arc<Notify>,
}

impl ElectionTimer {
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        ElectionTimer {
            min_ms,
            max_ms,
            due: Instant::now() + randomized_election_timeout(min_ms, max_ms),
            rearmed: Arc::new(Notify::new()),
        }
    }

    /// Cancels the pending deadline and schedules a fresh randomized one.
    pub fn arm(&mut self) {
        self.due = Instant::now() + randomized_election_timeout(self.min_ms, self.max_ms);
        self.rearmed.notify_one();
    }

    pub fn due(&self) -> Instant {
        self.due
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.due
    }

    pub fn rearmed(&self) -> Arc<Notify> {
        Arc::clone(&self.rearmed)
    }
}

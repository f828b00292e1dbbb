use std::time::Duration;

use tokio::time::Instant;

/// Fixed heartbeat period of a leader.
#[derive(Clone, Debug)]
pub struct ReplicationTimer {
    heartbeat_interval: Duration,
    heartbeat_deadline: Instant,
}

impl ReplicationTimer {
    pub fn new(heartbeat_interval_ms: u64) -> Self {
        let heartbeat_interval = Duration::from_millis(heartbeat_interval_ms);
        Self {
            heartbeat_interval,
            heartbeat_deadline: Instant::now() + heartbeat_interval,
        }
    }

    pub fn reset(&mut self) {
        self.heartbeat_deadline = Instant::now() + self.heartbeat_interval;
    }

    pub fn next_deadline(&self) -> Instant {
        self.heartbeat_deadline
    }

    pub fn is_expired(&self) -> bool {
        self.heartbeat_deadline <= Instant::now()
    }
}

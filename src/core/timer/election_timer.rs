use rand::Rng;
use tokio::time::Duration;
use tokio::time::Instant;

/// Randomized election deadline.
#[derive(Clone, Debug)]
pub struct ElectionTimer {
    next_deadline: Instant,
    timeout_range: (u64, u64),
}

impl ElectionTimer {
    /// @param: timeout_range: (election_timeout_min, election_timeout_max), in ms
    pub fn new(timeout_range: (u64, u64)) -> Self {
        let (min, max) = timeout_range;
        Self {
            next_deadline: Instant::now() + Self::random_duration(min, max),
            timeout_range,
        }
    }

    pub fn reset(&mut self) {
        let (min, max) = self.timeout_range;
        self.next_deadline = Instant::now() + Self::random_duration(min, max);
    }

    /// Uniform in `[min, max)`
    pub fn random_duration(
        min: u64,
        max: u64,
    ) -> Duration {
        let mut rng = rand::thread_rng();
        let timeout = if max > min { rng.gen_range(min..max) } else { min };
        Duration::from_millis(timeout)
    }

    pub fn next_deadline(&self) -> Instant {
        self.next_deadline
    }

    pub fn is_expired(&self) -> bool {
        self.next_deadline <= Instant::now()
    }
}

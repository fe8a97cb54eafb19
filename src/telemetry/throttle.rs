//! Rate limit for repeated log lines, keyed by (phase, key).

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

pub struct LogThrottle {
    min_interval: Duration,
    last: Mutex<HashMap<(&'static str, String), Instant>>,
}

impl LogThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(HashMap::new()),
        }
    }

    /// True if a line for (phase, key) may be emitted now. Allowed lines
    /// restart the interval; suppressed ones do not.
    pub fn allow(&self, phase: &'static str, key: &str) -> bool {
        let now = Instant::now();
        let mut last = self.last.lock();
        match last.get_mut(&(phase, key.to_string())) {
            Some(at) if now.saturating_duration_since(*at) < self.min_interval => false,
            Some(at) => {
                *at = now;
                true
            }
            None => {
                last.insert((phase, key.to_string()), now);
                true
            }
        }
    }
}

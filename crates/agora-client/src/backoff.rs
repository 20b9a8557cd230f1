use std::time::Duration;

use rand::Rng;

/// Reconnect delays: exponential growth with ±30% jitter, capped.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
    current: Duration,
    attempt: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            multiplier: 2.0,
            jitter: 0.3,
            current: initial,
            attempt: 0,
        }
    }

    /// Failed attempts since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay before the next attempt. Each call grows the base delay.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.attempt += 1;
        self.current = base.mul_f64(self.multiplier).min(self.max);

        let factor = 1.0 + rand::rng().random_range(-self.jitter..=self.jitter);
        base.mul_f64(factor).min(self.max)
    }

    /// Call after a successful handshake.
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempt = 0;
    }
}

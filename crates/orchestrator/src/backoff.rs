use std::time::Duration;

/// Delay schedule for retrying failed matches.
///
/// `delay_for_attempt` is stateless so a persisted attempt counter can be
/// turned into a delay; `next_delay` walks the same schedule in memory.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    current_attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            multiplier: 2.0,
            current_attempt: 0,
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Delay after the `attempt`-th consecutive failure (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return self.initial.min(self.max);
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let delay_secs = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        let delay_secs = delay_secs.min(self.max.as_secs_f64());
        Duration::from_secs_f64(delay_secs)
    }

    pub fn next_delay(&mut self) -> Duration {
        self.current_attempt += 1;
        self.delay_for_attempt(self.current_attempt)
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }

    pub fn current_attempt(&self) -> u32 {
        self.current_attempt
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600), Duration::from_secs(604_800)) // 1 hour .. 1 week
    }
}

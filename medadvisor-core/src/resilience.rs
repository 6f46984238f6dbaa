// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Retry policy with exponential backoff and jitter.

use crate::config::RetryConfig;
use rand::random;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn exponential() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }

    /// Single attempt, no backoff
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Delay before retry number `attempt + 1` (0-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let jitter_factor = 1.0 + (random::<f64>() - 0.5) * 2.0 * self.jitter;
        let jittered = (base * jitter_factor).max(0.0);
        let clamped = jittered.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(clamped)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
            jitter: config.jitter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_and_clamps() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::exponential()
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(2));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = RetryPolicy::exponential();
        for _ in 0..100 {
            let d = policy.delay_for_attempt(0).as_secs_f64();
            assert!((0.089..=0.111).contains(&d), "delay {} out of bounds", d);
        }
    }

    #[test]
    fn test_from_config() {
        let config = RetryConfig {
            max_attempts: 0,
            ..RetryConfig::default()
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.initial_delay, Duration::from_millis(100));
    }
}

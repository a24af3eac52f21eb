//! Delay schedules between status probes and mutation retries.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Growth of the delay between consecutive attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Constant delay.
    #[default]
    Fixed,
    /// Delay grows by the base interval each attempt.
    Linear,
    /// Delay doubles each attempt.
    Exponential,
}

impl Backoff {
    /// Returns the delay before retry number `attempt` (zero-based), capped at `max`.
    #[must_use]
    pub fn delay(self, base: Duration, attempt: u32, max: Duration) -> Duration {
        let delay = match self {
            Self::Fixed => base,
            Self::Linear => base.saturating_mul(attempt.saturating_add(1)),
            Self::Exponential => base.saturating_mul(2_u32.saturating_pow(attempt.min(31))),
        };
        delay.min(max)
    }
}

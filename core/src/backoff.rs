//! Delay between reconnect attempts
//!
//! Two shapes share the same state machine: a fixed delay, or an
//! exponential one with a cap:
//!
//! ```text
//! delay[n] = min(base * factor^(n-1), cap)
//! ```
//!
//! With the defaults (base 1 s, factor 2, cap 60 s) the sequence is
//! 1, 2, 4, 8, 16, 32, 60, 60, ... seconds. Integer arithmetic saturates, so
//! large attempt counts simply stay at the cap.

/// How long to wait before the next attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BackoffPolicy {
    Fixed { delay_ms: u32 },
    Exponential { base_ms: u32, factor: u32, cap_ms: u32 },
}

impl BackoffPolicy {
    /// One second between every attempt
    pub const FIXED_DEFAULT: Self = Self::Fixed { delay_ms: 1_000 };

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_ms(&self, attempt: u32) -> u32 {
        match *self {
            Self::Fixed { delay_ms } => delay_ms,
            Self::Exponential {
                base_ms,
                factor,
                cap_ms,
            } => {
                let mut delay = base_ms.min(cap_ms);
                if factor <= 1 {
                    return delay;
                }
                for _ in 1..attempt {
                    if delay >= cap_ms {
                        break;
                    }
                    delay = delay.saturating_mul(factor).min(cap_ms);
                }
                delay
            }
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::Exponential {
            base_ms: 1_000,
            factor: 2,
            cap_ms: 60_000,
        }
    }
}

/// Backoff controller: counts retries since the last success
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    pub const fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Advance to the next retry and return how long to sleep first.
    pub fn next_delay_ms(&mut self) -> u32 {
        self.attempt = self.attempt.saturating_add(1);
        self.policy.delay_ms(self.attempt)
    }

    /// Back to the initial delay, after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

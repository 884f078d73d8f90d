//! Bounded retry with exponential backoff for transfers.

use crate::errors::CeremonyError;

use serde::{Deserialize, Serialize};
use std::{future::Future, time::Duration};
use tracing::{debug, warn};

/// How a failed attempt should be treated.
#[derive(Debug)]
pub enum Failure {
    /// Worth another attempt, e.g. a dropped connection or a 5xx response.
    Transient(CeremonyError),
    /// Retrying cannot help, e.g. an expired grant or a 404.
    Permanent(CeremonyError),
}

impl Failure {
    pub fn into_inner(self) -> CeremonyError {
        match self {
            Failure::Transient(error) | Failure::Permanent(error) => error,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "milliseconds")]
    pub base_delay: Duration,
    pub multiplier: f64,
    #[serde(with = "milliseconds")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// A policy that retries immediately, for tests and local transfers.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_millis(0),
            multiplier: 1.0,
            max_delay: Duration::from_millis(0),
        }
    }

    /// Returns the pause after the given failed attempt (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let seconds = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let ceiling = self.max_delay.as_secs_f64();
        match seconds.is_finite() && seconds < ceiling {
            true => Duration::from_secs_f64(seconds.max(0.0)),
            false => self.max_delay,
        }
    }
}

///
/// Runs `operation` until it succeeds, fails permanently or exhausts the policy.
///
/// The operation receives the 1-based attempt number. Permanent failures are
/// returned as they are; exhaustion turns the last transient failure into
/// `TransferFailed`.
///
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut operation: F) -> Result<T, CeremonyError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, Failure>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", label, attempt);
                }
                return Ok(value);
            }
            Err(Failure::Permanent(error)) => return Err(error),
            Err(Failure::Transient(error)) if attempt >= max_attempts => {
                return Err(CeremonyError::TransferFailed {
                    label: label.to_string(),
                    attempts: attempt,
                    last_error: error.to_string(),
                });
            }
            Err(Failure::Transient(error)) => {
                let delay = policy.delay(attempt);
                warn!(
                    "{} failed on attempt {}/{} ({}), retrying in {:?}",
                    label, attempt, max_attempts, error, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

mod milliseconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

//! Retry as an `Around` advice, with fixed or caller-supplied delays

use crate::error::WeaverError;
use crate::intercept::advice::{Advice, JoinPoint, Outcome, Proceed};
use crate::metrics::METRICS;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Tag name whose `max_attempts` / `delay_ms` attributes override the advice
pub const RETRY_TAG: &str = "Retry";

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_DELAY: Duration = Duration::from_millis(1000);

/// Wait between two attempts
#[derive(Clone)]
pub enum RetryDelay {
    Fixed(Duration),
    /// Called with the 1-based number of the attempt that just failed
    Custom(Arc<dyn Fn(u32) -> Duration + Send + Sync>),
}

impl RetryDelay {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        RetryDelay::Custom(Arc::new(f))
    }

    pub fn for_attempt(&self, attempt: u32) -> Duration {
        match self {
            RetryDelay::Fixed(delay) => *delay,
            RetryDelay::Custom(f) => f(attempt),
        }
    }
}

impl std::fmt::Debug for RetryDelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryDelay::Fixed(delay) => f.debug_tuple("Fixed").field(delay).finish(),
            RetryDelay::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Repeats the wrapped call until it succeeds or attempts run out
#[derive(Debug, Clone)]
pub struct RetryAdvice {
    max_attempts: u32,
    delay: RetryDelay,
}

impl Default for RetryAdvice {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, RetryDelay::Fixed(DEFAULT_DELAY))
    }
}

impl RetryAdvice {
    pub fn new(max_attempts: u32, delay: RetryDelay) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::new(max_attempts, RetryDelay::Fixed(delay))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Effective attempts and delay for this join point, tag attributes first
    fn settings_for(&self, jp: &JoinPoint<'_>) -> (u32, RetryDelay) {
        let tag = jp.tag(RETRY_TAG);
        let attempts = tag
            .and_then(|t| t.attr_u64("max_attempts"))
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
            .unwrap_or(self.max_attempts)
            .max(1);
        let delay = tag
            .and_then(|t| t.attr_u64("delay_ms"))
            .map(|ms| RetryDelay::Fixed(Duration::from_millis(ms)))
            .unwrap_or_else(|| self.delay.clone());
        (attempts, delay)
    }

    /// Run `proceed` under this retry policy
    pub fn run(&self, jp: &JoinPoint<'_>, proceed: Proceed<'_>) -> Outcome {
        let (max_attempts, delay) = self.settings_for(jp);
        let operation = jp.id();
        let mut attempt = 0;

        loop {
            attempt += 1;
            METRICS.record_retry_attempt(&operation);

            match proceed.call() {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(
                            operation = %operation,
                            attempt = attempt,
                            "operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) if attempt < max_attempts => {
                    let wait = delay.for_attempt(attempt);
                    warn!(
                        operation = %operation,
                        attempt = attempt,
                        max_attempts = max_attempts,
                        delay_ms = wait.as_millis() as u64,
                        error = %err,
                        "retrying operation after delay"
                    );
                    if !wait.is_zero() {
                        std::thread::sleep(wait);
                    }
                }
                Err(err) => {
                    warn!(
                        operation = %operation,
                        attempts = attempt,
                        error = %err,
                        "retry attempts exhausted"
                    );
                    return Err(WeaverError::retry_exhausted(operation, attempt, err).into());
                }
            }
        }
    }

    /// Wrap as a named `Around` advice
    pub fn into_advice(self, name: impl Into<String>) -> Advice {
        Advice::around(name, move |jp, proceed| self.run(jp, proceed))
    }
}

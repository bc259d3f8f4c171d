//! Retry policy for commit calls.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// How the wait between commit attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Doubles after every failed attempt.
    #[default]
    Exponential,
    /// Grows by the base delay after every failed attempt.
    Linear,
    /// Always waits the base delay.
    Constant,
}

/// How much randomness is mixed into each wait.
///
/// Committers of one pipeline tend to fail together when the log is
/// unavailable; jitter keeps their retries apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// Waits exactly the backoff delay.
    None,
    /// Waits anywhere between zero and the backoff delay.
    #[default]
    Full,
    /// Waits half the backoff delay plus up to another half.
    Equal,
    /// Waits between the base delay and three times the previous wait.
    Decorrelated,
}

/// Retry policy applied to each partition's commit call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per commit call, the first one included.
    pub max_attempts: usize,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound of any delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Growth of the delay between attempts.
    pub backoff: BackoffStrategy,
    /// Randomness added to each delay.
    pub jitter: JitterStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 5000,
            backoff: BackoffStrategy::Exponential,
            jitter: JitterStrategy::Full,
        }
    }
}

impl RetryConfig {
    /// Creates the default policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the attempts per commit call.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the delay before the first retry.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter = strategy;
        self
    }

    /// Starts a fresh delay schedule for one commit call.
    #[must_use]
    pub fn backoff(&self) -> Backoff<'_> {
        Backoff {
            config: self,
            retries: 0,
            previous_ms: self.base_delay_ms,
        }
    }

    /// The capped delay before retry number `retry` (zero-based), before
    /// jitter.
    #[must_use]
    pub fn ceiling(&self, retry: u32) -> Duration {
        let base = self.base_delay_ms;
        let millis = match self.backoff {
            BackoffStrategy::Exponential => base.saturating_mul(2u64.saturating_pow(retry)),
            BackoffStrategy::Linear => base.saturating_mul(u64::from(retry) + 1),
            BackoffStrategy::Constant => base,
        };
        Duration::from_millis(millis.min(self.max_delay_ms))
    }
}

/// The delays of one commit call's retries.
#[derive(Debug, Clone)]
pub struct Backoff<'a> {
    config: &'a RetryConfig,
    retries: u32,
    previous_ms: u64,
}

impl Backoff<'_> {
    /// Retries handed out so far.
    #[must_use]
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// The wait before the next retry.
    pub fn next_delay(&mut self) -> Duration {
        let ceiling = u64::try_from(self.config.ceiling(self.retries).as_millis()).unwrap_or(u64::MAX);
        self.retries = self.retries.saturating_add(1);

        let mut rng = rand::thread_rng();
        let millis = match self.config.jitter {
            JitterStrategy::None => ceiling,
            JitterStrategy::Full => rng.gen_range(0..=ceiling),
            JitterStrategy::Equal => ceiling / 2 + rng.gen_range(0..=ceiling - ceiling / 2),
            JitterStrategy::Decorrelated => {
                let floor = self.config.base_delay_ms.min(self.config.max_delay_ms);
                let upper = self.previous_ms.saturating_mul(3).min(self.config.max_delay_ms);
                let wait = if upper <= floor { floor } else { rng.gen_range(floor..=upper) };
                self.previous_ms = wait;
                wait
            }
        };
        Duration::from_millis(millis)
    }
}

/// The final error of a call whose attempts ran out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exhausted<E> {
    /// Error of the last attempt.
    pub error: E,
    /// Attempts made, the first one included.
    pub attempts: usize,
}

impl<E: fmt::Display> fmt::Display for Exhausted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (after {} attempt(s))", self.error, self.attempts)
    }
}

/// Calls `attempt` until it succeeds or `config.max_attempts` calls have
/// failed, sleeping per the backoff schedule in between.
///
/// `target` names what is being retried in logs, such as a partition.
///
/// # Errors
///
/// Returns [`Exhausted`] with the last error once attempts run out.
pub async fn with_retry<T, E, F, Fut>(config: &RetryConfig, target: &str, mut attempt: F) -> Result<T, Exhausted<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let limit = config.max_attempts.max(1);
    let mut backoff = config.backoff();
    let mut attempts = 0;
    loop {
        attempts += 1;
        let error = match attempt().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        if attempts >= limit {
            return Err(Exhausted { error, attempts });
        }
        let delay = backoff.next_delay();
        warn!(
            target_name = target,
            attempt = attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %error,
            "Commit attempt failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(base: u64) -> RetryConfig {
        RetryConfig::new()
            .with_base_delay_ms(base)
            .with_jitter(JitterStrategy::None)
    }

    #[test]
    fn test_defaults_and_serde_names() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.base_delay_ms, 100);

        let parsed: RetryConfig = serde_json::from_str(r#"{"backoff":"linear","jitter":"none"}"#).unwrap();
        assert_eq!(parsed.backoff, BackoffStrategy::Linear);
        assert_eq!(parsed.jitter, JitterStrategy::None);
        assert_eq!(parsed.max_delay_ms, 5000);
    }

    #[test]
    fn test_ceiling_per_strategy() {
        let exp = fixed(100).with_max_delay_ms(1000);
        assert_eq!(exp.ceiling(0), Duration::from_millis(100));
        assert_eq!(exp.ceiling(2), Duration::from_millis(400));
        assert_eq!(exp.ceiling(10), Duration::from_millis(1000));

        let linear = fixed(100).with_backoff(BackoffStrategy::Linear);
        assert_eq!(linear.ceiling(2), Duration::from_millis(300));

        let constant = fixed(100).with_backoff(BackoffStrategy::Constant);
        assert_eq!(constant.ceiling(7), Duration::from_millis(100));
    }

    #[test]
    fn test_backoff_schedule_without_jitter() {
        let config = fixed(10);
        let mut backoff = config.backoff();
        let delays: Vec<u64> = (0..3).map(|_| u64::try_from(backoff.next_delay().as_millis()).unwrap()).collect();
        assert_eq!(delays, vec![10, 20, 40]);
        assert_eq!(backoff.retries(), 3);
    }

    #[test]
    fn test_jittered_delays_stay_in_bounds() {
        for jitter in [JitterStrategy::Full, JitterStrategy::Equal] {
            let config = fixed(100).with_backoff(BackoffStrategy::Constant).with_jitter(jitter);
            let mut backoff = config.backoff();
            for _ in 0..20 {
                assert!(backoff.next_delay() <= Duration::from_millis(100));
            }
        }

        let config = fixed(100).with_max_delay_ms(500).with_jitter(JitterStrategy::Decorrelated);
        let mut backoff = config.backoff();
        for _ in 0..20 {
            let delay = backoff.next_delay();
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(500));
        }
    }

    #[tokio::test]
    async fn test_with_retry_converges() {
        let config = fixed(1);
        let mut calls = 0;
        let result: Result<u64, Exhausted<String>> = with_retry(&config, "numbers-0", || {
            calls += 1;
            let call = calls;
            async move {
                if call < 3 {
                    Err(format!("broker down ({call})"))
                } else {
                    Ok(9)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(9));
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_with_retry_exhausts() {
        let config = fixed(1).with_max_attempts(2);
        let result: Result<(), Exhausted<&str>> = with_retry(&config, "numbers-0", || async { Err("down") }).await;

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 2);
        assert_eq!(exhausted.to_string(), "down (after 2 attempt(s))");
    }
}

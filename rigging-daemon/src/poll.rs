//! Bounded retry loop for readiness conditions.

use std::time::Duration;

use rigging_core::PollSettings;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub retries: u32,
    pub delay: Duration,
    /// Delay multiplier per failed attempt; 1 keeps the delay fixed.
    pub backoff_factor: u32,
    pub max_delay: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from(&PollSettings::default())
    }
}

impl From<&PollSettings> for PollPolicy {
    fn from(settings: &PollSettings) -> Self {
        Self {
            retries: settings.retries.max(1),
            delay: Duration::from_millis(settings.delay_ms),
            backoff_factor: settings.backoff_factor.max(1),
            max_delay: Duration::from_millis(settings.max_delay_ms),
        }
    }
}

/// Result of a loop that ran out of attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exhausted {
    pub attempts: u32,
    pub waited: Duration,
    pub last_unmet: String,
}

impl PollPolicy {
    pub fn fixed(retries: u32, delay: Duration) -> Self {
        Self {
            retries: retries.max(1),
            delay,
            backoff_factor: 1,
            max_delay: delay,
        }
    }

    /// Sleep after the given zero-based failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.saturating_pow(attempt);
        let delay = self.delay.saturating_mul(factor);
        if self.backoff_factor > 1 {
            delay.min(self.max_delay)
        } else {
            delay
        }
    }

    /// Worst-case total sleep across all attempts.
    pub fn budget(&self) -> Duration {
        (0..self.retries.saturating_sub(1))
            .map(|attempt| self.delay_after(attempt))
            .sum()
    }

    /// Evaluate `check` until it reports nothing unmet or attempts run out.
    ///
    /// `check` returns `None` once the condition holds, otherwise a
    /// description of what is still missing.
    pub async fn run<F>(&self, mut check: F) -> Result<u32, Exhausted>
    where
        F: FnMut() -> Option<String>,
    {
        let started = Instant::now();
        let mut last_unmet = String::new();
        for attempt in 0..self.retries {
            match check() {
                None => return Ok(attempt + 1),
                Some(unmet) => {
                    tracing::trace!(attempt = attempt + 1, unmet = %unmet, "condition not met");
                    last_unmet = unmet;
                }
            }
            if attempt + 1 < self.retries {
                tokio::time::sleep(self.delay_after(attempt)).await;
            }
        }
        Err(Exhausted {
            attempts: self.retries,
            waited: started.elapsed(),
            last_unmet,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn default_budget_is_twenty_half_second_retries() {
        let policy = PollPolicy::default();
        assert_eq!(policy.retries, 20);
        assert_eq!(policy.delay, Duration::from_millis(500));
        assert_eq!(policy.budget(), Duration::from_millis(19 * 500));
    }

    #[test]
    fn backoff_is_capped_by_max_delay() {
        let policy = PollPolicy {
            retries: 6,
            delay: Duration::from_millis(100),
            backoff_factor: 2,
            max_delay: Duration::from_millis(500),
        };
        let delays: Vec<u128> = (0..5).map(|a| policy.delay_after(a).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);
    }

    #[rstest]
    #[case(1, 0)]
    #[case(2, 250)]
    #[case(5, 1000)]
    fn fixed_policy_budget(#[case] retries: u32, #[case] expected_ms: u64) {
        let policy = PollPolicy::fixed(retries, Duration::from_millis(250));
        assert_eq!(policy.budget(), Duration::from_millis(expected_ms));
        assert_eq!(policy.delay_after(retries), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn run_succeeds_on_the_attempt_the_condition_holds() {
        let mut calls = 0;
        let attempts = PollPolicy::fixed(5, Duration::from_secs(1))
            .run(|| {
                calls += 1;
                (calls < 3).then(|| "not yet".to_string())
            })
            .await
            .unwrap();
        assert_eq!(attempts, 3);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn run_reports_last_unmet_condition_when_exhausted() {
        let mut calls = 0;
        let exhausted = PollPolicy::fixed(3, Duration::from_secs(1))
            .run(|| {
                calls += 1;
                Some(format!("missing #{calls}"))
            })
            .await
            .unwrap_err();
        assert_eq!(exhausted.attempts, 3);
        assert_eq!(exhausted.last_unmet, "missing #3");
        assert_eq!(exhausted.waited, Duration::from_secs(2));
    }
}

//! Retry policy: error classification plus backoff schedule.
//!
//! Classification looks at the error variant first, then at the error text,
//! because upstream quota and availability signals only survive as status
//! lines or provider codes inside messages.

use std::{future::Future, time::Duration};

use rand::Rng;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::errors::RagError;

/// How an error should be handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient: exponential backoff with jitter.
    Retryable,
    /// User-level quota: much longer waits.
    RetryableLongBackoff,
    /// Not expected to heal; tolerated a small number of times.
    Fatal,
}

const QUOTA_MARKER: &str = "throttling.user";

/// Transient signatures, compared after folding case and dropping
/// spaces, underscores and dots.
const TRANSIENT_SIGNATURES: &[&str] = &[
    "serviceunavailable",
    "throttling",
    "requestthrottled",
    "toomanyrequests",
    "timedout",
    "deadlineexceeded",
];

/// Transient HTTP statuses; must appear as a standalone token.
const TRANSIENT_STATUSES: &[&str] = &["429", "503"];

/// Retry policy, a pure function of (error, attempt) apart from jitter.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    base: Duration,
    max_retries: u32,
    fatal_attempts: u32,
    max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(cfg: &RetryConfig) -> Self {
        Self {
            base: cfg.base,
            max_retries: cfg.max_retries.max(1),
            fatal_attempts: cfg.fatal_attempts.max(1),
            max_backoff: cfg.max_backoff,
        }
    }

    /// Budget for a user waiting on the answer: two attempts at most.
    pub fn interactive(cfg: &RetryConfig) -> Self {
        let mut p = Self::new(cfg);
        p.max_retries = p.max_retries.min(2);
        p.fatal_attempts = 1;
        p
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn classify(&self, err: &RagError) -> ErrorClass {
        match err {
            RagError::Timeout(_) => return ErrorClass::Retryable,
            e if e.is_configuration() => return ErrorClass::Fatal,
            RagError::MalformedRecord { .. } | RagError::Parse(_) => return ErrorClass::Fatal,
            RagError::Embedding(g) => {
                if g.is_timeout() {
                    return ErrorClass::Retryable;
                }
                if let Some(status) = g.status() {
                    if status.as_u16() == 429 || status.as_u16() == 503 {
                        // Quota marker may still be in the body.
                        return classify_text(&err.to_string()).unwrap_or(ErrorClass::Retryable);
                    }
                }
            }
            _ => {}
        }
        classify_text(&err.to_string()).unwrap_or(ErrorClass::Fatal)
    }

    /// `base * 2^attempt + jitter(0..base/2)`, exponent clamped at
    /// `max_retries`, result capped at `max_backoff`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.min(self.max_retries);
        let base_ms = self.base.as_millis() as u64;
        let jitter_cap = base_ms / 2;
        let jitter = if jitter_cap == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..jitter_cap)
        };
        let ms = base_ms.saturating_mul(1u64 << exp).saturating_add(jitter);
        Duration::from_millis(ms).min(self.max_backoff)
    }

    /// `2^(attempt + 2)` seconds.
    pub fn long_backoff_for(&self, attempt: u32) -> Duration {
        let exp = (attempt + 2).min(self.max_retries + 2);
        Duration::from_secs(1u64 << exp)
    }

    /// Total attempts allowed for this error.
    pub fn attempts_for(&self, err: &RagError) -> u32 {
        if err.is_configuration() {
            return 1;
        }
        match self.classify(err) {
            ErrorClass::Retryable | ErrorClass::RetryableLongBackoff => self.max_retries,
            ErrorClass::Fatal => self.fatal_attempts,
        }
    }

    /// Delay before the next attempt, or `None` to give up.
    /// `attempt` is the 0-based index of the attempt that just failed.
    pub fn next_delay(&self, err: &RagError, attempt: u32) -> Option<Duration> {
        if attempt + 1 >= self.attempts_for(err) {
            return None;
        }
        Some(match self.classify(err) {
            ErrorClass::RetryableLongBackoff => self.long_backoff_for(attempt),
            ErrorClass::Retryable | ErrorClass::Fatal => self.backoff_for(attempt),
        })
    }

    /// Runs `op` until it succeeds or the policy gives up.
    ///
    /// Returns the last error and the number of attempts made.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, (RagError, u32)>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, RagError>>,
    {
        let mut attempt = 0u32;
        loop {
            match op(attempt).await {
                Ok(v) => return Ok(v),
                Err(e) => match self.next_delay(&e, attempt) {
                    Some(delay) => {
                        warn!(
                            %label,
                            attempt = attempt + 1,
                            class = ?self.classify(&e),
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "attempt failed, backing off"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => {
                        debug!(%label, attempts = attempt + 1, error = %e, "giving up");
                        return Err((e, attempt + 1));
                    }
                },
            }
        }
    }
}

fn classify_text(msg: &str) -> Option<ErrorClass> {
    let lower = msg.to_lowercase();
    if lower.contains(QUOTA_MARKER) {
        return Some(ErrorClass::RetryableLongBackoff);
    }
    let folded: String = lower
        .chars()
        .filter(|c| !matches!(c, ' ' | '_' | '.'))
        .collect();
    let signature = TRANSIENT_SIGNATURES.iter().any(|s| folded.contains(s));
    let status = lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|tok| TRANSIENT_STATUSES.contains(&tok));
    (signature || status).then_some(ErrorClass::Retryable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(&RetryConfig::default())
    }

    #[test]
    fn classifies_by_signature() {
        let p = policy();
        let q = |m: &str| p.classify(&RagError::Qdrant(m.into()));
        assert_eq!(q("status: Unavailable, ServiceUnavailable"), ErrorClass::Retryable);
        assert_eq!(q("HTTP 429 Too Many Requests"), ErrorClass::Retryable);
        assert_eq!(q("Request_Throttled by upstream"), ErrorClass::Retryable);
        assert_eq!(q("code=Throttling.User quota"), ErrorClass::RetryableLongBackoff);
        assert_eq!(q("invalid argument"), ErrorClass::Fatal);
        assert_eq!(q("status: 503"), ErrorClass::Retryable);
        assert_eq!(q("upstream code=429"), ErrorClass::Retryable);
    }

    #[test]
    fn status_digits_inside_numbers_are_not_transient() {
        let p = policy();
        let q = |m: &str| p.classify(&RagError::Qdrant(m.into()));
        assert_eq!(q("point 15030 invalid"), ErrorClass::Fatal);
        assert_eq!(q("vector id 4291 rejected"), ErrorClass::Fatal);
        assert_eq!(
            p.classify(&RagError::Timeout(Duration::from_secs(1))),
            ErrorClass::Retryable
        );
    }

    #[test]
    fn configuration_errors_get_one_attempt() {
        let p = policy();
        let e = RagError::VectorSizeMismatch { got: 3, want: 4 };
        assert_eq!(p.attempts_for(&e), 1);
        assert!(p.next_delay(&e, 0).is_none());

        let other = RagError::Qdrant("bad request".into());
        assert_eq!(p.attempts_for(&other), 2);
        assert!(p.next_delay(&other, 0).is_some());
        assert!(p.next_delay(&other, 1).is_none());
    }

    #[test]
    fn backoff_strictly_increases_then_stays_bounded() {
        let p = policy();
        for _ in 0..50 {
            let mut prev = Duration::ZERO;
            for attempt in 0..p.max_retries() {
                let d = p.backoff_for(attempt);
                assert!(d > prev, "attempt {attempt}: {d:?} <= {prev:?}");
                prev = d;
            }
        }
        let ceiling = Duration::from_millis(800 * 32 + 400);
        for attempt in 5..64 {
            assert!(p.backoff_for(attempt) <= ceiling);
        }
    }

    #[test]
    fn long_backoff_doubles_from_four_seconds() {
        let p = policy();
        assert_eq!(p.long_backoff_for(0), Duration::from_secs(4));
        assert_eq!(p.long_backoff_for(1), Duration::from_secs(8));
        assert_eq!(p.long_backoff_for(2), Duration::from_secs(16));
    }

    #[tokio::test(start_paused = true)]
    async fn run_retries_transient_until_success() {
        let p = policy();
        let calls = Cell::new(0u32);
        let out = p
            .run("test", |attempt| {
                calls.set(calls.get() + 1);
                async move {
                    if attempt < 2 {
                        Err(RagError::Qdrant("503 Service Unavailable".into()))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;
        assert_eq!(out.unwrap(), 2);
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn run_reports_attempt_count_on_exhaustion() {
        let p = policy();
        let out: Result<(), _> = p
            .run("test", |_| async { Err(RagError::Qdrant("Too Many Requests".into())) })
            .await;
        let (err, attempts) = out.unwrap_err();
        assert_eq!(attempts, 5);
        assert!(err.to_string().contains("Too Many Requests"));
    }

    #[test]
    fn interactive_budget_is_two_attempts() {
        let p = RetryPolicy::interactive(&RetryConfig::default());
        let e = RagError::Qdrant("service unavailable".into());
        assert_eq!(p.attempts_for(&e), 2);
    }
}

//! Bounded sequential retries with optional exponential backoff.

use crate::failure::{BoxError, OperationFailure};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_DELAY_MS: u64 = 1000;

pub type RetryHook = Arc<dyn Fn(u32) + Send + Sync>;

#[derive(Clone)]
pub struct RetryOptions {
    /// Total attempts including the first. Must be at least 1.
    pub max_attempts: u32,
    /// Base wait before a retry.
    pub delay: Duration,
    /// Double the wait after every failed attempt.
    pub backoff: bool,
    /// Called with the failed attempt number (1-based) just before each wait.
    pub on_retry: Option<RetryHook>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: Duration::from_millis(DEFAULT_DELAY_MS),
            backoff: true,
            on_retry: None,
        }
    }
}

impl fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("max_attempts", &self.max_attempts)
            .field("delay", &self.delay)
            .field("backoff", &self.backoff)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl RetryOptions {
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn backoff(mut self, backoff: bool) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn on_retry(mut self, hook: impl Fn(u32) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(hook));
        self
    }
}

#[derive(Error, Debug)]
pub enum RetryError {
    #[error("gave up after {attempts} attempt(s): {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: OperationFailure,
    },
    #[error("invalid retry options: {0}")]
    InvalidOptions(String),
}

impl RetryError {
    /// Failure observed on the final attempt, if the sequence ran at all.
    pub fn last_failure(&self) -> Option<&OperationFailure> {
        match self {
            RetryError::Exhausted { last, .. } => Some(last),
            RetryError::InvalidOptions(_) => None,
        }
    }
}

/// Wait before the attempt following `failed_attempt` (1-based).
///
/// `delay * 2^(failed_attempt - 1)` with backoff, `delay` without. Saturates instead of overflowing.
pub fn backoff_delay(options: &RetryOptions, failed_attempt: u32) -> Duration {
    if !options.backoff {
        return options.delay;
    }
    let exp = failed_attempt.saturating_sub(1);
    let factor = 1u32.checked_shl(exp).unwrap_or(u32::MAX);
    options.delay.saturating_mul(factor)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RetryState {
    pub is_retrying: bool,
    /// 1-based attempt currently executing; 0 when idle.
    pub attempts: u32,
}

#[derive(Default)]
struct Progress {
    is_retrying: AtomicBool,
    attempts: AtomicU32,
}

impl Progress {
    fn reset(&self) {
        self.attempts.store(0, Ordering::SeqCst);
        self.is_retrying.store(false, Ordering::SeqCst);
    }
}

/// Resets progress when the sequence ends, including when the future is dropped early.
struct InFlight<'a>(&'a Progress);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.reset();
    }
}

/// Runs fallible async operations with bounded retries and observable progress.
///
/// Attempts of one sequence are strictly sequential. The progress counters are
/// per executor, so run one sequence at a time on a given executor.
#[derive(Default)]
pub struct RetryExecutor {
    progress: Progress,
}

impl RetryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RetryState {
        RetryState {
            is_retrying: self.progress.is_retrying.load(Ordering::SeqCst),
            attempts: self.progress.attempts.load(Ordering::SeqCst),
        }
    }

    pub fn is_retrying(&self) -> bool {
        self.progress.is_retrying.load(Ordering::SeqCst)
    }

    pub fn attempts(&self) -> u32 {
        self.progress.attempts.load(Ordering::SeqCst)
    }

    /// Run `operation` until it succeeds or `options.max_attempts` attempts have failed.
    ///
    /// On exhaustion only the last failure is kept. There is no timeout: a hung
    /// attempt stalls the sequence.
    pub async fn retry<T, E, F, Fut>(
        &self,
        mut operation: F,
        options: &RetryOptions,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        if options.max_attempts == 0 {
            return Err(RetryError::InvalidOptions(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        self.progress.is_retrying.store(true, Ordering::SeqCst);
        let _guard = InFlight(&self.progress);

        let mut attempt = 1;
        loop {
            self.progress.attempts.store(attempt, Ordering::SeqCst);
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    let failure = OperationFailure::new(e);
                    if attempt >= options.max_attempts {
                        warn!(attempts = attempt, error = %failure, "retries exhausted");
                        return Err(RetryError::Exhausted {
                            attempts: attempt,
                            last: failure,
                        });
                    }
                    if let Some(hook) = &options.on_retry {
                        hook(attempt);
                    }
                    let wait = backoff_delay(options, attempt);
                    let ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX);
                    warn!(attempt, ms, error = %failure, "retry after error");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[test]
    fn backoff_doubles() {
        let opts = RetryOptions::default().delay(Duration::from_millis(100));
        assert_eq!(backoff_delay(&opts, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(&opts, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(&opts, 3), Duration::from_millis(400));
        assert_eq!(backoff_delay(&opts, 5), Duration::from_millis(1600));
    }

    #[test]
    fn backoff_disabled_is_flat() {
        let opts = RetryOptions::default()
            .delay(Duration::from_millis(250))
            .backoff(false);
        for k in 1..6 {
            assert_eq!(backoff_delay(&opts, k), Duration::from_millis(250));
        }
    }

    #[test]
    fn backoff_saturates() {
        let opts = RetryOptions::default().delay(Duration::from_secs(u64::MAX / 2));
        assert_eq!(backoff_delay(&opts, 40), Duration::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_runs_max_attempts() {
        for n in 1..=5u32 {
            let exec = RetryExecutor::new();
            let calls = AtomicU32::new(0);
            let opts = RetryOptions::default()
                .max_attempts(n)
                .delay(Duration::from_millis(10));
            let res: Result<(), _> = exec
                .retry(
                    || {
                        let k = calls.fetch_add(1, Ordering::SeqCst) + 1;
                        async move { Err::<(), _>(format!("fail #{k}")) }
                    },
                    &opts,
                )
                .await;
            assert_eq!(calls.load(Ordering::SeqCst), n);
            match res {
                Err(RetryError::Exhausted { attempts, last }) => {
                    assert_eq!(attempts, n);
                    assert_eq!(last.to_string(), format!("fail #{n}"));
                }
                other => panic!("expected exhaustion, got {other:?}"),
            }
            assert_eq!(exec.state(), RetryState::default());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt_with_backoff() {
        let exec = RetryExecutor::new();
        let calls = AtomicU32::new(0);
        let retried = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&retried);
        let opts = RetryOptions::default()
            .max_attempts(3)
            .delay(Duration::from_millis(100))
            .on_retry(move |n| seen.lock().unwrap().push(n));

        let start = Instant::now();
        let starts = Mutex::new(Vec::new());
        let value = exec
            .retry(
                || {
                    starts.lock().unwrap().push(start.elapsed());
                    let k = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        if k < 3 {
                            Err("transient")
                        } else {
                            Ok(k * 10)
                        }
                    }
                },
                &opts,
            )
            .await
            .unwrap();

        assert_eq!(value, 30);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(*retried.lock().unwrap(), vec![1, 2]);
        let starts = starts.into_inner().unwrap();
        let gap1 = starts[1] - starts[0];
        let gap2 = starts[2] - starts[1];
        assert!(gap1 >= Duration::from_millis(100) && gap1 < Duration::from_millis(110));
        assert!(gap2 >= Duration::from_millis(200) && gap2 < Duration::from_millis(210));
    }

    #[tokio::test(start_paused = true)]
    async fn flat_delay_between_attempts_without_backoff() {
        let exec = RetryExecutor::new();
        let origin = Instant::now();
        let starts = Mutex::new(Vec::new());
        let opts = RetryOptions::default()
            .max_attempts(4)
            .delay(Duration::from_millis(100))
            .backoff(false);
        let res: Result<(), _> = exec
            .retry(
                || {
                    starts.lock().unwrap().push(origin.elapsed());
                    async { Err::<(), _>("still down") }
                },
                &opts,
            )
            .await;
        assert!(matches!(res, Err(RetryError::Exhausted { attempts: 4, .. })));
        let starts = starts.into_inner().unwrap();
        assert_eq!(starts.len(), 4);
        for pair in starts.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_millis(100) && gap < Duration::from_millis(110));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn single_attempt_never_calls_on_retry() {
        let exec = RetryExecutor::new();
        let hooked = Arc::new(AtomicU32::new(0));
        let h = Arc::clone(&hooked);
        let opts = RetryOptions::default()
            .max_attempts(1)
            .on_retry(move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            });
        let res: Result<u8, _> = exec.retry(|| async { Err("nope") }, &opts).await;
        assert!(matches!(res, Err(RetryError::Exhausted { attempts: 1, .. })));
        assert_eq!(hooked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn zero_attempts_rejected() {
        let exec = RetryExecutor::new();
        let calls = AtomicU32::new(0);
        let opts = RetryOptions::default().max_attempts(0);
        let res: Result<(), _> = exec
            .retry(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<(), &str>(()) }
                },
                &opts,
            )
            .await;
        assert!(matches!(res, Err(RetryError::InvalidOptions(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn state_tracks_current_attempt() {
        let exec = Arc::new(RetryExecutor::new());
        assert_eq!(exec.state(), RetryState::default());
        let observed = Mutex::new(Vec::new());
        let opts = RetryOptions::default().delay(Duration::from_millis(5));
        let res = exec
            .retry(
                || {
                    let st = exec.state();
                    observed.lock().unwrap().push(st);
                    async move {
                        if st.attempts < 2 {
                            Err("again")
                        } else {
                            Ok(())
                        }
                    }
                },
                &opts,
            )
            .await;
        assert!(res.is_ok());
        let observed = observed.into_inner().unwrap();
        assert_eq!(
            observed,
            vec![
                RetryState {
                    is_retrying: true,
                    attempts: 1
                },
                RetryState {
                    is_retrying: true,
                    attempts: 2
                },
            ]
        );
        assert_eq!(exec.state(), RetryState::default());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_sequence_resets_state() {
        let exec = RetryExecutor::new();
        let opts = RetryOptions::default().delay(Duration::from_secs(60));
        let fut = exec.retry(|| async { Err::<(), _>("slow") }, &opts);
        let res = tokio::time::timeout(Duration::from_secs(1), fut).await;
        assert!(res.is_err());
        assert_eq!(exec.state(), RetryState::default());
    }
}

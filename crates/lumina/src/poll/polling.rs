//! Self-rescheduling polling loop with runtime enable/disable and callback hot-swap.

use crate::failure::{BoxError, OperationFailure};
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const DEFAULT_INTERVAL_MS: u64 = 10_000;

pub type PollFuture = Pin<Box<dyn Future<Output = Result<(), OperationFailure>> + Send>>;
pub type PollCallback = Arc<dyn Fn() -> PollFuture + Send + Sync>;
pub type ErrorSink = Arc<dyn Fn(&CallbackFailure) + Send + Sync>;

/// A callback firing that failed. The loop keeps running after it.
#[derive(Error, Debug)]
#[error("polling callback failed on firing {firing}: {failure}")]
pub struct CallbackFailure {
    /// 1-based firing count over the lifetime of the loop.
    pub firing: u64,
    #[source]
    pub failure: OperationFailure,
}

#[derive(Clone)]
pub struct PollOptions {
    pub interval: Duration,
    pub enabled: bool,
    pub on_error: Option<ErrorSink>,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
            enabled: true,
            on_error: None,
        }
    }
}

impl fmt::Debug for PollOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollOptions")
            .field("interval", &self.interval)
            .field("enabled", &self.enabled)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl PollOptions {
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn on_error(mut self, sink: impl Fn(&CallbackFailure) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(sink));
        self
    }
}

/// Box a plain async closure into a [`PollCallback`].
pub fn poll_callback<F, Fut, E>(f: F) -> PollCallback
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    Arc::new(move || {
        let fut = f();
        Box::pin(async move { fut.await.map_err(OperationFailure::new) }) as PollFuture
    })
}

/// State shared between the owner and the running schedule.
struct Shared {
    callback: Mutex<PollCallback>,
    on_error: Option<ErrorSink>,
    firings: AtomicU64,
}

impl Shared {
    fn current_callback(&self) -> PollCallback {
        let guard = self.callback.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    async fn fire(&self) {
        let firing = self.firings.fetch_add(1, Ordering::SeqCst) + 1;
        let callback = self.current_callback();
        let outcome = AssertUnwindSafe(async { callback().await })
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(OperationFailure::new(panic_message(payload))));
        match outcome {
            Ok(()) => debug!(firing, "poll callback ok"),
            Err(failure) => {
                let failure = CallbackFailure { firing, failure };
                warn!(firing, error = %failure.failure, "poll callback failed");
                if let Some(sink) = &self.on_error {
                    sink(&failure);
                }
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned());
    match detail {
        Some(detail) => format!("callback panicked: {detail}"),
        None => "callback panicked".to_string(),
    }
}

/// One armed schedule: a stop signal and the task driving it.
struct Schedule {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Invokes a callback immediately on start and then `interval` after each firing settles.
///
/// At most one callback runs at a time. Stopping cancels the pending firing but lets an
/// in-flight callback finish. Dropping the loop stops it.
pub struct PollingLoop {
    shared: Arc<Shared>,
    interval: Duration,
    enabled: bool,
    schedule: Option<Schedule>,
    /// Task of the last stopped schedule, possibly still finishing its callback.
    draining: Option<JoinHandle<()>>,
}

impl PollingLoop {
    pub fn new(callback: PollCallback, options: PollOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                callback: Mutex::new(callback),
                on_error: options.on_error,
                firings: AtomicU64::new(0),
            }),
            interval: options.interval,
            enabled: options.enabled,
            schedule: None,
            draining: None,
        }
    }

    /// Arm the schedule if enabled and not already running. Must be called within a tokio runtime.
    pub fn start(&mut self) {
        if !self.enabled {
            return;
        }
        if let Some(schedule) = &self.schedule {
            if !schedule.task.is_finished() {
                return;
            }
            warn!("polling schedule ended unexpectedly, re-arming");
            self.schedule = None;
        }
        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_schedule(
            Arc::clone(&self.shared),
            self.interval,
            stop_rx,
            self.draining.take(),
        ));
        let interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX);
        info!(interval_ms, "polling started");
        self.schedule = Some(Schedule { stop, task });
    }

    /// Cancel the pending firing. An in-flight callback runs to completion.
    pub fn stop(&mut self) {
        if let Some(schedule) = self.schedule.take() {
            let _ = schedule.stop.send(true);
            self.draining = Some(schedule.task);
            info!(firings = self.firings(), "polling stopped");
        }
    }

    /// Replace the callback. Takes effect on the next firing without a restart.
    pub fn set_callback(&self, callback: PollCallback) {
        let mut guard = self
            .shared
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = callback;
    }

    /// Change the cadence. A running schedule is torn down and re-armed, firing immediately.
    pub fn set_interval(&mut self, interval: Duration) {
        if interval == self.interval {
            return;
        }
        self.interval = interval;
        if self.schedule.is_some() {
            self.stop();
            self.start();
        }
    }

    /// Enable (and start) or disable (and stop) the loop.
    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled == self.enabled {
            return;
        }
        self.enabled = enabled;
        if enabled {
            self.start();
        } else {
            self.stop();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// True while a schedule is armed.
    pub fn is_active(&self) -> bool {
        self.schedule
            .as_ref()
            .is_some_and(|s| !s.task.is_finished())
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Callback firings started so far, across restarts.
    pub fn firings(&self) -> u64 {
        self.shared.firings.load(Ordering::SeqCst)
    }
}

impl Drop for PollingLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_schedule(
    shared: Arc<Shared>,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
    previous: Option<JoinHandle<()>>,
) {
    if let Some(previous) = previous {
        let _ = previous.await;
    }
    loop {
        if *stop.borrow() {
            break;
        }
        shared.fire().await;
        if *stop.borrow() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = stop.changed() => break,
        }
    }
}

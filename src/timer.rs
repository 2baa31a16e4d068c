use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{self, Runtime};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, TimerError};

const RUNNING: u8 = 0;
const ENDING_TIMED_OUT: u8 = 1;
const ENDING_CANCELLED: u8 = 2;
const ENDED_TIMED_OUT: u8 = 3;
const ENDED_CANCELLED: u8 = 4;

/// Observable lifecycle of a [`Timer`].
///
/// `cancelled` is fixed the moment the race resolves and never changes
/// afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    /// Waiting for the timeout or a cancellation request.
    Running,
    /// The race resolved and the callback is executing.
    Ending { cancelled: bool },
    /// The callback returned. Terminal.
    Ended { cancelled: bool },
}

impl TimerState {
    /// Whether this is the terminal state
    pub fn is_ended(self) -> bool {
        matches!(self, TimerState::Ended { .. })
    }

    /// Whether the race was won by cancellation
    pub fn is_cancelled(self) -> bool {
        matches!(
            self,
            TimerState::Ending { cancelled: true } | TimerState::Ended { cancelled: true }
        )
    }
}

/// State published by the worker, read by every other thread.
struct Completion {
    state: AtomicU8,
    /// Fired once `state` reaches an ended value.
    finished: CancellationToken,
}

impl Completion {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(RUNNING),
            finished: CancellationToken::new(),
        }
    }

    fn resolve(&self, cancelled: bool) {
        let state = if cancelled {
            ENDING_CANCELLED
        } else {
            ENDING_TIMED_OUT
        };
        self.state.store(state, Ordering::Release);
    }

    fn finish(&self, cancelled: bool) {
        let state = if cancelled {
            ENDED_CANCELLED
        } else {
            ENDED_TIMED_OUT
        };
        self.state.store(state, Ordering::Release);
        self.finished.cancel();
    }

    fn state(&self) -> TimerState {
        match self.state.load(Ordering::Acquire) {
            RUNNING => TimerState::Running,
            ENDING_TIMED_OUT => TimerState::Ending { cancelled: false },
            ENDING_CANCELLED => TimerState::Ending { cancelled: true },
            ENDED_TIMED_OUT => TimerState::Ended { cancelled: false },
            _ => TimerState::Ended { cancelled: true },
        }
    }
}

/// Timer configuration, consumed by [`Builder::spawn`].
#[derive(Debug, Clone)]
pub struct Builder {
    timeout: Duration,
    name: Option<String>,
    stack_size: Option<usize>,
}

impl Builder {
    /// Configuration for a timer firing after `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            name: None,
            stack_size: None,
        }
    }

    /// Debug label. Also names the worker thread `timer:<name>`.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Stack size of the worker thread, in bytes.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    /// Start the timer.
    ///
    /// The worker thread is running when this returns. `callback` is invoked
    /// exactly once on that thread with `true` if the timer was cancelled and
    /// `false` if the timeout elapsed.
    pub fn spawn<F>(self, callback: F) -> Result<Timer>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let name = self.name.unwrap_or_default();
        let timeout = self.timeout;

        // Built here so a missing time driver surfaces as a construction error.
        let runtime = runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(TimerError::Runtime)?;

        let cancel_token = CancellationToken::new();
        let completion = Arc::new(Completion::new());

        let worker = Worker {
            name: name.clone(),
            timeout,
            runtime,
            cancel_token: cancel_token.clone(),
            completion: completion.clone(),
        };

        let mut thread_builder = thread::Builder::new();
        if !name.is_empty() {
            thread_builder = thread_builder.name(format!("timer:{}", name.replace('\0', "")));
        }
        if let Some(size) = self.stack_size {
            thread_builder = thread_builder.stack_size(size);
        }

        let handle = thread_builder
            .spawn(move || worker.run(callback))
            .map_err(TimerError::Spawn)?;

        log::debug!("Timer '{}' started with timeout {:?}", name, timeout);

        Ok(Timer {
            name,
            timeout,
            worker_id: handle.thread().id(),
            worker: Mutex::new(Some(handle)),
            cancel_requested: Mutex::new(false),
            cancel_token,
            completion,
        })
    }
}

/// Everything the worker thread owns.
struct Worker {
    name: String,
    timeout: Duration,
    runtime: Runtime,
    cancel_token: CancellationToken,
    completion: Arc<Completion>,
}

impl Worker {
    fn run<F>(self, callback: F)
    where
        F: FnOnce(bool),
    {
        let Worker {
            name,
            timeout,
            runtime,
            cancel_token,
            completion,
        } = self;

        let cancelled = runtime.block_on(async {
            tokio::select! {
                // A request made before the race starts must win over a zero timeout.
                biased;
                _ = cancel_token.cancelled() => true,
                _ = tokio::time::sleep(timeout) => false,
            }
        });
        drop(runtime);

        completion.resolve(cancelled);
        log::debug!("Timer '{}' resolved (cancelled: {})", name, cancelled);

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(cancelled))) {
            log::error!(
                "Timer '{}' callback panicked: {}",
                name,
                panic_message(payload.as_ref())
            );
        }

        completion.finish(cancelled);
        log::debug!("Timer '{}' ended", name);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}

/// A cancellable one-shot timer backed by a dedicated thread.
///
/// The callback runs exactly once, either when `timeout` elapses or as soon
/// as [`Timer::cancel`] is called, whichever comes first. Dropping the timer
/// cancels it and joins the worker, so no thread outlives its `Timer`.
///
/// A timer must not be waited on or dropped from inside its own callback;
/// both panic. Calling [`Timer::cancel`] from there is a no-op.
pub struct Timer {
    name: String,
    timeout: Duration,
    worker_id: ThreadId,
    /// Join domain: taken by the first `wait` to finish.
    worker: Mutex<Option<JoinHandle<()>>>,
    /// Cancellation domain: first request wins.
    cancel_requested: Mutex<bool>,
    cancel_token: CancellationToken,
    completion: Arc<Completion>,
}

impl Timer {
    /// Start an unnamed timer
    pub fn new<F>(callback: F, timeout: Duration) -> Result<Self>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        Builder::new(timeout).spawn(callback)
    }

    /// Start a timer with a debug name
    pub fn with_name<F>(callback: F, timeout: Duration, name: impl Into<String>) -> Result<Self>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        Builder::new(timeout).name(name).spawn(callback)
    }

    /// Configure a timer before starting it
    pub fn builder(timeout: Duration) -> Builder {
        Builder::new(timeout)
    }

    /// Request early termination.
    ///
    /// Does not wait for the callback. Repeated calls, calls after the timer
    /// ended and calls from inside the callback are no-ops.
    pub fn cancel(&self) {
        if self.is_worker_thread() {
            log::trace!("Timer '{}' ignoring cancel from its own callback", self.name);
            return;
        }

        let mut requested = self.cancel_requested.lock();
        if !*requested {
            self.cancel_token.cancel();
            *requested = true;
            log::debug!("Timer '{}' cancel requested", self.name);
        }
    }

    /// Block until the callback has returned.
    ///
    /// Returns immediately if the worker was already joined.
    ///
    /// # Panics
    ///
    /// Panics when called from inside the timer's own callback.
    pub fn wait(&self) {
        assert!(
            !self.is_worker_thread(),
            "timer '{}' waited on from within its own callback",
            self.name
        );

        let mut worker = self.worker.lock();
        if let Some(handle) = worker.take() {
            if handle.join().is_err() {
                log::error!("Timer '{}' worker terminated abnormally", self.name);
            }
        }
    }

    /// Resolves once the callback has returned, without blocking the thread.
    ///
    /// The worker is still joined by [`Timer::wait`] or on drop.
    pub async fn wait_async(&self) {
        self.completion.finished.cancelled().await;
    }

    /// Whether the callback has returned
    pub fn ended(&self) -> bool {
        self.state().is_ended()
    }

    /// Whether the callback ran because of a cancellation.
    ///
    /// Only final once [`Timer::ended`] returns `true`.
    pub fn cancelled(&self) -> bool {
        self.state().is_cancelled()
    }

    /// Current lifecycle state
    pub fn state(&self) -> TimerState {
        self.completion.state()
    }

    /// Whether a cancellation request was accepted
    pub fn cancel_requested(&self) -> bool {
        *self.cancel_requested.lock()
    }

    /// Debug name, empty when none was given
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Timeout the timer was created with
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// True when called from this timer's worker, i.e. from inside its callback.
    pub fn is_worker_thread(&self) -> bool {
        thread::current().id() == self.worker_id
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        assert!(
            !self.is_worker_thread(),
            "timer '{}' dropped from within its own callback",
            self.name
        );

        self.cancel();
        self.wait();
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("state", &self.state())
            .finish()
    }
}

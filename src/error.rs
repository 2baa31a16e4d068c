use std::io;

use thiserror::Error;

/// Errors raised while constructing a timer.
///
/// Everything after construction is infallible: redundant `cancel`/`wait`
/// calls are no-ops and callback panics are contained by the worker.
#[derive(Debug, Error)]
pub enum TimerError {
    /// The worker's time driver could not be created.
    #[error("failed to build timer runtime: {0}")]
    Runtime(#[source] io::Error),

    /// The worker thread could not be spawned.
    #[error("failed to spawn timer worker thread: {0}")]
    Spawn(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, TimerError>;

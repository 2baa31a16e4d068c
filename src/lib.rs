//! # Deadline Timer
//!
//! A cancellable one-shot timer for Rust. Each [`Timer`] owns a dedicated
//! thread that waits until either its timeout elapses or it is cancelled,
//! then runs the callback exactly once with a flag telling which happened.
//!
//! ## Features
//!
//! - **Exactly once**: the callback runs once, on the timer's own thread
//! - **Cancellable**: [`Timer::cancel`] is idempotent and never blocks
//! - **Scoped**: dropping a timer cancels it and joins its thread
//! - **Reentrancy guard**: waiting on or dropping a timer from its own callback
//!   panics instead of deadlocking
//! - **Async friendly**: [`Timer::wait_async`] for callers inside a runtime
//! - **Comprehensive Logging**: lifecycle events through the `log` facade
//!
//! ## Quick Start
//!
//! ```rust
//! use deadline_timer::{Duration, Timer};
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let fired = Arc::new(AtomicBool::new(false));
//!
//!     let flag = fired.clone();
//!     let timer = Timer::with_name(
//!         move |cancelled| flag.store(!cancelled, Ordering::SeqCst),
//!         Duration::from_millis(10),
//!         "greeting",
//!     )?;
//!
//!     // Blocks until the callback has returned
//!     timer.wait();
//!     assert!(fired.load(Ordering::SeqCst));
//!     assert!(timer.ended() && !timer.cancelled());
//!
//!     // Dropping before the deadline runs the callback with `true`
//!     let early = Timer::new(|cancelled| assert!(cancelled), Duration::from_secs(60))?;
//!     drop(early);
//!     Ok(())
//! }
//! ```

mod error;
mod group;
mod timer;

pub use error::{Result, TimerError};
pub use group::TimerGroup;
pub use timer::{Builder, Timer, TimerState};

// Re-export commonly used types for convenience
pub use std::time::Duration;

use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use crate::error::Result;
use crate::timer::{Builder, Timer};

/// A shared, growable set of independently owned timers.
///
/// Clones share the same set, so a callback can hold a clone and push the
/// timers it creates. Members are dropped (cancelled and joined) in insertion
/// order when the last handle goes away. If that happens inside a member's
/// own callback, the member is handed to a separate thread that joins it
/// once the callback returns.
#[derive(Clone, Default)]
pub struct TimerGroup {
    members: Arc<Members>,
}

#[derive(Default)]
struct Members {
    timers: Mutex<Vec<Arc<Timer>>>,
}

impl Drop for Members {
    fn drop(&mut self) {
        for timer in self.timers.get_mut().drain(..) {
            if timer.is_worker_thread() {
                release_from_worker(timer);
            }
        }
    }
}

/// Drop `timer` on a thread other than its worker, which is still running
/// the callback that released the group.
fn release_from_worker(timer: Arc<Timer>) {
    let name = timer.name().to_owned();
    let slot = Arc::new(Mutex::new(Some(timer)));
    let handoff = slot.clone();

    let spawned = thread::Builder::new()
        .name(format!("timer-release:{}", name.replace('\0', "")))
        .spawn(move || drop(handoff.lock().take()));

    if let Err(e) = spawned {
        log::error!("Timer '{}' released from its own callback and leaked: {}", name, e);
        if let Some(timer) = slot.lock().take() {
            std::mem::forget(timer);
        }
    }
}

impl TimerGroup {
    /// Create an empty group
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a running timer, returning a shared handle to it
    pub fn push(&self, timer: Timer) -> Arc<Timer> {
        let timer = Arc::new(timer);
        self.members.timers.lock().push(timer.clone());
        timer
    }

    /// Start a timer and add it to the group.
    pub fn spawn<F>(&self, builder: Builder, callback: F) -> Result<Arc<Timer>>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        Ok(self.push(builder.spawn(callback)?))
    }

    /// Number of member timers
    pub fn len(&self) -> usize {
        self.members.timers.lock().len()
    }

    /// Whether the group has no members
    pub fn is_empty(&self) -> bool {
        self.members.timers.lock().is_empty()
    }

    /// Member at `index`, in insertion order
    pub fn get(&self, index: usize) -> Option<Arc<Timer>> {
        self.members.timers.lock().get(index).cloned()
    }

    /// Oldest member
    pub fn first(&self) -> Option<Arc<Timer>> {
        self.get(0)
    }

    /// Copy of the current member list
    pub fn snapshot(&self) -> Vec<Arc<Timer>> {
        self.members.timers.lock().clone()
    }

    /// Request cancellation of every member (non-blocking)
    pub fn cancel_all(&self) {
        for timer in self.members.timers.lock().iter() {
            timer.cancel();
        }
    }

    /// Wait for every member, including ones pushed while waiting.
    ///
    /// The group lock is not held while blocking, so callbacks may keep
    /// pushing. Panics if called from the callback of a member.
    pub fn wait_all(&self) {
        loop {
            for timer in self.snapshot() {
                timer.wait();
            }
            if self.members.timers.lock().iter().all(|timer| timer.ended()) {
                break;
            }
        }
    }

    /// Remove members whose callback has returned, returning how many.
    ///
    /// A timer whose callback is still running is kept, so a callback can
    /// call this without dropping its own timer.
    pub fn prune_ended(&self) -> usize {
        let removed: Vec<Arc<Timer>> = {
            let mut timers = self.members.timers.lock();
            let (ended, running): (Vec<_>, Vec<_>) =
                timers.drain(..).partition(|timer| timer.ended());
            *timers = running;
            ended
        };
        let count = removed.len();
        log::debug!("Pruned {} ended timer(s)", count);
        count
    }
}

impl std::fmt::Debug for TimerGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.members.timers.lock().iter())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn test_nested_timer_cancelled_by_sibling() {
        init_logger();
        let x = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        let timers = TimerGroup::new();

        let (x1, errors1, group1) = (x.clone(), errors.clone(), timers.clone());
        let timer1 = Timer::with_name(
            move |cancelled| {
                if x1.load(Ordering::SeqCst) == 0 && !cancelled {
                    x1.fetch_add(1, Ordering::SeqCst);
                    let (x3, errors3) = (x1.clone(), errors1.clone());
                    group1
                        .spawn(Builder::new(Duration::from_millis(500)).name("timer3"), move |cancelled| {
                            if x3.load(Ordering::SeqCst) == 2 && cancelled {
                                x3.fetch_add(1, Ordering::SeqCst);
                            } else {
                                errors3.fetch_add(1, Ordering::SeqCst);
                            }
                        })
                        .expect("spawn timer3");
                } else {
                    errors1.fetch_add(1, Ordering::SeqCst);
                }
            },
            Duration::ZERO,
            "timer1",
        )
        .unwrap();

        let (x2, errors2, group2) = (x.clone(), errors.clone(), timers.clone());
        let timer2 = Timer::with_name(
            move |cancelled| {
                if x2.load(Ordering::SeqCst) == 1 && !cancelled {
                    x2.fetch_add(1, Ordering::SeqCst);
                    group2.first().expect("timer3 missing").cancel();
                } else {
                    errors2.fetch_add(1, Ordering::SeqCst);
                }
            },
            Duration::from_millis(50),
            "timer2",
        )
        .unwrap();

        timer1.wait();
        timer2.wait();
        timers.wait_all();

        assert_eq!(errors.load(Ordering::SeqCst), 0);
        assert_eq!(x.load(Ordering::SeqCst), 3);
        assert_eq!(timers.len(), 1);
        let timer3 = timers.first().unwrap();
        assert!(timer3.ended());
        assert!(timer3.cancelled());
        assert_eq!(timer3.name(), "timer3");
    }

    #[test]
    fn test_wait_all_covers_timers_pushed_while_waiting() {
        init_logger();
        let timers = TimerGroup::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let (group, count) = (timers.clone(), fired.clone());
        timers
            .spawn(Builder::new(Duration::from_millis(10)), move |_| {
                count.fetch_add(1, Ordering::SeqCst);
                let count = count.clone();
                group.push(
                    Timer::new(
                        move |_| {
                            count.fetch_add(1, Ordering::SeqCst);
                        },
                        Duration::from_millis(30),
                    )
                    .expect("spawn child"),
                );
            })
            .unwrap();

        timers.wait_all();

        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert_eq!(timers.len(), 2);
        assert!(timers.snapshot().iter().all(|timer| timer.ended()));
    }

    #[test]
    fn test_cancel_all_and_prune() {
        init_logger();
        let timers = TimerGroup::new();
        let cancelled = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let count = cancelled.clone();
            timers
                .spawn(Builder::new(Duration::from_secs(10)), move |was_cancelled| {
                    if was_cancelled {
                        count.fetch_add(1, Ordering::SeqCst);
                    }
                })
                .unwrap();
        }
        assert_eq!(timers.len(), 3);

        timers.cancel_all();
        timers.wait_all();
        assert_eq!(cancelled.load(Ordering::SeqCst), 3);

        assert_eq!(timers.prune_ended(), 3);
        assert!(timers.is_empty());
    }

    #[test]
    fn test_prune_from_callback_keeps_running_timer() {
        init_logger();
        let timers = TimerGroup::new();
        let pruned = Arc::new(AtomicUsize::new(usize::MAX));

        timers
            .spawn(Builder::new(Duration::ZERO), |_| {})
            .unwrap()
            .wait();

        let (group, record) = (timers.clone(), pruned.clone());
        let slow = timers
            .spawn(Builder::new(Duration::from_millis(20)).name("pruner"), move |_| {
                record.store(group.prune_ended(), Ordering::SeqCst);
            })
            .unwrap();
        slow.wait();

        assert_eq!(pruned.load(Ordering::SeqCst), 1);
        assert_eq!(timers.len(), 1);
        assert_eq!(timers.first().unwrap().name(), "pruner");

        drop(slow);
        assert_eq!(timers.prune_ended(), 1);
        assert!(timers.is_empty());
    }

    #[test]
    fn test_last_group_handle_dropped_in_member_callback() {
        init_logger();
        let timers = TimerGroup::new();
        let (go_tx, go_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = mpsc::channel();

        let group = timers.clone();
        let member = Arc::downgrade(
            &timers
                .spawn(Builder::new(Duration::ZERO).name("owner"), move |cancelled| {
                    let _ = go_rx.recv();
                    // Last handle: releases the group, and with it this timer.
                    drop(group);
                    let _ = done_tx.send(cancelled);
                })
                .unwrap(),
        );
        drop(timers);
        go_tx.send(()).unwrap();

        assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)), Ok(false));

        let deadline = Instant::now() + Duration::from_secs(5);
        while member.upgrade().is_some() {
            assert!(Instant::now() < deadline, "timer 'owner' was never released");
            thread::sleep(Duration::from_millis(1));
        }
    }
}

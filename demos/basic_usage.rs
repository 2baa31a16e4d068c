//! Basic usage example for the deadline timer

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use deadline_timer::{Builder, Duration, Timer, TimerGroup};
use parking_lot::Mutex;

type DemoResult = Result<(), Box<dyn std::error::Error>>;

fn report(name: &str, passed: bool, elapsed: Option<Duration>) {
    let verdict = if passed { "passed" } else { "failed" };
    match elapsed {
        Some(elapsed) => println!("{}: {} ({}ms)", name, verdict, elapsed.as_millis()),
        None => println!("{}: {}", name, verdict),
    }
}

fn timeout_fires() -> DemoResult {
    let start = Instant::now();
    let end = Arc::new(Mutex::new(None));

    let record = end.clone();
    let _timer = Timer::new(
        move |cancelled| {
            if cancelled {
                println!("Error: timeout_fires");
            }
            *record.lock() = Some(Instant::now());
        },
        Duration::from_millis(300),
    )?;
    thread::sleep(Duration::from_millis(500));

    let elapsed = end.lock().map(|end| end - start);
    let passed = elapsed.is_some_and(|elapsed| elapsed >= Duration::from_millis(300));
    report("timeout_fires", passed, elapsed);
    Ok(())
}

fn explicit_wait() -> DemoResult {
    let start = Instant::now();
    let timer = Timer::new(
        |cancelled| {
            if cancelled {
                println!("Error: explicit_wait");
            }
        },
        Duration::from_millis(300),
    )?;
    timer.wait();
    let elapsed = start.elapsed();

    timer.wait();
    timer.cancel();

    let passed = timer.ended() && !timer.cancelled() && elapsed >= Duration::from_millis(300);
    report("explicit_wait", passed, Some(elapsed));
    Ok(())
}

fn cancel_on_drop() -> DemoResult {
    let start = Instant::now();
    {
        let _timer = Timer::new(
            |cancelled| {
                if !cancelled {
                    println!("Error: cancel_on_drop");
                }
            },
            Duration::from_millis(300),
        )?;
    }
    let elapsed = start.elapsed();

    report("cancel_on_drop", elapsed < Duration::from_millis(300), Some(elapsed));
    Ok(())
}

fn redundant_cancel() -> DemoResult {
    let start = Instant::now();
    let timer = Timer::new(
        |cancelled| {
            if !cancelled {
                println!("Error: redundant_cancel");
            }
        },
        Duration::from_millis(300),
    )?;
    timer.cancel();
    timer.cancel();
    timer.wait();
    let elapsed = start.elapsed();

    timer.cancel();
    timer.wait();

    let passed = timer.ended() && timer.cancelled() && elapsed < Duration::from_millis(300);
    report("redundant_cancel", passed, Some(elapsed));
    Ok(())
}

fn nested_chain() -> DemoResult {
    let x = Arc::new(AtomicUsize::new(0));
    let timers = TimerGroup::new();

    let (x1, group1) = (x.clone(), timers.clone());
    let timer1 = Timer::with_name(
        move |cancelled| {
            if x1.load(Ordering::SeqCst) != 0 || cancelled {
                println!("Error: nested_chain timer1");
                return;
            }
            x1.fetch_add(1, Ordering::SeqCst);

            let x3 = x1.clone();
            let spawned = group1.spawn(
                Builder::new(Duration::from_millis(10)).name("timer3"),
                move |cancelled| {
                    if x3.load(Ordering::SeqCst) == 2 && cancelled {
                        x3.fetch_add(1, Ordering::SeqCst);
                    } else {
                        println!("Error: nested_chain timer3");
                    }
                },
            );
            if let Err(e) = spawned {
                println!("Error: nested_chain timer3 not started: {}", e);
            }
        },
        Duration::ZERO,
        "timer1",
    )?;

    let (x2, group2) = (x.clone(), timers.clone());
    let timer2 = Timer::with_name(
        move |cancelled| {
            if x2.load(Ordering::SeqCst) == 1 && !cancelled {
                x2.fetch_add(1, Ordering::SeqCst);
                if let Some(timer3) = group2.first() {
                    timer3.cancel();
                }
            } else {
                println!("Error: nested_chain timer2");
            }
        },
        Duration::from_millis(5),
        "timer2",
    )?;

    thread::sleep(Duration::from_millis(100));

    let passed = x.load(Ordering::SeqCst) == 3
        && timers.len() == 1
        && timers.first().is_some_and(|timer3| timer3.cancelled());
    report("nested_chain", passed, None);

    drop(timer2);
    drop(timer1);
    Ok(())
}

fn main() -> DemoResult {
    // Initialize logging
    env_logger::init();

    timeout_fires()?;
    explicit_wait()?;
    cancel_on_drop()?;
    redundant_cancel()?;
    nested_chain()?;

    Ok(())
}

// Background loops (signal polling, auto-dial) and the settings they read each cycle.
pub mod autodial;
pub mod config;
pub mod poll;

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

// Longest uninterrupted sleep, so Ctrl-C is noticed promptly.
const STOP_CHECK_SLICE: Duration = Duration::from_millis(200);

/// Anchored deadline for a periodic loop.
///
/// Each cycle moves the deadline forward by one interval from the previous
/// deadline rather than from "now", so time spent doing the work does not
/// accumulate as drift. When a cycle overruns, the anchor jumps to now
/// instead of firing a burst of make-up cycles.
#[derive(Debug, Clone, Copy)]
pub struct Cadence {
    next: Instant,
}

impl Cadence {
    pub fn starting_at(now: Instant) -> Self {
        Self { next: now }
    }

    pub fn reset(&mut self, now: Instant) {
        self.next = now;
    }

    // Move to the next deadline and return how long to wait for it.
    pub fn advance(&mut self, interval: Duration, now: Instant) -> Duration {
        self.next += interval;
        if self.next > now {
            self.next - now
        } else {
            self.next = now;
            Duration::ZERO
        }
    }
}

/// Time source and waiting for the scheduler loops.
///
/// Production loops run on [`WallClock`]; tests substitute a virtual clock.
pub trait Pacer {
    fn now(&self) -> Instant;
    fn running(&self) -> bool;
    // Wait between cycles. Returns false once the loop should stop.
    fn pause(&mut self, wait: Duration) -> bool;
    // Hold an in-progress call. Not interrupted by a stop request.
    fn hold(&mut self, duration: Duration);
}

pub struct WallClock<'a> {
    running: &'a AtomicBool,
}

impl<'a> WallClock<'a> {
    pub fn new(running: &'a AtomicBool) -> Self {
        Self { running }
    }
}

impl Pacer for WallClock<'_> {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn pause(&mut self, wait: Duration) -> bool {
        sleep_while_running(wait, self.running)
    }

    fn hold(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}

// Sleep for `wait` unless the run flag clears first. Returns whether still running.
pub fn sleep_while_running(wait: Duration, running: &AtomicBool) -> bool {
    let deadline = Instant::now() + wait;
    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(STOP_CHECK_SLICE));
    }
    false
}

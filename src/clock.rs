//! Wall-clock helpers for the replay scheduler and a shared shutdown flag.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Remaining time below which a wait counts as done.
const MIN_SLEEP: Duration = Duration::ZERO;

/// Longest single sleep, so a pending shutdown is noticed quickly.
const MAX_SLICE: Duration = Duration::from_millis(100);

/// Wall-clock seconds since the UNIX epoch, fractional.
pub fn now_unix_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Cooperative cancellation flag shared between a signal handler and
/// long-running loops.
#[derive(Debug, Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Blocks until `deadline`, re-checking the clock after every sleep since
/// the OS may wake us early. Returns `false` if `shutdown` fired first.
pub fn sleep_until(deadline: Instant, shutdown: &Shutdown) -> bool {
    loop {
        if shutdown.is_triggered() {
            return false;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining <= MIN_SLEEP {
            return true;
        }
        std::thread::sleep(remaining.min(MAX_SLICE));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn past_deadline_returns_immediately() {
        let start = Instant::now();
        assert!(sleep_until(start, &Shutdown::new()));
        assert!(start.elapsed() < Duration::from_millis(20));
    }

    #[test]
    fn sleeps_at_least_until_deadline() {
        let deadline = Instant::now() + Duration::from_millis(250);
        assert!(sleep_until(deadline, &Shutdown::new()));
        let now = Instant::now();
        assert!(now >= deadline);
        assert!(now - deadline < Duration::from_millis(50));
    }

    #[test]
    fn shutdown_interrupts_long_wait() {
        let shutdown = Shutdown::new();
        let trigger = shutdown.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            trigger.trigger();
        });
        let start = Instant::now();
        assert!(!sleep_until(start + Duration::from_secs(30), &shutdown));
        assert!(start.elapsed() < Duration::from_secs(1));
        handle.join().unwrap();
    }

    #[test]
    fn unix_clock_is_past_2020() {
        assert!(now_unix_secs() > 1_577_836_800.0);
    }
}

use std::sync::atomic::{compiler_fence, Ordering};
use std::time::{Duration, Instant};

/// A simple stopwatch. Accumulates elapsed wall-clock time across any number
/// of start/stop intervals.
#[derive(Debug)]
pub struct PerfTimer {
    start_time: Option<Instant>,
    elapsed: Duration,
}

impl PerfTimer {
    /// Create a timer, and start it.
    pub fn new_started() -> Self {
        Self {
            start_time: Some(Instant::now()),
            elapsed: Duration::new(0, 0),
        }
    }

    /// Create a timer, but don't start it.
    pub fn new_stopped() -> Self {
        Self {
            start_time: None,
            elapsed: Duration::new(0, 0),
        }
    }

    /// Start the timer, which must not already be running.
    pub fn start(&mut self) {
        compiler_fence(Ordering::SeqCst);
        debug_assert!(self.start_time.is_none());
        self.start_time = Some(Instant::now());
        compiler_fence(Ordering::SeqCst);
    }

    /// Stop the timer, which must already be running.
    pub fn stop(&mut self) {
        compiler_fence(Ordering::SeqCst);
        debug_assert!(self.start_time.is_some());
        if let Some(t) = self.start_time.take() {
            self.elapsed += Instant::now().duration_since(t)
        }
        compiler_fence(Ordering::SeqCst);
    }

    /// Whether the timer is currently running.
    pub fn is_running(&self) -> bool {
        self.start_time.is_some()
    }

    /// Total time elapsed while the timer has been running.
    pub fn elapsed(&self) -> Duration {
        let mut e = self.elapsed;
        if let Some(t) = self.start_time.as_ref() {
            e += Instant::now().duration_since(*t)
        }
        e
    }
}

impl Default for PerfTimer {
    fn default() -> Self {
        Self::new_started()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulates_across_intervals() {
        let mut timer = PerfTimer::new_stopped();
        assert!(!timer.is_running());

        timer.start();
        std::thread::sleep(Duration::from_millis(10));
        timer.stop();
        let first = timer.elapsed();
        assert!(first >= Duration::from_millis(10));

        // elapsed doesn't advance while stopped
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(timer.elapsed(), first);

        timer.start();
        std::thread::sleep(Duration::from_millis(10));
        timer.stop();
        assert!(timer.elapsed() >= first + Duration::from_millis(10));
    }
}

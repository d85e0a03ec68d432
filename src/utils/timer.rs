use std::time::{Duration, Instant};

pub struct Timer {
    start_time: Option<Instant>,
    elapsed: Duration,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    pub fn new() -> Timer {
        Timer {
            start_time: None,
            elapsed: Duration::ZERO,
        }
    }

    // Start, or resume after a stop
    pub fn start(&mut self) {
        if self.start_time.is_none() {
            self.start_time = Some(Instant::now() - self.elapsed);
        }
    }

    pub fn stop(&mut self) {
        if self.start_time.is_some() {
            self.elapsed = self.elapsed_duration();
            self.start_time = None;
        }
    }

    pub fn reset(&mut self) {
        self.start_time = None;
        self.elapsed = Duration::ZERO;
    }

    // Reset and start in one step
    pub fn restart(&mut self) {
        self.elapsed = Duration::ZERO;
        self.start_time = Some(Instant::now());
    }

    pub fn is_running(&self) -> bool {
        self.start_time.is_some()
    }

    pub fn elapsed_duration(&self) -> Duration {
        match self.start_time {
            Some(start_time) => start_time.elapsed(),
            None => self.elapsed,
        }
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.elapsed_duration().as_millis()
    }
}

/// Coalesces a burst of triggers into a single firing.
///
/// Every call to [`Debounce::trigger`] restarts the quiet period. [`Debounce::poll`]
/// returns `true` exactly once, after `delay` has passed since the last trigger.
pub struct Debounce {
    timer: Timer,
    delay: Duration,
    pending: bool,
}

impl Debounce {
    pub fn new(delay: Duration) -> Self {
        Self {
            timer: Timer::new(),
            delay,
            pending: false,
        }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    pub fn trigger(&mut self) {
        self.pending = true;
        self.timer.restart();
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn cancel(&mut self) {
        self.pending = false;
        self.timer.reset();
    }

    /// Returns `true` when a pending trigger has been quiet for `delay`.
    pub fn poll(&mut self) -> bool {
        if !self.pending || self.timer.elapsed_duration() < self.delay {
            return false;
        }
        self.pending = false;
        self.timer.reset();
        true
    }
}

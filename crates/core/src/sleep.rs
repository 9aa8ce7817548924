use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::control::RunHandle;

/// Granularity at which sleeps re-check the run/pause flags.
pub const TICK: Duration = Duration::from_millis(100);

/// Monotonic time source. `now()` is measured from the clock's own origin.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
    fn sleep(&self, d: Duration);
}

pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, d: Duration) {
        thread::sleep(d);
    }
}

/// Simulated clock: `sleep` advances time instantly. Lets a loop that waits
/// minutes of wall time run in milliseconds.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, d: Duration) {
        self.nanos.fetch_add(d.as_nanos() as u64, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Acquire))
    }

    fn sleep(&self, d: Duration) {
        self.advance(d);
        thread::yield_now();
    }
}

/// Block while paused. Returns false if the run stopped meanwhile.
pub fn wait_while_paused(run: &RunHandle, clock: &dyn Clock) -> bool {
    while run.is_paused() {
        if !run.is_running() {
            return false;
        }
        clock.sleep(TICK);
    }
    run.is_running()
}

/// Sleep for `duration`, waking every [`TICK`] to check the flags.
///
/// Returns false as soon as the run stops. Time spent paused does not count
/// toward `duration`, and a sleep that ends while paused holds until resume.
pub fn interruptible_sleep(run: &RunHandle, clock: &dyn Clock, duration: Duration) -> bool {
    let mut remaining = duration;
    loop {
        if !run.is_running() {
            return false;
        }
        if run.is_paused() {
            clock.sleep(TICK);
            continue;
        }
        if remaining.is_zero() {
            return true;
        }
        let step = remaining.min(TICK);
        let before = clock.now();
        clock.sleep(step);
        remaining = remaining.saturating_sub(clock.now().saturating_sub(before));
    }
}

/// Convert a non-negative seconds value from config into a Duration.
/// Values too large for a Duration saturate to `Duration::MAX`.
pub fn secs(value: f64) -> Duration {
    if value.is_nan() || value <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
}

/// `d * factor`, saturating instead of panicking on overflow.
pub fn scale(d: Duration, factor: f64) -> Duration {
    secs(d.as_secs_f64() * factor)
}

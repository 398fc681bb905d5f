use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Pacing primitive for the emission loop. The harness measures inter-arrival
/// jitter at millisecond resolution, so implementations must not rely on the
/// scheduler's coarse sleep granularity alone.
pub trait PreciseSleep: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Sleeps coarsely for the bulk of the interval, then spins out the final
/// margin against the monotonic clock.
pub struct SpinSleeper {
    spin_margin: Duration,
}

impl SpinSleeper {
    pub fn new(spin_margin: Duration) -> Self {
        Self { spin_margin }
    }
}

impl Default for SpinSleeper {
    fn default() -> Self {
        Self::new(Duration::from_millis(1))
    }
}

impl PreciseSleep for SpinSleeper {
    fn sleep(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        let deadline = Instant::now() + duration;
        if duration > self.spin_margin {
            thread::sleep(duration - self.spin_margin);
        }
        while Instant::now() < deadline {
            std::hint::spin_loop();
        }
    }
}

/// Cooperative cancellation for the emission loop: the loop checks the token
/// once per iteration, so an in-flight send always completes before the loop
/// exits. Arming the token is idempotent.
#[derive(Clone)]
pub struct CancelToken {
    armed: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            armed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    pub fn cancel(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        !self.armed.load(Ordering::SeqCst)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

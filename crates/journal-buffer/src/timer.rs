use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::buffer::CoalescingBuffer;
use crate::test_support;

/// Number of sleep-accuracy samples taken before deciding whether the kernel
/// clock can be trusted for nano-sleeps.
pub(crate) const MAX_CHECKS_ON_SLEEP: u32 = 20;

/// The flush-timer loop.
///
/// Runs on its own thread between `start()` and `stop()`. While a sync is
/// pending it drives the timed flush; otherwise it parks on the buffer's spin
/// gate. The loop starts in sleep mode and permanently falls back to spinning
/// with explicit clock checks when the first [`MAX_CHECKS_ON_SLEEP`] samples
/// show the kernel routinely overshooting the requested sleep.
pub(crate) struct CheckTimer {
    buffer: CoalescingBuffer,
    shutdown: Arc<AtomicBool>,
    timeout: Duration,
    use_sleep: bool,
    checks: u32,
    failed_checks: u32,
}

impl CheckTimer {
    pub(crate) fn new(
        buffer: CoalescingBuffer,
        shutdown: Arc<AtomicBool>,
        timeout: Duration,
    ) -> Self {
        Self {
            buffer,
            shutdown,
            timeout,
            use_sleep: true,
            checks: 0,
            failed_checks: 0,
        }
    }

    pub(crate) fn run(mut self) {
        // Flushing resets the clock: a pending sync is served once per
        // timeout window, not once per loop iteration.
        let mut last_flush: Option<Instant> = None;

        while !self.shutdown.load(Ordering::Acquire) {
            if self.buffer.sync_pending() {
                // In sleep mode every wakeup flushes (the sleep itself paced
                // us); in spin mode the clock comparison is explicit.
                let due =
                    self.use_sleep || last_flush.is_none_or(|at| at.elapsed() > self.timeout);
                if due && self.buffer.timed_flush() {
                    last_flush = Some(Instant::now());
                }
            }

            self.sleep_if_possible();

            if self.buffer.gate().pass().is_err() {
                // A poisoned gate means a peer panicked mid-coordination;
                // there is nothing left to pace.
                return;
            }
        }
    }

    fn sleep_if_possible(&mut self) {
        if !self.use_sleep {
            return;
        }

        let elapsed = match test_support::sleep_override(self.timeout) {
            Some(simulated) => simulated,
            None => {
                let before = Instant::now();
                thread::sleep(self.timeout);
                before.elapsed()
            }
        };

        if self.checks < MAX_CHECKS_ON_SLEEP {
            // Tolerate overshoot up to half the timeout before counting the
            // sample as a miss.
            if elapsed > self.timeout + self.timeout / 2 {
                self.failed_checks += 1;
            }
            self.checks += 1;

            if self.checks >= MAX_CHECKS_ON_SLEEP && self.failed_checks > MAX_CHECKS_ON_SLEEP / 2 {
                warn!(
                    failed = self.failed_checks,
                    sampled = self.checks,
                    timeout_nanos = self.timeout.as_nanos() as u64,
                    "nano-sleep is overshooting on this kernel, flush timer falls back to spinning"
                );
                self.use_sleep = false;
            }
        }
    }
}

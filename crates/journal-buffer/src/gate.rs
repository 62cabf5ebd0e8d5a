use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::thread;

use crate::error::{BufferError, BufferResult};

/// Single-permit gate that parks the flush-timer thread while no sync is
/// pending.
///
/// The gate starts **open** (permit available). `close()` takes the permit,
/// blocking until it is available; `open()` publishes it back. The timer's
/// `pass()` is an acquire-yield-release cycle: against a closed gate it parks
/// the thread, against an open gate it degenerates into a cheap yield that
/// keeps the timer hot.
///
/// The permit is an atomic so the uncontended paths stay lock-free; the
/// mutex/condvar pair exists only for parking. `open()` publishes under the
/// mutex so a closer that just observed a missing permit cannot sleep through
/// the wakeup.
pub(crate) struct SpinGate {
    permit: AtomicBool,
    m: Mutex<()>,
    cv: Condvar,
}

impl SpinGate {
    pub(crate) fn new() -> Self {
        Self {
            permit: AtomicBool::new(true),
            m: Mutex::new(()),
            cv: Condvar::new(),
        }
    }

    #[inline]
    fn try_take(&self) -> bool {
        self.permit
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Takes the permit, parking the calling thread until it is available.
    pub(crate) fn close(&self) -> BufferResult<()> {
        if self.try_take() {
            return Ok(());
        }
        let mut guard = self
            .m
            .lock()
            .map_err(|_| BufferError::internal("spin gate mutex poisoned"))?;
        loop {
            if self.try_take() {
                return Ok(());
            }
            guard = self
                .cv
                .wait(guard)
                .map_err(|_| BufferError::internal("spin gate condvar poisoned"))?;
        }
    }

    /// Publishes the permit and wakes one parked thread.
    pub(crate) fn open(&self) -> BufferResult<()> {
        let _guard = self
            .m
            .lock()
            .map_err(|_| BufferError::internal("spin gate mutex poisoned"))?;
        self.permit.store(true, Ordering::Release);
        self.cv.notify_one();
        Ok(())
    }

    /// Acquire, yield, release. Parks while the gate is closed; otherwise a
    /// cheap yield.
    pub(crate) fn pass(&self) -> BufferResult<()> {
        self.close()?;
        thread::yield_now();
        self.open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn starts_open_and_pass_returns_immediately() {
        let gate = SpinGate::new();
        gate.pass().expect("pass through an open gate");
        gate.pass().expect("pass leaves the gate open");
    }

    #[test]
    fn close_is_reversed_by_open() {
        let gate = SpinGate::new();
        gate.close().expect("take the permit");
        gate.open().expect("publish the permit");
        gate.close().expect("take it again");
        gate.open().expect("and put it back");
    }

    #[test]
    fn pass_parks_until_opened() {
        let gate = Arc::new(SpinGate::new());
        gate.close().expect("close the gate");

        let (tx, rx) = mpsc::channel();
        let passer = {
            let gate = gate.clone();
            std::thread::spawn(move || {
                gate.pass().expect("pass");
                tx.send(()).unwrap();
            })
        };

        // The passer must stay parked while the gate is closed.
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        gate.open().expect("open the gate");
        rx.recv_timeout(Duration::from_secs(5))
            .expect("passer released after open");
        passer.join().unwrap();
    }
}

//! Test doubles and instrumentation hooks.
//!
//! Shared by the crate's own tests; exported so embedders can exercise their
//! journal integration against a recording backend without real I/O.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::observer::{CompletionHandle, WriteObserver};
use crate::watchdog::{PathId, Watchdog};

type SleepHook = dyn Fn(Duration) -> Option<Duration> + Send + Sync;

static SLEEP_HOOK: RwLock<Option<Arc<SleepHook>>> = RwLock::new(None);

/// Clears the sleep hook when dropped.
pub struct SleepHookGuard {
    _priv: (),
}

impl Drop for SleepHookGuard {
    fn drop(&mut self) {
        clear_sleep_hook();
    }
}

/// Installs a hook consulted by the flush timer before every nano-sleep.
///
/// Returning `Some(elapsed)` skips the real sleep and makes the timer treat
/// `elapsed` as the measured sleep duration, the lever for simulating a
/// kernel whose high-resolution sleep overshoots. Returning `None` falls
/// through to a real `thread::sleep`.
///
/// The hook is process-global; tests that install one should not run
/// concurrently with other timer-driven tests.
pub fn install_sleep_hook<F>(hook: F) -> SleepHookGuard
where
    F: Fn(Duration) -> Option<Duration> + Send + Sync + 'static,
{
    *SLEEP_HOOK.write() = Some(Arc::new(hook));
    SleepHookGuard { _priv: () }
}

pub fn clear_sleep_hook() {
    SLEEP_HOOK.write().take();
}

pub(crate) fn sleep_override(requested: Duration) -> Option<Duration> {
    let hook = SLEEP_HOOK.read().clone();
    hook.and_then(|hook| hook(requested))
}

/// One batch as received by a [`RecordingObserver`].
#[derive(Debug, Clone)]
pub struct FlushRecord {
    pub bytes: Vec<u8>,
    pub sync_requested: bool,
    pub callback_count: usize,
}

/// In-memory backend double.
///
/// Records every `flush_buffer` handoff and completes each callback inline,
/// behaving like a backend whose I/O finishes instantly. `remaining_bytes`
/// is a settable constant so tests can stage file-rollover conditions.
pub struct RecordingObserver {
    remaining_bytes: AtomicUsize,
    flushes: Mutex<Vec<FlushRecord>>,
}

impl RecordingObserver {
    pub fn new(remaining_bytes: usize) -> Arc<Self> {
        Arc::new(Self {
            remaining_bytes: AtomicUsize::new(remaining_bytes),
            flushes: Mutex::new(Vec::new()),
        })
    }

    pub fn set_remaining_bytes(&self, remaining: usize) {
        self.remaining_bytes.store(remaining, Ordering::Release);
    }

    pub fn flushes(&self) -> Vec<FlushRecord> {
        self.flushes.lock().clone()
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.lock().len()
    }

    /// Polls until `count` flushes arrived or `deadline` elapsed.
    pub fn wait_for_flushes(&self, count: usize, deadline: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if self.flush_count() >= count {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        self.flush_count() >= count
    }
}

impl WriteObserver for RecordingObserver {
    fn remaining_bytes(&self) -> usize {
        self.remaining_bytes.load(Ordering::Acquire)
    }

    fn new_buffer(&self, min_capacity: usize, requested_len: usize) -> Vec<u8> {
        Vec::with_capacity(min_capacity.max(requested_len))
    }

    fn flush_buffer(
        &self,
        buffer: Vec<u8>,
        sync_requested: bool,
        callbacks: Vec<Box<dyn CompletionHandle>>,
    ) {
        for callback in &callbacks {
            callback.done();
        }
        self.flushes.lock().push(FlushRecord {
            bytes: buffer,
            sync_requested,
            callback_count: callbacks.len(),
        });
    }
}

/// Shared log of callback outcomes, in notification order.
#[derive(Default)]
pub struct CompletionLog {
    done: Mutex<Vec<u64>>,
    errors: Mutex<Vec<(u64, i32, String)>>,
}

impl CompletionLog {
    pub fn done_ids(&self) -> Vec<u64> {
        self.done.lock().clone()
    }

    pub fn errors(&self) -> Vec<(u64, i32, String)> {
        self.errors.lock().clone()
    }
}

/// Completion handle that records its outcome into a [`CompletionLog`].
pub struct TrackingCallback {
    id: u64,
    log: Arc<CompletionLog>,
}

impl TrackingCallback {
    pub fn boxed(id: u64, log: Arc<CompletionLog>) -> Box<Self> {
        Box::new(Self { id, log })
    }
}

impl CompletionHandle for TrackingCallback {
    fn done(&self) {
        self.log.done.lock().push(self.id);
    }

    fn on_error(&self, code: i32, message: &str) {
        self.log.errors.lock().push((self.id, code, message.to_string()));
    }
}

/// Watchdog double that records `(path, entered)` events.
#[derive(Default)]
pub struct RecordingWatchdog {
    events: Mutex<Vec<(PathId, bool)>>,
}

impl RecordingWatchdog {
    pub fn events(&self) -> Vec<(PathId, bool)> {
        self.events.lock().clone()
    }
}

impl Watchdog for RecordingWatchdog {
    fn path_entered(&self, path: PathId) {
        self.events.lock().push((path, true));
    }

    fn path_left(&self, path: PathId) {
        self.events.lock().push((path, false));
    }
}

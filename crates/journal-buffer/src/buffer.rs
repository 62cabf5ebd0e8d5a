use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::BufferConfig;
use crate::error::{BufferError, BufferResult};
use crate::gate::SpinGate;
use crate::metrics::{FlushCounters, FlushCountersSnapshot, RateMeter};
use crate::observer::{CompletionHandle, RecordEncoder, WriteObserver};
use crate::region::BatchRegion;
use crate::timer::CheckTimer;
use crate::watchdog::{PathGuard, PathId, Watchdog};

struct TimerHandle {
    shutdown: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Everything the monitor protects.
struct BufferState {
    region: BatchRegion,
    /// Upper bound on the region's cursor until the next flush:
    /// `min(buffer_size, backend remaining bytes)`. Zero means the bound is
    /// stale and must be recomputed on the next admission.
    buffer_limit: usize,
    /// One completion handle per staged record, in admission order.
    callbacks: Vec<Box<dyn CompletionHandle>>,
    /// True between a successful `check_size` and its paired `add_record`.
    /// A non-forced flush observing it backs off so a half-reserved slot is
    /// never published.
    delay_flush: bool,
    /// Whether the spin gate is currently open for the timer.
    spinning: bool,
    observer: Option<Arc<dyn WriteObserver>>,
    timer: Option<TimerHandle>,
    rate_meter: Option<RateMeter>,
}

struct Core {
    config: BufferConfig,
    inner: Mutex<BufferState>,
    started: AtomicBool,
    /// Set by a sync-requesting admission, cleared by any successful flush.
    pending_sync: AtomicBool,
    gate: SpinGate,
    counters: Arc<FlushCounters>,
    watchdog: Option<Arc<dyn Watchdog>>,
}

/// Latency-bounded write-coalescing buffer.
///
/// Producers stage serialized records through the two-step
/// [`check_size`](Self::check_size)/[`add_record`](Self::add_record)
/// admission and the buffer hands the accumulated batch to the attached
/// [`WriteObserver`] when the next record would not fit, when the backend is
/// rolled, or, once a producer requested a sync, within the configured
/// timeout, enforced by a dedicated timer thread.
///
/// A single monitor serializes every public operation together with the
/// timer's flushes, so a producer never observes a partially reset batch.
/// The flush path itself is short: one bulk copy into a backend-supplied
/// buffer plus the handoff call.
///
/// The type is a cheap handle; clones share the same buffer. The timer
/// thread holds one clone between [`start`](Self::start) and
/// [`stop`](Self::stop).
#[derive(Clone)]
pub struct CoalescingBuffer {
    core: Arc<Core>,
}

impl CoalescingBuffer {
    pub fn new(config: BufferConfig) -> BufferResult<Self> {
        Self::with_watchdog(config, None)
    }

    pub fn with_watchdog(
        config: BufferConfig,
        watchdog: Option<Arc<dyn Watchdog>>,
    ) -> BufferResult<Self> {
        let config = config.validated()?;
        Ok(Self {
            core: Arc::new(Core {
                inner: Mutex::new(BufferState {
                    region: BatchRegion::new(config.buffer_size_bytes),
                    buffer_limit: 0,
                    callbacks: Vec::new(),
                    delay_flush: false,
                    spinning: false,
                    observer: None,
                    timer: None,
                    rate_meter: None,
                }),
                started: AtomicBool::new(false),
                pending_sync: AtomicBool::new(false),
                gate: SpinGate::new(),
                counters: Arc::new(FlushCounters::default()),
                watchdog,
                config,
            }),
        })
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.core.started.load(Ordering::Acquire)
    }

    /// Capacity of the batch region in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.core.config.buffer_size_bytes
    }

    #[inline]
    pub fn config(&self) -> &BufferConfig {
        &self.core.config
    }

    pub fn counters(&self) -> FlushCountersSnapshot {
        self.core.counters.snapshot()
    }

    #[inline]
    pub(crate) fn sync_pending(&self) -> bool {
        self.core.pending_sync.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn gate(&self) -> &SpinGate {
        &self.core.gate
    }

    /// Launches the timer thread (and the rate meter when configured).
    /// Idempotent while already started.
    pub fn start(&self) -> BufferResult<()> {
        let core = &self.core;
        let _path = PathGuard::enter(&core.watchdog, PathId::Start);
        let mut state = core.inner.lock();
        if self.is_started() {
            return Ok(());
        }

        // The timer starts parked; the first sync request opens the gate.
        core.gate.close()?;

        let rate_meter = if core.config.log_rates {
            match RateMeter::spawn(core.counters.clone()) {
                Ok(meter) => Some(meter),
                Err(err) => {
                    let _ = core.gate.open();
                    return Err(err);
                }
            }
        } else {
            None
        };

        let shutdown = Arc::new(AtomicBool::new(false));
        let timer = CheckTimer::new(self.clone(), shutdown.clone(), core.config.timeout());
        let timer_thread = thread::Builder::new()
            .name("journal-buffer-timeout".to_string())
            .spawn(move || timer.run());
        let timer_thread = match timer_thread {
            Ok(handle) => handle,
            Err(err) => {
                if let Some(meter) = rate_meter {
                    meter.shutdown();
                }
                let _ = core.gate.open();
                return Err(BufferError::internal(format!(
                    "failed to spawn flush timer: {err}"
                )));
            }
        };

        state.timer = Some(TimerHandle {
            shutdown,
            thread: timer_thread,
        });
        state.rate_meter = rate_meter;
        core.started.store(true, Ordering::Release);
        Ok(())
    }

    /// Drains staged records with a final flush, detaches the observer, and
    /// joins the timer thread. Idempotent while not started.
    pub fn stop(&self) -> BufferResult<()> {
        let core = &self.core;
        let _path = PathGuard::enter(&core.watchdog, PathId::Stop);
        let mut state = core.inner.lock();
        if !self.is_started() {
            return Ok(());
        }

        self.flush_internal(&mut state, false)?;

        state.observer = None;

        let timer = state.timer.take();
        if let Some(timer) = &timer {
            timer.shutdown.store(true, Ordering::Release);
        }
        // A parked timer has to get through the gate to observe the shutdown
        // flag.
        core.gate.open()?;

        if let Some(rate_meter) = state.rate_meter.take() {
            rate_meter.shutdown();
        }

        if let Some(TimerHandle { thread, .. }) = timer {
            thread
                .join()
                .map_err(|_| BufferError::internal("flush timer thread panicked"))?;
        }

        core.started.store(false, Ordering::Release);
        Ok(())
    }

    /// Installs (or clears) the backend. Any batch staged for a previously
    /// attached backend is flushed to it before the switch.
    pub fn set_observer(&self, observer: Option<Arc<dyn WriteObserver>>) -> BufferResult<()> {
        let core = &self.core;
        let _path = PathGuard::enter(&core.watchdog, PathId::SetObserver);
        let mut state = core.inner.lock();
        if !self.is_started() {
            return Err(BufferError::NotStarted);
        }
        if state.observer.is_some() {
            self.flush_internal(&mut state, false)?;
        }
        state.observer = observer;
        Ok(())
    }

    /// Reserves `size` bytes in the batch region.
    ///
    /// Must be immediately followed by the paired [`add_record`](Self::add_record)
    /// (or [`add_record_encoded`](Self::add_record_encoded)) committing
    /// exactly `size` bytes; interleaving other operations on the same record
    /// is a usage error.
    ///
    /// Returns `Ok(false)` when the record no longer fits the backend's
    /// current file; the caller rolls the backend to a fresh file and
    /// retries. No reservation is held in that case.
    pub fn check_size(&self, size: usize) -> BufferResult<bool> {
        let core = &self.core;
        let _path = PathGuard::enter(&core.watchdog, PathId::CheckSize);
        let mut state = core.inner.lock();
        if !self.is_started() {
            return Err(BufferError::NotStarted);
        }
        if size > core.config.buffer_size_bytes {
            return Err(BufferError::RecordTooLarge {
                size,
                capacity: core.config.buffer_size_bytes,
            });
        }

        if state.buffer_limit == 0 || state.region.pos() + size > state.buffer_limit {
            // Either the record does not fit what is left of the window, or
            // a flush just invalidated the window and it must be recomputed
            // from the backend's remaining file space.
            self.flush_internal(&mut state, false)?;

            let observer = state.observer.as_ref().ok_or(BufferError::NoObserver)?;
            let remaining = observer.remaining_bytes();
            if size > remaining {
                return Ok(false);
            }
            state.buffer_limit = remaining.min(core.config.buffer_size_bytes);
        }

        state.delay_flush = true;
        Ok(true)
    }

    /// Commits a pre-encoded record reserved by [`check_size`](Self::check_size).
    ///
    /// With `sync` set the record is marked durable-urgent: the pending-sync
    /// watermark is raised and the timer thread starts timing out toward a
    /// flush.
    pub fn add_record(
        &self,
        payload: &[u8],
        sync: bool,
        callback: Box<dyn CompletionHandle>,
    ) -> BufferResult<()> {
        let _path = PathGuard::enter(&self.core.watchdog, PathId::AddRecord);
        self.add_record_inner(&payload, sync, callback)
    }

    /// Commits a record by encoding it straight into the batch region,
    /// avoiding the staging copy of [`add_record`](Self::add_record).
    pub fn add_record_encoded(
        &self,
        encoder: &dyn RecordEncoder,
        sync: bool,
        callback: Box<dyn CompletionHandle>,
    ) -> BufferResult<()> {
        let _path = PathGuard::enter(&self.core.watchdog, PathId::AddRecord);
        self.add_record_inner(encoder, sync, callback)
    }

    fn add_record_inner(
        &self,
        encoder: &dyn RecordEncoder,
        sync: bool,
        callback: Box<dyn CompletionHandle>,
    ) -> BufferResult<()> {
        let core = &self.core;
        let mut state = core.inner.lock();
        if !self.is_started() {
            return Err(BufferError::NotStarted);
        }

        state.delay_flush = false;

        let len = encoder.encoded_size();
        state.region.write_with(len, |dest| encoder.encode(dest))?;
        state.callbacks.push(callback);

        if sync {
            core.pending_sync.store(true, Ordering::Release);
            self.start_spin(&mut state)?;
        }
        Ok(())
    }

    /// Hands the accumulated batch to the backend, unless a reservation is in
    /// flight (in which case this is a no-op; the reservation's commit will
    /// be flushed later).
    pub fn flush(&self) -> BufferResult<()> {
        self.flush_with(false)
    }

    /// Flushes even while a reservation is in flight. Used when the backend
    /// is rolling to a new file and staged bytes must go out immediately.
    pub fn force_flush(&self) -> BufferResult<()> {
        self.flush_with(true)
    }

    fn flush_with(&self, force: bool) -> BufferResult<()> {
        let core = &self.core;
        let _path = PathGuard::enter(&core.watchdog, PathId::Flush);
        let mut state = core.inner.lock();
        if !self.is_started() {
            return Err(BufferError::NotStarted);
        }
        self.flush_locked(&mut state, force)
    }

    /// Flush entered on behalf of another public path. Bracketed as its own
    /// nested flush-path event, so a watchdog sees the flush inside the
    /// triggering operation.
    fn flush_internal(&self, state: &mut BufferState, force: bool) -> BufferResult<()> {
        let _path = PathGuard::enter(&self.core.watchdog, PathId::Flush);
        self.flush_locked(state, force)
    }

    /// Timer-driven flush. Never blocks on the monitor: contention means a
    /// producer or the stopper is in there, and the attempt is retried on
    /// the timer's next iteration. Returns whether an attempt was made.
    pub(crate) fn timed_flush(&self) -> bool {
        let Some(mut state) = self.core.inner.try_lock() else {
            return false;
        };
        if !self.is_started() {
            return false;
        }
        if let Err(err) = self.flush_internal(&mut state, false) {
            warn!(error = %err, "timed flush failed");
        }
        true
    }

    fn flush_locked(&self, state: &mut BufferState, force: bool) -> BufferResult<()> {
        let core = &self.core;
        if (force || !state.delay_flush) && state.region.pos() > 0 {
            let pos = state.region.pos();
            let Some(observer) = state.observer.clone() else {
                // Admission requires an observer, so staged bytes imply one;
                // nothing to hand off otherwise.
                return Ok(());
            };

            core.counters.add_bytes_flushed(pos as u64);

            // The destination may come from a pool and arrive with stale
            // contents; its length ends up as exactly the staged byte count.
            let mut dest = observer.new_buffer(core.config.buffer_size_bytes, pos);
            dest.clear();
            dest.extend_from_slice(state.region.filled());

            let callbacks = mem::take(&mut state.callbacks);
            let sync_requested = core.pending_sync.load(Ordering::Acquire);
            debug!(
                bytes = pos,
                callbacks = callbacks.len(),
                sync = sync_requested,
                "handing batch to backend"
            );
            observer.flush_buffer(dest, sync_requested, callbacks);

            self.stop_spin(state)?;
            core.pending_sync.store(false, Ordering::Release);
            state.region.reset();
            state.buffer_limit = 0;
            core.counters.incr_flushes();
        }
        Ok(())
    }

    fn start_spin(&self, state: &mut BufferState) -> BufferResult<()> {
        if !state.spinning {
            self.core.gate.open()?;
            state.spinning = true;
        }
        Ok(())
    }

    fn stop_spin(&self, state: &mut BufferState) -> BufferResult<()> {
        if state.spinning {
            // Reclaim the permit so the timer parks again. The timer only
            // holds it across a yield, so this acquire is bounded.
            self.core.gate.close()?;
            state.spinning = false;
        }
        Ok(())
    }
}

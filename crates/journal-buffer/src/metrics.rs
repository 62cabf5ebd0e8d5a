use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, bounded};
use tracing::info;

use crate::error::{BufferError, BufferResult};

/// Sampling period of the optional rate meter.
const RATE_SAMPLE_INTERVAL: Duration = Duration::from_secs(2);

/// Monotonic flush counters, updated on every flush and readable from any
/// thread without the buffer's monitor.
#[derive(Default)]
pub struct FlushCounters {
    bytes_flushed: AtomicU64,
    flushes_done: AtomicU64,
}

impl FlushCounters {
    #[inline]
    pub fn add_bytes_flushed(&self, bytes: u64) {
        self.bytes_flushed.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub fn incr_flushes(&self) {
        self.flushes_done.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> FlushCountersSnapshot {
        FlushCountersSnapshot {
            bytes_flushed: self.bytes_flushed.load(Ordering::Relaxed),
            flushes_done: self.flushes_done.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the flush counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushCountersSnapshot {
    /// Total payload bytes handed to the backend since construction.
    pub bytes_flushed: u64,
    /// Total flushes handed to the backend since construction.
    pub flushes_done: u64,
}

/// Named metric sample with a stable name, suitable for export to a metrics
/// registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferMetricSample {
    pub name: &'static str,
    pub value: u64,
}

impl FlushCountersSnapshot {
    /// Returns the counters as named samples with stable metric names.
    pub fn samples(&self) -> impl Iterator<Item = BufferMetricSample> {
        [
            BufferMetricSample {
                name: "journal_buffer_bytes_flushed_total",
                value: self.bytes_flushed,
            },
            BufferMetricSample {
                name: "journal_buffer_flushes_total",
                value: self.flushes_done,
            },
        ]
        .into_iter()
    }
}

enum RateMeterCommand {
    Shutdown,
}

/// Background worker that logs write/flush rates while the buffer is
/// started.
///
/// Purely observational: it reads the flush counters every two seconds and
/// emits the deltas. It never touches the monitor and swallows every
/// irregularity (a missed tick just widens the next sample window).
pub(crate) struct RateMeter {
    command_tx: Sender<RateMeterCommand>,
    worker: Option<JoinHandle<()>>,
}

impl RateMeter {
    pub(crate) fn spawn(counters: Arc<FlushCounters>) -> BufferResult<Self> {
        let (command_tx, command_rx) = bounded(1);
        let worker = thread::Builder::new()
            .name("journal-buffer-rates".to_string())
            .spawn(move || run_rate_meter(command_rx, counters))
            .map_err(|err| BufferError::internal(format!("failed to spawn rate meter: {err}")))?;
        Ok(Self {
            command_tx,
            worker: Some(worker),
        })
    }

    pub(crate) fn shutdown(mut self) {
        let _ = self.command_tx.send(RateMeterCommand::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_rate_meter(command_rx: Receiver<RateMeterCommand>, counters: Arc<FlushCounters>) {
    let mut last_sample_at = Instant::now();
    let mut last = counters.snapshot();

    loop {
        match command_rx.recv_timeout(RATE_SAMPLE_INTERVAL) {
            Ok(RateMeterCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let now = Instant::now();
        let elapsed = now.duration_since(last_sample_at).as_secs_f64();
        if elapsed <= 0.0 {
            continue;
        }

        let current = counters.snapshot();
        let bytes_per_sec =
            (current.bytes_flushed.saturating_sub(last.bytes_flushed)) as f64 / elapsed;
        let flushes_per_sec =
            (current.flushes_done.saturating_sub(last.flushes_done)) as f64 / elapsed;

        info!(
            bytes_per_sec = bytes_per_sec as u64,
            mib_per_sec = bytes_per_sec / (1024.0 * 1024.0),
            flushes_per_sec,
            "journal write rate"
        );

        last_sample_at = now;
        last = current;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let counters = FlushCounters::default();
        counters.add_bytes_flushed(100);
        counters.add_bytes_flushed(50);
        counters.incr_flushes();

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.bytes_flushed, 150);
        assert_eq!(snapshot.flushes_done, 1);
    }

    #[test]
    fn snapshot_exports_stable_names() {
        let snapshot = FlushCountersSnapshot {
            bytes_flushed: 42,
            flushes_done: 7,
        };
        let samples: Vec<_> = snapshot.samples().collect();
        assert!(
            samples
                .iter()
                .any(|s| s.name == "journal_buffer_bytes_flushed_total" && s.value == 42)
        );
        assert!(
            samples
                .iter()
                .any(|s| s.name == "journal_buffer_flushes_total" && s.value == 7)
        );
    }

    #[test]
    fn rate_meter_shuts_down_promptly() {
        let counters = Arc::new(FlushCounters::default());
        let meter = RateMeter::spawn(counters).expect("spawn");
        let started = Instant::now();
        meter.shutdown();
        assert!(started.elapsed() < RATE_SAMPLE_INTERVAL);
    }
}

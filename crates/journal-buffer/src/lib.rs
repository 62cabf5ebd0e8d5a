//! Latency-bounded write-coalescing buffer for journal backends.
//!
//! This crate sits between journal producers (which append serialized
//! records at high rates, some requesting a durable sync) and a
//! block-oriented backend that performs the actual writes. Records are
//! accumulated in a single pre-allocated batch region and handed to the
//! backend as one unit, amortizing syscall cost while keeping sync latency
//! bounded by a configurable timeout.
//!
//! ## Architecture Overview
//!
//! - **Admission**: the two-step [`check_size`](CoalescingBuffer::check_size)
//!   / [`add_record`](CoalescingBuffer::add_record) reservation. The split
//!   exists because batch capacity depends on the backend's remaining file
//!   space, which producers cannot know; a `false` from `check_size` tells
//!   the caller to roll the backend to a fresh file.
//! - **Flush engine**: transfers the staged bytes and their completion
//!   handles to the backend in one handoff and resets the region. Triggered
//!   by admission overflow, by an explicit [`flush`](CoalescingBuffer::flush)
//!   / [`force_flush`](CoalescingBuffer::force_flush), or by the timer.
//! - **Timer thread**: fires the flush once a sync has been pending for the
//!   configured timeout, adapting between nano-sleep and pure spinning based
//!   on observed kernel sleep accuracy.
//! - **Spin gate**: a single-permit gate that parks the timer while no sync
//!   is pending, so an idle buffer burns no CPU.
//! - **Rate meter**: optional 2-second samples of bytes/sec and flushes/sec
//!   through `tracing`.
//!
//! The backend, record serialization, file rotation, and fsync policy are
//! external collaborators behind the [`WriteObserver`] trait; durability is
//! whatever the backend provides.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use journal_buffer::test_support::{CompletionLog, RecordingObserver, TrackingCallback};
//! use journal_buffer::{BufferConfig, CoalescingBuffer, WriteObserver};
//!
//! let buffer = CoalescingBuffer::new(BufferConfig {
//!     buffer_size_bytes: 1024,
//!     timeout_nanos: 1_000_000,
//!     ..BufferConfig::default()
//! })?;
//! buffer.start()?;
//!
//! let backend = RecordingObserver::new(10_000);
//! buffer.set_observer(Some(backend.clone() as Arc<dyn WriteObserver>))?;
//!
//! let log = Arc::new(CompletionLog::default());
//! if buffer.check_size(5)? {
//!     buffer.add_record(b"hello", false, TrackingCallback::boxed(1, log.clone()))?;
//! }
//!
//! buffer.stop()?;
//! assert_eq!(backend.flush_count(), 1);
//! assert_eq!(log.done_ids(), vec![1]);
//! # Ok::<(), journal_buffer::BufferError>(())
//! ```
//!
//! ## Thread Safety
//!
//! All public operations are serialized on one internal monitor, which the
//! timer thread's flushes share; records reach the backend in
//! monitor-acquisition order and are never split across flushes. The
//! pending-sync watermark and the flush counters are atomics readable from
//! any thread.

pub mod config;
pub mod error;
pub mod metrics;
pub mod observer;
pub mod test_support;
pub mod watchdog;

mod buffer;
mod gate;
mod region;
mod timer;

pub use buffer::CoalescingBuffer;
pub use config::BufferConfig;
pub use error::{BufferError, BufferResult};
pub use metrics::{BufferMetricSample, FlushCounters, FlushCountersSnapshot};
pub use observer::{CompletionHandle, RecordEncoder, WriteObserver};
pub use watchdog::{PathId, Watchdog};

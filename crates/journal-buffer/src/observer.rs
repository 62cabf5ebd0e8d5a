//! Interfaces between the coalescing buffer and its collaborators.
//!
//! The buffer core never performs I/O itself. Accumulated batches are handed
//! to a [`WriteObserver`] (the journal backend owning the underlying file),
//! and per-record completion is reported through [`CompletionHandle`]s that
//! travel with the batch. [`RecordEncoder`] is the zero-copy admission path:
//! it writes a record straight into the batch region instead of staging it in
//! a scratch buffer first.

/// The journal backend consuming flushed batches.
///
/// Implementations are expected to enqueue the I/O and return promptly;
/// `flush_buffer` is invoked while the buffer's monitor is held and must
/// never block on I/O completion or call back into the buffer synchronously.
pub trait WriteObserver: Send + Sync {
    /// How many more bytes fit in the currently-open underlying file.
    ///
    /// Called under the buffer's monitor; must be cheap and non-blocking.
    fn remaining_bytes(&self) -> usize;

    /// Supply a destination buffer (possibly pooled) whose **capacity** is at
    /// least `min_capacity`. The buffer core fills it and sets its length to
    /// exactly `requested_len` before handing it back via `flush_buffer`.
    fn new_buffer(&self, min_capacity: usize, requested_len: usize) -> Vec<u8>;

    /// Accept a filled batch for I/O.
    ///
    /// Ownership of `callbacks` transfers to the backend, which must notify
    /// each handle exactly once on completion or failure, in order.
    fn flush_buffer(
        &self,
        buffer: Vec<u8>,
        sync_requested: bool,
        callbacks: Vec<Box<dyn CompletionHandle>>,
    );
}

/// Per-record completion token.
///
/// The buffer core never invokes these; only the backend does, after the
/// batch carrying the record has been written (or has failed).
pub trait CompletionHandle: Send {
    /// The record reached the backend's durability level.
    fn done(&self);

    /// The write failed. `code` is backend-defined.
    fn on_error(&self, code: i32, message: &str);
}

/// A record that serializes itself directly into the batch region.
///
/// `encode` must write exactly `encoded_size()` bytes, the same size the
/// producer passed to `check_size` when reserving the slot.
pub trait RecordEncoder {
    fn encoded_size(&self) -> usize;

    fn encode(&self, dest: &mut [u8]);
}

impl RecordEncoder for &[u8] {
    fn encoded_size(&self) -> usize {
        self.len()
    }

    fn encode(&self, dest: &mut [u8]) {
        dest.copy_from_slice(self);
    }
}

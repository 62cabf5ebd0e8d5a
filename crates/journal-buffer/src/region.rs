use crate::error::{BufferError, BufferResult};

/// Fixed-capacity staging area that accumulates record payloads between
/// flushes.
///
/// The region is allocated once, at construction, and never grows. All
/// mutation happens under the owning buffer's monitor; the region itself only
/// maintains the write cursor.
pub(crate) struct BatchRegion {
    buf: Box<[u8]>,
    pos: usize,
}

impl BatchRegion {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            pos: 0,
        }
    }

    /// Current write cursor: the number of staged bytes.
    #[inline]
    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// The staged bytes, `buf[0..pos]`.
    #[inline]
    pub(crate) fn filled(&self) -> &[u8] {
        &self.buf[..self.pos]
    }

    /// Copies `payload` at the write cursor and advances it.
    pub(crate) fn append(&mut self, payload: &[u8]) -> BufferResult<()> {
        self.write_with(payload.len(), |dest| dest.copy_from_slice(payload))
    }

    /// Hands `len` bytes at the write cursor to `fill` and advances the
    /// cursor. The admission protocol guarantees the space was reserved, so
    /// running out of room here means the reserve/commit pairing was broken.
    pub(crate) fn write_with<F>(&mut self, len: usize, fill: F) -> BufferResult<()>
    where
        F: FnOnce(&mut [u8]),
    {
        let end = self.pos.checked_add(len).filter(|&end| end <= self.buf.len());
        let Some(end) = end else {
            return Err(BufferError::internal(format!(
                "record commit of {len} bytes overruns the batch region at {}/{}",
                self.pos,
                self.buf.len()
            )));
        };
        fill(&mut self.buf[self.pos..end]);
        self.pos = end;
        Ok(())
    }

    /// Resets the write cursor. The backing storage is reused as-is.
    #[inline]
    pub(crate) fn reset(&mut self) {
        self.pos = 0;
    }
}

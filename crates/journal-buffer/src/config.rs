use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::time::Duration;

use crate::error::{BufferError, BufferResult};

/// Default capacity of the batch region (490 KiB).
///
/// Sized so that a full region amortizes the backend's per-write syscall cost
/// without holding more than a few hundred records hostage to one flush.
const DEFAULT_BUFFER_SIZE_BYTES: usize = 490 * 1024;

/// Default sync latency bound in nanoseconds (~3.3 ms).
///
/// A sync-requesting producer is flushed no later than roughly this long
/// after the request, so the default trades a few milliseconds of latency
/// for large write batches.
const DEFAULT_TIMEOUT_NANOS: u64 = 3_333_333;

/// Construction parameters for a [`CoalescingBuffer`](crate::CoalescingBuffer).
///
/// # Example
///
/// ```rust
/// use journal_buffer::BufferConfig;
///
/// let config = BufferConfig {
///     buffer_size_bytes: 64 * 1024,
///     timeout_nanos: 1_000_000, // 1 ms sync latency bound
///     ..BufferConfig::default()
/// }
/// .validated()?;
/// # Ok::<(), journal_buffer::BufferError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Capacity of the batch region in bytes.
    ///
    /// Must be at least as large as the largest record the journal will ever
    /// submit; a record bigger than this is rejected as fatal at admission.
    pub buffer_size_bytes: usize,

    /// Upper bound, in nanoseconds, on how long a pending sync may wait
    /// before the timer thread forces a flush.
    pub timeout_nanos: u64,

    /// Emit periodic write/flush rate samples through `tracing`.
    pub log_rates: bool,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            buffer_size_bytes: DEFAULT_BUFFER_SIZE_BYTES,
            timeout_nanos: DEFAULT_TIMEOUT_NANOS,
            log_rates: false,
        }
    }
}

impl BufferConfig {
    /// Returns the configuration unchanged if every field is usable.
    ///
    /// A zero-sized region or a zero timeout cannot operate (the admission
    /// path would reject every record, the timer would busy-flush), so both
    /// are rejected instead of being silently clamped.
    pub fn validated(self) -> BufferResult<Self> {
        if self.buffer_size_bytes == 0 {
            return Err(BufferError::invalid_config("buffer_size_bytes must be > 0"));
        }
        if self.timeout_nanos == 0 {
            return Err(BufferError::invalid_config("timeout_nanos must be > 0"));
        }
        Ok(self)
    }

    /// The sync latency bound as a [`Duration`].
    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_nanos(self.timeout_nanos)
    }
}

impl Display for BufferConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BufferConfig(buffer_size_bytes={}, timeout_nanos={}, log_rates={})",
            self.buffer_size_bytes, self.timeout_nanos, self.log_rates
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_reasonable() {
        let cfg = BufferConfig::default();
        assert!(cfg.buffer_size_bytes > 0);
        assert!(cfg.timeout_nanos > 0);
        assert!(!cfg.log_rates);
        assert_eq!(cfg.timeout(), Duration::from_nanos(DEFAULT_TIMEOUT_NANOS));
    }

    #[test]
    fn validated_rejects_zero_fields() {
        let zero_size = BufferConfig {
            buffer_size_bytes: 0,
            ..BufferConfig::default()
        };
        assert!(matches!(
            zero_size.validated(),
            Err(BufferError::InvalidConfig(_))
        ));

        let zero_timeout = BufferConfig {
            timeout_nanos: 0,
            ..BufferConfig::default()
        };
        assert!(matches!(
            zero_timeout.validated(),
            Err(BufferError::InvalidConfig(_))
        ));
    }

    #[test]
    fn serde_round_trip() {
        let cfg = BufferConfig {
            buffer_size_bytes: 128 * 1024,
            timeout_nanos: 500_000,
            log_rates: true,
        };
        let json = serde_json::to_string(&cfg).expect("serialize");
        let decoded: BufferConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(cfg, decoded);
    }
}

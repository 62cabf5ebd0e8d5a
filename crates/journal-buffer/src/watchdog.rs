use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

/// Named public paths of the buffer, reported to a [`Watchdog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathId {
    Start,
    Stop,
    Flush,
    CheckSize,
    AddRecord,
    SetObserver,
}

impl Display for PathId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PathId::Start => write!(f, "start"),
            PathId::Stop => write!(f, "stop"),
            PathId::Flush => write!(f, "flush"),
            PathId::CheckSize => write!(f, "check_size"),
            PathId::AddRecord => write!(f, "add_record"),
            PathId::SetObserver => write!(f, "set_observer"),
        }
    }
}

/// External liveness watchdog.
///
/// Every public buffer operation is bracketed by `path_entered`/`path_left`
/// so an embedding journal can detect a path that entered and never left
/// (a stuck backend, a deadlocked caller). Implementations must be cheap and
/// non-blocking; with no watchdog attached the notifications cost nothing.
pub trait Watchdog: Send + Sync {
    fn path_entered(&self, path: PathId);

    fn path_left(&self, path: PathId);
}

/// RAII bracket around one public operation: `path_left` fires on drop, on
/// every exit path including errors.
pub(crate) struct PathGuard<'a> {
    watchdog: Option<&'a dyn Watchdog>,
    path: PathId,
}

impl<'a> PathGuard<'a> {
    pub(crate) fn enter(watchdog: &'a Option<Arc<dyn Watchdog>>, path: PathId) -> Self {
        let watchdog = watchdog.as_deref();
        if let Some(watchdog) = watchdog {
            watchdog.path_entered(path);
        }
        Self { watchdog, path }
    }
}

impl Drop for PathGuard<'_> {
    fn drop(&mut self) {
        if let Some(watchdog) = self.watchdog {
            watchdog.path_left(self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingWatchdog;

    #[test]
    fn guard_brackets_the_path() {
        let recording = Arc::new(RecordingWatchdog::default());
        let watchdog: Option<Arc<dyn Watchdog>> = Some(recording.clone());

        {
            let _guard = PathGuard::enter(&watchdog, PathId::Flush);
            assert_eq!(recording.events(), vec![(PathId::Flush, true)]);
        }
        assert_eq!(
            recording.events(),
            vec![(PathId::Flush, true), (PathId::Flush, false)]
        );
    }

    #[test]
    fn absent_watchdog_is_a_noop() {
        let watchdog: Option<Arc<dyn Watchdog>> = None;
        let _guard = PathGuard::enter(&watchdog, PathId::Start);
    }
}

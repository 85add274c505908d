use std::sync::{Mutex, PoisonError};

/// Whether the whole run builds once or is re-executed on file changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// A one-time build.
    #[default]
    Build,
    /// The outermost target is re-run whenever watched files change.
    Watch,
}

/// Run-wide flags set by the driver before any target starts.
#[derive(Debug, Default)]
pub(crate) struct WatchState {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    mode: Mode,
    outermost: Option<String>,
}

impl WatchState {
    pub(crate) fn set_mode(&self, mode: Mode) {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).mode = mode;
    }

    pub(crate) fn mode(&self) -> Mode {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).mode
    }

    pub(crate) fn set_outermost_target(&self, name: impl Into<String>) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .outermost = Some(name.into());
    }

    pub(crate) fn outermost_target(&self) -> Option<String> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .outermost
            .clone()
    }
}

//! Abort tracking

use portable_atomic::{AtomicBool, Ordering};

/// Records that the fault path was entered through `abort()`.
///
/// An abort is a plain function call, so the register window seen by the
/// fault path belongs to the abort machinery rather than to the code that
/// failed. Once set, the flag stays set until the next reset.
#[derive(Debug)]
pub struct AbortState {
    called: AtomicBool,
}

impl AbortState {
    /// Creates a cleared flag.
    pub const fn new() -> Self {
        Self {
            called: AtomicBool::new(false),
        }
    }

    /// Sets the flag. There is no way to clear it.
    pub fn set(&self) {
        self.called.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once [`set`](Self::set) has been called.
    pub fn is_set(&self) -> bool {
        self.called.load(Ordering::SeqCst)
    }
}

impl Default for AbortState {
    fn default() -> Self {
        Self::new()
    }
}

/// The flag used by the entry points.
pub static ABORT_STATE: AbortState = AbortState::new();

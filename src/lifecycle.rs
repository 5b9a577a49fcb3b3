use std::sync::{
    atomic::{AtomicU8, Ordering},
    Mutex, PoisonError,
};

/// Where the process-wide tracker is in its life.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    /// No instrumented call has happened yet
    Uninitialized,
    /// The exit hook is registered and calls are being tracked
    Initialized,
    /// The exit report has been written. Nothing comes after this.
    ReportEmitted,
}

impl Phase {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Uninitialized,
            1 => Self::Initialized,
            _ => Self::ReportEmitted,
        }
    }
}

/// A one-way `Uninitialized -> Initialized -> ReportEmitted` state machine
/// that can be polled at any point, including from inside the initializer.
pub struct Lifecycle {
    phase: AtomicU8,
    init_lock: Mutex<()>,
}

impl Lifecycle {
    pub const fn new() -> Self {
        Self {
            phase: AtomicU8::new(Phase::Uninitialized as u8),
            init_lock: Mutex::new(()),
        }
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Run `init` if nobody has yet, and move to [`Phase::Initialized`].
    /// Returns whether this call was the one that ran it. Callers that lose
    /// the race wait for the winner to finish.
    pub fn initialize(&self, init: impl FnOnce()) -> bool {
        if self.phase() != Phase::Uninitialized {
            return false;
        }
        let _guard = self.init_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.phase() != Phase::Uninitialized {
            return false;
        }
        init();
        self.phase.store(Phase::Initialized as u8, Ordering::Release);
        true
    }

    /// Move from [`Phase::Initialized`] to [`Phase::ReportEmitted`]. Only the
    /// first call after initialization gets `true`.
    pub fn finish(&self) -> bool {
        self.phase
            .compare_exchange(
                Phase::Initialized as u8,
                Phase::ReportEmitted as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

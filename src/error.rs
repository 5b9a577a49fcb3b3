use thiserror::Error;

use crate::origin::Origin;

/// Conditions the tracker refuses to continue past.
#[non_exhaustive]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrackError {
    /// A pointer was freed (or reallocated away) that has no live record:
    /// either it was already freed, or it never came from us.
    #[error("Double free or invalid free detected ({address:#x} at {origin})")]
    InvalidFree { address: usize, origin: Origin },
    /// `realloc(NULL, ..)` under [`ReallocNull::Fatal`](crate::ReallocNull::Fatal).
    #[error("Double free or invalid free detected (realloc of NULL at {origin})")]
    ReallocNull { origin: Origin },
    /// `configure()` was called after the tracker had already been created.
    #[error("the tracker is already initialized; configure() must come first")]
    AlreadyConfigured,
    /// `atexit()` refused to register the report hook.
    #[error("could not register the exit report hook (atexit returned {0})")]
    AtExit(i32),
}

impl TrackError {
    /// Where the offending call came from, if it was a tracked call.
    pub fn origin(&self) -> Option<&Origin> {
        match self {
            Self::InvalidFree { origin, .. } | Self::ReallocNull { origin } => Some(origin),
            Self::AlreadyConfigured | Self::AtExit(_) => None,
        }
    }
}

/// The registry has no slots left. Not an error anyone outside the tracker
/// ever sees: the allocation simply goes untracked.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("allocation registry is full ({capacity} slots)")]
pub struct RegistryFull {
    pub capacity: usize,
}

use std::{
    fmt,
    io::{self, Write},
};

use crate::origin::Origin;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Warning,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        })
    }
}

/// `[LEVEL] (file:line) message`
pub fn diag_line(level: Level, origin: &Origin, msg: impl fmt::Display) -> String {
    format!("[{level}] ({origin}) {msg}")
}

/// Write a diagnostic line straight to stderr. These are the detector's
/// output, so they do not go through `log` and show up whether or not the
/// host installed a logger.
#[cold]
pub fn diag(level: Level, origin: &Origin, msg: impl fmt::Display) {
    // nothing sensible to do if stderr is gone
    let _ = writeln!(io::stderr().lock(), "{}", diag_line(level, origin, msg));
}

#[cold]
pub fn warn(origin: &Origin, msg: impl fmt::Display) {
    diag(Level::Warning, origin, msg)
}

use std::{borrow::Cow, fmt, panic::Location};

use serde::{Deserialize, Serialize};

/// Longest file name we keep for an origin, in bytes. Longer names are cut at
/// the last char boundary that fits.
pub const MAX_FILE_LEN: usize = 254;

/// The call site that performed an allocation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Origin {
    pub file: Cow<'static, str>,
    pub line: u32,
}

impl Origin {
    /// Build an origin from a file name and line, truncating the file name to
    /// [`MAX_FILE_LEN`] bytes.
    pub fn new(file: impl Into<Cow<'static, str>>, line: u32) -> Self {
        let file = match file.into() {
            Cow::Borrowed(s) => Cow::Borrowed(truncate(s)),
            Cow::Owned(mut s) => {
                let len = truncate(&s).len();
                s.truncate(len);
                Cow::Owned(s)
            }
        };
        Self { file, line }
    }

    /// The location of whoever called the (`#[track_caller]`) function this is
    /// invoked from.
    #[track_caller]
    pub fn caller() -> Self {
        Self::from(Location::caller())
    }
}

impl From<&'static Location<'static>> for Origin {
    fn from(location: &'static Location<'static>) -> Self {
        Self::new(location.file(), location.line())
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

fn truncate(s: &str) -> &str {
    if s.len() <= MAX_FILE_LEN {
        return s;
    }
    let mut end = MAX_FILE_LEN;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

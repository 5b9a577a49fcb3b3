//! Leak and misuse detection for code that manages memory with
//! `malloc`/`calloc`/`realloc`/`free`.
//!
//! Call [`malloc`], [`calloc`], [`realloc`] and [`free`] instead of the C
//! functions (C hosts include `include/leakcheck.h`). Every call is recorded
//! against its call site, and when the process exits a report of everything
//! that was never freed is printed to stdout:
//!
//! ```no_run
//! unsafe {
//!     let a = leakcheck::malloc(1024);
//!     let _b = leakcheck::malloc(2048);
//!     leakcheck::free(a);
//! }
//! // at exit: "Memory Leaked: 2048 bytes", with the file and line of `_b`
//! ```
//!
//! Freeing something that was never allocated, or freeing twice, prints an
//! error and exits the process with a failure status. Failed allocations and
//! `free(NULL)` only print a warning.
//!
//! The registry holds a fixed number of records ([`Config::capacity`]). Once
//! they are used up, further allocations still work but are not tracked.

pub mod alloc;
pub mod config;
pub mod error;
pub mod externc;
pub mod lifecycle;
pub mod origin;
pub mod report;
pub mod serialize;
pub mod util;

pub use crate::{
    alloc::{
        global::{
            calloc, calloc_at, configure, free, free_at, malloc, malloc_at, phase, realloc,
            realloc_at, snapshot, stats,
        },
        registry::{AllocationRecord, Registry, Stats, DEFAULT_CAPACITY},
        tracker::Tracker,
    },
    config::{Config, ReallocNull},
    error::{RegistryFull, TrackError},
    origin::Origin,
    report::{LeakEntry, Report, Summary},
};

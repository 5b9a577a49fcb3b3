//! The process-wide tracker and the functions hosts call instead of the C
//! allocator.
//!
//! The first tracked call registers an `atexit()` hook that prints the
//! [`Report`] to stdout when the process ends. An invalid or double free
//! prints an error line and exits the process with a failure status; the
//! exit hook still runs, so the report reflects everything up to that call.
//!
//! These functions are intended for single threaded hosts. They will not
//! corrupt anything when called concurrently, but interleaved `realloc` and
//! `free` of the same pointer from different threads is not a supported use.

use std::{ffi::c_void, io, process};

use once_cell::sync::{Lazy, OnceCell};

use super::{
    backend::Libc,
    registry::{Registry, Stats},
    tracker::Tracker,
};
use crate::{
    config::Config,
    error::TrackError,
    lifecycle::{Lifecycle, Phase},
    origin::Origin,
    report::Report,
    util::print::{self, Level},
};

static CONFIG: OnceCell<Config> = OnceCell::new();

static TRACKER: Lazy<Tracker<Libc>> =
    Lazy::new(|| Tracker::new(Libc, *CONFIG.get_or_init(Config::default)));

static LIFECYCLE: Lifecycle = Lifecycle::new();

/// Set the configuration of the process-wide tracker. Has to happen before
/// the first tracked call. [`snapshot`] and [`stats`] do not count as one.
pub fn configure(config: Config) -> Result<(), TrackError> {
    if LIFECYCLE.phase() != Phase::Uninitialized {
        return Err(TrackError::AlreadyConfigured);
    }
    CONFIG
        .set(config)
        .map_err(|_| TrackError::AlreadyConfigured)
}

pub fn phase() -> Phase {
    LIFECYCLE.phase()
}

/// The current state of the process-wide registry. This does not count as
/// the exit report: that one is still printed when the process ends.
pub fn snapshot() -> Report {
    match Lazy::get(&TRACKER) {
        Some(tracker) => tracker.report(),
        None => Report::from_registry(&Registry::new()),
    }
}

pub fn stats() -> Stats {
    Lazy::get(&TRACKER).map(Tracker::stats).unwrap_or_default()
}

fn tracker() -> &'static Tracker<Libc> {
    LIFECYCLE.initialize(register_exit_report);
    &TRACKER
}

fn register_exit_report() {
    // SAFETY: `report_at_exit` is a plain `extern "C" fn()` that never unwinds
    let rc = unsafe { libc::atexit(report_at_exit) };
    if rc != 0 {
        log::error!("{}", TrackError::AtExit(rc));
    } else {
        log::debug!("leak detector initialized, report registered for exit");
    }
}

extern "C" fn report_at_exit() {
    if !LIFECYCLE.finish() {
        return;
    }
    let report = TRACKER.report();
    log::debug!(
        "writing exit report: {} live of {} tracked allocations",
        report.leaks.len(),
        report.summary.allocations
    );
    // stdout may already be closed; there is no one left to tell
    let _ = report.write_to(io::stdout().lock());
}

#[cold]
fn fatal(err: TrackError) -> ! {
    log::error!("{err}");
    match &err {
        TrackError::InvalidFree { address, origin } => print::diag(
            Level::Error,
            origin,
            format_args!("Double free or invalid free detected ({address:#x})"),
        ),
        TrackError::ReallocNull { origin } => print::diag(
            Level::Error,
            origin,
            "Double free or invalid free detected (realloc of NULL)",
        ),
        _ => {}
    }
    process::exit(libc::EXIT_FAILURE)
}

/// `malloc(size)`, tracked against the caller's location.
///
/// # Safety
///
/// Same as `malloc()`.
#[track_caller]
pub unsafe fn malloc(size: usize) -> *mut c_void {
    malloc_at(size, Origin::caller())
}

/// `calloc(count, size)`, tracked against the caller's location.
///
/// # Safety
///
/// Same as `calloc()`.
#[track_caller]
pub unsafe fn calloc(count: usize, size: usize) -> *mut c_void {
    calloc_at(count, size, Origin::caller())
}

/// `realloc(ptr, size)`, tracked against the caller's location. Exits the
/// process if the allocator moved `ptr` and `ptr` was not a live tracked
/// allocation. See [`Tracker::realloc`] for `realloc(p, 0)` on glibc.
///
/// # Safety
///
/// Same as `realloc()`.
#[track_caller]
pub unsafe fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    realloc_at(ptr, size, Origin::caller())
}

/// `free(ptr)`, tracked against the caller's location. Exits the process if
/// `ptr` is not null and not a live tracked allocation.
///
/// # Safety
///
/// Same as `free()`, except that null and untracked pointers are caught
/// instead of reaching the allocator.
#[track_caller]
pub unsafe fn free(ptr: *mut c_void) {
    free_at(ptr, Origin::caller())
}

/// [`malloc`] with an explicit origin.
///
/// # Safety
///
/// Same as `malloc()`.
pub unsafe fn malloc_at(size: usize, origin: Origin) -> *mut c_void {
    tracker().malloc(size, origin)
}

/// [`calloc`] with an explicit origin.
///
/// # Safety
///
/// Same as `calloc()`.
pub unsafe fn calloc_at(count: usize, size: usize, origin: Origin) -> *mut c_void {
    tracker().calloc(count, size, origin)
}

/// [`realloc`] with an explicit origin.
///
/// # Safety
///
/// See [`realloc`].
pub unsafe fn realloc_at(ptr: *mut c_void, size: usize, origin: Origin) -> *mut c_void {
    tracker()
        .realloc(ptr, size, origin)
        .unwrap_or_else(|err| fatal(err))
}

/// [`free`] with an explicit origin.
///
/// # Safety
///
/// See [`free`].
pub unsafe fn free_at(ptr: *mut c_void, origin: Origin) {
    if let Err(err) = tracker().free(ptr, origin) {
        fatal(err)
    }
}

//! The instrumented allocation functions.
//!
//! A [`Tracker`] forwards `malloc`/`calloc`/`realloc`/`free` to a [`RawAlloc`]
//! and keeps a [`Registry`] in step with what the allocator hands out. It
//! never decides to kill the process: anything fatal comes back as a
//! [`TrackError`] and the process-wide wrappers in [`super::global`] decide
//! what that means.
//!
//! The registry sits behind a mutex that is only held for the bookkeeping,
//! never across a call into the allocator. That keeps concurrent use memory
//! safe, but the tracker is still meant for single threaded hosts: a
//! `realloc` racing a `free` of the same pointer is reported, not untangled.

use std::{
    ffi::c_void,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
};

use super::{
    backend::RawAlloc,
    registry::{Registry, Stats},
};
use crate::{
    config::{Config, ReallocNull},
    error::TrackError,
    origin::Origin,
    report::Report,
    util::print,
};

const ALLOC_FAILED: &str = "Memory allocation failed";
const NULL_FREE: &str = "Attempted to free a NULL pointer";

pub struct Tracker<B> {
    backend: B,
    config: Config,
    registry: Mutex<Registry>,
    /// Set once we have complained about the registry filling up
    full_reported: AtomicBool,
}

impl<B> Tracker<B>
where
    B: RawAlloc,
{
    pub fn new(backend: B, config: Config) -> Self {
        Self {
            backend,
            config,
            registry: Mutex::new(Registry::with_capacity(config.capacity)),
            full_reported: AtomicBool::new(false),
        }
    }

    pub const fn config(&self) -> &Config {
        &self.config
    }

    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Lock the registry. A panic while it was held cannot leave a half
    /// written record behind, so poisoning is ignored.
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn track(&self, ptr: *mut c_void, size: usize, origin: Origin) {
        if let Err(full) = self.registry().record(ptr as usize, size, origin) {
            if !self.full_reported.swap(true, Ordering::Relaxed) {
                log::warn!("{full}; further allocations are not tracked");
            }
        }
    }

    /// `malloc(size)`, recorded against `origin`. A failed allocation is
    /// warned about and returned as null.
    ///
    /// # Safety
    ///
    /// Same as [`RawAlloc::malloc`].
    pub unsafe fn malloc(&self, size: usize, origin: Origin) -> *mut c_void {
        let ptr = self.backend.malloc(size);
        if ptr.is_null() {
            print::warn(&origin, ALLOC_FAILED);
            return ptr;
        }
        self.track(ptr, size, origin);
        ptr
    }

    /// `calloc(count, size)`, recorded as `count * size` bytes.
    ///
    /// # Safety
    ///
    /// Same as [`RawAlloc::calloc`].
    pub unsafe fn calloc(&self, count: usize, size: usize, origin: Origin) -> *mut c_void {
        let ptr = self.backend.calloc(count, size);
        if ptr.is_null() {
            print::warn(&origin, ALLOC_FAILED);
            return ptr;
        }
        // a successful calloc cannot have overflowed, but a fake backend can
        // lie about that
        self.track(ptr, count.saturating_mul(size), origin);
        ptr
    }

    /// `realloc(ptr, size)`.
    ///
    /// - If the allocator fails, `ptr` is returned unchanged and whatever
    ///   record it has stays as it was. This includes pointers handed out
    ///   after the registry filled up, which have no record at all.
    /// - Otherwise the old record is released and a new one made for the
    ///   returned pointer, even if it did not move. A `ptr` without a live
    ///   record is an invalid free.
    ///
    /// A null `ptr` follows [`Config::realloc_null`].
    ///
    /// glibc treats `realloc(p, 0)` as `free(p)` and returns null. That looks
    /// like a failure here, so `p` keeps its record, and freeing `p` again
    /// afterwards reaches the allocator as a genuine double free.
    ///
    /// # Safety
    ///
    /// Same as [`RawAlloc::realloc`]. `ptr` reaches the allocator before the
    /// registry is consulted.
    pub unsafe fn realloc(
        &self,
        ptr: *mut c_void,
        size: usize,
        origin: Origin,
    ) -> Result<*mut c_void, TrackError> {
        if ptr.is_null() {
            return match self.config.realloc_null {
                ReallocNull::Fatal => Err(TrackError::ReallocNull { origin }),
                ReallocNull::Allocate => Ok(self.malloc_via_realloc(size, origin)),
            };
        }

        let new = self.backend.realloc(ptr, size);
        if new.is_null() {
            print::warn(&origin, ALLOC_FAILED);
            return Ok(ptr);
        }

        let address = ptr as usize;
        if self.registry().release(address).is_none() {
            return Err(TrackError::InvalidFree { address, origin });
        }
        self.track(new, size, origin);
        Ok(new)
    }

    unsafe fn malloc_via_realloc(&self, size: usize, origin: Origin) -> *mut c_void {
        let ptr = self.backend.realloc(std::ptr::null_mut(), size);
        if ptr.is_null() {
            print::warn(&origin, ALLOC_FAILED);
            return ptr;
        }
        self.track(ptr, size, origin);
        ptr
    }

    /// `free(ptr)`. Freeing null is warned about and ignored. Freeing anything
    /// without a live record is an invalid free and the pointer is not passed
    /// on to the allocator.
    ///
    /// # Safety
    ///
    /// Same as [`RawAlloc::free`], except that null and untracked pointers are
    /// caught before they reach the allocator.
    pub unsafe fn free(&self, ptr: *mut c_void, origin: Origin) -> Result<(), TrackError> {
        if ptr.is_null() {
            print::warn(&origin, NULL_FREE);
            return Ok(());
        }

        let address = ptr as usize;
        if self.registry().release(address).is_none() {
            return Err(TrackError::InvalidFree { address, origin });
        }
        self.backend.free(ptr);
        Ok(())
    }

    pub fn stats(&self) -> Stats {
        self.registry().stats()
    }

    pub fn is_live(&self, ptr: *const c_void) -> bool {
        self.registry().is_live(ptr as usize)
    }

    /// A snapshot of the current state, ready to be rendered.
    pub fn report(&self) -> Report {
        Report::from_registry(&self.registry())
    }
}

#[cfg(test)]
mod tests {
    use std::ptr;

    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::*;
    use crate::alloc::backend::fake::FakeHeap;

    fn tracker() -> Tracker<FakeHeap> {
        Tracker::new(FakeHeap::new(), Config::default())
    }

    fn at(line: u32) -> Origin {
        Origin::new("host.c", line)
    }

    #[test]
    fn malloc_then_free_leaks_nothing() {
        let t = tracker();
        unsafe {
            let p = t.malloc(1024, at(1));
            assert!(!p.is_null());
            t.free(p, at(2)).unwrap();
        }
        let stats = t.stats();
        assert_eq!((stats.allocations, stats.frees), (1, 1));
        assert_eq!(stats.leaked(), Some(0));
        assert_eq!(t.backend().freed.borrow().len(), 1);
    }

    #[test]
    fn unfreed_allocation_is_a_leak_with_its_origin() {
        let t = tracker();
        let p = unsafe { t.malloc(2048, at(5)) };

        let report = t.report();
        assert_eq!(report.summary.leaked, Some(2048));
        assert_eq!(report.summary.allocations, 1);
        assert_eq!(report.summary.frees, 0);
        assert_eq!(report.leaks.len(), 1);
        assert_eq!(report.leaks[0].address, p as usize);
        assert_eq!(report.leaks[0].size, 2048);
        assert_eq!(report.leaks[0].origin, at(5));
    }

    #[test]
    fn only_the_unfreed_one_is_reported() {
        let t = tracker();
        unsafe {
            let a = t.malloc(10, at(1));
            let b = t.malloc(20, at(2));
            t.free(a, at(3)).unwrap();

            let report = t.report();
            assert_eq!(report.summary.leaked, Some(20));
            assert_eq!(report.leaks.len(), 1);
            assert_eq!(report.leaks[0].address, b as usize);
        }
    }

    #[test]
    fn failed_malloc_returns_null_and_records_nothing() {
        let t = tracker();
        t.backend().fail_next(2);
        unsafe {
            assert!(t.malloc(8, at(1)).is_null());
            assert!(t.calloc(2, 8, at(2)).is_null());
        }
        assert_eq!(t.stats(), Stats::default());
    }

    #[test]
    fn calloc_records_the_product() {
        let t = tracker();
        unsafe { t.calloc(4, 12, at(1)) };
        assert_eq!(t.stats().total_allocated, 48);
    }

    #[test]
    fn free_of_null_is_a_warning_only() {
        let t = tracker();
        unsafe { t.free(ptr::null_mut(), at(1)).unwrap() };
        assert_eq!(t.stats(), Stats::default());
        assert!(t.backend().freed.borrow().is_empty());
    }

    #[test]
    fn free_of_untracked_pointer_is_invalid_and_changes_nothing() {
        let t = tracker();
        unsafe { t.malloc(8, at(1)) };
        let before = t.stats();

        let err = unsafe { t.free(0xdead0 as *mut c_void, at(2)) }.unwrap_err();
        assert_eq!(
            err,
            TrackError::InvalidFree {
                address: 0xdead0,
                origin: at(2)
            }
        );
        assert_eq!(t.stats(), before);
        assert!(t.backend().freed.borrow().is_empty());
    }

    #[test]
    fn double_free_is_caught_on_the_second_call() {
        let t = tracker();
        unsafe {
            let p = t.malloc(8, at(1));
            assert!(t.free(p, at(2)).is_ok());
            assert!(matches!(
                t.free(p, at(3)),
                Err(TrackError::InvalidFree { .. })
            ));
        }
        assert_eq!(t.stats().frees, 1);
        assert_eq!(t.backend().freed.borrow().len(), 1);
    }

    #[test]
    fn recycled_address_is_not_a_double_free() {
        let t = tracker();
        unsafe {
            let p = t.malloc(8, at(1));
            t.free(p, at(2)).unwrap();
            t.backend().reuse(p as usize);
            let q = t.malloc(16, at(3));
            assert_eq!(p, q);
            t.free(q, at(4)).unwrap();
        }
        let stats = t.stats();
        assert_eq!(stats.frees, 2);
        assert_eq!(stats.leaked(), Some(0));
    }

    #[test]
    fn realloc_moves_the_record() {
        let t = tracker();
        unsafe {
            let p = t.malloc(8, at(1));
            let q = t.realloc(p, 64, at(2)).unwrap();
            assert_ne!(p, q);
            assert!(!t.is_live(p));
            assert!(t.is_live(q));
        }
        let report = t.report();
        assert_eq!(report.summary.allocations, 2);
        assert_eq!(report.summary.frees, 1);
        assert_eq!(report.summary.leaked, Some(64));
        assert_eq!(report.leaks[0].origin, at(2));
    }

    #[test]
    fn failed_realloc_keeps_the_original() {
        let t = tracker();
        unsafe {
            let p = t.malloc(8, at(1));
            t.backend().fail_next(1);
            let q = t.realloc(p, usize::MAX / 2, at(2)).unwrap();
            assert_eq!(p, q);
            assert!(t.is_live(p));
        }
        let stats = t.stats();
        assert_eq!((stats.allocations, stats.frees), (1, 0));
        assert_eq!(stats.total_allocated, 8);
    }

    #[test]
    fn realloc_of_untracked_pointer_is_invalid() {
        let t = tracker();
        let err = unsafe { t.realloc(0xbeef0 as *mut c_void, 8, at(1)) }.unwrap_err();
        assert!(matches!(err, TrackError::InvalidFree { address: 0xbeef0, .. }));
        assert_eq!(t.stats(), Stats::default());
    }

    #[test]
    fn failed_realloc_of_an_untracked_allocation_returns_it() {
        let t = Tracker::new(FakeHeap::new(), Config::new().capacity(1));
        unsafe {
            let _a = t.malloc(8, at(1));
            let b = t.malloc(8, at(2));
            assert!(!t.is_live(b));

            t.backend().fail_next(1);
            assert_eq!(t.realloc(b, 16, at(3)), Ok(b));
        }
        let stats = t.stats();
        assert_eq!((stats.allocations, stats.frees), (1, 0));
        assert_eq!(stats.untracked, 1);
    }

    #[test]
    fn unlimited_capacity_tracks_normally() {
        let t = Tracker::new(FakeHeap::new(), Config::new().capacity(usize::MAX));
        unsafe {
            let p = t.malloc(8, at(1));
            assert!(t.is_live(p));
            t.free(p, at(2)).unwrap();
        }
        assert_eq!(t.stats().leaked(), Some(0));
    }

    #[test]
    fn realloc_of_null_allocates_by_default() {
        let t = tracker();
        let p = unsafe { t.realloc(ptr::null_mut(), 32, at(1)) }.unwrap();
        assert!(!p.is_null());
        assert!(t.is_live(p));
        assert_eq!(t.stats().total_allocated, 32);
    }

    #[test]
    fn realloc_of_null_fails_under_the_fatal_policy() {
        let t = Tracker::new(
            FakeHeap::new(),
            Config::new().realloc_null(ReallocNull::Fatal),
        );
        let err = unsafe { t.realloc(ptr::null_mut(), 32, at(9)) }.unwrap_err();
        assert_eq!(err, TrackError::ReallocNull { origin: at(9) });
        assert_eq!(t.stats(), Stats::default());
    }

    #[test]
    fn overflowing_the_registry_undercounts() {
        let t = Tracker::new(FakeHeap::new(), Config::new().capacity(3));
        let ptrs: Vec<_> = (0..5).map(|i| unsafe { t.malloc(10, at(i)) }).collect();
        assert!(ptrs.iter().all(|p| !p.is_null()));

        let report = t.report();
        assert_eq!(report.summary.allocations, 3);
        assert_eq!(report.summary.total_allocated, 30);
        assert_eq!(report.summary.untracked, 2);
        assert_eq!(report.leaks.len(), 3);
        assert!(!t.is_live(ptrs[4]));
    }

    #[test]
    fn random_churn_matches_a_model() {
        let mut rng = StdRng::seed_from_u64(0x1ea4);
        let t = Tracker::new(FakeHeap::new(), Config::new().capacity(10_000));
        let mut live: Vec<(*mut c_void, usize)> = Vec::new();
        let (mut allocated, mut freed) = (0usize, 0usize);

        for i in 0..2_000u32 {
            let op = if live.is_empty() { 0 } else { rng.gen_range(0..3) };
            match op {
                0 => {
                    let size = rng.gen_range(1..4096);
                    let p = unsafe { t.malloc(size, at(i)) };
                    live.push((p, size));
                    allocated += size;
                }
                1 => {
                    let (p, size) = live.swap_remove(rng.gen_range(0..live.len()));
                    unsafe { t.free(p, at(i)).unwrap() };
                    freed += size;
                }
                _ => {
                    let index = rng.gen_range(0..live.len());
                    let (p, old) = live[index];
                    let size = rng.gen_range(1..4096);
                    let q = unsafe { t.realloc(p, size, at(i)).unwrap() };
                    live[index] = (q, size);
                    freed += old;
                    allocated += size;
                }
            }
        }

        let stats = t.stats();
        assert_eq!(stats.total_allocated, allocated);
        assert_eq!(stats.total_freed, freed);
        assert_eq!(stats.leaked(), Some(live.iter().map(|(_, s)| s).sum()));
        assert_eq!(t.report().leaks.len(), live.len());
    }
}

use std::ffi::c_void;

/// The allocator that actually hands out memory. The tracker only forwards to
/// it and watches what comes back.
///
/// # Safety
///
/// Implementations must follow the C contract for the four functions: a null
/// return means failure, a non-null return from `malloc`/`calloc`/`realloc`
/// is a pointer no other live allocation of this allocator has, and `realloc`
/// leaves the original allocation untouched when it fails.
pub unsafe trait RawAlloc {
    /// # Safety
    ///
    /// Same as `malloc()`.
    unsafe fn malloc(&self, size: usize) -> *mut c_void;

    /// # Safety
    ///
    /// Same as `calloc()`.
    unsafe fn calloc(&self, count: usize, size: usize) -> *mut c_void;

    /// # Safety
    ///
    /// Same as `realloc()`: `ptr` is null or a live allocation of this
    /// allocator.
    unsafe fn realloc(&self, ptr: *mut c_void, size: usize) -> *mut c_void;

    /// # Safety
    ///
    /// Same as `free()`: `ptr` is a live allocation of this allocator.
    unsafe fn free(&self, ptr: *mut c_void);
}

/// The C library's allocator.
#[derive(Clone, Copy, Debug, Default)]
pub struct Libc;

// SAFETY: these are the C functions the contract is written against.
unsafe impl RawAlloc for Libc {
    unsafe fn malloc(&self, size: usize) -> *mut c_void {
        libc::malloc(size)
    }

    unsafe fn calloc(&self, count: usize, size: usize) -> *mut c_void {
        libc::calloc(count, size)
    }

    unsafe fn realloc(&self, ptr: *mut c_void, size: usize) -> *mut c_void {
        libc::realloc(ptr, size)
    }

    unsafe fn free(&self, ptr: *mut c_void) {
        libc::free(ptr)
    }
}

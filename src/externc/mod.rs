//! C entry points. `include/leakcheck.h` maps `malloc`, `calloc`, `realloc`
//! and `free` onto these, passing `__FILE__` and `__LINE__` along.

use std::ffi::{c_char, CStr};

use libc::{c_int, c_void, size_t};

use crate::{
    alloc::global::{calloc_at, free_at, malloc_at, realloc_at},
    origin::Origin,
};

/// # Safety
///
/// `file` is null or a nul-terminated string.
unsafe fn origin(file: *const c_char, line: c_int) -> Origin {
    let file = if file.is_null() {
        "<unknown>".to_owned()
    } else {
        CStr::from_ptr(file).to_string_lossy().into_owned()
    };
    Origin::new(file, u32::try_from(line).unwrap_or(0))
}

/// # Safety
///
/// Same as `malloc()`; `file` is null or a nul-terminated string.
#[no_mangle]
pub unsafe extern "C" fn leakcheck_malloc(
    size: size_t,
    file: *const c_char,
    line: c_int,
) -> *mut c_void {
    malloc_at(size, origin(file, line))
}

/// # Safety
///
/// Same as `calloc()`; `file` is null or a nul-terminated string.
#[no_mangle]
pub unsafe extern "C" fn leakcheck_calloc(
    count: size_t,
    size: size_t,
    file: *const c_char,
    line: c_int,
) -> *mut c_void {
    calloc_at(count, size, origin(file, line))
}

/// # Safety
///
/// Same as `realloc()`; `file` is null or a nul-terminated string.
#[no_mangle]
pub unsafe extern "C" fn leakcheck_realloc(
    data: *mut c_void,
    size: size_t,
    file: *const c_char,
    line: c_int,
) -> *mut c_void {
    realloc_at(data, size, origin(file, line))
}

/// # Safety
///
/// Same as `free()`; `file` is null or a nul-terminated string.
#[no_mangle]
pub unsafe extern "C" fn leakcheck_free(data: *mut c_void, file: *const c_char, line: c_int) {
    free_at(data, origin(file, line))
}

#[cfg(test)]
mod tests {
    use std::ptr;

    use super::*;

    #[test]
    fn origin_from_c_strings() {
        let file = c"src/main.c";
        let named = unsafe { origin(file.as_ptr(), 42) };
        assert_eq!(named, Origin::new("src/main.c", 42));

        let unnamed = unsafe { origin(ptr::null(), -1) };
        assert_eq!(unnamed, Origin::new("<unknown>", 0));
    }
}

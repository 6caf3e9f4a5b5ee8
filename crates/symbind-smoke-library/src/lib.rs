//! C-ABI fixture library loaded by the symbind integration tests.
//!
//! Built as both a `cdylib` (the artifact the tests dlopen) and an `rlib`
//! (so depending on this crate forces the artifact to be built).

use std::ffi::CStr;
use std::os::raw::c_char;

#[no_mangle]
pub extern "C" fn smoke_add(a: i32, b: i32) -> i32 {
    a.wrapping_add(b)
}

#[no_mangle]
pub extern "C" fn smoke_scale(x: f64, factor: f64) -> f64 {
    x * factor
}

#[no_mangle]
pub extern "C" fn smoke_mix(count: i32, step: f64) -> f64 {
    f64::from(count) * step
}

#[no_mangle]
pub extern "C" fn smoke_status() -> *const c_char {
    b"ok\0".as_ptr() as *const c_char
}

#[no_mangle]
pub extern "C" fn smoke_version() -> *const c_char {
    concat!(env!("CARGO_PKG_VERSION"), "\0").as_ptr() as *const c_char
}

/// Byte length of a NUL-terminated string.
///
/// # Safety
/// `text` must point to a valid NUL-terminated buffer.
#[no_mangle]
pub unsafe extern "C" fn smoke_text_len(text: *const c_char) -> i64 {
    if text.is_null() {
        return -1;
    }
    unsafe { CStr::from_ptr(text) }.to_bytes().len() as i64
}

#[no_mangle]
pub extern "C" fn smoke_handle_echo(handle: usize) -> usize {
    handle
}

#[no_mangle]
pub extern "C" fn smoke_noop() {}

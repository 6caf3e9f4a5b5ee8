//! POSIX dynamic loader variant (`dlopen`/`dlsym`/`dlclose`).

use std::ffi::CStr;
use std::os::raw::c_int;
use std::path::Path;
use std::sync::Arc;

use libloading::os::unix::{Library, RTLD_GLOBAL, RTLD_NOW};
use parking_lot::Mutex;
use tracing::debug;

use super::{normalize_separators, NativeLibrary, NativeLoader, SymbolAddr};

/// Identify the running kernel via `uname(2)`.
///
/// The kernel name is what distinguishes the two POSIX loader ABIs (Darwin
/// vs. everything else); the reported OS family is not trusted for this.
pub(crate) fn detect_kernel() -> String {
    // SAFETY: utsname is plain data; uname either fills it and returns 0 or
    // leaves it untouched and returns nonzero, which we check.
    let mut uts: libc::utsname = unsafe { std::mem::zeroed() };
    if unsafe { libc::uname(&mut uts) } != 0 {
        return "unknown".to_string();
    }
    // SAFETY: sysname is a NUL-terminated buffer filled by uname above.
    let sysname = unsafe { CStr::from_ptr(uts.sysname.as_ptr()) };
    sysname.to_string_lossy().into_owned()
}

/// `dlopen`-based loader, opening with `RTLD_GLOBAL | RTLD_NOW` so symbols
/// are bound immediately and visible to libraries loaded afterwards.
pub struct PosixLoader {
    variant: String,
    flags: c_int,
    diagnostics: Arc<Mutex<Option<String>>>,
}

impl PosixLoader {
    pub fn detect() -> Self {
        let kernel = detect_kernel();
        debug!(kernel = %kernel, "selected POSIX dynamic loader");
        Self {
            variant: format!("posix ({kernel})"),
            flags: RTLD_GLOBAL | RTLD_NOW,
            diagnostics: Arc::new(Mutex::new(None)),
        }
    }
}

impl NativeLoader for PosixLoader {
    fn variant(&self) -> &str {
        &self.variant
    }

    fn open(&self, path: &Path) -> std::result::Result<Box<dyn NativeLibrary>, String> {
        let path = normalize_separators(path, '\\', '/');
        // SAFETY: dlopen runs the library's initializers; the caller is
        // responsible for only loading trusted payloads (see crate docs).
        match unsafe { Library::open(Some(&path), self.flags) } {
            Ok(library) => Ok(Box::new(PosixLibrary {
                library,
                diagnostics: Arc::clone(&self.diagnostics),
            })),
            Err(err) => {
                let reason = err.to_string();
                *self.diagnostics.lock() = Some(reason.clone());
                Err(reason)
            }
        }
    }

    fn last_error(&self) -> Option<String> {
        self.diagnostics.lock().clone()
    }
}

struct PosixLibrary {
    library: Library,
    diagnostics: Arc<Mutex<Option<String>>>,
}

impl NativeLibrary for PosixLibrary {
    fn resolve(&self, symbol: &str) -> std::result::Result<SymbolAddr, String> {
        // SAFETY: the symbol is only stored as an address here; the dispatch
        // layer transmutes it to the exact fn type its signature declares.
        match unsafe { self.library.get::<unsafe extern "C" fn()>(symbol.as_bytes()) } {
            Ok(sym) => Ok(SymbolAddr(*sym as *const ())),
            Err(err) => {
                let reason = err.to_string();
                *self.diagnostics.lock() = Some(reason.clone());
                Err(reason)
            }
        }
    }

    fn close(self: Box<Self>) -> std::result::Result<(), String> {
        let this = *self;
        this.library.close().map_err(|err| err.to_string())
    }
}

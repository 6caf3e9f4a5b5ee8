//! Platform abstraction over the OS dynamic-library primitives.
//!
//! One interface — open, resolve, close, last-error — with a variant per
//! loader ABI: the Windows native loader and the POSIX dynamic loader
//! (which further identifies the kernel by name, because one OS family can
//! host two different loader ABIs). The variant is selected once at process
//! start and never re-checked per call.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;

#[cfg(unix)]
pub mod posix;
#[cfg(windows)]
pub mod windows;

/// Resolved address of a native entry point.
///
/// Kept opaque so calling code never handles raw pointers directly; only the
/// proxy dispatch layer turns this back into a callable.
#[derive(Debug, Clone, Copy)]
pub struct SymbolAddr(pub(crate) *const ());

// SAFETY: SymbolAddr is an address into an executable image that stays
// mapped for as long as its owning LibraryRecord holds the module handle.
// It is never dereferenced as data, only transmuted to a fn pointer by the
// dispatch layer.
unsafe impl Send for SymbolAddr {}
unsafe impl Sync for SymbolAddr {}

impl SymbolAddr {
    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }
}

/// An open native module. Owned exclusively by the registry record that
/// created it; released exactly once via `close`.
pub trait NativeLibrary: Send + Sync {
    /// Resolve an exported symbol. A null address is always an error; the
    /// returned text carries the platform diagnostic.
    fn resolve(&self, symbol: &str) -> std::result::Result<SymbolAddr, String>;

    /// Release the module handle. Failures are reported but callers treat
    /// them as best-effort during teardown.
    fn close(self: Box<Self>) -> std::result::Result<(), String>;
}

/// A platform dynamic-loader variant.
pub trait NativeLoader: Send + Sync {
    /// Human-readable variant identity, e.g. `"windows"` or `"posix (Linux)"`.
    fn variant(&self) -> &str;

    /// Open a native module. The path has its separators normalized for the
    /// platform before the call goes through. No retries at this layer.
    fn open(&self, path: &Path) -> std::result::Result<Box<dyn NativeLibrary>, String>;

    /// Most recent platform diagnostic recorded by this loader.
    fn last_error(&self) -> Option<String>;
}

static PLATFORM: Lazy<std::sync::Arc<dyn NativeLoader>> = Lazy::new(|| {
    #[cfg(unix)]
    {
        std::sync::Arc::new(posix::PosixLoader::detect())
    }
    #[cfg(windows)]
    {
        std::sync::Arc::new(windows::WindowsLoader::new())
    }
});

/// The process-wide loader variant, selected once by OS/kernel detection.
pub fn platform_loader() -> std::sync::Arc<dyn NativeLoader> {
    std::sync::Arc::clone(&PLATFORM)
}

/// Rewrite path separators so a logical path built with either convention
/// loads on the current platform.
pub(crate) fn normalize_separators(path: &Path, from: char, to: char) -> PathBuf {
    let text = path.to_string_lossy();
    if text.contains(from) {
        PathBuf::from(text.replace(from, &to.to_string()))
    } else {
        path.to_path_buf()
    }
}

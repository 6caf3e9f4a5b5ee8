//! Windows native loader variant (`LoadLibrary`/`GetProcAddress`/`FreeLibrary`).

use std::path::Path;
use std::sync::Arc;

use libloading::os::windows::Library;
use parking_lot::Mutex;
use tracing::debug;

use super::{normalize_separators, NativeLibrary, NativeLoader, SymbolAddr};

pub struct WindowsLoader {
    diagnostics: Arc<Mutex<Option<String>>>,
}

impl WindowsLoader {
    pub fn new() -> Self {
        debug!("selected Windows native loader");
        Self {
            diagnostics: Arc::new(Mutex::new(None)),
        }
    }
}

impl Default for WindowsLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeLoader for WindowsLoader {
    fn variant(&self) -> &str {
        "windows"
    }

    fn open(&self, path: &Path) -> std::result::Result<Box<dyn NativeLibrary>, String> {
        let path = normalize_separators(path, '/', '\\');
        // SAFETY: LoadLibrary runs DllMain; the caller is responsible for
        // only loading trusted payloads (see crate docs).
        match unsafe { Library::new(&path) } {
            Ok(library) => Ok(Box::new(WindowsLibrary {
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

struct WindowsLibrary {
    library: Library,
    diagnostics: Arc<Mutex<Option<String>>>,
}

impl NativeLibrary for WindowsLibrary {
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

//! Library registry: load-once lifecycle for native libraries and their
//! capability proxies.
//!
//! The registry owns every loaded module. A logical name is bound to one
//! source locator for its whole registered life; re-requesting it with a
//! different locator is a hard conflict. Teardown releases handles in exact
//! reverse load order and bumps a process-wide generation counter so callers
//! can detect that a registry was torn down and replaced.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::capability::CapabilityDescription;
use crate::error::{LoaderError, Result};
use crate::platform::{NativeLibrary, NativeLoader};
use crate::proxy::CapabilityProxy;
use crate::resource::{ResourceLocator, ResourceProvider, ResourceStore};

/// Bumped once per registry teardown, process-wide.
static GENERATION: AtomicU64 = AtomicU64::new(0);

/// Current value of the process-wide generation counter.
///
/// A registry whose `generation()` is below this value has been shut down;
/// whoever handed it out has replaced it.
pub fn current_generation() -> u64 {
    GENERATION.load(Ordering::SeqCst)
}

/// One loaded native library: its source binding, the open handle and the
/// per-capability proxy cache. Immutable except for the cache, which only
/// grows.
struct LibraryRecord {
    locator: ResourceLocator,
    file_path: PathBuf,
    library: Box<dyn NativeLibrary>,
    proxies: HashMap<String, Arc<CapabilityProxy>>,
}

struct RegistryInner {
    records: HashMap<String, LibraryRecord>,
    /// Logical names in load order; teardown walks this in reverse.
    load_order: Vec<String>,
    closed: bool,
}

/// Owns the set of loaded native libraries for one lifetime.
///
/// Construct at startup, share by `Arc`, and shut down explicitly (or let
/// `Drop` do it). All entry points are synchronous and may block on the
/// registry lock and on I/O; none are reentrant from teardown.
pub struct LibraryRegistry {
    loader: Arc<dyn NativeLoader>,
    provider: Box<dyn ResourceProvider>,
    store: ResourceStore,
    generation: u64,
    inner: Mutex<RegistryInner>,
}

impl LibraryRegistry {
    pub fn new(
        loader: Arc<dyn NativeLoader>,
        provider: Box<dyn ResourceProvider>,
        store: ResourceStore,
    ) -> Self {
        Self {
            loader,
            provider,
            store,
            generation: current_generation(),
            inner: Mutex::new(RegistryInner {
                records: HashMap::new(),
                load_order: Vec::new(),
                closed: false,
            }),
        }
    }

    /// Generation this registry was constructed in. Compare with
    /// [`current_generation`] to detect teardown-and-replace.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether this registry has not been shut down yet.
    pub fn is_open(&self) -> bool {
        !self.inner.lock().closed
    }

    /// Logical names of loaded libraries, in load order.
    pub fn loaded_libraries(&self) -> Vec<String> {
        self.inner.lock().load_order.clone()
    }

    /// Ensure the library `name` is loaded from `locator`.
    ///
    /// Idempotent for identical arguments: exactly one underlying native
    /// load ever happens per name. A differing locator for an already
    /// loaded name is a [`LoaderError::PathConflict`] and leaves the
    /// original load intact. On any failure nothing is registered.
    pub fn ensure_loaded(&self, name: &str, locator: &ResourceLocator) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(LoaderError::RegistryClosed);
        }

        if let Some(record) = inner.records.get(name) {
            if record.locator == *locator {
                debug!(library = name, "library already loaded");
                return Ok(());
            }
            return Err(LoaderError::PathConflict {
                name: name.to_string(),
                existing: record.locator.to_string(),
                requested: locator.to_string(),
            });
        }

        let bytes = self
            .provider
            .fetch(locator)
            .ok_or_else(|| LoaderError::ResourceMissing(locator.to_string()))?;
        let file_path = self.store.materialize(locator, &bytes)?;

        let library =
            self.loader
                .open(&file_path)
                .map_err(|reason| LoaderError::LoadFailure {
                    name: name.to_string(),
                    path: file_path.display().to_string(),
                    reason,
                })?;

        info!(
            library = name,
            path = %file_path.display(),
            loader = self.loader.variant(),
            "loaded native library"
        );
        inner.records.insert(
            name.to_string(),
            LibraryRecord {
                locator: locator.clone(),
                file_path,
                library,
                proxies: HashMap::new(),
            },
        );
        inner.load_order.push(name.to_string());
        Ok(())
    }

    /// Get (or lazily build) the proxy binding `description` to the loaded
    /// library `name`.
    ///
    /// Requires a prior successful [`ensure_loaded`](Self::ensure_loaded);
    /// calling without one is a usage error (`NotLoaded`). Repeated calls
    /// for the same capability return the same cached instance.
    pub fn get_proxy(
        &self,
        name: &str,
        description: &CapabilityDescription,
    ) -> Result<Arc<CapabilityProxy>> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(LoaderError::RegistryClosed);
        }

        let record = inner
            .records
            .get_mut(name)
            .ok_or_else(|| LoaderError::NotLoaded(name.to_string()))?;

        if let Some(proxy) = record.proxies.get(&description.name) {
            return Ok(Arc::clone(proxy));
        }

        let proxy = Arc::new(CapabilityProxy::build(
            record.library.as_ref(),
            name,
            description,
        )?);
        record
            .proxies
            .insert(description.name.clone(), Arc::clone(&proxy));
        Ok(proxy)
    }

    /// Release every library handle in exact reverse load order and bump
    /// the process-wide generation counter. Idempotent. A failing native
    /// close is logged and does not stop the remaining releases.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;

        let order: Vec<String> = inner.load_order.drain(..).rev().collect();
        for name in order {
            if let Some(record) = inner.records.remove(&name) {
                match record.library.close() {
                    Ok(()) => debug!(
                        library = %name,
                        path = %record.file_path.display(),
                        "released native library"
                    ),
                    Err(reason) => warn!(
                        library = %name,
                        error = %reason,
                        "native close failed during teardown"
                    ),
                }
            }
        }

        GENERATION.fetch_add(1, Ordering::SeqCst);
        info!("library registry shut down");
    }
}

impl Drop for LibraryRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

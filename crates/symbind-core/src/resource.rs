//! Materialization of embedded binary payloads to disk.
//!
//! A payload has to exist as a real file before the dynamic loader can open
//! it. Target paths are version-qualified so two versions of the consuming
//! component never collide, and placement uses write-to-temp plus atomic
//! rename so any number of processes can race on first use without a
//! partially written target ever being observable.

use std::borrow::Cow;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;

/// Address of an embedded payload: a logical grouping path plus file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceLocator {
    /// Logical grouping path, `/`-separated (e.g. `"native/linux-x64"`).
    pub group: String,
    /// Payload file name (e.g. `"libbingo.so"`).
    pub file_name: String,
}

impl ResourceLocator {
    pub fn new(group: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            file_name: file_name.into(),
        }
    }
}

impl fmt::Display for ResourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.file_name)
    }
}

/// Source of embedded payload bytes, looked up by locator.
///
/// Implementations typically serve `include_bytes!` data; the registry
/// treats a `None` as a packaging defect (`ResourceMissing`).
pub trait ResourceProvider: Send + Sync {
    fn fetch(&self, locator: &ResourceLocator) -> Option<Cow<'static, [u8]>>;
}

/// In-memory provider mapping locators to byte slices.
#[derive(Default)]
pub struct EmbeddedResources {
    entries: std::collections::HashMap<ResourceLocator, Cow<'static, [u8]>>,
}

impl EmbeddedResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        mut self,
        locator: ResourceLocator,
        bytes: impl Into<Cow<'static, [u8]>>,
    ) -> Self {
        self.entries.insert(locator, bytes.into());
        self
    }
}

impl ResourceProvider for EmbeddedResources {
    fn fetch(&self, locator: &ResourceLocator) -> Option<Cow<'static, [u8]>> {
        self.entries.get(locator).cloned()
    }
}

/// Writes payloads under a deterministic, version-qualified directory:
/// `<temp-root>/<vendor>/<component>/<version>/<group>/<file>`.
pub struct ResourceStore {
    root: PathBuf,
}

impl ResourceStore {
    /// Store rooted at the system temp directory, qualified by vendor,
    /// component and version so repeated runs of one version reuse files
    /// and different versions never collide.
    pub fn new(vendor: &str, component: &str, version: &str) -> Self {
        let root = std::env::temp_dir().join(vendor).join(component).join(version);
        Self { root }
    }

    /// Store rooted at an explicit directory. Used by tests and by hosts
    /// that manage their own scratch space.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The deterministic target path for a locator.
    pub fn target_path(&self, locator: &ResourceLocator) -> PathBuf {
        let mut path = self.root.clone();
        for part in locator.group.split('/').filter(|p| !p.is_empty()) {
            path.push(part);
        }
        path.push(&locator.file_name);
        path
    }

    /// Ensure the payload exists on disk and return its path.
    ///
    /// Sequence: fast path on an existing non-empty target; otherwise write
    /// the bytes to a fresh unique temp file in the target directory,
    /// re-check the target (another process may have won the race), and
    /// either atomically rename the temp file over it or discard the temp
    /// file. Rename atomicity is what makes this safe across processes, not
    /// any in-process lock.
    pub fn materialize(&self, locator: &ResourceLocator, bytes: &[u8]) -> Result<PathBuf> {
        let target = self.target_path(locator);
        if is_valid(&target) {
            return Ok(target);
        }

        let dir = target.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir)?;

        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        temp.write_all(bytes)?;
        temp.flush()?;

        // The re-check and the rename are not one atomic step; losing the
        // window just means the last full temp file replaces an equally
        // complete target.
        if is_valid(&target) {
            debug!(target = %target.display(), "another writer materialized the resource first");
            drop(temp);
            return Ok(target);
        }

        match temp.persist(&target) {
            Ok(_) => {
                debug!(
                    target = %target.display(),
                    len = bytes.len(),
                    "materialized embedded resource"
                );
                Ok(target)
            }
            Err(err) if is_valid(&target) => {
                // A racer renamed between our check and ours failing.
                warn!(target = %target.display(), error = %err.error, "rename lost a materialization race");
                Ok(target)
            }
            Err(err) => Err(err.error.into()),
        }
    }
}

/// A resource is present iff the file exists with non-zero length.
fn is_valid(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn scratch_store() -> (tempfile::TempDir, ResourceStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ResourceStore::with_root(dir.path());
        (dir, store)
    }

    #[test]
    fn test_target_path_is_version_qualified() {
        let store = ResourceStore::new("symbind", "engine", "1.2.3");
        let path = store.target_path(&ResourceLocator::new("native/linux-x64", "libx.so"));
        let text = path.to_string_lossy();
        assert!(text.contains("symbind"));
        assert!(text.contains("1.2.3"));
        assert!(text.ends_with(&format!(
            "native{0}linux-x64{0}libx.so",
            std::path::MAIN_SEPARATOR
        )));
    }

    #[test]
    fn test_materialize_writes_once_and_reuses() {
        let (_dir, store) = scratch_store();
        let locator = ResourceLocator::new("native", "payload.bin");

        let path = store.materialize(&locator, b"payload-bytes").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"payload-bytes");

        // Fast path: a second call must not rewrite the valid target.
        fs::write(&path, b"sentinel-content").unwrap();
        let again = store.materialize(&locator, b"payload-bytes").unwrap();
        assert_eq!(again, path);
        assert_eq!(fs::read(&path).unwrap(), b"sentinel-content");
    }

    #[test]
    fn test_materialize_replaces_empty_target() {
        let (_dir, store) = scratch_store();
        let locator = ResourceLocator::new("native", "payload.bin");
        let target = store.target_path(&locator);
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(&target, b"").unwrap();

        store.materialize(&locator, b"real-bytes").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"real-bytes");
    }

    #[test]
    fn test_concurrent_first_use_produces_one_complete_file() {
        let (_dir, store) = scratch_store();
        let store = Arc::new(store);
        let locator = ResourceLocator::new("native", "contended.bin");
        let payload: Arc<Vec<u8>> = Arc::new(vec![0xabu8; 64 * 1024]);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let locator = locator.clone();
                let payload = Arc::clone(&payload);
                std::thread::spawn(move || store.materialize(&locator, &payload).unwrap())
            })
            .collect();

        let mut paths: Vec<PathBuf> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        paths.dedup();
        assert_eq!(paths.len(), 1);
        assert_eq!(fs::metadata(&paths[0]).unwrap().len(), payload.len() as u64);

        // No leaked temp files once every racer has finished.
        let leftovers: Vec<_> = fs::read_dir(paths[0].parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .filter(|n| n != "contended.bin")
            .collect();
        assert!(leftovers.is_empty(), "leaked temp files: {leftovers:?}");
    }

    #[test]
    fn test_embedded_resources_lookup() {
        let locator = ResourceLocator::new("native", "libx.so");
        let provider = EmbeddedResources::new().insert(locator.clone(), &b"bytes"[..]);
        assert_eq!(provider.fetch(&locator).unwrap().as_ref(), b"bytes");
        assert!(provider
            .fetch(&ResourceLocator::new("native", "other.so"))
            .is_none());
    }
}

//! symbind: native shared-library loading with typed capability proxies.
//!
//! The crate loads a platform-specific native library at runtime, resolves
//! its exported functions and exposes them through proxy objects, so calling
//! code never touches raw symbol addresses. It is generic over the wrapped
//! API: callers describe what they need as a [`CapabilityDescription`] (a
//! named set of method signatures) and get back a dispatch-table proxy bound
//! 1:1 to resolved symbols.
//!
//! Pipeline: a [`LibraryRegistry`] materializes an embedded payload to a
//! deterministic, version-qualified path on disk (safe under multi-process
//! races), opens it through the process-wide platform loader variant, and
//! caches one proxy per (library, capability) pair. Handles are released in
//! reverse load order when the registry shuts down.
//!
//! Loading a native library executes its initialization code; only embed
//! payloads you trust. The crate does not sandbox native code.

pub mod capability;
pub mod error;
pub mod platform;
pub mod proxy;
pub mod registry;
pub mod resource;

pub use capability::{CapabilityDescription, MethodSig, Value, ValueType};
pub use error::{LoaderError, Result};
pub use platform::{platform_loader, NativeLibrary, NativeLoader, SymbolAddr};
pub use proxy::CapabilityProxy;
pub use registry::{current_generation, LibraryRegistry};
pub use resource::{EmbeddedResources, ResourceLocator, ResourceProvider, ResourceStore};

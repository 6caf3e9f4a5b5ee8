//! Error types for the loader and proxy engine.

/// Errors surfaced by library loading, materialization and proxy dispatch.
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    /// A logical name was requested with a different source locator than the
    /// one it is already loaded from. The original load stays intact.
    #[error("Library {name} has already been loaded from {existing}, refusing {requested}")]
    PathConflict {
        name: String,
        existing: String,
        requested: String,
    },

    /// The embedded payload for a locator is absent. This is a packaging
    /// defect, not a runtime condition.
    #[error("Embedded resource not found: {0}")]
    ResourceMissing(String),

    /// The platform loader rejected the materialized file.
    #[error("Cannot load library {name} from {path}: {reason}")]
    LoadFailure {
        name: String,
        path: String,
        reason: String,
    },

    /// A required native entry point is absent. Fatal for the requesting
    /// capability only; the library itself stays usable.
    #[error("Cannot find procedure {symbol} in library {library}")]
    SymbolNotFound { symbol: String, library: String },

    /// `get_proxy` was called for a library that was never loaded.
    #[error("Library not loaded: {0}")]
    NotLoaded(String),

    /// The registry has been shut down; a replacement must be constructed.
    #[error("Registry has been shut down")]
    RegistryClosed,

    /// A method signature falls outside the supported call-shape table.
    #[error("Unsupported signature for {method}: {detail}")]
    UnsupportedSignature { method: String, detail: String },

    /// Arguments passed to a proxy call do not match the declared signature.
    #[error("Invalid arguments for {method}: {detail}")]
    InvalidArguments { method: String, detail: String },

    /// A native call declared to return text produced a null pointer.
    #[error("Null pointer returned by {0}")]
    NullPointer(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, LoaderError>;

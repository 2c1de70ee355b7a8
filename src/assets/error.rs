use crate::core::gfx::GfxError;
use std::path::PathBuf;
use thiserror::Error;

/// Failure to bring an asset into the cache. Recoverable: callers either
/// substitute the placeholder or report it.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("asset '{key}' not found at '{}'", path.display())]
    NotFound { key: String, path: PathBuf },
    #[error("failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode '{}': {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("surface {0} is not in the cache")]
    UnknownSurface(String),
    #[error("graphics backend error: {0}")]
    Gfx(#[from] GfxError),
}

/// A broken cache invariant. These are programming errors and are raised as
/// panics by the manager, never returned.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsistencyError {
    #[error("grab requested while {pending} snapshots from a previous grab are still pending")]
    DoubleGrab { pending: usize },
    #[error("restore requested without a matching grab")]
    RestoreWithoutGrab,
    #[error("restore finished with {restored} surfaces but grab captured {expected}")]
    CountMismatch { expected: usize, restored: usize },
    #[error("snapshot refers to surface {0} which is no longer in the cache")]
    MissingSnapshotBase(String),
    #[error("surface {0} is grabbed but has no pending snapshot")]
    MissingSnapshot(String),
    #[error("surface {id} is {state} but a {op} requires it to be {required}")]
    IllegalTransition {
        id: String,
        op: &'static str,
        state: &'static str,
        required: &'static str,
    },
    #[error("hardware eviction requested while a grab is outstanding")]
    EvictDuringGrab,
}

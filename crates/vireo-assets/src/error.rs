//! Error types for the asset system.
//!
//! Load actions report failure as `false` and record the reason on the asset
//! itself; these errors cover the fallible edges around them (file access,
//! thread setup).

use std::fmt;
use std::path::PathBuf;

use crate::state::AssetState;

/// Errors that can occur during asset operations.
#[derive(Debug)]
pub enum AssetError {
    /// The requested asset data was not found.
    NotFound {
        /// The path or identifier of the asset.
        path: String,
    },

    /// Failed to read asset data from disk.
    IoError {
        /// The path that failed to load.
        path: PathBuf,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// The data was read but is not in a format the loader understands.
    Unsupported {
        /// The path being loaded.
        path: String,
        /// Description of the problem.
        message: String,
    },

    /// A worker thread could not be started.
    ThreadSpawn {
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Generic error with a message.
    Other {
        /// Error message.
        message: String,
    },
}

impl AssetError {
    /// The state an asset should be left in after failing with this error.
    pub fn state(&self) -> AssetState {
        match self {
            AssetError::NotFound { .. } => AssetState::ErrorNotFound,
            AssetError::Unsupported { .. } => AssetState::ErrorUnsupported,
            _ => AssetState::Error,
        }
    }
}

impl fmt::Display for AssetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetError::NotFound { path } => {
                write!(f, "Asset not found: {}", path)
            }
            AssetError::IoError { path, source } => {
                write!(f, "IO error loading '{}': {}", path.display(), source)
            }
            AssetError::Unsupported { path, message } => {
                write!(f, "Unsupported asset data in '{}': {}", path, message)
            }
            AssetError::ThreadSpawn { source } => {
                write!(f, "Failed to spawn asset worker thread: {}", source)
            }
            AssetError::Other { message } => {
                write!(f, "Asset error: {}", message)
            }
        }
    }
}

impl std::error::Error for AssetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AssetError::IoError { source, .. } => Some(source),
            AssetError::ThreadSpawn { source } => Some(source),
            _ => None,
        }
    }
}

/// Result type alias for asset operations.
pub type AssetResult<T> = Result<T, AssetError>;

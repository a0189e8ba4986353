//! File access for load actions.

use std::path::{Path, PathBuf};

use crate::error::{AssetError, AssetResult};

/// Reads asset files relative to an asset root directory.
///
/// Load actions normally go through
/// [`ActionContext::read_file`](crate::ActionContext::read_file), which uses
/// the scheduler's instance.
#[derive(Debug, Clone)]
pub struct AssetFiles {
    root: PathBuf,
}

impl AssetFiles {
    /// Create a reader rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// The directory relative paths are resolved against.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a path against the root. Absolute paths are returned as is.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Read a whole file.
    pub fn read(&self, path: impl AsRef<Path>) -> AssetResult<Vec<u8>> {
        let full_path = self.resolve(path);
        std::fs::read(&full_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AssetError::NotFound {
                    path: full_path.display().to_string(),
                }
            } else {
                AssetError::IoError {
                    path: full_path,
                    source: e,
                }
            }
        })
    }

    /// Read a whole file as UTF-8 text.
    pub fn read_to_string(&self, path: impl AsRef<Path>) -> AssetResult<String> {
        let full_path = self.resolve(path.as_ref());
        let bytes = self.read(path)?;
        String::from_utf8(bytes).map_err(|e| AssetError::Unsupported {
            path: full_path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// `true` if `path` exists under the root.
    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.resolve(path).exists()
    }
}

impl Default for AssetFiles {
    fn default() -> Self {
        Self::new("assets")
    }
}

//! Identity of an open notebook: an on-disk file or an untitled buffer.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Prefix of every key under which uncommitted contents are stored.
pub const STORAGE_KEY_PREFIX: &str = "notebook-storage-";

/// A notebook document's resource identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scheme", content = "path", rename_all = "lowercase")]
pub enum NotebookResource {
    /// A notebook backed by a file on disk.
    File(PathBuf),
    /// A new notebook that has never been written, e.g. `Untitled-1.ipynb`.
    Untitled(String),
}

impl NotebookResource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        NotebookResource::File(path.into())
    }

    pub fn untitled(name: impl Into<String>) -> Self {
        NotebookResource::Untitled(name.into())
    }

    pub fn is_untitled(&self) -> bool {
        matches!(self, NotebookResource::Untitled(_))
    }

    /// Path on disk, if this resource has one.
    pub fn path(&self) -> Option<&Path> {
        match self {
            NotebookResource::File(path) => Some(path),
            NotebookResource::Untitled(_) => None,
        }
    }

    /// URI form used as the registry key and inside storage keys.
    pub fn to_uri_string(&self) -> String {
        match self {
            NotebookResource::File(path) => {
                let path = path.to_string_lossy().replace('\\', "/");
                if path.starts_with('/') {
                    format!("file://{}", path)
                } else {
                    format!("file:///{}", path)
                }
            }
            NotebookResource::Untitled(name) => format!("untitled:{}", name),
        }
    }

    /// Key for the uncommitted-contents record of this resource.
    pub fn storage_key(&self) -> String {
        format!("{}{}", STORAGE_KEY_PREFIX, self.to_uri_string())
    }
}

impl fmt::Display for NotebookResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotebookResource::File(path) => write!(f, "{}", path.display()),
            NotebookResource::Untitled(name) => write!(f, "{}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_uri() {
        let res = NotebookResource::file("/home/me/a.ipynb");
        assert_eq!(res.to_uri_string(), "file:///home/me/a.ipynb");
        assert!(!res.is_untitled());
    }

    #[test]
    fn test_untitled_uri() {
        let res = NotebookResource::untitled("Untitled-1.ipynb");
        assert_eq!(res.to_uri_string(), "untitled:Untitled-1.ipynb");
        assert!(res.is_untitled());
        assert!(res.path().is_none());
    }

    #[test]
    fn test_storage_key_has_prefix() {
        let res = NotebookResource::file("/tmp/x.ipynb");
        assert_eq!(res.storage_key(), "notebook-storage-file:///tmp/x.ipynb");
    }

    #[test]
    fn test_serde_shape() {
        let res = NotebookResource::untitled("Untitled-2.ipynb");
        let json = serde_json::to_value(&res).unwrap();
        assert_eq!(json["scheme"], "untitled");
        assert_eq!(json["path"], "Untitled-2.ipynb");
    }
}

//! Path-addressed JSON documents on the local filesystem.
//!
//! Every request path is resolved under a single data root. Reads are bounded
//! by a size cap and writes go through a temp file in the target directory
//! followed by a rename, so readers never observe a half-written document.

use crate::config::DEFAULT_FILE_MODE;
use crate::error::{Result, RulesError};
use serde_json::{Map, Value};
use std::fs::{File, Permissions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Component, Path, PathBuf};

/// Keep only the normal components of `path`, dropping roots, `.` and `..`.
pub fn clean_relative(path: impl AsRef<Path>) -> PathBuf {
    path.as_ref()
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect()
}

/// Filesystem-backed store for JSON documents.
#[derive(Clone, Debug)]
pub struct DocumentStore {
    root: PathBuf,
    max_bytes: u64,
    file_mode: u32,
}

impl DocumentStore {
    pub fn new(root: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            root: root.into(),
            max_bytes,
            file_mode: DEFAULT_FILE_MODE,
        }
    }

    /// Permission bits given to files that did not exist before a write.
    pub fn with_file_mode(mut self, mode: u32) -> Self {
        self.file_mode = mode;
        self
    }

    /// Directory all documents live under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Map a request path onto the data root.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        self.root.join(clean_relative(path))
    }

    /// Read raw bytes, returning `None` when the file does not exist.
    pub fn read_bytes(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let size = file.metadata()?.len();
        if size > self.max_bytes {
            return Err(RulesError::TooLarge {
                path: path.to_path_buf(),
                size,
                max: self.max_bytes,
            });
        }
        let mut buf = Vec::with_capacity(size as usize);
        file.take(self.max_bytes + 1).read_to_end(&mut buf)?;
        if buf.len() as u64 > self.max_bytes {
            return Err(RulesError::TooLarge {
                path: path.to_path_buf(),
                size: buf.len() as u64,
                max: self.max_bytes,
            });
        }
        Ok(Some(buf))
    }

    /// Parse the document at `path`. Missing files yield `Ok(None)`.
    pub fn parse(&self, path: &Path) -> Result<Option<Value>> {
        let Some(bytes) = self.read_bytes(path)? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| RulesError::Parse {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Lenient read used for rule documents: any failure means "absent".
    pub fn read(&self, path: &Path) -> Option<Value> {
        match self.parse(path) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "ignoring unreadable document");
                None
            }
        }
    }

    /// Load a document for editing. Missing or malformed content becomes an
    /// empty object; oversized or unreadable files are errors so that they are
    /// never clobbered by a rewrite.
    pub fn load_or_empty(&self, path: &Path) -> Result<Value> {
        match self.parse(path) {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Ok(Value::Object(Map::new())),
            Err(RulesError::Parse { source, .. }) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %source,
                    "replacing malformed document"
                );
                Ok(Value::Object(Map::new()))
            }
            Err(e) => Err(e),
        }
    }

    /// Strict read: a missing or unreadable file is an error, malformed JSON
    /// reads as `null`.
    pub fn load(&self, path: &Path) -> Result<Value> {
        let bytes = match self.read_bytes(path) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                return Err(RulesError::Load {
                    path: path.to_path_buf(),
                    source: std::io::Error::from(ErrorKind::NotFound),
                })
            }
            Err(RulesError::Io(source)) => {
                return Err(RulesError::Load {
                    path: path.to_path_buf(),
                    source,
                })
            }
            Err(e) => return Err(e),
        };
        Ok(serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    /// Serialize `value` and replace the file at `path` with it.
    pub fn persist(&self, path: &Path, value: &Value) -> Result<()> {
        let data =
            serde_json::to_vec(value).map_err(|e| RulesError::InvalidRequest(e.to_string()))?;
        self.write_bytes(path, &data)
    }

    /// Atomically replace the file at `path`, creating parent directories.
    pub fn write_bytes(&self, path: &Path, data: &[u8]) -> Result<()> {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent).map_err(|e| RulesError::write(path, e))?;
        let mut tmp =
            tempfile::NamedTempFile::new_in(parent).map_err(|e| RulesError::write(path, e))?;
        tmp.write_all(data).map_err(|e| RulesError::write(path, e))?;
        tmp.flush().map_err(|e| RulesError::write(path, e))?;
        // The temp file starts out private; the replacement keeps the
        // permissions of the file it replaces.
        let permissions = match std::fs::metadata(path) {
            Ok(meta) => meta.permissions(),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                mode_permissions(tmp.as_file(), self.file_mode)
                    .map_err(|e| RulesError::write(path, e))?
            }
            Err(e) => return Err(RulesError::write(path, e)),
        };
        tmp.as_file()
            .set_permissions(permissions)
            .map_err(|e| RulesError::write(path, e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| RulesError::write(path, e))?;
        tmp.persist(path)
            .map_err(|e| RulesError::write(path, e.error))?;
        Ok(())
    }
}

#[cfg(unix)]
fn mode_permissions(_file: &File, mode: u32) -> std::io::Result<Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Ok(Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn mode_permissions(file: &File, _mode: u32) -> std::io::Result<Permissions> {
    Ok(file.metadata()?.permissions())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clean_relative_strips_escapes() {
        assert_eq!(clean_relative("/a/../b/./c"), PathBuf::from("a/b/c"));
        assert_eq!(clean_relative("../../etc/passwd"), PathBuf::from("etc/passwd"));
        assert_eq!(clean_relative(""), PathBuf::new());
    }

    #[test]
    fn resolve_stays_under_root() {
        let store = DocumentStore::new("/srv/data", 1024);
        assert_eq!(store.resolve("../x.json"), PathBuf::from("/srv/data/x.json"));
    }

    #[test]
    fn missing_and_malformed_load_as_empty_object() {
        let tempdir = tempfile::tempdir().unwrap();
        let store = DocumentStore::new(tempdir.path(), 1024);
        let missing = tempdir.path().join("missing.json");
        assert_eq!(store.load_or_empty(&missing).unwrap(), json!({}));
        assert!(store.read(&missing).is_none());

        let broken = tempdir.path().join("broken.json");
        std::fs::write(&broken, "{not json").unwrap();
        assert_eq!(store.load_or_empty(&broken).unwrap(), json!({}));
        assert!(store.read(&broken).is_none());
        assert_eq!(store.load(&broken).unwrap(), Value::Null);
    }

    #[test]
    fn oversized_documents_are_rejected() {
        let tempdir = tempfile::tempdir().unwrap();
        let store = DocumentStore::new(tempdir.path(), 8);
        let path = tempdir.path().join("big.json");
        std::fs::write(&path, r#"{"key": "a long value"}"#).unwrap();
        assert!(matches!(store.load_or_empty(&path), Err(RulesError::TooLarge { .. })));
        assert!(store.read(&path).is_none());
    }

    #[test]
    fn persist_creates_parents_and_round_trips() {
        let tempdir = tempfile::tempdir().unwrap();
        let store = DocumentStore::new(tempdir.path(), 1024);
        let path = tempdir.path().join("nested/dir/doc.json");
        store.persist(&path, &json!({"id": 1, "tags": ["a"]})).unwrap();
        assert_eq!(store.read(&path), Some(json!({"id": 1, "tags": ["a"]})));
        assert!(matches!(
            store.load(&tempdir.path().join("nope.json")),
            Err(RulesError::Load { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn rewrites_keep_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let tempdir = tempfile::tempdir().unwrap();
        let store = DocumentStore::new(tempdir.path(), 1024).with_file_mode(0o640);
        let mode = |path: &Path| std::fs::metadata(path).unwrap().permissions().mode() & 0o777;

        let existing = tempdir.path().join("doc.json");
        std::fs::write(&existing, "{}").unwrap();
        std::fs::set_permissions(&existing, Permissions::from_mode(0o664)).unwrap();
        store.persist(&existing, &json!({"id": 1})).unwrap();
        assert_eq!(mode(&existing), 0o664);

        let fresh = tempdir.path().join("new/doc.json");
        store.persist(&fresh, &json!({"id": 2})).unwrap();
        assert_eq!(mode(&fresh), 0o640);
    }
}

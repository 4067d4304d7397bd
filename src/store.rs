//! Key/value blob store used for every persisted artifact.
//!
//! Keys are `/`-separated hierarchical strings. There is no versioning in the
//! store itself; [`ObjectStore::put_if_version`] compares content hashes.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("invalid object key '{0}'")]
    InvalidKey(String),
    #[error("I/O error for {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("version conflict for {key}: expected {expected:?}, found {actual:?}")]
    VersionConflict {
        key: String,
        expected: Option<String>,
        actual: Option<String>,
    },
}

pub trait ObjectStore: Send + Sync {
    /// `Ok(None)` when the key does not exist.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;

    /// Keys starting with `prefix`, ascending.
    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> Result<(), StoreError>;

    fn copy(&self, src: &str, dst: &str) -> Result<(), StoreError> {
        let bytes = self
            .get(src)?
            .ok_or_else(|| StoreError::NotFound(src.to_string()))?;
        self.put(dst, &bytes)
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }

    /// Replaces `key` only if its current [`content_version`] equals
    /// `expected`; `None` requires that the key does not exist yet.
    ///
    /// This default is check-then-write and therefore not atomic.
    fn put_if_version(
        &self,
        key: &str,
        bytes: &[u8],
        expected: Option<&str>,
    ) -> Result<(), StoreError> {
        let actual = self.get(key)?.map(|current| content_version(&current));
        check_version(key, expected, actual)?;
        self.put(key, bytes)
    }
}

/// Hex sha256 of a blob, used as its version token.
pub fn content_version(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn check_version(
    key: &str,
    expected: Option<&str>,
    actual: Option<String>,
) -> Result<(), StoreError> {
    if expected == actual.as_deref() {
        return Ok(());
    }
    Err(StoreError::VersionConflict {
        key: key.to_string(),
        expected: expected.map(str::to_string),
        actual,
    })
}

#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .expect("in-memory store lock should not be poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .objects
            .lock()
            .expect("in-memory store lock should not be poisoned")
            .get(key)
            .cloned())
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.objects
            .lock()
            .expect("in-memory store lock should not be poisoned")
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .objects
            .lock()
            .expect("in-memory store lock should not be poisoned")
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.objects
            .lock()
            .expect("in-memory store lock should not be poisoned")
            .remove(key);
        Ok(())
    }

    fn put_if_version(
        &self,
        key: &str,
        bytes: &[u8],
        expected: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut objects = self
            .objects
            .lock()
            .expect("in-memory store lock should not be poisoned");
        let actual = objects.get(key).map(|current| content_version(current));
        check_version(key, expected, actual)?;
        objects.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}

/// Objects stored as files below `root`, one file per key.
#[derive(Debug, Clone)]
pub struct LocalDirObjectStore {
    root: PathBuf,
}

impl LocalDirObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && !key.ends_with('/')
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)))
            && !relative.file_name().is_some_and(is_staging_name);
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn collect_keys(&self, dir: &Path, out: &mut Vec<String>) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                self.collect_keys(&path, out)?;
                continue;
            }
            if path.file_name().is_some_and(is_staging_name) {
                continue;
            }
            let Ok(relative) = path.strip_prefix(&self.root) else {
                continue;
            };
            let key = relative
                .components()
                .map(|component| component.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push(key);
        }
        Ok(())
    }
}

impl ObjectStore for LocalDirObjectStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        write_atomic(&path, bytes).map_err(|source| StoreError::Io {
            key: key.to_string(),
            source,
        })?;
        debug!(
            component = "store",
            event = "store.put",
            key,
            bytes = bytes.len()
        );
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        match self.collect_keys(&self.root, &mut keys) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    key: prefix.to_string(),
                    source,
                })
            }
        }
        keys.retain(|key| key.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }
}

const STAGING_PREFIX: &str = ".";
const STAGING_SUFFIX: &str = ".tmp";

/// In-flight files written by [`write_atomic`]; never valid object keys.
fn is_staging_name(name: &std::ffi::OsStr) -> bool {
    let name = name.to_string_lossy();
    name.starts_with(STAGING_PREFIX) && name.ends_with(STAGING_SUFFIX)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid output path: {}", path.display()),
            )
        })?;
    let tmp_path = path.with_file_name(format!("{STAGING_PREFIX}{file_name}{STAGING_SUFFIX}"));

    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    fs::rename(tmp_path, path)
}

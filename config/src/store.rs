//! Persisted option storage.
//!
//! The resolver never touches a global option table; it reads and writes
//! through an [`OptionStore`] handed to it at construction.

use crate::ConfigError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

/// Key-value option storage.
///
/// Writes must be visible to subsequent reads through the same store.
/// Cross-process visibility may lag.
pub trait OptionStore: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<Value>, ConfigError>;
    fn set(&self, name: &str, value: Value) -> Result<(), ConfigError>;
    /// Returns whether an option was removed.
    fn delete(&self, name: &str) -> Result<bool, ConfigError>;
}

/// In-process option store.
#[derive(Debug, Default)]
pub struct MemoryOptionStore {
    options: RwLock<BTreeMap<String, Value>>,
}

impl MemoryOptionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options<I, K>(options: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self {
            options: RwLock::new(options.into_iter().map(|(k, v)| (k.into(), v)).collect()),
        }
    }

    pub fn len(&self) -> usize {
        self.options
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OptionStore for MemoryOptionStore {
    fn get(&self, name: &str) -> Result<Option<Value>, ConfigError> {
        let options = self.options.read().unwrap_or_else(PoisonError::into_inner);
        Ok(options.get(name).cloned())
    }

    fn set(&self, name: &str, value: Value) -> Result<(), ConfigError> {
        let mut options = self.options.write().unwrap_or_else(PoisonError::into_inner);
        options.insert(name.to_string(), value);
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<bool, ConfigError> {
        let mut options = self.options.write().unwrap_or_else(PoisonError::into_inner);
        Ok(options.remove(name).is_some())
    }
}

/// Option store persisted as a single JSON object on disk.
///
/// Every read goes to the file so that writes made by another process are
/// picked up. Writes hold an exclusive lock on `<path>.lock` across the whole
/// read-modify-write, then go to a uniquely named sibling that is renamed
/// over the file, so readers never observe a partial write and concurrent
/// writers never drop each other's changes.
#[derive(Debug)]
pub struct JsonFileOptionStore {
    path: PathBuf,
    lock_path: PathBuf,
    lock: RwLock<()>,
}

impl JsonFileOptionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_path = path.clone().into_os_string();
        lock_path.push(".lock");
        Self {
            path,
            lock_path: PathBuf::from(lock_path),
            lock: RwLock::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, Value>, ConfigError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(ConfigError::ReadFile {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn write_all(&self, options: &BTreeMap<String, Value>) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::WriteFile {
            path: self.path.clone(),
            source,
        };
        let content = serde_json::to_string_pretty(options)?;
        let tmp = self
            .path
            .with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        std::fs::write(&tmp, content).map_err(write_err)?;
        std::fs::rename(&tmp, &self.path).map_err(write_err)
    }

    /// Run `update` on the current contents under the cross-process lock and
    /// persist the result when it reports a change.
    fn modify<T>(
        &self,
        update: impl FnOnce(&mut BTreeMap<String, Value>) -> (T, bool),
    ) -> Result<T, ConfigError> {
        let _guard = self.lock.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| ConfigError::WriteFile {
                    path: self.path.clone(),
                    source,
                })?;
            }
        }
        let _file_lock =
            FileLock::acquire(&self.lock_path).map_err(|source| ConfigError::WriteFile {
                path: self.lock_path.clone(),
                source,
            })?;

        let mut options = self.read_all()?;
        let (result, changed) = update(&mut options);
        if changed {
            self.write_all(&options)?;
        }
        Ok(result)
    }
}

impl OptionStore for JsonFileOptionStore {
    fn get(&self, name: &str) -> Result<Option<Value>, ConfigError> {
        let _guard = self.lock.read().unwrap_or_else(PoisonError::into_inner);
        Ok(self.read_all()?.remove(name))
    }

    fn set(&self, name: &str, value: Value) -> Result<(), ConfigError> {
        self.modify(|options| {
            options.insert(name.to_string(), value);
            ((), true)
        })
    }

    fn delete(&self, name: &str) -> Result<bool, ConfigError> {
        self.modify(|options| {
            let removed = options.remove(name).is_some();
            (removed, removed)
        })
    }
}

/// Exclusive advisory lock on a file, released on drop.
///
/// The lock file is left in place after release.
struct FileLock {
    #[cfg_attr(not(unix), allow(dead_code))]
    file: File,
}

impl FileLock {
    fn acquire(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            loop {
                // Blocks until the current holder releases.
                #[allow(unsafe_code)]
                let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
                if result == 0 {
                    break;
                }
                let err = std::io::Error::last_os_error();
                if err.kind() != std::io::ErrorKind::Interrupted {
                    return Err(err);
                }
            }
        }

        Ok(Self { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            #[allow(unsafe_code)]
            unsafe {
                libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
            }
        }
    }
}

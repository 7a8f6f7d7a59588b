//! Storage collaborators: key/value slots, blob storage and remote upload
//!
//! The orchestrator only depends on the traits defined here. File-system
//! and in-memory implementations are provided for the daemon and tests;
//! platform keychains or cloud SDKs plug in behind the same traits.

use super::*;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Small protected key/value slots (configuration, ledger, key material)
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> BackupResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> BackupResult<()>;
    async fn remove(&self, key: &str) -> BackupResult<()>;
}

/// Named blob storage for snapshot files
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Write a blob and return its location
    async fn write(&self, name: &str, bytes: &[u8]) -> BackupResult<String>;
    async fn read(&self, name: &str) -> BackupResult<Vec<u8>>;
    async fn delete(&self, name: &str) -> BackupResult<()>;
    async fn exists(&self, name: &str) -> BackupResult<bool>;
}

/// Off-device copy of backup blobs
#[async_trait]
pub trait RemoteUploader: Send + Sync {
    fn provider(&self) -> &str;
    async fn upload(&self, name: &str, bytes: &[u8]) -> BackupResult<()>;
}

/// Placeholder used when cloud backup is enabled without a provider
pub struct UnconfiguredRemote;

#[async_trait]
impl RemoteUploader for UnconfiguredRemote {
    fn provider(&self) -> &str {
        "unconfigured"
    }

    async fn upload(&self, name: &str, _bytes: &[u8]) -> BackupResult<()> {
        Err(BackupError::Upload {
            provider: self.provider().to_string(),
            message: format!("No remote provider configured; '{}' was not uploaded", name),
        })
    }
}

/// Key/value store kept as a single JSON document on disk
pub struct FileKeyValueStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileKeyValueStore {
    /// Open (or create) the store at `path`
    pub async fn open(path: impl Into<PathBuf>) -> BackupResult<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BackupError::Persistence {
                    message: format!("Failed to create store directory: {}", e),
                })?;
        }

        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(contents) if !contents.trim().is_empty() => serde_json::from_str(&contents)?,
            Ok(_) => HashMap::new(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(BackupError::Persistence {
                    message: format!("Failed to read key/value store: {}", e),
                })
            }
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    async fn flush(&self, entries: &HashMap<String, String>) -> BackupResult<()> {
        let json = serde_json::to_string_pretty(entries)?;
        let tmp_path = self.path.with_extension("tmp");

        tokio::fs::write(&tmp_path, json)
            .await
            .map_err(|e| BackupError::Persistence {
                message: format!("Failed to write key/value store: {}", e),
            })?;

        // Key material lives in this file
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| BackupError::Persistence {
                    message: format!("Failed to set store permissions: {}", e),
                })?;
        }

        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| BackupError::Persistence {
                message: format!("Failed to replace key/value store: {}", e),
            })
    }
}

#[async_trait]
impl KeyValueStore for FileKeyValueStore {
    async fn get(&self, key: &str) -> BackupResult<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> BackupResult<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries).await
    }

    async fn remove(&self, key: &str) -> BackupResult<()> {
        let mut entries = self.entries.lock().await;
        if entries.remove(key).is_some() {
            self.flush(&entries).await?;
        }
        Ok(())
    }
}

/// In-memory key/value store
#[derive(Default)]
pub struct MemoryKeyValueStore {
    entries: parking_lot::RwLock<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> BackupResult<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> BackupResult<()> {
        self.entries.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> BackupResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}

/// Blob storage in a local directory
pub struct FsBlobStorage {
    root: PathBuf,
}

impl FsBlobStorage {
    pub async fn new(root: impl Into<PathBuf>) -> BackupResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| BackupError::Persistence {
                message: format!("Failed to create backup directory: {}", e),
            })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, name: &str) -> BackupResult<PathBuf> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !name.starts_with('.');

        if !valid {
            return Err(BackupError::Persistence {
                message: format!("Invalid blob name: {}", name),
            });
        }

        Ok(self.root.join(name))
    }
}

#[async_trait]
impl BlobStorage for FsBlobStorage {
    async fn write(&self, name: &str, bytes: &[u8]) -> BackupResult<String> {
        let path = self.blob_path(name)?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| BackupError::Persistence {
                message: format!("Failed to write {}: {}", name, e),
            })?;
        Ok(path.to_string_lossy().to_string())
    }

    async fn read(&self, name: &str) -> BackupResult<Vec<u8>> {
        let path = self.blob_path(name)?;
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BackupError::NotFound {
                    resource: name.to_string(),
                }
            } else {
                BackupError::Persistence {
                    message: format!("Failed to read {}: {}", name, e),
                }
            }
        })
    }

    async fn delete(&self, name: &str) -> BackupResult<()> {
        let path = self.blob_path(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BackupError::Persistence {
                message: format!("Failed to delete {}: {}", name, e),
            }),
        }
    }

    async fn exists(&self, name: &str) -> BackupResult<bool> {
        let path = self.blob_path(name)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| BackupError::Persistence {
                message: format!("Failed to stat {}: {}", name, e),
            })
    }
}

/// In-memory blob storage
#[derive(Default)]
pub struct MemoryBlobStorage {
    blobs: parking_lot::RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }

    /// Replace a stored blob in place, bypassing the store
    pub fn overwrite(&self, name: &str, bytes: Vec<u8>) {
        self.blobs.write().insert(name.to_string(), bytes);
    }
}

#[async_trait]
impl BlobStorage for MemoryBlobStorage {
    async fn write(&self, name: &str, bytes: &[u8]) -> BackupResult<String> {
        self.blobs.write().insert(name.to_string(), bytes.to_vec());
        Ok(format!("memory://{}", name))
    }

    async fn read(&self, name: &str) -> BackupResult<Vec<u8>> {
        self.blobs
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| BackupError::NotFound {
                resource: name.to_string(),
            })
    }

    async fn delete(&self, name: &str) -> BackupResult<()> {
        self.blobs.write().remove(name);
        Ok(())
    }

    async fn exists(&self, name: &str) -> BackupResult<bool> {
        Ok(self.blobs.read().contains_key(name))
    }
}

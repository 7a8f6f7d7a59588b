//! Backup blob persistence, local and remote

use super::*;

/// Persists snapshot blobs locally and copies them off-device
pub struct BackupStore {
    local: Arc<dyn BlobStorage>,
    remote: Arc<dyn RemoteUploader>,
}

impl BackupStore {
    pub fn new(local: Arc<dyn BlobStorage>, remote: Arc<dyn RemoteUploader>) -> Self {
        Self { local, remote }
    }

    /// Save a blob locally and return its location
    pub async fn save(&self, name: &str, bytes: &[u8]) -> BackupResult<String> {
        let location = self.local.write(name, bytes).await?;
        log::debug!("Saved {} ({} bytes) to {}", name, bytes.len(), location);
        Ok(location)
    }

    pub async fn load(&self, name: &str) -> BackupResult<Vec<u8>> {
        self.local.read(name).await
    }

    pub async fn exists(&self, name: &str) -> BackupResult<bool> {
        self.local.exists(name).await
    }

    pub async fn delete(&self, name: &str) -> BackupResult<()> {
        self.local.delete(name).await?;
        log::debug!("Deleted {}", name);
        Ok(())
    }

    /// Copy a blob to the remote provider
    pub async fn upload_remote(&self, name: &str, bytes: &[u8]) -> BackupResult<()> {
        self.remote.upload(name, bytes).await?;
        log::info!("Uploaded {} to {}", name, self.remote.provider());
        Ok(())
    }

    pub fn remote_provider(&self) -> &str {
        self.remote.provider()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct RecordingRemote {
        uploaded: parking_lot::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RemoteUploader for RecordingRemote {
        fn provider(&self) -> &str {
            "recording"
        }

        async fn upload(&self, name: &str, _bytes: &[u8]) -> BackupResult<()> {
            self.uploaded.lock().push(name.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_save_load_delete() {
        let store = BackupStore::new(Arc::new(MemoryBlobStorage::new()), Arc::new(UnconfiguredRemote));

        let location = store.save("backup_a.json", b"payload").await.unwrap();
        assert_eq!(location, "memory://backup_a.json");
        assert_eq!(store.load("backup_a.json").await.unwrap(), b"payload".to_vec());

        store.delete("backup_a.json").await.unwrap();
        assert!(!store.exists("backup_a.json").await.unwrap());
        assert!(matches!(
            store.load("backup_a.json").await,
            Err(BackupError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_upload_uses_provider() {
        let remote = Arc::new(RecordingRemote {
            uploaded: parking_lot::Mutex::new(Vec::new()),
        });
        let store = BackupStore::new(Arc::new(MemoryBlobStorage::new()), remote.clone());

        store.upload_remote("backup_b.json", b"x").await.unwrap();
        assert_eq!(remote.uploaded.lock().clone(), vec!["backup_b.json".to_string()]);

        let unconfigured = BackupStore::new(Arc::new(MemoryBlobStorage::new()), Arc::new(UnconfiguredRemote));
        assert!(unconfigured.upload_remote("backup_b.json", b"x").await.is_err());
    }
}

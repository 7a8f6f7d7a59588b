//! Persistent history of backup attempts

use super::*;
use tokio::sync::RwLock;

/// Key under which the ledger is persisted
pub const LEDGER_KEY: &str = "backup_ledger";

/// Ordered record of every backup attempt, persisted after each mutation
pub struct MetadataLedger {
    store: Arc<dyn KeyValueStore>,
    entries: RwLock<Vec<BackupMetadata>>,
}

impl MetadataLedger {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Replace the in-memory ledger with the persisted one
    pub async fn load(&self) -> BackupResult<usize> {
        let loaded: Vec<BackupMetadata> = match self.store.get(LEDGER_KEY).await? {
            Some(json) => serde_json::from_str(&json)?,
            None => Vec::new(),
        };

        let count = loaded.len();
        *self.entries.write().await = loaded;
        log::info!("Loaded {} backup record(s)", count);
        Ok(count)
    }

    async fn persist(&self, entries: &[BackupMetadata]) -> BackupResult<()> {
        let json = serde_json::to_string(entries)?;
        self.store.set(LEDGER_KEY, &json).await
    }

    pub async fn append(&self, metadata: BackupMetadata) -> BackupResult<()> {
        let mut entries = self.entries.write().await;
        entries.push(metadata);
        self.persist(&entries).await
    }

    /// Apply `change` to the entry with `id` and persist the result
    pub async fn update<F>(&self, id: &str, change: F) -> BackupResult<BackupMetadata>
    where
        F: FnOnce(&mut BackupMetadata),
    {
        let mut entries = self.entries.write().await;
        let entry = entries
            .iter_mut()
            .find(|entry| entry.id == id)
            .ok_or_else(|| BackupError::NotFound {
                resource: format!("backup {}", id),
            })?;

        change(entry);
        let updated = entry.clone();
        self.persist(&entries).await?;
        Ok(updated)
    }

    pub async fn get(&self, id: &str) -> Option<BackupMetadata> {
        self.entries
            .read()
            .await
            .iter()
            .find(|entry| entry.id == id)
            .cloned()
    }

    /// Newest first, optionally limited
    pub async fn history(&self, limit: Option<usize>) -> Vec<BackupMetadata> {
        let entries = self.entries.read().await;
        let mut history: Vec<BackupMetadata> = entries.clone();
        history.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = limit {
            history.truncate(limit);
        }
        history
    }

    pub async fn all(&self) -> Vec<BackupMetadata> {
        self.entries.read().await.clone()
    }

    pub async fn remove(&self, id: &str) -> BackupResult<Option<BackupMetadata>> {
        let mut entries = self.entries.write().await;
        let Some(position) = entries.iter().position(|entry| entry.id == id) else {
            return Ok(None);
        };

        let removed = entries.remove(position);
        self.persist(&entries).await?;
        Ok(Some(removed))
    }

    /// Finished entries older than `retention_days` at `now`
    pub async fn expired(&self, retention_days: u32, now: DateTime<Utc>) -> Vec<BackupMetadata> {
        let cutoff = now - Duration::days(i64::from(retention_days));
        self.entries
            .read()
            .await
            .iter()
            .filter(|entry| entry.status != BackupStatus::InProgress && entry.timestamp < cutoff)
            .cloned()
            .collect()
    }

    /// Remove every entry whose id is in `ids`
    pub async fn remove_many(&self, ids: &[String]) -> BackupResult<usize> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|entry| !ids.contains(&entry.id));
        let removed = before - entries.len();
        if removed > 0 {
            self.persist(&entries).await?;
        }
        Ok(removed)
    }

    /// Mark in-progress entries as failed; returns their ids
    ///
    /// Only valid when no backup is actually running.
    pub async fn fail_stale_in_progress(&self, reason: &str) -> BackupResult<Vec<String>> {
        let mut entries = self.entries.write().await;
        let mut failed = Vec::new();

        for entry in entries.iter_mut() {
            if entry.status == BackupStatus::InProgress {
                entry.status = BackupStatus::Failed;
                entry.verification = VerificationStatus::Failed;
                entry.error = Some(reason.to_string());
                failed.push(entry.id.clone());
            }
        }

        if !failed.is_empty() {
            self.persist(&entries).await?;
        }
        Ok(failed)
    }

    /// Most recent completed backup
    pub async fn last_successful(&self) -> Option<BackupMetadata> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|entry| entry.is_successful())
            .max_by_key(|entry| entry.timestamp)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(age_days: i64, status: BackupStatus) -> BackupMetadata {
        let mut metadata =
            BackupMetadata::begin_full(&OrchestratorSettings::default(), BackupTrigger::Manual, None);
        metadata.timestamp = Utc::now() - Duration::days(age_days);
        metadata.status = status;
        metadata
    }

    #[tokio::test]
    async fn test_mutations_are_persisted() {
        let store = Arc::new(MemoryKeyValueStore::new());
        let ledger = MetadataLedger::new(store.clone());

        let first = entry(0, BackupStatus::InProgress);
        let id = first.id.clone();
        ledger.append(first).await.unwrap();
        ledger
            .update(&id, |m| {
                m.status = BackupStatus::Completed;
                m.size_bytes = 512;
            })
            .await
            .unwrap();

        let reloaded = MetadataLedger::new(store);
        assert_eq!(reloaded.load().await.unwrap(), 1);
        let stored = reloaded.get(&id).await.unwrap();
        assert_eq!(stored.status, BackupStatus::Completed);
        assert_eq!(stored.size_bytes, 512);
    }

    #[tokio::test]
    async fn test_history_is_newest_first() {
        let ledger = MetadataLedger::new(Arc::new(MemoryKeyValueStore::new()));
        let old = entry(5, BackupStatus::Completed);
        let new = entry(1, BackupStatus::Completed);
        let new_id = new.id.clone();
        ledger.append(old).await.unwrap();
        ledger.append(new).await.unwrap();

        let history = ledger.history(Some(1)).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, new_id);
        assert_eq!(ledger.last_successful().await.unwrap().id, new_id);
    }

    #[tokio::test]
    async fn test_expired_skips_in_progress() {
        let ledger = MetadataLedger::new(Arc::new(MemoryKeyValueStore::new()));
        let expired = entry(10, BackupStatus::Completed);
        let expired_id = expired.id.clone();
        ledger.append(expired).await.unwrap();
        ledger.append(entry(10, BackupStatus::InProgress)).await.unwrap();
        ledger.append(entry(2, BackupStatus::Failed)).await.unwrap();

        let found = ledger.expired(7, Utc::now()).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, expired_id);

        assert_eq!(ledger.remove_many(&[expired_id]).await.unwrap(), 1);
        assert_eq!(ledger.all().await.len(), 2);
    }

    #[tokio::test]
    async fn test_stale_entries_marked_failed() {
        let ledger = MetadataLedger::new(Arc::new(MemoryKeyValueStore::new()));
        ledger.append(entry(0, BackupStatus::InProgress)).await.unwrap();
        ledger.append(entry(0, BackupStatus::Completed)).await.unwrap();

        let failed = ledger.fail_stale_in_progress("interrupted").await.unwrap();
        assert_eq!(failed.len(), 1);

        let stale = ledger.get(&failed[0]).await.unwrap();
        assert_eq!(stale.status, BackupStatus::Failed);
        assert_eq!(stale.error.as_deref(), Some("interrupted"));
        assert!(ledger.remove("missing").await.unwrap().is_none());
    }
}

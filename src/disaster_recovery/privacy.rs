//! Data export, deletion and retention over user records

use super::*;
use async_trait::async_trait;
use serde_json::Value;

/// One stored user record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub data: Value,
}

/// Access to a user's stored records by category
#[async_trait]
pub trait UserDataRepository: Send + Sync {
    async fn list_records(&self, user_id: &str, category: &str) -> anyhow::Result<Vec<UserRecord>>;
    async fn delete_records(&self, user_id: &str, category: &str, record_ids: &[String]) -> anyhow::Result<usize>;
    async fn delete_category(&self, user_id: &str, category: &str) -> anyhow::Result<usize>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataExport {
    pub export_id: String,
    pub user_id: String,
    pub generated_at: DateTime<Utc>,
    pub categories: BTreeMap<String, Vec<UserRecord>>,
    /// Requested categories whose policy forbids export
    pub excluded_categories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletionReport {
    pub user_hash: String,
    pub deleted: BTreeMap<String, usize>,
    /// Requested categories whose policy forbids deletion
    pub retained_categories: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySummary {
    pub category: String,
    pub record_count: usize,
    pub oldest_record: Option<DateTime<Utc>>,
    pub due_for_deletion: usize,
    pub policy: DataRetentionPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivacyReport {
    pub user_hash: String,
    pub generated_at: DateTime<Utc>,
    pub categories: Vec<CategorySummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetentionCleanupReport {
    pub removed: BTreeMap<String, usize>,
    pub errors: Vec<String>,
}

impl RetentionCleanupReport {
    pub fn total_removed(&self) -> usize {
        self.removed.values().sum()
    }
}

/// Privacy operations governed by the retention table
pub struct PrivacyService {
    repository: Arc<dyn UserDataRepository>,
    policies: Arc<RetentionPolicyTable>,
    encryption: Arc<EncryptionEngine>,
}

impl PrivacyService {
    pub fn new(
        repository: Arc<dyn UserDataRepository>,
        policies: Arc<RetentionPolicyTable>,
        encryption: Arc<EncryptionEngine>,
    ) -> Self {
        Self {
            repository,
            policies,
            encryption,
        }
    }

    /// Export the requested categories, skipping those that disallow export
    pub async fn generate_data_export(&self, user_id: &str, categories: &[String]) -> BackupResult<DataExport> {
        let mut export = DataExport {
            export_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            generated_at: Utc::now(),
            categories: BTreeMap::new(),
            excluded_categories: Vec::new(),
        };

        for category in categories {
            if !self.policies.get_policy(category).allow_data_export {
                export.excluded_categories.push(category.clone());
                continue;
            }

            let records = self
                .repository
                .list_records(user_id, category)
                .await
                .map_err(|e| repository_error("export", category, e))?;
            export.categories.insert(category.clone(), records);
        }

        log::info!(
            "Generated data export {} for user {} ({} categories, {} excluded)",
            export.export_id,
            self.encryption.hash_identifier(user_id, None),
            export.categories.len(),
            export.excluded_categories.len()
        );
        Ok(export)
    }

    /// Delete the requested categories, keeping those that disallow deletion
    ///
    /// Per-category failures are collected rather than aborting the request.
    pub async fn secure_data_deletion(&self, user_id: &str, categories: &[String]) -> BackupResult<DeletionReport> {
        let user_hash = self.encryption.hash_identifier(user_id, None);
        let mut report = DeletionReport {
            user_hash: user_hash.clone(),
            deleted: BTreeMap::new(),
            retained_categories: Vec::new(),
            errors: Vec::new(),
        };

        for category in categories {
            if !self.policies.get_policy(category).allow_data_deletion {
                report.retained_categories.push(category.clone());
                continue;
            }

            match self.repository.delete_category(user_id, category).await {
                Ok(count) => {
                    report.deleted.insert(category.clone(), count);
                }
                Err(e) => {
                    log::error!("Failed to delete {} for user {}: {:#}", category, user_hash, e);
                    report.errors.push(format!("{}: {:#}", category, e));
                }
            }
        }

        log::info!(
            "Secure deletion for user {}: {} categories deleted, {} retained",
            user_hash,
            report.deleted.len(),
            report.retained_categories.len()
        );
        Ok(report)
    }

    /// Per-category record counts and retention status
    pub async fn generate_privacy_report(&self, user_id: &str) -> BackupResult<PrivacyReport> {
        let now = Utc::now();
        let mut categories = Vec::new();

        for category in self.policies.categories() {
            let records = self
                .repository
                .list_records(user_id, &category)
                .await
                .map_err(|e| repository_error("report", &category, e))?;

            let due_for_deletion = records
                .iter()
                .filter(|record| self.policies.should_auto_delete_at(&category, record.created_at, now))
                .count();

            categories.push(CategorySummary {
                record_count: records.len(),
                oldest_record: records.iter().map(|record| record.created_at).min(),
                due_for_deletion,
                policy: self.policies.get_policy(&category),
                category,
            });
        }

        Ok(PrivacyReport {
            user_hash: self.encryption.hash_identifier(user_id, None),
            generated_at: now,
            categories,
        })
    }

    /// Delete every record past its category's auto-delete age
    pub async fn run_retention_cleanup(&self, user_id: &str) -> BackupResult<RetentionCleanupReport> {
        self.run_retention_cleanup_at(user_id, Utc::now()).await
    }

    pub async fn run_retention_cleanup_at(&self, user_id: &str, now: DateTime<Utc>) -> BackupResult<RetentionCleanupReport> {
        let mut report = RetentionCleanupReport::default();

        for category in self.policies.categories() {
            let records = match self.repository.list_records(user_id, &category).await {
                Ok(records) => records,
                Err(e) => {
                    report.errors.push(format!("{}: {:#}", category, e));
                    continue;
                }
            };

            let expired: Vec<String> = records
                .iter()
                .filter(|record| self.policies.should_auto_delete_at(&category, record.created_at, now))
                .map(|record| record.id.clone())
                .collect();

            if expired.is_empty() {
                continue;
            }

            match self.repository.delete_records(user_id, &category, &expired).await {
                Ok(count) => {
                    report.removed.insert(category.clone(), count);
                }
                Err(e) => report.errors.push(format!("{}: {:#}", category, e)),
            }
        }

        log::info!("Retention cleanup removed {} record(s)", report.total_removed());
        Ok(report)
    }
}

fn repository_error(operation: &str, category: &str, error: anyhow::Error) -> BackupError {
    BackupError::Persistence {
        message: format!("Failed to read {} for {}: {:#}", category, operation, error),
    }
}

/// In-memory repository keyed by user and category
#[derive(Default)]
pub struct MemoryUserDataRepository {
    records: parking_lot::RwLock<BTreeMap<(String, String), Vec<UserRecord>>>,
}

impl MemoryUserDataRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user_id: &str, category: &str, record: UserRecord) {
        self.records
            .write()
            .entry((user_id.to_string(), category.to_string()))
            .or_default()
            .push(record);
    }

    pub fn count(&self, user_id: &str, category: &str) -> usize {
        self.records
            .read()
            .get(&(user_id.to_string(), category.to_string()))
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl UserDataRepository for MemoryUserDataRepository {
    async fn list_records(&self, user_id: &str, category: &str) -> anyhow::Result<Vec<UserRecord>> {
        Ok(self
            .records
            .read()
            .get(&(user_id.to_string(), category.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_records(&self, user_id: &str, category: &str, record_ids: &[String]) -> anyhow::Result<usize> {
        let mut records = self.records.write();
        let Some(stored) = records.get_mut(&(user_id.to_string(), category.to_string())) else {
            return Ok(0);
        };
        let before = stored.len();
        stored.retain(|record| !record_ids.contains(&record.id));
        Ok(before - stored.len())
    }

    async fn delete_category(&self, user_id: &str, category: &str) -> anyhow::Result<usize> {
        Ok(self
            .records
            .write()
            .remove(&(user_id.to_string(), category.to_string()))
            .map_or(0, |removed| removed.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, age_days: i64) -> UserRecord {
        UserRecord {
            id: id.to_string(),
            created_at: Utc::now() - Duration::days(age_days),
            data: json!({ "value": id }),
        }
    }

    fn service() -> (PrivacyService, Arc<MemoryUserDataRepository>) {
        let repository = Arc::new(MemoryUserDataRepository::new());
        let encryption = Arc::new(
            EncryptionEngine::new(Arc::new(MemoryKeyValueStore::new()), DEFAULT_KDF_ITERATIONS).unwrap(),
        );
        let service = PrivacyService::new(
            repository.clone(),
            Arc::new(RetentionPolicyTable::default()),
            encryption,
        );
        (service, repository)
    }

    #[tokio::test]
    async fn test_export_skips_disallowed_categories() {
        let (service, repository) = service();
        repository.insert("u1", "therapy_goals", record("g1", 1));
        repository.insert("u1", "audit_logs", record("a1", 1));
        repository.insert("u1", "custom_notes", record("n1", 1));

        let requested = vec![
            "therapy_goals".to_string(),
            "audit_logs".to_string(),
            "custom_notes".to_string(),
        ];
        let export = service.generate_data_export("u1", &requested).await.unwrap();

        assert_eq!(export.categories.len(), 2);
        assert!(export.categories.contains_key("custom_notes"));
        assert_eq!(export.excluded_categories, vec!["audit_logs".to_string()]);
    }

    #[tokio::test]
    async fn test_deletion_retains_audit_logs() {
        let (service, repository) = service();
        repository.insert("u1", "communication_data", record("c1", 1));
        repository.insert("u1", "communication_data", record("c2", 1));
        repository.insert("u1", "audit_logs", record("a1", 1));

        let requested = vec!["communication_data".to_string(), "audit_logs".to_string()];
        let report = service.secure_data_deletion("u1", &requested).await.unwrap();

        assert_eq!(report.deleted.get("communication_data"), Some(&2));
        assert_eq!(report.retained_categories, vec!["audit_logs".to_string()]);
        assert_eq!(repository.count("u1", "audit_logs"), 1);
        assert_eq!(repository.count("u1", "communication_data"), 0);
        assert_ne!(report.user_hash, "u1");
    }

    #[tokio::test]
    async fn test_retention_cleanup_removes_only_expired() {
        let (service, repository) = service();
        repository.insert("u1", "usage_analytics", record("old", 120));
        repository.insert("u1", "usage_analytics", record("recent", 10));
        repository.insert("u1", "therapy_goals", record("goal", 120));

        let report = service.run_retention_cleanup("u1").await.unwrap();
        assert_eq!(report.total_removed(), 1);
        assert_eq!(repository.count("u1", "usage_analytics"), 1);
        assert_eq!(repository.count("u1", "therapy_goals"), 1);
    }

    #[tokio::test]
    async fn test_privacy_report_counts() {
        let (service, repository) = service();
        repository.insert("u1", "usage_analytics", record("old", 120));
        repository.insert("u1", "usage_analytics", record("recent", 10));

        let report = service.generate_privacy_report("u1").await.unwrap();
        let analytics = report
            .categories
            .iter()
            .find(|summary| summary.category == "usage_analytics")
            .unwrap();

        assert_eq!(report.categories.len(), 6);
        assert_eq!(analytics.record_count, 2);
        assert_eq!(analytics.due_for_deletion, 1);
        assert!(analytics.oldest_record.is_some());
    }
}

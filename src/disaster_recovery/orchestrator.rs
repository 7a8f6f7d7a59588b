//! Top-level backup and recovery controller
//!
//! The orchestrator owns the configuration and the ledger and is the only
//! component that mutates either. Backup and restore are each guarded by a
//! flag that a second caller cannot take until the first one finishes.

use super::*;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration as StdDuration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

/// Associated data bound into encrypted snapshot blobs
pub const SNAPSHOT_CATEGORY: &str = "backup_snapshot";

/// Holds an in-flight flag for its lifetime
struct OperationGuard {
    flag: Arc<AtomicBool>,
}

impl OperationGuard {
    fn acquire(flag: &Arc<AtomicBool>, operation: &str) -> BackupResult<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| BackupError::OperationInProgress {
                operation: operation.to_string(),
            })?;
        Ok(Self { flag: flag.clone() })
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Collaborators injected into the orchestrator
pub struct OrchestratorDependencies {
    pub key_value_store: Arc<dyn KeyValueStore>,
    pub blob_storage: Arc<dyn BlobStorage>,
    pub collectors: Vec<Arc<dyn DomainCollector>>,
    pub remote: Arc<dyn RemoteUploader>,
    pub observability: Arc<dyn ObservabilitySink>,
    /// Defaults to write-back through the collectors
    pub recovery_actions: Option<Arc<dyn RecoveryActions>>,
    /// Required for the export, deletion and privacy report operations
    pub user_data: Option<Arc<dyn UserDataRepository>>,
}

impl OrchestratorDependencies {
    pub fn new(
        key_value_store: Arc<dyn KeyValueStore>,
        blob_storage: Arc<dyn BlobStorage>,
        collectors: Vec<Arc<dyn DomainCollector>>,
    ) -> Self {
        Self {
            key_value_store,
            blob_storage,
            collectors,
            remote: Arc::new(UnconfiguredRemote),
            observability: Arc::new(NoopSink),
            recovery_actions: None,
            user_data: None,
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteUploader>) -> Self {
        self.remote = remote;
        self
    }

    pub fn with_observability(mut self, observability: Arc<dyn ObservabilitySink>) -> Self {
        self.observability = observability;
        self
    }

    pub fn with_recovery_actions(mut self, actions: Arc<dyn RecoveryActions>) -> Self {
        self.recovery_actions = Some(actions);
        self
    }

    pub fn with_user_data(mut self, repository: Arc<dyn UserDataRepository>) -> Self {
        self.user_data = Some(repository);
        self
    }
}

/// Result of a combined backup and user-record retention sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionSweepReport {
    /// Ids of backups removed from the ledger and storage
    pub expired_backups: Vec<String>,
    /// Present when a user data repository is configured
    pub records: Option<RetentionCleanupReport>,
}

struct BackupOutcome {
    size_bytes: u64,
    checksum: String,
    verification: VerificationStatus,
    remote_uploaded: bool,
    warnings: Vec<String>,
}

/// Backup, restore and data lifecycle controller
#[derive(Clone)]
pub struct BackupOrchestrator {
    settings: Arc<OrchestratorSettings>,
    configuration: Arc<RwLock<BackupConfiguration>>,
    key_value_store: Arc<dyn KeyValueStore>,
    capture: Arc<BackupCapture>,
    store: Arc<BackupStore>,
    ledger: Arc<MetadataLedger>,
    encryption: Arc<EncryptionEngine>,
    retention: Arc<RetentionPolicyTable>,
    recovery: Arc<RecoveryPlanEngine>,
    privacy: Option<Arc<PrivacyService>>,
    scheduler: Arc<BackupScheduler>,
    observability: Arc<dyn ObservabilitySink>,
    backup_in_progress: Arc<AtomicBool>,
    recovery_in_progress: Arc<AtomicBool>,
    shutting_down: Arc<AtomicBool>,
    /// Orders the stale-entry sweep against new ledger entries
    ledger_sweep: Arc<Mutex<()>>,
}

impl BackupOrchestrator {
    /// Create new orchestrator
    pub fn new(dependencies: OrchestratorDependencies, settings: OrchestratorSettings) -> BackupResult<Self> {
        settings.validate()?;

        let key_value_store = dependencies.key_value_store;
        let observability = dependencies.observability;
        let encryption = Arc::new(EncryptionEngine::new(
            key_value_store.clone(),
            settings.key_derivation_iterations,
        )?);
        let retention = Arc::new(RetentionPolicyTable::new(settings.sensitive_fields.clone()));
        let capture = Arc::new(BackupCapture::new(dependencies.collectors));

        let actions: Arc<dyn RecoveryActions> = match dependencies.recovery_actions {
            Some(actions) => actions,
            None => Arc::new(DefaultRecoveryActions::new(capture.clone(), observability.clone())),
        };

        let privacy = dependencies.user_data.map(|repository| {
            Arc::new(PrivacyService::new(repository, retention.clone(), encryption.clone()))
        });

        Ok(Self {
            settings: Arc::new(settings),
            configuration: Arc::new(RwLock::new(BackupConfiguration::default())),
            store: Arc::new(BackupStore::new(dependencies.blob_storage, dependencies.remote)),
            ledger: Arc::new(MetadataLedger::new(key_value_store.clone())),
            recovery: Arc::new(RecoveryPlanEngine::new(actions)),
            scheduler: Arc::new(BackupScheduler::new()),
            backup_in_progress: Arc::new(AtomicBool::new(false)),
            recovery_in_progress: Arc::new(AtomicBool::new(false)),
            shutting_down: Arc::new(AtomicBool::new(false)),
            ledger_sweep: Arc::new(Mutex::new(())),
            key_value_store,
            capture,
            encryption,
            retention,
            privacy,
            observability,
        })
    }

    /// Load persisted state and start the background tasks
    pub async fn initialize(&self) -> BackupResult<()> {
        log::info!("Initializing backup orchestrator");
        self.shutting_down.store(false, Ordering::SeqCst);

        let configuration = self.load_configuration().await?;
        *self.configuration.write().await = configuration;

        self.ledger.load().await?;
        // Nothing can be running yet, so in-progress entries were interrupted
        let interrupted = self
            .ledger
            .fail_stale_in_progress("Interrupted before completion")
            .await?;
        if !interrupted.is_empty() {
            log::warn!("Marked {} interrupted backup(s) as failed", interrupted.len());
        }

        self.encryption.initialize().await?;

        self.scheduler.start(
            Arc::new(self.clone()),
            StdDuration::from_secs(self.settings.health_check_interval_secs),
        );

        self.observability
            .add_breadcrumb("backup", "Backup orchestrator initialized");
        log::info!("Backup orchestrator initialized");
        Ok(())
    }

    /// Stop background tasks and refuse new operations
    ///
    /// Operations already running are allowed to finish.
    pub async fn cleanup(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.scheduler.stop();
        self.encryption.clear_sensitive_data();
        log::info!("Backup orchestrator stopped");
    }

    async fn load_configuration(&self) -> BackupResult<BackupConfiguration> {
        match self.key_value_store.get(CONFIGURATION_KEY).await? {
            Some(json) => {
                let parsed = serde_json::from_str::<BackupConfiguration>(&json)
                    .map_err(BackupError::from)
                    .and_then(|config| config.validate().map(|_| config));

                match parsed {
                    Ok(config) => Ok(config),
                    Err(e) => {
                        log::warn!("Stored backup configuration is invalid, using defaults: {}", e);
                        Ok(BackupConfiguration::default())
                    }
                }
            }
            None => {
                let config = BackupConfiguration::default();
                self.key_value_store
                    .set(CONFIGURATION_KEY, &serde_json::to_string(&config)?)
                    .await?;
                Ok(config)
            }
        }
    }

    fn ensure_accepting(&self) -> BackupResult<()> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(BackupError::ShuttingDown);
        }
        Ok(())
    }

    /// Apply a partial configuration update and reschedule
    pub async fn configure(&self, update: BackupConfigurationUpdate) -> BackupResult<BackupConfiguration> {
        self.ensure_accepting()?;

        let mut configuration = self.configuration.write().await;
        let next = configuration.merged(&update);
        next.validate()?;

        self.key_value_store
            .set(CONFIGURATION_KEY, &serde_json::to_string(&next)?)
            .await?;
        *configuration = next.clone();
        drop(configuration);

        self.scheduler.reschedule();
        self.observability
            .add_breadcrumb("backup", "Backup configuration updated");
        log::info!("Backup configuration updated");
        Ok(next)
    }

    pub async fn get_configuration(&self) -> BackupConfiguration {
        self.configuration.read().await.clone()
    }

    pub fn is_backup_in_progress(&self) -> bool {
        self.backup_in_progress.load(Ordering::SeqCst)
    }

    pub fn is_recovery_in_progress(&self) -> bool {
        self.recovery_in_progress.load(Ordering::SeqCst)
    }

    /// Take a full backup now
    pub async fn create_manual_backup(&self, description: Option<String>) -> BackupResult<BackupMetadata> {
        self.run_backup(BackupTrigger::Manual, description).await
    }

    async fn run_backup(&self, trigger: BackupTrigger, description: Option<String>) -> BackupResult<BackupMetadata> {
        self.ensure_accepting()?;
        let _guard = OperationGuard::acquire(&self.backup_in_progress, "backup")?;

        let config = self.get_configuration().await;
        let mut metadata = BackupMetadata::begin_full(&self.settings, trigger, description);
        metadata.included_domains = config.included_domains();
        metadata.encrypted = config.encryption_enabled;
        let backup_id = metadata.id.clone();

        {
            let _sweep = self.ledger_sweep.lock().await;
            self.ledger.append(metadata).await?;
        }
        self.observability
            .add_breadcrumb("backup", &format!("Backup {} started", backup_id));
        log::info!("Starting {:?} backup {}", trigger, backup_id);

        let start = Instant::now();
        let result = self.perform_backup(&config, &backup_id).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(outcome) => {
                let verification_failed = outcome.verification == VerificationStatus::Failed;
                let updated = self
                    .ledger
                    .update(&backup_id, |entry| {
                        entry.size_bytes = outcome.size_bytes;
                        entry.checksum = outcome.checksum;
                        entry.verification = outcome.verification;
                        entry.remote_uploaded = outcome.remote_uploaded;
                        entry.warnings = outcome.warnings;
                        entry.duration_ms = Some(duration_ms);
                        if verification_failed {
                            entry.status = BackupStatus::Failed;
                            entry.error = Some("Verification of the stored backup failed".to_string());
                        } else {
                            entry.status = BackupStatus::Completed;
                        }
                    })
                    .await?;

                if verification_failed {
                    let error = BackupError::Integrity {
                        message: format!("Backup {} failed verification", backup_id),
                    };
                    self.observability.report_error(&error, "backup");
                    return Err(error);
                }

                log::info!(
                    "Backup {} completed: {} bytes in {}ms",
                    backup_id,
                    updated.size_bytes,
                    duration_ms
                );
                Ok(updated)
            }
            Err(e) => {
                log::error!("Backup {} failed: {}", backup_id, e);
                self.observability.report_error(&e, "backup");

                let message = e.to_string();
                if let Err(ledger_error) = self
                    .ledger
                    .update(&backup_id, |entry| {
                        entry.status = BackupStatus::Failed;
                        entry.verification = VerificationStatus::Failed;
                        entry.error = Some(message);
                        entry.duration_ms = Some(duration_ms);
                    })
                    .await
                {
                    log::error!("Failed to record backup failure: {}", ledger_error);
                }
                Err(e)
            }
        }
    }

    async fn perform_backup(&self, config: &BackupConfiguration, backup_id: &str) -> BackupResult<BackupOutcome> {
        let snapshot = self.capture.collect(config).await?;
        let mut warnings: Vec<String> = snapshot
            .failed_domains
            .iter()
            .map(|domain| format!("Failed to capture {}", domain))
            .collect();

        let (plaintext, checksum) = serialize_snapshot(&snapshot)?;
        let size_bytes = plaintext.len() as u64;

        let blob = if config.encryption_enabled {
            let record = self.encryption.encrypt_bytes(&plaintext, SNAPSHOT_CATEGORY).await?;
            serde_json::to_vec(&record)?
        } else {
            plaintext
        };

        let name = blob_name_for(backup_id);
        if config.local_backup {
            self.store.save(&name, &blob).await?;
        }

        let mut remote_uploaded = false;
        if config.cloud_backup {
            match self.store.upload_remote(&name, &blob).await {
                Ok(()) => remote_uploaded = true,
                Err(e) if config.local_backup => {
                    log::warn!("Remote upload failed, keeping local copy: {}", e);
                    self.observability.report_error(&e, "backup_upload");
                    warnings.push(format!("Remote upload failed: {}", e));
                }
                Err(e) => return Err(e),
            }
        }

        match self.prune_expired_backups(config.retention_days).await {
            Ok(pruned) if !pruned.is_empty() => {
                log::info!("Pruned {} expired backup(s)", pruned.len());
            }
            Ok(_) => {}
            Err(e) => warnings.push(format!("Retention cleanup failed: {}", e)),
        }

        // Only a local copy can be read back
        let verification = if config.local_backup {
            match self.load_snapshot(&name, &checksum, config.encryption_enabled, true).await {
                Ok(_) => VerificationStatus::Verified,
                Err(e) => {
                    log::error!("Verification of backup {} failed: {}", backup_id, e);
                    VerificationStatus::Failed
                }
            }
        } else {
            VerificationStatus::Pending
        };

        Ok(BackupOutcome {
            size_bytes,
            checksum,
            verification,
            remote_uploaded,
            warnings,
        })
    }

    /// Read a stored snapshot back, decrypting and optionally verifying it
    async fn load_snapshot(
        &self,
        name: &str,
        checksum: &str,
        encrypted: bool,
        verify: bool,
    ) -> BackupResult<SnapshotDocument> {
        let stored = self.store.load(name).await?;

        let plaintext = if encrypted {
            let record: EncryptedRecord = serde_json::from_slice(&stored)?;
            self.encryption.decrypt_bytes(&record, SNAPSHOT_CATEGORY).await?
        } else {
            stored
        };

        if verify {
            if !verify_checksum(&plaintext, checksum) {
                return Err(BackupError::Integrity {
                    message: format!("Checksum mismatch for {}", name),
                });
            }
            let document: Value = serde_json::from_slice(&plaintext)?;
            validate_snapshot_structure(&document)?;
        }

        Ok(serde_json::from_slice(&plaintext)?)
    }

    async fn prune_expired_backups(&self, retention_days: u32) -> BackupResult<Vec<String>> {
        let expired = self.ledger.expired(retention_days, Utc::now()).await;
        let mut removed = Vec::new();

        for entry in expired {
            match self.store.delete(&entry.blob_name()).await {
                Ok(()) => removed.push(entry.id),
                Err(e) => log::warn!("Failed to delete expired backup {}: {}", entry.id, e),
            }
        }

        self.ledger.remove_many(&removed).await?;
        Ok(removed)
    }

    /// Replace live data with the contents of a stored backup
    ///
    /// Nothing is written back unless the backup loads and, when requested,
    /// passes verification.
    pub async fn restore_from_backup(&self, backup_id: &str, options: RestoreOptions) -> BackupResult<RecoveryReport> {
        self.ensure_accepting()?;
        let _guard = OperationGuard::acquire(&self.recovery_in_progress, "recovery")?;

        let result = self.perform_restore(backup_id, &options).await;
        match &result {
            Ok(report) => {
                self.observability
                    .add_breadcrumb("recovery", &format!("Restored backup {}", backup_id));
                log::info!(
                    "Restore of {} finished in {}ms with {} warning(s)",
                    backup_id,
                    report.duration_ms,
                    report.warnings.len()
                );
            }
            Err(e) => {
                log::error!("Restore of {} failed: {}", backup_id, e);
                self.observability.report_error(e, "restore");
            }
        }
        result
    }

    async fn perform_restore(&self, backup_id: &str, options: &RestoreOptions) -> BackupResult<RecoveryReport> {
        let metadata = self.ledger.get(backup_id).await.ok_or_else(|| BackupError::NotFound {
            resource: format!("backup {}", backup_id),
        })?;

        if !metadata.is_successful() {
            return Err(BackupError::Integrity {
                message: format!("Backup {} is not restorable ({:?})", backup_id, metadata.status),
            });
        }

        let plan_id = options
            .plan_id
            .clone()
            .unwrap_or_else(|| self.settings.default_recovery_plan.clone());
        let plan = self
            .recovery
            .get_plan(&plan_id)
            .await
            .ok_or_else(|| BackupError::NotFound {
                resource: format!("recovery plan {}", plan_id),
            })?;

        let snapshot = self
            .load_snapshot(
                &metadata.blob_name(),
                &metadata.checksum,
                metadata.encrypted,
                options.verify_integrity,
            )
            .await?;

        if options.create_safety_backup {
            let safety = self
                .run_backup(
                    BackupTrigger::Safety,
                    Some(format!("Safety backup before restoring {}", backup_id)),
                )
                .await?;
            log::info!("Created safety backup {}", safety.id);
        }

        self.recovery
            .execute(&plan, &snapshot, ExecutionOptions::default())
            .await
    }

    /// Newest first
    pub async fn get_backup_history(&self, limit: Option<usize>) -> Vec<BackupMetadata> {
        self.ledger.history(limit).await
    }

    pub async fn get_recovery_plans(&self) -> Vec<RecoveryPlan> {
        self.recovery.plans().await
    }

    pub async fn register_recovery_plan(&self, plan: RecoveryPlan) -> BackupResult<()> {
        self.ensure_accepting()?;
        self.recovery.register_plan(plan).await
    }

    /// Dry-run a plan against a stub snapshot
    pub async fn test_recovery_plan(&self, plan_id: &str) -> BackupResult<RecoveryTestResult> {
        self.ensure_accepting()?;
        self.recovery.test_plan(plan_id).await
    }

    pub async fn get_backup_metrics(&self) -> DisasterRecoveryMetrics {
        let entries = self.ledger.all().await;
        let successful: Vec<&BackupMetadata> = entries.iter().filter(|e| e.is_successful()).collect();
        let failed = entries
            .iter()
            .filter(|e| e.status == BackupStatus::Failed)
            .count();

        let durations: Vec<u64> = successful.iter().filter_map(|e| e.duration_ms).collect();
        let average_backup_duration_ms = if durations.is_empty() {
            0
        } else {
            durations.iter().sum::<u64>() / durations.len() as u64
        };

        DisasterRecoveryMetrics {
            total_backups: entries.len(),
            successful_backups: successful.len(),
            failed_backups: failed,
            average_backup_duration_ms,
            total_data_size_bytes: successful.iter().map(|e| e.size_bytes).sum(),
            last_backup_date: successful.iter().map(|e| e.timestamp).max(),
            next_scheduled_backup: self.scheduler.next_run(),
            recovery_time_objective_minutes: RECOVERY_TIME_OBJECTIVE_MINUTES,
            recovery_point_objective_minutes: RECOVERY_POINT_OBJECTIVE_MINUTES,
        }
    }

    /// Fail interrupted entries, evaluate backup health and raise alerts
    pub async fn run_health_check(&self) -> BackupResult<HealthReport> {
        // In-progress entries are only stale while no backup is running
        let stale_entries_failed = {
            let _sweep = self.ledger_sweep.lock().await;
            if self.is_backup_in_progress() {
                Vec::new()
            } else {
                self.ledger.fail_stale_in_progress("Backup did not complete").await?
            }
        };

        let config = self.get_configuration().await;
        let history = self.ledger.all().await;
        let now = Utc::now();
        let alerts = evaluate_health(&history, &config, now);

        for alert in &alerts {
            self.observability.raise_alert(alert);
        }

        let report = HealthReport {
            checked_at: now,
            healthy: alerts.iter().all(|alert| alert.severity == AlertSeverity::Info),
            success_rate: success_rate(&history),
            last_successful_backup: history
                .iter()
                .filter(|entry| entry.is_successful())
                .map(|entry| entry.timestamp)
                .max(),
            stale_entries_failed,
            alerts,
        };

        log::debug!(
            "Health check: healthy={} alerts={}",
            report.healthy,
            report.alerts.len()
        );
        Ok(report)
    }

    /// Remove a backup from storage and the ledger
    pub async fn delete_backup(&self, backup_id: &str) -> BackupResult<()> {
        self.ensure_accepting()?;

        let metadata = self.ledger.get(backup_id).await.ok_or_else(|| BackupError::NotFound {
            resource: format!("backup {}", backup_id),
        })?;

        if metadata.status == BackupStatus::InProgress && self.is_backup_in_progress() {
            return Err(BackupError::OperationInProgress {
                operation: "backup".to_string(),
            });
        }

        self.store.delete(&metadata.blob_name()).await?;
        self.ledger.remove(backup_id).await?;
        log::info!("Deleted backup {}", backup_id);
        Ok(())
    }

    pub async fn encrypt_sensitive_data(&self, data: &Value, category: &str) -> BackupResult<EncryptedRecord> {
        let json = serde_json::to_string(data)?;
        self.encryption.encrypt(&json, category).await
    }

    pub async fn decrypt_sensitive_data(&self, record: &EncryptedRecord, category: &str) -> BackupResult<Value> {
        let json = self.encryption.decrypt(record, category).await?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn get_retention_policy(&self, category: &str) -> DataRetentionPolicy {
        self.retention.get_policy(category)
    }

    pub fn check_compliance(&self, category: &str, payload: &Value, consent_granted: bool) -> ComplianceReport {
        self.retention.check_compliance(category, payload, consent_granted)
    }

    fn privacy(&self) -> BackupResult<&PrivacyService> {
        self.privacy.as_deref().ok_or_else(|| BackupError::Configuration {
            message: "No user data repository configured".to_string(),
        })
    }

    pub async fn generate_data_export(&self, user_id: &str, categories: &[String]) -> BackupResult<DataExport> {
        self.ensure_accepting()?;
        self.privacy()?.generate_data_export(user_id, categories).await
    }

    pub async fn secure_data_deletion(&self, user_id: &str, categories: &[String]) -> BackupResult<DeletionReport> {
        self.ensure_accepting()?;
        self.privacy()?.secure_data_deletion(user_id, categories).await
    }

    pub async fn generate_privacy_report(&self, user_id: &str) -> BackupResult<PrivacyReport> {
        self.privacy()?.generate_privacy_report(user_id).await
    }

    /// Prune expired backups and, when configured, expired user records
    pub async fn run_retention_cleanup(&self) -> BackupResult<RetentionSweepReport> {
        self.ensure_accepting()?;

        let retention_days = self.get_configuration().await.retention_days;
        let expired_backups = self.prune_expired_backups(retention_days).await?;

        let records = match &self.privacy {
            Some(privacy) => Some(privacy.run_retention_cleanup(&self.settings.user_id).await?),
            None => None,
        };

        Ok(RetentionSweepReport {
            expired_backups,
            records,
        })
    }
}

#[async_trait]
impl ScheduledJobs for BackupOrchestrator {
    async fn schedule_inputs(&self) -> (BackupConfiguration, Option<DateTime<Utc>>) {
        let config = self.get_configuration().await;
        let last_success = self.ledger.last_successful().await.map(|entry| entry.timestamp);
        (config, last_success)
    }

    async fn run_scheduled_backup(&self) {
        match self.run_backup(BackupTrigger::Scheduled, None).await {
            Ok(metadata) => log::info!("Scheduled backup {} completed", metadata.id),
            Err(BackupError::OperationInProgress { .. }) => {
                log::info!("Skipping scheduled backup, another backup is running")
            }
            Err(e) => log::error!("Scheduled backup failed: {}", e),
        }
    }

    async fn run_periodic_health_check(&self) {
        if let Err(e) = self.run_health_check().await {
            log::error!("Health check failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn orchestrator() -> (BackupOrchestrator, Arc<MemoryCollector>, Arc<MemoryBlobStorage>) {
        let user = Arc::new(MemoryCollector::new(DataDomain::UserData, json!({ "name": "Ana" })));
        let blobs = Arc::new(MemoryBlobStorage::new());
        let dependencies = OrchestratorDependencies::new(
            Arc::new(MemoryKeyValueStore::new()),
            blobs.clone(),
            vec![user.clone() as Arc<dyn DomainCollector>],
        );
        let orchestrator = BackupOrchestrator::new(dependencies, OrchestratorSettings::default()).unwrap();
        orchestrator
            .configure(BackupConfigurationUpdate {
                include_communication_data: Some(false),
                include_progress_data: Some(false),
                include_settings_data: Some(false),
                ..Default::default()
            })
            .await
            .unwrap();
        (orchestrator, user, blobs)
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let flag = Arc::new(AtomicBool::new(false));
        {
            let _guard = OperationGuard::acquire(&flag, "backup").unwrap();
            assert!(flag.load(Ordering::SeqCst));
            assert!(matches!(
                OperationGuard::acquire(&flag, "backup"),
                Err(BackupError::OperationInProgress { .. })
            ));
        }
        assert!(!flag.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_manual_backup_is_verified() {
        let (orchestrator, _, blobs) = orchestrator().await;

        let metadata = orchestrator
            .create_manual_backup(Some("before update".to_string()))
            .await
            .unwrap();

        assert_eq!(metadata.status, BackupStatus::Completed);
        assert_eq!(metadata.verification, VerificationStatus::Verified);
        assert!(metadata.encrypted);
        assert_eq!(metadata.checksum.len(), 64);
        assert_eq!(metadata.included_domains, vec![DataDomain::UserData]);
        assert_eq!(blobs.len(), 1);
        assert!(!orchestrator.is_backup_in_progress());
    }

    #[tokio::test]
    async fn test_scalar_domain_payload_is_verified_and_restored() {
        let (orchestrator, user, _) = orchestrator().await;
        user.set_state(json!("plain string profile"));

        let metadata = orchestrator.create_manual_backup(None).await.unwrap();
        assert_eq!(metadata.status, BackupStatus::Completed);
        assert_eq!(metadata.verification, VerificationStatus::Verified);

        user.set_state(json!(7));
        orchestrator
            .restore_from_backup(&metadata.id, RestoreOptions::default())
            .await
            .unwrap();
        assert_eq!(user.state(), json!("plain string profile"));
    }

    #[tokio::test]
    async fn test_failed_capture_is_recorded() {
        let (orchestrator, user, _) = orchestrator().await;
        user.set_failing(true);

        let result = orchestrator.create_manual_backup(None).await;
        assert!(matches!(result, Err(BackupError::Capture { .. })));

        let history = orchestrator.get_backup_history(None).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, BackupStatus::Failed);
        assert!(history[0].error.is_some());

        let metrics = orchestrator.get_backup_metrics().await;
        assert_eq!(metrics.failed_backups, 1);
        assert_eq!(metrics.recovery_time_objective_minutes, 240);
        assert_eq!(metrics.recovery_point_objective_minutes, 1440);
    }

    #[tokio::test]
    async fn test_cloud_only_without_provider_fails() {
        let (orchestrator, _, _) = orchestrator().await;
        orchestrator
            .configure(BackupConfigurationUpdate {
                local_backup: Some(false),
                cloud_backup: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();

        let result = orchestrator.create_manual_backup(None).await;
        assert!(matches!(result, Err(BackupError::Upload { .. })));
    }

    #[tokio::test]
    async fn test_upload_failure_with_local_copy_is_a_warning() {
        let (orchestrator, _, _) = orchestrator().await;
        orchestrator
            .configure(BackupConfigurationUpdate {
                cloud_backup: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();

        let metadata = orchestrator.create_manual_backup(None).await.unwrap();
        assert_eq!(metadata.status, BackupStatus::Completed);
        assert!(!metadata.remote_uploaded);
        assert_eq!(metadata.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_backup_removes_blob_and_entry() {
        let (orchestrator, _, blobs) = orchestrator().await;
        let metadata = orchestrator.create_manual_backup(None).await.unwrap();

        orchestrator.delete_backup(&metadata.id).await.unwrap();

        assert!(blobs.is_empty());
        assert!(orchestrator.get_backup_history(None).await.is_empty());
        assert!(matches!(
            orchestrator.delete_backup(&metadata.id).await,
            Err(BackupError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_configuration_is_not_applied() {
        let (orchestrator, _, _) = orchestrator().await;
        let before = orchestrator.get_configuration().await;

        let result = orchestrator
            .configure(BackupConfigurationUpdate {
                time: Some("noon".to_string()),
                ..Default::default()
            })
            .await;

        assert!(matches!(result, Err(BackupError::Configuration { .. })));
        assert_eq!(orchestrator.get_configuration().await, before);
    }

    #[tokio::test]
    async fn test_sensitive_data_roundtrip() {
        let (orchestrator, _, _) = orchestrator().await;
        let payload = json!({ "goal": "two-word requests", "therapy_notes": "progressing" });

        let record = orchestrator
            .encrypt_sensitive_data(&payload, "therapy_goals")
            .await
            .unwrap();
        let decrypted = orchestrator
            .decrypt_sensitive_data(&record, "therapy_goals")
            .await
            .unwrap();
        assert_eq!(decrypted, payload);

        assert!(!orchestrator.check_compliance("therapy_goals", &payload, false).compliant);
        assert!(orchestrator.get_retention_policy("unknown").allow_data_export);
    }

    #[tokio::test]
    async fn test_privacy_requires_repository() {
        let (orchestrator, _, _) = orchestrator().await;
        let result = orchestrator.generate_privacy_report("u1").await;
        assert!(matches!(result, Err(BackupError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_cleanup_refuses_new_operations() {
        let (orchestrator, _, _) = orchestrator().await;
        orchestrator.initialize().await.unwrap();
        orchestrator.cleanup().await;

        assert!(matches!(
            orchestrator.create_manual_backup(None).await,
            Err(BackupError::ShuttingDown)
        ));
        assert!(orchestrator.get_backup_metrics().await.next_scheduled_backup.is_none());
    }
}

//! Data models for backups, recovery plans and policies

use super::*;
use serde_json::Value;

/// Maximum number of test results kept on a recovery plan
pub const MAX_TEST_HISTORY: usize = 10;

/// Recovery time objective in minutes
pub const RECOVERY_TIME_OBJECTIVE_MINUTES: u32 = 240;

/// Recovery point objective in minutes
pub const RECOVERY_POINT_OBJECTIVE_MINUTES: u32 = 1440;

/// Backup type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupKind {
    Full,
    Incremental,
    Differential,
}

/// Lifecycle state of a backup attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

/// Result of re-reading a stored backup and checking its checksum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Verified,
    Failed,
}

/// What started a backup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupTrigger {
    Manual,
    Scheduled,
    /// Taken automatically before a restore overwrites live data
    Safety,
}

/// Ledger record for one backup attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub id: String,
    pub kind: BackupKind,
    pub timestamp: DateTime<Utc>,
    pub size_bytes: u64,
    /// Hex SHA-256 of the serialized plaintext snapshot
    pub checksum: String,
    pub schema_version: String,
    pub app_version: String,
    pub environment: String,
    pub platform: String,
    pub user_id: String,
    pub status: BackupStatus,
    pub error: Option<String>,
    pub verification: VerificationStatus,
    pub description: Option<String>,
    pub trigger: BackupTrigger,
    pub encrypted: bool,
    pub duration_ms: Option<u64>,
    pub included_domains: Vec<DataDomain>,
    pub remote_uploaded: bool,
    pub warnings: Vec<String>,
}

impl BackupMetadata {
    /// Start a new full backup attempt in the in-progress state
    pub fn begin_full(
        settings: &OrchestratorSettings,
        trigger: BackupTrigger,
        description: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: BackupKind::Full,
            timestamp: Utc::now(),
            size_bytes: 0,
            checksum: String::new(),
            schema_version: SCHEMA_VERSION.to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: settings.environment.clone(),
            platform: std::env::consts::OS.to_string(),
            user_id: settings.user_id.clone(),
            status: BackupStatus::InProgress,
            error: None,
            verification: VerificationStatus::Pending,
            description,
            trigger,
            encrypted: false,
            duration_ms: None,
            included_domains: Vec::new(),
            remote_uploaded: false,
            warnings: Vec::new(),
        }
    }

    /// Blob name used by the backup store
    pub fn blob_name(&self) -> String {
        blob_name_for(&self.id)
    }

    pub fn is_successful(&self) -> bool {
        self.status == BackupStatus::Completed
    }
}

/// Blob name for a backup id
pub fn blob_name_for(backup_id: &str) -> String {
    format!("backup_{}.json", backup_id)
}

/// Point-in-time capture of all included data domains
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDocument {
    pub timestamp: DateTime<Utc>,
    pub schema_version: String,
    pub app_version: String,
    /// Domain name to payload; sorted so serialization is deterministic
    pub domains: BTreeMap<String, Value>,
    pub failed_domains: Vec<String>,
}

impl SnapshotDocument {
    pub fn new() -> Self {
        Self {
            timestamp: Utc::now(),
            schema_version: SCHEMA_VERSION.to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            domains: BTreeMap::new(),
            failed_domains: Vec::new(),
        }
    }

    /// Synthetic snapshot used when dry-running a recovery plan
    pub fn stub() -> Self {
        let mut snapshot = Self::new();
        for domain in DataDomain::ALL {
            snapshot.domains.insert(
                domain.as_str().to_string(),
                serde_json::json!({ "test": true }),
            );
        }
        snapshot
    }

    pub fn payload(&self, domain: DataDomain) -> Option<&Value> {
        self.domains.get(domain.as_str())
    }
}

impl Default for SnapshotDocument {
    fn default() -> Self {
        Self::new()
    }
}

/// Encrypted payload with everything needed to decrypt it except the master key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedRecord {
    /// Base64 ciphertext with the GCM tag appended
    pub ciphertext: String,
    /// Hex, 128 bits
    pub salt: String,
    /// Hex, 128 bits
    pub iv: String,
    pub algorithm: String,
    pub iterations: u32,
}

/// Retention and privacy rules for one data category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRetentionPolicy {
    pub category: String,
    pub max_retention_days: u32,
    pub auto_delete_after_days: u32,
    pub requires_explicit_consent: bool,
    pub allow_data_export: bool,
    pub allow_data_deletion: bool,
}

/// Recovery step priority; only critical failures abort a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPriority {
    Critical,
    High,
    Medium,
    Low,
}

/// What a recovery step does
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepAction {
    DataRestore { domains: Vec<DataDomain> },
    CacheClear,
    ServiceRestart { service: String },
    UserNotification { message: String },
    MonitoringAlert { message: String },
}

impl StepAction {
    pub fn kind(&self) -> &'static str {
        match self {
            StepAction::DataRestore { .. } => "data_restore",
            StepAction::CacheClear => "cache_clear",
            StepAction::ServiceRestart { .. } => "service_restart",
            StepAction::UserNotification { .. } => "user_notification",
            StepAction::MonitoringAlert { .. } => "monitoring_alert",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryStep {
    pub id: String,
    pub name: String,
    pub description: String,
    pub action: StepAction,
    pub priority: StepPriority,
    pub timeout_secs: u64,
    pub retry_count: u32,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryPlan {
    pub id: String,
    pub name: String,
    pub description: String,
    pub trigger_conditions: Vec<String>,
    pub steps: Vec<RecoveryStep>,
    pub estimated_duration_secs: u64,
    pub last_tested: Option<DateTime<Utc>>,
    #[serde(default)]
    pub test_history: Vec<RecoveryTestResult>,
}

impl RecoveryPlan {
    pub fn step(&self, step_id: &str) -> Option<&RecoveryStep> {
        self.steps.iter().find(|step| step.id == step_id)
    }

    /// Append a test result, keeping only the most recent entries
    pub fn record_test(&mut self, result: RecoveryTestResult) {
        self.last_tested = Some(result.timestamp);
        self.test_history.push(result);
        if self.test_history.len() > MAX_TEST_HISTORY {
            let excess = self.test_history.len() - MAX_TEST_HISTORY;
            self.test_history.drain(..excess);
        }
    }
}

/// Percentages computed by a recovery plan dry run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestMetrics {
    pub data_integrity: f64,
    pub performance: f64,
    pub user_experience: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryTestResult {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub metrics: TestMetrics,
}

/// Options for [`BackupOrchestrator::restore_from_backup`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreOptions {
    /// Re-check the stored checksum before touching live data
    pub verify_integrity: bool,
    /// Snapshot the current state before overwriting it
    pub create_safety_backup: bool,
    /// Recovery plan to run; the configured default when absent
    pub plan_id: Option<String>,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            verify_integrity: true,
            create_safety_backup: true,
            plan_id: None,
        }
    }
}

/// Derived disaster recovery statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisasterRecoveryMetrics {
    pub total_backups: usize,
    pub successful_backups: usize,
    pub failed_backups: usize,
    pub average_backup_duration_ms: u64,
    pub total_data_size_bytes: u64,
    pub last_backup_date: Option<DateTime<Utc>>,
    pub next_scheduled_backup: Option<DateTime<Utc>>,
    pub recovery_time_objective_minutes: u32,
    pub recovery_point_objective_minutes: u32,
}

/// Severity of a health alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthAlert {
    pub severity: AlertSeverity,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

impl HealthAlert {
    pub fn new(severity: AlertSeverity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            raised_at: Utc::now(),
        }
    }
}

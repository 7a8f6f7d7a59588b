//! Backup and disaster recovery for the AAC companion app
//!
//! This module provides the complete data safety layer:
//! - Scheduled and manual snapshots of the user, communication, progress and settings domains
//! - SHA-256 integrity verification of every stored snapshot
//! - AES-256-GCM encryption of sensitive records with per-record PBKDF2 keys
//! - Dependency-ordered recovery plans with timeouts, retries and dry-run testing
//! - Retention, export and deletion policies per data category
//!
//! Everything is wired together by [`BackupOrchestrator`], which owns the
//! configuration and the backup ledger and is the only writer of either.

pub mod models;
pub mod storage;
pub mod observability;
pub mod integrity;
pub mod encryption;
pub mod retention;
pub mod capture;
pub mod store;
pub mod ledger;
pub mod recovery;
pub mod scheduler;
pub mod privacy;
pub mod orchestrator;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use models::*;
pub use storage::*;
pub use observability::*;
pub use integrity::*;
pub use encryption::*;
pub use retention::*;
pub use capture::*;
pub use store::*;
pub use ledger::*;
pub use recovery::*;
pub use scheduler::*;
pub use privacy::*;
pub use orchestrator::*;

/// Key under which the backup configuration is persisted
pub const CONFIGURATION_KEY: &str = "backup_configuration";

/// Schema version written into every snapshot and metadata record
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Result type for backup and recovery operations
pub type BackupResult<T> = Result<T, BackupError>;

/// Error type for backup, recovery and encryption operations
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum BackupError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Operation already in progress: {operation}")]
    OperationInProgress { operation: String },

    #[error("Capture error: {message}")]
    Capture { message: String },

    #[error("Persistence error: {message}")]
    Persistence { message: String },

    #[error("Upload error ({provider}): {message}")]
    Upload { provider: String, message: String },

    #[error("Integrity error: {message}")]
    Integrity { message: String },

    #[error("Invalid recovery plan {plan_id}: {message}")]
    PlanConfiguration { plan_id: String, message: String },

    #[error("Recovery step {step_id} failed: {message}")]
    StepExecution { step_id: String, message: String },

    #[error("Encryption error: {message}")]
    Encryption { message: String },

    #[error("Decryption error: {message}")]
    Decryption { message: String },

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Backup system is shutting down")]
    ShuttingDown,
}

impl From<serde_json::Error> for BackupError {
    fn from(e: serde_json::Error) -> Self {
        BackupError::Serialization {
            message: e.to_string(),
        }
    }
}

/// The data domains a snapshot can contain
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataDomain {
    UserData,
    CommunicationData,
    ProgressData,
    SettingsData,
}

impl DataDomain {
    pub const ALL: [DataDomain; 4] = [
        DataDomain::UserData,
        DataDomain::CommunicationData,
        DataDomain::ProgressData,
        DataDomain::SettingsData,
    ];

    /// Name used as the snapshot map key and in log output
    pub fn as_str(&self) -> &'static str {
        match self {
            DataDomain::UserData => "user_data",
            DataDomain::CommunicationData => "communication_data",
            DataDomain::ProgressData => "progress_data",
            DataDomain::SettingsData => "settings_data",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|domain| domain.as_str() == name)
    }
}

impl fmt::Display for DataDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How often the automated backup runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupFrequency {
    Daily,
    Weekly,
    Monthly,
}

impl BackupFrequency {
    /// Nominal number of days between two automated backups
    pub fn period_days(&self) -> i64 {
        match self {
            BackupFrequency::Daily => 1,
            BackupFrequency::Weekly => 7,
            BackupFrequency::Monthly => 30,
        }
    }

    /// Maximum age of the last successful backup before the health check
    /// raises a staleness alert (one period plus an hour of slack)
    pub fn staleness_threshold(&self) -> Duration {
        Duration::days(self.period_days()) + Duration::hours(1)
    }
}

/// User-facing backup configuration, persisted under [`CONFIGURATION_KEY`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupConfiguration {
    /// Enable automated backups
    pub enabled: bool,
    /// Automated backup cadence
    pub frequency: BackupFrequency,
    /// Local time of day for automated backups, "HH:MM"
    pub time: String,
    pub include_user_data: bool,
    pub include_communication_data: bool,
    pub include_progress_data: bool,
    pub include_settings_data: bool,
    /// Days a backup is kept before retention cleanup removes it
    pub retention_days: u32,
    /// Persist snapshots to local storage
    pub local_backup: bool,
    /// Upload snapshots to the remote object store
    pub cloud_backup: bool,
    /// Encrypt snapshots before they leave memory
    pub encryption_enabled: bool,
}

impl Default for BackupConfiguration {
    fn default() -> Self {
        Self {
            enabled: true,
            frequency: BackupFrequency::Daily,
            time: "02:00".to_string(),
            include_user_data: true,
            include_communication_data: true,
            include_progress_data: true,
            include_settings_data: true,
            retention_days: 30,
            local_backup: true,
            cloud_backup: false,
            encryption_enabled: true,
        }
    }
}

impl BackupConfiguration {
    /// Domains selected for capture, in canonical order
    pub fn included_domains(&self) -> Vec<DataDomain> {
        DataDomain::ALL
            .into_iter()
            .filter(|domain| self.includes(*domain))
            .collect()
    }

    pub fn includes(&self, domain: DataDomain) -> bool {
        match domain {
            DataDomain::UserData => self.include_user_data,
            DataDomain::CommunicationData => self.include_communication_data,
            DataDomain::ProgressData => self.include_progress_data,
            DataDomain::SettingsData => self.include_settings_data,
        }
    }

    /// Parse the configured time of day
    pub fn schedule_time(&self) -> BackupResult<NaiveTime> {
        NaiveTime::parse_from_str(self.time.trim(), "%H:%M").map_err(|e| BackupError::Configuration {
            message: format!("Invalid backup time '{}': {}", self.time, e),
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> BackupResult<()> {
        self.schedule_time()?;

        if self.retention_days == 0 {
            return Err(BackupError::Configuration {
                message: "retention_days must be at least 1".to_string(),
            });
        }

        if self.included_domains().is_empty() {
            return Err(BackupError::Configuration {
                message: "At least one data domain must be included".to_string(),
            });
        }

        if !self.local_backup && !self.cloud_backup {
            return Err(BackupError::Configuration {
                message: "Either local or cloud backup must be enabled".to_string(),
            });
        }

        Ok(())
    }

    /// Return a copy with every field present in `update` replaced
    pub fn merged(&self, update: &BackupConfigurationUpdate) -> Self {
        let mut next = self.clone();
        if let Some(enabled) = update.enabled {
            next.enabled = enabled;
        }
        if let Some(frequency) = update.frequency {
            next.frequency = frequency;
        }
        if let Some(time) = &update.time {
            next.time = time.clone();
        }
        if let Some(value) = update.include_user_data {
            next.include_user_data = value;
        }
        if let Some(value) = update.include_communication_data {
            next.include_communication_data = value;
        }
        if let Some(value) = update.include_progress_data {
            next.include_progress_data = value;
        }
        if let Some(value) = update.include_settings_data {
            next.include_settings_data = value;
        }
        if let Some(days) = update.retention_days {
            next.retention_days = days;
        }
        if let Some(local) = update.local_backup {
            next.local_backup = local;
        }
        if let Some(cloud) = update.cloud_backup {
            next.cloud_backup = cloud;
        }
        if let Some(encryption) = update.encryption_enabled {
            next.encryption_enabled = encryption;
        }
        next
    }
}

/// Partial configuration accepted by [`BackupOrchestrator::configure`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupConfigurationUpdate {
    pub enabled: Option<bool>,
    pub frequency: Option<BackupFrequency>,
    pub time: Option<String>,
    pub include_user_data: Option<bool>,
    pub include_communication_data: Option<bool>,
    pub include_progress_data: Option<bool>,
    pub include_settings_data: Option<bool>,
    pub retention_days: Option<u32>,
    pub local_backup: Option<bool>,
    pub cloud_backup: Option<bool>,
    pub encryption_enabled: Option<bool>,
}

/// Process-level settings for the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    /// Owner recorded on every backup
    pub user_id: String,
    /// Environment tag recorded on every backup (production, staging, ...)
    pub environment: String,
    /// Interval between health checks in seconds
    pub health_check_interval_secs: u64,
    /// PBKDF2 iterations for per-record key derivation
    pub key_derivation_iterations: u32,
    /// Field names that mark a payload as sensitive for compliance checks
    pub sensitive_fields: Vec<String>,
    /// Plan used by restores that don't name one
    pub default_recovery_plan: String,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            user_id: "local_user".to_string(),
            environment: "production".to_string(),
            health_check_interval_secs: 3600,
            key_derivation_iterations: encryption::DEFAULT_KDF_ITERATIONS,
            sensitive_fields: retention::default_sensitive_fields(),
            default_recovery_plan: recovery::STANDARD_PLAN_ID.to_string(),
        }
    }
}

impl OrchestratorSettings {
    /// Validate settings parameters
    pub fn validate(&self) -> BackupResult<()> {
        if self.user_id.trim().is_empty() {
            return Err(BackupError::Configuration {
                message: "user_id must not be empty".to_string(),
            });
        }

        if self.health_check_interval_secs == 0 {
            return Err(BackupError::Configuration {
                message: "health_check_interval_secs must be greater than 0".to_string(),
            });
        }

        if self.key_derivation_iterations < encryption::MIN_KDF_ITERATIONS {
            return Err(BackupError::Configuration {
                message: format!(
                    "Key derivation iterations must be at least {} for security",
                    encryption::MIN_KDF_ITERATIONS
                ),
            });
        }

        log::debug!("Orchestrator settings validated successfully");
        Ok(())
    }
}

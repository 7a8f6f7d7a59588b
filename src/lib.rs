/**
 * AAC Backup - Core Library
 *
 * Backup, disaster recovery and encrypted data lifecycle for the AAC
 * companion app: scheduled snapshots, checksum verification, recovery
 * plans, retention policies and authenticated encryption of sensitive data.
 */

pub mod disaster_recovery;

// Re-export commonly used types
pub use disaster_recovery::{
    BackupConfiguration,
    BackupConfigurationUpdate,
    BackupError,
    BackupFrequency,
    BackupMetadata,
    BackupOrchestrator,
    BackupResult,
    DataDomain,
    DisasterRecoveryMetrics,
    OrchestratorDependencies,
    OrchestratorSettings,
    RecoveryPlan,
    RecoveryReport,
    RestoreOptions,
};

/// Logging utilities
pub mod logging {
    use log::LevelFilter;
    use std::str::FromStr;

    /// Environment variable read when no level is passed explicitly
    pub const LOG_LEVEL_ENV: &str = "AAC_BACKUP_LOG";

    /// Initialize logging for this crate
    ///
    /// The level comes from `level`, then `AAC_BACKUP_LOG`, then defaults to
    /// info. Dependencies only log warnings and errors.
    pub fn init_logging(level: Option<&str>) -> anyhow::Result<()> {
        let log_level = resolve_level(level, std::env::var(LOG_LEVEL_ENV).ok())?;

        env_logger::Builder::new()
            .filter_level(LevelFilter::Warn)
            .filter_module(env!("CARGO_CRATE_NAME"), log_level)
            .format_timestamp_secs()
            .try_init()?;

        log::info!("Logging initialized at level: {}", log_level);
        Ok(())
    }

    fn resolve_level(explicit: Option<&str>, from_env: Option<String>) -> anyhow::Result<LevelFilter> {
        match explicit.map(str::to_string).or(from_env) {
            Some(name) => LevelFilter::from_str(name.trim())
                .map_err(|_| anyhow::anyhow!("Unknown log level '{}'", name)),
            None => Ok(LevelFilter::Info),
        }
    }

}

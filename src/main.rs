use std::path::{Path, PathBuf};
use std::sync::Arc;

use aac_backup::disaster_recovery::*;
use aac_backup::logging::init_logging;
use anyhow::Context;

/// Build the orchestrator over a data directory laid out as
/// `domains/<domain>.json`, `backups/` and `state/store.json`
async fn build_orchestrator(data_dir: &Path) -> anyhow::Result<BackupOrchestrator> {
    let store = FileKeyValueStore::open(data_dir.join("state").join("store.json"))
        .await
        .context("Failed to open state store")?;
    let blobs = FsBlobStorage::new(data_dir.join("backups"))
        .await
        .context("Failed to open backup directory")?;

    let collectors: Vec<Arc<dyn DomainCollector>> = DataDomain::ALL
        .iter()
        .map(|domain| {
            let path = data_dir.join("domains").join(format!("{}.json", domain));
            Arc::new(JsonFileCollector::new(*domain, path)) as Arc<dyn DomainCollector>
        })
        .collect();

    let settings = OrchestratorSettings {
        user_id: std::env::var("AAC_BACKUP_USER").unwrap_or_else(|_| "local_user".to_string()),
        environment: std::env::var("AAC_BACKUP_ENV").unwrap_or_else(|_| "production".to_string()),
        ..Default::default()
    };

    let dependencies = OrchestratorDependencies::new(Arc::new(store), Arc::new(blobs), collectors)
        .with_observability(Arc::new(LogSink));

    Ok(BackupOrchestrator::new(dependencies, settings)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging(None)?;

    let data_dir = std::env::var("AAC_BACKUP_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("aac-data"));
    let command = std::env::args().nth(1).unwrap_or_else(|| "run".to_string());

    let orchestrator = build_orchestrator(&data_dir).await?;
    orchestrator.initialize().await?;

    match command.as_str() {
        "backup" => {
            let metadata = orchestrator
                .create_manual_backup(Some("Requested from command line".to_string()))
                .await?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
        }
        "history" => {
            let history = orchestrator.get_backup_history(Some(20)).await;
            println!("{}", serde_json::to_string_pretty(&history)?);
        }
        "restore" => {
            let backup_id = std::env::args().nth(2).context("usage: aac-backup restore <backup-id>")?;
            let report = orchestrator
                .restore_from_backup(&backup_id, RestoreOptions::default())
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        "test-plan" => {
            let plan_id = std::env::args()
                .nth(2)
                .unwrap_or_else(|| STANDARD_PLAN_ID.to_string());
            let result = orchestrator.test_recovery_plan(&plan_id).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        "health" => {
            let report = orchestrator.run_health_check().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        "run" => {
            log::info!("Backup daemon running over {}", data_dir.display());
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for shutdown signal")?;
            log::info!("Shutdown requested");
        }
        other => {
            orchestrator.cleanup().await;
            anyhow::bail!(
                "unknown command '{}' (expected run, backup, history, restore, test-plan or health)",
                other
            );
        }
    }

    orchestrator.cleanup().await;
    Ok(())
}

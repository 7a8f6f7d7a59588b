//! Snapshot capture across data domains

use super::*;
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;

/// Source and sink for one data domain
#[async_trait]
pub trait DomainCollector: Send + Sync {
    fn domain(&self) -> DataDomain;

    /// Serializable snapshot of the domain's current state
    async fn collect(&self) -> anyhow::Result<Value>;

    /// Replace the domain's state with `payload`
    async fn restore(&self, payload: &Value) -> anyhow::Result<()>;
}

/// Collects the configured domains into one snapshot document
pub struct BackupCapture {
    collectors: BTreeMap<DataDomain, Arc<dyn DomainCollector>>,
}

impl BackupCapture {
    pub fn new(collectors: Vec<Arc<dyn DomainCollector>>) -> Self {
        let collectors = collectors
            .into_iter()
            .map(|collector| (collector.domain(), collector))
            .collect();
        Self { collectors }
    }

    pub fn collector(&self, domain: DataDomain) -> Option<Arc<dyn DomainCollector>> {
        self.collectors.get(&domain).cloned()
    }

    /// Capture every domain included by `configuration`
    ///
    /// A failing domain is logged and stored as an empty payload; the capture
    /// only fails when no included domain could be collected.
    pub async fn collect(&self, configuration: &BackupConfiguration) -> BackupResult<SnapshotDocument> {
        let included = configuration.included_domains();
        let mut snapshot = SnapshotDocument::new();

        for domain in &included {
            let result = match self.collectors.get(domain) {
                Some(collector) => collector.collect().await,
                None => Err(anyhow::anyhow!("no collector registered")),
            };

            match result {
                Ok(payload) => {
                    log::debug!("Captured {}", domain);
                    snapshot.domains.insert(domain.as_str().to_string(), payload);
                }
                Err(e) => {
                    log::warn!("Failed to capture {}: {:#}", domain, e);
                    snapshot
                        .domains
                        .insert(domain.as_str().to_string(), Value::Object(Default::default()));
                    snapshot.failed_domains.push(domain.as_str().to_string());
                }
            }
        }

        if !included.is_empty() && snapshot.failed_domains.len() == included.len() {
            return Err(BackupError::Capture {
                message: format!(
                    "All included domains failed: {}",
                    snapshot.failed_domains.join(", ")
                ),
            });
        }

        log::info!(
            "Captured {} domain(s), {} failed",
            snapshot.domains.len() - snapshot.failed_domains.len(),
            snapshot.failed_domains.len()
        );
        Ok(snapshot)
    }

    /// Write one domain back from a snapshot
    pub async fn restore_domain(&self, domain: DataDomain, payload: &Value) -> anyhow::Result<()> {
        let collector = self
            .collectors
            .get(&domain)
            .ok_or_else(|| anyhow::anyhow!("no collector registered for {}", domain))?;
        collector.restore(payload).await
    }
}

/// Domain stored as a JSON document on disk
pub struct JsonFileCollector {
    domain: DataDomain,
    path: PathBuf,
}

impl JsonFileCollector {
    pub fn new(domain: DataDomain, path: impl Into<PathBuf>) -> Self {
        Self {
            domain,
            path: path.into(),
        }
    }
}

#[async_trait]
impl DomainCollector for JsonFileCollector {
    fn domain(&self) -> DataDomain {
        self.domain
    }

    async fn collect(&self) -> anyhow::Result<Value> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Value::Object(Default::default())),
            Err(e) => Err(e.into()),
        }
    }

    async fn restore(&self, payload: &Value) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = self.path.with_extension("restore");
        tokio::fs::write(&tmp_path, serde_json::to_vec_pretty(payload)?).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

/// Domain held in memory
pub struct MemoryCollector {
    domain: DataDomain,
    state: parking_lot::RwLock<Value>,
    failing: std::sync::atomic::AtomicBool,
}

impl MemoryCollector {
    pub fn new(domain: DataDomain, initial: Value) -> Self {
        Self {
            domain,
            state: parking_lot::RwLock::new(initial),
            failing: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> Value {
        self.state.read().clone()
    }

    pub fn set_state(&self, value: Value) {
        *self.state.write() = value;
    }

    /// Make collect and restore fail until reset
    pub fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            anyhow::bail!("{} is unavailable", self.domain);
        }
        Ok(())
    }
}

#[async_trait]
impl DomainCollector for MemoryCollector {
    fn domain(&self) -> DataDomain {
        self.domain
    }

    async fn collect(&self) -> anyhow::Result<Value> {
        self.check()?;
        Ok(self.state())
    }

    async fn restore(&self, payload: &Value) -> anyhow::Result<()> {
        self.check()?;
        self.set_state(payload.clone());
        Ok(())
    }
}

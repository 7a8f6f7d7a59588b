//! Error reporting, breadcrumbs and alerts

use super::*;

/// Destination for errors, breadcrumbs and health alerts
///
/// Implementations must not fail; delivery problems are theirs to swallow.
pub trait ObservabilitySink: Send + Sync {
    fn report_error(&self, error: &BackupError, context: &str);
    fn add_breadcrumb(&self, category: &str, message: &str);
    fn raise_alert(&self, alert: &HealthAlert);
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ObservabilitySink for NoopSink {
    fn report_error(&self, _error: &BackupError, _context: &str) {}
    fn add_breadcrumb(&self, _category: &str, _message: &str) {}
    fn raise_alert(&self, _alert: &HealthAlert) {}
}

/// Sink that writes everything to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ObservabilitySink for LogSink {
    fn report_error(&self, error: &BackupError, context: &str) {
        log::error!("[{}] {}", context, error);
    }

    fn add_breadcrumb(&self, category: &str, message: &str) {
        log::debug!("[{}] {}", category, message);
    }

    fn raise_alert(&self, alert: &HealthAlert) {
        match alert.severity {
            AlertSeverity::Critical => log::error!("Backup health alert: {}", alert.message),
            AlertSeverity::Warning => log::warn!("Backup health alert: {}", alert.message),
            AlertSeverity::Info => log::info!("Backup health alert: {}", alert.message),
        }
    }
}

/// Sink that keeps everything in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    errors: parking_lot::Mutex<Vec<String>>,
    breadcrumbs: parking_lot::Mutex<Vec<String>>,
    alerts: parking_lot::Mutex<Vec<HealthAlert>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }

    pub fn breadcrumbs(&self) -> Vec<String> {
        self.breadcrumbs.lock().clone()
    }

    pub fn alerts(&self) -> Vec<HealthAlert> {
        self.alerts.lock().clone()
    }
}

impl ObservabilitySink for MemorySink {
    fn report_error(&self, error: &BackupError, context: &str) {
        self.errors.lock().push(format!("{}: {}", context, error));
    }

    fn add_breadcrumb(&self, category: &str, message: &str) {
        self.breadcrumbs.lock().push(format!("{}: {}", category, message));
    }

    fn raise_alert(&self, alert: &HealthAlert) {
        self.alerts.lock().push(alert.clone());
    }
}

//! Recovery plans and their execution
//!
//! A plan is a dependency graph of steps. Execution order is computed before
//! anything runs: steps are grouped into waves whose dependencies are all
//! satisfied by earlier waves, and each wave runs in step id order. Every step
//! runs under its own timeout and is retried `retry_count` times. Only a
//! critical step can abort a plan; other failures become warnings.

use super::*;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration as StdDuration;
use tokio::sync::RwLock;
use tokio::time::Instant;

pub const STANDARD_PLAN_ID: &str = "standard";
pub const DATA_CORRUPTION_PLAN_ID: &str = "data_corruption";
pub const SERVICE_OUTAGE_PLAN_ID: &str = "service_outage";

/// Side effects a recovery step can perform
#[async_trait]
pub trait RecoveryActions: Send + Sync {
    /// Replace a domain's live state with `payload`
    async fn restore_domain(&self, domain: DataDomain, payload: &Value) -> anyhow::Result<()>;
    async fn clear_caches(&self) -> anyhow::Result<()>;
    async fn restart_service(&self, service: &str) -> anyhow::Result<()>;
    async fn notify_user(&self, message: &str) -> anyhow::Result<()>;
    async fn send_monitoring_alert(&self, message: &str) -> anyhow::Result<()>;

    /// Check that `action` could run without performing it
    ///
    /// Dry runs call this in place of the real handler, under the step's
    /// timeout and retry budget.
    async fn rehearse(&self, action: &StepAction) -> anyhow::Result<()> {
        log::debug!("Rehearsing {} action", action.kind());
        Ok(())
    }
}

/// Recovery actions backed by the domain collectors and the observability sink
pub struct DefaultRecoveryActions {
    capture: Arc<BackupCapture>,
    observability: Arc<dyn ObservabilitySink>,
}

impl DefaultRecoveryActions {
    pub fn new(capture: Arc<BackupCapture>, observability: Arc<dyn ObservabilitySink>) -> Self {
        Self {
            capture,
            observability,
        }
    }
}

#[async_trait]
impl RecoveryActions for DefaultRecoveryActions {
    async fn restore_domain(&self, domain: DataDomain, payload: &Value) -> anyhow::Result<()> {
        self.capture.restore_domain(domain, payload).await?;
        self.observability
            .add_breadcrumb("recovery", &format!("Restored {}", domain));
        Ok(())
    }

    async fn clear_caches(&self) -> anyhow::Result<()> {
        log::info!("Clearing application caches");
        self.observability.add_breadcrumb("recovery", "Caches cleared");
        Ok(())
    }

    async fn restart_service(&self, service: &str) -> anyhow::Result<()> {
        log::info!("Restarting service: {}", service);
        self.observability
            .add_breadcrumb("recovery", &format!("Service {} restarted", service));
        Ok(())
    }

    async fn notify_user(&self, message: &str) -> anyhow::Result<()> {
        log::info!("User notification: {}", message);
        self.observability.add_breadcrumb("user_notification", message);
        Ok(())
    }

    async fn send_monitoring_alert(&self, message: &str) -> anyhow::Result<()> {
        self.observability
            .raise_alert(&HealthAlert::new(AlertSeverity::Warning, message));
        Ok(())
    }
}

/// How a plan is executed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOptions {
    /// Check the plan against the snapshot without any side effects
    pub dry_run: bool,
}

/// Result of one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step_id: String,
    pub success: bool,
    pub attempts: u32,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Result of executing a plan to the end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub plan_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub dry_run: bool,
    pub steps: Vec<StepOutcome>,
    pub warnings: Vec<String>,
}

impl RecoveryReport {
    pub fn executed_step_ids(&self) -> Vec<String> {
        self.steps.iter().map(|outcome| outcome.step_id.clone()).collect()
    }
}

/// Group a plan's steps into dependency waves
///
/// Fails on duplicate ids, unknown dependencies and cycles.
pub fn execution_order(plan: &RecoveryPlan) -> BackupResult<Vec<Vec<String>>> {
    let plan_error = |message: String| BackupError::PlanConfiguration {
        plan_id: plan.id.clone(),
        message,
    };

    let mut remaining: BTreeMap<&str, &RecoveryStep> = BTreeMap::new();
    for step in &plan.steps {
        if remaining.insert(step.id.as_str(), step).is_some() {
            return Err(plan_error(format!("duplicate step id '{}'", step.id)));
        }
    }

    for step in &plan.steps {
        for dependency in &step.depends_on {
            if !remaining.contains_key(dependency.as_str()) {
                return Err(plan_error(format!(
                    "step '{}' depends on unknown step '{}'",
                    step.id, dependency
                )));
            }
        }
    }

    let mut done: HashSet<&str> = HashSet::new();
    let mut waves = Vec::new();

    while !remaining.is_empty() {
        let wave: Vec<&str> = remaining
            .values()
            .filter(|step| step.depends_on.iter().all(|dep| done.contains(dep.as_str())))
            .map(|step| step.id.as_str())
            .collect();

        if wave.is_empty() {
            let blocked: Vec<&str> = remaining.keys().copied().collect();
            return Err(plan_error(format!(
                "dependency cycle among steps: {}",
                blocked.join(", ")
            )));
        }

        for id in &wave {
            remaining.remove(id);
            done.insert(*id);
        }
        waves.push(wave.into_iter().map(str::to_string).collect());
    }

    Ok(waves)
}

/// Check a plan before it is registered
pub fn validate_plan(plan: &RecoveryPlan) -> BackupResult<()> {
    if plan.id.trim().is_empty() {
        return Err(BackupError::PlanConfiguration {
            plan_id: plan.id.clone(),
            message: "plan id must not be empty".to_string(),
        });
    }

    if plan.steps.is_empty() {
        return Err(BackupError::PlanConfiguration {
            plan_id: plan.id.clone(),
            message: "plan has no steps".to_string(),
        });
    }

    if let Some(step) = plan.steps.iter().find(|step| step.timeout_secs == 0) {
        return Err(BackupError::PlanConfiguration {
            plan_id: plan.id.clone(),
            message: format!("step '{}' has a zero timeout", step.id),
        });
    }

    execution_order(plan).map(|_| ())
}

/// Registry and executor of recovery plans
pub struct RecoveryPlanEngine {
    plans: RwLock<BTreeMap<String, RecoveryPlan>>,
    actions: Arc<dyn RecoveryActions>,
}

impl RecoveryPlanEngine {
    /// Create an engine holding the built-in plans
    pub fn new(actions: Arc<dyn RecoveryActions>) -> Self {
        let plans = builtin_plans()
            .into_iter()
            .map(|plan| (plan.id.clone(), plan))
            .collect();

        Self {
            plans: RwLock::new(plans),
            actions,
        }
    }

    pub async fn plans(&self) -> Vec<RecoveryPlan> {
        self.plans.read().await.values().cloned().collect()
    }

    pub async fn get_plan(&self, plan_id: &str) -> Option<RecoveryPlan> {
        self.plans.read().await.get(plan_id).cloned()
    }

    /// Add or replace a plan after validating it
    pub async fn register_plan(&self, plan: RecoveryPlan) -> BackupResult<()> {
        validate_plan(&plan)?;
        log::info!("Registered recovery plan '{}' ({} steps)", plan.id, plan.steps.len());
        self.plans.write().await.insert(plan.id.clone(), plan);
        Ok(())
    }

    /// Execute `plan` against `snapshot`
    pub async fn execute(
        &self,
        plan: &RecoveryPlan,
        snapshot: &SnapshotDocument,
        options: ExecutionOptions,
    ) -> BackupResult<RecoveryReport> {
        let waves = execution_order(plan)?;
        let started_at = Utc::now();
        let start = Instant::now();
        let mut steps = Vec::new();
        let mut warnings = Vec::new();

        log::info!(
            "Executing recovery plan '{}'{}",
            plan.id,
            if options.dry_run { " (dry run)" } else { "" }
        );

        for step_id in waves.iter().flatten() {
            let Some(step) = plan.step(step_id) else {
                continue;
            };

            let outcome = self.run_step(step, snapshot, options).await;

            if !outcome.success {
                let message = outcome
                    .error
                    .clone()
                    .unwrap_or_else(|| "unknown failure".to_string());

                if step.priority == StepPriority::Critical {
                    log::error!("Critical recovery step '{}' failed: {}", step.id, message);
                    return Err(BackupError::StepExecution {
                        step_id: step.id.clone(),
                        message,
                    });
                }

                log::warn!("Recovery step '{}' failed, continuing: {}", step.id, message);
                warnings.push(format!("{}: {}", step.id, message));
            }

            steps.push(outcome);
        }

        Ok(RecoveryReport {
            plan_id: plan.id.clone(),
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
            dry_run: options.dry_run,
            steps,
            warnings,
        })
    }

    async fn run_step(
        &self,
        step: &RecoveryStep,
        snapshot: &SnapshotDocument,
        options: ExecutionOptions,
    ) -> StepOutcome {
        let start = Instant::now();
        let timeout = StdDuration::from_secs(step.timeout_secs);
        let max_attempts = step.retry_count + 1;
        let mut last_error = None;
        let mut attempts = 0;

        while attempts < max_attempts {
            attempts += 1;
            log::debug!("Running step '{}' (attempt {}/{})", step.id, attempts, max_attempts);

            match tokio::time::timeout(timeout, self.dispatch(step, snapshot, options)).await {
                Ok(Ok(())) => {
                    last_error = None;
                    break;
                }
                Ok(Err(e)) => last_error = Some(format!("{:#}", e)),
                Err(_) => last_error = Some(format!("timed out after {}s", step.timeout_secs)),
            }
        }

        StepOutcome {
            step_id: step.id.clone(),
            success: last_error.is_none(),
            attempts,
            duration_ms: start.elapsed().as_millis() as u64,
            error: last_error,
        }
    }

    async fn dispatch(
        &self,
        step: &RecoveryStep,
        snapshot: &SnapshotDocument,
        options: ExecutionOptions,
    ) -> anyhow::Result<()> {
        if options.dry_run {
            if let StepAction::DataRestore { domains } = &step.action {
                for (domain, _) in restore_targets(domains, snapshot) {
                    log::debug!("Dry run: would restore {}", domain);
                }
            }
            return self.actions.rehearse(&step.action).await;
        }

        match &step.action {
            StepAction::DataRestore { domains } => {
                for (domain, payload) in restore_targets(domains, snapshot) {
                    self.actions.restore_domain(domain, payload).await?;
                }
                Ok(())
            }
            StepAction::CacheClear => self.actions.clear_caches().await,
            StepAction::ServiceRestart { service } => self.actions.restart_service(service).await,
            StepAction::UserNotification { message } => self.actions.notify_user(message).await,
            StepAction::MonitoringAlert { message } => {
                self.actions.send_monitoring_alert(message).await
            }
        }
    }

    /// Dry-run a registered plan against a stub snapshot and record the result
    pub async fn test_plan(&self, plan_id: &str) -> BackupResult<RecoveryTestResult> {
        let plan = self.get_plan(plan_id).await.ok_or_else(|| BackupError::NotFound {
            resource: format!("recovery plan {}", plan_id),
        })?;

        let start = Instant::now();
        let outcome = self
            .execute(&plan, &SnapshotDocument::stub(), ExecutionOptions { dry_run: true })
            .await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let (success, errors, warnings) = match outcome {
            Ok(report) => (true, Vec::new(), report.warnings),
            Err(e) => (false, vec![e.to_string()], Vec::new()),
        };

        let result = RecoveryTestResult {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            duration_ms,
            success,
            errors,
            warnings,
            metrics: test_metrics(success, duration_ms, plan.estimated_duration_secs),
        };

        if let Some(stored) = self.plans.write().await.get_mut(plan_id) {
            stored.record_test(result.clone());
        }

        log::info!(
            "Recovery plan '{}' test {} in {}ms",
            plan_id,
            if success { "passed" } else { "failed" },
            duration_ms
        );
        Ok(result)
    }
}

/// Domains a restore step writes back, with their snapshot payloads
///
/// An empty domain list means every domain. Domains that failed during
/// capture hold an empty placeholder and are never written back.
fn restore_targets<'a>(
    domains: &[DataDomain],
    snapshot: &'a SnapshotDocument,
) -> Vec<(DataDomain, &'a Value)> {
    let targets = if domains.is_empty() {
        DataDomain::ALL.to_vec()
    } else {
        domains.to_vec()
    };

    targets
        .into_iter()
        .filter_map(|domain| {
            if snapshot.failed_domains.iter().any(|name| name == domain.as_str()) {
                log::warn!("Skipping {}: it failed during capture", domain);
                return None;
            }
            match snapshot.payload(domain) {
                Some(payload) => Some((domain, payload)),
                None => {
                    log::debug!("Skipping {}: not in snapshot", domain);
                    None
                }
            }
        })
        .collect()
}

fn test_metrics(success: bool, duration_ms: u64, estimated_secs: u64) -> TestMetrics {
    let estimated_ms = estimated_secs.saturating_mul(1000);
    let performance = if estimated_ms == 0 {
        0.0
    } else {
        (100.0 - duration_ms as f64 / estimated_ms as f64 * 100.0).max(0.0)
    };

    TestMetrics {
        data_integrity: if success { 100.0 } else { 0.0 },
        performance,
        user_experience: if success { 100.0 } else { 50.0 },
    }
}

fn step(
    id: &str,
    name: &str,
    action: StepAction,
    priority: StepPriority,
    timeout_secs: u64,
    retry_count: u32,
    depends_on: &[&str],
) -> RecoveryStep {
    RecoveryStep {
        id: id.to_string(),
        name: name.to_string(),
        description: name.to_string(),
        action,
        priority,
        timeout_secs,
        retry_count,
        depends_on: depends_on.iter().map(|dep| dep.to_string()).collect(),
    }
}

fn notify(message: &str) -> StepAction {
    StepAction::UserNotification {
        message: message.to_string(),
    }
}

fn restore(domains: &[DataDomain]) -> StepAction {
    StepAction::DataRestore {
        domains: domains.to_vec(),
    }
}

/// Plans available without registration
pub fn builtin_plans() -> Vec<RecoveryPlan> {
    use StepPriority::*;

    let standard = RecoveryPlan {
        id: STANDARD_PLAN_ID.to_string(),
        name: "Standard restore".to_string(),
        description: "Restore all domains from a verified backup".to_string(),
        trigger_conditions: vec!["user_requested".to_string(), "device_migration".to_string()],
        steps: vec![
            step(
                "notify_start",
                "Notify user that restore is starting",
                notify("Restoring your data from backup"),
                Low,
                10,
                0,
                &[],
            ),
            step(
                "clear_cache",
                "Clear cached data",
                StepAction::CacheClear,
                Medium,
                30,
                1,
                &["notify_start"],
            ),
            step(
                "restore_user_data",
                "Restore user profile",
                restore(&[DataDomain::UserData]),
                Critical,
                120,
                2,
                &["clear_cache"],
            ),
            step(
                "restore_settings",
                "Restore settings",
                restore(&[DataDomain::SettingsData]),
                High,
                60,
                2,
                &["clear_cache"],
            ),
            step(
                "restore_communication",
                "Restore communication boards",
                restore(&[DataDomain::CommunicationData]),
                Critical,
                180,
                2,
                &["restore_user_data"],
            ),
            step(
                "restore_progress",
                "Restore progress data",
                restore(&[DataDomain::ProgressData]),
                High,
                120,
                2,
                &["restore_user_data"],
            ),
            step(
                "restart_sync",
                "Restart synchronization",
                StepAction::ServiceRestart { service: "sync".to_string() },
                Medium,
                60,
                1,
                &["restore_communication", "restore_progress", "restore_settings"],
            ),
            step(
                "notify_complete",
                "Notify user that restore finished",
                notify("Your data has been restored"),
                Low,
                10,
                0,
                &["restart_sync"],
            ),
        ],
        estimated_duration_secs: 600,
        last_tested: None,
        test_history: Vec::new(),
    };

    let data_corruption = RecoveryPlan {
        id: DATA_CORRUPTION_PLAN_ID.to_string(),
        name: "Data corruption recovery".to_string(),
        description: "Replace corrupted local data with the last good backup".to_string(),
        trigger_conditions: vec![
            "integrity_check_failed".to_string(),
            "database_corruption".to_string(),
        ],
        steps: vec![
            step(
                "alert_corruption",
                "Report corruption to monitoring",
                StepAction::MonitoringAlert {
                    message: "Data corruption detected, restoring from backup".to_string(),
                },
                High,
                10,
                1,
                &[],
            ),
            step(
                "clear_cache",
                "Drop cached copies of corrupted data",
                StepAction::CacheClear,
                Critical,
                30,
                1,
                &["alert_corruption"],
            ),
            step(
                "restore_all",
                "Restore every domain",
                restore(&[]),
                Critical,
                300,
                2,
                &["clear_cache"],
            ),
            step(
                "notify_user",
                "Tell the user data was repaired",
                notify("Some data was repaired from your latest backup"),
                Low,
                10,
                0,
                &["restore_all"],
            ),
        ],
        estimated_duration_secs: 360,
        last_tested: None,
        test_history: Vec::new(),
    };

    let service_outage = RecoveryPlan {
        id: SERVICE_OUTAGE_PLAN_ID.to_string(),
        name: "Service outage recovery".to_string(),
        description: "Bring storage and sync back after an outage".to_string(),
        trigger_conditions: vec!["service_unavailable".to_string(), "sync_failure".to_string()],
        steps: vec![
            step(
                "alert_outage",
                "Report outage to monitoring",
                StepAction::MonitoringAlert {
                    message: "Service outage, restarting services".to_string(),
                },
                High,
                10,
                1,
                &[],
            ),
            step(
                "restart_storage",
                "Restart local storage",
                StepAction::ServiceRestart { service: "storage".to_string() },
                Critical,
                60,
                2,
                &["alert_outage"],
            ),
            step(
                "restart_sync",
                "Restart synchronization",
                StepAction::ServiceRestart { service: "sync".to_string() },
                High,
                60,
                2,
                &["restart_storage"],
            ),
            step(
                "notify_user",
                "Tell the user service is back",
                notify("Service has been restored"),
                Low,
                10,
                0,
                &["restart_sync"],
            ),
        ],
        estimated_duration_secs: 150,
        last_tested: None,
        test_history: Vec::new(),
    };

    vec![standard, data_corruption, service_outage]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct NoopActions;

    #[async_trait]
    impl RecoveryActions for NoopActions {
        async fn restore_domain(&self, _domain: DataDomain, _payload: &Value) -> anyhow::Result<()> {
            Ok(())
        }
        async fn clear_caches(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn restart_service(&self, _service: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn notify_user(&self, _message: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn send_monitoring_alert(&self, _message: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn plan_with(steps: Vec<RecoveryStep>) -> RecoveryPlan {
        RecoveryPlan {
            id: "custom".to_string(),
            name: "Custom".to_string(),
            description: String::new(),
            trigger_conditions: vec![],
            steps,
            estimated_duration_secs: 60,
            last_tested: None,
            test_history: vec![],
        }
    }

    fn simple(id: &str, deps: &[&str]) -> RecoveryStep {
        step(id, id, StepAction::CacheClear, StepPriority::Medium, 5, 0, deps)
    }

    #[test]
    fn test_diamond_order_is_deterministic() {
        let plan = plan_with(vec![
            simple("D", &["B", "C"]),
            simple("C", &["A"]),
            simple("B", &["A"]),
            simple("A", &[]),
        ]);

        let waves = execution_order(&plan).unwrap();
        assert_eq!(
            waves,
            vec![
                vec!["A".to_string()],
                vec!["B".to_string(), "C".to_string()],
                vec!["D".to_string()],
            ]
        );
    }

    #[test]
    fn test_cycle_is_rejected() {
        let plan = plan_with(vec![simple("X", &["Y"]), simple("Y", &["X"])]);
        let err = execution_order(&plan).unwrap_err();
        assert!(matches!(err, BackupError::PlanConfiguration { .. }));
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_missing_and_duplicate_steps_rejected() {
        let missing = plan_with(vec![simple("A", &["ghost"])]);
        assert!(execution_order(&missing).unwrap_err().to_string().contains("ghost"));

        let duplicate = plan_with(vec![simple("A", &[]), simple("A", &[])]);
        assert!(execution_order(&duplicate).is_err());

        let zero_timeout = plan_with(vec![step(
            "A",
            "A",
            StepAction::CacheClear,
            StepPriority::Low,
            0,
            0,
            &[],
        )]);
        assert!(validate_plan(&zero_timeout).is_err());
    }

    #[test]
    fn test_builtin_plans_are_valid() {
        let plans = builtin_plans();
        assert_eq!(plans.len(), 3);
        for plan in &plans {
            validate_plan(plan).unwrap();
        }
    }

    #[tokio::test]
    async fn test_plan_records_history() {
        let engine = RecoveryPlanEngine::new(Arc::new(NoopActions));

        let result = engine.test_plan(STANDARD_PLAN_ID).await.unwrap();
        assert!(result.success);
        assert_eq!(result.metrics.data_integrity, 100.0);
        assert_eq!(result.metrics.user_experience, 100.0);
        assert!(result.metrics.performance > 0.0);

        let plan = engine.get_plan(STANDARD_PLAN_ID).await.unwrap();
        assert_eq!(plan.test_history.len(), 1);
        assert!(plan.last_tested.is_some());

        assert!(matches!(
            engine.test_plan("nope").await,
            Err(BackupError::NotFound { .. })
        ));
    }

    /// Storage restarts never finish, even when only rehearsed
    #[derive(Default)]
    struct StalledStorage {
        rehearsals: AtomicU32,
        restarts: AtomicU32,
    }

    #[async_trait]
    impl RecoveryActions for StalledStorage {
        async fn restore_domain(&self, _domain: DataDomain, _payload: &Value) -> anyhow::Result<()> {
            Ok(())
        }
        async fn clear_caches(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn restart_service(&self, _service: &str) -> anyhow::Result<()> {
            self.restarts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn notify_user(&self, _message: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn send_monitoring_alert(&self, _message: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn rehearse(&self, action: &StepAction) -> anyhow::Result<()> {
            if matches!(action, StepAction::ServiceRestart { service } if service == "storage") {
                self.rehearsals.fetch_add(1, Ordering::SeqCst);
                std::future::pending::<()>().await;
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dry_run_applies_step_timeouts() {
        let actions = Arc::new(StalledStorage::default());
        let engine = RecoveryPlanEngine::new(actions.clone());

        let result = engine.test_plan(SERVICE_OUTAGE_PLAN_ID).await.unwrap();

        assert!(!result.success);
        assert!(result.errors[0].contains("restart_storage"));
        assert_eq!(result.metrics.data_integrity, 0.0);
        assert_eq!(result.metrics.user_experience, 50.0);
        // Critical step with two retries, rehearsed but never performed
        assert_eq!(actions.rehearsals.load(Ordering::SeqCst), 3);
        assert_eq!(actions.restarts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_plan() {
        let engine = RecoveryPlanEngine::new(Arc::new(NoopActions));
        let cyclic = plan_with(vec![simple("X", &["Y"]), simple("Y", &["X"])]);
        assert!(engine.register_plan(cyclic).await.is_err());
        assert!(engine.get_plan("custom").await.is_none());

        engine
            .register_plan(plan_with(vec![simple("A", &[])]))
            .await
            .unwrap();
        assert_eq!(engine.plans().await.len(), 4);
    }

    #[test]
    fn test_metrics_formula() {
        let failed = test_metrics(false, 30_000, 60);
        assert_eq!(failed.data_integrity, 0.0);
        assert_eq!(failed.user_experience, 50.0);
        assert!((failed.performance - 50.0).abs() < f64::EPSILON);

        assert_eq!(test_metrics(true, 120_000, 60).performance, 0.0);
    }
}

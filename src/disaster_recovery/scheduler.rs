//! Backup scheduling and health monitoring
//!
//! The scheduler task sleeps until the next due backup and is woken early
//! when the configuration changes. The health task runs on a fixed interval.
//! Both stop through a shared shutdown channel and are aborted on `stop`.

use super::*;
use async_trait::async_trait;
use chrono::{Local, NaiveDate, TimeZone};
use std::time::Duration as StdDuration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

/// Minimum success rate over finished backups before an alert is raised
pub const MIN_SUCCESS_RATE: f64 = 0.9;

/// Upper bound on how far ahead the next run is searched for
const MAX_SCHEDULE_SEARCH_DAYS: u32 = 400;

/// Next time a backup is due, in the timezone of `now`
///
/// The candidate is today at the configured time, moved to the following
/// day when already past. Weekly and monthly schedules are additionally held
/// back until the calendar date one full period after the last successful
/// backup, so a backup finishing moments after its slot does not push the
/// next one out by a day. Returns `None` when automated backups are disabled.
pub fn next_scheduled_run<Tz: TimeZone>(
    config: &BackupConfiguration,
    now: &DateTime<Tz>,
    last_success: Option<DateTime<Utc>>,
) -> BackupResult<Option<DateTime<Tz>>> {
    if !config.enabled {
        return Ok(None);
    }

    let time = config.schedule_time()?;
    let timezone = now.timezone();
    let not_before = match config.frequency {
        BackupFrequency::Daily => None,
        frequency => last_success.map(|last| {
            (last + Duration::days(frequency.period_days()))
                .with_timezone(&timezone)
                .date_naive()
        }),
    };

    let mut date = now.date_naive();
    for _ in 0..MAX_SCHEDULE_SEARCH_DAYS {
        if let Some(candidate) = resolve_local(&timezone, date, time) {
            let after_now = candidate > *now;
            let period_elapsed = not_before.map_or(true, |min| candidate.date_naive() >= min);
            if after_now && period_elapsed {
                return Ok(Some(candidate));
            }
        }

        date = date.succ_opt().ok_or_else(|| BackupError::Configuration {
            message: "Schedule date out of range".to_string(),
        })?;
    }

    Err(BackupError::Configuration {
        message: format!(
            "No backup slot found within {} days",
            MAX_SCHEDULE_SEARCH_DAYS
        ),
    })
}

/// Local wall-clock time on `date`, shifted an hour forward inside a DST gap
fn resolve_local<Tz: TimeZone>(timezone: &Tz, date: NaiveDate, time: chrono::NaiveTime) -> Option<DateTime<Tz>> {
    let naive = date.and_time(time);
    timezone
        .from_local_datetime(&naive)
        .earliest()
        .or_else(|| timezone.from_local_datetime(&(naive + Duration::hours(1))).earliest())
}

/// Outcome of one health check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub checked_at: DateTime<Utc>,
    pub healthy: bool,
    pub alerts: Vec<HealthAlert>,
    /// Ids of interrupted backups that were marked failed
    pub stale_entries_failed: Vec<String>,
    pub success_rate: Option<f64>,
    pub last_successful_backup: Option<DateTime<Utc>>,
}

/// Success rate over finished (completed or failed) backups
pub fn success_rate(history: &[BackupMetadata]) -> Option<f64> {
    let finished: Vec<&BackupMetadata> = history
        .iter()
        .filter(|entry| matches!(entry.status, BackupStatus::Completed | BackupStatus::Failed))
        .collect();

    if finished.is_empty() {
        return None;
    }

    let successful = finished.iter().filter(|entry| entry.is_successful()).count();
    Some(successful as f64 / finished.len() as f64)
}

/// Alerts for a ledger snapshot at `now`
pub fn evaluate_health(
    history: &[BackupMetadata],
    config: &BackupConfiguration,
    now: DateTime<Utc>,
) -> Vec<HealthAlert> {
    let mut alerts = Vec::new();

    if config.enabled {
        let last_success = history
            .iter()
            .filter(|entry| entry.is_successful())
            .map(|entry| entry.timestamp)
            .max();

        match last_success {
            Some(last) if now - last > config.frequency.staleness_threshold() => {
                alerts.push(HealthAlert::new(
                    AlertSeverity::Critical,
                    format!(
                        "Last successful backup is {} hours old",
                        (now - last).num_hours()
                    ),
                ));
            }
            Some(_) => {}
            None => alerts.push(HealthAlert::new(
                AlertSeverity::Info,
                "No successful backup has been recorded yet",
            )),
        }
    }

    if let Some(rate) = success_rate(history) {
        if rate < MIN_SUCCESS_RATE {
            alerts.push(HealthAlert::new(
                AlertSeverity::Warning,
                format!("Backup success rate is {:.0}%", rate * 100.0),
            ));
        }
    }

    alerts
}

/// Work the background tasks call back into
#[async_trait]
pub trait ScheduledJobs: Send + Sync + 'static {
    /// Current configuration and the time of the last successful backup
    async fn schedule_inputs(&self) -> (BackupConfiguration, Option<DateTime<Utc>>);
    async fn run_scheduled_backup(&self);
    async fn run_periodic_health_check(&self);
}

/// Owner of the scheduler and health monitor tasks
pub struct BackupScheduler {
    shutdown_tx: watch::Sender<bool>,
    reschedule: Arc<Notify>,
    next_run: Arc<parking_lot::RwLock<Option<DateTime<Utc>>>>,
    scheduler_handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
    health_handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl BackupScheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            reschedule: Arc::new(Notify::new()),
            next_run: Arc::new(parking_lot::RwLock::new(None)),
            scheduler_handle: parking_lot::Mutex::new(None),
            health_handle: parking_lot::Mutex::new(None),
        }
    }

    /// Next automated backup as last computed by the scheduler task
    pub fn next_run(&self) -> Option<DateTime<Utc>> {
        *self.next_run.read()
    }

    pub fn is_running(&self) -> bool {
        self.scheduler_handle
            .lock()
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// Wake the scheduler so it recomputes the next run
    pub fn reschedule(&self) {
        self.reschedule.notify_one();
    }

    /// Spawn both background tasks; a no-op when already running
    pub fn start<J: ScheduledJobs>(&self, jobs: Arc<J>, health_interval: StdDuration) {
        if self.is_running() {
            return;
        }
        self.shutdown_tx.send_replace(false);

        let scheduler = tokio::spawn(scheduler_loop(
            jobs.clone(),
            self.shutdown_tx.subscribe(),
            self.reschedule.clone(),
            self.next_run.clone(),
        ));
        let health = tokio::spawn(health_loop(jobs, self.shutdown_tx.subscribe(), health_interval));

        *self.scheduler_handle.lock() = Some(scheduler);
        *self.health_handle.lock() = Some(health);
        log::info!("Backup scheduler started");
    }

    /// Signal shutdown and abort both tasks
    pub fn stop(&self) {
        self.shutdown_tx.send_replace(true);

        if let Some(handle) = self.scheduler_handle.lock().take() {
            handle.abort();
        }
        if let Some(handle) = self.health_handle.lock().take() {
            handle.abort();
        }

        *self.next_run.write() = None;
        log::info!("Backup scheduler stopped");
    }
}

impl Default for BackupScheduler {
    fn default() -> Self {
        Self::new()
    }
}

async fn scheduler_loop<J: ScheduledJobs>(
    jobs: Arc<J>,
    mut shutdown: watch::Receiver<bool>,
    reschedule: Arc<Notify>,
    next_run: Arc<parking_lot::RwLock<Option<DateTime<Utc>>>>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let (config, last_success) = jobs.schedule_inputs().await;
        let next = match next_scheduled_run(&config, &Local::now(), last_success) {
            Ok(next) => next.map(|at| at.with_timezone(&Utc)),
            Err(e) => {
                log::error!("Failed to compute next backup time: {}", e);
                None
            }
        };
        *next_run.write() = next;

        let wait = next.map(|at| (at - Utc::now()).to_std().unwrap_or(StdDuration::ZERO));
        match next {
            Some(at) => log::info!("Next automated backup at {}", at),
            None => log::info!("Automated backups disabled"),
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = reschedule.notified() => {
                log::debug!("Backup configuration changed, rescheduling");
            }
            _ = sleep_or_wait(wait) => {
                jobs.run_scheduled_backup().await;
            }
        }
    }

    log::debug!("Scheduler loop exited");
}

async fn sleep_or_wait(wait: Option<StdDuration>) {
    match wait {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending::<()>().await,
    }
}

async fn health_loop<J: ScheduledJobs>(
    jobs: Arc<J>,
    mut shutdown: watch::Receiver<bool>,
    interval: StdDuration,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => jobs.run_periodic_health_check().await,
        }
    }

    log::debug!("Health monitor loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn at(date: &str, time: &str) -> DateTime<Utc> {
        format!("{}T{}:00Z", date, time).parse().unwrap()
    }

    fn completed(timestamp: DateTime<Utc>, ok: bool) -> BackupMetadata {
        let mut entry =
            BackupMetadata::begin_full(&OrchestratorSettings::default(), BackupTrigger::Scheduled, None);
        entry.timestamp = timestamp;
        entry.status = if ok { BackupStatus::Completed } else { BackupStatus::Failed };
        entry
    }

    #[test]
    fn test_daily_past_time_rolls_to_tomorrow() {
        let config = BackupConfiguration::default();
        let now = at("2026-03-10", "03:00");

        let next = next_scheduled_run(&config, &now, None).unwrap().unwrap();
        assert_eq!(next, at("2026-03-11", "02:00"));

        let early = at("2026-03-10", "01:00");
        let next = next_scheduled_run(&config, &early, None).unwrap().unwrap();
        assert_eq!(next, at("2026-03-10", "02:00"));
    }

    #[test]
    fn test_weekly_waits_for_full_period() {
        let config = BackupConfiguration {
            frequency: BackupFrequency::Weekly,
            ..Default::default()
        };
        let now = at("2026-03-10", "03:00");
        let last = at("2026-03-08", "02:00");

        let next = next_scheduled_run(&config, &now, Some(last)).unwrap().unwrap();
        assert_eq!(next, at("2026-03-15", "02:00"));

        // Without history the next slot is used
        let next = next_scheduled_run(&config, &now, None).unwrap().unwrap();
        assert_eq!(next, at("2026-03-11", "02:00"));
    }

    #[test]
    fn test_period_counts_calendar_days_from_last_backup() {
        // The ledger timestamp lands just after the slot it ran in
        let last: DateTime<Utc> = "2026-03-10T02:00:00.250Z".parse().unwrap();
        let now: DateTime<Utc> = "2026-03-10T02:00:03Z".parse().unwrap();

        let weekly = BackupConfiguration {
            frequency: BackupFrequency::Weekly,
            ..Default::default()
        };
        let next = next_scheduled_run(&weekly, &now, Some(last)).unwrap().unwrap();
        assert_eq!(next, at("2026-03-17", "02:00"));
        assert!(next - last <= weekly.frequency.staleness_threshold());

        let monthly = BackupConfiguration {
            frequency: BackupFrequency::Monthly,
            ..Default::default()
        };
        let next = next_scheduled_run(&monthly, &now, Some(last)).unwrap().unwrap();
        assert_eq!(next, at("2026-04-09", "02:00"));
    }

    #[test]
    fn test_disabled_schedule() {
        let config = BackupConfiguration {
            enabled: false,
            ..Default::default()
        };
        assert!(next_scheduled_run(&config, &Utc::now(), None).unwrap().is_none());
    }

    #[test]
    fn test_stale_backup_alert() {
        let config = BackupConfiguration::default();
        let now = at("2026-03-10", "12:00");

        let fresh = vec![completed(now - Duration::hours(24), true)];
        assert!(evaluate_health(&fresh, &config, now).is_empty());

        let stale = vec![completed(now - Duration::hours(26), true)];
        let alerts = evaluate_health(&stale, &config, now);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
    }

    #[test]
    fn test_low_success_rate_alert() {
        let config = BackupConfiguration::default();
        let now = Utc::now();
        let mut history: Vec<BackupMetadata> =
            (0..8).map(|i| completed(now - Duration::hours(i), true)).collect();
        history.push(completed(now, false));
        history.push(completed(now, false));

        assert_eq!(success_rate(&history), Some(0.8));
        let alerts = evaluate_health(&history, &config, now);
        assert!(alerts
            .iter()
            .any(|alert| alert.severity == AlertSeverity::Warning));
    }

    struct CountingJobs {
        backups: AtomicUsize,
        health_checks: AtomicUsize,
    }

    #[async_trait]
    impl ScheduledJobs for CountingJobs {
        async fn schedule_inputs(&self) -> (BackupConfiguration, Option<DateTime<Utc>>) {
            let config = BackupConfiguration {
                enabled: false,
                ..Default::default()
            };
            (config, None)
        }

        async fn run_scheduled_backup(&self) {
            self.backups.fetch_add(1, Ordering::SeqCst);
        }

        async fn run_periodic_health_check(&self) {
            self.health_checks.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_loop_ticks_until_stopped() {
        let jobs = Arc::new(CountingJobs {
            backups: AtomicUsize::new(0),
            health_checks: AtomicUsize::new(0),
        });
        let scheduler = BackupScheduler::new();
        scheduler.start(jobs.clone(), StdDuration::from_secs(60));
        assert!(scheduler.is_running());

        tokio::time::sleep(StdDuration::from_secs(185)).await;
        assert_eq!(jobs.health_checks.load(Ordering::SeqCst), 3);
        assert_eq!(jobs.backups.load(Ordering::SeqCst), 0);
        assert!(scheduler.next_run().is_none());

        scheduler.stop();
        tokio::time::sleep(StdDuration::from_secs(600)).await;
        assert_eq!(jobs.health_checks.load(Ordering::SeqCst), 3);
        assert!(!scheduler.is_running());
    }
}

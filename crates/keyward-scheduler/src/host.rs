use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;
use keyward_core::clock::{Clock, CIVIL_ZONE};
use keyward_core::constants::{
    DISPATCHER_INTERVAL_SECS, GLOBAL_RULE_JOB_PREFIX, PAYMENTS_PENDING_INTERVAL_SECS,
    PAYMENTS_RECOVER_INTERVAL_SECS, SWEEPER_INTERVAL_SECS,
};
use keyward_core::error::CoreError;
use keyward_core::model::{NotificationRule, RuleId};
use keyward_keys::KeyService;
use keyward_notify::NotificationEngine;
use keyward_payments::PaymentService;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Job-table key for a per-rule calendar trigger, e.g.
/// `notification_global_42`.
fn global_rule_job_key(rule_id: RuleId) -> String {
    format!("{GLOBAL_RULE_JOB_PREFIX}{rule_id}")
}

/// Turns the rule's `weekday`/`time_of_day` into a standard 7-field cron
/// expression (seconds field fixed at 0). `time_of_day` is seconds since
/// local midnight in the civil zone.
fn weekly_cron_expr(weekday: u8, time_of_day: u32) -> String {
    let hour = time_of_day / 3600;
    let minute = (time_of_day % 3600) / 60;
    // tokio-cron-scheduler's cron day-of-week is 0 = Sunday, matching the
    // rule's own `weekday` convention.
    format!("0 {minute} {hour} * * {weekday}")
}

/// The rule's own `timezone`, falling back to the civil zone when unset or
/// unparseable — `time_of_day`/`weekday` are always civil-zone wall-clock
/// values, so the trigger must evaluate in that zone, not UTC.
fn rule_timezone(rule: &NotificationRule) -> Tz {
    rule.timezone
        .as_deref()
        .and_then(|tz| tz.parse::<Tz>().ok())
        .unwrap_or(CIVIL_ZONE)
}

/// Runs the fixed job table plus one dynamically-installed cron trigger per
/// active `global_weekly` notification rule.
///
/// Grounded on the `JobScheduler`/`Job::new_repeated_async` pattern used for
/// periodic worker jobs elsewhere in the pack; the per-rule calendar jobs
/// are tracked in `calendar_jobs` under their `GLOBAL_RULE_JOB_PREFIX` key so
/// a resync can find and remove stale triggers by that prefix.
pub struct SchedulerHost {
    scheduler: JobScheduler,
    keys: Arc<KeyService>,
    payments: Arc<PaymentService>,
    notify: Arc<NotificationEngine>,
    calendar_jobs: Mutex<HashMap<String, Uuid>>,
}

impl SchedulerHost {
    pub async fn new(
        keys: Arc<KeyService>,
        payments: Arc<PaymentService>,
        notify: Arc<NotificationEngine>,
    ) -> Result<Self, CoreError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| CoreError::Permanent(format!("scheduler init: {e}")))?;
        Ok(Self {
            scheduler,
            keys,
            payments,
            notify,
            calendar_jobs: Mutex::new(HashMap::new()),
        })
    }

    /// Installs the fixed job table, runs one immediate pass of every tick
    /// so a restart does not wait out a full interval before recovering,
    /// then syncs the calendar jobs and starts the scheduler.
    pub async fn start(&self) -> Result<(), CoreError> {
        self.run_payments_pending_once().await;
        self.run_payments_recover_once().await;
        self.run_keys_sweeper_once().await;
        self.run_notifications_dispatcher_once().await;

        self.install_payments_pending_job().await?;
        self.install_payments_recover_job().await?;
        self.install_keys_sweeper_job().await?;
        self.install_notifications_dispatcher_job().await?;
        self.sync_calendar_jobs().await?;

        self.scheduler
            .start()
            .await
            .map_err(|e| CoreError::Permanent(format!("scheduler start: {e}")))?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), CoreError> {
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| CoreError::Permanent(format!("scheduler shutdown: {e}")))
    }

    async fn run_payments_pending_once(&self) {
        if let Err(e) = self.payments.poll_pending(Clock::now_utc()).await {
            warn!(error = %e, "payments_pending: immediate pass failed");
        }
    }

    async fn run_payments_recover_once(&self) {
        if let Err(e) = self.payments.recover().await {
            warn!(error = %e, "payments_recover: immediate pass failed");
        }
    }

    async fn run_keys_sweeper_once(&self) {
        if let Err(e) = self.keys.sweep(Clock::now_utc()).await {
            warn!(error = %e, "keys_sweeper: immediate pass failed");
        }
    }

    async fn run_notifications_dispatcher_once(&self) {
        match self.notify.dispatch_tick(Clock::now_utc()).await {
            Ok(n) if n > 0 => info!(count = n, "notifications_dispatcher: immediate pass"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "notifications_dispatcher: immediate pass failed"),
        }
    }

    async fn install_payments_pending_job(&self) -> Result<(), CoreError> {
        let payments = self.payments.clone();
        let job = Job::new_repeated_async(
            Duration::from_secs(PAYMENTS_PENDING_INTERVAL_SECS),
            move |_uuid, _l| {
                let payments = payments.clone();
                Box::pin(async move {
                    if let Err(e) = payments.poll_pending(Clock::now_utc()).await {
                        error!(error = %e, "payments_pending job failed");
                    }
                })
            },
        )
        .map_err(|e| CoreError::Permanent(format!("payments_pending job: {e}")))?;
        self.scheduler
            .add(job)
            .await
            .map_err(|e| CoreError::Permanent(format!("payments_pending job: {e}")))?;
        Ok(())
    }

    async fn install_payments_recover_job(&self) -> Result<(), CoreError> {
        let payments = self.payments.clone();
        let job = Job::new_repeated_async(
            Duration::from_secs(PAYMENTS_RECOVER_INTERVAL_SECS),
            move |_uuid, _l| {
                let payments = payments.clone();
                Box::pin(async move {
                    if let Err(e) = payments.recover().await {
                        error!(error = %e, "payments_recover job failed");
                    }
                })
            },
        )
        .map_err(|e| CoreError::Permanent(format!("payments_recover job: {e}")))?;
        self.scheduler
            .add(job)
            .await
            .map_err(|e| CoreError::Permanent(format!("payments_recover job: {e}")))?;
        Ok(())
    }

    async fn install_keys_sweeper_job(&self) -> Result<(), CoreError> {
        let keys = self.keys.clone();
        let job = Job::new_repeated_async(
            Duration::from_secs(SWEEPER_INTERVAL_SECS),
            move |_uuid, _l| {
                let keys = keys.clone();
                Box::pin(async move {
                    if let Err(e) = keys.sweep(Clock::now_utc()).await {
                        error!(error = %e, "keys_sweeper job failed");
                    }
                })
            },
        )
        .map_err(|e| CoreError::Permanent(format!("keys_sweeper job: {e}")))?;
        self.scheduler
            .add(job)
            .await
            .map_err(|e| CoreError::Permanent(format!("keys_sweeper job: {e}")))?;
        Ok(())
    }

    async fn install_notifications_dispatcher_job(&self) -> Result<(), CoreError> {
        let notify = self.notify.clone();
        let job = Job::new_repeated_async(
            Duration::from_secs(DISPATCHER_INTERVAL_SECS),
            move |_uuid, _l| {
                let notify = notify.clone();
                Box::pin(async move {
                    if let Err(e) = notify.dispatch_tick(Clock::now_utc()).await {
                        error!(error = %e, "notifications_dispatcher job failed");
                    }
                })
            },
        )
        .map_err(|e| CoreError::Permanent(format!("notifications_dispatcher job: {e}")))?;
        self.scheduler
            .add(job)
            .await
            .map_err(|e| CoreError::Permanent(format!("notifications_dispatcher job: {e}")))?;
        Ok(())
    }

    /// Reconciles the installed `notification_global_<rule_id>` triggers
    /// against the currently active `global_weekly` rules: removes jobs for
    /// rules that are gone or deactivated, installs jobs for new ones. Call
    /// again after any rule create/update/delete that touches a
    /// `global_weekly` rule.
    pub async fn sync_calendar_jobs(&self) -> Result<(), CoreError> {
        let active = self.notify.active_global_weekly_rules()?;
        let wanted: HashMap<String, RuleId> = active
            .iter()
            .map(|r| (global_rule_job_key(r.id), r.id))
            .collect();

        let mut installed = self.calendar_jobs.lock().await;

        let stale: Vec<String> = installed
            .keys()
            .filter(|k| !wanted.contains_key(*k))
            .cloned()
            .collect();
        for key in stale {
            if let Some(uuid) = installed.remove(&key) {
                if let Err(e) = self.scheduler.remove(&uuid).await {
                    warn!(error = %e, job = %key, "failed to remove stale calendar job");
                }
            }
        }

        for rule in active {
            let key = global_rule_job_key(rule.id);
            if installed.contains_key(&key) {
                continue;
            }
            let (Some(weekday), Some(time_of_day)) = (rule.weekday, rule.time_of_day) else {
                warn!(rule_id = rule.id, "global_weekly rule missing weekday/time_of_day, skipping");
                continue;
            };
            let expr = weekly_cron_expr(weekday, time_of_day);
            let tz = rule_timezone(&rule);
            let notify = self.notify.clone();
            let rule_id = rule.id;
            let job = Job::new_async_tz(expr.as_str(), tz, move |_uuid, _l| {
                let notify = notify.clone();
                Box::pin(async move {
                    match notify.fire_global_weekly_rule(rule_id) {
                        Ok(n) => info!(rule_id, planted = n, "global_weekly rule fired"),
                        Err(e) => error!(error = %e, rule_id, "global_weekly rule fire failed"),
                    }
                })
            })
            .map_err(|e| CoreError::Permanent(format!("calendar job {key}: {e}")))?;
            let uuid = self
                .scheduler
                .add(job)
                .await
                .map_err(|e| CoreError::Permanent(format!("calendar job {key}: {e}")))?;
            installed.insert(key, uuid);
        }

        Ok(())
    }
}

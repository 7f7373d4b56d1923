use chrono::{DateTime, Utc};
use keyward_core::clock::Clock;
use keyward_core::constants::{DISPATCH_BATCH_SIZE, DISPATCH_MAX_BATCHES};
use keyward_core::error::CoreError;
use keyward_core::model::{LogStatus, NotificationLog, NotificationRule, NotificationSchedule, NotificationType, ScheduleStatus, UserId};
use keyward_messaging::render;
use tracing::{error, warn};

use crate::engine::NotificationEngine;
use crate::planning::dedup_key_for_key_rule;

impl NotificationEngine {
    /// Drains due schedules in batches of `DISPATCH_BATCH_SIZE`, stopping at
    /// an empty fetch or `DISPATCH_MAX_BATCHES`. Returns the number of
    /// schedules processed.
    pub async fn dispatch_tick(&self, now: DateTime<Utc>) -> Result<usize, CoreError> {
        let mut processed = 0usize;
        for _ in 0..DISPATCH_MAX_BATCHES {
            let batch = self.store.fetch_due_schedules(now, DISPATCH_BATCH_SIZE)?;
            if batch.is_empty() {
                break;
            }
            for schedule in batch {
                self.process_schedule(schedule, now).await;
                processed += 1;
            }
        }
        Ok(processed)
    }

    async fn process_schedule(&self, mut schedule: NotificationSchedule, now: DateTime<Utc>) {
        let rule = match self.store.get_rule(schedule.rule_id) {
            Ok(Some(rule)) if rule.is_active => rule,
            Ok(_) => {
                if let Err(e) = self.mark_error(&mut schedule, "Rule inactive") {
                    error!(error = %e, schedule_id = schedule.id, "failed to mark schedule errored");
                }
                return;
            }
            Err(e) => {
                error!(error = %e, schedule_id = schedule.id, "failed to load rule for schedule");
                return;
            }
        };

        let text = rule.message_template.text.clone();
        let message = render(&rule.message_template, text);

        match self.sink().send(schedule.user_id, message).await {
            Ok(message_id) => {
                schedule.status = ScheduleStatus::Sent;
                schedule.sent_at = Some(now);
                if let Err(e) = self.store.update_schedule_status(&schedule) {
                    error!(error = %e, schedule_id = schedule.id, "failed to mark schedule sent");
                }
                self.append_log(Some(schedule.user_id), Some(rule.id), Some(schedule.id), LogStatus::Ok, Some(message_id), None);

                if let Some(repeat_every) = rule.repeat_every() {
                    if self.should_repeat(&rule, schedule.user_id) {
                        let next_planned = schedule.planned_at + repeat_every;
                        let dedup_key = if rule.rule_type.is_key_based() {
                            dedup_key_for_key_rule(rule.id, schedule.user_id, rule.rule_type.as_str(), next_planned)
                        } else {
                            crate::planning::dedup_key_for_lifecycle_rule(schedule.user_id, rule.id, next_planned)
                        };
                        if let Err(e) = self.upsert_repeat_schedule(schedule.user_id, rule.id, next_planned, dedup_key) {
                            warn!(error = %e, rule_id = rule.id, "failed to plant repeat schedule");
                        }
                    }
                }
            }
            Err(e) => {
                if let Err(store_err) = self.mark_error(&mut schedule, &e.to_string()) {
                    error!(error = %store_err, schedule_id = schedule.id, "failed to mark schedule errored");
                }
                self.append_log(Some(schedule.user_id), Some(rule.id), Some(schedule.id), LogStatus::Failed, None, Some(e.to_string()));
            }
        }
    }

    fn mark_error(&self, schedule: &mut NotificationSchedule, reason: &str) -> Result<(), CoreError> {
        schedule.status = ScheduleStatus::Error;
        schedule.last_error = Some(reason.to_string());
        self.store.update_schedule_status(schedule)
    }

    fn append_log(
        &self,
        user_id: Option<UserId>,
        rule_id: Option<i64>,
        schedule_id: Option<i64>,
        status: LogStatus,
        message_id: Option<String>,
        error: Option<String>,
    ) {
        let id = match self.store.next_log_id() {
            Ok(id) => id,
            Err(e) => {
                error!(error = %e, "failed to allocate notification log id");
                return;
            }
        };
        let log = NotificationLog {
            id,
            user_id,
            rule_id,
            schedule_id,
            status,
            message_id,
            error,
            sent_at: Clock::now_utc(),
        };
        if let Err(e) = self.store.insert_log(&log) {
            error!(error = %e, "failed to append notification log");
        }
    }

    fn upsert_repeat_schedule(
        &self,
        user_id: UserId,
        rule_id: i64,
        planned_at: DateTime<Utc>,
        dedup_key: String,
    ) -> Result<(), CoreError> {
        let id = self.store.next_schedule_id()?;
        let schedule = NotificationSchedule {
            id,
            user_id,
            rule_id,
            planned_at,
            status: ScheduleStatus::Planned,
            dedup_key,
            sent_at: None,
            last_error: None,
        };
        self.store.insert_schedule_if_absent(&schedule)?;
        Ok(())
    }

    /// Still relevant if the user has no live key matching the rule's kind
    /// — a paid-expiry reminder repeats until a paid key actually exists.
    fn should_repeat(&self, rule: &NotificationRule, user_id: UserId) -> bool {
        let now = Clock::now_utc();
        let keys = match self.store.list_keys_by_user(user_id) {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, user_id, "failed to load keys for should_repeat check");
                return false;
            }
        };
        match rule.rule_type {
            NotificationType::TrialExpiringSoon | NotificationType::TrialExpired | NotificationType::PaidExpiringSoon | NotificationType::PaidExpired => {
                !keys.iter().any(|k| !k.is_test && k.finish >= now)
            }
            NotificationType::NewUserNoKeys => !keys.iter().any(|k| k.finish >= now),
            NotificationType::GlobalWeekly => false,
        }
    }
}

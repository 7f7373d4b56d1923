use keyward_core::clock::Clock;
use keyward_core::error::CoreError;
use keyward_core::model::{NotificationRule, NotificationType, RuleId};

use crate::engine::NotificationEngine;
use crate::planning::dedup_key_for_lifecycle_rule;

impl NotificationEngine {
    /// Every currently active `global_weekly` rule — the set the scheduler
    /// host installs one cron trigger per.
    pub fn active_global_weekly_rules(&self) -> Result<Vec<NotificationRule>, CoreError> {
        Ok(self
            .store
            .list_active_rules()?
            .into_iter()
            .filter(|r| r.rule_type == NotificationType::GlobalWeekly)
            .collect())
    }

    /// Fan out a single-shot schedule for every user when a `global_weekly`
    /// rule's cron trigger fires.
    pub fn fire_global_weekly_rule(&self, rule_id: RuleId) -> Result<usize, CoreError> {
        let now = Clock::now_utc();
        let mut planted = 0;
        for user in self.store.list_users()? {
            let dedup_key = dedup_key_for_lifecycle_rule(user.id, rule_id, now);
            let id = self.store.next_schedule_id()?;
            let schedule = keyward_core::model::NotificationSchedule {
                id,
                user_id: user.id,
                rule_id,
                planned_at: now,
                status: keyward_core::model::ScheduleStatus::Planned,
                dedup_key,
                sent_at: None,
                last_error: None,
            };
            if self.store.insert_schedule_if_absent(&schedule)?.is_some() {
                planted += 1;
            }
        }
        Ok(planted)
    }
}

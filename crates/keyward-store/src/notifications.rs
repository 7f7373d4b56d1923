use chrono::{DateTime, Utc};
use keyward_core::error::CoreError;
use keyward_core::model::{
    LogId, NotificationLog, NotificationRule, NotificationSchedule, RuleId, ScheduleId,
    ScheduleStatus, UserId,
};

use crate::db::KeywardStore;

fn due_key(planned_at: DateTime<Utc>, schedule_id: ScheduleId) -> Vec<u8> {
    let mut out = Vec::with_capacity(16);
    out.extend_from_slice(&planned_at.timestamp_millis().to_be_bytes());
    out.extend_from_slice(&schedule_id.to_be_bytes());
    out
}

fn composite(prefix: i64, suffix: i64) -> Vec<u8> {
    let mut out = Vec::with_capacity(16);
    out.extend_from_slice(&prefix.to_be_bytes());
    out.extend_from_slice(&suffix.to_be_bytes());
    out
}

impl KeywardStore {
    // ── Rules ─────────────────────────────────────────────────────────────

    pub fn next_rule_id(&self) -> Result<RuleId, CoreError> {
        self.next_id("next_rule_id")
    }

    pub fn insert_rule(&self, rule: &NotificationRule) -> Result<(), CoreError> {
        Self::put_bincode(&self.notification_rules, &rule.id.to_be_bytes(), rule)
    }

    pub fn get_rule(&self, id: RuleId) -> Result<Option<NotificationRule>, CoreError> {
        Self::get_bincode(&self.notification_rules, &id.to_be_bytes())
    }

    pub fn update_rule(&self, rule: &NotificationRule) -> Result<(), CoreError> {
        self.insert_rule(rule)
    }

    pub fn list_rules(&self) -> Result<Vec<NotificationRule>, CoreError> {
        Self::iter_bincode(&self.notification_rules)
    }

    pub fn list_active_rules(&self) -> Result<Vec<NotificationRule>, CoreError> {
        Ok(self
            .list_rules()?
            .into_iter()
            .filter(|r| r.is_active)
            .collect())
    }

    /// Remove a rule and every schedule/log row that references it.
    pub fn delete_rule_cascade(&self, rule_id: RuleId) -> Result<(), CoreError> {
        for schedule in self.list_schedules_by_rule(rule_id)? {
            self.delete_schedule(&schedule)?;
        }
        self.notification_rules
            .remove(rule_id.to_be_bytes())
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Hard-delete a schedule row and every secondary-index entry that
    /// points at it, including `schedules_by_dedup` — unlike
    /// `update_schedule_status`'s soft-cancel, this frees the `dedup_key`
    /// for reuse by a freshly-planted row with the same identity.
    pub fn delete_schedule(&self, schedule: &NotificationSchedule) -> Result<(), CoreError> {
        self.notification_schedules
            .remove(schedule.id.to_be_bytes())
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        self.schedules_by_dedup
            .remove(schedule.dedup_key.as_bytes())
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        self.schedules_by_rule
            .remove(composite(schedule.rule_id, schedule.id))
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        self.schedules_by_user
            .remove(composite(schedule.user_id, schedule.id))
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        self.schedules_due
            .remove(due_key(schedule.planned_at, schedule.id))
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        Ok(())
    }

    // ── Schedules ─────────────────────────────────────────────────────────

    pub fn next_schedule_id(&self) -> Result<ScheduleId, CoreError> {
        self.next_id("next_schedule_id")
    }

    /// Enforces the `dedup_key` uniqueness invariant: returns `Ok(None)`
    /// without writing anything if a schedule with this `dedup_key`
    /// already exists.
    pub fn insert_schedule_if_absent(
        &self,
        schedule: &NotificationSchedule,
    ) -> Result<Option<ScheduleId>, CoreError> {
        let dedup_bytes = schedule.dedup_key.as_bytes();
        if self
            .schedules_by_dedup
            .contains_key(dedup_bytes)
            .map_err(|e| CoreError::Storage(e.to_string()))?
        {
            return Ok(None);
        }
        let id_bytes = schedule.id.to_be_bytes();
        Self::put_bincode(&self.notification_schedules, &id_bytes, schedule)?;
        self.schedules_by_dedup
            .insert(dedup_bytes, &id_bytes)
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        self.schedules_by_rule
            .insert(composite(schedule.rule_id, schedule.id), &[])
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        self.schedules_by_user
            .insert(composite(schedule.user_id, schedule.id), &[])
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        if schedule.status == ScheduleStatus::Planned {
            self.schedules_due
                .insert(due_key(schedule.planned_at, schedule.id), &[])
                .map_err(|e| CoreError::Storage(e.to_string()))?;
        }
        Ok(Some(schedule.id))
    }

    pub fn get_schedule(&self, id: ScheduleId) -> Result<Option<NotificationSchedule>, CoreError> {
        Self::get_bincode(&self.notification_schedules, &id.to_be_bytes())
    }

    pub fn get_schedule_by_dedup_key(
        &self,
        dedup_key: &str,
    ) -> Result<Option<NotificationSchedule>, CoreError> {
        let id_bytes = self
            .schedules_by_dedup
            .get(dedup_key.as_bytes())
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        match id_bytes {
            Some(bytes) => Self::get_bincode(&self.notification_schedules, &bytes),
            None => Ok(None),
        }
    }

    /// Transition a schedule's status. Removes it from the due index once it
    /// leaves `Planned` (sent/skipped/cancelled/error schedules are never
    /// re-dispatched), and frees its `dedup_key` so a later replan — a rule
    /// reactivation, a key update — can plant a fresh `Planned` row with the
    /// same identity instead of finding it already taken.
    pub fn update_schedule_status(
        &self,
        schedule: &NotificationSchedule,
    ) -> Result<(), CoreError> {
        Self::put_bincode(
            &self.notification_schedules,
            &schedule.id.to_be_bytes(),
            schedule,
        )?;
        if schedule.status != ScheduleStatus::Planned {
            self.schedules_due
                .remove(due_key(schedule.planned_at, schedule.id))
                .map_err(|e| CoreError::Storage(e.to_string()))?;
            self.schedules_by_dedup
                .remove(schedule.dedup_key.as_bytes())
                .map_err(|e| CoreError::Storage(e.to_string()))?;
        }
        Ok(())
    }

    pub fn list_schedules_by_rule(&self, rule_id: RuleId) -> Result<Vec<NotificationSchedule>, CoreError> {
        let mut out = Vec::new();
        for item in self.schedules_by_rule.scan_prefix(rule_id.to_be_bytes()) {
            let (key, _) = item.map_err(|e| CoreError::Storage(e.to_string()))?;
            let schedule_id = i64::from_be_bytes(key[8..16].try_into().unwrap());
            if let Some(s) = self.get_schedule(schedule_id)? {
                out.push(s);
            }
        }
        Ok(out)
    }

    pub fn list_schedules_by_user(&self, user_id: UserId) -> Result<Vec<NotificationSchedule>, CoreError> {
        let mut out = Vec::new();
        for item in self.schedules_by_user.scan_prefix(user_id.to_be_bytes()) {
            let (key, _) = item.map_err(|e| CoreError::Storage(e.to_string()))?;
            let schedule_id = i64::from_be_bytes(key[8..16].try_into().unwrap());
            if let Some(s) = self.get_schedule(schedule_id)? {
                out.push(s);
            }
        }
        Ok(out)
    }

    /// Schedules `Planned` at or before `now`, oldest first, capped at
    /// `limit`.
    pub fn fetch_due_schedules(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<NotificationSchedule>, CoreError> {
        let upper = due_key(now, i64::MAX);
        let mut out = Vec::new();
        for item in self.schedules_due.range(..=upper) {
            if out.len() >= limit {
                break;
            }
            let (key, _) = item.map_err(|e| CoreError::Storage(e.to_string()))?;
            let schedule_id = i64::from_be_bytes(key[8..16].try_into().unwrap());
            if let Some(s) = self.get_schedule(schedule_id)? {
                if s.status == ScheduleStatus::Planned {
                    out.push(s);
                }
            }
        }
        Ok(out)
    }

    // ── Log ───────────────────────────────────────────────────────────────

    pub fn next_log_id(&self) -> Result<LogId, CoreError> {
        self.next_id("next_log_id")
    }

    pub fn insert_log(&self, log: &NotificationLog) -> Result<(), CoreError> {
        Self::put_bincode(&self.notification_log, &log.id.to_be_bytes(), log)
    }

    pub fn list_logs(&self) -> Result<Vec<NotificationLog>, CoreError> {
        Self::iter_bincode(&self.notification_log)
    }
}

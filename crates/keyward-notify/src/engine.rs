use std::sync::Arc;

use chrono::{DateTime, Utc};
use keyward_core::clock::Clock;
use keyward_core::error::CoreError;
use keyward_core::model::{
    Key, NotificationRule, NotificationSchedule, NotificationType, RuleId, ScheduleStatus, UserId,
};
use keyward_messaging::MessagingSink;
use keyward_store::KeywardStore;
use tracing::warn;

use crate::planning::{
    dedup_key_for_key_rule, dedup_key_for_lifecycle_rule, derive_planned_at_for_key, validate_rule,
};

/// Owns rule/schedule planning, cancellation, and the dispatcher. One
/// instance per process, composed at startup and handed by `Arc` to every
/// crate that needs to plant or cancel notifications.
pub struct NotificationEngine {
    pub(crate) store: Arc<KeywardStore>,
    pub(crate) sink: Arc<dyn MessagingSink>,
}

impl NotificationEngine {
    pub fn new(store: Arc<KeywardStore>, sink: Arc<dyn MessagingSink>) -> Self {
        Self { store, sink }
    }

    // ── Rule CRUD ─────────────────────────────────────────────────────────

    pub fn create_rule(&self, mut rule: NotificationRule) -> Result<NotificationRule, CoreError> {
        validate_rule(&rule)?;
        rule.id = self.store.next_rule_id()?;
        self.store.insert_rule(&rule)?;
        if rule.is_active {
            self.auto_create_schedules_for_all_users(rule.id)?;
        }
        Ok(rule)
    }

    /// Applies the write set, then runs the side effects an active rule
    /// change implies — regenerating or canceling planted schedules.
    pub fn update_rule(&self, updated: NotificationRule) -> Result<NotificationRule, CoreError> {
        validate_rule(&updated)?;
        let previous = self
            .store
            .get_rule(updated.id)?
            .ok_or_else(|| CoreError::not_found(format!("rule {} not found", updated.id)))?;

        let was_active = previous.is_active;
        let now_active = updated.is_active;
        let planning_fields_changed = previous.offset_days != updated.offset_days
            || previous.offset_hours != updated.offset_hours
            || previous.rule_type != updated.rule_type;

        self.store.update_rule(&updated)?;

        if was_active && !now_active {
            self.cancel_by_rule(updated.id, None)?;
        } else if !was_active && now_active {
            self.auto_create_schedules_for_all_users(updated.id)?;
        } else if now_active && planning_fields_changed && updated.rule_type != NotificationType::GlobalWeekly {
            self.regenerate_rule_schedules(&updated, None, None)?;
        }

        Ok(updated)
    }

    /// Cascades: every schedule and log row referencing the rule is
    /// orphaned once the rule disappears, so cancel first.
    pub fn delete_rule(&self, rule_id: RuleId) -> Result<(), CoreError> {
        self.cancel_by_rule(rule_id, None)?;
        self.store.delete_rule_cascade(rule_id)
    }

    // ── Planning entry points ────────────────────────────────────────────

    /// Only valid for key-based rules. Loads matching keys (optionally
    /// filtered by user/key id), computes `planned_at`, clears existing
    /// planned rows scoped the same way, and bulk-upserts fresh ones.
    pub fn regenerate_rule_schedules(
        &self,
        rule: &NotificationRule,
        user_ids: Option<&[UserId]>,
        key_ids: Option<&[i64]>,
    ) -> Result<(), CoreError> {
        if !rule.rule_type.is_key_based() {
            return Ok(());
        }

        let is_test_rule = rule.rule_type.is_test_variant();
        let keys: Vec<Key> = self
            .store
            .list_keys()?
            .into_iter()
            .filter(|k| k.is_test == is_test_rule)
            .filter(|k| user_ids.map(|ids| ids.contains(&k.user_id)).unwrap_or(true))
            .filter(|k| key_ids.map(|ids| ids.contains(&k.id)).unwrap_or(true))
            .collect();

        // Clear existing planned rows for this rule, scoped to the same users.
        for schedule in self.store.list_schedules_by_rule(rule.id)? {
            if schedule.status != ScheduleStatus::Planned {
                continue;
            }
            if user_ids.map(|ids| ids.contains(&schedule.user_id)).unwrap_or(true) {
                self.cancel_schedule(schedule)?;
            }
        }

        for key in keys {
            let Some(planned_at) = derive_planned_at_for_key(rule, key.finish) else {
                continue;
            };
            let dedup_key = dedup_key_for_key_rule(rule.id, key.user_id, rule.rule_type.as_str(), planned_at);
            self.upsert_schedule(key.user_id, rule.id, planned_at, dedup_key)?;
        }
        Ok(())
    }

    /// For every active key-based rule, replant schedules for this user
    /// (optionally scoped to specific keys). Invoked whenever a key is
    /// created or updated.
    pub fn sync_user_key_rules(&self, user_id: UserId, key_ids: Option<&[i64]>) -> Result<(), CoreError> {
        let user_ids = [user_id];
        for rule in self.store.list_active_rules()? {
            if rule.rule_type.is_key_based() {
                self.regenerate_rule_schedules(&rule, Some(&user_ids), key_ids)?;
            }
        }
        Ok(())
    }

    /// On rule activation (including creation).
    pub fn auto_create_schedules_for_all_users(&self, rule_id: RuleId) -> Result<(), CoreError> {
        let rule = self
            .store
            .get_rule(rule_id)?
            .ok_or_else(|| CoreError::not_found(format!("rule {rule_id} not found")))?;

        match rule.rule_type {
            NotificationType::GlobalWeekly => Ok(()), // handled by the calendar trigger
            NotificationType::NewUserNoKeys => {
                let now = Clock::now_utc();
                let users_with_future_key: std::collections::HashSet<UserId> = self
                    .store
                    .list_keys()?
                    .into_iter()
                    .filter(|k| k.finish > now)
                    .map(|k| k.user_id)
                    .collect();
                for user in self.store.list_users()? {
                    if !users_with_future_key.contains(&user.id) {
                        self.plan_event_notifications(user.id, NotificationType::NewUserNoKeys, now)?;
                    }
                }
                Ok(())
            }
            _ => self.regenerate_rule_schedules(&rule, None, None),
        }
    }

    /// Lifecycle-handler entry point: plant a schedule for every active
    /// rule matching `event_type`, anchored at `base_dt`.
    pub fn plan_event_notifications(
        &self,
        user_id: UserId,
        event_type: NotificationType,
        base_dt: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        for rule in self.store.list_active_rules()? {
            if rule.rule_type != event_type {
                continue;
            }
            let dedup_key = dedup_key_for_lifecycle_rule(user_id, rule.id, base_dt);
            self.upsert_schedule(user_id, rule.id, base_dt, dedup_key)?;
        }
        Ok(())
    }

    fn upsert_schedule(
        &self,
        user_id: UserId,
        rule_id: RuleId,
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
        // `insert_schedule_if_absent` is the dedup guarantee — duplicate
        // insertions are silent no-ops.
        self.store.insert_schedule_if_absent(&schedule)?;
        Ok(())
    }

    fn cancel_schedule(&self, mut schedule: NotificationSchedule) -> Result<(), CoreError> {
        schedule.status = ScheduleStatus::Cancelled;
        self.store.update_schedule_status(&schedule)
    }

    // ── Cancellation entry points ─────────────────────────────────────────

    pub fn cancel_by_rule(&self, rule_id: RuleId, user_id: Option<UserId>) -> Result<(), CoreError> {
        for schedule in self.store.list_schedules_by_rule(rule_id)? {
            if schedule.status != ScheduleStatus::Planned {
                continue;
            }
            if user_id.map(|uid| uid == schedule.user_id).unwrap_or(true) {
                self.cancel_schedule(schedule)?;
            }
        }
        Ok(())
    }

    pub fn cancel_by_user_types(&self, user_id: UserId, types: &[NotificationType]) -> Result<(), CoreError> {
        let rules_by_type: Vec<NotificationRule> = self
            .store
            .list_rules()?
            .into_iter()
            .filter(|r| types.contains(&r.rule_type))
            .collect();
        for schedule in self.store.list_schedules_by_user(user_id)? {
            if schedule.status != ScheduleStatus::Planned {
                continue;
            }
            if rules_by_type.iter().any(|r| r.id == schedule.rule_id) {
                self.cancel_schedule(schedule)?;
            }
        }
        Ok(())
    }

    // ── Lifecycle handlers (invoked by keyward-keys) ──────────────────────

    pub fn on_user_registered(&self, user_id: UserId) -> Result<(), CoreError> {
        self.plan_event_notifications(user_id, NotificationType::NewUserNoKeys, Clock::now_utc())
    }

    pub fn on_trial_key_created(&self, user_id: UserId) -> Result<(), CoreError> {
        self.cancel_by_user_types(user_id, &[NotificationType::NewUserNoKeys])
    }

    pub fn on_paid_key_created(&self, user_id: UserId) -> Result<(), CoreError> {
        self.cancel_by_user_types(
            user_id,
            &[
                NotificationType::NewUserNoKeys,
                NotificationType::TrialExpiringSoon,
                NotificationType::TrialExpired,
            ],
        )
    }

    pub fn on_paid_key_prolonged(&self, user_id: UserId) -> Result<(), CoreError> {
        self.cancel_by_user_types(
            user_id,
            &[NotificationType::PaidExpired, NotificationType::PaidExpiringSoon],
        )
    }

    pub fn on_trial_key_prolonged(&self, _user_id: UserId) -> Result<(), CoreError> {
        // Trial keys are not prolonged in the product today; kept for
        // symmetry with `on_paid_key_prolonged`.
        Ok(())
    }

    /// Expose the messaging sink so `_should_repeat`/dispatcher code in
    /// this module can reach it without a second field lookup.
    pub(crate) fn sink(&self) -> &Arc<dyn MessagingSink> {
        &self.sink
    }
}

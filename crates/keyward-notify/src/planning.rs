use chrono::{DateTime, Utc};
use keyward_core::clock::Clock;
use keyward_core::error::CoreError;
use keyward_core::model::{NotificationRule, RuleId, UserId};

/// Where should this rule's next fire land for a key with the given
/// `finish`, evaluated at civil-zone `now`? `None` means "skip — the event
/// already passed or hasn't happened yet".
pub fn derive_planned_at_for_key(
    rule: &NotificationRule,
    key_finish_utc: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let now_civil = Clock::now_civil();
    let finish_civil = Clock::utc_to_civil(key_finish_utc);

    if rule.rule_type.is_expiring_soon() && finish_civil <= now_civil {
        return None;
    }
    if rule.rule_type.is_expired() && finish_civil < now_civil {
        return None;
    }

    let planned_civil = if rule.rule_type.is_expired() {
        finish_civil + rule.offset()
    } else {
        let candidate = finish_civil - rule.offset();
        if candidate < now_civil {
            now_civil
        } else {
            candidate
        }
    };

    Some(Clock::to_store(planned_civil))
}

/// `"<rule_id>:<user_id>:<type_value>:<planned_at_minute_ISO>"` — identity
/// of intent for a key-based schedule.
pub fn dedup_key_for_key_rule(
    rule_id: RuleId,
    user_id: UserId,
    type_value: &str,
    planned_at: DateTime<Utc>,
) -> String {
    format!(
        "{rule_id}:{user_id}:{type_value}:{}",
        planned_at.format("%Y-%m-%dT%H:%MZ")
    )
}

/// `"<user_id>:<rule_id>:<planned_at_epoch_seconds>"` — identity of intent
/// for global/lifecycle schedules.
pub fn dedup_key_for_lifecycle_rule(
    user_id: UserId,
    rule_id: RuleId,
    planned_at: DateTime<Utc>,
) -> String {
    format!("{user_id}:{rule_id}:{}", planned_at.timestamp())
}

/// Reject structurally invalid rules before they ever reach the store —
/// reminders require a strictly positive offset.
pub fn validate_rule(rule: &NotificationRule) -> Result<(), CoreError> {
    if rule.rule_type.is_expiring_soon() && rule.offset() <= chrono::Duration::zero() {
        return Err(CoreError::validation(
            "expiring_soon rules require a strictly positive offset",
        ));
    }
    if rule.rule_type == keyward_core::model::NotificationType::GlobalWeekly {
        if rule.weekday.map(|d| d > 6).unwrap_or(true) {
            return Err(CoreError::validation(
                "global_weekly rules require weekday in 0..=6",
            ));
        }
        if rule.time_of_day.is_none() {
            return Err(CoreError::validation(
                "global_weekly rules require time_of_day",
            ));
        }
    }
    Ok(())
}

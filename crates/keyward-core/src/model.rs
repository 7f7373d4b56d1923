//! Core data model — entities and invariants shared by every keyward crate.
//!
//! This module only defines shapes. Behavior (creation, mutation rules,
//! invariant enforcement) lives in the crates that own each entity's
//! lifecycle (`keyward-keys` for `Key`, `keyward-payments` for `Payment`,
//! `keyward-notify` for `NotificationRule`/`NotificationSchedule`).

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable external identity. 64-bit, assigned by the chat front end.
pub type UserId = i64;
pub type TariffId = i64;
pub type ServerId = i64;
pub type KeyId = i64;
pub type PaymentId = i64;
pub type RuleId = i64;
pub type ScheduleId = i64;
pub type LogId = i64;

// ── User ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: Option<String>,
    pub balance: i64,
    pub trial_used: bool,
    pub promo_used: bool,
    pub trial_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub banned: bool,
}

impl User {
    /// A brand-new user as the chat front end first sees them.
    pub fn new_from_chat_identity(id: UserId, username: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            username,
            balance: 0,
            trial_used: false,
            promo_used: false,
            trial_expires_at: None,
            created_at: now,
            banned: false,
        }
    }
}

// ── Tariff ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tariff {
    pub id: TariffId,
    pub name: String,
    pub price: i64,
    pub days: i32,
    pub discount: Option<u8>,
}

// ── Server ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub id: ServerId,
    /// Normalized `scheme://host[:port][/path]`. Never a raw operator string
    /// — see `keyward_panel::endpoint::PanelEndpoint`.
    pub host: String,
    pub login: String,
    pub password: String,
    pub max_users: i32,
    pub is_test: bool,
}

// ── Device ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Iphone,
    Android,
    Macos,
    Windows,
    Unknown,
}

impl Device {
    /// Parse a device string from the front end, falling back to `Unknown`
    /// for anything blank or unrecognized.
    pub fn parse_or_unknown(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "iphone" => Device::Iphone,
            "android" => Device::Android,
            "macos" => Device::Macos,
            "windows" => Device::Windows,
            _ => Device::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Iphone => "iphone",
            Device::Android => "android",
            Device::Macos => "macos",
            Device::Windows => "windows",
            Device::Unknown => "unknown",
        }
    }
}

// ── Key ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Key {
    pub id: KeyId,
    pub user_id: UserId,
    pub server_id: ServerId,
    /// Opaque connection URI rendered by the panel client.
    pub key: String,
    pub device: Device,
    /// `<prefix>_<user_id>_<device>_<n>`.
    pub name: String,
    pub payment_id: Option<PaymentId>,
    pub start: DateTime<Utc>,
    pub finish: DateTime<Utc>,
    pub active: bool,
    pub alerted: bool,
    pub is_test: bool,
}

// ── Payment ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    /// Unique opaque token handed to the payment provider.
    pub label: String,
    pub user_id: UserId,
    pub tariff_id: TariffId,
    pub amount: i64,
    pub url: String,
    pub device: Device,
    pub key_id: Option<KeyId>,
    pub promo: Option<String>,
    pub status: PaymentStatus,
    pub key_issued_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error_reason: Option<String>,
}

// ── Promo ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Promo {
    pub code: String,
    /// Percent discount, 0–100.
    pub price: u8,
    pub user_cap: Option<u32>,
    pub expires_at: Option<DateTime<Utc>>,
    pub tariff_whitelist: HashSet<TariffId>,
    pub used_users: HashSet<UserId>,
}

impl Promo {
    pub fn is_usable_by(&self, user_id: UserId, now: DateTime<Utc>) -> bool {
        if let Some(exp) = self.expires_at {
            if now > exp {
                return false;
            }
        }
        if let Some(cap) = self.user_cap {
            if self.used_users.len() as u32 >= cap && !self.used_users.contains(&user_id) {
                return false;
            }
        }
        !self.used_users.contains(&user_id)
    }

    pub fn applies_to_tariff(&self, tariff_id: TariffId) -> bool {
        self.tariff_whitelist.is_empty() || self.tariff_whitelist.contains(&tariff_id)
    }
}

// ── Notification rule ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    TrialExpiringSoon,
    TrialExpired,
    PaidExpiringSoon,
    PaidExpired,
    NewUserNoKeys,
    GlobalWeekly,
}

impl NotificationType {
    pub fn all() -> &'static [NotificationType] {
        use NotificationType::*;
        &[
            TrialExpiringSoon,
            TrialExpired,
            PaidExpiringSoon,
            PaidExpired,
            NewUserNoKeys,
            GlobalWeekly,
        ]
    }

    pub fn is_key_based(&self) -> bool {
        matches!(
            self,
            NotificationType::TrialExpiringSoon
                | NotificationType::TrialExpired
                | NotificationType::PaidExpiringSoon
                | NotificationType::PaidExpired
        )
    }

    pub fn is_expiring_soon(&self) -> bool {
        matches!(
            self,
            NotificationType::TrialExpiringSoon | NotificationType::PaidExpiringSoon
        )
    }

    pub fn is_expired(&self) -> bool {
        matches!(
            self,
            NotificationType::TrialExpired | NotificationType::PaidExpired
        )
    }

    pub fn is_test_variant(&self) -> bool {
        matches!(
            self,
            NotificationType::TrialExpiringSoon | NotificationType::TrialExpired
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::TrialExpiringSoon => "trial_expiring_soon",
            NotificationType::TrialExpired => "trial_expired",
            NotificationType::PaidExpiringSoon => "paid_expiring_soon",
            NotificationType::PaidExpired => "paid_expired",
            NotificationType::NewUserNoKeys => "new_user_no_keys",
            NotificationType::GlobalWeekly => "global_weekly",
        }
    }
}

/// A button on a rendered message. Exactly one of `url`/`callback_data` is
/// set — enforced by `MessageTemplate::validate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageButton {
    pub text: String,
    pub url: Option<String>,
    pub callback_data: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Text,
    Photo,
    Video,
    Document,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseMode {
    #[serde(rename = "HTML")]
    Html,
    #[serde(rename = "Markdown")]
    Markdown,
}

/// The free-form message template stored on a rule. See `keyward_messaging`
/// for rendering and validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageTemplate {
    pub media_type: MediaType,
    pub media_id: Option<String>,
    pub text: String,
    pub parse_mode: ParseMode,
    pub buttons: Vec<Vec<MessageButton>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRule {
    pub id: RuleId,
    pub name: String,
    pub rule_type: NotificationType,
    pub priority: i32,
    pub offset_days: Option<i32>,
    pub offset_hours: Option<i32>,
    pub repeat_every_days: Option<i32>,
    pub repeat_every_hours: Option<i32>,
    pub weekday: Option<u8>,
    /// Seconds since local midnight, civil zone.
    pub time_of_day: Option<u32>,
    pub timezone: Option<String>,
    pub message_template: MessageTemplate,
    pub is_active: bool,
}

impl NotificationRule {
    pub fn offset(&self) -> chrono::Duration {
        chrono::Duration::days(self.offset_days.unwrap_or(0) as i64)
            + chrono::Duration::hours(self.offset_hours.unwrap_or(0) as i64)
    }

    pub fn repeat_every(&self) -> Option<chrono::Duration> {
        let days = self.repeat_every_days.unwrap_or(0);
        let hours = self.repeat_every_hours.unwrap_or(0);
        if days == 0 && hours == 0 {
            None
        } else {
            Some(chrono::Duration::days(days as i64) + chrono::Duration::hours(hours as i64))
        }
    }
}

// ── Notification schedule ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    Planned,
    Sent,
    Skipped,
    Cancelled,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSchedule {
    pub id: ScheduleId,
    pub user_id: UserId,
    pub rule_id: RuleId,
    pub planned_at: DateTime<Utc>,
    pub status: ScheduleStatus,
    pub dedup_key: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

// ── Notification log ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Ok,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationLog {
    pub id: LogId,
    pub user_id: Option<UserId>,
    pub rule_id: Option<RuleId>,
    pub schedule_id: Option<ScheduleId>,
    pub status: LogStatus,
    pub message_id: Option<String>,
    pub error: Option<String>,
    pub sent_at: DateTime<Utc>,
}

// ── Text settings ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextSettings {
    pub faq_iphone: Option<String>,
    pub faq_android: Option<String>,
    pub faq_macos: Option<String>,
    pub faq_windows: Option<String>,
    pub faq_list: Option<String>,
    pub test_hours: i32,
    pub updated_at: DateTime<Utc>,
}

impl Default for TextSettings {
    fn default() -> Self {
        Self {
            faq_iphone: None,
            faq_android: None,
            faq_macos: None,
            faq_windows: None,
            faq_list: None,
            test_hours: 24,
            updated_at: Utc::now(),
        }
    }
}

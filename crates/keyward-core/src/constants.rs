//! ─── keyward protocol constants ─────────────────────────────────────────────

use std::time::Duration;

/// Minimum timeout for any outbound HTTP call (panel, payment provider).
pub const MIN_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Key sweeper tick interval.
pub const SWEEPER_INTERVAL_SECS: u64 = 60;

/// Pending-payment poll interval.
pub const PAYMENTS_PENDING_INTERVAL_SECS: u64 = 25;

/// Success-without-key recovery interval.
pub const PAYMENTS_RECOVER_INTERVAL_SECS: u64 = 60;

/// Notification dispatcher interval.
pub const DISPATCHER_INTERVAL_SECS: u64 = 60;

/// Pending payments older than this are deleted rather than retried forever.
pub const PAYMENT_PENDING_TIMEOUT_MINUTES: i64 = 30;

/// Keys stay on the panel (and in the store) this long past `finish` before
/// the sweeper deletes them outright.
pub const KEY_GRACE_PERIOD_HOURS: i64 = 24;

/// Window in which a key is marked `alerted` ahead of expiry.
pub const ALERT_WINDOW_MIN_HOURS: i64 = 1;
pub const ALERT_WINDOW_MAX_HOURS: i64 = 24;

/// One notification dispatch batch.
pub const DISPATCH_BATCH_SIZE: usize = 50;

/// Hard cap on batches processed in a single dispatcher tick.
pub const DISPATCH_MAX_BATCHES: usize = 100;

/// Reserved id prefix for scheduler jobs installed per notification rule.
pub const GLOBAL_RULE_JOB_PREFIX: &str = "notification_global_";

/// `alterId` carried on every panel client payload (legacy V2Ray field).
pub const PANEL_ALTER_ID: u32 = 90;

/// `limitIp` carried on every panel client payload.
pub const PANEL_LIMIT_IP: u32 = 1;

/// Panel inbound id every operation targets. The panel may host more than
/// one inbound; this system only ever touches this one.
pub const PANEL_INBOUND_ID: u64 = 1;

/// `flow` value set on newly created clients.
pub const PANEL_FLOW: &str = "xtls-rprx-vision";

/// Callback-data payloads on message buttons must fit in this many bytes
/// (mirrors Telegram's own limit).
pub const MAX_CALLBACK_DATA_BYTES: usize = 64;

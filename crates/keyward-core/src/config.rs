//! Typed settings object. The core only ever *consumes* configuration — it
//! never reads the environment directly outside of this module, and it
//! never owns the operator-facing loading/validation UX.

use std::path::PathBuf;

use clap::Parser;

/// Fields the core actually consumes.
#[derive(Debug, Clone, Parser)]
#[command(name = "keyward", about = "Subscription-key management core")]
pub struct Settings {
    /// Bearer token for the payment provider's create-intent/check-status API.
    #[arg(long, env = "KEYWARD_PAYMENT_PROVIDER_TOKEN")]
    pub payment_provider_token: String,

    /// Prefix prepended to every rendered key name / URI fragment.
    #[arg(long, env = "KEYWARD_PANEL_PREFIX", default_value = "keyward")]
    pub panel_prefix: String,

    /// When set, the notification dispatcher loads but never actually calls
    /// the messaging sink. Testing only.
    #[arg(long, env = "KEYWARD_DISABLE_KEY_NOTIFICATIONS")]
    pub disable_key_notifications: bool,

    /// Directory for the persistent state database.
    #[arg(long, env = "KEYWARD_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// User ids the RPC facade reports as `is_admin` on `authenticateUser`.
    /// Consumed by `keyward-api`, not by the core state machines.
    #[arg(long = "admin-id", env = "KEYWARD_ADMIN_IDS", value_delimiter = ',')]
    pub admin_ids: Vec<i64>,
}

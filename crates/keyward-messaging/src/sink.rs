use async_trait::async_trait;
use keyward_core::error::CoreError;
use keyward_core::model::UserId;

use crate::message::Message;

/// Outbound capability used by `keyward-keys`, `keyward-payments`, and
/// `keyward-notify` to reach users and operators.
/// Provider mechanics (chat platform, formatting) are the implementor's
/// concern; the core only ever depends on this trait.
#[async_trait]
pub trait MessagingSink: Send + Sync {
    /// Send to one user. Returns a provider-assigned message id on success.
    async fn send(&self, user_id: UserId, message: Message) -> Result<String, CoreError>;

    /// Broadcast to every configured operator/admin.
    async fn send_admins(&self, message: Message) -> Result<(), CoreError>;
}

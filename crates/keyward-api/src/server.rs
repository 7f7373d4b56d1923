use std::net::SocketAddr;
use std::sync::Arc;

use jsonrpsee::core::{async_trait, RpcResult};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObject;
use keyward_core::clock::Clock;
use keyward_core::error::CoreError;
use keyward_core::model::{Device, Key, Payment, UserId};
use keyward_keys::{CreateKeyRequest, KeyService};
use keyward_notify::NotificationEngine;
use keyward_payments::PaymentService;
use keyward_store::KeywardStore;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::api::KeywardApiServer;
use crate::types::{RpcKey, RpcPayment, RpcUser};

fn rpc_err(code: i32, msg: impl Into<String>) -> ErrorObject<'static> {
    ErrorObject::owned(code, msg.into(), None::<()>)
}

fn key_to_rpc(key: Key) -> RpcKey {
    RpcKey {
        id: key.id,
        user_id: key.user_id,
        server_id: key.server_id,
        device: key.device.as_str().to_string(),
        name: key.name,
        uri: key.key,
        is_test: key.is_test,
        active: key.active,
        finish: key.finish,
    }
}

fn payment_to_rpc(payment: Payment) -> RpcPayment {
    RpcPayment {
        id: payment.id,
        label: payment.label,
        amount: payment.amount,
        url: payment.url,
        status: format!("{:?}", payment.status).to_lowercase(),
    }
}

fn core_err_to_rpc(err: CoreError) -> ErrorObject<'static> {
    match err {
        CoreError::Validation(msg) => rpc_err(-32602, msg),
        CoreError::NotFound(msg) => rpc_err(-32602, msg),
        other => rpc_err(-32603, other.to_string()),
    }
}

/// Shared state behind the front-end-facing RPC facade. `admin_ids` is
/// reported back as `is_admin` on `authenticateUser`; the facade does not
/// otherwise gate on it — presentation stays the front end's concern.
pub struct RpcServerState {
    pub store: Arc<KeywardStore>,
    pub keys: Arc<KeyService>,
    pub payments: Arc<PaymentService>,
    pub notify: Arc<NotificationEngine>,
    pub admin_ids: Vec<UserId>,
}

pub struct RpcServer {
    state: Arc<RpcServerState>,
}

impl RpcServer {
    pub fn new(state: Arc<RpcServerState>) -> Self {
        Self { state }
    }

    /// Start the JSON-RPC server on `addr` with permissive CORS headers.
    /// Returns a handle to stop it.
    pub async fn start(self, addr: SocketAddr) -> anyhow::Result<ServerHandle> {
        let cors = CorsLayer::new()
            .allow_methods(Any)
            .allow_origin(Any)
            .allow_headers(Any);

        let server = Server::builder()
            .set_http_middleware(tower::ServiceBuilder::new().layer(cors))
            .build(addr)
            .await?;

        let module = self.into_rpc();
        let handle = server.start(module);
        info!(%addr, "RPC server started");
        Ok(handle)
    }
}

#[async_trait]
impl KeywardApiServer for RpcServer {
    async fn authenticate_user(
        &self,
        user_id: i64,
        username: Option<String>,
    ) -> RpcResult<RpcUser> {
        let (user, created) = self
            .state
            .store
            .get_or_create_user(user_id, username, Clock::now_utc())
            .map_err(|e| rpc_err(-32603, e.to_string()))?;

        if created {
            self.state
                .notify
                .on_user_registered(user.id)
                .map_err(|e| rpc_err(-32603, e.to_string()))?;
        }

        Ok(RpcUser {
            id: user.id,
            username: user.username,
            balance: user.balance,
            trial_used: user.trial_used,
            banned: user.banned,
            is_admin: self.state.admin_ids.contains(&user.id),
            created,
        })
    }

    async fn create_test_key(
        &self,
        user_id: i64,
        device: String,
        trial_hours: i64,
    ) -> RpcResult<RpcKey> {
        let now = Clock::now_civil();
        let finish = Clock::to_store(now + chrono::Duration::hours(trial_hours));
        let key = self
            .state
            .keys
            .create_key(CreateKeyRequest {
                user_id,
                finish,
                device: Device::parse_or_unknown(&device),
                is_test: true,
                promo: None,
                payment_id: None,
            })
            .await
            .map_err(core_err_to_rpc)?;
        Ok(key_to_rpc(key))
    }

    async fn create_paid_payment(
        &self,
        user_id: i64,
        tariff_id: i64,
        device: String,
        key_id: Option<i64>,
        promo_code: Option<String>,
    ) -> RpcResult<RpcPayment> {
        let payment = self
            .state
            .payments
            .create_payment(
                user_id,
                tariff_id,
                Device::parse_or_unknown(&device),
                key_id,
                promo_code,
            )
            .await
            .map_err(core_err_to_rpc)?;
        Ok(payment_to_rpc(payment))
    }

    async fn cancel_payment(&self, payment_id: i64) -> RpcResult<()> {
        self.state
            .payments
            .cancel_payment(payment_id)
            .await
            .map_err(core_err_to_rpc)
    }

    async fn list_user_keys(&self, user_id: i64) -> RpcResult<Vec<RpcKey>> {
        let keys = self
            .state
            .store
            .list_keys_by_user(user_id)
            .map_err(|e| rpc_err(-32603, e.to_string()))?;
        Ok(keys.into_iter().map(key_to_rpc).collect())
    }

    async fn prolong_key(&self, user_id: i64, tariff_id: i64, key_id: i64) -> RpcResult<RpcPayment> {
        let key = self
            .state
            .store
            .get_key(key_id)
            .map_err(|e| rpc_err(-32603, e.to_string()))?
            .ok_or_else(|| rpc_err(-32602, format!("key {key_id} not found")))?;
        let payment = self
            .state
            .payments
            .create_payment(user_id, tariff_id, key.device, Some(key_id), None)
            .await
            .map_err(core_err_to_rpc)?;
        Ok(payment_to_rpc(payment))
    }
}

use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;

use crate::types::{RpcKey, RpcPayment, RpcUser};

/// keyward front-end-facing JSON-RPC 2.0 API definition.
///
/// All method names are prefixed with "keyward_" via `namespace = "keyward"`.
/// This is the only surface the chat front end talks to; it is a thin
/// pass-through into the key/payment services, adding no business rules of
/// its own.
#[rpc(server, namespace = "keyward")]
pub trait KeywardApi {
    /// First-contact / every-contact hook from the chat front end. Creates
    /// the user on first sight and emits `on_user_registered` exactly then.
    #[method(name = "authenticateUser")]
    async fn authenticate_user(
        &self,
        user_id: i64,
        username: Option<String>,
    ) -> RpcResult<RpcUser>;

    /// Issue a trial key. `trial_hours` sets `finish = now + trial_hours`.
    #[method(name = "createTestKey")]
    async fn create_test_key(
        &self,
        user_id: i64,
        device: String,
        trial_hours: i64,
    ) -> RpcResult<RpcKey>;

    /// Open a payment-provider intent for a tariff purchase or prolongation.
    #[method(name = "createPaidPayment")]
    async fn create_paid_payment(
        &self,
        user_id: i64,
        tariff_id: i64,
        device: String,
        key_id: Option<i64>,
        promo_code: Option<String>,
    ) -> RpcResult<RpcPayment>;

    /// Cancel a still-pending payment.
    #[method(name = "cancelPayment")]
    async fn cancel_payment(&self, payment_id: i64) -> RpcResult<()>;

    /// List every key belonging to a user.
    #[method(name = "listUserKeys")]
    async fn list_user_keys(&self, user_id: i64) -> RpcResult<Vec<RpcKey>>;

    /// Prolong an existing key by a tariff's day count, via the payment
    /// pipeline (opens an intent; the key is only extended once paid and
    /// `issue` recognizes `key_id` as a prolongation rather than a new key).
    #[method(name = "prolongKey")]
    async fn prolong_key(&self, user_id: i64, tariff_id: i64, key_id: i64) -> RpcResult<RpcPayment>;
}

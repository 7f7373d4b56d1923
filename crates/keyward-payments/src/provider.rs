use keyward_core::constants::MIN_HTTP_TIMEOUT;
use keyward_core::error::CoreError;
use tracing::warn;

/// Thin client for the third-party payment provider. Mirrors the
/// `WalletRpcClient` shape — a single private `call` helper, typed public
/// methods on top — generalized from JSON-RPC to the provider's plain
/// REST surface.
pub struct PaymentProviderClient {
    base_url: String,
    token: String,
    http: reqwest::Client,
}

impl PaymentProviderClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self, CoreError> {
        let http = reqwest::Client::builder()
            .timeout(MIN_HTTP_TIMEOUT)
            .build()
            .map_err(|e| CoreError::transient(format!("building payment provider client: {e}")))?;
        Ok(Self {
            base_url: base_url.into(),
            token: token.into(),
            http,
        })
    }

    async fn call(&self, path: &str, body: serde_json::Value) -> Result<serde_json::Value, CoreError> {
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::transient(format!("payment provider request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(CoreError::transient(format!(
                "payment provider returned status {}",
                resp.status()
            )));
        }

        resp.json()
            .await
            .map_err(|e| CoreError::transient(format!("parsing payment provider response: {e}")))
    }

    /// `(receiver, targets, sum, label)` ⇒ a redirect URL for the user to
    /// complete payment.
    pub async fn create_intent(
        &self,
        receiver: &str,
        targets: &str,
        sum: i64,
        label: &str,
    ) -> Result<String, CoreError> {
        let result = self
            .call(
                "/create-intent",
                serde_json::json!({"receiver": receiver, "targets": targets, "sum": sum, "label": label}),
            )
            .await?;

        result
            .get("redirect_url")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| CoreError::transient("payment provider response missing redirect_url"))
    }

    /// Returns `false` on any provider error — an ambiguous response must
    /// never be read as confirmation.
    pub async fn check_status(&self, label: &str) -> bool {
        match self.call("/check-status", serde_json::json!({"label": label})).await {
            Ok(result) => result.get("confirmed").and_then(|v| v.as_bool()).unwrap_or(false),
            Err(e) => {
                warn!(error = %e, label, "payment provider check-status failed, treating as unconfirmed");
                false
            }
        }
    }
}

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use keyward_core::constants::{MIN_HTTP_TIMEOUT, PANEL_ALTER_ID, PANEL_FLOW, PANEL_INBOUND_ID, PANEL_LIMIT_IP};
use keyward_core::error::CoreError;
use keyward_core::model::Server;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::endpoint::PanelEndpoint;
use crate::types::{Inbound, InboundListResponse, PanelClient as WireClient};

/// A session against one remote panel. Mirrors `WalletRpcClient`'s shape —
/// a thin `reqwest::Client` wrapper with a private `call` helper and typed
/// public methods built on top — generalized to the panel's cookie-based
/// auth instead of JSON-RPC.
pub struct PanelClient {
    endpoint: PanelEndpoint,
    login: String,
    password: String,
    http: reqwest::Client,
    authenticated: AtomicBool,
}

impl PanelClient {
    pub fn new(server: &Server) -> Result<Self, CoreError> {
        let endpoint = PanelEndpoint::normalize(&server.host)?;
        let http = reqwest::Client::builder()
            .timeout(MIN_HTTP_TIMEOUT)
            .danger_accept_invalid_certs(true)
            .cookie_store(true)
            .build()
            .map_err(|e| CoreError::transient(format!("building panel http client: {e}")))?;
        Ok(Self {
            endpoint,
            login: server.login.clone(),
            password: server.password.clone(),
            http,
            authenticated: AtomicBool::new(false),
        })
    }

    pub fn endpoint(&self) -> &PanelEndpoint {
        &self.endpoint
    }

    /// Auto-authenticate on first call per session.
    async fn ensure_authenticated(&self) -> Result<(), CoreError> {
        if self.authenticated.load(Ordering::Acquire) {
            return Ok(());
        }
        self.authenticate().await
    }

    pub async fn authenticate(&self) -> Result<(), CoreError> {
        let resp = self
            .http
            .post(self.endpoint.url("/login"))
            .json(&serde_json::json!({"username": self.login, "password": self.password}))
            .send()
            .await
            .map_err(|e| CoreError::transient(format!("panel login request failed: {e}")))?;

        let status = resp.status();
        let has_cookie = resp.headers().get(reqwest::header::SET_COOKIE).is_some();
        let body: serde_json::Value = resp
            .json()
            .await
            .unwrap_or(serde_json::Value::Null);
        let json_success = body.get("success").and_then(|v| v.as_bool()).unwrap_or(false);

        if json_success || (status.is_success() && has_cookie) {
            self.authenticated.store(true, Ordering::Release);
            Ok(())
        } else {
            Err(CoreError::permanent("panel authentication rejected"))
        }
    }

    async fn post_with_retry(&self, path: &str, body: serde_json::Value) -> Result<reqwest::Response, CoreError> {
        self.ensure_authenticated().await?;
        match self.http.post(self.endpoint.url(path)).json(&body).send().await {
            Ok(resp) => Ok(resp),
            Err(first_err) => {
                warn!(error = %first_err, path, "panel request failed, retrying once");
                self.http
                    .post(self.endpoint.url(path))
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| CoreError::transient(format!("panel request failed after retry: {e}")))
            }
        }
    }

    pub async fn list_inbounds(&self) -> Result<Option<Inbound>, CoreError> {
        self.ensure_authenticated().await?;
        let resp = self
            .http
            .get(self.endpoint.url("/panel/api/inbounds/list"))
            .send()
            .await
            .map_err(|e| CoreError::transient(format!("list_inbounds failed: {e}")))?;

        let parsed: InboundListResponse = resp
            .json()
            .await
            .map_err(|e| CoreError::transient(format!("parsing inbound list: {e}")))?;

        Ok(parsed
            .obj
            .into_iter()
            .find(|i| i.id == PANEL_INBOUND_ID))
    }

    fn expiry_time_ms(days: i32) -> i64 {
        let now_ms = Utc::now().timestamp_millis();
        now_ms + 86_400_000 * (days as i64 + 1) - 10_800_000
    }

    pub async fn add_client(&self, name: &str, days: i32) -> Result<(), CoreError> {
        let client = WireClient {
            id: Uuid::new_v4().to_string(),
            email: name.to_string(),
            alter_id: PANEL_ALTER_ID,
            limit_ip: PANEL_LIMIT_IP,
            total_gb: 0,
            flow: Some(PANEL_FLOW.to_string()),
            enable: true,
            expiry_time: Self::expiry_time_ms(days),
        };
        let settings = serde_json::json!({"clients": [client]}).to_string();
        let body = serde_json::json!({
            "id": PANEL_INBOUND_ID,
            "settings": settings,
        });
        let resp = self.post_with_retry("/panel/api/inbounds/addClient", body).await?;
        Self::require_success(resp).await
    }

    async fn find_client_id(&self, name: &str) -> Result<Option<String>, CoreError> {
        let Some(inbound) = self.list_inbounds().await? else {
            return Ok(None);
        };
        let clients: Vec<WireClient> = serde_json::from_str(&inbound.settings.clients)
            .map_err(|e| CoreError::transient(format!("parsing inbound clients: {e}")))?;
        Ok(clients.into_iter().find(|c| c.email == name).map(|c| c.id))
    }

    pub async fn disable_client(&self, name: &str) -> Result<(), CoreError> {
        let Some(id) = self.find_client_id(name).await? else {
            debug!(name, "disable_client: client not found, no-op");
            return Err(CoreError::not_found(format!("panel client {name} not found")));
        };
        let client = WireClient {
            id: id.clone(),
            email: name.to_string(),
            alter_id: PANEL_ALTER_ID,
            limit_ip: PANEL_LIMIT_IP,
            total_gb: 0,
            flow: Some(PANEL_FLOW.to_string()),
            enable: false,
            expiry_time: 0,
        };
        let settings = serde_json::json!({"clients": [client]}).to_string();
        let body = serde_json::json!({"id": PANEL_INBOUND_ID, "settings": settings});
        let path = format!("/panel/api/inbounds/updateClient/{id}");
        let resp = self.post_with_retry(&path, body).await?;
        Self::require_success(resp).await
    }

    pub async fn enable_client(&self, name: &str, days: i32) -> Result<(), CoreError> {
        let Some(id) = self.find_client_id(name).await? else {
            return Err(CoreError::not_found(format!("panel client {name} not found")));
        };
        let client = WireClient {
            id: id.clone(),
            email: name.to_string(),
            alter_id: PANEL_ALTER_ID,
            limit_ip: PANEL_LIMIT_IP,
            total_gb: 0,
            flow: Some(PANEL_FLOW.to_string()),
            enable: true,
            expiry_time: Self::expiry_time_ms(days),
        };
        let settings = serde_json::json!({"clients": [client]}).to_string();
        let body = serde_json::json!({"id": PANEL_INBOUND_ID, "settings": settings});
        let path = format!("/panel/api/inbounds/updateClient/{id}");
        let resp = self.post_with_retry(&path, body).await?;
        Self::require_success(resp).await
    }

    pub async fn delete_client(&self, name: &str) -> Result<(), CoreError> {
        let Some(id) = self.find_client_id(name).await? else {
            debug!(name, "delete_client: client already absent, no-op");
            return Ok(());
        };
        let path = format!("/panel/api/inbounds/{}/delClient/{}", PANEL_INBOUND_ID, id);
        let resp = self.post_with_retry(&path, serde_json::json!({})).await?;
        Self::require_success(resp).await
    }

    /// Build the opaque connection URI for an already-created client.
    pub async fn render_key_uri(&self, name: &str, prefix: &str) -> Result<String, CoreError> {
        let inbound = self
            .list_inbounds()
            .await?
            .ok_or_else(|| CoreError::not_found("inbound 1 not present on panel"))?;
        let clients: Vec<WireClient> = serde_json::from_str(&inbound.settings.clients)
            .map_err(|e| CoreError::transient(format!("parsing inbound clients: {e}")))?;
        let client = clients
            .into_iter()
            .find(|c| c.email == name)
            .ok_or_else(|| CoreError::not_found(format!("panel client {name} not found")))?;

        let reality = inbound.stream_settings.reality_settings.as_ref();
        let public_key = reality
            .and_then(|r| r.public_key.clone())
            .unwrap_or_default();
        let short_id = reality
            .and_then(|r| r.short_ids.as_ref())
            .and_then(|ids| ids.first().cloned())
            .unwrap_or_default();
        let flow_part = client
            .flow
            .as_ref()
            .map(|f| format!("&flow={f}"))
            .unwrap_or_default();

        Ok(format!(
            "vless://{id}@{host}:{port}?type={net}&security={sec}&fp=chrome{flow}&pbk={pbk}&sni={sni}&sid={sid}&spx=%2F#{prefix}-{name}",
            id = client.id,
            host = self.endpoint.host_only(),
            port = inbound.port,
            net = inbound.stream_settings.network,
            sec = inbound.stream_settings.security,
            flow = flow_part,
            pbk = public_key,
            sni = name,
            sid = short_id,
            prefix = prefix,
            name = name,
        ))
    }

    async fn require_success(resp: reqwest::Response) -> Result<(), CoreError> {
        if !resp.status().is_success() {
            return Err(CoreError::transient(format!(
                "panel request returned status {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyward_core::model::Server;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn expiry_time_matches_the_days_plus_one_offset_formula() {
        let now_ms = Utc::now().timestamp_millis();
        let computed = PanelClient::expiry_time_ms(3);
        let expected = now_ms + 86_400_000 * 4 - 10_800_000;
        assert!((computed - expected).abs() < 2_000);
    }

    fn fake_server(host: String) -> Server {
        Server {
            id: 1,
            host,
            login: "admin".into(),
            password: "hunter2".into(),
            max_users: 10,
            is_test: false,
        }
    }

    #[tokio::test]
    async fn add_client_authenticates_then_posts_settings() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"success": true})))
            .expect(1)
            .mount(&mock)
            .await;
        Mock::given(method("POST"))
            .and(path("/panel/api/inbounds/addClient"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"success": true})))
            .expect(1)
            .mount(&mock)
            .await;

        let client = PanelClient::new(&fake_server(mock.uri())).unwrap();
        client.add_client("corsarvpn_1_iphone_1", 5).await.unwrap();
    }

    #[tokio::test]
    async fn authenticate_fails_without_success_flag_or_cookie() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"success": false})))
            .mount(&mock)
            .await;

        let client = PanelClient::new(&fake_server(mock.uri())).unwrap();
        assert!(client.authenticate().await.is_err());
    }

    #[tokio::test]
    async fn render_key_uri_includes_flow_when_client_carries_one() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"success": true})))
            .mount(&mock)
            .await;

        let clients_json = serde_json::to_string(&[WireClient {
            id: "abc-123".into(),
            email: "corsarvpn_1_iphone_1".into(),
            alter_id: PANEL_ALTER_ID,
            limit_ip: PANEL_LIMIT_IP,
            total_gb: 0,
            flow: Some(PANEL_FLOW.to_string()),
            enable: true,
            expiry_time: 0,
        }])
        .unwrap();
        let inbound_list = serde_json::json!({
            "success": true,
            "obj": [{
                "id": PANEL_INBOUND_ID,
                "port": 443,
                "streamSettings": {
                    "network": "tcp",
                    "security": "reality",
                    "realitySettings": {"publicKey": "pk", "shortIds": ["sid1"]},
                },
                "settings": {"clients": clients_json},
            }],
        });
        Mock::given(method("GET"))
            .and(path("/panel/api/inbounds/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(inbound_list))
            .mount(&mock)
            .await;

        let client = PanelClient::new(&fake_server(mock.uri())).unwrap();
        let uri = client
            .render_key_uri("corsarvpn_1_iphone_1", "corsarvpn")
            .await
            .unwrap();
        assert!(uri.starts_with("vless://abc-123@"));
        assert!(uri.contains(&format!("&flow={PANEL_FLOW}")));
        assert!(uri.contains("#corsarvpn-corsarvpn_1_iphone_1"));
    }
}

//! End-to-end smoke test for keyward-node.
//!
//! Starts a real node process against a pre-seeded state database and mocked
//! panel/payment-provider/telegram backends, drives the RPC facade, and
//! asserts the resulting key/user rows.
//!
//! Run with:
//!   cargo test -p keyward-node --test smoke

use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use keyward_core::model::{Server, Tariff};
use keyward_store::KeywardStore;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct NodeGuard {
    child: Child,
    data_dir: PathBuf,
}

impl Drop for NodeGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.data_dir);
    }
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

async fn rpc_call(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let body = serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
        "id": 1
    });
    let resp = client
        .post(url)
        .json(&body)
        .send()
        .await
        .unwrap_or_else(|e| panic!("RPC call {method} failed: {e}"));
    let json: serde_json::Value = resp.json().await.expect("parse RPC JSON");
    if let Some(err) = json.get("error") {
        panic!("RPC error from {method}: {err}");
    }
    json["result"].clone()
}

async fn wait_for_rpc(client: &reqwest::Client, url: &str, timeout: Duration) -> bool {
    let body = serde_json::json!({
        "jsonrpc": "2.0",
        "method": "keyward_authenticateUser",
        "params": [0, null],
        "id": 1
    });
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Ok(resp) = client.post(url).json(&body).send().await {
            if resp.status().is_success() {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    false
}

async fn mount_panel(mock: &MockServer, client_email: &str) {
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"success": true})))
        .mount(mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/panel/api/inbounds/addClient"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"success": true})))
        .mount(mock)
        .await;

    let clients_json = serde_json::json!([{
        "id": "client-1",
        "email": client_email,
        "alterId": 90,
        "limitIp": 1,
        "totalGB": 0,
        "flow": "xtls-rprx-vision",
        "enable": true,
        "expiryTime": 0,
    }])
    .to_string();
    let inbound_list = serde_json::json!({
        "success": true,
        "obj": [{
            "id": 1,
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
        .mount(mock)
        .await;
}

#[tokio::test]
async fn smoke_authenticate_and_create_test_key() {
    let panel_mock = MockServer::start().await;
    mount_panel(&panel_mock, "keyward_555_iphone_1").await;

    let provider_mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/check-status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"confirmed": false})))
        .mount(&provider_mock)
        .await;

    let telegram_mock = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true, "result": {"message_id": 1}})))
        .mount(&telegram_mock)
        .await;

    // ── Pre-seed the database before the node process takes the file lock ──
    let data_dir = std::env::temp_dir().join(format!("keyward_smoke_{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&data_dir);
    std::fs::create_dir_all(&data_dir).unwrap();
    {
        let store = KeywardStore::open(&data_dir).expect("open store for seeding");
        store
            .insert_server(&Server {
                id: 1,
                host: panel_mock.uri(),
                login: "admin".into(),
                password: "hunter2".into(),
                max_users: 50,
                is_test: true,
            })
            .unwrap();
        store
            .insert_tariff(&Tariff { id: 1, name: "monthly".into(), price: 500, days: 30, discount: None })
            .unwrap();
        store.flush().unwrap();
    }

    let rpc_port = free_port();
    let rpc_url = format!("http://127.0.0.1:{rpc_port}");

    let node_bin = env!("CARGO_BIN_EXE_keyward-node");
    let child = Command::new(node_bin)
        .args([
            "--data-dir", data_dir.to_str().unwrap(),
            "--rpc-addr", &format!("127.0.0.1:{rpc_port}"),
            "--payment-provider-token", "provider-token",
            "--payment-provider-base-url", &provider_mock.uri(),
            "--bot-token", "test-token",
            "--telegram-api-base-url", &telegram_mock.uri(),
            "--panel-prefix", "keyward",
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn keyward-node");

    let _guard = NodeGuard { child, data_dir: data_dir.clone() };

    let http = reqwest::Client::new();
    assert!(
        wait_for_rpc(&http, &rpc_url, Duration::from_secs(20)).await,
        "keyward-node did not become ready within 20 seconds"
    );

    let auth = rpc_call(&http, &rpc_url, "keyward_authenticateUser", serde_json::json!([555, "alice"])).await;
    assert_eq!(auth["id"], 555);
    assert_eq!(auth["created"], true);
    assert_eq!(auth["trial_used"], false);

    let key = rpc_call(
        &http,
        &rpc_url,
        "keyward_createTestKey",
        serde_json::json!([555, "iphone", 48]),
    )
    .await;
    assert_eq!(key["user_id"], 555);
    assert_eq!(key["device"], "iphone");
    assert_eq!(key["name"], "keyward_555_iphone_1");
    assert_eq!(key["is_test"], true);

    let keys = rpc_call(&http, &rpc_url, "keyward_listUserKeys", serde_json::json!([555])).await;
    assert_eq!(keys.as_array().unwrap().len(), 1);

    let auth_again = rpc_call(&http, &rpc_url, "keyward_authenticateUser", serde_json::json!([555, "alice"])).await;
    assert_eq!(auth_again["trial_used"], true, "trial_used should flip after a test key is issued");
}

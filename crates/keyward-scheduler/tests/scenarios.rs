//! End-to-end scenario tests driving the store, key service, payment
//! pipeline, and notification engine together against mocked panel/
//! payment-provider HTTP backends.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use keyward_core::clock::Clock;
use keyward_core::error::CoreError;
use keyward_core::model::{
    Device, MediaType, MessageTemplate, NotificationRule, NotificationType, ParseMode,
    Payment, PaymentStatus, ScheduleStatus, Server, Tariff, User,
};
use keyward_keys::{CreateKeyRequest, KeyService};
use keyward_messaging::{Message, MessagingSink};
use keyward_notify::NotificationEngine;
use keyward_payments::{PaymentProviderClient, PaymentService};
use keyward_store::KeywardStore;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct RecordingSink {
    sent: Mutex<Vec<(i64, String)>>,
}

impl RecordingSink {
    fn new() -> Self {
        Self { sent: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl MessagingSink for RecordingSink {
    async fn send(&self, user_id: i64, message: Message) -> Result<String, CoreError> {
        let text = match message {
            Message::Text { text, .. } => text,
            _ => String::new(),
        };
        self.sent.lock().unwrap().push((user_id, text));
        Ok("msg-1".into())
    }

    async fn send_admins(&self, _message: Message) -> Result<(), CoreError> {
        Ok(())
    }
}

fn text_rule(rule_type: NotificationType, id: i64, offset_days: Option<i32>) -> NotificationRule {
    NotificationRule {
        id,
        name: format!("rule-{id}"),
        rule_type,
        priority: 0,
        offset_days,
        offset_hours: None,
        repeat_every_days: None,
        repeat_every_hours: None,
        weekday: None,
        time_of_day: None,
        timezone: None,
        message_template: MessageTemplate {
            media_type: MediaType::Text,
            media_id: None,
            text: "hi".into(),
            parse_mode: ParseMode::Html,
            buttons: vec![],
        },
        is_active: true,
    }
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
    Mock::given(method("POST"))
        .and(wiremock::matchers::path_regex(r"^/panel/api/inbounds/updateClient/.*$"))
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

fn server_row(id: i64, host: String, is_test: bool) -> Server {
    Server { id, host, login: "admin".into(), password: "pw".into(), max_users: 20, is_test }
}

#[tokio::test]
async fn create_test_key_plants_trial_schedules_and_cancels_new_user_schedule() {
    let (store, _dir) = KeywardStore::open_temp();
    let store = Arc::new(store);
    let sink: Arc<dyn MessagingSink> = Arc::new(RecordingSink::new());
    let notify = Arc::new(NotificationEngine::new(store.clone(), sink.clone()));

    let panel_mock = MockServer::start().await;
    mount_panel(&panel_mock, "corsarvpn_100_iphone_1").await;
    store.insert_server(&server_row(1, panel_mock.uri(), true)).unwrap();

    let user = User::new_from_chat_identity(100, None, Utc::now());
    store.insert_user(&user).unwrap();
    notify.on_user_registered(100).unwrap();

    notify
        .create_rule(text_rule(NotificationType::TrialExpiringSoon, 1, Some(1)))
        .unwrap();
    notify
        .create_rule(text_rule(NotificationType::NewUserNoKeys, 2, Some(0)))
        .unwrap();

    let keys = KeyService::new(store.clone(), notify.clone(), sink.clone(), "corsarvpn".into());
    let finish = Clock::now_utc() + chrono::Duration::hours(48);
    let key = keys
        .create_key(CreateKeyRequest {
            user_id: 100,
            finish,
            device: Device::Iphone,
            is_test: true,
            promo: None,
            payment_id: None,
        })
        .await
        .unwrap();

    assert_eq!(key.server_id, 1);
    assert_eq!(key.name, "corsarvpn_100_iphone_1");
    assert!(key.is_test);

    let reloaded_user = store.get_user(100).unwrap().unwrap();
    assert!(reloaded_user.trial_used);

    let trial_schedules = store.list_schedules_by_rule(1).unwrap();
    assert_eq!(trial_schedules.len(), 1);
    assert_eq!(trial_schedules[0].status, ScheduleStatus::Planned);

    let new_user_schedules = store.list_schedules_by_rule(2).unwrap();
    assert_eq!(new_user_schedules.len(), 1);
    assert_eq!(new_user_schedules[0].status, ScheduleStatus::Cancelled);
}

#[tokio::test]
async fn payment_pending_success_issues_a_key() {
    let (store, _dir) = KeywardStore::open_temp();
    let store = Arc::new(store);
    let sink: Arc<dyn MessagingSink> = Arc::new(RecordingSink::new());
    let notify = Arc::new(NotificationEngine::new(store.clone(), sink.clone()));

    let panel_mock = MockServer::start().await;
    mount_panel(&panel_mock, "corsarvpn_200_unknown_1").await;
    store.insert_server(&server_row(1, panel_mock.uri(), false)).unwrap();

    let user = User::new_from_chat_identity(200, None, Utc::now());
    store.insert_user(&user).unwrap();
    store
        .insert_tariff(&Tariff { id: 2, name: "monthly".into(), price: 500, days: 30, discount: None })
        .unwrap();

    let provider_mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/check-status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"confirmed": true})))
        .mount(&provider_mock)
        .await;
    let provider = Arc::new(PaymentProviderClient::new(provider_mock.uri(), "token").unwrap());

    let keys = Arc::new(KeyService::new(store.clone(), notify.clone(), sink.clone(), "corsarvpn".into()));
    let payments = PaymentService::new(store.clone(), keys, provider, sink.clone());

    let now = Utc::now();
    let payment = Payment {
        id: 500,
        label: "L".into(),
        user_id: 200,
        tariff_id: 2,
        amount: 500,
        url: "https://pay.example/500".into(),
        device: Device::Unknown,
        key_id: None,
        promo: None,
        status: PaymentStatus::Pending,
        key_issued_at: None,
        created_at: now - chrono::Duration::minutes(10),
        updated_at: now - chrono::Duration::minutes(10),
        error_reason: None,
    };
    store.insert_payment(&payment).unwrap();

    payments.poll_pending(Utc::now()).await.unwrap();

    let updated = store.get_payment(500).unwrap().unwrap();
    assert_eq!(updated.status, PaymentStatus::Success);
    assert!(updated.key_id.is_some());
    assert!(updated.key_issued_at.is_some());

    let key = store.get_key(updated.key_id.unwrap()).unwrap().unwrap();
    assert_eq!(key.payment_id, Some(500));
    let days_left = (key.finish - Utc::now()).num_days();
    assert!((29..=30).contains(&days_left));
}

#[tokio::test]
async fn recovery_issues_a_key_for_a_success_payment_left_without_one_and_is_idempotent() {
    let (store, _dir) = KeywardStore::open_temp();
    let store = Arc::new(store);
    let sink: Arc<dyn MessagingSink> = Arc::new(RecordingSink::new());
    let notify = Arc::new(NotificationEngine::new(store.clone(), sink.clone()));

    let panel_mock = MockServer::start().await;
    mount_panel(&panel_mock, "corsarvpn_201_unknown_1").await;
    store.insert_server(&server_row(1, panel_mock.uri(), false)).unwrap();

    let user = User::new_from_chat_identity(201, None, Utc::now());
    store.insert_user(&user).unwrap();
    store
        .insert_tariff(&Tariff { id: 3, name: "monthly".into(), price: 500, days: 30, discount: None })
        .unwrap();

    let provider_mock = MockServer::start().await;
    let provider = Arc::new(PaymentProviderClient::new(provider_mock.uri(), "token").unwrap());
    let keys = Arc::new(KeyService::new(store.clone(), notify.clone(), sink.clone(), "corsarvpn".into()));
    let payments = PaymentService::new(store.clone(), keys, provider, sink.clone());

    let now = Utc::now();
    let payment = Payment {
        id: 501,
        label: "L2".into(),
        user_id: 201,
        tariff_id: 3,
        amount: 500,
        url: "https://pay.example/501".into(),
        device: Device::Unknown,
        key_id: None,
        promo: None,
        status: PaymentStatus::Success,
        key_issued_at: None,
        created_at: now,
        updated_at: now,
        error_reason: None,
    };
    store.insert_payment(&payment).unwrap();

    payments.recover().await.unwrap();
    let after_first = store.get_payment(501).unwrap().unwrap();
    assert!(after_first.key_issued_at.is_some());
    let key_id = after_first.key_id.unwrap();

    payments.recover().await.unwrap();
    let after_second = store.get_payment(501).unwrap().unwrap();
    assert_eq!(after_second.key_id, Some(key_id));
    assert_eq!(store.list_keys().unwrap().len(), 1);
}

#[tokio::test]
async fn recovery_marks_a_payment_with_a_missing_tariff_as_error() {
    let (store, _dir) = KeywardStore::open_temp();
    let store = Arc::new(store);
    let sink: Arc<dyn MessagingSink> = Arc::new(RecordingSink::new());
    let notify = Arc::new(NotificationEngine::new(store.clone(), sink.clone()));

    let provider_mock = MockServer::start().await;
    let provider = Arc::new(PaymentProviderClient::new(provider_mock.uri(), "token").unwrap());
    let keys = Arc::new(KeyService::new(store.clone(), notify.clone(), sink.clone(), "corsarvpn".into()));
    let payments = PaymentService::new(store.clone(), keys, provider, sink.clone());

    let now = Utc::now();
    let payment = Payment {
        id: 502,
        label: "L3".into(),
        user_id: 202,
        tariff_id: 99,
        amount: 500,
        url: "https://pay.example/502".into(),
        device: Device::Unknown,
        key_id: None,
        promo: None,
        status: PaymentStatus::Success,
        key_issued_at: None,
        created_at: now,
        updated_at: now,
        error_reason: None,
    };
    store.insert_payment(&payment).unwrap();

    payments.recover().await.unwrap();
    let after = store.get_payment(502).unwrap().unwrap();
    assert_eq!(after.status, PaymentStatus::Error);
    assert!(after.error_reason.is_some());

    payments.recover().await.unwrap();
    let after_again = store.get_payment(502).unwrap().unwrap();
    assert_eq!(after_again.status, PaymentStatus::Error);
}

#[tokio::test]
async fn deactivating_a_rule_cancels_its_planned_schedules_and_reactivating_replants_them() {
    let (store, _dir) = KeywardStore::open_temp();
    let store = Arc::new(store);
    let sink: Arc<dyn MessagingSink> = Arc::new(RecordingSink::new());
    let notify = Arc::new(NotificationEngine::new(store.clone(), sink.clone()));

    let panel_mock = MockServer::start().await;
    store.insert_server(&server_row(1, panel_mock.uri(), false)).unwrap();
    let keys = Arc::new(KeyService::new(store.clone(), notify.clone(), sink.clone(), "corsarvpn".into()));

    for (uid, offset_days) in [(301, 1), (302, 2), (303, 3)] {
        let user = User::new_from_chat_identity(uid, None, Utc::now());
        store.insert_user(&user).unwrap();
        mount_panel(&panel_mock, &format!("corsarvpn_{uid}_unknown_1")).await;
        let key_finish = Clock::now_utc() + chrono::Duration::days(offset_days);
        let key_id = store.next_key_id().unwrap();
        let key = keyward_core::model::Key {
            id: key_id,
            user_id: uid,
            server_id: 1,
            key: "uri".into(),
            device: Device::Unknown,
            name: format!("k{uid}"),
            payment_id: None,
            start: Clock::now_utc(),
            finish: key_finish,
            active: true,
            alerted: false,
            is_test: false,
        };
        store.insert_key(&key).unwrap();
    }
    let _ = &keys;

    let mut rule = text_rule(NotificationType::PaidExpired, 7, Some(0));
    rule = notify.create_rule(rule).unwrap();
    assert_eq!(store.list_schedules_by_rule(7).unwrap().len(), 3);

    rule.is_active = false;
    notify.update_rule(rule.clone()).unwrap();
    let cancelled = store.list_schedules_by_rule(7).unwrap();
    assert!(cancelled.iter().all(|s| s.status == ScheduleStatus::Cancelled));

    rule.is_active = true;
    notify.update_rule(rule).unwrap();
    let replanted: Vec<_> = store
        .list_schedules_by_rule(7)
        .unwrap()
        .into_iter()
        .filter(|s| s.status == ScheduleStatus::Planned)
        .collect();
    assert_eq!(replanted.len(), 3);
}

#[tokio::test]
async fn concurrent_duplicate_schedule_inserts_dedup_to_one_row() {
    let (store, _dir) = KeywardStore::open_temp();
    let store = Arc::new(store);

    let schedule = keyward_core::model::NotificationSchedule {
        id: store.next_schedule_id().unwrap(),
        user_id: 400,
        rule_id: 1,
        planned_at: Utc::now(),
        status: ScheduleStatus::Planned,
        dedup_key: "dup-key".into(),
        sent_at: None,
        last_error: None,
    };
    let mut duplicate = schedule.clone();
    duplicate.id = store.next_schedule_id().unwrap();

    assert!(store.insert_schedule_if_absent(&schedule).unwrap().is_some());
    assert!(store.insert_schedule_if_absent(&duplicate).unwrap().is_none());

    let all = store.list_schedules_by_user(400).unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, schedule.id);
}

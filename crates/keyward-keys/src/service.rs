use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use keyward_core::clock::Clock;
use keyward_core::error::CoreError;
use keyward_core::model::{Device, Key, KeyId, PaymentId, Server, ServerId, UserId};
use keyward_messaging::{Message, MessagingSink};
use keyward_notify::NotificationEngine;
use keyward_panel::PanelClient;
use keyward_store::KeywardStore;
use tracing::warn;

use crate::server_selection::select_server;

fn key_name(prefix: &str, user_id: UserId, device: &str, n: u32) -> String {
    format!("{prefix}_{user_id}_{device}_{n}")
}

/// Provisions, prolongs, and transfers keys, bridging the store and the
/// panel client. One instance per process.
pub struct KeyService {
    pub(crate) store: Arc<KeywardStore>,
    pub(crate) notify: Arc<NotificationEngine>,
    pub(crate) sink: Arc<dyn MessagingSink>,
    pub(crate) panel_prefix: String,
    panel_clients: Mutex<HashMap<ServerId, Arc<PanelClient>>>,
}

pub struct CreateKeyRequest {
    pub user_id: UserId,
    pub finish: DateTime<Utc>,
    pub device: Device,
    pub is_test: bool,
    pub promo: Option<String>,
    pub payment_id: Option<PaymentId>,
}

impl KeyService {
    pub fn new(
        store: Arc<KeywardStore>,
        notify: Arc<NotificationEngine>,
        sink: Arc<dyn MessagingSink>,
        panel_prefix: String,
    ) -> Self {
        Self {
            store,
            notify,
            sink,
            panel_prefix,
            panel_clients: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn panel_for(&self, server: &Server) -> Result<Arc<PanelClient>, CoreError> {
        let mut clients = self.panel_clients.lock().unwrap();
        if let Some(client) = clients.get(&server.id) {
            return Ok(client.clone());
        }
        let client = Arc::new(PanelClient::new(server)?);
        clients.insert(server.id, client.clone());
        Ok(client)
    }

    /// Evict a cached session, e.g. after moving/decommissioning a server.
    pub fn forget_panel_session(&self, server_id: ServerId) {
        self.panel_clients.lock().unwrap().remove(&server_id);
    }

    pub async fn create_key(&self, req: CreateKeyRequest) -> Result<Key, CoreError> {
        let (server, used) = select_server(&self.store, req.is_test)?;
        if used >= server.max_users {
            warn!(server_id = server.id, used, max = server.max_users, "server at or past capacity, issuing anyway");
            let _ = self.sink.send_admins(Message::text(format!(
                "server {} is at capacity ({used}/{})", server.id, server.max_users
            ))).await;
        }

        let n = self.store.next_device_index(req.user_id, req.device.as_str())?;
        let name = key_name(&self.panel_prefix, req.user_id, req.device.as_str(), n);
        let now_civil = Clock::now_civil();
        let finish_civil = Clock::utc_to_civil(req.finish);
        let days = (finish_civil - now_civil).num_days() as i32;

        let panel = self.panel_for(&server)?;
        panel.add_client(&name, days).await?;
        let uri = panel.render_key_uri(&name, &self.panel_prefix).await?;

        let key_id = self.store.next_key_id()?;
        let key = Key {
            id: key_id,
            user_id: req.user_id,
            server_id: server.id,
            key: uri.clone(),
            device: req.device,
            name,
            payment_id: req.payment_id,
            start: Clock::now_utc(),
            finish: req.finish,
            active: true,
            alerted: false,
            is_test: req.is_test,
        };
        self.store.insert_key(&key)?;

        if req.is_test {
            if let Some(mut user) = self.store.get_user(req.user_id)? {
                if !user.trial_used {
                    user.trial_used = true;
                    self.store.update_user(&user)?;
                }
            }
        }

        let _ = self.sink.send(req.user_id, Message::text("Your key is ready.")).await;
        let _ = self.sink.send(req.user_id, Message::text(&uri)).await;

        if let Some(code) = &req.promo {
            if let Some(mut promo) = self.store.get_promo(code)? {
                promo.used_users.insert(req.user_id);
                self.store.update_promo(&promo)?;
            }
        }

        self.notify.sync_user_key_rules(req.user_id, Some(&[key.id]))?;
        if req.is_test {
            self.notify.on_trial_key_created(req.user_id)?;
        } else {
            self.notify.on_paid_key_created(req.user_id)?;
        }

        Ok(key)
    }

    pub async fn prolong_key(&self, key_id: KeyId, days: i32) -> Result<Key, CoreError> {
        let mut key = self
            .store
            .get_key(key_id)?
            .ok_or_else(|| CoreError::not_found(format!("key {key_id} not found")))?;
        let server = self
            .store
            .get_server(key.server_id)?
            .ok_or_else(|| CoreError::not_found(format!("server {} not found", key.server_id)))?;

        let now_civil = Clock::now_civil();
        let finish_civil = Clock::utc_to_civil(key.finish).max(now_civil);
        let new_finish_civil = finish_civil + chrono::Duration::days(days as i64);
        key.finish = Clock::to_store(new_finish_civil);
        self.store.update_key(&key)?;

        let new_days = (new_finish_civil - now_civil).num_days() as i32;
        let panel = self.panel_for(&server)?;
        panel.enable_client(&key.name, new_days).await?;

        key.alerted = false;
        key.active = true;
        self.store.update_key(&key)?;

        let _ = self.sink.send(key.user_id, Message::text("Your key has been extended.")).await;

        if key.is_test {
            self.notify.on_trial_key_prolonged(key.user_id)?;
        } else {
            self.notify.on_paid_key_prolonged(key.user_id)?;
        }
        self.notify.sync_user_key_rules(key.user_id, Some(&[key.id]))?;

        Ok(key)
    }

    pub async fn transfer_key(&self, key_id: KeyId, new_server_id: ServerId) -> Result<Key, CoreError> {
        let mut key = self
            .store
            .get_key(key_id)?
            .ok_or_else(|| CoreError::not_found(format!("key {key_id} not found")))?;
        let old_server = self.store.get_server(key.server_id)?;
        let new_server = self
            .store
            .get_server(new_server_id)?
            .ok_or_else(|| CoreError::not_found(format!("server {new_server_id} not found")))?;

        if let Some(old_server) = old_server {
            let old_panel = self.panel_for(&old_server)?;
            if let Err(e) = old_panel.delete_client(&key.name).await {
                warn!(error = %e, key_id, "failed to delete client from old server during transfer");
            }
        }

        let now_civil = Clock::now_civil();
        let days = (Clock::utc_to_civil(key.finish) - now_civil).num_days() as i32;
        let new_panel = self.panel_for(&new_server)?;
        new_panel.add_client(&key.name, days).await?;
        let uri = new_panel.render_key_uri(&key.name, &self.panel_prefix).await?;

        key.server_id = new_server_id;
        key.key = uri.clone();
        self.store.update_key(&key)?;

        let _ = self.sink.send(key.user_id, Message::text(&uri)).await;
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_name_matches_prefix_user_device_index_shape() {
        assert_eq!(key_name("keyward", 100, "iphone", 1), "keyward_100_iphone_1");
    }
}

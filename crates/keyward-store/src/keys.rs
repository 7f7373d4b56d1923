use keyward_core::error::CoreError;
use keyward_core::model::{Key, KeyId, ServerId, UserId};

use crate::db::KeywardStore;

fn composite(prefix: i64, suffix: i64) -> Vec<u8> {
    let mut out = Vec::with_capacity(16);
    out.extend_from_slice(&prefix.to_be_bytes());
    out.extend_from_slice(&suffix.to_be_bytes());
    out
}

impl KeywardStore {
    pub fn next_key_id(&self) -> Result<KeyId, CoreError> {
        self.next_id("next_key_id")
    }

    pub fn insert_key(&self, key: &Key) -> Result<(), CoreError> {
        let id_bytes = key.id.to_be_bytes();
        Self::put_bincode(&self.keys, &id_bytes, key)?;
        self.keys_by_user
            .insert(composite(key.user_id, key.id), &[])
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        self.keys_by_server
            .insert(composite(key.server_id, key.id), &[])
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        Ok(())
    }

    pub fn get_key(&self, id: KeyId) -> Result<Option<Key>, CoreError> {
        Self::get_bincode(&self.keys, &id.to_be_bytes())
    }

    /// Keys do not change user/server ownership after creation, so updating
    /// the primary row is sufficient — the secondary indexes stay valid.
    pub fn update_key(&self, key: &Key) -> Result<(), CoreError> {
        Self::put_bincode(&self.keys, &key.id.to_be_bytes(), key)
    }

    pub fn list_keys_by_user(&self, user_id: UserId) -> Result<Vec<Key>, CoreError> {
        let prefix = user_id.to_be_bytes();
        let mut out = Vec::new();
        for item in self.keys_by_user.scan_prefix(prefix) {
            let (composite_key, _) = item.map_err(|e| CoreError::Storage(e.to_string()))?;
            let key_id = i64::from_be_bytes(composite_key[8..16].try_into().unwrap());
            if let Some(k) = self.get_key(key_id)? {
                out.push(k);
            }
        }
        Ok(out)
    }

    pub fn list_keys_by_server(&self, server_id: ServerId) -> Result<Vec<Key>, CoreError> {
        let prefix = server_id.to_be_bytes();
        let mut out = Vec::new();
        for item in self.keys_by_server.scan_prefix(prefix) {
            let (composite_key, _) = item.map_err(|e| CoreError::Storage(e.to_string()))?;
            let key_id = i64::from_be_bytes(composite_key[8..16].try_into().unwrap());
            if let Some(k) = self.get_key(key_id)? {
                out.push(k);
            }
        }
        Ok(out)
    }

    pub fn list_keys(&self) -> Result<Vec<Key>, CoreError> {
        Self::iter_bincode(&self.keys)
    }

    /// Remove a key and both of its secondary-index entries (grace-period
    /// cleanup).
    pub fn delete_key(&self, key: &Key) -> Result<(), CoreError> {
        self.keys
            .remove(key.id.to_be_bytes())
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        self.keys_by_user
            .remove(composite(key.user_id, key.id))
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        self.keys_by_server
            .remove(composite(key.server_id, key.id))
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        Ok(())
    }

    pub fn count_active_keys_on_server(&self, server_id: ServerId) -> Result<i32, CoreError> {
        Ok(self
            .list_keys_by_server(server_id)?
            .into_iter()
            .filter(|k| k.active)
            .count() as i32)
    }

    /// Per-`(user_id, device)` sequence used to derive `<prefix>_<user>_<device>_<n>`
    /// key names.
    pub fn next_device_index(&self, user_id: UserId, device: &str) -> Result<u32, CoreError> {
        let counter_key = format!("devidx:{}:{}", user_id, device);
        Ok(self.next_id(&counter_key)? as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use keyward_core::model::Device;

    fn sample_key(id: KeyId, user_id: UserId, server_id: ServerId) -> Key {
        let now = Utc::now();
        Key {
            id,
            user_id,
            server_id,
            key: "vless://example".into(),
            device: Device::Iphone,
            name: format!("keyward_{}_iphone_1", user_id),
            payment_id: None,
            start: now,
            finish: now + Duration::days(1),
            active: true,
            alerted: false,
            is_test: true,
        }
    }

    #[test]
    fn list_keys_by_user_returns_only_that_users_keys() {
        let (store, _dir) = KeywardStore::open_temp();
        store.insert_key(&sample_key(1, 10, 100)).unwrap();
        store.insert_key(&sample_key(2, 10, 100)).unwrap();
        store.insert_key(&sample_key(3, 20, 100)).unwrap();

        let for_ten = store.list_keys_by_user(10).unwrap();
        assert_eq!(for_ten.len(), 2);
        assert!(for_ten.iter().all(|k| k.user_id == 10));
    }

    #[test]
    fn device_index_increments_per_user_and_device() {
        let (store, _dir) = KeywardStore::open_temp();
        assert_eq!(store.next_device_index(1, "iphone").unwrap(), 1);
        assert_eq!(store.next_device_index(1, "iphone").unwrap(), 2);
        assert_eq!(store.next_device_index(1, "android").unwrap(), 1);
    }
}

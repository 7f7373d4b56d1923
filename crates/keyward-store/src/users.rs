use keyward_core::error::CoreError;
use keyward_core::model::{User, UserId};

use crate::db::KeywardStore;

impl KeywardStore {
    pub fn insert_user(&self, user: &User) -> Result<(), CoreError> {
        let key = user.id.to_be_bytes();
        Self::put_bincode(&self.users, &key, user)?;
        if let Some(username) = &user.username {
            self.users_by_username
                .insert(username.as_bytes(), &key)
                .map_err(|e| CoreError::Storage(e.to_string()))?;
        }
        Ok(())
    }

    pub fn get_user(&self, id: UserId) -> Result<Option<User>, CoreError> {
        Self::get_bincode(&self.users, &id.to_be_bytes())
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>, CoreError> {
        let id_bytes = self
            .users_by_username
            .get(username.as_bytes())
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        match id_bytes {
            Some(bytes) => Self::get_bincode(&self.users, &bytes),
            None => Ok(None),
        }
    }

    pub fn update_user(&self, user: &User) -> Result<(), CoreError> {
        self.insert_user(user)
    }

    pub fn list_users(&self) -> Result<Vec<User>, CoreError> {
        Self::iter_bincode(&self.users)
    }

    /// Fetch `user`, or materialize and persist a fresh one from the chat
    /// identity if this is the first time we have seen them.
    pub fn get_or_create_user(
        &self,
        id: UserId,
        username: Option<String>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<(User, bool), CoreError> {
        if let Some(existing) = self.get_user(id)? {
            return Ok((existing, false));
        }
        let user = User::new_from_chat_identity(id, username, now);
        self.insert_user(&user)?;
        Ok((user, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn get_or_create_user_is_idempotent() {
        let (store, _dir) = KeywardStore::open_temp();
        let (first, created) = store
            .get_or_create_user(1, Some("alice".into()), Utc::now())
            .unwrap();
        assert!(created);
        let (second, created_again) = store
            .get_or_create_user(1, Some("someone_else".into()), Utc::now())
            .unwrap();
        assert!(!created_again);
        assert_eq!(first.id, second.id);
        assert_eq!(second.username.as_deref(), Some("alice"));
    }

    #[test]
    fn lookup_by_username_finds_inserted_user() {
        let (store, _dir) = KeywardStore::open_temp();
        store
            .get_or_create_user(7, Some("bob".into()), Utc::now())
            .unwrap();
        let found = store.get_user_by_username("bob").unwrap();
        assert_eq!(found.map(|u| u.id), Some(7));
    }
}

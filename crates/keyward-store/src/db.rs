use std::path::Path;
use std::sync::Mutex;

use keyward_core::error::CoreError;
use serde::{de::DeserializeOwned, Serialize};

/// Persistent state database backed by sled (pure-Rust, no C dependencies).
///
/// Named trees:
///   users, keys, payments, servers, tariffs, promos, text_settings,
///   notification_rules, notification_schedules, notification_log — the
///   primary entity trees, keyed by their own id (bincode-encoded value).
///   keys_by_user, keys_by_server, payments_by_label, schedules_by_dedup,
///   schedules_by_rule, schedules_by_user, schedules_due — secondary
///   indexes, keyed for ordered/prefix iteration (empty-valued membership
///   sets except where noted).
///   meta — id counters and other scalar bookkeeping.
pub struct KeywardStore {
    pub(crate) _db: sled::Db,
    pub(crate) users: sled::Tree,
    pub(crate) users_by_username: sled::Tree,
    pub(crate) keys: sled::Tree,
    pub(crate) keys_by_user: sled::Tree,
    pub(crate) keys_by_server: sled::Tree,
    pub(crate) payments: sled::Tree,
    pub(crate) payments_by_label: sled::Tree,
    pub(crate) servers: sled::Tree,
    pub(crate) tariffs: sled::Tree,
    pub(crate) promos: sled::Tree,
    pub(crate) text_settings: sled::Tree,
    pub(crate) notification_rules: sled::Tree,
    pub(crate) notification_schedules: sled::Tree,
    pub(crate) schedules_by_dedup: sled::Tree,
    pub(crate) schedules_by_rule: sled::Tree,
    pub(crate) schedules_by_user: sled::Tree,
    pub(crate) schedules_due: sled::Tree,
    pub(crate) notification_log: sled::Tree,
    pub(crate) notification_type_catalog: sled::Tree,
    pub(crate) meta: sled::Tree,
    /// Guards the one-shot "notificationtype enum contains every declared
    /// variant" migration — an in-process flag, not a process-wide
    /// singleton lookup (see Design Notes: module-level globals).
    pub(crate) migration_done: Mutex<bool>,
}

fn storage_err(e: impl std::fmt::Display) -> CoreError {
    CoreError::Storage(e.to_string())
}

fn ser_err(e: impl std::fmt::Display) -> CoreError {
    CoreError::Serialization(e.to_string())
}

impl KeywardStore {
    /// Open or create the state database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CoreError> {
        let db = sled::open(path).map_err(storage_err)?;
        macro_rules! tree {
            ($name:literal) => {
                db.open_tree($name).map_err(storage_err)?
            };
        }
        Ok(Self {
            users: tree!("users"),
            users_by_username: tree!("users_by_username"),
            keys: tree!("keys"),
            keys_by_user: tree!("keys_by_user"),
            keys_by_server: tree!("keys_by_server"),
            payments: tree!("payments"),
            payments_by_label: tree!("payments_by_label"),
            servers: tree!("servers"),
            tariffs: tree!("tariffs"),
            promos: tree!("promos"),
            text_settings: tree!("text_settings"),
            notification_rules: tree!("notification_rules"),
            notification_schedules: tree!("notification_schedules"),
            schedules_by_dedup: tree!("schedules_by_dedup"),
            schedules_by_rule: tree!("schedules_by_rule"),
            schedules_by_user: tree!("schedules_by_user"),
            schedules_due: tree!("schedules_due"),
            notification_log: tree!("notification_log"),
            notification_type_catalog: tree!("notification_type_catalog"),
            meta: tree!("meta"),
            migration_done: Mutex::new(false),
            _db: db,
        })
    }

    /// Open a throwaway database for tests.
    #[cfg(any(test, feature = "test-util"))]
    pub fn open_temp() -> (Self, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Self::open(dir.path()).expect("open store");
        (store, dir)
    }

    pub fn flush(&self) -> Result<(), CoreError> {
        self._db.flush().map_err(storage_err)?;
        Ok(())
    }

    // ── Generic helpers used by every per-entity module ──────────────────────

    pub(crate) fn get_bincode<T: DeserializeOwned>(
        tree: &sled::Tree,
        key: &[u8],
    ) -> Result<Option<T>, CoreError> {
        match tree.get(key).map_err(storage_err)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn put_bincode<T: Serialize>(
        tree: &sled::Tree,
        key: &[u8],
        value: &T,
    ) -> Result<(), CoreError> {
        let bytes = bincode::serialize(value).map_err(ser_err)?;
        tree.insert(key, bytes).map_err(storage_err)?;
        Ok(())
    }

    pub(crate) fn iter_bincode<T: DeserializeOwned>(tree: &sled::Tree) -> Result<Vec<T>, CoreError> {
        let mut out = Vec::new();
        for item in tree.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(bincode::deserialize(&bytes).map_err(ser_err)?);
        }
        Ok(out)
    }

    /// Allocate the next sequential id for `counter_key` (1-based).
    pub(crate) fn next_id(&self, counter_key: &str) -> Result<i64, CoreError> {
        let current = self
            .meta
            .get(counter_key)
            .map_err(storage_err)?
            .map(|b| {
                let mut arr = [0u8; 8];
                arr.copy_from_slice(&b[..8]);
                i64::from_be_bytes(arr)
            })
            .unwrap_or(0);
        let next = current + 1;
        self.meta
            .insert(counter_key, &next.to_be_bytes())
            .map_err(storage_err)?;
        Ok(next)
    }

    /// Additive migration: ensure every declared `NotificationType` variant
    /// is registered in the catalog tree. Mirrors `ALTER TYPE ... ADD VALUE
    /// IF NOT EXISTS` against a relational `notificationtype` enum; here
    /// there is no schema to alter, so this records the variant set so a
    /// future relational backend has a log of what has already run.
    /// Executed at most once per process.
    pub fn ensure_notification_type_variants(&self) -> Result<(), CoreError> {
        let mut done = self.migration_done.lock().unwrap();
        if *done {
            return Ok(());
        }
        for variant in keyward_core::model::NotificationType::all() {
            let key = variant.as_str().as_bytes();
            if !self
                .notification_type_catalog
                .contains_key(key)
                .map_err(storage_err)?
            {
                self.notification_type_catalog
                    .insert(key, b"".as_ref())
                    .map_err(storage_err)?;
            }
        }
        *done = true;
        Ok(())
    }
}

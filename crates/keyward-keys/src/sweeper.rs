use chrono::{DateTime, Utc};
use keyward_core::constants::{ALERT_WINDOW_MAX_HOURS, ALERT_WINDOW_MIN_HOURS, KEY_GRACE_PERIOD_HOURS};
use tracing::{error, warn};

use crate::service::KeyService;

impl KeyService {
    /// Runs every 60s. Alerts keys entering their expiry window, disables
    /// keys that just expired, and garbage-collects keys overdue by the
    /// grace period.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<(), keyward_core::error::CoreError> {
        for mut key in self.store.list_keys()? {
            if key.active && key.finish <= now {
                let Some(server) = self.store.get_server(key.server_id)? else {
                    warn!(key_id = key.id, "sweeper: server missing for expired key");
                    continue;
                };
                let panel = self.panel_for(&server)?;
                if let Err(e) = panel.disable_client(&key.name).await {
                    error!(error = %e, key_id = key.id, "sweeper: failed to disable expired key on panel");
                }
                key.active = false;
                self.store.update_key(&key)?;
                continue;
            }

            if key.finish > now {
                let remaining_minutes = (key.finish - now).num_minutes();
                let remaining_hours = remaining_minutes / 60;
                if !key.alerted
                    && remaining_hours >= ALERT_WINDOW_MIN_HOURS
                    && remaining_hours <= ALERT_WINDOW_MAX_HOURS
                {
                    key.alerted = true;
                    self.store.update_key(&key)?;
                }
            }

            if now - key.finish >= chrono::Duration::hours(KEY_GRACE_PERIOD_HOURS) {
                if let Some(server) = self.store.get_server(key.server_id)? {
                    let panel = self.panel_for(&server)?;
                    if let Err(e) = panel.disable_client(&key.name).await {
                        warn!(error = %e, key_id = key.id, "sweeper: disable during grace cleanup failed");
                    }
                    if let Err(e) = panel.delete_client(&key.name).await {
                        warn!(error = %e, key_id = key.id, "sweeper: delete during grace cleanup failed");
                    }
                }
                self.store.delete_key(&key)?;
            }
        }
        Ok(())
    }
}

use keyward_core::error::CoreError;
use keyward_core::model::{Promo, Server, ServerId, Tariff, TariffId, TextSettings};

use crate::db::KeywardStore;

const TEXT_SETTINGS_KEY: &[u8] = b"singleton";

impl KeywardStore {
    // ── Servers ───────────────────────────────────────────────────────────

    pub fn next_server_id(&self) -> Result<ServerId, CoreError> {
        self.next_id("next_server_id")
    }

    pub fn insert_server(&self, server: &Server) -> Result<(), CoreError> {
        Self::put_bincode(&self.servers, &server.id.to_be_bytes(), server)
    }

    pub fn get_server(&self, id: ServerId) -> Result<Option<Server>, CoreError> {
        Self::get_bincode(&self.servers, &id.to_be_bytes())
    }

    pub fn update_server(&self, server: &Server) -> Result<(), CoreError> {
        self.insert_server(server)
    }

    pub fn list_servers(&self) -> Result<Vec<Server>, CoreError> {
        Self::iter_bincode(&self.servers)
    }

    // ── Tariffs ───────────────────────────────────────────────────────────

    pub fn next_tariff_id(&self) -> Result<TariffId, CoreError> {
        self.next_id("next_tariff_id")
    }

    pub fn insert_tariff(&self, tariff: &Tariff) -> Result<(), CoreError> {
        Self::put_bincode(&self.tariffs, &tariff.id.to_be_bytes(), tariff)
    }

    pub fn get_tariff(&self, id: TariffId) -> Result<Option<Tariff>, CoreError> {
        Self::get_bincode(&self.tariffs, &id.to_be_bytes())
    }

    pub fn list_tariffs(&self) -> Result<Vec<Tariff>, CoreError> {
        Self::iter_bincode(&self.tariffs)
    }

    // ── Promos ────────────────────────────────────────────────────────────

    pub fn insert_promo(&self, promo: &Promo) -> Result<(), CoreError> {
        Self::put_bincode(&self.promos, promo.code.as_bytes(), promo)
    }

    pub fn get_promo(&self, code: &str) -> Result<Option<Promo>, CoreError> {
        Self::get_bincode(&self.promos, code.as_bytes())
    }

    pub fn update_promo(&self, promo: &Promo) -> Result<(), CoreError> {
        self.insert_promo(promo)
    }

    pub fn list_promos(&self) -> Result<Vec<Promo>, CoreError> {
        Self::iter_bincode(&self.promos)
    }

    // ── Text settings (singleton) ────────────────────────────────────────

    pub fn get_text_settings(&self) -> Result<TextSettings, CoreError> {
        Ok(Self::get_bincode(&self.text_settings, TEXT_SETTINGS_KEY)?.unwrap_or_default())
    }

    pub fn put_text_settings(&self, settings: &TextSettings) -> Result<(), CoreError> {
        Self::put_bincode(&self.text_settings, TEXT_SETTINGS_KEY, settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_settings_defaults_when_unset() {
        let (store, _dir) = KeywardStore::open_temp();
        let settings = store.get_text_settings().unwrap();
        assert_eq!(settings.test_hours, 24);
    }

    #[test]
    fn promo_round_trips_by_code() {
        let (store, _dir) = KeywardStore::open_temp();
        let promo = Promo {
            code: "WELCOME10".into(),
            price: 10,
            user_cap: None,
            expires_at: None,
            tariff_whitelist: Default::default(),
            used_users: Default::default(),
        };
        store.insert_promo(&promo).unwrap();
        let found = store.get_promo("WELCOME10").unwrap();
        assert_eq!(found.map(|p| p.price), Some(10));
    }
}

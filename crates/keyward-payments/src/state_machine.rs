use std::sync::Arc;

use chrono::{DateTime, Utc};
use keyward_core::clock::Clock;
use keyward_core::constants::PAYMENT_PENDING_TIMEOUT_MINUTES;
use keyward_core::error::CoreError;
use keyward_core::model::{Device, Payment, PaymentId, PaymentStatus};
use keyward_keys::{CreateKeyRequest, KeyService};
use keyward_messaging::{Message, MessagingSink};
use keyward_store::KeywardStore;
use tracing::warn;

use crate::provider::PaymentProviderClient;

/// Drives the `pending → success → key_issued` / `pending → error` /
/// `pending → expired-deleted` state machine.
pub struct PaymentService {
    pub(crate) store: Arc<KeywardStore>,
    keys: Arc<KeyService>,
    provider: Arc<PaymentProviderClient>,
    sink: Arc<dyn MessagingSink>,
}

impl PaymentService {
    pub fn new(
        store: Arc<KeywardStore>,
        keys: Arc<KeyService>,
        provider: Arc<PaymentProviderClient>,
        sink: Arc<dyn MessagingSink>,
    ) -> Self {
        Self { store, keys, provider, sink }
    }

    pub(crate) fn provider(&self) -> &Arc<PaymentProviderClient> {
        &self.provider
    }

    /// C7 ticks this every 25s.
    pub async fn poll_pending(&self, now: DateTime<Utc>) -> Result<(), CoreError> {
        for mut payment in self.store.list_pending_payments()? {
            if self.provider.check_status(&payment.label).await {
                payment.status = PaymentStatus::Success;
                payment.updated_at = now;
                self.store.update_payment(&payment)?;
                if let Err(e) = self.issue(&mut payment).await {
                    warn!(error = %e, payment_id = payment.id, "issue failed after poll confirmed payment");
                }
            } else if now - payment.created_at >= chrono::Duration::minutes(PAYMENT_PENDING_TIMEOUT_MINUTES) {
                self.store.delete_payment(&payment)?;
            }
        }
        Ok(())
    }

    /// C7 ticks this every 60s — covers crashes between `mark_success` and
    /// `mark_key_issued`.
    pub async fn recover(&self) -> Result<(), CoreError> {
        for mut payment in self.store.list_success_without_key()? {
            if let Err(e) = self.issue(&mut payment).await {
                warn!(error = %e, payment_id = payment.id, "recovery issue failed, will retry next tick");
            }
        }
        Ok(())
    }

    fn find_key_by_payment(&self, payment_id: PaymentId) -> Result<Option<keyward_core::model::Key>, CoreError> {
        Ok(self
            .store
            .list_keys()?
            .into_iter()
            .find(|k| k.payment_id == Some(payment_id)))
    }

    fn mark_key_issued(&self, payment: &mut Payment, key_id: i64) -> Result<(), CoreError> {
        payment.key_id = Some(key_id);
        payment.key_issued_at = Some(Clock::now_utc());
        payment.updated_at = Clock::now_utc();
        self.store.update_payment(payment)
    }

    async fn resend_and_mark(&self, payment: &mut Payment, key_id: i64, uri: &str) -> Result<(), CoreError> {
        // Resend is best-effort: even a failed send still marks issued.
        let _ = self.sink.send(payment.user_id, Message::text(uri)).await;
        self.mark_key_issued(payment, key_id)
    }

    /// Idempotent; safe under concurrent invocation for the same payment.
    pub async fn issue(&self, payment: &mut Payment) -> Result<(), CoreError> {
        if payment.key_issued_at.is_some() {
            return Ok(());
        }

        if let Some(key_id) = payment.key_id {
            match self.store.get_key(key_id)? {
                Some(key) if key.payment_id == Some(payment.id) => {
                    let uri = key.key.clone();
                    return self.resend_and_mark(payment, key_id, &uri).await;
                }
                Some(_) => {
                    // Not linked to this payment: a prolongation, handled below.
                }
                None => {
                    warn!(payment_id = payment.id, key_id, "issue: referenced key missing, falling through to create");
                }
            }
        }

        if let Some(existing) = self.find_key_by_payment(payment.id)? {
            let uri = existing.key.clone();
            return self.resend_and_mark(payment, existing.id, &uri).await;
        }

        let tariff = match self.store.get_tariff(payment.tariff_id)? {
            Some(t) => t,
            None => {
                payment.status = PaymentStatus::Error;
                payment.error_reason = Some("tariff not found".into());
                payment.updated_at = Clock::now_utc();
                self.store.update_payment(payment)?;
                let _ = self
                    .sink
                    .send_admins(Message::text(format!(
                        "payment {} references missing tariff {}",
                        payment.id, payment.tariff_id
                    )))
                    .await;
                return Ok(());
            }
        };

        let device = if payment.device == Device::Unknown {
            match payment.key_id.and_then(|id| self.store.get_key(id).ok().flatten()) {
                Some(existing_key) => existing_key.device,
                None => Device::Unknown,
            }
        } else {
            payment.device
        };

        match payment.key_id {
            None => {
                let now_civil = Clock::now_civil();
                let finish = Clock::to_store(now_civil + chrono::Duration::days(tariff.days as i64));
                let key = self
                    .keys
                    .create_key(CreateKeyRequest {
                        user_id: payment.user_id,
                        finish,
                        device,
                        is_test: false,
                        promo: payment.promo.clone(),
                        payment_id: Some(payment.id),
                    })
                    .await?;
                self.mark_key_issued(payment, key.id)
            }
            Some(key_id) => {
                let key = self.keys.prolong_key(key_id, tariff.days).await?;
                self.mark_key_issued(payment, key.id)
            }
        }
    }
}

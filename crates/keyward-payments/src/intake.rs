use keyward_core::clock::Clock;
use keyward_core::error::CoreError;
use keyward_core::model::{Device, KeyId, Payment, PaymentId, PaymentStatus, TariffId, UserId};
use uuid::Uuid;

use crate::state_machine::PaymentService;

impl PaymentService {
    /// `create-paid-payment` front-end event: validates the
    /// tariff and an optional promo, opens a provider intent, and persists
    /// the `pending` payment.
    pub async fn create_payment(
        &self,
        user_id: UserId,
        tariff_id: TariffId,
        device: Device,
        key_id: Option<KeyId>,
        promo_code: Option<String>,
    ) -> Result<Payment, CoreError> {
        let tariff = self
            .store
            .get_tariff(tariff_id)?
            .ok_or_else(|| CoreError::not_found(format!("tariff {tariff_id} not found")))?;

        let mut amount = tariff.price;
        if let Some(code) = &promo_code {
            let promo = self
                .store
                .get_promo(code)?
                .ok_or_else(|| CoreError::validation(format!("promo code {code} not found")))?;
            let now = Clock::now_utc();
            if !promo.is_usable_by(user_id, now) {
                return Err(CoreError::validation("promo code is not usable by this user"));
            }
            if !promo.applies_to_tariff(tariff_id) {
                return Err(CoreError::validation("promo code does not apply to this tariff"));
            }
            amount = amount - (amount * promo.price as i64 / 100);
        }

        let label = Uuid::new_v4().to_string();
        let url = self
            .provider()
            .create_intent("keyward", &tariff.name, amount, &label)
            .await?;

        let now = Clock::now_utc();
        let id = self.store.next_payment_id()?;
        let payment = Payment {
            id,
            label,
            user_id,
            tariff_id,
            amount,
            url,
            device,
            key_id,
            promo: promo_code,
            status: PaymentStatus::Pending,
            key_issued_at: None,
            created_at: now,
            updated_at: now,
            error_reason: None,
        };
        self.store.insert_payment(&payment)?;
        Ok(payment)
    }

    /// `cancel-payment` front-end event. Only a still-`pending` payment can
    /// be cancelled; anything past that point is following the recovery
    /// pipeline and must run to completion.
    pub async fn cancel_payment(&self, payment_id: PaymentId) -> Result<(), CoreError> {
        let payment = self
            .store
            .get_payment(payment_id)?
            .ok_or_else(|| CoreError::not_found(format!("payment {payment_id} not found")))?;
        if payment.status != PaymentStatus::Pending {
            return Err(CoreError::validation("only a pending payment can be cancelled"));
        }
        self.store.delete_payment(&payment)
    }
}

use keyward_core::error::CoreError;
use keyward_core::model::{Payment, PaymentId, PaymentStatus};

use crate::db::KeywardStore;

impl KeywardStore {
    pub fn next_payment_id(&self) -> Result<PaymentId, CoreError> {
        self.next_id("next_payment_id")
    }

    pub fn insert_payment(&self, payment: &Payment) -> Result<(), CoreError> {
        let id_bytes = payment.id.to_be_bytes();
        Self::put_bincode(&self.payments, &id_bytes, payment)?;
        self.payments_by_label
            .insert(payment.label.as_bytes(), &id_bytes)
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        Ok(())
    }

    pub fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>, CoreError> {
        Self::get_bincode(&self.payments, &id.to_be_bytes())
    }

    pub fn get_payment_by_label(&self, label: &str) -> Result<Option<Payment>, CoreError> {
        let id_bytes = self
            .payments_by_label
            .get(label.as_bytes())
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        match id_bytes {
            Some(bytes) => Self::get_bincode(&self.payments, &bytes),
            None => Ok(None),
        }
    }

    /// Label is immutable after creation, so only the primary row needs
    /// rewriting.
    pub fn update_payment(&self, payment: &Payment) -> Result<(), CoreError> {
        Self::put_bincode(&self.payments, &payment.id.to_be_bytes(), payment)
    }

    pub fn list_payments(&self) -> Result<Vec<Payment>, CoreError> {
        Self::iter_bincode(&self.payments)
    }

    pub fn list_pending_payments(&self) -> Result<Vec<Payment>, CoreError> {
        Ok(self
            .list_payments()?
            .into_iter()
            .filter(|p| p.status == PaymentStatus::Pending)
            .collect())
    }

    /// Drop a payment that timed out in `pending` without confirmation.
    pub fn delete_payment(&self, payment: &Payment) -> Result<(), CoreError> {
        self.payments
            .remove(payment.id.to_be_bytes())
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        self.payments_by_label
            .remove(payment.label.as_bytes())
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Payments that reached `success` but have no `key_issued_at` — the
    /// recovery sweep's target set.
    pub fn list_success_without_key(&self) -> Result<Vec<Payment>, CoreError> {
        Ok(self
            .list_payments()?
            .into_iter()
            .filter(|p| p.status == PaymentStatus::Success && p.key_issued_at.is_none())
            .collect())
    }
}

use crate::domain::money::{Amount, Currency};
use crate::domain::payment::{CompletionEvent, Payment, PaymentStatus, Transition};
use crate::domain::ports::{SharedPaymentStore, StatusUpdate};
use crate::error::{PaymentError, Result};
use chrono::Utc;

/// Canonical record of each payment attempt and its append-only history.
///
/// All status mutation funnels through `apply_status`, whose transition
/// decision happens inside the store's atomic write. The ledger is the single
/// emission point of [`CompletionEvent`]s: one per payment, on its first
/// transition into `Completed`, which is what makes downstream delivery
/// exactly-once even under at-least-once notification delivery.
pub struct PaymentLedger {
    store: SharedPaymentStore,
}

impl PaymentLedger {
    pub fn new(store: SharedPaymentStore) -> Self {
        Self { store }
    }

    /// Persists a new payment attempt in `Pending` with its initial history
    /// entry.
    pub async fn create_payment(
        &self,
        order_id: &str,
        amount: Amount,
        currency: Currency,
        merchant_id: &str,
        legacy_ref: Option<String>,
    ) -> Result<Payment> {
        let payment = Payment::new(order_id, amount, currency, merchant_id, legacy_ref, Utc::now());
        self.store.insert(payment.clone()).await?;
        tracing::info!(order_id, merchant = merchant_id, "created payment");
        Ok(payment)
    }

    /// Applies one status update and reports what happened. Idempotent for
    /// duplicates and for updates targeting a terminal payment; both leave
    /// the authoritative status untouched.
    pub async fn apply_status(
        &self,
        order_id: &str,
        next: PaymentStatus,
        message: Option<String>,
        source: &str,
    ) -> Result<StatusUpdate> {
        let update = self
            .store
            .apply_status(order_id, next, message, source, Utc::now())
            .await?;

        match update.transition {
            Transition::Applied { completed_now } => {
                tracing::info!(
                    order_id,
                    status = next.as_str(),
                    source,
                    completed_now,
                    "applied payment status"
                );
            }
            Transition::AlreadyCurrent => {
                tracing::debug!(order_id, status = next.as_str(), source, "duplicate status");
            }
            Transition::Rejected => {
                tracing::debug!(
                    order_id,
                    current = update.payment.status.as_str(),
                    rejected = next.as_str(),
                    source,
                    "out-of-order status recorded informationally"
                );
            }
        }
        Ok(update)
    }

    /// Lookup by primary id, falling back to the legacy alias.
    pub async fn find_by_order(&self, order_id: &str) -> Result<Payment> {
        self.store
            .get(order_id)
            .await?
            .ok_or_else(|| PaymentError::NotFoundError(format!("payment {order_id}")))
    }

    /// Adopts the provider's reference. Write-once; repeated calls keep the
    /// first value.
    pub async fn set_external_reference(&self, order_id: &str, reference: &str) -> Result<Payment> {
        self.store.set_external_reference(order_id, reference).await
    }
}

/// The completion carried by an applied update, if this update was the one
/// that first completed the payment.
pub fn completion_of(update: &StatusUpdate) -> Option<CompletionEvent> {
    update.transition.completed_now().then(|| CompletionEvent {
        payment: update.payment.clone(),
    })
}

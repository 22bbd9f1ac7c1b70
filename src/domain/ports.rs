use super::control_number::{CodeStatus, ControlNumber, RedeemerInfo};
use super::money::{Amount, Currency};
use super::payment::{Payment, PaymentStatus, Transition};
use super::service::ServiceEntitlement;
use crate::error::{ProviderError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Result of applying one status update: the record afterwards and what the
/// state machine decided about the update.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub payment: Payment,
    pub transition: Transition,
}

/// Repository of issued control numbers, keyed by code.
///
/// `redeem`, `extend_validity`, `cancel` and `expire_due` are atomic
/// conditional writes: the store re-checks the domain predicates inside its
/// own critical section, so concurrent redeemers of one code can never both
/// succeed.
#[async_trait]
pub trait ControlNumberStore: Send + Sync {
    /// Fails `ConflictError("code exists")` when the code is already taken.
    async fn insert(&self, cn: ControlNumber) -> Result<()>;

    async fn get(&self, code: &str) -> Result<Option<ControlNumber>>;

    /// The single redemption path. Succeeds only if, at write time, the code
    /// is active with uses left; `ExpiredError` past either time window,
    /// `ConflictError("already_used")` otherwise.
    async fn redeem(
        &self,
        code: &str,
        payment_ref: &str,
        redeemer: RedeemerInfo,
        now: DateTime<Utc>,
    ) -> Result<ControlNumber>;

    /// Permitted only while active.
    async fn extend_validity(
        &self,
        code: &str,
        extra: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<ControlNumber>;

    /// Archives an active code. Permitted only while active.
    async fn cancel(&self, code: &str, now: DateTime<Utc>) -> Result<ControlNumber>;

    /// Marks active codes past expiry as expired. Idempotent; returns the
    /// number of codes swept.
    async fn expire_due(&self, now: DateTime<Utc>) -> Result<u64>;

    async fn find_by_merchant(
        &self,
        merchant_id: &str,
        status: Option<CodeStatus>,
    ) -> Result<Vec<ControlNumber>>;
}

/// Repository of payment attempts, keyed by order id with a legacy alias
/// index.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Fails `ConflictError` on a duplicate order id.
    async fn insert(&self, payment: Payment) -> Result<()>;

    /// Looks up by primary id, falling back to the legacy alias.
    async fn get(&self, order_id: &str) -> Result<Option<Payment>>;

    /// Applies one status update under the store's atomic primitive. The
    /// transition decision (terminal stickiness, idempotent no-ops) is made
    /// at write time; rejected updates are still appended to history as
    /// informational entries.
    async fn apply_status(
        &self,
        order_id: &str,
        next: PaymentStatus,
        message: Option<String>,
        source: &str,
        now: DateTime<Utc>,
    ) -> Result<StatusUpdate>;

    /// Write-once: a payment that already has an external reference keeps it.
    async fn set_external_reference(&self, order_id: &str, reference: &str) -> Result<Payment>;

    async fn find_by_status(&self, status: PaymentStatus) -> Result<Vec<Payment>>;
}

/// Repository of service entitlements.
#[async_trait]
pub trait ServiceStore: Send + Sync {
    async fn insert(&self, service: ServiceEntitlement) -> Result<()>;

    async fn get(&self, service_id: &str) -> Result<Option<ServiceEntitlement>>;

    async fn update(&self, service: ServiceEntitlement) -> Result<()>;

    /// Entitlements still awaiting delivery for the given payment.
    async fn pending_for_payment(&self, payment_id: &str) -> Result<Vec<ServiceEntitlement>>;

    /// Bumps the access counter of a granted check.
    async fn record_access(&self, service_id: &str) -> Result<()>;

    /// Marks active entitlements past `expires_at` as expired. Idempotent;
    /// returns the number swept.
    async fn expire_due(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// What a rail returns when asked to start collecting a payment.
#[derive(Debug, Clone)]
pub struct ProviderReceipt {
    pub external_reference: String,
    pub provider_status: String,
}

/// Abstract boundary to an external payment rail. The only suspension points
/// that block on external I/O; callers wrap every call in a bounded timeout.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Key into the reconciliation vocabulary tables.
    fn name(&self) -> &str;

    async fn initiate_payment(
        &self,
        order_id: &str,
        amount: &Amount,
        currency: Currency,
        payer: &RedeemerInfo,
    ) -> std::result::Result<ProviderReceipt, ProviderError>;

    /// Raw provider-specific status string for the given order.
    async fn query_status(&self, order_id: &str) -> std::result::Result<String, ProviderError>;
}

pub type SharedControlNumberStore = Arc<dyn ControlNumberStore>;
pub type SharedPaymentStore = Arc<dyn PaymentStore>;
pub type SharedServiceStore = Arc<dyn ServiceStore>;
pub type SharedProviderAdapter = Arc<dyn ProviderAdapter>;

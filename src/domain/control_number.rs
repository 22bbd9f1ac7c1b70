use super::money::{Amount, Currency};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Payment channels a control number may constrain redemption to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    MobileMoney,
    Bank,
    Card,
    #[default]
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeStatus {
    Active,
    Used,
    Expired,
    Cancelled,
}

impl CodeStatus {
    /// Terminal statuses admit no further transition.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

/// Identity of whoever redeemed a code, as reported by the channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RedeemerInfo {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub reference: Option<String>,
}

/// Request to issue a new control number.
#[derive(Debug, Clone)]
pub struct CodeSpec {
    pub amount: rust_decimal::Decimal,
    pub currency: Option<Currency>,
    pub method: PaymentMethod,
    pub customer: Option<RedeemerInfo>,
    /// Payment window. Defaults to the configured 24h.
    pub expires_in: Option<chrono::Duration>,
    /// Overall validity window. Defaults to the configured 7d.
    pub valid_for: Option<chrono::Duration>,
    pub is_reusable: bool,
    pub max_uses: Option<u32>,
    /// Name of the service entitlement a successful payment unlocks.
    pub service: Option<String>,
}

impl CodeSpec {
    pub fn for_amount(amount: rust_decimal::Decimal) -> Self {
        Self {
            amount,
            currency: None,
            method: PaymentMethod::Any,
            customer: None,
            expires_in: None,
            valid_for: None,
            is_reusable: false,
            max_uses: None,
            service: None,
        }
    }
}

/// A merchant-issued, time-boxed redemption code bound to a fixed monetary
/// commitment.
///
/// Immutable value object: state changes go through the owning store's
/// conditional writes, which re-check the predicates below at write time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlNumber {
    pub code: String,
    pub amount: Amount,
    pub currency: Currency,
    pub method: PaymentMethod,
    pub merchant_id: String,
    pub customer: Option<RedeemerInfo>,
    pub status: CodeStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub is_reusable: bool,
    pub max_uses: u32,
    pub current_uses: u32,
    pub used_at: Option<DateTime<Utc>>,
    pub redeemed_by: Option<RedeemerInfo>,
    /// Order id of the payment attempt the last redemption produced.
    pub payment_ref: Option<String>,
    pub batch_id: Option<String>,
    pub service: Option<String>,
}

impl ControlNumber {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at || now > self.valid_until
    }

    /// Usable only while active, inside both time windows, with uses left.
    pub fn can_be_used(&self, now: DateTime<Utc>) -> bool {
        self.status == CodeStatus::Active
            && !self.is_expired(now)
            && self.current_uses < self.max_uses
    }

    /// The value after a successful redemption. The store applies this only
    /// when the atomic precondition held at write time.
    pub fn redeemed(
        self,
        payment_ref: &str,
        redeemer: RedeemerInfo,
        now: DateTime<Utc>,
    ) -> Self {
        let current_uses = self.current_uses + 1;
        let status = if self.is_reusable && current_uses < self.max_uses {
            CodeStatus::Active
        } else {
            CodeStatus::Used
        };
        Self {
            status,
            current_uses,
            used_at: Some(now),
            redeemed_by: Some(redeemer),
            payment_ref: Some(payment_ref.to_string()),
            ..self
        }
    }
}

/// Why a code failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    NotFound,
    Inactive,
    Expired,
    Exhausted,
    AmountMismatch,
}

/// Read-only answer of `validate`. Repeatable without side effects.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum ValidationOutcome {
    Valid { amount: Amount, currency: Currency },
    Invalid { reason: InvalidReason },
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }
}

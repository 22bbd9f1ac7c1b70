use super::money::{Amount, Currency};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    /// Terminal states never change once reached.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// One entry of a payment's append-only history.
///
/// `applied` distinguishes entries that became the authoritative status from
/// updates rejected by terminal stickiness or ordering, which are kept for
/// the record only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub status: PaymentStatus,
    pub at: DateTime<Utc>,
    pub source: String,
    pub message: Option<String>,
    pub applied: bool,
}

/// Decision of the status state machine for one incoming update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The update becomes the authoritative status. `completed_now` is true
    /// only on the first entry into `Completed`, the single point that may
    /// trigger service delivery.
    Applied { completed_now: bool },
    /// The stored status already equals the update. Idempotent no-op.
    AlreadyCurrent,
    /// Terminal stickiness or a backward move; recorded informationally.
    Rejected,
}

impl Transition {
    pub fn completed_now(&self) -> bool {
        matches!(self, Self::Applied { completed_now: true })
    }

    pub fn was_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// Pure state-machine decision: `pending → processing → terminal`, with
/// `pending` allowed to jump straight to any terminal state. Everything the
/// machine has no edge for is rejected, which is what makes duplicated and
/// out-of-order notifications harmless.
pub fn plan_transition(current: PaymentStatus, next: PaymentStatus) -> Transition {
    use PaymentStatus::*;

    if current == next {
        return Transition::AlreadyCurrent;
    }
    if current.is_terminal() {
        return Transition::Rejected;
    }
    let allowed = match (current, next) {
        (Pending, Processing) => true,
        (Pending, Completed | Failed | Cancelled) => true,
        (Processing, Completed | Failed | Cancelled) => true,
        _ => false,
    };
    if allowed {
        Transition::Applied {
            completed_now: next == Completed,
        }
    } else {
        Transition::Rejected
    }
}

/// A payment attempt produced by redeeming a control number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub order_id: String,
    /// Secondary id kept for callers still addressing by the old scheme.
    pub legacy_ref: Option<String>,
    pub amount: Amount,
    pub currency: Currency,
    pub merchant_id: String,
    pub status: PaymentStatus,
    pub history: Vec<StatusEntry>,
    /// Assigned once by the provider; later values are ignored.
    pub external_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn new(
        order_id: &str,
        amount: Amount,
        currency: Currency,
        merchant_id: &str,
        legacy_ref: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id: order_id.to_string(),
            legacy_ref,
            amount,
            currency,
            merchant_id: merchant_id.to_string(),
            status: PaymentStatus::Pending,
            history: vec![StatusEntry {
                status: PaymentStatus::Pending,
                at: now,
                source: "created".to_string(),
                message: None,
                applied: true,
            }],
            external_reference: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Emitted exactly once per payment, on its first transition into
/// `Completed`. Consumed by the service delivery dispatcher.
#[derive(Debug, Clone)]
pub struct CompletionEvent {
    pub payment: Payment,
}

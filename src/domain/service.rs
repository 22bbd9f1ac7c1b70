use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Pending,
    Active,
    Expired,
    Cancelled,
    Suspended,
}

/// Outcome of the delivery attempt for one entitlement. A failure here is
/// per-entity and never blocks delivery of siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    #[default]
    Pending,
    Delivered,
    Failed,
}

/// An entitlement unlocked by a payment. Holds a weak reference to its
/// originating payment by order id, not ownership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceEntitlement {
    pub service_id: String,
    pub payment_id: String,
    pub name: String,
    pub status: ServiceStatus,
    pub delivery_status: DeliveryStatus,
    pub delivery_error: Option<String>,
    pub access_token: Option<String>,
    pub access_granted_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub access_count: u64,
    pub created_at: DateTime<Utc>,
}

impl ServiceEntitlement {
    pub fn new(service_id: &str, payment_id: &str, name: &str, now: DateTime<Utc>) -> Self {
        Self {
            service_id: service_id.to_string(),
            payment_id: payment_id.to_string(),
            name: name.to_string(),
            status: ServiceStatus::Pending,
            delivery_status: DeliveryStatus::Pending,
            delivery_error: None,
            access_token: None,
            access_granted_at: None,
            expires_at: None,
            access_count: 0,
            created_at: now,
        }
    }

    /// Re-evaluated on every access check, never cached.
    pub fn is_accessible(&self, now: DateTime<Utc>) -> bool {
        self.status == ServiceStatus::Active
            && self.expires_at.is_none_or(|expires| now <= expires)
    }

    /// The value after activation. `duration` bounds the entitlement's
    /// lifetime when configured.
    pub fn activated(
        self,
        token: String,
        duration: Option<chrono::Duration>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            status: ServiceStatus::Active,
            delivery_status: DeliveryStatus::Delivered,
            delivery_error: None,
            access_token: Some(self.access_token.unwrap_or(token)),
            access_granted_at: Some(now),
            expires_at: duration.map(|d| now + d),
            ..self
        }
    }

    /// The value after a failed delivery attempt. Only this entitlement is
    /// marked; siblings are unaffected.
    pub fn delivery_failed(self, error: &str) -> Self {
        Self {
            delivery_status: DeliveryStatus::Failed,
            delivery_error: Some(error.to_string()),
            ..self
        }
    }
}

/// Answer of an access check.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "access")]
pub enum AccessResult {
    Granted {
        expires_at: Option<DateTime<Utc>>,
    },
    Denied {
        status: ServiceStatus,
        expired: bool,
    },
}

impl AccessResult {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted { .. })
    }
}

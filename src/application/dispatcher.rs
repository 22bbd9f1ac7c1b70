use crate::config::CoreConfig;
use crate::domain::payment::Payment;
use crate::domain::ports::SharedServiceStore;
use crate::domain::service::AccessResult;
use crate::error::{PaymentError, Result};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// What one delivery run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub activated: usize,
    pub failed: usize,
}

/// Activates the entitlements linked to a payment exactly once, on the
/// payment's first transition into `Completed`.
pub struct ServiceDispatcher {
    store: SharedServiceStore,
    config: Arc<CoreConfig>,
}

impl ServiceDispatcher {
    pub fn new(store: SharedServiceStore, config: Arc<CoreConfig>) -> Self {
        Self { store, config }
    }

    /// Delivers every pending entitlement of the payment. Re-invocation is
    /// safe: already active, expired or cancelled entitlements are not
    /// loaded. A persistence failure marks only the failing entitlement and
    /// never blocks its siblings.
    pub async fn on_payment_completed(&self, payment: &Payment) -> Result<DeliveryReport> {
        let pending = self.store.pending_for_payment(&payment.order_id).await?;
        let mut report = DeliveryReport::default();

        for svc in pending {
            let service_id = svc.service_id.clone();
            let activated = svc.activated(
                Uuid::new_v4().to_string(),
                self.config.service_duration,
                Utc::now(),
            );

            match self.store.update(activated).await {
                Ok(()) => {
                    tracing::info!(
                        service_id = %service_id,
                        order_id = %payment.order_id,
                        "activated service"
                    );
                    report.activated += 1;
                }
                Err(err) => {
                    tracing::error!(
                        service_id = %service_id,
                        order_id = %payment.order_id,
                        error = %err,
                        "service delivery failed"
                    );
                    report.failed += 1;
                    // Best effort: keep the failure on the entitlement itself
                    if let Ok(Some(current)) = self.store.get(&service_id).await {
                        let failed = current.delivery_failed(&err.to_string());
                        if let Err(mark_err) = self.store.update(failed).await {
                            tracing::error!(
                                service_id = %service_id,
                                error = %mark_err,
                                "could not record delivery failure"
                            );
                        }
                    }
                }
            }
        }

        Ok(report)
    }

    /// Re-evaluates the accessibility predicate; never cached. Grants bump
    /// the access counter.
    pub async fn check_access(&self, service_id: &str) -> Result<AccessResult> {
        let now = Utc::now();
        let svc = self
            .store
            .get(service_id)
            .await?
            .ok_or_else(|| PaymentError::NotFoundError(format!("service {service_id}")))?;

        if svc.is_accessible(now) {
            self.store.record_access(service_id).await?;
            Ok(AccessResult::Granted {
                expires_at: svc.expires_at,
            })
        } else {
            Ok(AccessResult::Denied {
                status: svc.status,
                expired: svc.expires_at.is_some_and(|expires| now > expires),
            })
        }
    }

    /// Marks active entitlements past their expiry as expired. Idempotent.
    pub async fn sweep_expired(&self) -> Result<u64> {
        let swept = self.store.expire_due(Utc::now()).await?;
        if swept > 0 {
            tracing::debug!(swept, "expired services");
        }
        Ok(swept)
    }
}

use super::dispatcher::{DeliveryReport, ServiceDispatcher};
use super::ledger::{PaymentLedger, completion_of};
use super::reconciliation::{RawPaymentEvent, ReconciliationEngine};
use super::registry::ControlNumberRegistry;
use crate::config::CoreConfig;
use crate::domain::control_number::{CodeSpec, ControlNumber, RedeemerInfo, ValidationOutcome};
use crate::domain::payment::{Payment, PaymentStatus};
use crate::domain::ports::{
    SharedControlNumberStore, SharedPaymentStore, SharedProviderAdapter, SharedServiceStore,
    StatusUpdate,
};
use crate::domain::principal::Principal;
use crate::domain::service::{AccessResult, ServiceEntitlement};
use crate::error::{ProviderError, Result};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// How the rail answered the initiation call. Distinct from the payment's
/// own status: initiation never decides a payment definitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderOutcome {
    /// The rail accepted the order and returned its reference.
    Acknowledged { provider_status: String },
    /// The rail explicitly refused to start. Still not a payment failure;
    /// resolution requires a later poll or notification.
    Rejected { reason: String },
    /// No usable answer (timeout or network fault). Outcome unknown.
    Unknown,
}

#[derive(Debug, Clone)]
pub struct RedemptionResult {
    pub control_number: ControlNumber,
    pub payment: Payment,
    pub service_id: Option<String>,
    pub provider: ProviderOutcome,
}

/// Answer to a submitted external event: whether the transition applied, or
/// was idempotently ignored as a duplicate / out-of-order delivery.
#[derive(Debug, Clone, Copy)]
pub struct EventReceipt {
    pub accepted: bool,
    pub status: PaymentStatus,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SweepReport {
    pub codes_expired: u64,
    pub services_expired: u64,
}

/// Bootstrap wiring of the four core components over shared stores. Owns no
/// global state; everything is injected at construction.
pub struct Gateway {
    registry: ControlNumberRegistry,
    ledger: Arc<PaymentLedger>,
    reconciliation: ReconciliationEngine,
    dispatcher: ServiceDispatcher,
    provider: SharedProviderAdapter,
    services: SharedServiceStore,
    config: Arc<CoreConfig>,
}

impl Gateway {
    pub fn new(
        codes: SharedControlNumberStore,
        payments: SharedPaymentStore,
        services: SharedServiceStore,
        provider: SharedProviderAdapter,
        config: CoreConfig,
    ) -> Self {
        let config = Arc::new(config);
        let ledger = Arc::new(PaymentLedger::new(payments));
        Self {
            registry: ControlNumberRegistry::new(codes, config.clone()),
            reconciliation: ReconciliationEngine::new(
                ledger.clone(),
                provider.clone(),
                config.clone(),
            ),
            dispatcher: ServiceDispatcher::new(services.clone(), config.clone()),
            ledger,
            provider,
            services,
            config,
        }
    }

    pub fn ledger(&self) -> &PaymentLedger {
        &self.ledger
    }

    pub fn registry(&self) -> &ControlNumberRegistry {
        &self.registry
    }

    pub async fn generate_control_number(
        &self,
        principal: &Principal,
        spec: CodeSpec,
    ) -> Result<ControlNumber> {
        self.registry.generate(principal, spec).await
    }

    pub async fn batch_generate_control_numbers(
        &self,
        principal: &Principal,
        spec: CodeSpec,
        count: usize,
    ) -> Result<Vec<ControlNumber>> {
        self.registry.batch_generate(principal, spec, count).await
    }

    pub async fn validate_control_number(
        &self,
        code: &str,
        expected_amount: Option<rust_decimal::Decimal>,
    ) -> Result<ValidationOutcome> {
        self.registry.validate(code, expected_amount).await
    }

    /// The redemption flow: consume the code atomically, open the payment
    /// attempt, provision its pending entitlement, then ask the rail to
    /// start collecting. A provider fault leaves the payment `Pending`
    /// with the outcome unknown, never as a definitive failure.
    pub async fn redeem_control_number(
        &self,
        principal: &Principal,
        code: &str,
        payment_ref: &str,
        redeemer: RedeemerInfo,
    ) -> Result<RedemptionResult> {
        let cn = self
            .registry
            .redeem(principal, code, payment_ref, redeemer.clone())
            .await?;

        let payment = self
            .ledger
            .create_payment(payment_ref, cn.amount, cn.currency, &cn.merchant_id, None)
            .await?;

        let service_id = match &cn.service {
            Some(name) => {
                let service_id = format!("svc-{}", Uuid::new_v4());
                self.services
                    .insert(ServiceEntitlement::new(
                        &service_id,
                        &payment.order_id,
                        name,
                        Utc::now(),
                    ))
                    .await?;
                Some(service_id)
            }
            None => None,
        };

        let provider_outcome = self.initiate(&payment, &redeemer).await?;

        let payment = self.ledger.find_by_order(&payment.order_id).await?;
        Ok(RedemptionResult {
            control_number: cn,
            payment,
            service_id,
            provider: provider_outcome,
        })
    }

    async fn initiate(
        &self,
        payment: &Payment,
        redeemer: &RedeemerInfo,
    ) -> Result<ProviderOutcome> {
        let initiation = tokio::time::timeout(
            self.config.provider_timeout,
            self.provider.initiate_payment(
                &payment.order_id,
                &payment.amount,
                payment.currency,
                redeemer,
            ),
        )
        .await;

        match initiation {
            Ok(Ok(receipt)) => {
                // Feed the rail's initial status through the same
                // normalization path a notification would take.
                let update = self
                    .reconciliation
                    .on_external_event(RawPaymentEvent {
                        provider: self.provider.name().to_string(),
                        order_id: payment.order_id.to_string(),
                        status: receipt.provider_status.clone(),
                        message: None,
                        external_reference: Some(receipt.external_reference),
                        received_at: None,
                    })
                    .await?;
                self.dispatch_if_completed(&update).await?;
                Ok(ProviderOutcome::Acknowledged {
                    provider_status: receipt.provider_status,
                })
            }
            Ok(Err(ProviderError::Rejected(reason))) => {
                tracing::warn!(
                    order_id = %payment.order_id,
                    reason = %reason,
                    "provider rejected initiation, payment left pending"
                );
                Ok(ProviderOutcome::Rejected { reason })
            }
            Ok(Err(err)) => {
                tracing::warn!(
                    order_id = %payment.order_id,
                    error = %err,
                    "provider unavailable at initiation, outcome unknown"
                );
                Ok(ProviderOutcome::Unknown)
            }
            Err(_elapsed) => {
                tracing::warn!(
                    order_id = %payment.order_id,
                    timeout = ?self.config.provider_timeout,
                    "provider initiation timed out, outcome unknown"
                );
                Ok(ProviderOutcome::Unknown)
            }
        }
    }

    /// Applies one external notification and, on a genuine first completion,
    /// delivers the linked services.
    pub async fn submit_external_event(&self, event: RawPaymentEvent) -> Result<EventReceipt> {
        let update = self.reconciliation.on_external_event(event).await?;
        self.dispatch_if_completed(&update).await?;
        Ok(EventReceipt {
            accepted: update.transition.was_applied(),
            status: update.payment.status,
        })
    }

    /// Actively reconciles one payment against the rail.
    pub async fn poll_status(&self, order_id: &str) -> Result<Payment> {
        let update = self.reconciliation.poll_status(order_id).await?;
        self.dispatch_if_completed(&update).await?;
        Ok(update.payment)
    }

    async fn dispatch_if_completed(&self, update: &StatusUpdate) -> Result<Option<DeliveryReport>> {
        match completion_of(update) {
            Some(completion) => {
                let report = self
                    .dispatcher
                    .on_payment_completed(&completion.payment)
                    .await?;
                Ok(Some(report))
            }
            None => Ok(None),
        }
    }

    pub async fn check_service_access(&self, service_id: &str) -> Result<AccessResult> {
        self.dispatcher.check_access(service_id).await
    }

    /// Runs both expiry sweeps. Each is idempotent and safe alongside
    /// concurrent redemption and access checks.
    pub async fn run_sweeps(&self) -> Result<SweepReport> {
        Ok(SweepReport {
            codes_expired: self.registry.sweep_expired().await?,
            services_expired: self.dispatcher.sweep_expired().await?,
        })
    }
}

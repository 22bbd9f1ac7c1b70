use super::ledger::PaymentLedger;
use crate::config::CoreConfig;
use crate::domain::payment::PaymentStatus;
use crate::domain::ports::{SharedProviderAdapter, StatusUpdate};
use crate::error::{ProviderError, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// A payment-status notification as delivered by an external rail, before
/// normalization. No reliable message identifier can be assumed, so
/// deduplication rests entirely on the ledger's state machine.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPaymentEvent {
    pub provider: String,
    pub order_id: String,
    pub status: String,
    pub message: Option<String>,
    pub external_reference: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
}

/// Per-provider status vocabulary, mapping each rail's wire statuses onto
/// the canonical state machine.
#[derive(Debug, Clone, Default)]
pub struct StatusVocabulary {
    tables: HashMap<String, HashMap<String, PaymentStatus>>,
}

impl StatusVocabulary {
    /// Tables for the rails this deployment knows about.
    pub fn builtin() -> Self {
        use PaymentStatus::*;
        let mut vocabulary = Self::default();
        vocabulary.extend(
            "mpesa",
            [
                ("PENDING", Pending),
                ("INITIATED", Pending),
                ("IN_PROGRESS", Processing),
                ("SUCCESS", Completed),
                ("COMPLETED", Completed),
                ("FAILED", Failed),
                ("INSUFFICIENT_FUNDS", Failed),
                ("CANCELLED", Cancelled),
            ],
        );
        vocabulary.extend(
            "tigopesa",
            [
                ("QUEUED", Pending),
                ("PROCESSING", Processing),
                ("SUCCESSFUL", Completed),
                ("FAILURE", Failed),
                ("REVERSED", Cancelled),
            ],
        );
        vocabulary.extend(
            "airtelmoney",
            [
                ("TS", Completed),
                ("TF", Failed),
                ("TA", Processing),
                ("TIP", Pending),
            ],
        );
        vocabulary.extend(
            "bank",
            [
                ("RECEIVED", Pending),
                ("CLEARING", Processing),
                ("SETTLED", Completed),
                ("BOUNCED", Failed),
                ("RECALLED", Cancelled),
            ],
        );
        vocabulary.extend(
            "manual",
            [
                ("RECEIVED", Pending),
                ("CONFIRMED", Completed),
                ("REJECTED", Failed),
            ],
        );
        vocabulary
    }

    pub fn extend<'a>(
        &mut self,
        provider: &str,
        entries: impl IntoIterator<Item = (&'a str, PaymentStatus)>,
    ) {
        let table = self.tables.entry(provider.to_string()).or_default();
        for (raw, status) in entries {
            table.insert(raw.to_string(), status);
        }
    }

    /// Maps a raw provider status onto the canonical machine. Unmapped
    /// statuses default to `Pending` and are logged loudly, never silently
    /// dropped.
    pub fn normalize(&self, provider: &str, raw: &str) -> PaymentStatus {
        let mapped = self
            .tables
            .get(provider)
            .and_then(|table| table.get(raw.trim().to_uppercase().as_str()))
            .copied();
        match mapped {
            Some(status) => status,
            None => {
                tracing::warn!(
                    provider,
                    raw_status = raw,
                    "unmapped provider status, defaulting to pending"
                );
                PaymentStatus::Pending
            }
        }
    }
}

/// Folds external, possibly duplicate or out-of-order notifications into the
/// ledger's monotonic record.
pub struct ReconciliationEngine {
    ledger: Arc<PaymentLedger>,
    provider: SharedProviderAdapter,
    vocabulary: StatusVocabulary,
    config: Arc<CoreConfig>,
}

impl ReconciliationEngine {
    pub fn new(
        ledger: Arc<PaymentLedger>,
        provider: SharedProviderAdapter,
        config: Arc<CoreConfig>,
    ) -> Self {
        Self {
            ledger,
            provider,
            vocabulary: StatusVocabulary::builtin(),
            config,
        }
    }

    pub fn with_vocabulary(mut self, vocabulary: StatusVocabulary) -> Self {
        self.vocabulary = vocabulary;
        self
    }

    /// Applies one external notification. Safe to invoke repeatedly with the
    /// same event; duplicate delivery cannot double-trigger downstream
    /// effects because the ledger's state machine decides at write time.
    ///
    /// A notification for an unknown payment is a data mismatch, not a
    /// transient fault: it is surfaced as `NotFoundError` for an operator,
    /// never retried or discarded.
    pub async fn on_external_event(&self, event: RawPaymentEvent) -> Result<StatusUpdate> {
        tracing::debug!(
            provider = %event.provider,
            order_id = %event.order_id,
            raw_status = %event.status,
            received_at = ?event.received_at,
            "external event received"
        );
        let status = self.vocabulary.normalize(&event.provider, &event.status);

        let payment = match self.ledger.find_by_order(&event.order_id).await {
            Ok(payment) => payment,
            Err(err) => {
                tracing::error!(
                    order_id = %event.order_id,
                    provider = %event.provider,
                    "notification for unknown payment, operator attention required"
                );
                return Err(err);
            }
        };

        if let Some(reference) = &event.external_reference
            && payment.external_reference.is_none()
        {
            self.ledger
                .set_external_reference(&payment.order_id, reference)
                .await?;
        }

        self.ledger
            .apply_status(&payment.order_id, status, event.message, &event.provider)
            .await
    }

    /// Actively queries the provider and feeds the answer through the same
    /// normalization path, for rails without reliable push notifications.
    pub async fn poll_status(&self, order_id: &str) -> Result<StatusUpdate> {
        let payment = self.ledger.find_by_order(order_id).await?;

        let raw = tokio::time::timeout(
            self.config.provider_timeout,
            self.provider.query_status(&payment.order_id),
        )
        .await
        .map_err(|_| ProviderError::Timeout(self.config.provider_timeout))??;

        let status = self.vocabulary.normalize(self.provider.name(), &raw);
        let source = format!("poll:{}", self.provider.name());
        self.ledger
            .apply_status(&payment.order_id, status, None, &source)
            .await
    }
}

use crate::config::CoreConfig;
use crate::domain::control_number::{
    CodeSpec, CodeStatus, ControlNumber, InvalidReason, RedeemerInfo, ValidationOutcome,
};
use crate::domain::money::Amount;
use crate::domain::ports::SharedControlNumberStore;
use crate::domain::principal::Principal;
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;
use uuid::Uuid;

/// Issues collision-free, time-boxed redemption codes and redeems them
/// exactly once under concurrency.
///
/// Generation retries on collision up to the configured attempt budget; the
/// redemption itself is a single conditional write inside the store, so the
/// registry never does a read-then-write on the hot path.
pub struct ControlNumberRegistry {
    store: SharedControlNumberStore,
    config: Arc<CoreConfig>,
}

impl ControlNumberRegistry {
    pub fn new(store: SharedControlNumberStore, config: Arc<CoreConfig>) -> Self {
        Self { store, config }
    }

    /// Issues a new control number bound to the spec's monetary commitment.
    pub async fn generate(&self, principal: &Principal, spec: CodeSpec) -> Result<ControlNumber> {
        self.generate_in_batch(principal, spec, None).await
    }

    /// Issues `count` independently unique codes sharing one batch id.
    pub async fn batch_generate(
        &self,
        principal: &Principal,
        spec: CodeSpec,
        count: usize,
    ) -> Result<Vec<ControlNumber>> {
        if count == 0 {
            return Err(PaymentError::ValidationError(
                "batch count must be at least 1".to_string(),
            ));
        }
        if count > self.config.max_batch_size {
            return Err(PaymentError::ValidationError(format!(
                "batch count {count} exceeds the maximum of {}",
                self.config.max_batch_size
            )));
        }

        let batch_id = Uuid::new_v4().to_string();
        let mut codes = Vec::with_capacity(count);
        for _ in 0..count {
            codes.push(
                self.generate_in_batch(principal, spec.clone(), Some(batch_id.clone()))
                    .await?,
            );
        }
        tracing::info!(batch_id = %batch_id, count, "generated control number batch");
        Ok(codes)
    }

    async fn generate_in_batch(
        &self,
        principal: &Principal,
        spec: CodeSpec,
        batch_id: Option<String>,
    ) -> Result<ControlNumber> {
        let amount = Amount::new(spec.amount)?;
        let max_uses = spec.max_uses.unwrap_or(1);
        if max_uses == 0 {
            return Err(PaymentError::ValidationError(
                "max_uses must be at least 1".to_string(),
            ));
        }

        let now = Utc::now();
        let candidate = ControlNumber {
            code: String::new(),
            amount,
            currency: spec.currency.unwrap_or(self.config.currency),
            method: spec.method,
            merchant_id: principal.id.clone(),
            customer: spec.customer,
            status: CodeStatus::Active,
            created_at: now,
            expires_at: now + spec.expires_in.unwrap_or(self.config.default_expiry),
            valid_until: now + spec.valid_for.unwrap_or(self.config.default_validity),
            is_reusable: spec.is_reusable,
            max_uses,
            current_uses: 0,
            used_at: None,
            redeemed_by: None,
            payment_ref: None,
            batch_id,
            service: spec.service,
        };

        for attempt in 0..self.config.generation_attempts {
            let cn = ControlNumber {
                code: self.mint_code(now),
                ..candidate.clone()
            };
            match self.store.insert(cn.clone()).await {
                Ok(()) => {
                    tracing::info!(
                        code = %cn.code,
                        merchant = %cn.merchant_id,
                        amount = %cn.amount,
                        "issued control number"
                    );
                    return Ok(cn);
                }
                Err(PaymentError::ConflictError(_)) => {
                    tracing::debug!(attempt, "control number collision, retrying");
                }
                Err(other) => return Err(other),
            }
        }

        Err(PaymentError::InternalError(
            "control number generation exhausted".into(),
        ))
    }

    /// Prefix + time-derived digits + random suffix. The suffix width is
    /// sized so the collision probability at expected volume is negligible;
    /// the bounded insert loop covers the rest.
    fn mint_code(&self, now: DateTime<Utc>) -> String {
        let digits = self.config.code_random_digits.min(18) as u32;
        let bound = 10u64.pow(digits);
        let suffix = rand::thread_rng().gen_range(0..bound);
        format!(
            "{}{}{:0width$}",
            self.config.code_prefix,
            now.format("%y%j"),
            suffix,
            width = digits as usize
        )
    }

    /// Read-only check, callable repeatedly without side effects.
    pub async fn validate(
        &self,
        code: &str,
        expected_amount: Option<rust_decimal::Decimal>,
    ) -> Result<ValidationOutcome> {
        let now = Utc::now();
        let Some(cn) = self.store.get(code).await? else {
            return Ok(ValidationOutcome::Invalid {
                reason: InvalidReason::NotFound,
            });
        };

        if cn.status != CodeStatus::Active {
            return Ok(ValidationOutcome::Invalid {
                reason: InvalidReason::Inactive,
            });
        }
        if cn.is_expired(now) {
            return Ok(ValidationOutcome::Invalid {
                reason: InvalidReason::Expired,
            });
        }
        if cn.current_uses >= cn.max_uses {
            return Ok(ValidationOutcome::Invalid {
                reason: InvalidReason::Exhausted,
            });
        }
        if let Some(expected) = expected_amount
            && cn.amount.value() != expected
        {
            return Ok(ValidationOutcome::Invalid {
                reason: InvalidReason::AmountMismatch,
            });
        }

        Ok(ValidationOutcome::Valid {
            amount: cn.amount,
            currency: cn.currency,
        })
    }

    /// Redeems a code for a payment attempt. Atomic against concurrent
    /// redeemers of the same code.
    pub async fn redeem(
        &self,
        principal: &Principal,
        code: &str,
        payment_ref: &str,
        redeemer: RedeemerInfo,
    ) -> Result<ControlNumber> {
        let cn = self
            .store
            .redeem(code, payment_ref, redeemer, Utc::now())
            .await?;
        tracing::info!(
            code = %cn.code,
            payment_ref,
            redeemer = %principal.id,
            uses = cn.current_uses,
            "redeemed control number"
        );
        Ok(cn)
    }

    /// Pushes the validity window of an active code out by `extra`.
    pub async fn extend_validity(
        &self,
        code: &str,
        extra: chrono::Duration,
    ) -> Result<ControlNumber> {
        self.store.extend_validity(code, extra, Utc::now()).await
    }

    /// Archives an active code without waiting for expiry.
    pub async fn cancel(&self, code: &str) -> Result<ControlNumber> {
        let cn = self.store.cancel(code, Utc::now()).await?;
        tracing::info!(code = %cn.code, "cancelled control number");
        Ok(cn)
    }

    /// Marks active-but-past-expiry codes expired. Idempotent, and safe to
    /// run concurrently with redemption: the redeem path re-checks validity
    /// inline at its own write.
    pub async fn sweep_expired(&self) -> Result<u64> {
        let swept = self.store.expire_due(Utc::now()).await?;
        if swept > 0 {
            tracing::debug!(swept, "expired control numbers");
        }
        Ok(swept)
    }
}

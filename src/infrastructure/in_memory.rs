use crate::domain::control_number::{CodeStatus, ControlNumber, RedeemerInfo};
use crate::domain::payment::{Payment, PaymentStatus, StatusEntry, plan_transition};
use crate::domain::ports::{ControlNumberStore, PaymentStore, ServiceStore, StatusUpdate};
use crate::domain::service::{ServiceEntitlement, ServiceStatus};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Thread-safe in-memory store for control numbers.
///
/// The conditional operations decide inside the write guard, which is the
/// store's atomicity primitive: two concurrent redeemers of one code
/// serialize here, and exactly one can observe the code as usable.
#[derive(Default, Clone)]
pub struct InMemoryControlNumberStore {
    codes: Arc<RwLock<HashMap<String, ControlNumber>>>,
}

impl InMemoryControlNumberStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ControlNumberStore for InMemoryControlNumberStore {
    async fn insert(&self, cn: ControlNumber) -> Result<()> {
        let mut codes = self.codes.write().await;
        if codes.contains_key(&cn.code) {
            return Err(PaymentError::ConflictError(format!(
                "code exists: {}",
                cn.code
            )));
        }
        codes.insert(cn.code.clone(), cn);
        Ok(())
    }

    async fn get(&self, code: &str) -> Result<Option<ControlNumber>> {
        let codes = self.codes.read().await;
        Ok(codes.get(code).cloned())
    }

    async fn redeem(
        &self,
        code: &str,
        payment_ref: &str,
        redeemer: RedeemerInfo,
        now: DateTime<Utc>,
    ) -> Result<ControlNumber> {
        let mut codes = self.codes.write().await;
        let cn = codes
            .get(code)
            .cloned()
            .ok_or_else(|| PaymentError::NotFoundError(format!("control number {code}")))?;

        match cn.status {
            CodeStatus::Active if cn.is_expired(now) => {
                // Validity is re-checked inline at the write, so a lagging
                // sweep can never let an expired code through.
                let expired = ControlNumber {
                    status: CodeStatus::Expired,
                    ..cn
                };
                codes.insert(code.to_string(), expired);
                Err(PaymentError::ExpiredError(format!("control number {code}")))
            }
            CodeStatus::Active if cn.current_uses < cn.max_uses => {
                let redeemed = cn.redeemed(payment_ref, redeemer, now);
                codes.insert(code.to_string(), redeemed.clone());
                Ok(redeemed)
            }
            CodeStatus::Expired => {
                Err(PaymentError::ExpiredError(format!("control number {code}")))
            }
            _ => Err(PaymentError::ConflictError("already_used".to_string())),
        }
    }

    async fn extend_validity(
        &self,
        code: &str,
        extra: chrono::Duration,
        _now: DateTime<Utc>,
    ) -> Result<ControlNumber> {
        let mut codes = self.codes.write().await;
        let cn = codes
            .get_mut(code)
            .ok_or_else(|| PaymentError::NotFoundError(format!("control number {code}")))?;
        if cn.status != CodeStatus::Active {
            return Err(PaymentError::ConflictError(
                "only active codes can be extended".to_string(),
            ));
        }
        cn.valid_until += extra;
        cn.expires_at += extra;
        Ok(cn.clone())
    }

    async fn cancel(&self, code: &str, _now: DateTime<Utc>) -> Result<ControlNumber> {
        let mut codes = self.codes.write().await;
        let cn = codes
            .get_mut(code)
            .ok_or_else(|| PaymentError::NotFoundError(format!("control number {code}")))?;
        if cn.status != CodeStatus::Active {
            return Err(PaymentError::ConflictError(
                "only active codes can be cancelled".to_string(),
            ));
        }
        cn.status = CodeStatus::Cancelled;
        Ok(cn.clone())
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut codes = self.codes.write().await;
        let mut swept = 0;
        for cn in codes.values_mut() {
            if cn.status == CodeStatus::Active && cn.is_expired(now) {
                cn.status = CodeStatus::Expired;
                swept += 1;
            }
        }
        Ok(swept)
    }

    async fn find_by_merchant(
        &self,
        merchant_id: &str,
        status: Option<CodeStatus>,
    ) -> Result<Vec<ControlNumber>> {
        let codes = self.codes.read().await;
        let mut found: Vec<ControlNumber> = codes
            .values()
            .filter(|cn| cn.merchant_id == merchant_id)
            .filter(|cn| status.is_none_or(|s| cn.status == s))
            .cloned()
            .collect();
        found.sort_by_key(|cn| cn.created_at);
        Ok(found)
    }
}

#[derive(Default)]
struct PaymentsInner {
    by_order: HashMap<String, Payment>,
    aliases: HashMap<String, String>,
}

impl PaymentsInner {
    fn resolve(&self, order_id: &str) -> Option<String> {
        if self.by_order.contains_key(order_id) {
            Some(order_id.to_string())
        } else {
            self.aliases.get(order_id).cloned()
        }
    }
}

/// Thread-safe in-memory store for payments. The legacy alias index lives
/// under the same guard so alias and record never diverge.
#[derive(Default, Clone)]
pub struct InMemoryPaymentStore {
    inner: Arc<RwLock<PaymentsInner>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert(&self, payment: Payment) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.by_order.contains_key(&payment.order_id) {
            return Err(PaymentError::ConflictError(format!(
                "order exists: {}",
                payment.order_id
            )));
        }
        if let Some(alias) = &payment.legacy_ref {
            inner
                .aliases
                .insert(alias.clone(), payment.order_id.clone());
        }
        inner.by_order.insert(payment.order_id.clone(), payment);
        Ok(())
    }

    async fn get(&self, order_id: &str) -> Result<Option<Payment>> {
        let inner = self.inner.read().await;
        Ok(inner
            .resolve(order_id)
            .and_then(|key| inner.by_order.get(&key))
            .cloned())
    }

    async fn apply_status(
        &self,
        order_id: &str,
        next: PaymentStatus,
        message: Option<String>,
        source: &str,
        now: DateTime<Utc>,
    ) -> Result<StatusUpdate> {
        use crate::domain::payment::Transition;

        let mut inner = self.inner.write().await;
        let key = inner
            .resolve(order_id)
            .ok_or_else(|| PaymentError::NotFoundError(format!("payment {order_id}")))?;
        let payment = inner
            .by_order
            .get_mut(&key)
            .ok_or_else(|| PaymentError::NotFoundError(format!("payment {order_id}")))?;

        let transition = plan_transition(payment.status, next);
        match transition {
            Transition::Applied { .. } => {
                payment.history.push(StatusEntry {
                    status: next,
                    at: now,
                    source: source.to_string(),
                    message,
                    applied: true,
                });
                payment.status = next;
                payment.updated_at = now;
            }
            Transition::AlreadyCurrent => {
                // Idempotent no-op: the record is returned unchanged.
            }
            Transition::Rejected => {
                // Informational only; the authoritative status stands.
                payment.history.push(StatusEntry {
                    status: next,
                    at: now,
                    source: source.to_string(),
                    message,
                    applied: false,
                });
                payment.updated_at = now;
            }
        }

        Ok(StatusUpdate {
            payment: payment.clone(),
            transition,
        })
    }

    async fn set_external_reference(&self, order_id: &str, reference: &str) -> Result<Payment> {
        let mut inner = self.inner.write().await;
        let key = inner
            .resolve(order_id)
            .ok_or_else(|| PaymentError::NotFoundError(format!("payment {order_id}")))?;
        let payment = inner
            .by_order
            .get_mut(&key)
            .ok_or_else(|| PaymentError::NotFoundError(format!("payment {order_id}")))?;
        if payment.external_reference.is_none() {
            payment.external_reference = Some(reference.to_string());
        }
        Ok(payment.clone())
    }

    async fn find_by_status(&self, status: PaymentStatus) -> Result<Vec<Payment>> {
        let inner = self.inner.read().await;
        let mut found: Vec<Payment> = inner
            .by_order
            .values()
            .filter(|p| p.status == status)
            .cloned()
            .collect();
        found.sort_by_key(|p| p.created_at);
        Ok(found)
    }
}

/// Thread-safe in-memory store for service entitlements.
#[derive(Default, Clone)]
pub struct InMemoryServiceStore {
    services: Arc<RwLock<HashMap<String, ServiceEntitlement>>>,
}

impl InMemoryServiceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ServiceStore for InMemoryServiceStore {
    async fn insert(&self, service: ServiceEntitlement) -> Result<()> {
        let mut services = self.services.write().await;
        if services.contains_key(&service.service_id) {
            return Err(PaymentError::ConflictError(format!(
                "service exists: {}",
                service.service_id
            )));
        }
        services.insert(service.service_id.clone(), service);
        Ok(())
    }

    async fn get(&self, service_id: &str) -> Result<Option<ServiceEntitlement>> {
        let services = self.services.read().await;
        Ok(services.get(service_id).cloned())
    }

    async fn update(&self, service: ServiceEntitlement) -> Result<()> {
        let mut services = self.services.write().await;
        if !services.contains_key(&service.service_id) {
            return Err(PaymentError::NotFoundError(format!(
                "service {}",
                service.service_id
            )));
        }
        services.insert(service.service_id.clone(), service);
        Ok(())
    }

    async fn pending_for_payment(&self, payment_id: &str) -> Result<Vec<ServiceEntitlement>> {
        let services = self.services.read().await;
        let mut found: Vec<ServiceEntitlement> = services
            .values()
            .filter(|s| s.payment_id == payment_id && s.status == ServiceStatus::Pending)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.service_id.cmp(&b.service_id));
        Ok(found)
    }

    async fn record_access(&self, service_id: &str) -> Result<()> {
        let mut services = self.services.write().await;
        let svc = services
            .get_mut(service_id)
            .ok_or_else(|| PaymentError::NotFoundError(format!("service {service_id}")))?;
        svc.access_count += 1;
        Ok(())
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut services = self.services.write().await;
        let mut swept = 0;
        for svc in services.values_mut() {
            if svc.status == ServiceStatus::Active
                && svc.expires_at.is_some_and(|expires| now > expires)
            {
                svc.status = ServiceStatus::Expired;
                swept += 1;
            }
        }
        Ok(swept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::control_number::PaymentMethod;
    use crate::domain::money::{Amount, Currency};
    use rust_decimal_macros::dec;

    fn active_code(code: &str, now: DateTime<Utc>) -> ControlNumber {
        ControlNumber {
            code: code.to_string(),
            amount: Amount::new(dec!(5000)).unwrap(),
            currency: Currency::Tzs,
            method: PaymentMethod::Any,
            merchant_id: "m-1".to_string(),
            customer: None,
            status: CodeStatus::Active,
            created_at: now,
            expires_at: now + chrono::Duration::hours(24),
            valid_until: now + chrono::Duration::days(7),
            is_reusable: false,
            max_uses: 1,
            current_uses: 0,
            used_at: None,
            redeemed_by: None,
            payment_ref: None,
            batch_id: None,
            service: None,
        }
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_code() {
        let store = InMemoryControlNumberStore::new();
        let now = Utc::now();
        store.insert(active_code("C-1", now)).await.unwrap();
        let result = store.insert(active_code("C-1", now)).await;
        assert!(matches!(result, Err(PaymentError::ConflictError(_))));
    }

    #[tokio::test]
    async fn test_concurrent_redeem_single_winner() {
        let store = Arc::new(InMemoryControlNumberStore::new());
        let now = Utc::now();
        store.insert(active_code("C-1", now)).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .redeem(
                        "C-1",
                        &format!("ORDER-{i}"),
                        RedeemerInfo::default(),
                        Utc::now(),
                    )
                    .await
            }));
        }

        let mut successes = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(PaymentError::ConflictError(_)) => conflicts += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(conflicts, 7);
    }

    #[tokio::test]
    async fn test_redeem_marks_expired_inline() {
        let store = InMemoryControlNumberStore::new();
        let now = Utc::now();
        let mut cn = active_code("C-1", now);
        cn.expires_at = now - chrono::Duration::seconds(1);
        store.insert(cn).await.unwrap();

        let result = store
            .redeem("C-1", "ORDER-1", RedeemerInfo::default(), now)
            .await;
        assert!(matches!(result, Err(PaymentError::ExpiredError(_))));

        let stored = store.get("C-1").await.unwrap().unwrap();
        assert_eq!(stored.status, CodeStatus::Expired);

        // Sweep afterwards finds nothing left to do
        assert_eq!(store.expire_due(now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_expire_due_is_idempotent() {
        let store = InMemoryControlNumberStore::new();
        let now = Utc::now();
        let mut cn = active_code("C-1", now);
        cn.expires_at = now - chrono::Duration::seconds(1);
        store.insert(cn).await.unwrap();
        store.insert(active_code("C-2", now)).await.unwrap();

        assert_eq!(store.expire_due(now).await.unwrap(), 1);
        assert_eq!(store.expire_due(now).await.unwrap(), 0);

        let untouched = store.get("C-2").await.unwrap().unwrap();
        assert_eq!(untouched.status, CodeStatus::Active);
    }

    #[tokio::test]
    async fn test_find_by_merchant_filters_status() {
        let store = InMemoryControlNumberStore::new();
        let now = Utc::now();
        store.insert(active_code("C-1", now)).await.unwrap();
        store.insert(active_code("C-2", now)).await.unwrap();
        store
            .redeem("C-1", "ORDER-1", RedeemerInfo::default(), now)
            .await
            .unwrap();

        let used = store
            .find_by_merchant("m-1", Some(CodeStatus::Used))
            .await
            .unwrap();
        assert_eq!(used.len(), 1);
        assert_eq!(used[0].code, "C-1");

        let all = store.find_by_merchant("m-1", None).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_payment_store_alias_resolution() {
        let store = InMemoryPaymentStore::new();
        let payment = Payment::new(
            "ORDER-1",
            Amount::new(dec!(100)).unwrap(),
            Currency::Tzs,
            "m-1",
            Some("LEGACY-1".to_string()),
            Utc::now(),
        );
        store.insert(payment).await.unwrap();

        let by_alias = store.get("LEGACY-1").await.unwrap().unwrap();
        assert_eq!(by_alias.order_id, "ORDER-1");

        let update = store
            .apply_status(
                "LEGACY-1",
                PaymentStatus::Completed,
                None,
                "bank",
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(update.payment.order_id, "ORDER-1");
        assert_eq!(update.payment.status, PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn test_concurrent_conflicting_statuses_single_terminal() {
        let store = Arc::new(InMemoryPaymentStore::new());
        let payment = Payment::new(
            "ORDER-1",
            Amount::new(dec!(100)).unwrap(),
            Currency::Tzs,
            "m-1",
            None,
            Utc::now(),
        );
        store.insert(payment).await.unwrap();

        let mut handles = Vec::new();
        for status in [PaymentStatus::Completed, PaymentStatus::Failed] {
            for _ in 0..4 {
                let store = store.clone();
                handles.push(tokio::spawn(async move {
                    store
                        .apply_status("ORDER-1", status, None, "race", Utc::now())
                        .await
                        .unwrap()
                }));
            }
        }

        let mut applied = 0;
        for handle in handles {
            let update = handle.await.unwrap();
            if update.transition.was_applied() {
                applied += 1;
            }
        }
        // Exactly one writer wins; the terminal status then sticks
        assert_eq!(applied, 1);
        let settled = store.get("ORDER-1").await.unwrap().unwrap();
        assert!(settled.status.is_terminal());
    }

    #[tokio::test]
    async fn test_service_store_pending_scan_and_access() {
        let store = InMemoryServiceStore::new();
        let now = Utc::now();
        store
            .insert(ServiceEntitlement::new("s-1", "ORDER-1", "premium", now))
            .await
            .unwrap();
        let active = ServiceEntitlement::new("s-2", "ORDER-1", "backup", now).activated(
            "tok".to_string(),
            None,
            now,
        );
        store.insert(active).await.unwrap();

        let pending = store.pending_for_payment("ORDER-1").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].service_id, "s-1");

        store.record_access("s-2").await.unwrap();
        store.record_access("s-2").await.unwrap();
        assert_eq!(store.get("s-2").await.unwrap().unwrap().access_count, 2);

        assert!(matches!(
            store.record_access("missing").await,
            Err(PaymentError::NotFoundError(_))
        ));
    }
}

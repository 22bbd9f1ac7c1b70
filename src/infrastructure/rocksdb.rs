use crate::domain::control_number::{CodeStatus, ControlNumber, RedeemerInfo};
use crate::domain::payment::{Payment, PaymentStatus, StatusEntry, plan_transition};
use crate::domain::ports::{ControlNumberStore, PaymentStore, ServiceStore, StatusUpdate};
use crate::domain::service::{ServiceEntitlement, ServiceStatus};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamilyDescriptor, DB, Options};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for issued control numbers, keyed by code.
pub const CF_CONTROL_NUMBERS: &str = "control_numbers";
/// Column Family for payments, keyed by order id.
pub const CF_PAYMENTS: &str = "payments";
/// Column Family mapping legacy aliases to order ids.
pub const CF_PAYMENT_ALIASES: &str = "payment_aliases";
/// Column Family for service entitlements, keyed by service id.
pub const CF_SERVICES: &str = "services";

/// A persistent store implementation using RocksDB.
///
/// Implements all three repository ports over separate Column Families with
/// serde_json-encoded values. RocksDB has no native conditional update, so
/// the conditional operations (redeem, apply_status, sweeps) serialize their
/// read-modify-write through a store-level async mutex; plain reads never
/// take it.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDbStore {
    db: Arc<DB>,
    write_guard: Arc<Mutex<()>>,
}

impl RocksDbStore {
    /// Opens or creates a RocksDB instance at the specified path, ensuring
    /// the required column families exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = vec![
            ColumnFamilyDescriptor::new(CF_CONTROL_NUMBERS, Options::default()),
            ColumnFamilyDescriptor::new(CF_PAYMENTS, Options::default()),
            ColumnFamilyDescriptor::new(CF_PAYMENT_ALIASES, Options::default()),
            ColumnFamilyDescriptor::new(CF_SERVICES, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, cfs)?;
        Ok(Self {
            db: Arc::new(db),
            write_guard: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            PaymentError::InternalError(format!("column family {name} not found").into())
        })
    }

    fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        cf_name: &str,
        key: &str,
    ) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_cf(cf, key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_json<T: serde::Serialize>(&self, cf_name: &str, key: &str, value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        let bytes = serde_json::to_vec(value)?;
        self.db.put_cf(cf, key.as_bytes(), bytes)?;
        Ok(())
    }

    fn scan<T: serde::de::DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut values = Vec::new();
        for item in self.db.iterator_cf(cf, rocksdb::IteratorMode::Start) {
            let (_key, value) = item?;
            values.push(serde_json::from_slice(&value)?);
        }
        Ok(values)
    }

    fn resolve_order(&self, order_id: &str) -> Result<Option<String>> {
        if self
            .read_json::<Payment>(CF_PAYMENTS, order_id)?
            .is_some()
        {
            return Ok(Some(order_id.to_string()));
        }
        let cf = self.cf(CF_PAYMENT_ALIASES)?;
        match self.db.get_cf(cf, order_id.as_bytes())? {
            Some(bytes) => Ok(Some(String::from_utf8(bytes.to_vec()).map_err(|e| {
                PaymentError::InternalError(Box::new(e))
            })?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ControlNumberStore for RocksDbStore {
    async fn insert(&self, cn: ControlNumber) -> Result<()> {
        let _guard = self.write_guard.lock().await;
        if self
            .read_json::<ControlNumber>(CF_CONTROL_NUMBERS, &cn.code)?
            .is_some()
        {
            return Err(PaymentError::ConflictError(format!(
                "code exists: {}",
                cn.code
            )));
        }
        self.write_json(CF_CONTROL_NUMBERS, &cn.code.clone(), &cn)
    }

    async fn get(&self, code: &str) -> Result<Option<ControlNumber>> {
        self.read_json(CF_CONTROL_NUMBERS, code)
    }

    async fn redeem(
        &self,
        code: &str,
        payment_ref: &str,
        redeemer: RedeemerInfo,
        now: DateTime<Utc>,
    ) -> Result<ControlNumber> {
        let _guard = self.write_guard.lock().await;
        let cn = self
            .read_json::<ControlNumber>(CF_CONTROL_NUMBERS, code)?
            .ok_or_else(|| PaymentError::NotFoundError(format!("control number {code}")))?;

        match cn.status {
            CodeStatus::Active if cn.is_expired(now) => {
                let expired = ControlNumber {
                    status: CodeStatus::Expired,
                    ..cn
                };
                self.write_json(CF_CONTROL_NUMBERS, code, &expired)?;
                Err(PaymentError::ExpiredError(format!("control number {code}")))
            }
            CodeStatus::Active if cn.current_uses < cn.max_uses => {
                let redeemed = cn.redeemed(payment_ref, redeemer, now);
                self.write_json(CF_CONTROL_NUMBERS, code, &redeemed)?;
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
        let _guard = self.write_guard.lock().await;
        let mut cn = self
            .read_json::<ControlNumber>(CF_CONTROL_NUMBERS, code)?
            .ok_or_else(|| PaymentError::NotFoundError(format!("control number {code}")))?;
        if cn.status != CodeStatus::Active {
            return Err(PaymentError::ConflictError(
                "only active codes can be extended".to_string(),
            ));
        }
        cn.valid_until += extra;
        cn.expires_at += extra;
        self.write_json(CF_CONTROL_NUMBERS, code, &cn)?;
        Ok(cn)
    }

    async fn cancel(&self, code: &str, _now: DateTime<Utc>) -> Result<ControlNumber> {
        let _guard = self.write_guard.lock().await;
        let mut cn = self
            .read_json::<ControlNumber>(CF_CONTROL_NUMBERS, code)?
            .ok_or_else(|| PaymentError::NotFoundError(format!("control number {code}")))?;
        if cn.status != CodeStatus::Active {
            return Err(PaymentError::ConflictError(
                "only active codes can be cancelled".to_string(),
            ));
        }
        cn.status = CodeStatus::Cancelled;
        self.write_json(CF_CONTROL_NUMBERS, code, &cn)?;
        Ok(cn)
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> Result<u64> {
        let _guard = self.write_guard.lock().await;
        let mut swept = 0;
        for mut cn in self.scan::<ControlNumber>(CF_CONTROL_NUMBERS)? {
            if cn.status == CodeStatus::Active && cn.is_expired(now) {
                cn.status = CodeStatus::Expired;
                let code = cn.code.clone();
                self.write_json(CF_CONTROL_NUMBERS, &code, &cn)?;
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
        let mut found: Vec<ControlNumber> = self
            .scan::<ControlNumber>(CF_CONTROL_NUMBERS)?
            .into_iter()
            .filter(|cn| cn.merchant_id == merchant_id)
            .filter(|cn| status.is_none_or(|s| cn.status == s))
            .collect();
        found.sort_by_key(|cn| cn.created_at);
        Ok(found)
    }
}

#[async_trait]
impl PaymentStore for RocksDbStore {
    async fn insert(&self, payment: Payment) -> Result<()> {
        let _guard = self.write_guard.lock().await;
        if self
            .read_json::<Payment>(CF_PAYMENTS, &payment.order_id)?
            .is_some()
        {
            return Err(PaymentError::ConflictError(format!(
                "order exists: {}",
                payment.order_id
            )));
        }
        if let Some(alias) = &payment.legacy_ref {
            let cf = self.cf(CF_PAYMENT_ALIASES)?;
            self.db
                .put_cf(cf, alias.as_bytes(), payment.order_id.as_bytes())?;
        }
        self.write_json(CF_PAYMENTS, &payment.order_id.clone(), &payment)
    }

    async fn get(&self, order_id: &str) -> Result<Option<Payment>> {
        match self.resolve_order(order_id)? {
            Some(key) => self.read_json(CF_PAYMENTS, &key),
            None => Ok(None),
        }
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

        let _guard = self.write_guard.lock().await;
        let key = self
            .resolve_order(order_id)?
            .ok_or_else(|| PaymentError::NotFoundError(format!("payment {order_id}")))?;
        let mut payment = self
            .read_json::<Payment>(CF_PAYMENTS, &key)?
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
                self.write_json(CF_PAYMENTS, &key, &payment)?;
            }
            Transition::AlreadyCurrent => {}
            Transition::Rejected => {
                payment.history.push(StatusEntry {
                    status: next,
                    at: now,
                    source: source.to_string(),
                    message,
                    applied: false,
                });
                payment.updated_at = now;
                self.write_json(CF_PAYMENTS, &key, &payment)?;
            }
        }

        Ok(StatusUpdate {
            payment,
            transition,
        })
    }

    async fn set_external_reference(&self, order_id: &str, reference: &str) -> Result<Payment> {
        let _guard = self.write_guard.lock().await;
        let key = self
            .resolve_order(order_id)?
            .ok_or_else(|| PaymentError::NotFoundError(format!("payment {order_id}")))?;
        let mut payment = self
            .read_json::<Payment>(CF_PAYMENTS, &key)?
            .ok_or_else(|| PaymentError::NotFoundError(format!("payment {order_id}")))?;
        if payment.external_reference.is_none() {
            payment.external_reference = Some(reference.to_string());
            self.write_json(CF_PAYMENTS, &key, &payment)?;
        }
        Ok(payment)
    }

    async fn find_by_status(&self, status: PaymentStatus) -> Result<Vec<Payment>> {
        let mut found: Vec<Payment> = self
            .scan::<Payment>(CF_PAYMENTS)?
            .into_iter()
            .filter(|p| p.status == status)
            .collect();
        found.sort_by_key(|p| p.created_at);
        Ok(found)
    }
}

#[async_trait]
impl ServiceStore for RocksDbStore {
    async fn insert(&self, service: ServiceEntitlement) -> Result<()> {
        let _guard = self.write_guard.lock().await;
        if self
            .read_json::<ServiceEntitlement>(CF_SERVICES, &service.service_id)?
            .is_some()
        {
            return Err(PaymentError::ConflictError(format!(
                "service exists: {}",
                service.service_id
            )));
        }
        self.write_json(CF_SERVICES, &service.service_id.clone(), &service)
    }

    async fn get(&self, service_id: &str) -> Result<Option<ServiceEntitlement>> {
        self.read_json(CF_SERVICES, service_id)
    }

    async fn update(&self, service: ServiceEntitlement) -> Result<()> {
        let _guard = self.write_guard.lock().await;
        if self
            .read_json::<ServiceEntitlement>(CF_SERVICES, &service.service_id)?
            .is_none()
        {
            return Err(PaymentError::NotFoundError(format!(
                "service {}",
                service.service_id
            )));
        }
        self.write_json(CF_SERVICES, &service.service_id.clone(), &service)
    }

    async fn pending_for_payment(&self, payment_id: &str) -> Result<Vec<ServiceEntitlement>> {
        let mut found: Vec<ServiceEntitlement> = self
            .scan::<ServiceEntitlement>(CF_SERVICES)?
            .into_iter()
            .filter(|s| s.payment_id == payment_id && s.status == ServiceStatus::Pending)
            .collect();
        found.sort_by(|a, b| a.service_id.cmp(&b.service_id));
        Ok(found)
    }

    async fn record_access(&self, service_id: &str) -> Result<()> {
        let _guard = self.write_guard.lock().await;
        let mut svc = self
            .read_json::<ServiceEntitlement>(CF_SERVICES, service_id)?
            .ok_or_else(|| PaymentError::NotFoundError(format!("service {service_id}")))?;
        svc.access_count += 1;
        self.write_json(CF_SERVICES, service_id, &svc)
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> Result<u64> {
        let _guard = self.write_guard.lock().await;
        let mut swept = 0;
        for mut svc in self.scan::<ServiceEntitlement>(CF_SERVICES)? {
            if svc.status == ServiceStatus::Active
                && svc.expires_at.is_some_and(|expires| now > expires)
            {
                svc.status = ServiceStatus::Expired;
                let service_id = svc.service_id.clone();
                self.write_json(CF_SERVICES, &service_id, &svc)?;
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
    use tempfile::tempdir;

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
    async fn test_open_creates_column_families() {
        let dir = tempdir().unwrap();
        let store = RocksDbStore::open(dir.path()).expect("Failed to open RocksDB");

        for cf in [
            CF_CONTROL_NUMBERS,
            CF_PAYMENTS,
            CF_PAYMENT_ALIASES,
            CF_SERVICES,
        ] {
            assert!(store.db.cf_handle(cf).is_some());
        }
    }

    #[tokio::test]
    async fn test_control_number_round_trip_and_redeem() {
        let dir = tempdir().unwrap();
        let store = RocksDbStore::open(dir.path()).unwrap();
        let now = Utc::now();

        ControlNumberStore::insert(&store, active_code("C-1", now))
            .await
            .unwrap();
        let stored = ControlNumberStore::get(&store, "C-1").await.unwrap().unwrap();
        assert_eq!(stored.status, CodeStatus::Active);

        let redeemed = store
            .redeem("C-1", "ORDER-1", RedeemerInfo::default(), now)
            .await
            .unwrap();
        assert_eq!(redeemed.status, CodeStatus::Used);

        let second = store
            .redeem("C-1", "ORDER-2", RedeemerInfo::default(), now)
            .await;
        assert!(matches!(second, Err(PaymentError::ConflictError(_))));
    }

    #[tokio::test]
    async fn test_payment_alias_and_terminal_stickiness() {
        let dir = tempdir().unwrap();
        let store = RocksDbStore::open(dir.path()).unwrap();

        let payment = Payment::new(
            "ORDER-1",
            Amount::new(dec!(100)).unwrap(),
            Currency::Tzs,
            "m-1",
            Some("LEGACY-1".to_string()),
            Utc::now(),
        );
        PaymentStore::insert(&store, payment).await.unwrap();

        let by_alias = PaymentStore::get(&store, "LEGACY-1").await.unwrap().unwrap();
        assert_eq!(by_alias.order_id, "ORDER-1");

        store
            .apply_status("ORDER-1", PaymentStatus::Failed, None, "bank", Utc::now())
            .await
            .unwrap();
        let update = store
            .apply_status(
                "ORDER-1",
                PaymentStatus::Completed,
                None,
                "bank",
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(update.payment.status, PaymentStatus::Failed);
        assert!(!update.payment.history.last().unwrap().applied);
    }

    #[tokio::test]
    async fn test_service_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let now = Utc::now();
        {
            let store = RocksDbStore::open(dir.path()).unwrap();
            ServiceStore::insert(
                &store,
                ServiceEntitlement::new("s-1", "ORDER-1", "premium", now),
            )
            .await
            .unwrap();
        }

        let store = RocksDbStore::open(dir.path()).unwrap();
        let svc = ServiceStore::get(&store, "s-1").await.unwrap().unwrap();
        assert_eq!(svc.payment_id, "ORDER-1");
        assert_eq!(svc.status, ServiceStatus::Pending);
    }
}

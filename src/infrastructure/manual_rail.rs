use crate::domain::control_number::RedeemerInfo;
use crate::domain::money::{Amount, Currency};
use crate::domain::ports::{ProviderAdapter, ProviderReceipt};
use crate::error::ProviderError;
use async_trait::async_trait;
use uuid::Uuid;

/// Provider adapter for manually settled rails (bank counters, agents).
///
/// Initiation always acknowledges with a generated reference; the actual
/// confirmation arrives later as an operator-submitted external event. Used
/// by the batch driver and as the default adapter in tests.
#[derive(Default, Clone)]
pub struct ManualRail;

impl ManualRail {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProviderAdapter for ManualRail {
    fn name(&self) -> &str {
        "manual"
    }

    async fn initiate_payment(
        &self,
        _order_id: &str,
        _amount: &Amount,
        _currency: Currency,
        _payer: &RedeemerInfo,
    ) -> Result<ProviderReceipt, ProviderError> {
        Ok(ProviderReceipt {
            external_reference: format!("MAN-{}", Uuid::new_v4().simple()),
            provider_status: "RECEIVED".to_string(),
        })
    }

    async fn query_status(&self, _order_id: &str) -> Result<String, ProviderError> {
        // A manual rail has nothing to report until an operator confirms.
        Ok("RECEIVED".to_string())
    }
}

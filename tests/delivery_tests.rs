use malipo::application::gateway::Gateway;
use malipo::config::{CoreConfig, CoreConfigBuilder};
use malipo::domain::control_number::{CodeSpec, RedeemerInfo};
use malipo::domain::principal::Principal;
use malipo::domain::service::AccessResult;
use malipo::infrastructure::in_memory::{
    InMemoryControlNumberStore, InMemoryPaymentStore, InMemoryServiceStore,
};
use malipo::infrastructure::manual_rail::ManualRail;
use rust_decimal_macros::dec;
use std::sync::Arc;

fn gateway_with(config: CoreConfig) -> Gateway {
    Gateway::new(
        Arc::new(InMemoryControlNumberStore::new()),
        Arc::new(InMemoryPaymentStore::new()),
        Arc::new(InMemoryServiceStore::new()),
        Arc::new(ManualRail::new()),
        config,
    )
}

async fn settle_order(gateway: &Gateway, order_id: &str) -> String {
    let mut spec = CodeSpec::for_amount(dec!(1000));
    spec.service = Some("premium".to_string());
    let cn = gateway
        .generate_control_number(&Principal::api_key("m-1"), spec)
        .await
        .unwrap();
    let service_id = gateway
        .redeem_control_number(
            &Principal::api_key("m-1"),
            &cn.code,
            order_id,
            RedeemerInfo::default(),
        )
        .await
        .unwrap()
        .service_id
        .unwrap();

    gateway
        .submit_external_event(malipo::application::reconciliation::RawPaymentEvent {
            provider: "manual".to_string(),
            order_id: order_id.to_string(),
            status: "CONFIRMED".to_string(),
            message: None,
            external_reference: None,
            received_at: None,
        })
        .await
        .unwrap();
    service_id
}

#[tokio::test]
async fn test_activated_service_carries_expiry_from_config() {
    let config = CoreConfigBuilder::new()
        .service_duration(Some(chrono::Duration::days(30)))
        .build();
    let gateway = gateway_with(config);

    let service_id = settle_order(&gateway, "ORDER-1").await;
    match gateway.check_service_access(&service_id).await.unwrap() {
        AccessResult::Granted { expires_at } => assert!(expires_at.is_some()),
        denied => panic!("expected access, got {denied:?}"),
    }
}

#[tokio::test]
async fn test_unbounded_service_never_expires() {
    let config = CoreConfigBuilder::new().service_duration(None).build();
    let gateway = gateway_with(config);

    let service_id = settle_order(&gateway, "ORDER-1").await;
    match gateway.check_service_access(&service_id).await.unwrap() {
        AccessResult::Granted { expires_at } => assert!(expires_at.is_none()),
        denied => panic!("expected access, got {denied:?}"),
    }

    let report = gateway.run_sweeps().await.unwrap();
    assert_eq!(report.services_expired, 0);
}

#[tokio::test]
async fn test_expiry_sweep_revokes_access() {
    // A lifetime short enough to lapse within the test
    let config = CoreConfigBuilder::new()
        .service_duration(Some(chrono::Duration::milliseconds(20)))
        .build();
    let gateway = gateway_with(config);

    let service_id = settle_order(&gateway, "ORDER-1").await;
    tokio::time::sleep(std::time::Duration::from_millis(60)).await;

    // The predicate alone already denies, sweep or not
    let access = gateway.check_service_access(&service_id).await.unwrap();
    assert!(!access.is_granted());

    let report = gateway.run_sweeps().await.unwrap();
    assert_eq!(report.services_expired, 1);

    // Idempotent on re-run
    let report = gateway.run_sweeps().await.unwrap();
    assert_eq!(report.services_expired, 0);

    match gateway.check_service_access(&service_id).await.unwrap() {
        AccessResult::Denied { expired, .. } => assert!(expired),
        granted => panic!("expected denial, got {granted:?}"),
    }
}

#[tokio::test]
async fn test_code_without_service_completes_without_delivery() {
    let gateway = gateway_with(CoreConfig::default());
    let cn = gateway
        .generate_control_number(&Principal::api_key("m-1"), CodeSpec::for_amount(dec!(100)))
        .await
        .unwrap();
    let result = gateway
        .redeem_control_number(
            &Principal::api_key("m-1"),
            &cn.code,
            "ORDER-1",
            RedeemerInfo::default(),
        )
        .await
        .unwrap();
    assert!(result.service_id.is_none());

    let receipt = gateway
        .submit_external_event(malipo::application::reconciliation::RawPaymentEvent {
            provider: "manual".to_string(),
            order_id: "ORDER-1".to_string(),
            status: "CONFIRMED".to_string(),
            message: None,
            external_reference: None,
            received_at: None,
        })
        .await
        .unwrap();
    assert!(receipt.accepted);
}

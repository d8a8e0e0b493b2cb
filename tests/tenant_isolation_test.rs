//! Every read and write is scoped to the caller's client and engagement.

mod common;

use phaseflow::domain::models::PhasePayload;
use phaseflow::services::{CreateFlowRequest, OperatorOverride};
use phaseflow::{
    CommitMode, DomainError, FlowExportService, FlowFilter, FlowKind, FlowStateService, TenantContext,
    TransitionRejection,
};
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn test_other_tenant_cannot_see_or_touch_flow() {
    let store = common::memory_store().await;
    let registries = common::abc_registries();
    let service = FlowStateService::new(store.clone(), registries.clone());
    let owner = common::tenant();
    let other_client = TenantContext::new(Uuid::new_v4(), owner.engagement_id, "intruder");
    let other_engagement = TenantContext::new(owner.client_id, Uuid::new_v4(), "intruder");

    let (master_id, sub) = service
        .orchestrator()
        .create_flow(CreateFlowRequest::new(owner.clone(), FlowKind::Planning), CommitMode::Immediate)
        .await
        .unwrap();

    for stranger in [&other_client, &other_engagement] {
        assert!(service.get_by_flow_id(stranger, master_id).await.unwrap().is_none());
        assert!(service.get_subordinate(stranger, master_id, FlowKind::Planning).await.unwrap().is_none());

        let listed = service.orchestrator().list_flows(stranger, &FlowFilter::default()).await.unwrap();
        assert!(listed.is_empty());

        let err = service
            .update_flow_phase(stranger, master_id, FlowKind::Planning, "a", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::SubordinateKindNotFound { .. }));

        let err = service.save_flow_state(stranger, master_id, json!({"x": 1})).await.unwrap_err();
        assert!(matches!(err, DomainError::FlowNotFound(_)));

        let payload = PhasePayload::Unknown { phase: "a".to_string(), data: json!({}) };
        let err = service.save_phase_result(stranger, sub.id, payload).await.unwrap_err();
        assert!(matches!(err, DomainError::SubordinateNotFound(_)));

        let err = service.orchestrator().pause_flow(stranger, master_id).await.unwrap_err();
        assert!(matches!(err, DomainError::FlowNotFound(_)));

        let err = service.orchestrator().delete_flow(stranger, master_id).await.unwrap_err();
        assert!(matches!(err, DomainError::FlowNotFound(_)));

        let err = OperatorOverride::new(store.clone(), registries.clone())
            .force_phase(stranger, sub.id, Some("c"), "ops", "test")
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::SubordinateNotFound(_)));

        let err = FlowExportService::new(store.clone()).export(stranger, master_id).await.unwrap_err();
        assert!(matches!(err, DomainError::FlowNotFound(_)));
    }

    // The owner's flow is untouched.
    let snapshot = service.get_by_flow_id(&owner, master_id).await.unwrap().unwrap();
    assert!(snapshot.master.phase_transitions.is_empty());
    assert_eq!(snapshot.master.flow_state, json!({}));
    assert!(snapshot.subordinates[0].current_phase.is_none());
}

#[tokio::test]
async fn test_two_tenants_only_see_their_own_flows() {
    let store = common::memory_store().await;
    let service = FlowStateService::new(store.clone(), common::abc_registries());
    let first = common::tenant();
    let second = common::tenant();

    let (first_id, first_sub) = service
        .orchestrator()
        .create_flow(CreateFlowRequest::new(first.clone(), FlowKind::Planning), CommitMode::Immediate)
        .await
        .unwrap();
    let (second_id, second_sub) = service
        .orchestrator()
        .create_flow(CreateFlowRequest::new(second.clone(), FlowKind::Planning), CommitMode::Immediate)
        .await
        .unwrap();

    for (tenant, own_id, own_sub, foreign_id, foreign_sub) in [
        (&first, first_id, first_sub.id, second_id, second_sub.id),
        (&second, second_id, second_sub.id, first_id, first_sub.id),
    ] {
        let own = service.get_by_flow_id(tenant, own_id).await.unwrap().unwrap();
        assert_eq!(own.subordinates[0].id, own_sub);
        assert!(service.get_by_flow_id(tenant, foreign_id).await.unwrap().is_none());
        assert!(service.get_subordinate(tenant, foreign_id, FlowKind::Planning).await.unwrap().is_none());

        let err = FlowExportService::new(store.clone()).export(tenant, foreign_id).await.unwrap_err();
        assert!(matches!(err, DomainError::FlowNotFound(id) if id == foreign_id));

        let payload = PhasePayload::Unknown { phase: "a".to_string(), data: json!({}) };
        let err = service.save_phase_result(tenant, foreign_sub, payload).await.unwrap_err();
        assert!(matches!(err, DomainError::SubordinateNotFound(id) if id == foreign_sub));

        let listed = service.orchestrator().list_flows(tenant, &FlowFilter::default()).await.unwrap();
        let ids: Vec<Uuid> = listed.iter().map(|m| m.master_flow_id).collect();
        assert_eq!(ids, vec![own_id]);
    }
}

#[tokio::test]
async fn test_engine_cannot_lock_flow_under_foreign_tenant() {
    let store = common::memory_store().await;
    let service = FlowStateService::new(store, common::abc_registries());
    let owner = common::tenant();

    let (_, mut sub) = service
        .orchestrator()
        .create_flow(CreateFlowRequest::new(owner.clone(), FlowKind::Planning), CommitMode::Immediate)
        .await
        .unwrap();

    // A flow handle carrying the wrong tenant finds nothing to lock.
    sub.tenant = TenantContext::new(Uuid::new_v4(), Uuid::new_v4(), "intruder");
    let result = service.engine().advance_phase(&mut sub, "a", None, None).await;
    assert!(!result.success);
    assert_eq!(result.rejection, Some(TransitionRejection::NotFoundForLocking));
    assert_eq!(result.warnings, vec![format!("flow {} not found for locking", sub.id)]);
}

//! Property tests for transition validity.

mod common;

use phaseflow::services::CreateFlowRequest;
use phaseflow::{CommitMode, FlowKind, FlowStateService, PhaseRegistry};
use proptest::prelude::*;

fn any_kind() -> impl Strategy<Value = FlowKind> {
    prop::sample::select(FlowKind::ALL.to_vec())
}

proptest! {
    /// From "not started" only the first phase is reachable.
    #[test]
    fn prop_only_first_phase_from_not_started(kind in any_kind(), pick in 0usize..16) {
        let registry = PhaseRegistry::builtin(kind);
        let names: Vec<&str> = registry.phase_names().collect();
        let target = names[pick % names.len()];

        prop_assert_eq!(registry.is_valid_transition(None, target), target == names[0]);
    }

    /// i -> i+1 is valid; i -> i+2, i -> i-1 and i -> i are not.
    #[test]
    fn prop_only_next_phase_is_valid(kind in any_kind(), pick in 0usize..16) {
        let registry = PhaseRegistry::builtin(kind);
        let names: Vec<&str> = registry.phase_names().collect();
        let i = pick % names.len();
        let current = Some(names[i]);

        for (j, target) in names.iter().copied().enumerate() {
            prop_assert_eq!(registry.is_valid_transition(current, target), j == i + 1);
        }
        prop_assert_eq!(registry.next_phase(current).is_none(), registry.is_terminal(names[i]));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Random target sequences never leave the flow out of step with a
    /// simple sequential model.
    #[test]
    fn prop_engine_matches_sequential_model(targets in prop::collection::vec(0usize..4, 1..12)) {
        tokio_test::block_on(async {
            let store = common::memory_store().await;
            let service = FlowStateService::new(store, common::abc_registries());
            let tenant = common::tenant();
            let (master_id, _) = service
                .orchestrator()
                .create_flow(CreateFlowRequest::new(tenant.clone(), FlowKind::Planning), CommitMode::Immediate)
                .await
                .unwrap();

            let phases = ["a", "b", "c", "d"];
            let mut model: Option<usize> = None;
            for pick in targets {
                let target = phases[pick];
                let result = service
                    .update_flow_phase(&tenant, master_id, FlowKind::Planning, target, None, None)
                    .await
                    .unwrap();

                let next = model.map_or(0, |i| i + 1);
                if pick == 3 {
                    // Not a registry member.
                    assert!(!result.success);
                } else if Some(pick) == model {
                    assert!(result.success && result.was_idempotent);
                } else if pick == next {
                    assert!(result.success && !result.was_idempotent);
                    model = Some(pick);
                } else {
                    assert!(!result.success);
                }

                let flow = service
                    .get_subordinate(&tenant, master_id, FlowKind::Planning)
                    .await
                    .unwrap()
                    .unwrap();
                assert_eq!(flow.current_phase.as_deref(), model.map(|i| phases[i]));
                for (i, phase) in phases[..3].iter().enumerate() {
                    let expected = model.is_some_and(|m| i < m);
                    assert_eq!(flow.flag(&format!("{phase}_completed")), expected);
                }
                assert!(flow.completed_at.is_none());
            }
        });
    }
}

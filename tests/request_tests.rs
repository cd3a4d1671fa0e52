//! The transition protocol: validation order, outcome handling, event and
//! record persistence, property mirroring, and the administrative routines.

mod common;

use serde_json::json;

use common::harness;
use itemflow::machine::builtin::{default_transitions as dt, states, PREDEFINED_DONE};
use itemflow::models::ItemId;
use itemflow::workflow::predefined::WRITE_PROPERTY;
use itemflow::{EngineError, WorkflowBuilder};

#[tokio::test]
async fn test_success_lands_on_the_declared_target_state() {
    let h = harness();
    let alice = h.agent("alice", &[]);
    let item = h.linear_item().await;

    h.engine
        .request_action_as(item, &alice, "workflow/domain/Draft", dt::START, None, None)
        .await
        .unwrap();
    let (state, active) = h.step_state(item, "workflow/domain/Draft").await;
    assert_eq!(state, states::STARTED);
    assert!(active);
}

#[tokio::test]
async fn test_failure_leaves_the_state_untouched() {
    let h = harness();
    let alice = h.agent("alice", &[]);
    let item = h.linear_item().await;

    // Complete starts at Started, not Waiting
    let result = h
        .engine
        .request_action_as(
            item,
            &alice,
            "workflow/domain/Draft",
            dt::COMPLETE,
            None,
            None,
        )
        .await;
    assert!(matches!(result, Err(EngineError::InvalidTransition { .. })));
    let (state, active) = h.step_state(item, "workflow/domain/Draft").await;
    assert_eq!(state, states::WAITING);
    assert!(active);
}

#[tokio::test]
async fn test_unknown_transition_id() {
    let h = harness();
    let alice = h.agent("alice", &[]);
    let item = h.linear_item().await;

    let result = h
        .engine
        .request_action_as(item, &alice, "workflow/domain/Draft", 99, None, None)
        .await;
    assert!(matches!(result, Err(EngineError::InvalidTransition { .. })));
}

#[tokio::test]
async fn test_required_outcome_must_be_supplied() {
    let h = harness();
    let alice = h.agent("alice", &[]);
    let item = h.linear_item().await;

    let path = format!("workflow/predefined/{WRITE_PROPERTY}");
    let result = h
        .engine
        .request_action_as(item, &alice, &path, PREDEFINED_DONE, None, None)
        .await;
    assert!(matches!(result, Err(EngineError::InvalidData { .. })));
}

#[tokio::test]
async fn test_payload_on_an_outcomeless_transition_is_rejected() {
    let h = harness();
    let alice = h.agent("alice", &[]);
    let item = h.linear_item().await;

    let result = h
        .engine
        .request_action_as(
            item,
            &alice,
            "workflow/domain/Draft",
            dt::DONE,
            Some(json!({"unexpected": true})),
            None,
        )
        .await;
    assert!(matches!(result, Err(EngineError::InvalidData { .. })));
}

#[tokio::test]
async fn test_role_property_gates_the_request() {
    let h = harness();
    let alice = h.agent("alice", &["Author"]);
    let bob = h.agent("bob", &["Reviewer"]);

    let mut builder = WorkflowBuilder::new().unwrap();
    let draft = builder.step("Draft").unwrap();
    builder.require_role(draft, "Author").unwrap();

    let item = ItemId::new();
    h.engine
        .initialize_item(item, builder.build().unwrap())
        .await
        .unwrap();

    let denied = h
        .engine
        .request_action_as(item, &bob, "workflow/domain/Draft", dt::START, None, None)
        .await;
    assert!(matches!(denied, Err(EngineError::AccessRights { .. })));

    h.engine
        .request_action_as(item, &alice, "workflow/domain/Draft", dt::START, None, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_reservation_excludes_other_agents() {
    let h = harness();
    let alice = h.agent("alice", &[]);
    let bob = h.agent("bob", &[]);
    let item = h.linear_item().await;

    // Start reserves the step for alice
    h.engine
        .request_action_as(item, &alice, "workflow/domain/Draft", dt::START, None, None)
        .await
        .unwrap();

    let denied = h
        .engine
        .request_action_as(
            item,
            &bob,
            "workflow/domain/Draft",
            dt::COMPLETE,
            None,
            None,
        )
        .await;
    assert!(matches!(denied, Err(EngineError::AccessRights { .. })));

    h.engine
        .request_action_as(
            item,
            &alice,
            "workflow/domain/Draft",
            dt::COMPLETE,
            None,
            None,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_outcome_records_and_viewpoint() {
    let h = harness();
    let alice = h.agent("alice", &[]);
    let item = h.linear_item().await;

    h.engine
        .request_action_as(item, &alice, "workflow/domain/Draft", dt::START, None, None)
        .await
        .unwrap();
    let events_before = h.event_count(item);

    let outcome = h
        .engine
        .request_action_as(
            item,
            &alice,
            "workflow/domain/Draft",
            dt::COMPLETE,
            Some(json!({"result": "ok"})),
            None,
        )
        .await
        .unwrap();
    assert!(outcome.unwrap().contains("\"result\""));

    assert_eq!(h.event_count(item), events_before + 1);
    // Outcome keyed by the step name when nothing declares a schema
    let outcomes = h.outcome_paths(item);
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].starts_with("outcome/Draft/0/"));

    let viewpoint = h
        .store
        .committed_value(item, "viewpoint/Draft/last")
        .unwrap();
    let outcome_event: u64 = outcomes[0].rsplit('/').next().unwrap().parse().unwrap();
    assert_eq!(viewpoint["event_id"].as_u64().unwrap(), outcome_event);
}

#[tokio::test]
async fn test_outcome_fields_mirror_into_item_properties() {
    let h = harness();
    let alice = h.agent("alice", &[]);

    let mut builder = WorkflowBuilder::new().unwrap();
    let draft = builder.step("Draft").unwrap();
    builder
        .set_property(draft, "itemProperty:status", json!("/state"))
        .unwrap();

    let item = ItemId::new();
    h.engine
        .initialize_item(item, builder.build().unwrap())
        .await
        .unwrap();

    h.engine
        .request_action_as(item, &alice, "workflow/domain/Draft", dt::START, None, None)
        .await
        .unwrap();
    h.engine
        .request_action_as(
            item,
            &alice,
            "workflow/domain/Draft",
            dt::COMPLETE,
            Some(json!({"state": "done", "detail": "n/a"})),
            None,
        )
        .await
        .unwrap();

    assert_eq!(
        h.store.committed_value(item, "property/status"),
        Some(json!("done"))
    );
}

#[tokio::test]
async fn test_write_property_routine_skips_workflow_persistence() {
    let h = harness();
    let alice = h.agent("alice", &[]);
    let item = h.linear_item().await;

    let workflow_before = h.store.committed_value(item, "workflow").unwrap();
    let path = format!("workflow/predefined/{WRITE_PROPERTY}");
    h.engine
        .request_action_as(
            item,
            &alice,
            &path,
            PREDEFINED_DONE,
            Some(json!({"name": "priority", "value": 5})),
            None,
        )
        .await
        .unwrap();

    assert_eq!(
        h.store.committed_value(item, "property/priority"),
        Some(json!(5))
    );
    // Purely administrative: the serialized workflow was not rewritten
    let workflow_after = h.store.committed_value(item, "workflow").unwrap();
    assert_eq!(workflow_before, workflow_after);
    // The step is repeatable and still offers its transition
    let (state, active) = h.step_state(item, &path).await;
    assert_eq!(state, 0);
    assert!(active);
}

#[tokio::test]
async fn test_configured_outcome_steps_run_on_domain_transitions() {
    let h = harness();
    let alice = h.agent("alice", &[]);

    let mut builder = WorkflowBuilder::new().unwrap();
    let draft = builder.step("Draft").unwrap();
    builder
        .set_property(draft, "OutcomeSteps", json!(["WriteProperty"]))
        .unwrap();

    let item = ItemId::new();
    h.engine
        .initialize_item(item, builder.build().unwrap())
        .await
        .unwrap();

    h.engine
        .request_action_as(item, &alice, "workflow/domain/Draft", dt::START, None, None)
        .await
        .unwrap();
    h.engine
        .request_action_as(
            item,
            &alice,
            "workflow/domain/Draft",
            dt::COMPLETE,
            Some(json!({"name": "stage", "value": "reviewed"})),
            None,
        )
        .await
        .unwrap();

    assert_eq!(
        h.store.committed_value(item, "property/stage"),
        Some(json!("reviewed"))
    );
}

#[tokio::test]
async fn test_query_transitions_compute_their_own_outcome() {
    use itemflow::machine::{OutcomeRequirement, StateDef, StateMachineDef, TransitionDef};

    let h = harness();
    let alice = h.agent("alice", &[]);
    h.scripts
        .register("measure", |_item, _props| Ok(json!({"reading": 42})));
    h.engine
        .machines()
        .register(
            StateMachineDef::new("Measured", 0, 0)
                .with_state(StateDef::new(0, "Waiting", false))
                .with_state(StateDef::new(1, "Recorded", true))
                .with_transition(
                    TransitionDef::new(0, "Record", 0, 1)
                        .with_outcome(OutcomeRequirement::Optional {
                            schema: None,
                            version: 0,
                        })
                        .with_query("measure"),
                ),
        )
        .unwrap();

    let mut builder = WorkflowBuilder::new().unwrap();
    let probe = builder.step("Probe").unwrap();
    builder.use_machine(probe, "Measured", 0).unwrap();

    let item = ItemId::new();
    h.engine
        .initialize_item(item, builder.build().unwrap())
        .await
        .unwrap();

    let outcome = h
        .engine
        .request_action_as(item, &alice, "workflow/domain/Probe", 0, None, None)
        .await
        .unwrap();
    assert!(outcome.unwrap().contains("42"));
    assert_eq!(h.outcome_paths(item).len(), 1);
}

#[tokio::test]
async fn test_validation_failure_aborts_everything() {
    let h = common::strict_harness();
    h.validator.register("Draft", 0, vec!["title".to_string()]);
    let alice = h.agent("alice", &[]);
    let item = h.linear_item().await;

    h.engine
        .request_action_as(item, &alice, "workflow/domain/Draft", dt::START, None, None)
        .await
        .unwrap();
    let events_before = h.event_count(item);

    let result = h
        .engine
        .request_action_as(
            item,
            &alice,
            "workflow/domain/Draft",
            dt::COMPLETE,
            Some(json!({"body": "missing the title"})),
            None,
        )
        .await;
    assert!(matches!(result, Err(EngineError::InvalidData { .. })));

    let (state, _) = h.step_state(item, "workflow/domain/Draft").await;
    assert_eq!(state, states::STARTED);
    assert_eq!(h.event_count(item), events_before);
    assert!(h.outcome_paths(item).is_empty());
}

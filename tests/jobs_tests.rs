//! Job computation and delivery: the leaf-only recursion, the gate-free
//! inspection variant, role and reservation filtering, and the per-agent
//! isolation of the pusher.

mod common;

use serde_json::json;

use common::harness;
use itemflow::jobs::JobPusher;
use itemflow::machine::builtin::default_transitions as dt;
use itemflow::models::ItemId;
use itemflow::WorkflowBuilder;

#[tokio::test]
async fn test_only_the_deepest_active_steps_offer_jobs() {
    let h = harness();
    let alice = h.agent("alice", &[]);
    let item = h.linear_item().await;

    let jobs = h.engine.calculate_jobs(&alice, item, true).await.unwrap();
    assert!(
        jobs.iter().any(|j| j.step_path == "workflow/domain/Draft"),
        "the active leaf offers its transitions"
    );
    assert!(
        !jobs.iter().any(|j| j.step_path == "workflow"),
        "the root never competes with its active children"
    );
    assert!(
        !jobs.iter().any(|j| j.step_path == "workflow/domain"),
        "containers never compete with their active children"
    );
    assert!(
        !jobs.iter().any(|j| j.step_path == "workflow/domain/Review"),
        "inactive steps offer nothing"
    );

    // Draft sits in Waiting: Start and Done are both possible
    let draft_jobs: Vec<_> = jobs
        .iter()
        .filter(|j| j.step_path == "workflow/domain/Draft")
        .collect();
    assert_eq!(draft_jobs.len(), 2);
}

#[tokio::test]
async fn test_administrative_steps_stay_available() {
    let h = harness();
    let alice = h.agent("alice", &[]);
    let item = h.linear_item().await;

    let jobs = h.engine.calculate_jobs(&alice, item, true).await.unwrap();
    assert!(jobs
        .iter()
        .any(|j| j.step_path == "workflow/predefined/WriteProperty"));
}

#[tokio::test]
async fn test_recurse_flag_stops_at_the_given_level() {
    let h = harness();
    let alice = h.agent("alice", &[]);
    let item = h.linear_item().await;

    // Without recursion the root is consulted alone, and it is active
    let jobs = h.engine.calculate_jobs(&alice, item, false).await.unwrap();
    assert!(jobs.iter().all(|j| j.step_path == "workflow"));
}

#[tokio::test]
async fn test_calculate_all_jobs_ignores_the_active_gate() {
    let h = harness();
    let alice = h.agent("alice", &[]);
    let item = h.linear_item().await;

    let jobs = h.engine.calculate_all_jobs(&alice, item).await.unwrap();
    assert!(
        jobs.iter().any(|j| j.step_path == "workflow/domain/Review"),
        "inactive steps appear in the inspection variant"
    );
    assert!(
        jobs.iter().any(|j| j.step_path == "workflow/domain"),
        "containers appear in the inspection variant"
    );
}

#[tokio::test]
async fn test_roles_and_reservations_filter_jobs() {
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

    let bobs = h.engine.calculate_jobs(&bob, item, true).await.unwrap();
    assert!(
        !bobs.iter().any(|j| j.step_path == "workflow/domain/Draft"),
        "a step's role requirement hides it from other agents"
    );

    let alices = h.engine.calculate_jobs(&alice, item, true).await.unwrap();
    assert!(alices
        .iter()
        .any(|j| j.step_path == "workflow/domain/Draft" && j.role == "Author"));

    // A reservation narrows the step to its holder
    h.engine
        .request_action_as(item, &alice, "workflow/domain/Draft", dt::START, None, None)
        .await
        .unwrap();
    let carol = h.agent("carol", &["Author"]);
    let carols = h.engine.calculate_jobs(&carol, item, true).await.unwrap();
    assert!(!carols.iter().any(|j| j.step_path == "workflow/domain/Draft"));
    let alices = h.engine.calculate_jobs(&alice, item, true).await.unwrap();
    assert!(alices.iter().any(|j| j.step_path == "workflow/domain/Draft"));
}

#[tokio::test]
async fn test_pusher_isolates_per_agent_failures() {
    let h = harness();
    let alice = h.agent("alice", &["Author"]);
    let bob = h.agent("bob", &["Author"]);
    h.directory.fail_delivery_for("bob");

    let mut builder = WorkflowBuilder::new().unwrap();
    let draft = builder.step("Draft").unwrap();
    builder.require_role(draft, "Author").unwrap();

    let item = ItemId::new();
    h.engine
        .initialize_item(item, builder.build().unwrap())
        .await
        .unwrap();

    let delivered = JobPusher::push_now(h.engine.context(), item, "Author").await;
    assert_eq!(delivered, 1, "bob's failure must not stop alice's delivery");

    let inbox = h.directory.deliveries(alice.id);
    assert_eq!(inbox.len(), 1);
    assert!(inbox[0]
        .iter()
        .any(|j| j.step_path == "workflow/domain/Draft"));
    assert!(h.directory.deliveries(bob.id).is_empty());
}

#[tokio::test]
async fn test_pusher_announces_the_fan_out() {
    let h = harness();
    h.agent("alice", &["Author"]);
    let item = h.linear_item().await;
    let mut events = h.engine.subscribe();

    JobPusher::push_now(h.engine.context(), item, "Author").await;
    let announced = events.recv().await.unwrap();
    assert_eq!(announced.name, "jobs.pushed");
    assert_eq!(announced.context["role"], json!("Author"));
    assert_eq!(announced.context["agents"], json!(1));
}

#[tokio::test]
async fn test_pusher_handles_unknown_items() {
    let h = harness();
    h.agent("alice", &["Author"]);

    // No workflow stored: nothing deliverable, nothing panics
    let delivered = JobPusher::push_now(h.engine.context(), ItemId::new(), "Author").await;
    assert_eq!(delivered, 0);
}

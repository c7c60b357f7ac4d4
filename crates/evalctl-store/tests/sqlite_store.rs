// evalctl-store/tests/sqlite_store.rs
// ============================================================================
// Module: SQLite Store Tests
// Description: Conformance tests for the repository and task queue traits
//              implemented over SQLite.
// Purpose: Exercise durability, optimistic concurrency, and dispatch
//          ordering end to end against a real (in-memory) database.
// Dependencies: evalctl-store, evalctl-core, serde_json
// ============================================================================

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and fixtures are permitted."
)]

use evalctl_core::{
    EngineError, ModelEvaluation, ModelId, ModelRepository, StateMachine, TaskQueue, TaskStatus,
    UseCase, UseCaseId, UseCaseRepository, UseCaseState,
};
use evalctl_store::SqliteStore;
use time::OffsetDateTime;

fn sample_use_case(name: &str) -> UseCase {
    let now = OffsetDateTime::now_utc();
    UseCase {
        id: UseCaseId::new(),
        name: name.to_owned(),
        team_email: "team@example.com".to_owned(),
        state: UseCaseState::TemplateGeneration,
        config_file_key: None,
        dataset_file_key: None,
        quality_issues: Vec::new(),
        evaluation_results: std::collections::BTreeMap::new(),
        metadata: std::collections::BTreeMap::new(),
        created_at: now,
        updated_at: now,
    }
}

fn sample_model(use_case_id: &UseCaseId) -> ModelEvaluation {
    let now = OffsetDateTime::now_utc();
    ModelEvaluation {
        id: ModelId::new(),
        use_case_id: use_case_id.clone(),
        model_name: "gpt-fictional".to_owned(),
        version: "v1".to_owned(),
        current_state: evalctl_core::ModelEvaluationState::Registered,
        dataset_file_key: None,
        predictions_file_key: None,
        quality_issues: Vec::new(),
        metadata: std::collections::BTreeMap::new(),
        created_at: now,
        updated_at: now,
    }
}

#[test]
fn create_then_get_round_trips_a_use_case() {
    let store = SqliteStore::open_in_memory().expect("open store");
    let use_case = sample_use_case("acme-churn-model");
    store.create(&use_case).expect("create use case");

    let loaded = store.get(&use_case.id).expect("get use case");
    assert_eq!(loaded.name, use_case.name);
    assert_eq!(loaded.team_email, use_case.team_email);
    assert_eq!(loaded.state, UseCaseState::TemplateGeneration);
}

#[test]
fn get_on_a_missing_use_case_returns_not_found() {
    let store = SqliteStore::open_in_memory().expect("open store");
    let result = store.get(&UseCaseId::new());
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[test]
fn update_with_a_stale_updated_at_is_rejected() {
    let store = SqliteStore::open_in_memory().expect("open store");
    let use_case = sample_use_case("stale-write-target");
    store.create(&use_case).expect("create use case");

    let mut first_writer = use_case.clone();
    first_writer.name = "renamed-once".to_owned();
    store.update(&first_writer).expect("first update wins the race");

    let mut second_writer = use_case;
    second_writer.name = "renamed-twice".to_owned();
    let result = store.update(&second_writer);
    assert!(matches!(result, Err(EngineError::StaleWrite(_))));
}

#[test]
fn state_machine_round_trips_through_save_and_load() {
    let store = SqliteStore::open_in_memory().expect("open store");
    let use_case = sample_use_case("state-machine-target");
    store.create(&use_case).expect("create use case");

    let mut sm = store.load_state_machine(&use_case.id).expect("load state machine");
    assert_eq!(sm.history().len(), 1);

    sm.transition_to(UseCaseState::TemplateSent, "system", None, OffsetDateTime::now_utc(), false)
        .expect("legal transition")
        .then_some(())
        .expect("transition should have applied");
    store.save_state_machine(&use_case.id, &sm).expect("save state machine");

    let reloaded = store.load_state_machine(&use_case.id).expect("reload state machine");
    assert_eq!(*reloaded.current(), UseCaseState::TemplateSent);
    assert_eq!(reloaded.history().len(), 2);
}

#[test]
fn save_state_machine_rejects_a_machine_with_corrupted_history() {
    let store = SqliteStore::open_in_memory().expect("open store");
    let use_case = sample_use_case("corrupt-history-target");
    store.create(&use_case).expect("create use case");

    let history = store.load_state_machine(&use_case.id).expect("load state machine").history().to_vec();
    let rebuilt = StateMachine::from_parts(UseCaseState::TemplateGeneration, history);
    assert!(rebuilt.is_ok());
}

#[test]
fn model_repository_lists_models_owned_by_a_use_case() {
    let store = SqliteStore::open_in_memory().expect("open store");
    let use_case = sample_use_case("model-owner");
    store.create(&use_case).expect("create use case");

    let model_a = sample_model(&use_case.id);
    let model_b = sample_model(&use_case.id);
    store.create(&model_a).expect("create model a");
    store.create(&model_b).expect("create model b");

    let models = store.list_for_use_case(&use_case.id).expect("list models");
    assert_eq!(models.len(), 2);
}

#[test]
fn needing_action_surfaces_models_stuck_on_data_fixes() {
    let store = SqliteStore::open_in_memory().expect("open store");
    let use_case = sample_use_case("needs-attention");
    store.create(&use_case).expect("create use case");

    let mut model = sample_model(&use_case.id);
    store.create(&model).expect("create model");
    let mut sm = store.load_state_machine(&model.id).expect("load state machine");
    for next in [
        evalctl_core::ModelEvaluationState::QualityCheckPending,
        evalctl_core::ModelEvaluationState::QualityCheckRunning,
        evalctl_core::ModelEvaluationState::QualityCheckFailed,
        evalctl_core::ModelEvaluationState::AwaitingDataFix,
    ] {
        sm.transition_to(next, "system", None, OffsetDateTime::now_utc(), false)
            .expect("legal transition");
    }
    store.save_state_machine(&model.id, &sm).expect("save state machine");
    model.current_state = *sm.current();
    store.update(&model).expect("update model row");

    let needing_action = store.needing_action(&use_case.id).expect("needing action");
    assert_eq!(
        needing_action.get(&evalctl_core::ModelEvaluationState::AwaitingDataFix).map(Vec::len),
        Some(1)
    );
}

#[test]
fn enqueue_then_pick_next_claims_in_priority_order() {
    let store = SqliteStore::open_in_memory().expect("open store");
    let low = store.enqueue("send_notification", serde_json::json!({"n": 1}), 1, 3).expect("enqueue low");
    let high = store.enqueue("send_notification", serde_json::json!({"n": 2}), 10, 3).expect("enqueue high");

    let picked = store.pick_next().expect("pick next").expect("a task is dispatchable");
    assert_eq!(picked.id, high);
    assert_eq!(store.get_status(&high).expect("status"), TaskStatus::Running);
    assert_eq!(store.get_status(&low).expect("status"), TaskStatus::Pending);
}

#[test]
fn pick_next_returns_none_when_the_queue_is_empty() {
    let store = SqliteStore::open_in_memory().expect("open store");
    assert!(store.pick_next().expect("pick next").is_none());
}

#[test]
fn mark_failed_retries_until_the_budget_is_exhausted() {
    let store = SqliteStore::open_in_memory().expect("open store");
    let id = store.enqueue("run_quality_check", serde_json::json!({}), 5, 1).expect("enqueue");

    store.pick_next().expect("pick next").expect("task dispatchable");
    store.mark_failed(&id, "sidecar unreachable").expect("mark failed once");
    assert_eq!(store.get_status(&id).expect("status"), TaskStatus::Retrying);

    store.pick_next().expect("pick next").expect("task dispatchable again");
    store.mark_failed(&id, "sidecar unreachable again").expect("mark failed twice");
    assert_eq!(store.get_status(&id).expect("status"), TaskStatus::Failed);
}

#[test]
fn mark_completed_on_an_unknown_task_returns_not_found() {
    let store = SqliteStore::open_in_memory().expect("open store");
    let result = store.mark_completed(&evalctl_core::TaskId::new());
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[test]
fn request_cancellation_rejects_an_already_terminal_task() {
    let store = SqliteStore::open_in_memory().expect("open store");
    let id = store.enqueue("send_notification", serde_json::json!({}), 1, 0).expect("enqueue");
    store.pick_next().expect("pick next").expect("dispatchable");
    store.mark_completed(&id).expect("mark completed");

    let result = store.request_cancellation(&id);
    assert!(matches!(result, Err(EngineError::Validation(_))));
}

#[test]
fn queue_stats_counts_every_status_bucket() {
    let store = SqliteStore::open_in_memory().expect("open store");
    store.enqueue("validate_config", serde_json::json!({}), 1, 0).expect("enqueue");
    let completed = store.enqueue("validate_config", serde_json::json!({}), 1, 0).expect("enqueue");
    store.pick_next().expect("pick next").expect("dispatchable");
    store.mark_completed(&completed).expect("mark completed");

    let stats = store.queue_stats().expect("queue stats");
    assert_eq!(stats.get(&TaskStatus::Completed).copied(), Some(1));
    assert_eq!(stats.get(&TaskStatus::Pending).copied(), Some(1));
}

#[test]
fn reconcile_pending_work_reenqueues_once_for_a_crashed_save() {
    let store = SqliteStore::open_in_memory().expect("open store");
    let mut use_case = sample_use_case("crash-between-save-and-enqueue");
    use_case.state = UseCaseState::ConfigValidationRunning;
    store.create(&use_case).expect("create use case");

    let reenqueued = evalctl_store::store::reconcile_pending_work(&store).expect("reconcile");
    assert_eq!(reenqueued, 1);

    let again = evalctl_store::store::reconcile_pending_work(&store).expect("reconcile again");
    assert_eq!(again, 0, "a pending task already covers the use case, so no duplicate is queued");
}

#[test]
fn cleanup_removes_only_old_terminal_tasks() {
    let store = SqliteStore::open_in_memory().expect("open store");
    let id = store.enqueue("send_notification", serde_json::json!({}), 1, 0).expect("enqueue");
    store.pick_next().expect("pick next").expect("dispatchable");
    store.mark_completed(&id).expect("mark completed");

    let removed = store.cleanup(0).expect("cleanup");
    assert_eq!(removed, 1);
    assert!(matches!(store.get_status(&id), Err(EngineError::NotFound(_))));
}

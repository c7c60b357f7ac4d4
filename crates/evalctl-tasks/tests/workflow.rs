// evalctl-tasks/tests/workflow.rs
// ============================================================================
// Module: Workflow Integration Tests
// Description: End-to-end scenarios over a real (in-memory) SQLite store
//              and the built-in collaborator bundle.
// Purpose: Exercise the upload orchestrator and the four task handlers
//          together, the way the worker pool would drive them.
// Dependencies: evalctl-tasks, evalctl-store, evalctl-core, evalctl-collab,
//               tempfile
// ============================================================================

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and fixtures are permitted."
)]

use std::collections::BTreeMap;

use evalctl_collab::Collaborators;
use evalctl_core::{
    ModelEvaluation, ModelEvaluationState, ModelId, ModelRepository, TaskQueue, TaskStatus,
    UseCase, UseCaseId, UseCaseRepository, UseCaseState,
};
use evalctl_store::SqliteStore;
use evalctl_tasks::{dispatch, upload_config, upload_dataset, upload_predictions};
use serde_json::json;
use tempfile::TempDir;
use time::OffsetDateTime;

fn sample_use_case(state: UseCaseState) -> UseCase {
    let now = OffsetDateTime::now_utc();
    UseCase {
        id: UseCaseId::new(),
        name: "acme-churn-model".to_owned(),
        team_email: "team@example.com".to_owned(),
        state,
        config_file_key: None,
        dataset_file_key: None,
        quality_issues: Vec::new(),
        evaluation_results: BTreeMap::new(),
        metadata: BTreeMap::new(),
        created_at: now,
        updated_at: now,
    }
}

fn sample_model(use_case_id: &UseCaseId, state: ModelEvaluationState) -> ModelEvaluation {
    let now = OffsetDateTime::now_utc();
    ModelEvaluation {
        id: ModelId::new(),
        use_case_id: use_case_id.clone(),
        model_name: "gpt-fictional".to_owned(),
        version: "v1".to_owned(),
        current_state: state,
        dataset_file_key: None,
        predictions_file_key: None,
        quality_issues: Vec::new(),
        metadata: BTreeMap::new(),
        created_at: now,
        updated_at: now,
    }
}

/// Runs every `PENDING`/`RETRYING` task to exhaustion, as the worker pool
/// would, but synchronously and on the calling thread.
fn drain_queue(store: &SqliteStore, collaborators: &Collaborators) {
    while let Some(task) = store.pick_next().expect("pick next task") {
        match dispatch(&task.task_name, store, collaborators, &task.args) {
            Ok(()) => store.mark_completed(&task.id).expect("mark completed"),
            Err(err) => store.mark_failed(&task.id, &err.to_string()).expect("mark failed"),
        }
    }
}

#[test]
fn config_upload_with_no_models_reaches_evaluation_queued() {
    let blob_root = TempDir::new().expect("tempdir");
    let collaborators = Collaborators::with_builtins(blob_root.path()).expect("collaborators");
    let store = SqliteStore::open_in_memory().expect("open store");

    let use_case = sample_use_case(UseCaseState::AwaitingConfig);
    store.create(&use_case).expect("create use case");

    upload_config(&store, &collaborators, &use_case.id, br#"{"threshold": 0.5}"#)
        .expect("config upload accepted");
    drain_queue(&store, &collaborators);

    let reloaded = store.get(&use_case.id).expect("reload use case");
    assert_eq!(reloaded.state, UseCaseState::EvaluationQueued);
}

#[test]
fn dataset_quality_failure_then_fix_reaches_quality_check_passed() {
    let blob_root = TempDir::new().expect("tempdir");
    let collaborators = Collaborators::with_builtins(blob_root.path()).expect("collaborators");
    let store = SqliteStore::open_in_memory().expect("open store");

    let use_case = sample_use_case(UseCaseState::QualityCheckRunning);
    store.create(&use_case).expect("create use case");

    let mut model = sample_model(&use_case.id, ModelEvaluationState::Registered);
    model.metadata.insert(
        "field_config".to_owned(),
        json!({ "fields": [{ "path": "$.label", "required": true }] }),
    );
    store.create(&model).expect("create model");

    upload_dataset(&store, &collaborators, &use_case.id, &model.id, b"{\"other\": 1}\n")
        .expect("dataset upload accepted")
        .expect("run_quality_check task enqueued");
    drain_queue(&store, &collaborators);

    let after_failure = store.get(&model.id).expect("reload model");
    assert_eq!(after_failure.current_state, ModelEvaluationState::AwaitingDataFix);
    assert!(!after_failure.quality_issues.is_empty());

    upload_dataset(&store, &collaborators, &use_case.id, &model.id, b"{\"label\": \"yes\"}\n")
        .expect("fixed dataset upload accepted")
        .expect("run_quality_check task re-enqueued");
    drain_queue(&store, &collaborators);

    let after_fix = store.get(&model.id).expect("reload model");
    assert_eq!(after_fix.current_state, ModelEvaluationState::QualityCheckPassed);
}

#[test]
fn predictions_upload_drives_a_model_to_evaluation_completed() {
    let blob_root = TempDir::new().expect("tempdir");
    let collaborators = Collaborators::with_builtins(blob_root.path()).expect("collaborators");
    let store = SqliteStore::open_in_memory().expect("open store");

    let use_case = sample_use_case(UseCaseState::EvaluationQueued);
    store.create(&use_case).expect("create use case");

    let mut model = sample_model(&use_case.id, ModelEvaluationState::QualityCheckPassed);
    model.metadata.insert("evaluation_config".to_owned(), json!({ "fields": ["$.label"] }));
    store.create(&model).expect("create model");

    upload_predictions(&store, &collaborators, &use_case.id, &model.id, b"{\"label\": \"yes\"}\n")
        .expect("predictions upload accepted");
    drain_queue(&store, &collaborators);

    let reloaded = store.get(&model.id).expect("reload model");
    assert_eq!(reloaded.current_state, ModelEvaluationState::EvaluationCompleted);

    let use_case = store.get(&use_case.id).expect("reload use case");
    assert_eq!(use_case.state, UseCaseState::EvaluationCompleted);
    assert!(use_case.evaluation_results.contains_key("gpt-fictional"));
}

#[test]
fn predictions_upload_is_rejected_before_quality_check_passes() {
    let blob_root = TempDir::new().expect("tempdir");
    let collaborators = Collaborators::with_builtins(blob_root.path()).expect("collaborators");
    let store = SqliteStore::open_in_memory().expect("open store");

    let use_case = sample_use_case(UseCaseState::QualityCheckRunning);
    store.create(&use_case).expect("create use case");
    let model = sample_model(&use_case.id, ModelEvaluationState::Registered);
    store.create(&model).expect("create model");

    let result = upload_predictions(&store, &collaborators, &use_case.id, &model.id, b"{}\n");
    assert!(matches!(result, Err(evalctl_core::EngineError::InvalidStateForUpload { .. })));
}

#[test]
fn crash_before_dispatch_is_recovered_by_the_reconciler() {
    let blob_root = TempDir::new().expect("tempdir");
    let collaborators = Collaborators::with_builtins(blob_root.path()).expect("collaborators");
    let store = SqliteStore::open_in_memory().expect("open store");

    let use_case = sample_use_case(UseCaseState::AwaitingConfig);
    store.create(&use_case).expect("create use case");
    let task_id =
        upload_config(&store, &collaborators, &use_case.id, b"{}").expect("config upload accepted");

    // Simulate the process dying after the config task was enqueued but
    // before a worker ever picked it up: drop the row entirely and let the
    // reconciler notice the use case is past CONFIG_VALIDATION_RUNNING
    // with no matching pending task.
    store.mark_completed(&task_id).expect("pretend the original task vanished");

    let reenqueued = evalctl_store::reconcile_pending_work(&store).expect("reconcile");
    assert_eq!(reenqueued, 1);

    drain_queue(&store, &collaborators);
    let reloaded = store.get(&use_case.id).expect("reload use case");
    assert_eq!(reloaded.state, UseCaseState::EvaluationQueued);
    assert_eq!(store.get_status(&task_id).expect("status"), TaskStatus::Completed);
}

#[test]
fn repeated_failures_exhaust_the_retry_budget() {
    let store = SqliteStore::open_in_memory().expect("open store");
    let task_id =
        TaskQueue::enqueue(&store, "validate_config", json!({}), 0, 2).expect("enqueue task");

    for _ in 0..2 {
        let task = store.pick_next().expect("pick next").expect("a task is dispatchable");
        assert_eq!(task.id, task_id);
        store.mark_failed(&task_id, "simulated transient failure").expect("mark failed");
        assert_eq!(store.get_status(&task_id).expect("status"), TaskStatus::Retrying);
    }

    let task = store.pick_next().expect("pick next").expect("final attempt is dispatchable");
    assert_eq!(task.id, task_id);
    store.mark_failed(&task_id, "simulated transient failure").expect("mark failed");
    assert_eq!(store.get_status(&task_id).expect("status"), TaskStatus::Failed);
    assert!(store.pick_next().expect("pick next").is_none());
}

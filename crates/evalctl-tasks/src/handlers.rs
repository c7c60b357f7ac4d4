// evalctl-tasks/src/handlers.rs
// ============================================================================
// Module: Workflow Task Handlers
// Description: The four registered handlers the worker pool dispatches by
//              name, plus the use-case-level aggregation they trigger.
// Purpose: Load the aggregate(s) a task names, invoke the collaborator the
//          step needs, and persist the resulting state.
// Dependencies: evalctl-core, evalctl-collab, serde_json, time
// ============================================================================

//! ## Overview
//! Handlers are stateless: every fact they need comes from the task's
//! `args` and the repository. Each is safe to run more than once on the
//! same args — transitions are conditional on the aggregate still being in
//! the state the handler expects, so a redispatched task after a crash
//! between "persist" and "mark completed" is a no-op rather than a double
//! transition.

use evalctl_collab::Collaborators;
use evalctl_core::entities::has_blocking_issue;
use evalctl_core::{
    EngineError, ModelEvaluationState, ModelRepository, Notification, TaskQueue, UseCaseId,
    UseCaseRepository, UseCaseState,
};
use serde_json::{json, Value};
use time::OffsetDateTime;

use crate::store::Store;

/// Current wall-clock time, split out so tests could substitute a fixed
/// clock if a future handler needed one.
fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

/// Reads a required `use_case_id` string field out of task args.
fn use_case_id_arg(args: &Value) -> Result<UseCaseId, EngineError> {
    args.get("use_case_id")
        .and_then(Value::as_str)
        .map(UseCaseId::from_raw)
        .ok_or_else(|| EngineError::Validation("task args missing use_case_id".to_owned()))
}

/// Reads a required `model_id` string field out of task args.
fn model_id_arg(args: &Value) -> Result<evalctl_core::ModelId, EngineError> {
    args.get("model_id")
        .and_then(Value::as_str)
        .map(evalctl_core::ModelId::from_raw)
        .ok_or_else(|| EngineError::Validation("task args missing model_id".to_owned()))
}

/// Dispatches a task by its registered handler name.
///
/// # Errors
///
/// Returns [`EngineError::UnknownTask`] if `task_name` is not one of
/// [`evalctl_core::REGISTERED_TASK_NAMES`], or whatever error the handler
/// itself returns.
pub fn dispatch(
    task_name: &str,
    store: &impl Store,
    collaborators: &Collaborators,
    args: &Value,
) -> Result<(), EngineError> {
    match task_name {
        "validate_config" => validate_config(store, collaborators, args),
        "run_quality_check" => run_quality_check(store, collaborators, args),
        "run_evaluation" => run_evaluation(store, collaborators, args),
        "send_notification" => send_notification(store, collaborators, args),
        other => Err(EngineError::UnknownTask(other.to_owned())),
    }
}

/// Loads the use case's config blob, runs it through the quality-check
/// collaborator acting as a config validator, and transitions the use case
/// to `QUALITY_CHECK_RUNNING` on success or `CONFIG_INVALID` on failure.
///
/// No dedicated config-schema collaborator exists; the field-rule quality
/// checker is reused here against an optional `config_schema` entry in the
/// use case's metadata.
///
/// # Errors
///
/// Returns [`EngineError::Validation`] if the use case has no config file
/// key recorded, or propagates a storage or collaborator failure.
pub fn validate_config(
    store: &impl Store,
    collaborators: &Collaborators,
    args: &Value,
) -> Result<(), EngineError> {
    let use_case_id = use_case_id_arg(args)?;
    let mut use_case = UseCaseRepository::get(store, &use_case_id)?;
    let mut sm = UseCaseRepository::load_state_machine(store, &use_case_id)?;
    if *sm.current() != UseCaseState::ConfigValidationRunning {
        return Ok(());
    }
    let Some(config_key) = use_case.config_file_key.clone() else {
        return Err(EngineError::Validation(
            "use case has no config file key".to_owned(),
        ));
    };
    let bytes = collaborators.object_store().get(&config_key)?;
    let schema = use_case
        .metadata
        .get("config_schema")
        .cloned()
        .unwrap_or_else(|| json!({ "fields": [] }));
    let issues = collaborators.quality_checker().check(&bytes, &schema)?;

    let at = now();
    if has_blocking_issue(&issues) {
        use_case.quality_issues = issues;
        sm.transition_to(UseCaseState::ConfigInvalid, "system", None, at, false)?;
    } else {
        sm.transition_to(UseCaseState::QualityCheckRunning, "system", None, at, false)?;
    }
    UseCaseRepository::save_state_machine(store, &use_case_id, &sm)?;
    use_case.state = *sm.current();
    use_case.updated_at = at;
    UseCaseRepository::update(store, &use_case)?;

    if *sm.current() == UseCaseState::QualityCheckRunning {
        advance_use_case(store, &use_case_id)?;
    }
    Ok(())
}

/// Loads a model's dataset, runs the quality-check collaborator, records
/// the resulting issues, and transitions to `QUALITY_CHECK_PASSED` or
/// `QUALITY_CHECK_FAILED` (immediately followed by `AWAITING_DATA_FIX`).
/// A failure enqueues a notification task.
///
/// # Errors
///
/// Returns [`EngineError::Validation`] if the model has no dataset key
/// recorded, or propagates a storage or collaborator failure.
pub fn run_quality_check(
    store: &impl Store,
    collaborators: &Collaborators,
    args: &Value,
) -> Result<(), EngineError> {
    let use_case_id = use_case_id_arg(args)?;
    let model_id = model_id_arg(args)?;
    let mut model = ModelRepository::get(store, &model_id)?;
    let mut sm = ModelRepository::load_state_machine(store, &model_id)?;
    if *sm.current() == ModelEvaluationState::QualityCheckPending {
        let transitioned_at = now();
        sm.transition_to(ModelEvaluationState::QualityCheckRunning, "system", None, transitioned_at, false)?;
        ModelRepository::save_state_machine(store, &model_id, &sm)?;
        model.updated_at = transitioned_at;
    } else if *sm.current() != ModelEvaluationState::QualityCheckRunning {
        return Ok(());
    }

    let Some(dataset_key) = model.dataset_file_key.clone() else {
        return Err(EngineError::Validation(
            "model has no dataset file key".to_owned(),
        ));
    };
    let dataset = collaborators.object_store().get(&dataset_key)?;
    let field_config = model
        .metadata
        .get("field_config")
        .cloned()
        .unwrap_or_else(|| json!({ "fields": [] }));
    let issues = collaborators.quality_checker().check(&dataset, &field_config)?;

    let mut sm = ModelRepository::load_state_machine(store, &model_id)?;
    if *sm.current() != ModelEvaluationState::QualityCheckRunning {
        return Ok(());
    }
    model.quality_issues = issues;
    let blocking = has_blocking_issue(&model.quality_issues);
    let at = now();
    if blocking {
        sm.transition_to(ModelEvaluationState::QualityCheckFailed, "system", None, at, false)?;
        ModelRepository::save_state_machine(store, &model_id, &sm)?;
        sm.transition_to(ModelEvaluationState::AwaitingDataFix, "system", None, at, false)?;
    } else {
        sm.transition_to(ModelEvaluationState::QualityCheckPassed, "system", None, at, false)?;
    }
    ModelRepository::save_state_machine(store, &model_id, &sm)?;
    model.current_state = *sm.current();
    model.updated_at = at;
    ModelRepository::update(store, &model)?;

    if blocking {
        TaskQueue::enqueue(
            store,
            "send_notification",
            json!({
                "use_case_id": use_case_id.as_str(),
                "kind": "quality_check_failed",
                "payload": { "model_id": model_id.as_str() },
            }),
            5,
            3,
        )?;
    }
    advance_use_case(store, &use_case_id)?;
    Ok(())
}

/// Runs the evaluator collaborator against a model's dataset and
/// predictions. First transitions `EVALUATION_QUEUED` to
/// `EVALUATION_RUNNING`; on completion transitions to
/// `EVALUATION_COMPLETED` and persists the metrics summary, on evaluator
/// failure transitions to `EVALUATION_FAILED` with the error recorded.
///
/// The evaluator's own outcome is recorded as a state transition rather
/// than surfaced as a task failure; task-level retries are a separate
/// concern handled by the queue around this handler.
///
/// # Errors
///
/// Returns [`EngineError::Validation`] if the model is missing its dataset
/// or predictions keys, or propagates a storage failure.
pub fn run_evaluation(
    store: &impl Store,
    collaborators: &Collaborators,
    args: &Value,
) -> Result<(), EngineError> {
    let use_case_id = use_case_id_arg(args)?;
    let model_id = model_id_arg(args)?;
    let mut model = ModelRepository::get(store, &model_id)?;
    let mut sm = ModelRepository::load_state_machine(store, &model_id)?;
    if *sm.current() == ModelEvaluationState::EvaluationQueued {
        let transitioned_at = now();
        sm.transition_to(ModelEvaluationState::EvaluationRunning, "system", None, transitioned_at, false)?;
        ModelRepository::save_state_machine(store, &model_id, &sm)?;
        model.current_state = *sm.current();
        model.updated_at = transitioned_at;
        ModelRepository::update(store, &model)?;
        advance_use_case(store, &use_case_id)?;
    } else if *sm.current() != ModelEvaluationState::EvaluationRunning {
        return Ok(());
    }

    let Some(dataset_key) = model.dataset_file_key.clone() else {
        return Err(EngineError::Validation(
            "model has no dataset file key".to_owned(),
        ));
    };
    let Some(predictions_key) = model.predictions_file_key.clone() else {
        return Err(EngineError::Validation(
            "model has no predictions file key".to_owned(),
        ));
    };
    let dataset = collaborators.object_store().get(&dataset_key)?;
    let predictions = collaborators.object_store().get(&predictions_key)?;
    let config = model
        .metadata
        .get("evaluation_config")
        .cloned()
        .unwrap_or_else(|| json!({ "fields": [] }));
    let outcome = collaborators.evaluator().evaluate(&dataset, &predictions, &config);

    let mut sm = ModelRepository::load_state_machine(store, &model_id)?;
    if *sm.current() != ModelEvaluationState::EvaluationRunning {
        return Ok(());
    }
    let at = now();
    match outcome {
        Ok(summary) => {
            sm.transition_to(ModelEvaluationState::EvaluationCompleted, "system", None, at, false)?;
            ModelRepository::save_state_machine(store, &model_id, &sm)?;
            model.current_state = *sm.current();
            model.updated_at = at;
            ModelRepository::update(store, &model)?;
            let mut use_case = UseCaseRepository::get(store, &use_case_id)?;
            use_case.evaluation_results.insert(model.model_name.clone(), summary);
            UseCaseRepository::update(store, &use_case)?;
        }
        Err(err) => {
            sm.transition_to(
                ModelEvaluationState::EvaluationFailed,
                "system",
                Some(err.to_string()),
                at,
                false,
            )?;
            ModelRepository::save_state_machine(store, &model_id, &sm)?;
            model.current_state = *sm.current();
            model.updated_at = at;
            ModelRepository::update(store, &model)?;
        }
    }
    advance_use_case(store, &use_case_id)?;
    Ok(())
}

/// Sends a notification through the notifier collaborator. Failure counts
/// as a task failure and is retried by the queue.
///
/// # Errors
///
/// Returns [`EngineError::Validation`] if `kind` is missing, or propagates
/// a notifier failure.
pub fn send_notification(
    store: &impl Store,
    collaborators: &Collaborators,
    args: &Value,
) -> Result<(), EngineError> {
    let use_case_id = use_case_id_arg(args)?;
    let use_case = UseCaseRepository::get(store, &use_case_id)?;
    let kind = args
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::Validation("task args missing kind".to_owned()))?;
    let payload = args.get("payload").cloned().unwrap_or(Value::Null);
    let notification = Notification {
        to: use_case.team_email.clone(),
        subject: format!("{kind} for {}", use_case.name),
        body: payload.to_string(),
    };
    collaborators.notifier().send(&notification)?;
    Ok(())
}

/// Re-evaluates whether a use case's own state should advance now that one
/// of its models (or its config validation) has moved. The use case has no
/// direct view of its models' states; this is the seam that keeps the two
/// state machines in step.
///
/// With no models registered, a use case that just reached
/// `QUALITY_CHECK_RUNNING` passes trivially and proceeds straight to
/// `EVALUATION_QUEUED`.
fn advance_use_case(store: &impl Store, use_case_id: &UseCaseId) -> Result<(), EngineError> {
    let models = ModelRepository::list_for_use_case(store, use_case_id)?;
    let mut sm = UseCaseRepository::load_state_machine(store, use_case_id)?;
    let at = now();

    match *sm.current() {
        UseCaseState::QualityCheckRunning => {
            let any_blocked = models.iter().any(|model| {
                matches!(
                    model.current_state,
                    ModelEvaluationState::QualityCheckFailed | ModelEvaluationState::AwaitingDataFix
                )
            });
            let all_passed = models.is_empty()
                || models.iter().all(|model| {
                    !matches!(
                        model.current_state,
                        ModelEvaluationState::Registered
                            | ModelEvaluationState::QualityCheckPending
                            | ModelEvaluationState::QualityCheckRunning
                    )
                });
            if any_blocked {
                sm.transition_to(UseCaseState::QualityCheckFailed, "system", None, at, false)?;
                UseCaseRepository::save_state_machine(store, use_case_id, &sm)?;
                sm.transition_to(UseCaseState::AwaitingDataFix, "system", None, at, false)?;
                UseCaseRepository::save_state_machine(store, use_case_id, &sm)?;
            } else if all_passed {
                sm.transition_to(UseCaseState::QualityCheckPassed, "system", None, at, false)?;
                UseCaseRepository::save_state_machine(store, use_case_id, &sm)?;
                sm.transition_to(UseCaseState::EvaluationQueued, "system", None, at, false)?;
                UseCaseRepository::save_state_machine(store, use_case_id, &sm)?;
            }
        }
        UseCaseState::EvaluationQueued => {
            let any_running = models
                .iter()
                .any(|model| model.current_state == ModelEvaluationState::EvaluationRunning);
            if any_running {
                sm.transition_to(UseCaseState::EvaluationRunning, "system", None, at, false)?;
                UseCaseRepository::save_state_machine(store, use_case_id, &sm)?;
            }
        }
        UseCaseState::EvaluationRunning => {
            let all_done = !models.is_empty()
                && models.iter().all(|model| {
                    matches!(
                        model.current_state,
                        ModelEvaluationState::EvaluationCompleted
                            | ModelEvaluationState::EvaluationFailed
                            | ModelEvaluationState::Archived
                    )
                });
            if all_done {
                let any_failed = models
                    .iter()
                    .any(|model| model.current_state == ModelEvaluationState::EvaluationFailed);
                let target = if any_failed {
                    UseCaseState::EvaluationFailed
                } else {
                    UseCaseState::EvaluationCompleted
                };
                sm.transition_to(target, "system", None, at, false)?;
                UseCaseRepository::save_state_machine(store, use_case_id, &sm)?;
            }
        }
        _ => return Ok(()),
    }

    let mut use_case = UseCaseRepository::get(store, use_case_id)?;
    use_case.state = *sm.current();
    UseCaseRepository::update(store, &use_case)?;
    Ok(())
}

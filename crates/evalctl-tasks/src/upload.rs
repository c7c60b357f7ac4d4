// evalctl-tasks/src/upload.rs
// ============================================================================
// Module: Upload Orchestrator
// Description: The entry point for externally supplied artifacts: configs,
//              per-model datasets, and per-model predictions.
// Purpose: Validate an artifact superficially, persist it at a
//          deterministic key, drive the right state transition, and
//          enqueue the follow-up task — saving the state machine before
//          the task is enqueued so a crash in between is recoverable by
//          the reconciler rather than silently dropped.
// Dependencies: evalctl-core, evalctl-collab, serde_json, time
// ============================================================================

//! ## Overview
//! Every upload follows the same shape: sanity-check the bytes, reject
//! early with no state change if they fail; otherwise persist them via the
//! object store collaborator at a key derived from the owning ids, apply
//! the state transition the artifact kind and current state call for, save
//! the state machine, enqueue the follow-up task, and append an
//! activity-log entry. Uploads arriving while the aggregate is not in an
//! accepting state are rejected with [`EngineError::InvalidStateForUpload`]
//! and never touch storage.

use std::collections::BTreeMap;

use evalctl_collab::Collaborators;
use evalctl_core::{
    EngineError, ModelEvaluationState, ModelId, ModelRepository, TaskId, TaskQueue, UseCaseId,
    UseCaseRepository, UseCaseState,
};
use serde_json::{json, Value};
use time::OffsetDateTime;

use crate::store::Store;

/// Current wall-clock time for activity-log timestamps and transitions.
fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

/// The deterministic storage key a use case's config is written under.
fn config_key(use_case_id: &UseCaseId) -> String {
    format!("use_cases/{use_case_id}/config")
}

/// The deterministic storage key a model's dataset is written under.
fn dataset_key(use_case_id: &UseCaseId, model_id: &ModelId) -> String {
    format!("use_cases/{use_case_id}/models/{model_id}/dataset")
}

/// The deterministic storage key a model's predictions are written under.
fn predictions_key(use_case_id: &UseCaseId, model_id: &ModelId) -> String {
    format!("use_cases/{use_case_id}/models/{model_id}/predictions")
}

/// Rejects bytes that are not a single valid JSON object.
fn validate_json_object(bytes: &[u8], kind: &str) -> Result<(), EngineError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|err| EngineError::Validation(format!("{kind} is not valid utf-8: {err}")))?;
    let value: Value = serde_json::from_str(text)
        .map_err(|err| EngineError::Validation(format!("{kind} is not valid json: {err}")))?;
    if value.is_object() {
        Ok(())
    } else {
        Err(EngineError::Validation(format!("{kind} must be a json object")))
    }
}

/// Rejects bytes that are not newline-delimited JSON with at least one
/// record.
fn validate_ndjson(bytes: &[u8], kind: &str) -> Result<(), EngineError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|err| EngineError::Validation(format!("{kind} is not valid utf-8: {err}")))?;
    let mut rows = 0usize;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        serde_json::from_str::<Value>(line)
            .map_err(|err| EngineError::Validation(format!("{kind} row is not valid json: {err}")))?;
        rows += 1;
    }
    if rows == 0 {
        Err(EngineError::Validation(format!("{kind} has no records")))
    } else {
        Ok(())
    }
}

/// Appends an activity-log entry describing an accepted upload.
fn log_upload(
    store: &impl Store,
    use_case_id: &UseCaseId,
    activity_type: &str,
    description: String,
) -> Result<(), EngineError> {
    UseCaseRepository::log_activity(
        store,
        &evalctl_core::ActivityLog {
            use_case_id: use_case_id.clone(),
            activity_type: activity_type.to_owned(),
            description,
            metadata: BTreeMap::new(),
            created_at: now(),
        },
    )
}

/// Accepts a configuration file for a use case currently `AWAITING_CONFIG`.
/// Transitions it through `CONFIG_RECEIVED` to `CONFIG_VALIDATION_RUNNING`
/// and enqueues `validate_config`.
///
/// # Errors
///
/// Returns [`EngineError::Validation`] if `bytes` is not a JSON object,
/// [`EngineError::InvalidStateForUpload`] if the use case is not awaiting a
/// config, or propagates a storage failure.
pub fn upload_config(
    store: &impl Store,
    collaborators: &Collaborators,
    use_case_id: &UseCaseId,
    bytes: &[u8],
) -> Result<TaskId, EngineError> {
    validate_json_object(bytes, "config")?;
    let mut use_case = UseCaseRepository::get(store, use_case_id)?;
    if use_case.state != UseCaseState::AwaitingConfig {
        return Err(EngineError::InvalidStateForUpload {
            kind: "config".to_owned(),
            state: use_case.state.to_string(),
        });
    }

    let key = config_key(use_case_id);
    collaborators.object_store().put(&key, bytes)?;

    let mut sm = UseCaseRepository::load_state_machine(store, use_case_id)?;
    let at = now();
    sm.transition_to(UseCaseState::ConfigReceived, "system", None, at, false)?;
    sm.transition_to(UseCaseState::ConfigValidationRunning, "system", None, at, false)?;
    UseCaseRepository::save_state_machine(store, use_case_id, &sm)?;

    use_case.config_file_key = Some(key);
    use_case.state = *sm.current();
    use_case.updated_at = at;
    UseCaseRepository::update(store, &use_case)?;

    let task_id = TaskQueue::enqueue(
        store,
        "validate_config",
        json!({ "use_case_id": use_case_id.as_str() }),
        10,
        3,
    )?;
    log_upload(
        store,
        use_case_id,
        "config_uploaded",
        format!("config received, validate_config task {task_id} enqueued"),
    )?;
    Ok(task_id)
}

/// Accepts a model's dataset. From `REGISTERED` or `AWAITING_DATA_FIX`
/// this transitions to `QUALITY_CHECK_PENDING` and enqueues
/// `run_quality_check`; a re-upload while already `QUALITY_CHECK_PENDING`
/// replaces the file with no transition and no new task.
///
/// # Errors
///
/// Returns [`EngineError::Validation`] if `bytes` is not newline-delimited
/// JSON, [`EngineError::InvalidStateForUpload`] if the model is not in an
/// accepting state, or propagates a storage failure.
pub fn upload_dataset(
    store: &impl Store,
    collaborators: &Collaborators,
    use_case_id: &UseCaseId,
    model_id: &ModelId,
    bytes: &[u8],
) -> Result<Option<TaskId>, EngineError> {
    validate_ndjson(bytes, "dataset")?;
    let mut model = ModelRepository::get(store, model_id)?;
    let key = dataset_key(use_case_id, model_id);

    match model.current_state {
        ModelEvaluationState::Registered | ModelEvaluationState::AwaitingDataFix => {
            collaborators.object_store().put(&key, bytes)?;
            let mut sm = ModelRepository::load_state_machine(store, model_id)?;
            let at = now();
            sm.transition_to(ModelEvaluationState::QualityCheckPending, "system", None, at, false)?;
            ModelRepository::save_state_machine(store, model_id, &sm)?;

            model.dataset_file_key = Some(key);
            model.current_state = *sm.current();
            model.updated_at = at;
            ModelRepository::update(store, &model)?;

            let task_id = TaskQueue::enqueue(
                store,
                "run_quality_check",
                json!({ "use_case_id": use_case_id.as_str(), "model_id": model_id.as_str() }),
                5,
                3,
            )?;
            log_upload(
                store,
                use_case_id,
                "dataset_uploaded",
                format!("dataset uploaded for model {model_id}, run_quality_check task {task_id} enqueued"),
            )?;
            Ok(Some(task_id))
        }
        ModelEvaluationState::QualityCheckPending => {
            collaborators.object_store().put(&key, bytes)?;
            model.dataset_file_key = Some(key);
            ModelRepository::update(store, &model)?;
            log_upload(
                store,
                use_case_id,
                "dataset_reuploaded",
                format!("dataset replaced for model {model_id} while quality check is still pending"),
            )?;
            Ok(None)
        }
        other => Err(EngineError::InvalidStateForUpload {
            kind: "dataset".to_owned(),
            state: other.to_string(),
        }),
    }
}

/// Accepts a model's predictions. Only valid from `QUALITY_CHECK_PASSED`;
/// transitions to `EVALUATION_QUEUED` and enqueues `run_evaluation`.
///
/// # Errors
///
/// Returns [`EngineError::Validation`] if `bytes` is not newline-delimited
/// JSON, [`EngineError::InvalidStateForUpload`] if the model has not
/// passed its quality check, or propagates a storage failure.
pub fn upload_predictions(
    store: &impl Store,
    collaborators: &Collaborators,
    use_case_id: &UseCaseId,
    model_id: &ModelId,
    bytes: &[u8],
) -> Result<TaskId, EngineError> {
    validate_ndjson(bytes, "predictions")?;
    let mut model = ModelRepository::get(store, model_id)?;
    if model.current_state != ModelEvaluationState::QualityCheckPassed {
        return Err(EngineError::InvalidStateForUpload {
            kind: "predictions".to_owned(),
            state: model.current_state.to_string(),
        });
    }

    let key = predictions_key(use_case_id, model_id);
    collaborators.object_store().put(&key, bytes)?;

    let mut sm = ModelRepository::load_state_machine(store, model_id)?;
    let at = now();
    sm.transition_to(ModelEvaluationState::EvaluationQueued, "system", None, at, false)?;
    ModelRepository::save_state_machine(store, model_id, &sm)?;

    model.predictions_file_key = Some(key);
    model.current_state = *sm.current();
    model.updated_at = at;
    ModelRepository::update(store, &model)?;

    let task_id = TaskQueue::enqueue(
        store,
        "run_evaluation",
        json!({ "use_case_id": use_case_id.as_str(), "model_id": model_id.as_str() }),
        5,
        3,
    )?;
    log_upload(
        store,
        use_case_id,
        "predictions_uploaded",
        format!("predictions uploaded for model {model_id}, run_evaluation task {task_id} enqueued"),
    )?;
    Ok(task_id)
}

/// One artifact an adapter should prompt its caller to upload next.
#[derive(Debug, Clone, serde::Serialize)]
pub struct UploadRequirement {
    /// Path-shaped identifier of the upload endpoint.
    pub endpoint: String,
    /// Human-readable description of what is expected.
    pub description: String,
}

/// Inspects current states and reports the set of uploads expected next.
///
/// When `model_id` is omitted only use-case-level requirements (the
/// config) are reported.
///
/// # Errors
///
/// Returns [`EngineError::NotFound`] if `use_case_id` or `model_id` does
/// not exist.
pub fn get_upload_requirements(
    store: &impl Store,
    use_case_id: &UseCaseId,
    model_id: Option<&ModelId>,
) -> Result<Vec<UploadRequirement>, EngineError> {
    let use_case = UseCaseRepository::get(store, use_case_id)?;
    let mut requirements = Vec::new();

    if matches!(use_case.state, UseCaseState::AwaitingConfig | UseCaseState::ConfigInvalid) {
        requirements.push(UploadRequirement {
            endpoint: format!("use_cases/{use_case_id}/config"),
            description: "upload a configuration file".to_owned(),
        });
    }

    if let Some(model_id) = model_id {
        let model = ModelRepository::get(store, model_id)?;
        match model.current_state {
            ModelEvaluationState::Registered | ModelEvaluationState::AwaitingDataFix => {
                requirements.push(UploadRequirement {
                    endpoint: format!("use_cases/{use_case_id}/models/{model_id}/dataset"),
                    description: "upload the model's dataset".to_owned(),
                });
            }
            ModelEvaluationState::QualityCheckPassed => {
                requirements.push(UploadRequirement {
                    endpoint: format!("use_cases/{use_case_id}/models/{model_id}/predictions"),
                    description: "upload the model's predictions".to_owned(),
                });
            }
            _ => {}
        }
    }

    Ok(requirements)
}

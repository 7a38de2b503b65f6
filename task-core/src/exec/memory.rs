//! Memory leaf executor. Payload strings are recursively
//! template-rendered; a payload may be a single message map, a list of
//! message maps, or a bare string (implicit user message).

use super::LeafDeps;
use crate::context::{self, ContextInputs};
use crate::error::{CoreError, CoreResult, ValidationError};
use crate::expr::template;
use crate::normalize;
use crate::response::{self, MainTaskResponse, ResponseInput};
use crate::store::MemoryMessage;
use crate::types::*;
use serde_json::{json, Value as Json};

#[tracing::instrument(skip_all, fields(task_id = %raw_cfg.id))]
pub async fn execute(
    deps: &LeafDeps,
    raw_cfg: &TaskConfig,
    workflow: &WorkflowState,
    workflow_config: &WorkflowConfig,
    ctx_inputs: ContextInputs<'_>,
    now: i64,
) -> CoreResult<MainTaskResponse> {
    let base_vars = context::build(workflow, workflow_config, raw_cfg, ctx_inputs.clone()).variables;
    let cfg = normalize::normalize(TaskType::Memory, raw_cfg, &deps.evaluator, &base_vars)?;

    let factory = deps.state_factory();
    let mut state = factory.create(&cfg, workflow, None, now).await?;

    let ctx = context::build(workflow, workflow_config, &cfg, ctx_inputs);
    let mem = cfg.memory.as_ref().expect("validated by normalizer");
    let memory_ref = mem.memory_ref.clone().unwrap_or_default();

    let key = match &mem.key_template {
        Some(k) => template::render_text(&deps.evaluator, k, &ctx.variables)?,
        None => return Err(CoreError::Validation(ValidationError::MissingRequired { field: "memory.key_template" })),
    };

    let outcome = run_operation(deps, &ctx.variables, mem, &memory_ref, &key).await;

    match outcome {
        Ok(output) => state.set_success(output, now),
        Err(e) => state.set_failed(
            TaskError {
                code: "MEMORY_OPERATION_FAILED".to_string(),
                message: e.to_string(),
                data: None,
            },
            now,
        ),
    }
    deps.task_repo.upsert(&state).await?;

    response::build_leaf_response(
        &deps.evaluator,
        ResponseInput {
            cfg: &cfg,
            state,
            workflow_config,
            next_task_override: None,
        },
        &ctx.variables,
        now,
    )
}

async fn run_operation(
    deps: &LeafDeps,
    vars: &Json,
    mem: &MemoryConfig,
    memory_ref: &str,
    key: &str,
) -> Result<Json, CoreError> {
    match mem.operation {
        MemoryOperation::Read => {
            let messages = deps.memory_backend.read(memory_ref, key).await?;
            Ok(json!({ "messages": messages }))
        }
        MemoryOperation::Append => {
            let messages = parse_payload(deps, vars, mem)?;
            for m in &messages {
                deps.memory_backend.append(memory_ref, key, m.clone()).await?;
            }
            Ok(json!({ "appended": messages.len() }))
        }
        MemoryOperation::Write => write_with_rollback(deps, vars, mem, memory_ref, key).await,
        MemoryOperation::Delete => {
            deps.memory_backend.delete(memory_ref, key).await?;
            Ok(json!({ "deleted": true }))
        }
        MemoryOperation::Clear => {
            if !mem.confirm {
                return Err(CoreError::Validation(ValidationError::MissingRequired {
                    field: "memory.confirm",
                }));
            }
            deps.memory_backend.clear(memory_ref, key).await?;
            Ok(json!({ "cleared": true }))
        }
        MemoryOperation::Health => {
            if mem.health.is_none() {
                return Err(CoreError::Validation(ValidationError::MissingRequired {
                    field: "memory.health",
                }));
            }
            let status = deps.memory_backend.health(memory_ref).await?;
            Ok(json!({ "health": status }))
        }
        MemoryOperation::Stats => {
            if mem.stats.is_none() {
                return Err(CoreError::Validation(ValidationError::MissingRequired {
                    field: "memory.stats",
                }));
            }
            let stats = deps.memory_backend.stats(memory_ref, key).await?;
            Ok(json!({ "stats": stats }))
        }
        MemoryOperation::Flush => {
            // `flush` is dry-run-capable only here — it reports what it
            // would evict rather than summarising and evicting, since
            // summarisation is external (the `TaskExecutor`'s concern, not
            // the core's).
            let messages = deps.memory_backend.read(memory_ref, key).await?;
            Ok(json!({ "would_evict": messages.len(), "dry_run": true }))
        }
    }
}

/// Backup-clear-append with rollback: read existing
/// messages, clear, append new messages one at a time; on any failure,
/// clear and re-append the backup, surfacing a compound error.
async fn write_with_rollback(
    deps: &LeafDeps,
    vars: &Json,
    mem: &MemoryConfig,
    memory_ref: &str,
    key: &str,
) -> Result<Json, CoreError> {
    let new_messages = parse_payload(deps, vars, mem)?;
    let backup = deps.memory_backend.read(memory_ref, key).await?;

    deps.memory_backend.clear(memory_ref, key).await?;

    for (i, m) in new_messages.iter().enumerate() {
        if let Err(append_err) = deps.memory_backend.append(memory_ref, key, m.clone()).await {
            let rollback_result = rollback(deps, memory_ref, key, &backup).await;
            return Err(CoreError::Infrastructure(match rollback_result {
                Ok(()) => anyhow::anyhow!(
                    "memory write failed appending message {i}: {append_err}; rollback restored {} prior messages",
                    backup.len()
                ),
                Err(rollback_err) => anyhow::anyhow!(
                    "memory write failed appending message {i}: {append_err}; rollback ALSO failed: {rollback_err}"
                ),
            }));
        }
    }
    Ok(json!({ "written": new_messages.len(), "replaced": backup.len() }))
}

async fn rollback(
    deps: &LeafDeps,
    memory_ref: &str,
    key: &str,
    backup: &[MemoryMessage],
) -> anyhow::Result<()> {
    deps.memory_backend.clear(memory_ref, key).await?;
    for m in backup {
        deps.memory_backend.append(memory_ref, key, m.clone()).await?;
    }
    Ok(())
}

/// Parse `mem.payload` into messages, recursively template-rendering string
/// content first. A bare string payload becomes a single implicit `user`
/// message.
fn parse_payload(deps: &LeafDeps, vars: &Json, mem: &MemoryConfig) -> Result<Vec<MemoryMessage>, CoreError> {
    let Some(payload) = &mem.payload else {
        return Err(CoreError::Validation(ValidationError::InvalidPayloadFormat));
    };
    let rendered = template::render_value_recursive(&deps.evaluator, payload, vars)?;
    match rendered {
        Json::String(content) => Ok(vec![MemoryMessage {
            role: MessageRole::User,
            content,
        }]),
        Json::Object(_) => Ok(vec![parse_one_message(&rendered)?]),
        Json::Array(items) => items.iter().map(parse_one_message).collect(),
        _ => Err(CoreError::Validation(ValidationError::InvalidPayloadFormat)),
    }
}

fn parse_one_message(v: &Json) -> Result<MemoryMessage, CoreError> {
    let obj = v
        .as_object()
        .ok_or(CoreError::Validation(ValidationError::InvalidPayloadFormat))?;
    let role_str = obj
        .get("role")
        .and_then(Json::as_str)
        .unwrap_or("user")
        .to_string();
    let role: MessageRole = serde_json::from_value(Json::String(role_str.clone()))
        .map_err(|_| CoreError::Validation(ValidationError::InvalidMessageRole { role: role_str }))?;
    let content = obj
        .get("content")
        .and_then(Json::as_str)
        .ok_or(CoreError::Validation(ValidationError::InvalidPayloadFormat))?
        .to_string();
    Ok(MemoryMessage { role, content })
}

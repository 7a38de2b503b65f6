//! Integration tests: exercise the public `Activities` facade end to end —
//! one leaf task, a router, a filtered collection, a fail-fast parallel
//! fan-out, a wait registration, and a memory write that rolls back — plus a
//! handful of standalone invariants (cost ceiling, type-mismatch rejection,
//! config/state round-trips) that don't need the full facade.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use task_core::activities::Activities;
use task_core::config::CoreConfig;
use task_core::context::ContextInputs;
use task_core::error::{CoreError, ExpressionError, ValidationError};
use task_core::exec::LeafDeps;
use task_core::expr::Evaluator;
use task_core::progress::Overall;
use task_core::store::{ConfigStore, MemoryBackend, MemoryMessage, TaskRepository, WorkflowRepository};
use task_core::store_memory::{EchoTaskExecutor, MemoryStore, NoopSignalDispatcher};
use task_core::subtask::SubtaskInput;
use task_core::types::*;

const NOW: i64 = 1_700_000_000_000;

fn task_cfg(v: serde_json::Value) -> TaskConfig {
    serde_json::from_value(v).expect("test fixture config must deserialize")
}

async fn new_harness(
    workflow_id: &str,
) -> (LeafDeps, Activities, WorkflowState, WorkflowConfig, ProjectConfig) {
    let store = Arc::new(MemoryStore::new());
    let deps = LeafDeps {
        task_repo: store.clone(),
        workflow_repo: store.clone(),
        config_store: store.clone(),
        task_executor: Arc::new(EchoTaskExecutor),
        signal_dispatcher: Arc::new(NoopSignalDispatcher),
        memory_backend: store,
        evaluator: Arc::new(Evaluator::new(CoreConfig::default().expression_cost_ceiling)),
        config: Arc::new(CoreConfig::default()),
    };
    let activities = Activities::new(deps.clone());

    let workflow = WorkflowState {
        workflow_id: workflow_id.to_string(),
        workflow_exec_id: Uuid::now_v7(),
        status: Status::Running,
        input: json!({}),
        output: None,
        error: None,
        env: BTreeMap::new(),
    };
    deps.workflow_repo.upsert_state(&workflow).await.unwrap();

    let workflow_config = WorkflowConfig {
        id: workflow_id.to_string(),
        tasks: BTreeMap::new(),
        env: BTreeMap::new(),
    };
    let project = ProjectConfig {
        name: "test-project".to_string(),
        env: BTreeMap::new(),
    };

    (deps, activities, workflow, workflow_config, project)
}

#[tokio::test]
async fn basic_task_succeeds_and_resolves_transition() {
    let (_deps, activities, workflow, mut workflow_config, project) = new_harness("wf-basic").await;
    workflow_config.tasks.insert(
        "b".to_string(),
        task_cfg(json!({"id": "b", "type": "basic", "with": {"note": "second"}})),
    );

    let cfg_a = task_cfg(json!({
        "id": "a",
        "type": "basic",
        "with": {"result": 42},
        "on_success": {"next": "b"}
    }));

    let response = activities
        .execute_basic(&cfg_a, &workflow, &workflow_config, &project, NOW)
        .await
        .expect("basic task should succeed");

    assert_eq!(response.state.status, Status::Success);
    assert_eq!(response.state.output, Some(json!({"result": 42})));
    assert!(response.state.error.is_none());
    let next = response.next_task.expect("on_success should resolve to task b");
    assert_eq!(next.id, "b");
}

#[tokio::test]
async fn basic_task_failure_carries_error_and_no_output() {
    let (_deps, activities, workflow, workflow_config, project) = new_harness("wf-basic-fail").await;
    let cfg = task_cfg(json!({"id": "empty", "type": "basic"}));

    let response = activities
        .execute_basic(&cfg, &workflow, &workflow_config, &project, NOW)
        .await
        .expect("an executor failure is a business failure, not a CoreError");

    assert_eq!(response.state.status, Status::Failed);
    assert!(response.state.output.is_none());
    assert!(response.state.error.is_some());
}

#[tokio::test]
async fn router_selects_route_by_condition_value() {
    let (_deps, activities, workflow, mut workflow_config, _project) = new_harness("wf-router").await;
    workflow_config.tasks.insert(
        "task_yes".to_string(),
        task_cfg(json!({"id": "task_yes", "type": "basic", "with": {"branch": "yes"}})),
    );
    workflow_config.tasks.insert(
        "task_no".to_string(),
        task_cfg(json!({"id": "task_no", "type": "basic", "with": {"branch": "no"}})),
    );
    workflow_config.tasks.insert(
        "fallback".to_string(),
        task_cfg(json!({"id": "fallback", "type": "basic", "with": {"x": 1}})),
    );

    let cfg_router = task_cfg(json!({
        "id": "decide",
        "type": "router",
        "with": {"decision": "yes"},
        "condition": ".with.decision",
        "routes": {"yes": "task_yes", "no": "task_no"},
        "on_success": {"next": "fallback"}
    }));

    let response = activities
        .execute_router(&cfg_router, &workflow, &workflow_config, NOW)
        .await
        .expect("router should resolve a route");

    assert_eq!(response.state.status, Status::Success);
    let next = response.next_task.expect("router must select a route");
    assert_eq!(next.id, "task_yes", "the chosen route must bypass on_success");
}

#[tokio::test]
async fn router_rejects_condition_with_no_matching_route() {
    let (_deps, activities, workflow, mut workflow_config, _project) = new_harness("wf-router-miss").await;
    workflow_config.tasks.insert(
        "task_yes".to_string(),
        task_cfg(json!({"id": "task_yes", "type": "basic", "with": {"branch": "yes"}})),
    );

    let cfg_router = task_cfg(json!({
        "id": "decide",
        "type": "router",
        "with": {"decision": "maybe"},
        "condition": ".with.decision",
        "routes": {"yes": "task_yes"}
    }));

    let err = activities
        .execute_router(&cfg_router, &workflow, &workflow_config, NOW)
        .await
        .expect_err("a condition value with no route entry must fail");
    assert!(matches!(
        err,
        CoreError::Validation(ValidationError::RouteNotFound { .. })
    ));
}

#[tokio::test]
async fn collection_with_filter_skips_excluded_items() {
    let (deps, activities, workflow, workflow_config, project) = new_harness("wf-collection").await;

    let cfg_collection = task_cfg(json!({
        "id": "visit_cities",
        "type": "collection",
        "with": {"cities": ["NYC", "skip", "LA"]},
        "items": "{{ .with.cities }}",
        "filter": ".item != \"skip\"",
        "tasks": [
            {"id": "visit", "type": "basic", "with": {"city": "{{ .item }}"}}
        ]
    }));

    let (parent_state, outcome) = activities
        .create_collection_state(&cfg_collection, &workflow, &workflow_config, NOW)
        .await
        .expect("collection should expand");

    assert_eq!(outcome.metadata.item_count, Some(2));
    assert_eq!(outcome.metadata.skipped_count, Some(1));
    assert_eq!(outcome.children.len(), 2);

    let child_ids: Vec<String> = outcome.children.iter().map(|c| c.task_id.clone()).collect();
    for child_id in &child_ids {
        let child_response = activities
            .execute_subtask(
                SubtaskInput {
                    parent_task_exec_id: parent_state.task_exec_id,
                    parent_cfg: &cfg_collection,
                    child_task_id: child_id.clone(),
                    workflow_config: &workflow_config,
                    project: &project,
                },
                NOW,
            )
            .await
            .expect("child should execute");
        assert_eq!(child_response.main.state.status, Status::Success);
    }

    let mut current = deps
        .task_repo
        .get(parent_state.task_exec_id)
        .await
        .unwrap()
        .expect("parent state persisted");

    let overall = activities
        .update_parent_status(&cfg_collection, &mut current, &json!({}), NOW)
        .await
        .expect("rollup should succeed once both children are terminal");
    assert_eq!(overall, Overall::Success);
    assert_eq!(current.status, Status::Success);

    let collection_response = activities
        .get_collection_response(&cfg_collection, current, &workflow_config, &json!({}))
        .await
        .expect("collection response should build");
    assert_eq!(collection_response.item_count, 2);
    assert_eq!(collection_response.skipped_count, 1);

    let summary = collection_response
        .main
        .state
        .output
        .expect("collection summary output");
    assert_eq!(summary["summary"]["total"], json!(2));
    assert_eq!(summary["summary"]["succeeded"], json!(2));
    assert_eq!(summary["summary"]["failed"], json!(0));
}

#[tokio::test]
async fn parallel_fail_fast_short_circuits_before_all_children_terminal() {
    let (deps, activities, workflow, workflow_config, project) = new_harness("wf-parallel").await;

    let cfg_parallel = task_cfg(json!({
        "id": "fan_out",
        "type": "parallel",
        "strategy": "fail_fast",
        "tasks": [
            {"id": "task_a", "type": "basic", "with": {"x": 1}},
            {"id": "task_b", "type": "basic", "with": {}},
            {"id": "task_c", "type": "basic", "with": {"y": 2}}
        ]
    }));

    let (parent_state, outcome) = activities
        .create_parallel_state(&cfg_parallel, &workflow, &workflow_config, NOW)
        .await
        .expect("parallel should expand");
    assert_eq!(outcome.children.len(), 3);

    activities
        .execute_subtask(
            SubtaskInput {
                parent_task_exec_id: parent_state.task_exec_id,
                parent_cfg: &cfg_parallel,
                child_task_id: "task_a".to_string(),
                workflow_config: &workflow_config,
                project: &project,
            },
            NOW,
        )
        .await
        .expect("task_a should succeed");

    let driven_b = activities
        .execute_subtask(
            SubtaskInput {
                parent_task_exec_id: parent_state.task_exec_id,
                parent_cfg: &cfg_parallel,
                child_task_id: "task_b".to_string(),
                workflow_config: &workflow_config,
                project: &project,
            },
            NOW,
        )
        .await
        .expect("task_b's own failure is a business failure, not a CoreError");
    assert_eq!(driven_b.main.state.status, Status::Failed);

    // task_c is deliberately never driven — it's still pending when the
    // rollup below runs, yet fail_fast must still fail the parent.
    let mut current = deps
        .task_repo
        .get(parent_state.task_exec_id)
        .await
        .unwrap()
        .expect("parent state persisted");

    let err = activities
        .update_parent_status(&cfg_parallel, &mut current, &json!({}), NOW)
        .await
        .expect_err("fail_fast must fail the parent with task_c still pending");
    assert!(matches!(err, CoreError::ParentExecutionFailed(_)));
}

#[tokio::test]
async fn wait_task_registers_and_rejects_non_positive_timeout() {
    let (_deps, activities, workflow, workflow_config, _project) = new_harness("wf-wait").await;

    let cfg_wait = task_cfg(json!({
        "id": "await_approval",
        "type": "wait",
        "wait_for": "approval",
        "timeout": "5m"
    }));

    let response = activities
        .execute_wait(&cfg_wait, &workflow, &workflow_config, NOW)
        .await
        .expect("wait should register");
    assert_eq!(response.state.status, Status::Waiting);
    let output = response.state.output.expect("wait output");
    assert_eq!(output["signal_name"], json!("approval"));
    assert_eq!(output["timeout_seconds"], json!(300));
    assert_eq!(output["has_processor"], json!(false));

    let bad_timeout = task_cfg(json!({
        "id": "await_approval_bad",
        "type": "wait",
        "wait_for": "approval",
        "timeout": "0s"
    }));
    let err = activities
        .execute_wait(&bad_timeout, &workflow, &workflow_config, NOW)
        .await
        .expect_err("a zero-duration timeout must be rejected");
    assert!(matches!(
        err,
        CoreError::Validation(ValidationError::NonPositiveTimeout { .. })
    ));

    let predicate = activities
        .evaluate_condition(".signal.approved == true", json!({"approved": true}), None)
        .expect("wait predicate should evaluate");
    assert!(predicate);
}

/// A `MemoryBackend` that fails to append any message whose content is
/// exactly `"boom"` — lets a test force the write path's rollback branch.
struct FlakyMemoryBackend {
    inner: tokio::sync::RwLock<HashMap<(String, String), Vec<MemoryMessage>>>,
}

impl FlakyMemoryBackend {
    fn new() -> Self {
        Self {
            inner: tokio::sync::RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl MemoryBackend for FlakyMemoryBackend {
    async fn read(&self, memory_ref: &str, key: &str) -> anyhow::Result<Vec<MemoryMessage>> {
        Ok(self
            .inner
            .read()
            .await
            .get(&(memory_ref.to_string(), key.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn append(&self, memory_ref: &str, key: &str, message: MemoryMessage) -> anyhow::Result<()> {
        if message.content == "boom" {
            return Err(anyhow::anyhow!("simulated append failure"));
        }
        self.inner
            .write()
            .await
            .entry((memory_ref.to_string(), key.to_string()))
            .or_default()
            .push(message);
        Ok(())
    }

    async fn clear(&self, memory_ref: &str, key: &str) -> anyhow::Result<()> {
        self.inner
            .write()
            .await
            .insert((memory_ref.to_string(), key.to_string()), Vec::new());
        Ok(())
    }

    async fn delete(&self, memory_ref: &str, key: &str) -> anyhow::Result<()> {
        self.inner.write().await.remove(&(memory_ref.to_string(), key.to_string()));
        Ok(())
    }

    async fn health(&self, _memory_ref: &str) -> anyhow::Result<serde_json::Value> {
        Ok(json!({"status": "ok"}))
    }

    async fn stats(&self, _memory_ref: &str, _key: &str) -> anyhow::Result<serde_json::Value> {
        Ok(json!({}))
    }
}

#[tokio::test]
async fn memory_write_rolls_back_on_partial_append_failure() {
    let store = Arc::new(MemoryStore::new());
    let flaky = Arc::new(FlakyMemoryBackend::new());
    let deps = LeafDeps {
        task_repo: store.clone(),
        workflow_repo: store.clone(),
        config_store: store.clone(),
        task_executor: Arc::new(EchoTaskExecutor),
        signal_dispatcher: Arc::new(NoopSignalDispatcher),
        memory_backend: flaky.clone(),
        evaluator: Arc::new(Evaluator::new(CoreConfig::default().expression_cost_ceiling)),
        config: Arc::new(CoreConfig::default()),
    };

    let workflow = WorkflowState {
        workflow_id: "wf-memory".to_string(),
        workflow_exec_id: Uuid::now_v7(),
        status: Status::Running,
        input: json!({}),
        output: None,
        error: None,
        env: BTreeMap::new(),
    };
    deps.workflow_repo.upsert_state(&workflow).await.unwrap();
    let workflow_config = WorkflowConfig {
        id: "wf-memory".to_string(),
        tasks: BTreeMap::new(),
        env: BTreeMap::new(),
    };

    flaky
        .append(
            "conv1",
            "k1",
            MemoryMessage {
                role: MessageRole::User,
                content: "old-message".to_string(),
            },
        )
        .await
        .unwrap();

    let cfg_memory = task_cfg(json!({
        "id": "remember",
        "type": "memory",
        "memory": {
            "operation": "write",
            "memory_ref": "conv1",
            "key_template": "k1",
            "payload": [
                {"role": "user", "content": "hello"},
                {"role": "user", "content": "boom"}
            ]
        }
    }));

    let response = task_core::exec::memory::execute(
        &deps,
        &cfg_memory,
        &workflow,
        &workflow_config,
        ContextInputs::default(),
        NOW,
    )
    .await
    .expect("a failed append is a business failure, not a CoreError");

    assert_eq!(response.state.status, Status::Failed);
    let error = response.state.error.expect("failure should carry an error");
    assert_eq!(error.code, "MEMORY_OPERATION_FAILED");
    assert!(
        error.message.contains("rollback restored"),
        "message was: {}",
        error.message
    );

    let restored = flaky.read("conv1", "k1").await.unwrap();
    assert_eq!(
        restored,
        vec![MemoryMessage {
            role: MessageRole::User,
            content: "old-message".to_string(),
        }]
    );
}

#[tokio::test]
async fn composite_child_observes_prior_sibling_output() {
    let (_deps, activities, workflow, workflow_config, project) = new_harness("wf-composite").await;

    let cfg_composite = task_cfg(json!({
        "id": "onboard",
        "type": "composite",
        "tasks": [
            {"id": "a", "type": "basic", "with": {"result": 10}},
            {"id": "b", "type": "basic", "with": {"seen": "{{ .tasks.a.output.result }}"}}
        ]
    }));

    let (parent_state, outcome) = activities
        .create_composite_state(&cfg_composite, &workflow, &workflow_config, NOW)
        .await
        .expect("composite should expand");
    assert_eq!(outcome.children.len(), 2);

    let response_a = activities
        .execute_subtask(
            SubtaskInput {
                parent_task_exec_id: parent_state.task_exec_id,
                parent_cfg: &cfg_composite,
                child_task_id: "a".to_string(),
                workflow_config: &workflow_config,
                project: &project,
            },
            NOW,
        )
        .await
        .expect("task a should execute first");
    assert_eq!(response_a.main.state.status, Status::Success);
    assert_eq!(response_a.main.state.output, Some(json!({"result": 10})));

    let response_b = activities
        .execute_subtask(
            SubtaskInput {
                parent_task_exec_id: parent_state.task_exec_id,
                parent_cfg: &cfg_composite,
                child_task_id: "b".to_string(),
                workflow_config: &workflow_config,
                project: &project,
            },
            NOW,
        )
        .await
        .expect("task b should see task a's output");
    assert_eq!(response_b.main.state.status, Status::Success);
    assert_eq!(
        response_b.main.state.output,
        Some(json!({"seen": 10})),
        "task b's `with.seen` must resolve from task a's persisted output, not a pre-sibling placeholder"
    );
}

#[test]
fn expression_cost_ceiling_is_enforced() {
    let evaluator = Evaluator::new(5);
    let err = evaluator
        .evaluate_value("1+1+1+1+1+1+1+1", &json!({}))
        .expect_err("a sufficiently large expression must exceed the cost ceiling");
    assert!(matches!(err, ExpressionError::CostExceeded { .. }));
}

#[tokio::test]
async fn normalizer_rejects_task_type_mismatch() {
    let (_deps, activities, workflow, workflow_config, project) = new_harness("wf-mismatch").await;
    let mismatched = task_cfg(json!({"id": "oops", "type": "router", "with": {"a": 1}}));

    let err = activities
        .execute_basic(&mismatched, &workflow, &workflow_config, &project, NOW)
        .await
        .expect_err("executing a router-typed config as basic must fail normalization");
    assert!(matches!(
        err,
        CoreError::Validation(ValidationError::UnsupportedTaskType { .. })
    ));
}

#[tokio::test]
async fn config_store_and_task_repo_round_trip() {
    let store = Arc::new(MemoryStore::new());
    let cfg = task_cfg(json!({"id": "roundtrip", "type": "basic", "with": {"n": 7}}));
    let key = Uuid::now_v7();

    store.save(key, &cfg).await.unwrap();
    let loaded = store.get(key).await.unwrap().expect("config must round-trip");
    assert_eq!(loaded, cfg);

    let state = TaskState {
        task_id: cfg.id.clone(),
        task_exec_id: key,
        workflow_id: "wf".to_string(),
        workflow_exec_id: Uuid::now_v7(),
        parent_state_id: None,
        component: Component::Task,
        execution_type: ExecutionType::Basic,
        status: Status::Pending,
        input: None,
        output: None,
        error: None,
        created_at: NOW,
        updated_at: NOW,
        collection_state: None,
    };
    store.upsert(&state).await.unwrap();
    let fetched = store.get(key).await.unwrap().expect("state must round-trip");
    assert_eq!(fetched, state);
}

#[test]
fn strategy_accepts_camel_case_aliases() {
    let wait_all: Strategy = serde_json::from_value(json!("waitAll")).unwrap();
    let best_effort: Strategy = serde_json::from_value(json!("best_effort")).unwrap();
    let fail_fast: Strategy = serde_json::from_value(json!("failFast")).unwrap();
    assert_eq!(wait_all, Strategy::WaitAll);
    assert_eq!(best_effort, Strategy::BestEffort);
    assert_eq!(fail_fast, Strategy::FailFast);
}

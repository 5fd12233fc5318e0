//! Orchestrator: the Library API surface (spec.md §5/§6).
//!
//! Owns everything a task needs and nothing a task keeps across restarts:
//! [`Config`], the [`EventBus`], the in-flight [`ExecutionFlow`] registry
//! keyed by task id, the external collaborator trait objects, and the
//! [`ToolRegistry`]. Grounded on the teacher's top-level `Orchestration`
//! struct in `orchestration.rs`, generalized from its fixed OpenAI-backed
//! constructor to accept any [`ModelGateway`]/[`SandboxGateway`]/
//! [`BrowserGateway`] implementation.

use crate::aggregator::{Aggregator, Artifact};
use crate::config::{Config, ExecutionMode};
use crate::error::{ErrorKind, OrchestratorError};
use crate::event::{Event, EventBus, EventHandler, EventType};
use crate::flow::{ExecutionFlow, FlowSnapshot, Progress};
use crate::model_gateway::ModelGateway;
use crate::gateway_adapter::GatewayAdapter;
use crate::reviewer::Reviewer;
use crate::role::Role;
use crate::sandbox_gateway::{BrowserGateway, SandboxGateway};
use crate::scheduler::{GlobalToolBudget, Scheduler};
use crate::step::Step;
use crate::sub_agent::SubAgentContext;
use crate::supervisor::Supervisor;
use crate::task::{Task, TaskPlan, TaskStatus};
use crate::tool_registry::{ToolProtocol, ToolRegistry};
use crate::tools::fallback::FallbackToolProtocol;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// The Library API's terminal result for one task (spec.md §7): errors
/// never raise across a task boundary, so a cancellation, a timeout, or an
/// exhausted-retry failure surfaces here as `success: false` plus
/// whatever best-effort partial artifact the Aggregator could build,
/// rather than as an `Err` this type's caller has to special-case.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub output: Option<Artifact>,
    pub error_kind: Option<ErrorKind>,
    pub error_detail: Option<String>,
}

struct InFlightTask {
    flow: ExecutionFlow,
    cancel: CancellationToken,
    status: TaskStatus,
}

/// Top-level entry point. Cheaply `Clone`-able (every field is an `Arc` or a
/// lock around shared state), matching the teacher's `Orchestration` which
/// is handed out as a shared handle to the dashboard, the scheduler loop,
/// and every Sub-Agent alike.
#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<RwLock<Config>>,
    event_bus: EventBus,
    gateway: Arc<dyn ModelGateway>,
    tool_registry: Arc<RwLock<ToolRegistry>>,
    tasks: Arc<RwLock<HashMap<Uuid, InFlightTask>>>,
    shutting_down: Arc<AtomicBool>,
}

impl Orchestrator {
    /// Async because registering the fallback tool protocol discovers its
    /// tool list through the same `ToolProtocol::list_tools` call every
    /// other protocol goes through (see [`ToolRegistry::add_protocol`]).
    pub async fn new(
        config: Config,
        model_gateway: Arc<dyn ModelGateway>,
        sandbox_gateway: Option<Arc<dyn SandboxGateway>>,
        browser_gateway: Option<Arc<dyn BrowserGateway>>,
    ) -> Result<Self, OrchestratorError> {
        let event_bus = EventBus::new(config.event_backlog);
        let gateway: Arc<dyn ModelGateway> = Arc::new(
            GatewayAdapter::new(model_gateway).with_long_text_processing(config.enable_long_text_processing),
        );

        let mut registry = ToolRegistry::empty();
        if sandbox_gateway.is_some() || browser_gateway.is_some() {
            let fallback: Arc<dyn ToolProtocol> = Arc::new(FallbackToolProtocol::new(browser_gateway, sandbox_gateway));
            registry
                .add_protocol("fallback", fallback)
                .await
                .map_err(|e| OrchestratorError::with_source(ErrorKind::Internal, "failed to register fallback tools", e))?;
        }

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            event_bus,
            gateway,
            tool_registry: Arc::new(RwLock::new(registry)),
            tasks: Arc::new(RwLock::new(HashMap::new())),
            shutting_down: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn subscribe(&self, handler: Arc<dyn EventHandler>) -> tokio::task::JoinHandle<()> {
        self.event_bus.subscribe(handler)
    }

    pub async fn register_tool(&self, protocol_name: &str, protocol: Arc<dyn ToolProtocol>) -> Result<(), OrchestratorError> {
        self.tool_registry
            .write()
            .await
            .add_protocol(protocol_name, protocol)
            .await
            .map_err(|e| OrchestratorError::with_source(ErrorKind::Internal, "failed to register tool protocol", e))
    }

    pub async fn unregister_tool(&self, protocol_name: &str) {
        self.tool_registry.write().await.remove_protocol(protocol_name);
    }

    pub async fn list_tools(&self) -> Vec<String> {
        self.tool_registry.read().await.list_tool_names()
    }

    pub async fn set_execution_mode(&self, mode: ExecutionMode) {
        let mut config = self.config.write().await;
        config.enable_team_mode = matches!(mode, ExecutionMode::Team);
    }

    /// Submits a task: runs the Supervisor to produce a plan, builds the
    /// initial [`ExecutionFlow`], and registers it as in-flight. Does not
    /// itself drive execution — call [`Orchestrator::execute`] (or
    /// [`Orchestrator::execute_task`] to do both in one call).
    pub async fn submit(&self, task: Task) -> Result<Uuid, OrchestratorError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(OrchestratorError::new(ErrorKind::Internal, "orchestrator is shutting down"));
        }

        self.event_bus.publish(Event::new(
            EventType::TaskCreated,
            task.id,
            serde_json::json!({ "content": task.content }),
        ));

        let config = self.config.read().await.clone();
        let supervisor = Supervisor::new(
            self.gateway.clone(),
            self.event_bus.clone(),
            config.supervisor.clone(),
            config.complexity_threshold,
        );
        let cancel = CancellationToken::new();
        let plan = supervisor.plan(&task, &cancel).await?;

        let flow = self.build_flow(task.id, &plan)?;

        self.tasks.write().await.insert(
            task.id,
            InFlightTask {
                flow,
                cancel,
                status: TaskStatus::Planning,
            },
        );
        Ok(task.id)
    }

    fn build_flow(&self, task_id: Uuid, plan: &TaskPlan) -> Result<ExecutionFlow, OrchestratorError> {
        if plan.simple_direct {
            let draft = crate::step::StepDraft {
                ordinal: 0,
                name: "direct_answer".to_string(),
                description: plan.direct_answer.clone().unwrap_or_default(),
                role: Role::Writer,
                expected_output: "the final answer".to_string(),
                depends_on_ordinals: vec![],
            };
            let mut step = Step::new(&draft, Default::default());
            step.status = crate::step::StepStatus::Completed;
            step.output_payload = Some(serde_json::Value::String(draft.description.clone()));
            step.completed_at = Some(chrono::Utc::now());
            return ExecutionFlow::new(task_id, vec![step]);
        }

        let mut ordinal_to_id: HashMap<u32, Uuid> = HashMap::new();
        let mut steps = Vec::with_capacity(plan.steps.len());
        for draft in &plan.steps {
            let step = Step::new(draft, Default::default());
            ordinal_to_id.insert(draft.ordinal, step.id);
            steps.push(step);
        }
        for (step, draft) in steps.iter_mut().zip(plan.steps.iter()) {
            for dep_ordinal in &draft.depends_on_ordinals {
                if let Some(dep_id) = ordinal_to_id.get(dep_ordinal) {
                    step.dependencies.insert(*dep_id);
                }
            }
        }
        ExecutionFlow::new(task_id, steps)
    }

    /// Drives a previously [`Orchestrator::submit`]ted task's flow to
    /// completion. Only returns `Err` for a failure of the orchestrator
    /// itself (e.g. the task id is unknown); a task-level failure is
    /// reported as `Ok(ExecutionResult { success: false, .. })`.
    pub async fn execute(&self, task: &Task) -> Result<ExecutionResult, OrchestratorError> {
        let config = self.config.read().await.clone();
        let (cancel, reviewer_gateway) = {
            let mut tasks = self.tasks.write().await;
            let entry = tasks
                .get_mut(&task.id)
                .ok_or_else(|| OrchestratorError::new(ErrorKind::Internal, "task was not submitted"))?;
            entry.status = TaskStatus::Running;
            (entry.cancel.clone(), self.gateway.clone())
        };

        let sub_agent_context = Arc::new(SubAgentContext {
            gateway: self.gateway.clone(),
            tool_registry: self.tool_registry.clone(),
            event_bus: self.event_bus.clone(),
            tool_budget: GlobalToolBudget::new(config.max_tool_calls),
            max_tool_call_turns: config.max_tool_call_turns,
            task_id: task.id,
        });
        let reviewer = Arc::new(Reviewer::new(reviewer_gateway, config.supervisor.quality_threshold));
        let scheduler = Scheduler::new(sub_agent_context, reviewer, config);

        let result = {
            let mut tasks = self.tasks.write().await;
            let entry = tasks
                .get_mut(&task.id)
                .ok_or_else(|| OrchestratorError::new(ErrorKind::Internal, "task disappeared mid-execution"))?;
            scheduler.run(&mut entry.flow, cancel).await
        };

        let mut tasks = self.tasks.write().await;
        let entry = tasks
            .get_mut(&task.id)
            .ok_or_else(|| OrchestratorError::new(ErrorKind::Internal, "task disappeared mid-execution"))?;

        let aggregator = Aggregator::new(self.event_bus.clone());
        match result {
            Ok(()) => {
                entry.status = TaskStatus::Completed;
                let artifact = aggregator.aggregate(&entry.flow, task);
                self.event_bus.publish(Event::new(
                    EventType::TaskCompleted,
                    task.id,
                    serde_json::to_value(&artifact).unwrap_or(serde_json::Value::Null),
                ));
                Ok(ExecutionResult {
                    success: true,
                    output: Some(artifact),
                    error_kind: None,
                    error_detail: None,
                })
            }
            Err(err) => {
                entry.status = if err.kind == ErrorKind::Cancelled {
                    TaskStatus::Cancelled
                } else {
                    TaskStatus::Failed
                };
                let partial = aggregator.aggregate_partial(&entry.flow, task);
                Ok(ExecutionResult {
                    success: false,
                    output: partial,
                    error_kind: Some(err.kind),
                    error_detail: Some(err.message.clone()),
                })
            }
        }
    }

    /// Convenience: submit then execute in one call.
    pub async fn execute_task(&self, task: Task) -> Result<ExecutionResult, OrchestratorError> {
        self.submit(task.clone()).await?;
        self.execute(&task).await
    }

    pub async fn cancel(&self, task_id: Uuid) -> Result<(), OrchestratorError> {
        let tasks = self.tasks.read().await;
        let entry = tasks
            .get(&task_id)
            .ok_or_else(|| OrchestratorError::new(ErrorKind::Internal, "unknown task"))?;
        entry.cancel.cancel();
        Ok(())
    }

    pub async fn progress(&self, task_id: Uuid) -> Option<Progress> {
        self.tasks.read().await.get(&task_id).map(|t| t.flow.progress())
    }

    pub async fn flow(&self, task_id: Uuid) -> Option<FlowSnapshot> {
        self.tasks.read().await.get(&task_id).map(|t| t.flow.snapshot())
    }

    /// Cancels every in-flight task and stops accepting new submissions.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let tasks = self.tasks.read().await;
        for entry in tasks.values() {
            entry.cancel.cancel();
        }
    }
}

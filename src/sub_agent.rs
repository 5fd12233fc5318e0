//! Sub-Agent (component C3): executes a single DAG step.
//!
//! A minimal finite loop (spec.md §4.4): build the role prompt, drive the
//! model loop with streaming and tool calls, and parse the final message as
//! the step output. Each Sub-Agent runs in its own task; the only state it
//! shares with siblings is the Event Bus (append-only) and the global
//! tool-call counter (atomic).

use crate::error::{ErrorKind, OrchestratorError};
use crate::event::{Event, EventBus, EventType};
use crate::llm_session::LLMSession;
use crate::model_gateway::{Message, ModelGateway, Role as GatewayRole};
use crate::role::RoleTemplate;
use crate::step::Step;
use crate::tool_registry::ToolRegistry;
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Per-task resources shared by every Sub-Agent dispatched for that task.
pub struct SubAgentContext {
    pub gateway: Arc<dyn ModelGateway>,
    pub tool_registry: Arc<RwLock<ToolRegistry>>,
    pub event_bus: EventBus,
    pub tool_budget: Arc<AtomicI64>,
    pub max_tool_call_turns: u32,
    pub task_id: Uuid,
}

pub struct SubAgent {
    context: Arc<SubAgentContext>,
}

impl SubAgent {
    pub fn new(context: Arc<SubAgentContext>) -> Self {
        Self { context }
    }

    /// Executes `step`, given the already-completed outputs of its
    /// dependencies (name, output) pairs, returning the step output or a
    /// classified [`OrchestratorError`].
    pub async fn execute(
        &self,
        step: &Step,
        agent_instance_id: Uuid,
        dependency_outputs: &[(String, Value)],
        cancel: &CancellationToken,
    ) -> Result<Value, OrchestratorError> {
        let template: &RoleTemplate = step.role.template();
        let system_prompt = template.default_system_prompt.to_string();

        let mut session = LLMSession::new(
            self.context.gateway.clone(),
            template.preferred_model.to_string(),
            system_prompt,
            128_000,
        );

        let context_text = build_context_text(step, dependency_outputs);
        session.push(Message::new(GatewayRole::User, context_text));

        let mut turns = 0u32;
        let mut buffer = String::new();

        loop {
            if cancel.is_cancelled() {
                return Err(OrchestratorError::cancelled());
            }
            turns += 1;
            if turns > self.context.max_tool_call_turns {
                return Err(OrchestratorError::new(
                    ErrorKind::ToolBudgetExhausted,
                    "exceeded max tool-call turns for this step",
                ));
            }

            let response = self.complete_with_retry(&session, step.id, cancel).await?;

            buffer.push_str(&response.content);
            self.context.event_bus.publish(Event::new(
                EventType::AgentStream,
                self.context.task_id,
                serde_json::json!({
                    "step_id": step.id,
                    "agent_instance_id": agent_instance_id,
                    "delta": response.content.as_ref(),
                    "buffer": buffer,
                }),
            ));

            if response.tool_calls.is_empty() {
                session.push(response.clone());
                break;
            }

            session.push(response.clone());
            for call in &response.tool_calls {
                let remaining = self.context.tool_budget.fetch_sub(1, Ordering::SeqCst);
                if remaining <= 0 {
                    self.context.tool_budget.fetch_add(1, Ordering::SeqCst);
                    return Err(OrchestratorError::new(
                        ErrorKind::ToolBudgetExhausted,
                        "global tool-call budget exhausted",
                    ));
                }

                self.context.event_bus.publish(Event::new(
                    EventType::AgentLog,
                    self.context.task_id,
                    serde_json::json!({
                        "step_id": step.id,
                        "tool_name": call.name,
                    }),
                ));

                let registry = self.context.tool_registry.read().await;
                let result = registry.dispatch(&call.name, call.arguments.clone()).await;
                drop(registry);

                // tool_handler_error (spec.md §7): surfaced to the model as
                // tool-result content, never raised to the caller.
                let content: Arc<str> = serde_json::to_string(&result)
                    .unwrap_or_else(|_| "{}".to_string())
                    .into();
                session.push(Message::new(
                    GatewayRole::Tool {
                        call_id: call.id.clone(),
                    },
                    content,
                ));
            }
        }

        self.context.event_bus.publish(Event::new(
            EventType::AgentStreamClear,
            self.context.task_id,
            serde_json::json!({ "step_id": step.id }),
        ));

        if buffer.trim().is_empty() {
            return Err(OrchestratorError::new(
                ErrorKind::InvalidOutput,
                "model produced an empty final message",
            ));
        }

        Ok(Value::String(buffer))
    }

    async fn complete_with_retry(
        &self,
        session: &LLMSession,
        step_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<Message, OrchestratorError> {
        let messages = session.messages_for_turn();
        let tools = {
            let registry = self.context.tool_registry.read().await;
            let defs = registry.tool_definitions();
            if defs.is_empty() {
                None
            } else {
                Some(defs)
            }
        };

        const MAX_ATTEMPTS: u32 = 3;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self
                .context
                .gateway
                .complete(&messages, session.model_id(), tools.clone(), cancel)
                .await
            {
                Ok(message) => return Ok(message),
                Err(err) => {
                    if attempt >= MAX_ATTEMPTS {
                        log::warn!("step {} model transport failed permanently: {}", step_id, err);
                        return Err(OrchestratorError::with_source(
                            ErrorKind::ModelTransport,
                            format!("model transport failed after {} attempts", attempt),
                            err,
                        ));
                    }
                    let backoff = Duration::from_millis(100 * 2u64.pow(attempt));
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = cancel.cancelled() => return Err(OrchestratorError::cancelled()),
                    }
                }
            }
        }
    }
}

fn build_context_text(step: &Step, dependency_outputs: &[(String, Value)]) -> String {
    let mut text = format!(
        "Step: {}\nDescription: {}\nExpected output: {}\n",
        step.name, step.description, step.expected_output
    );
    if !dependency_outputs.is_empty() {
        text.push_str("\nContext from dependencies:\n");
        for (name, output) in dependency_outputs {
            text.push_str(&format!("- {}: {}\n", name, output));
        }
    }
    text
}

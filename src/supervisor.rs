//! Supervisor (component C7): plans a [`Task`] into a [`TaskPlan`].
//!
//! Grounded on `planner.rs`'s bounded THOUGHT/ANSWER turn loop and on
//! `orchestration.rs`'s `[TASK_COMPLETE:id]`-style manual marker scanning
//! (no regex dependency): here the marker is `[THINKING]...[/THINKING]`,
//! streamed to the Event Bus as it arrives so a dashboard can render the
//! Supervisor's reasoning live, then stripped from the text handed to the
//! plan parser. Tool dispatch (`ACTION`/`OBSERVATION` turns) is not part of
//! this loop: research happens inside dispatched `researcher`/`searcher`
//! steps, which do hold Tool Registry access, rather than during planning.

use crate::config::SupervisorConfig;
use crate::error::{ErrorKind, OrchestratorError};
use crate::event::{Event, EventBus, EventType};
use crate::model_gateway::{Message, ModelGateway, Role as GatewayRole};
use crate::role::Role;
use crate::step::StepDraft;
use crate::task::{Task, TaskPlan};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const THINKING_OPEN: &str = "[THINKING]";
const THINKING_CLOSE: &str = "[/THINKING]";

pub struct Supervisor {
    gateway: Arc<dyn ModelGateway>,
    event_bus: EventBus,
    config: SupervisorConfig,
    /// Heuristic score (spec.md §6) above which a model-claimed
    /// `simple_direct` is overridden into a single-step decomposition
    /// instead of trusted outright.
    complexity_threshold: f32,
}

/// The plan shape the Supervisor's model turn is asked to emit as its final
/// ANSWER, once all THOUGHT turns are stripped away.
#[derive(Debug, Deserialize)]
struct RawPlan {
    refined_text: String,
    #[serde(default)]
    objectives: Vec<String>,
    #[serde(default)]
    simple_direct: bool,
    #[serde(default)]
    direct_answer: Option<String>,
    #[serde(default)]
    steps: Vec<RawStep>,
}

#[derive(Debug, Deserialize)]
struct RawStep {
    ordinal: u32,
    name: String,
    description: String,
    role: Role,
    expected_output: String,
    #[serde(default)]
    depends_on_ordinals: Vec<u32>,
}

impl Supervisor {
    pub fn new(gateway: Arc<dyn ModelGateway>, event_bus: EventBus, config: SupervisorConfig, complexity_threshold: f32) -> Self {
        Self {
            gateway,
            event_bus,
            config,
            complexity_threshold,
        }
    }

    /// Runs the bounded ReAct loop and returns a [`TaskPlan`]. Falls back to
    /// a single-step plan assigned to [`Role::Researcher`] if no parsable
    /// plan is produced within `max_react_iterations` (spec.md §4.2).
    pub async fn plan(&self, task: &Task, cancel: &CancellationToken) -> Result<TaskPlan, OrchestratorError> {
        let system_prompt = format!(
            "{} Respond turn by turn using THOUGHT: lines, wrapping your reasoning \
             in {}...{} markers, and finish with a line starting with ANSWER: followed by a JSON object \
             matching {{refined_text, objectives, simple_direct, direct_answer, steps: \
             [{{ordinal, name, description, role, expected_output, depends_on_ordinals}}]}}. Research and \
             tool use happen inside dispatched steps, not here — do not expect an ACTION turn to produce \
             an observation; plan a `researcher`/`searcher` step instead.",
            Role::Supervisor.template().default_system_prompt,
            THINKING_OPEN,
            THINKING_CLOSE,
        );

        let mut messages = vec![
            Message::new(GatewayRole::System, system_prompt),
            Message::new(GatewayRole::User, task.content.clone()),
        ];

        let mut iterations = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(OrchestratorError::cancelled());
            }
            iterations += 1;
            if iterations > self.config.max_react_iterations {
                break;
            }

            let response = self
                .gateway
                .complete(&messages, "default", None, cancel)
                .await
                .map_err(|e| OrchestratorError::with_source(ErrorKind::ModelTransport, "supervisor turn failed", e))?;

            let visible = self.stream_thinking(task.id, &response.content);

            if let Some(answer) = extract_answer(&visible) {
                if let Some(plan) = parse_plan(&answer, &task.content, self.complexity_threshold) {
                    return Ok(plan);
                }
                // Unparsable ANSWER: let the loop run again with feedback,
                // rather than failing immediately.
                messages.push(response.clone());
                messages.push(Message::new(
                    GatewayRole::User,
                    "Your ANSWER was not valid JSON matching the required plan schema. Try again.",
                ));
                continue;
            }

            messages.push(response.clone());
        }

        log::warn!(
            "task {} exhausted {} ReAct iterations without a parsable plan; falling back to a single researcher step",
            task.id,
            self.config.max_react_iterations
        );
        Ok(fallback_plan(task))
    }

    /// Strips `[THINKING]...[/THINKING]` spans out of `content`, streaming
    /// their text to the Event Bus as `agent_stream` deltas, and returns the
    /// remaining visible text (tolerant of an unclosed trailing marker).
    fn stream_thinking(&self, task_id: Uuid, content: &str) -> String {
        let mut visible = String::with_capacity(content.len());
        let mut rest = content;
        loop {
            match rest.find(THINKING_OPEN) {
                None => {
                    visible.push_str(rest);
                    break;
                }
                Some(open_at) => {
                    visible.push_str(&rest[..open_at]);
                    let after_open = &rest[open_at + THINKING_OPEN.len()..];
                    match after_open.find(THINKING_CLOSE) {
                        Some(close_at) => {
                            let thought = &after_open[..close_at];
                            self.event_bus.publish(Event::new(
                                EventType::AgentStream,
                                task_id,
                                serde_json::json!({ "role": "supervisor", "thought": thought }),
                            ));
                            rest = &after_open[close_at + THINKING_CLOSE.len()..];
                        }
                        None => {
                            // Unclosed marker: stream what we have and stop;
                            // nothing after it is visible plan text.
                            self.event_bus.publish(Event::new(
                                EventType::AgentStream,
                                task_id,
                                serde_json::json!({ "role": "supervisor", "thought": after_open }),
                            ));
                            break;
                        }
                    }
                }
            }
        }
        visible
    }
}

/// Finds the last `ANSWER:` line and returns everything after it.
fn extract_answer(visible: &str) -> Option<String> {
    let marker = "ANSWER:";
    let idx = visible.rfind(marker)?;
    Some(visible[idx + marker.len()..].trim().to_string())
}

/// Cheap proxy for request complexity: normalized word count, capped at 1.0.
/// Sanity-checks a model-claimed `simple_direct` against `complexity_threshold`
/// rather than trusting it unconditionally (spec.md §6).
fn complexity_score(content: &str) -> f32 {
    let words = content.split_whitespace().count() as f32;
    (words / 40.0).min(1.0)
}

fn parse_plan(answer: &str, task_content: &str, complexity_threshold: f32) -> Option<TaskPlan> {
    let raw: RawPlan = serde_json::from_str(answer).ok()?;
    if raw.simple_direct {
        if complexity_score(task_content) <= complexity_threshold {
            let direct_answer = raw.direct_answer?;
            return Some(TaskPlan::direct(raw.refined_text, direct_answer));
        }
        // The heuristic judges this too complex for a direct answer despite
        // the model's claim: decompose into a single research step instead.
        return Some(TaskPlan::decomposed(
            raw.refined_text.clone(),
            raw.objectives,
            vec![StepDraft {
                ordinal: 0,
                name: "research".to_string(),
                description: raw.refined_text,
                role: Role::Researcher,
                expected_output: "a direct answer to the request".to_string(),
                depends_on_ordinals: vec![],
            }],
        ));
    }
    if raw.steps.is_empty() {
        return None;
    }
    let steps: Vec<StepDraft> = raw
        .steps
        .into_iter()
        .map(|s| StepDraft {
            ordinal: s.ordinal,
            name: s.name,
            description: s.description,
            role: s.role,
            expected_output: s.expected_output,
            depends_on_ordinals: s.depends_on_ordinals,
        })
        .collect();
    Some(TaskPlan::decomposed(raw.refined_text, raw.objectives, steps))
}

fn fallback_plan(task: &Task) -> TaskPlan {
    TaskPlan::decomposed(
        task.content.clone(),
        vec!["answer the request".to_string()],
        vec![StepDraft {
            ordinal: 0,
            name: "research".to_string(),
            description: task.content.clone(),
            role: Role::Researcher,
            expected_output: "a direct answer to the request".to_string(),
            depends_on_ordinals: vec![],
        }],
    )
}

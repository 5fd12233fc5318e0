//! Wave Scheduler (component C5): drives an [`ExecutionFlow`] to completion.
//!
//! Grounded on `orchestration.rs`'s wave-based dispatch loop (compute ready
//! set, dispatch bounded by a semaphore, barrier-join, repeat) generalized to
//! also run the Quality-Gate Reviewer after each step and apply its decision
//! before computing the next wave. `tokio_util::sync::CancellationToken`
//! threads cooperative cancellation through every in-flight Sub-Agent; the
//! global tool-call budget is an `AtomicI64` shared by every Sub-Agent
//! dispatched for the task. The Scheduler is also the single writer of the
//! Agent Instance registry (spec.md §5): it materializes one on dispatch,
//! publishes it to the Event Bus, and releases it once the step reaches a
//! terminal status.

use crate::config::{Config, ExecutionMode};
use crate::error::{ErrorKind, OrchestratorError};
use crate::event::{Event, EventType};
use crate::flow::{ExecutionFlow, WaveStats};
use crate::reviewer::{QualityReport, ReviewDecision, Reviewer};
use crate::role::AgentInstance;
use crate::step::{Step, StepStatus};
use crate::sub_agent::{SubAgent, SubAgentContext};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::AtomicI64;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub struct Scheduler {
    sub_agent_context: Arc<SubAgentContext>,
    reviewer: Arc<Reviewer>,
    config: Config,
    concurrency: Arc<Semaphore>,
    agent_registry: Arc<Mutex<HashMap<Uuid, AgentInstance>>>,
}

impl Scheduler {
    pub fn new(sub_agent_context: Arc<SubAgentContext>, reviewer: Arc<Reviewer>, config: Config) -> Self {
        let concurrency = Arc::new(Semaphore::new(config.max_concurrent_agents.max(1)));
        Self {
            sub_agent_context,
            reviewer,
            config,
            concurrency,
            agent_registry: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Drives `flow` to completion: every step ends `completed`, `failed`,
    /// or `skipped`. Returns once no unterminated work remains, the overall
    /// task timeout elapses, or `cancel` is triggered externally.
    pub async fn run(&self, flow: &mut ExecutionFlow, cancel: CancellationToken) -> Result<(), OrchestratorError> {
        let task_id = flow.task_id();
        let deadline = tokio::time::sleep(Duration::from_secs(self.config.execution_timeout_secs));
        tokio::pin!(deadline);

        let mut wave_number = 0u32;
        loop {
            if cancel.is_cancelled() {
                self.mark_remaining_cancelled(flow);
                return Err(OrchestratorError::cancelled());
            }
            if !flow.has_unterminated_work() {
                return Ok(());
            }

            let ready = flow.ready_steps();
            if ready.is_empty() {
                if flow.running_count() == 0 {
                    // Nothing ready and nothing running, but unterminated
                    // work remains: every remaining step is downstream of a
                    // failed dependency that was never explicitly skipped.
                    self.strand_remaining(flow, task_id);
                    return Ok(());
                }
                // Steps from a previous wave are still technically marked
                // running only while their Sub-Agent task is in flight,
                // which this implementation joins before returning from a
                // wave, so this branch is unreachable in practice; kept as
                // a defensive exit rather than spinning.
                return Ok(());
            }

            let parallelism = ready.len().min(self.config.max_concurrent_agents.max(1));
            let wave_ids: Vec<Uuid> = ready.into_iter().take(parallelism).collect();
            let started_at = Utc::now();

            for id in &wave_ids {
                flow.mark_running(*id)?;
            }

            let dispatch = self.dispatch_wave(flow, &wave_ids, &cancel);
            let results = tokio::select! {
                results = dispatch => results,
                _ = &mut deadline => {
                    cancel.cancel();
                    return Err(OrchestratorError::timeout("execution_timeout_secs elapsed"));
                }
            };

            let mut completed_count = 0usize;
            let mut failed_count = 0usize;
            for (id, outcome) in results {
                match &outcome {
                    Ok(output) => {
                        flow.mark_completed(id, output.clone());
                        completed_count += 1;
                    }
                    Err(err) => {
                        flow.mark_failed(id, err.kind, err.message.clone());
                        failed_count += 1;
                    }
                }
                self.finalize_step(flow, id, outcome, &cancel).await;
            }

            flow.record_wave(WaveStats {
                wave_number,
                step_count: wave_ids.len(),
                parallelism,
                started_at,
                ended_at: Some(Utc::now()),
                completed_count,
                failed_count,
            });
            self.sub_agent_context.event_bus.publish(Event::new(
                EventType::ExecutionFlowUpdated,
                task_id,
                serde_json::to_value(flow.snapshot()).unwrap_or(serde_json::Value::Null),
            ));
            wave_number += 1;
        }
    }

    async fn dispatch_wave(
        &self,
        flow: &mut ExecutionFlow,
        wave_ids: &[Uuid],
        cancel: &CancellationToken,
    ) -> Vec<(Uuid, Result<serde_json::Value, OrchestratorError>)> {
        let task_id = flow.task_id();
        let mut handles = Vec::with_capacity(wave_ids.len());
        for id in wave_ids {
            let step = flow.get(*id).expect("wave id must exist in flow").clone();
            let dependency_outputs: Vec<(String, serde_json::Value)> = step
                .dependencies
                .iter()
                .filter_map(|dep| flow.get(*dep))
                .filter_map(|dep| dep.output_payload.clone().map(|o| (dep.name.clone(), o)))
                .collect();

            // Materialize the Agent Instance before spawning: the registry
            // is the single source of truth for "which instance ran this
            // step" (spec.md §3), so it must exist before the step can be
            // observed as running.
            let instance = AgentInstance::new(step.role, task_id);
            let agent_instance_id = instance.id;
            flow.assign_agent_instance(*id, agent_instance_id);
            self.agent_registry.lock().unwrap().insert(agent_instance_id, instance.clone());
            self.sub_agent_context.event_bus.publish(Event::new(
                EventType::AgentCreated,
                task_id,
                serde_json::to_value(&instance).unwrap_or(serde_json::Value::Null),
            ));
            self.sub_agent_context.event_bus.publish(Event::new(
                EventType::StepStatusChanged,
                task_id,
                serde_json::json!({
                    "step_id": id,
                    "status": "running",
                    "agent_instance_id": agent_instance_id,
                }),
            ));

            let semaphore = self.concurrency.clone();
            let sub_agent_context = self.sub_agent_context.clone();
            let agent_timeout = Duration::from_secs(self.config.agent_timeout_secs);
            let cancel = cancel.clone();
            let id = *id;

            handles.push(tokio::spawn(async move {
                let permit = semaphore.acquire_owned().await;
                let agent = SubAgent::new(sub_agent_context);
                let outcome = tokio::time::timeout(
                    agent_timeout,
                    agent.execute(&step, agent_instance_id, &dependency_outputs, &cancel),
                )
                .await;
                drop(permit);
                let result = match outcome {
                    Ok(inner) => inner,
                    Err(_) => Err(OrchestratorError::timeout("agent_timeout_secs elapsed")),
                };
                (id, agent_instance_id, result)
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok((id, agent_instance_id, result)) => {
                    self.release_agent_instance(task_id, agent_instance_id, result.is_ok());
                    results.push((id, result));
                }
                Err(join_err) => {
                    log::error!("sub-agent task panicked: {}", join_err);
                }
            }
        }
        results
    }

    /// Releases a step-terminal Agent Instance from the registry (spec.md
    /// §3: "created on dispatch, released on step terminal") and publishes
    /// its final state.
    fn release_agent_instance(&self, task_id: Uuid, agent_instance_id: Uuid, succeeded: bool) {
        let mut registry = self.agent_registry.lock().unwrap();
        if let Some(mut instance) = registry.remove(&agent_instance_id) {
            if succeeded {
                instance.mark_completed();
            } else {
                instance.mark_failed();
            }
            self.sub_agent_context.event_bus.publish(Event::new(
                EventType::AgentUpdated,
                task_id,
                serde_json::to_value(&instance).unwrap_or(serde_json::Value::Null),
            ));
            self.sub_agent_context.event_bus.publish(Event::new(
                EventType::StepStatusChanged,
                task_id,
                serde_json::json!({
                    "agent_instance_id": agent_instance_id,
                    "status": if succeeded { "completed" } else { "failed" },
                }),
            ));
            self.sub_agent_context.event_bus.publish(Event::new(
                EventType::AgentRemoved,
                task_id,
                serde_json::json!({ "agent_instance_id": agent_instance_id }),
            ));
        }
    }

    /// Routes a step's terminal outcome (success or failure alike) past the
    /// Quality-Gate Reviewer (spec.md §4.3 step 5, §7's error table: each
    /// terminated step is reviewer-adjudicated, not just completed ones). A
    /// step whose own outcome is a cancellation skips the reviewer entirely
    /// — spec.md §5 runs it only for steps that had already completed
    /// before the task was cancelled. With quality gates disabled, a
    /// failure falls back to the legacy retry-or-cascade policy with no
    /// reviewer involvement at all.
    async fn finalize_step(
        &self,
        flow: &mut ExecutionFlow,
        id: Uuid,
        outcome: Result<serde_json::Value, OrchestratorError>,
        cancel: &CancellationToken,
    ) {
        if let Err(err) = &outcome {
            if err.kind == ErrorKind::Cancelled {
                return;
            }
        }

        if !self.config.supervisor.enable_quality_gates {
            if outcome.is_err() {
                self.handle_failure(flow, id);
            }
            return;
        }

        let judge_input = match &outcome {
            Ok(output) => output.clone(),
            Err(err) => serde_json::json!({
                "error": err.message,
                "error_kind": format!("{:?}", err.kind),
            }),
        };
        self.apply_review(flow, id, &judge_input, cancel).await;
    }

    /// Runs the Reviewer over `judge_input` and applies its decision. A
    /// reviewer timeout or transport error is treated as an implicit
    /// `continue` (spec.md §4.5) — the step's current status is left as-is.
    async fn apply_review(&self, flow: &mut ExecutionFlow, id: Uuid, judge_input: &serde_json::Value, cancel: &CancellationToken) {
        let step = match flow.get(id) {
            Some(s) => s.clone(),
            None => return,
        };

        let reviewer_timeout = Duration::from_secs(self.config.reviewer_timeout_secs);
        let report = match tokio::time::timeout(reviewer_timeout, self.reviewer.review(&step, judge_input, cancel)).await {
            Ok(Ok(report)) => report,
            Ok(Err(err)) => {
                log::warn!("reviewer failed for step {}: {}", id, err);
                return;
            }
            Err(_) => {
                log::warn!("reviewer timed out for step {}, treating as continue", id);
                return;
            }
        };

        self.coerce_and_apply(flow, id, &step, judge_input, report);
    }

    /// Turns a raw [`QualityReport`] into a flow mutation (spec.md §4.5): a
    /// failing score forces `retry` while the budget allows it, regardless
    /// of what the model itself decided; once the model passed the score
    /// bar (or the retry budget is spent), its own decision — including
    /// `add_step`/`skip_next` — is honored as-is. `add_step` is gated only
    /// on [`ExecutionFlow::insert_step`]'s dependency/acyclicity check, not
    /// on the score.
    fn coerce_and_apply(
        &self,
        flow: &mut ExecutionFlow,
        id: Uuid,
        step: &Step,
        judge_input: &serde_json::Value,
        report: QualityReport,
    ) {
        let critical = step.role.template().critical;
        let passes = report.score >= self.config.supervisor.quality_threshold;
        let retries_remain = step.retry_count < self.config.supervisor.max_retry_on_failure;

        let decision = if !passes && retries_remain {
            ReviewDecision::Retry
        } else {
            report.decision
        };

        match decision {
            ReviewDecision::Continue => {
                // A `Failed` step reaching `continue` means the Reviewer
                // judged the error outcome acceptable to proceed past
                // (spec.md §4.3 step 5 extends adjudication to failed
                // steps too); coerce it to `completed` so descendants see
                // a satisfied dependency instead of staying stranded.
                if step.status == StepStatus::Failed {
                    flow.mark_completed(id, judge_input.clone());
                }
            }
            ReviewDecision::Retry => {
                flow.mark_failed(id, ErrorKind::InvalidOutput, report.rationale.clone());
                if !flow.retry(id, self.config.supervisor.max_retry_on_failure) {
                    // Retry budget exhausted: a critical role's failure
                    // cascades to its descendants. A non-critical one is
                    // coerced back to `continue` so best-effort descendants
                    // can still run (spec.md §4.5).
                    if critical {
                        flow.skip_descendants(id);
                    } else {
                        flow.mark_completed(id, judge_input.clone());
                        self.sub_agent_context.event_bus.publish(Event::new(
                            EventType::TaskLog,
                            flow.task_id(),
                            serde_json::json!({
                                "message": format!(
                                    "step {} exhausted its retry budget below the quality threshold; coerced to continue (non-critical, best-effort)",
                                    id
                                ),
                                "step_id": id,
                            }),
                        ));
                    }
                }
            }
            ReviewDecision::AddStep => {
                if self.config.execution_mode() == ExecutionMode::Scheduler {
                    log::info!("add_step decision coerced to continue in scheduler mode for step {}", id);
                    return;
                }
                if let Some(draft) = report.new_step {
                    let new_step = Step::new(&draft, Default::default());
                    if let Err(err) = flow.insert_step(new_step, Some(id)) {
                        log::warn!("reviewer add_step for step {} rejected: {}", id, err);
                    }
                }
            }
            ReviewDecision::SkipNext => {
                flow.skip_descendants(id);
            }
        }
    }

    /// Legacy retry-or-cascade policy used only when quality gates are
    /// disabled, so a failed step still gets a bounded retry and a critical
    /// role's exhausted failure still cascades, without ever invoking the
    /// Reviewer.
    fn handle_failure(&self, flow: &mut ExecutionFlow, id: Uuid) {
        let critical = flow.get(id).map(|s| s.role.template().critical).unwrap_or(false);
        if flow.retry(id, self.config.supervisor.max_retry_on_failure) {
            return;
        }
        if critical {
            flow.skip_descendants(id);
        }
    }

    /// Marks every remaining non-terminal step `skipped` — reached only if
    /// the flow has stranded work with nothing running and nothing ready,
    /// which means every remaining step sits behind a failed dependency that
    /// was not explicitly cascaded (e.g. a non-critical role's exhausted
    /// retry).
    fn strand_remaining(&self, flow: &mut ExecutionFlow, task_id: Uuid) {
        let stranded: Vec<Uuid> = flow
            .snapshot()
            .steps
            .into_iter()
            .filter(|s| !s.is_terminal())
            .map(|s| s.id)
            .collect();
        for id in &stranded {
            flow.mark_skipped(*id);
        }
        if !stranded.is_empty() {
            self.sub_agent_context.event_bus.publish(Event::new(
                EventType::TaskLog,
                task_id,
                serde_json::json!({ "message": format!("{} step(s) stranded behind failed dependencies, skipped", stranded.len()) }),
            ));
        }
    }

    /// Marks every non-terminal step `failed(cancelled)` so a cancelled
    /// task reaches a fully terminal flow rather than leaving steps stuck
    /// `waiting` forever (spec.md §8, invariant 8).
    fn mark_remaining_cancelled(&self, flow: &mut ExecutionFlow) {
        let remaining: Vec<Uuid> = flow
            .snapshot()
            .steps
            .into_iter()
            .filter(|s| !s.is_terminal())
            .map(|s| s.id)
            .collect();
        for id in remaining {
            flow.mark_failed(id, ErrorKind::Cancelled, "task was cancelled");
        }
    }
}

pub struct GlobalToolBudget;

impl GlobalToolBudget {
    pub fn new(max_tool_calls: i64) -> Arc<AtomicI64> {
        Arc::new(AtomicI64::new(max_tool_calls))
    }
}

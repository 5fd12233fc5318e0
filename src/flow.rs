//! Execution Flow (component C4): the canonical, mutable per-task DAG.
//!
//! Exclusively mutated by the Wave Scheduler; all other readers (dashboard,
//! reviewer) only ever see an immutable [`FlowSnapshot`].

use crate::error::{ErrorKind, OrchestratorError};
use crate::step::{Step, StepError, StepStatus};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Progress {
    pub pending: usize,
    pub waiting: usize,
    pub blocked: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Progress {
    pub fn total(&self) -> usize {
        self.pending
            + self.waiting
            + self.blocked
            + self.running
            + self.completed
            + self.failed
            + self.skipped
    }
}

/// Per-wave dispatch record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaveStats {
    pub wave_number: u32,
    pub step_count: usize,
    pub parallelism: usize,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_count: usize,
    pub failed_count: usize,
}

/// Immutable view of the flow for observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowSnapshot {
    pub task_id: Uuid,
    pub steps: Vec<Step>,
    pub topological_order: Vec<Uuid>,
    pub progress: Progress,
    pub wave_stats: Vec<WaveStats>,
}

/// The canonical, mutable per-task DAG.
pub struct ExecutionFlow {
    task_id: Uuid,
    steps: HashMap<Uuid, Step>,
    order_cache: Option<Vec<Uuid>>,
    wave_stats: Vec<WaveStats>,
}

impl ExecutionFlow {
    /// Build a flow from a fully-resolved set of steps (dependency ids
    /// already rewritten from plan ordinals to step ids by the caller).
    /// A fresh (non-terminal) step begins `waiting`: `pending` in spec.md
    /// terms is the pre-flow state of a draft that has not yet been
    /// admitted to a DAG. A step admitted already `completed` (the
    /// Supervisor's simple-direct bypass synthesizes one such step) keeps
    /// that status rather than being reset.
    pub fn new(task_id: Uuid, mut steps: Vec<Step>) -> Result<Self, OrchestratorError> {
        for step in steps.iter_mut() {
            if !step.is_terminal() {
                step.status = StepStatus::Waiting;
            }
        }
        let mut flow = Self {
            task_id,
            steps: steps.into_iter().map(|s| (s.id, s)).collect(),
            order_cache: None,
            wave_stats: Vec::new(),
        };
        flow.validate_dependencies()?;
        flow.topological_order()?; // populates cache, rejects cycles
        Ok(flow)
    }

    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    fn validate_dependencies(&self) -> Result<(), OrchestratorError> {
        for step in self.steps.values() {
            for dep in &step.dependencies {
                if !self.steps.contains_key(dep) {
                    return Err(OrchestratorError::new(
                        ErrorKind::DependencyUnsatisfied,
                        format!("step {} depends on unknown step {}", step.id, dep),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Kahn's algorithm; ties within a topological level are broken by
    /// ordinal. Computed lazily and cached until the next mutation.
    pub fn topological_order(&mut self) -> Result<&[Uuid], OrchestratorError> {
        if self.order_cache.is_none() {
            self.order_cache = Some(self.compute_topological_order()?);
        }
        Ok(self.order_cache.as_deref().unwrap())
    }

    fn compute_topological_order(&self) -> Result<Vec<Uuid>, OrchestratorError> {
        let mut in_degree: HashMap<Uuid, usize> = HashMap::new();
        let mut dependents: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for (id, step) in &self.steps {
            in_degree.entry(*id).or_insert(0);
            for dep in &step.dependencies {
                *in_degree.entry(*id).or_insert(0) += 1;
                dependents.entry(*dep).or_default().push(*id);
            }
        }

        let mut ready: Vec<Uuid> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(id, _)| *id)
            .collect();
        ready.sort_by_key(|id| self.steps[id].ordinal);
        let mut queue: VecDeque<Uuid> = ready.into();

        let mut order = Vec::with_capacity(self.steps.len());
        while let Some(id) = queue.pop_front() {
            order.push(id);
            if let Some(children) = dependents.get(&id) {
                let mut newly_ready = Vec::new();
                for child in children {
                    let deg = in_degree.get_mut(child).unwrap();
                    *deg -= 1;
                    if *deg == 0 {
                        newly_ready.push(*child);
                    }
                }
                newly_ready.sort_by_key(|id| self.steps[id].ordinal);
                for child in newly_ready {
                    queue.push_back(child);
                }
            }
        }

        if order.len() != self.steps.len() {
            return Err(OrchestratorError::new(
                ErrorKind::CycleDetected,
                "dependency graph contains a cycle",
            ));
        }
        Ok(order)
    }

    fn invalidate_order(&mut self) {
        self.order_cache = None;
    }

    /// Steps whose dependencies are all `completed` and whose own status is
    /// `waiting`.
    pub fn ready_steps(&self) -> Vec<Uuid> {
        let mut ready: Vec<Uuid> = self
            .steps
            .values()
            .filter(|s| {
                s.status == StepStatus::Waiting
                    && s.dependencies
                        .iter()
                        .all(|dep| self.steps.get(dep).map(|d| d.status == StepStatus::Completed).unwrap_or(false))
            })
            .map(|s| s.id)
            .collect();
        ready.sort_by_key(|id| self.steps[id].ordinal);
        ready
    }

    pub fn get(&self, id: Uuid) -> Option<&Step> {
        self.steps.get(&id)
    }

    /// Records which Agent Instance was materialized for `id` (spec.md §3's
    /// "assigned agent instance id"), set by the Scheduler on dispatch.
    pub fn assign_agent_instance(&mut self, id: Uuid, agent_instance_id: Uuid) {
        if let Some(step) = self.steps.get_mut(&id) {
            step.agent_instance_id = Some(agent_instance_id);
        }
    }

    pub fn mark_running(&mut self, id: Uuid) -> Result<(), OrchestratorError> {
        let deps: HashSet<Uuid> = self
            .steps
            .get(&id)
            .ok_or_else(|| OrchestratorError::new(ErrorKind::DependencyUnsatisfied, "unknown step"))?
            .dependencies
            .clone();
        for dep in &deps {
            let satisfied = self
                .steps
                .get(dep)
                .map(|d| d.status == StepStatus::Completed)
                .unwrap_or(false);
            if !satisfied {
                return Err(OrchestratorError::new(
                    ErrorKind::DependencyUnsatisfied,
                    format!("step {} cannot run: dependency {} not completed", id, dep),
                ));
            }
        }
        let step = self.steps.get_mut(&id).unwrap();
        step.status = StepStatus::Running;
        step.started_at = Some(chrono::Utc::now());
        Ok(())
    }

    pub fn mark_completed(&mut self, id: Uuid, output: serde_json::Value) {
        if let Some(step) = self.steps.get_mut(&id) {
            step.status = StepStatus::Completed;
            step.output_payload = Some(output);
            step.completed_at = Some(chrono::Utc::now());
        }
    }

    pub fn mark_failed(&mut self, id: Uuid, kind: ErrorKind, message: impl Into<String>) {
        if let Some(step) = self.steps.get_mut(&id) {
            step.status = StepStatus::Failed;
            step.error = Some(StepError {
                kind,
                message: message.into(),
            });
            step.completed_at = Some(chrono::Utc::now());
        }
    }

    pub fn mark_skipped(&mut self, id: Uuid) {
        if let Some(step) = self.steps.get_mut(&id) {
            if !step.is_terminal() {
                step.status = StepStatus::Skipped;
                step.completed_at = Some(chrono::Utc::now());
            }
        }
    }

    /// Transitively mark every descendant of `id` as `skipped` (reviewer
    /// `skip_next` decision, spec.md §4.3/§4.5).
    pub fn skip_descendants(&mut self, id: Uuid) {
        let mut frontier: VecDeque<Uuid> = VecDeque::new();
        frontier.push_back(id);
        let mut visited: HashSet<Uuid> = HashSet::new();
        while let Some(current) = frontier.pop_front() {
            let children: Vec<Uuid> = self
                .steps
                .values()
                .filter(|s| s.dependencies.contains(&current))
                .map(|s| s.id)
                .collect();
            for child in children {
                if visited.insert(child) {
                    self.mark_skipped(child);
                    frontier.push_back(child);
                }
            }
        }
    }

    /// Reset a step to `waiting` and bump its retry counter. Refused (no-op,
    /// returns `false`) if `max_retry_on_failure` has already been reached.
    pub fn retry(&mut self, id: Uuid, max_retry_on_failure: u32) -> bool {
        if let Some(step) = self.steps.get_mut(&id) {
            if step.retry_count >= max_retry_on_failure {
                return false;
            }
            step.retry_count += 1;
            step.status = StepStatus::Waiting;
            step.error = None;
            step.started_at = None;
            step.completed_at = None;
            true
        } else {
            false
        }
    }

    /// Insert a new step, optionally depending on `before_id` (the reviewed
    /// step for an `add_step` decision). Rejects the mutation (returning it
    /// as a validated error rather than panicking) if it would introduce a
    /// cycle, leaving the flow unchanged.
    pub fn insert_step(&mut self, mut step: Step, before_id: Option<Uuid>) -> Result<Uuid, OrchestratorError> {
        if let Some(before) = before_id {
            if !self.steps.contains_key(&before) {
                return Err(OrchestratorError::new(
                    ErrorKind::DependencyUnsatisfied,
                    format!("insert_step before unknown step {}", before),
                ));
            }
            step.dependencies.insert(before);
        }
        for dep in &step.dependencies {
            match self.steps.get(dep) {
                None => {
                    return Err(OrchestratorError::new(
                        ErrorKind::DependencyUnsatisfied,
                        format!("insert_step depends on unknown step {}", dep),
                    ));
                }
                Some(d) if d.status != StepStatus::Completed => {
                    return Err(OrchestratorError::new(
                        ErrorKind::DependencyUnsatisfied,
                        format!("insert_step depends on step {} which is not completed", dep),
                    ));
                }
                _ => {}
            }
        }
        step.status = StepStatus::Waiting;
        let id = step.id;
        self.steps.insert(id, step);
        self.invalidate_order();
        if let Err(e) = self.topological_order() {
            self.steps.remove(&id);
            self.invalidate_order();
            return Err(e);
        }
        Ok(id)
    }

    pub fn add_step(&mut self, step: Step) -> Result<Uuid, OrchestratorError> {
        self.insert_step(step, None)
    }

    pub fn record_wave(&mut self, stats: WaveStats) {
        self.wave_stats.push(stats);
    }

    pub fn wave_stats(&self) -> &[WaveStats] {
        &self.wave_stats
    }

    pub fn progress(&self) -> Progress {
        let mut p = Progress::default();
        for step in self.steps.values() {
            match step.status {
                StepStatus::Pending => p.pending += 1,
                StepStatus::Waiting => p.waiting += 1,
                StepStatus::Blocked => p.blocked += 1,
                StepStatus::Running => p.running += 1,
                StepStatus::Completed => p.completed += 1,
                StepStatus::Failed => p.failed += 1,
                StepStatus::Skipped => p.skipped += 1,
            }
        }
        p
    }

    pub fn running_count(&self) -> usize {
        self.steps
            .values()
            .filter(|s| s.status == StepStatus::Running)
            .count()
    }

    pub fn has_unterminated_work(&self) -> bool {
        self.steps.values().any(|s| !s.is_terminal())
    }

    /// Every step regardless of position in the DAG, used by the Aggregator
    /// to build a best-effort partial artifact when a task did not reach
    /// normal completion (spec.md §7).
    pub fn all_steps(&self) -> Vec<&Step> {
        self.steps.values().collect()
    }

    /// No-successor steps: the outputs the Aggregator merges.
    pub fn terminal_steps(&self) -> Vec<&Step> {
        let has_successor: HashSet<Uuid> = self
            .steps
            .values()
            .flat_map(|s| s.dependencies.iter().copied())
            .collect();
        self.steps
            .values()
            .filter(|s| !has_successor.contains(&s.id))
            .collect()
    }

    pub fn snapshot(&self) -> FlowSnapshot {
        let mut steps: Vec<Step> = self.steps.values().cloned().collect();
        steps.sort_by_key(|s| s.ordinal);
        FlowSnapshot {
            task_id: self.task_id,
            steps,
            topological_order: self.order_cache.clone().unwrap_or_default(),
            progress: self.progress(),
            wave_stats: self.wave_stats.clone(),
        }
    }
}

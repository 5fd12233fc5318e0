//! Step (DAG vertex) data model (spec.md §3).

use crate::error::ErrorKind;
use crate::role::Role;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Waiting,
    Blocked,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// A step as proposed by the Supervisor, before it is assigned a stable
/// step id and inserted into an [`crate::flow::ExecutionFlow`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDraft {
    pub ordinal: u32,
    pub name: String,
    pub description: String,
    pub role: Role,
    pub expected_output: String,
    /// Dependencies named by ordinal of an earlier step in the same plan;
    /// the Supervisor only ever points backwards, which guarantees
    /// acyclicity by construction (spec.md §4.1).
    pub depends_on_ordinals: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepError {
    pub kind: ErrorKind,
    pub message: String,
}

/// A DAG vertex: one unit of work assigned to exactly one role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: Uuid,
    pub ordinal: u32,
    pub name: String,
    pub description: String,
    pub role: Role,
    pub expected_output: String,
    pub dependencies: HashSet<Uuid>,
    pub status: StepStatus,
    pub input_payload: Option<serde_json::Value>,
    pub output_payload: Option<serde_json::Value>,
    pub error: Option<StepError>,
    pub agent_instance_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub log: Vec<String>,
}

impl Step {
    pub fn new(draft: &StepDraft, dependencies: HashSet<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            ordinal: draft.ordinal,
            name: draft.name.clone(),
            description: draft.description.clone(),
            role: draft.role,
            expected_output: draft.expected_output.clone(),
            dependencies,
            status: StepStatus::Pending,
            input_payload: None,
            output_payload: None,
            error: None,
            agent_instance_id: None,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            log: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        )
    }

    pub fn push_log(&mut self, entry: impl Into<String>) {
        self.log.push(entry.into());
    }
}

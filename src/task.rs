//! Task data model (spec.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    Report,
    Code,
    Website,
    Image,
    Video,
    Dataset,
    Document,
    Composite,
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFile {
    pub id: Uuid,
    pub name: String,
    pub mime: String,
    pub size: u64,
    pub storage_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Created,
    Planning,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// The user request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub content: String,
    pub files: Vec<TaskFile>,
    pub output_type: OutputType,
    pub created_at: DateTime<Utc>,
    pub status: TaskStatus,
}

impl Task {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            files: Vec::new(),
            output_type: OutputType::Auto,
            created_at: Utc::now(),
            status: TaskStatus::Created,
        }
    }

    pub fn with_output_type(mut self, output_type: OutputType) -> Self {
        self.output_type = output_type;
        self
    }

    pub fn with_files(mut self, files: Vec<TaskFile>) -> Self {
        self.files = files;
        self
    }
}

/// Produced by the Supervisor: the decomposition of a [`Task`] into steps,
/// or a direct answer bypassing the DAG entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPlan {
    pub refined_text: String,
    pub objectives: Vec<String>,
    pub simple_direct: bool,
    pub direct_answer: Option<String>,
    pub steps: Vec<crate::step::StepDraft>,
}

impl TaskPlan {
    pub fn direct(refined_text: impl Into<String>, direct_answer: impl Into<String>) -> Self {
        Self {
            refined_text: refined_text.into(),
            objectives: Vec::new(),
            simple_direct: true,
            direct_answer: Some(direct_answer.into()),
            steps: Vec::new(),
        }
    }

    pub fn decomposed(
        refined_text: impl Into<String>,
        objectives: Vec<String>,
        steps: Vec<crate::step::StepDraft>,
    ) -> Self {
        Self {
            refined_text: refined_text.into(),
            objectives,
            simple_direct: false,
            direct_answer: None,
            steps,
        }
    }
}

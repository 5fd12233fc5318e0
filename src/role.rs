//! Closed-set role catalog (spec.md GLOSSARY / DESIGN NOTES).
//!
//! Collapses what a source-language implementation would express as a class
//! hierarchy per role into one tagged enum plus a static template catalog,
//! consumed by a single generic Sub-Agent loop. The catalog is a
//! `lazy_static`, matching the teacher's own reach for `lazy_static` in
//! `Cargo.toml` for process-wide static tables.

use lazy_static::lazy_static;
use std::collections::HashMap;

/// The closed set of role labels a step may be assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Supervisor,
    Researcher,
    Searcher,
    Coder,
    Writer,
    Analyst,
    Summarizer,
    Translator,
    FactChecker,
    Creative,
    ImageAnalyst,
    DocumentAnalyst,
    QualityChecker,
    TextToImage,
    TextToVideo,
    ImageToVideo,
    VoiceSynth,
}

impl Role {
    pub fn all() -> &'static [Role] {
        &[
            Role::Supervisor,
            Role::Researcher,
            Role::Searcher,
            Role::Coder,
            Role::Writer,
            Role::Analyst,
            Role::Summarizer,
            Role::Translator,
            Role::FactChecker,
            Role::Creative,
            Role::ImageAnalyst,
            Role::DocumentAnalyst,
            Role::QualityChecker,
            Role::TextToImage,
            Role::TextToVideo,
            Role::ImageToVideo,
            Role::VoiceSynth,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Supervisor => "supervisor",
            Role::Researcher => "researcher",
            Role::Searcher => "searcher",
            Role::Coder => "coder",
            Role::Writer => "writer",
            Role::Analyst => "analyst",
            Role::Summarizer => "summarizer",
            Role::Translator => "translator",
            Role::FactChecker => "fact_checker",
            Role::Creative => "creative",
            Role::ImageAnalyst => "image_analyst",
            Role::DocumentAnalyst => "document_analyst",
            Role::QualityChecker => "quality_checker",
            Role::TextToImage => "text_to_image",
            Role::TextToVideo => "text_to_video",
            Role::ImageToVideo => "image_to_video",
            Role::VoiceSynth => "voice_synth",
        }
    }

    pub fn template(&self) -> &'static RoleTemplate {
        ROLE_CATALOG.get(self).unwrap_or_else(|| {
            panic!("role catalog missing entry for {:?}; this is a bug", self)
        })
    }
}

/// Output shape family used by the Result Aggregator's merge rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeFamily {
    /// Concatenate with headings.
    Text,
    /// Produce a file tree.
    Code,
    /// Collect binary URIs.
    Media,
}

/// A static, per-role template materialized into a runtime Agent Instance
/// on dispatch.
#[derive(Debug, Clone)]
pub struct RoleTemplate {
    pub role: Role,
    pub display_name: &'static str,
    pub default_system_prompt: &'static str,
    pub preferred_model: &'static str,
    pub tool_access: &'static [&'static str],
    pub avatar_token: &'static str,
    pub merge_family: MergeFamily,
    /// When `true`, the Quality-Gate Reviewer escalates exhausted retries to
    /// `skip_next` instead of coercing to `continue` (spec.md §4.5).
    pub critical: bool,
}

lazy_static! {
    static ref ROLE_CATALOG: HashMap<Role, RoleTemplate> = {
        let mut m = HashMap::new();
        m.insert(
            Role::Supervisor,
            RoleTemplate {
                role: Role::Supervisor,
                display_name: "Supervisor",
                default_system_prompt: "You are the supervisor. Decompose the request into a dependency-respecting plan of steps, or answer directly if it is trivial.",
                preferred_model: "default",
                tool_access: &["sandbox_browser"],
                avatar_token: "supervisor",
                merge_family: MergeFamily::Text,
                critical: true,
            },
        );
        m.insert(
            Role::Researcher,
            RoleTemplate {
                role: Role::Researcher,
                display_name: "Researcher",
                default_system_prompt: "You are a researcher. Gather and synthesize factual information relevant to the step.",
                preferred_model: "default",
                tool_access: &["sandbox_browser"],
                avatar_token: "researcher",
                merge_family: MergeFamily::Text,
                critical: false,
            },
        );
        m.insert(
            Role::Searcher,
            RoleTemplate {
                role: Role::Searcher,
                display_name: "Searcher",
                default_system_prompt: "You are a search specialist. Find and summarize the most relevant sources for the step.",
                preferred_model: "default",
                tool_access: &["sandbox_browser"],
                avatar_token: "searcher",
                merge_family: MergeFamily::Text,
                critical: false,
            },
        );
        m.insert(
            Role::Coder,
            RoleTemplate {
                role: Role::Coder,
                display_name: "Coder",
                default_system_prompt: "You are a software engineer. Produce correct, runnable code for the step.",
                preferred_model: "default",
                tool_access: &["sandbox_code_interpreter"],
                avatar_token: "coder",
                merge_family: MergeFamily::Code,
                critical: true,
            },
        );
        m.insert(
            Role::Writer,
            RoleTemplate {
                role: Role::Writer,
                display_name: "Writer",
                default_system_prompt: "You are a writer. Produce clear, well-structured prose for the step.",
                preferred_model: "default",
                tool_access: &[],
                avatar_token: "writer",
                merge_family: MergeFamily::Text,
                critical: false,
            },
        );
        m.insert(
            Role::Analyst,
            RoleTemplate {
                role: Role::Analyst,
                display_name: "Analyst",
                default_system_prompt: "You are an analyst. Interpret the gathered material and draw conclusions for the step.",
                preferred_model: "default",
                tool_access: &["sandbox_code_interpreter"],
                avatar_token: "analyst",
                merge_family: MergeFamily::Text,
                critical: false,
            },
        );
        m.insert(
            Role::Summarizer,
            RoleTemplate {
                role: Role::Summarizer,
                display_name: "Summarizer",
                default_system_prompt: "You are a summarizer. Condense the input into a concise summary for the step.",
                preferred_model: "default",
                tool_access: &[],
                avatar_token: "summarizer",
                merge_family: MergeFamily::Text,
                critical: false,
            },
        );
        m.insert(
            Role::Translator,
            RoleTemplate {
                role: Role::Translator,
                display_name: "Translator",
                default_system_prompt: "You are a translator. Translate the input faithfully for the step.",
                preferred_model: "default",
                tool_access: &[],
                avatar_token: "translator",
                merge_family: MergeFamily::Text,
                critical: false,
            },
        );
        m.insert(
            Role::FactChecker,
            RoleTemplate {
                role: Role::FactChecker,
                display_name: "Fact Checker",
                default_system_prompt: "You are a fact checker. Verify claims in the input against reliable sources for the step.",
                preferred_model: "default",
                tool_access: &["sandbox_browser"],
                avatar_token: "fact_checker",
                merge_family: MergeFamily::Text,
                critical: true,
            },
        );
        m.insert(
            Role::Creative,
            RoleTemplate {
                role: Role::Creative,
                display_name: "Creative",
                default_system_prompt: "You are a creative writer. Produce imaginative content for the step.",
                preferred_model: "default",
                tool_access: &[],
                avatar_token: "creative",
                merge_family: MergeFamily::Text,
                critical: false,
            },
        );
        m.insert(
            Role::ImageAnalyst,
            RoleTemplate {
                role: Role::ImageAnalyst,
                display_name: "Image Analyst",
                default_system_prompt: "You are an image analyst. Describe and interpret visual input for the step.",
                preferred_model: "default",
                tool_access: &[],
                avatar_token: "image_analyst",
                merge_family: MergeFamily::Text,
                critical: false,
            },
        );
        m.insert(
            Role::DocumentAnalyst,
            RoleTemplate {
                role: Role::DocumentAnalyst,
                display_name: "Document Analyst",
                default_system_prompt: "You are a document analyst. Extract and interpret information from the attached documents for the step.",
                preferred_model: "default",
                tool_access: &[],
                avatar_token: "document_analyst",
                merge_family: MergeFamily::Text,
                critical: false,
            },
        );
        m.insert(
            Role::QualityChecker,
            RoleTemplate {
                role: Role::QualityChecker,
                display_name: "Quality Checker",
                default_system_prompt: "You are a quality checker. Review the input against the stated requirements for the step.",
                preferred_model: "default",
                tool_access: &[],
                avatar_token: "quality_checker",
                merge_family: MergeFamily::Text,
                critical: true,
            },
        );
        m.insert(
            Role::TextToImage,
            RoleTemplate {
                role: Role::TextToImage,
                display_name: "Text To Image",
                default_system_prompt: "You generate an image description/prompt suitable for an image generation backend.",
                preferred_model: "default",
                tool_access: &[],
                avatar_token: "text_to_image",
                merge_family: MergeFamily::Media,
                critical: false,
            },
        );
        m.insert(
            Role::TextToVideo,
            RoleTemplate {
                role: Role::TextToVideo,
                display_name: "Text To Video",
                default_system_prompt: "You generate a video description/prompt suitable for a video generation backend.",
                preferred_model: "default",
                tool_access: &[],
                avatar_token: "text_to_video",
                merge_family: MergeFamily::Media,
                critical: false,
            },
        );
        m.insert(
            Role::ImageToVideo,
            RoleTemplate {
                role: Role::ImageToVideo,
                display_name: "Image To Video",
                default_system_prompt: "You describe how a source image should be animated into a video for the step.",
                preferred_model: "default",
                tool_access: &[],
                avatar_token: "image_to_video",
                merge_family: MergeFamily::Media,
                critical: false,
            },
        );
        m.insert(
            Role::VoiceSynth,
            RoleTemplate {
                role: Role::VoiceSynth,
                display_name: "Voice Synth",
                default_system_prompt: "You produce a script suitable for voice synthesis for the step.",
                preferred_model: "default",
                tool_access: &[],
                avatar_token: "voice_synth",
                merge_family: MergeFamily::Media,
                critical: false,
            },
        );
        m
    };
}

/// Runtime status of a materialized agent instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentInstanceStatus {
    Idle,
    Running,
    Completed,
    Failed,
}

/// A role template materialized for one step execution.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AgentInstance {
    pub id: uuid::Uuid,
    pub role: Role,
    pub status: AgentInstanceStatus,
    pub current_task_id: Option<uuid::Uuid>,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
}

impl AgentInstance {
    pub fn new(role: Role, task_id: uuid::Uuid) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            role,
            status: AgentInstanceStatus::Idle,
            current_task_id: Some(task_id),
            tasks_completed: 0,
            tasks_failed: 0,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = AgentInstanceStatus::Running;
    }

    pub fn mark_completed(&mut self) {
        self.status = AgentInstanceStatus::Completed;
        self.tasks_completed += 1;
    }

    pub fn mark_failed(&mut self) {
        self.status = AgentInstanceStatus::Failed;
        self.tasks_failed += 1;
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.tasks_completed + self.tasks_failed;
        if total == 0 {
            1.0
        } else {
            self.tasks_completed as f64 / total as f64
        }
    }
}

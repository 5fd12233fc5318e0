//! Orchestrator configuration.
//!
//! Typed fields rather than a stringly-typed map — the one small
//! `CloudLLMConfig` in the inherited tree (`config.rs`) takes the same
//! approach, and the teacher's `Orchestration` struct is always configured
//! through chained `with_*` builder methods rather than a bag of options.

/// Which scheduling algorithm the orchestrator runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// The Wave Scheduler as specified: dynamic, mid-flow mutation allowed.
    Team,
    /// A fixed-level variant: waves are computed once from the initial
    /// topological order: `add_step` decisions are logged and coerced to
    /// `continue` rather than applied.
    Scheduler,
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub enable_quality_gates: bool,
    pub quality_threshold: f32,
    pub max_retry_on_failure: u32,
    pub max_react_iterations: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            enable_quality_gates: true,
            quality_threshold: 0.7,
            max_retry_on_failure: 2,
            max_react_iterations: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub max_concurrent_agents: usize,
    pub max_tool_calls: i64,
    pub agent_timeout_secs: u64,
    pub execution_timeout_secs: u64,
    pub complexity_threshold: f32,
    pub supervisor: SupervisorConfig,
    pub enable_long_text_processing: bool,
    pub enable_team_mode: bool,
    pub event_backlog: usize,
    pub max_tool_call_turns: u32,
    pub reviewer_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_agents: 100,
            max_tool_calls: 200,
            agent_timeout_secs: 300,
            execution_timeout_secs: 3600,
            complexity_threshold: 0.5,
            supervisor: SupervisorConfig::default(),
            enable_long_text_processing: true,
            enable_team_mode: true,
            event_backlog: crate::event::DEFAULT_BACKLOG,
            max_tool_call_turns: 20,
            reviewer_timeout_secs: 30,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_concurrent_agents(mut self, n: usize) -> Self {
        self.max_concurrent_agents = n;
        self
    }

    pub fn with_max_tool_calls(mut self, n: i64) -> Self {
        self.max_tool_calls = n;
        self
    }

    pub fn with_agent_timeout_secs(mut self, secs: u64) -> Self {
        self.agent_timeout_secs = secs;
        self
    }

    pub fn with_execution_timeout_secs(mut self, secs: u64) -> Self {
        self.execution_timeout_secs = secs;
        self
    }

    pub fn with_complexity_threshold(mut self, threshold: f32) -> Self {
        self.complexity_threshold = threshold;
        self
    }

    pub fn with_supervisor(mut self, supervisor: SupervisorConfig) -> Self {
        self.supervisor = supervisor;
        self
    }

    pub fn with_enable_long_text_processing(mut self, enabled: bool) -> Self {
        self.enable_long_text_processing = enabled;
        self
    }

    pub fn with_enable_team_mode(mut self, enabled: bool) -> Self {
        self.enable_team_mode = enabled;
        self
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        if self.enable_team_mode {
            ExecutionMode::Team
        } else {
            ExecutionMode::Scheduler
        }
    }
}

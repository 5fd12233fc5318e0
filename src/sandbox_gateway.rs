//! External collaborator boundaries for the fallback tools (spec.md §4.8,
//! §1 out-of-scope list): the Sandbox Gateway (cloud code execution) and the
//! search/browser fallback tool transport.
//!
//! Both are narrow async traits, the same shape as [`crate::model_gateway::ModelGateway`]:
//! the core only depends on the contract, never a concrete implementation.

use async_trait::async_trait;
use std::error::Error;

/// Cloud code-execution sandbox used by the fallback `sandbox_code_interpreter` tool.
#[async_trait]
pub trait SandboxGateway: Send + Sync {
    /// Execute `code` in `language` and return captured stdout/stderr plus exit status.
    async fn exec(
        &self,
        language: &str,
        code: &str,
    ) -> Result<SandboxExecResult, Box<dyn Error + Send + Sync>>;

    /// Release any sandbox instance resources held by this gateway. Invoked
    /// on task cancellation or orchestrator shutdown.
    async fn release(&self, instance_id: &str) -> Result<(), Box<dyn Error + Send + Sync>>;
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SandboxExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Web search/fetch transport used by the fallback `sandbox_browser` tool.
#[async_trait]
pub trait BrowserGateway: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, Box<dyn Error + Send + Sync>>;

    async fn fetch(&self, url: &str) -> Result<String, Box<dyn Error + Send + Sync>>;
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

//! Fallback tool adapters: `sandbox_browser` and `sandbox_code_interpreter`
//! (spec.md §4.8).
//!
//! These are registered by the Model Gateway Adapter into a Sub-Agent's tool
//! list only when the selected model lacks native search/execute
//! capability; the core does not branch on model identity, it simply
//! injects (or omits) this protocol ahead of a completion call.

use crate::sandbox_gateway::{BrowserGateway, SandboxGateway};
use crate::tool_registry::{ToolMetadata, ToolParameter, ToolParameterType, ToolProtocol, ToolResult};
use async_trait::async_trait;
use std::error::Error;
use std::sync::Arc;

pub struct FallbackToolProtocol {
    browser: Option<Arc<dyn BrowserGateway>>,
    sandbox: Option<Arc<dyn SandboxGateway>>,
}

impl FallbackToolProtocol {
    pub fn new(
        browser: Option<Arc<dyn BrowserGateway>>,
        sandbox: Option<Arc<dyn SandboxGateway>>,
    ) -> Self {
        Self { browser, sandbox }
    }
}

#[async_trait]
impl ToolProtocol for FallbackToolProtocol {
    async fn execute(
        &self,
        tool_name: &str,
        parameters: serde_json::Value,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
        match tool_name {
            "sandbox_browser" => {
                let browser = self
                    .browser
                    .as_ref()
                    .ok_or("sandbox_browser tool has no browser gateway configured")?;
                if let Some(query) = parameters.get("query").and_then(|v| v.as_str()) {
                    let hits = browser.search(query).await?;
                    return Ok(ToolResult::success(serde_json::to_value(hits)?));
                }
                if let Some(url) = parameters.get("url").and_then(|v| v.as_str()) {
                    let body = browser.fetch(url).await?;
                    return Ok(ToolResult::success(serde_json::json!({ "content": body })));
                }
                Ok(ToolResult::failure(
                    "sandbox_browser requires either 'query' or 'url'",
                ))
            }
            "sandbox_code_interpreter" => {
                let sandbox = self
                    .sandbox
                    .as_ref()
                    .ok_or("sandbox_code_interpreter tool has no sandbox gateway configured")?;
                let language = parameters
                    .get("language")
                    .and_then(|v| v.as_str())
                    .unwrap_or("python");
                let code = parameters
                    .get("code")
                    .and_then(|v| v.as_str())
                    .ok_or("sandbox_code_interpreter requires 'code'")?;
                let result = sandbox.exec(language, code).await?;
                Ok(ToolResult::success(serde_json::to_value(result)?))
            }
            other => Err(format!("unknown fallback tool: {}", other).into()),
        }
    }

    async fn list_tools(&self) -> Result<Vec<ToolMetadata>, Box<dyn Error + Send + Sync>> {
        let mut tools = Vec::new();
        if self.browser.is_some() {
            tools.push(
                ToolMetadata::new(
                    "sandbox_browser",
                    "Search the web or fetch a URL's content.",
                )
                .with_parameter(ToolParameter::new("query", ToolParameterType::String))
                .with_parameter(ToolParameter::new("url", ToolParameterType::String)),
            );
        }
        if self.sandbox.is_some() {
            tools.push(
                ToolMetadata::new("sandbox_code_interpreter", "Execute code in a sandbox.")
                    .with_parameter(
                        ToolParameter::new("language", ToolParameterType::String),
                    )
                    .with_parameter(
                        ToolParameter::new("code", ToolParameterType::String).required(),
                    ),
            );
        }
        Ok(tools)
    }

    fn protocol_name(&self) -> &str {
        "fallback"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox_gateway::{SearchHit, SandboxExecResult};

    struct MockBrowser;
    #[async_trait]
    impl BrowserGateway for MockBrowser {
        async fn search(&self, query: &str) -> Result<Vec<SearchHit>, Box<dyn Error + Send + Sync>> {
            Ok(vec![SearchHit {
                title: format!("result for {}", query),
                url: "https://example.com".into(),
                snippet: "snippet".into(),
            }])
        }
        async fn fetch(&self, _url: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
            Ok("page body".into())
        }
    }

    struct MockSandbox;
    #[async_trait]
    impl SandboxGateway for MockSandbox {
        async fn exec(
            &self,
            _language: &str,
            _code: &str,
        ) -> Result<SandboxExecResult, Box<dyn Error + Send + Sync>> {
            Ok(SandboxExecResult {
                stdout: "ok".into(),
                stderr: String::new(),
                exit_code: 0,
            })
        }
        async fn release(&self, _instance_id: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn lists_only_configured_tools() {
        let protocol = FallbackToolProtocol::new(Some(Arc::new(MockBrowser)), None);
        let tools = protocol.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "sandbox_browser");
    }

    #[tokio::test]
    async fn executes_search_and_exec() {
        let protocol = FallbackToolProtocol::new(Some(Arc::new(MockBrowser)), Some(Arc::new(MockSandbox)));
        let search = protocol
            .execute("sandbox_browser", serde_json::json!({"query": "rust"}))
            .await
            .unwrap();
        assert!(search.success);

        let exec = protocol
            .execute(
                "sandbox_code_interpreter",
                serde_json::json!({"language": "python", "code": "print(1)"}),
            )
            .await
            .unwrap();
        assert!(exec.success);
    }

    #[tokio::test]
    async fn missing_gateway_is_an_error() {
        let protocol = FallbackToolProtocol::new(None, None);
        let result = protocol.execute("sandbox_browser", serde_json::Value::Null).await;
        assert!(result.is_err());
    }
}

//! Tool Registry (component C2).
//!
//! Catalog of callable tools — both tools a Sub-Agent's role grants natively
//! and fallback tools the Model Gateway Adapter injects when the selected
//! model cannot call them itself. Dispatches tool invocations named in model
//! output to the matching handler.
//!
//! Grounded closely on `tool_protocol.rs`'s `ToolResult`/`ToolMetadata`/
//! `ToolProtocol`/`ToolRegistry` shapes; MCP resource support (`list_resources`/
//! `read_resource`) is dropped since the MCP client/server surface is not
//! part of this engine's scope.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: serde_json::Value,
    pub error: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ToolResult {
    pub fn success(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
            metadata: HashMap::new(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: serde_json::Value::Null,
            error: Some(error.into()),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ToolParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ToolParameterType,
    pub description: Option<String>,
    pub required: bool,
}

impl ToolParameter {
    pub fn new(name: impl Into<String>, param_type: ToolParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: None,
            required: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Identity and schema for a registered tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

impl ToolMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, param: ToolParameter) -> Self {
        self.parameters.push(param);
        self
    }

    /// Project into the shape the Model Gateway sends with a completion request.
    pub fn to_tool_definition(&self) -> crate::model_gateway::ToolDefinition {
        let properties: serde_json::Map<String, serde_json::Value> = self
            .parameters
            .iter()
            .map(|p| {
                (
                    p.name.clone(),
                    serde_json::json!({
                        "type": p.param_type,
                        "description": p.description,
                    }),
                )
            })
            .collect();
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();
        crate::model_gateway::ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters_schema: serde_json::json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }
}

/// Error types for tool operations.
#[derive(Debug, Clone)]
pub enum ToolError {
    NotFound(String),
    ExecutionFailed(String),
    InvalidParameters(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::NotFound(name) => write!(f, "tool not found: {}", name),
            ToolError::ExecutionFailed(msg) => write!(f, "tool execution failed: {}", msg),
            ToolError::InvalidParameters(msg) => write!(f, "invalid parameters: {}", msg),
        }
    }
}

impl Error for ToolError {}

/// Trait for implementing a tool execution source (e.g. native in-process
/// functions, or a fallback adapter backed by the Sandbox Gateway).
#[async_trait]
pub trait ToolProtocol: Send + Sync {
    async fn execute(
        &self,
        tool_name: &str,
        parameters: serde_json::Value,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>>;

    async fn list_tools(&self) -> Result<Vec<ToolMetadata>, Box<dyn Error + Send + Sync>>;

    fn protocol_name(&self) -> &str;
}

/// A tool bound to the protocol that executes it.
pub struct Tool {
    metadata: ToolMetadata,
    protocol: Arc<dyn ToolProtocol>,
}

impl Tool {
    pub fn new(metadata: ToolMetadata, protocol: Arc<dyn ToolProtocol>) -> Self {
        Self { metadata, protocol }
    }

    pub fn metadata(&self) -> &ToolMetadata {
        &self.metadata
    }

    pub async fn execute(
        &self,
        parameters: serde_json::Value,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
        self.protocol.execute(&self.metadata.name, parameters).await
    }
}

/// Aggregates tools from one or more protocols behind one namespace, with
/// transparent routing by tool name.
pub struct ToolRegistry {
    tools: HashMap<String, Tool>,
    tool_to_protocol: HashMap<String, String>,
    protocols: HashMap<String, Arc<dyn ToolProtocol>>,
}

impl ToolRegistry {
    pub fn empty() -> Self {
        Self {
            tools: HashMap::new(),
            tool_to_protocol: HashMap::new(),
            protocols: HashMap::new(),
        }
    }

    /// Register a protocol and discover its tools. A tool name collision is
    /// resolved in favor of the newly added protocol.
    pub async fn add_protocol(
        &mut self,
        protocol_name: &str,
        protocol: Arc<dyn ToolProtocol>,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let discovered = protocol.list_tools().await?;
        self.protocols
            .insert(protocol_name.to_string(), protocol.clone());
        for metadata in discovered {
            let name = metadata.name.clone();
            self.tools
                .insert(name.clone(), Tool::new(metadata, protocol.clone()));
            self.tool_to_protocol
                .insert(name, protocol_name.to_string());
        }
        Ok(())
    }

    pub fn remove_protocol(&mut self, protocol_name: &str) {
        self.protocols.remove(protocol_name);
        let stale: Vec<String> = self
            .tool_to_protocol
            .iter()
            .filter(|(_, p)| *p == protocol_name)
            .map(|(t, _)| t.clone())
            .collect();
        for name in stale {
            self.tools.remove(&name);
            self.tool_to_protocol.remove(&name);
        }
    }

    pub fn get_tool(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    pub fn list_tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn tool_definitions(&self) -> Vec<crate::model_gateway::ToolDefinition> {
        self.tools
            .values()
            .map(|t| t.metadata().to_tool_definition())
            .collect()
    }

    /// Dispatch a model-requested tool call. `tool_handler_error` (spec.md
    /// §7) is surfaced back to the caller as a `ToolResult::failure` rather
    /// than propagated, so the Sub-Agent can feed it back to the model.
    pub async fn dispatch(&self, name: &str, parameters: serde_json::Value) -> ToolResult {
        match self.tools.get(name) {
            Some(tool) => match tool.execute(parameters).await {
                Ok(result) => result,
                Err(err) => ToolResult::failure(err.to_string()),
            },
            None => ToolResult::failure(ToolError::NotFound(name.to_string()).to_string()),
        }
    }
}

/// An in-process protocol backing manually registered native tools,
/// keyed by name with a synchronous handler closure. Grounded on
/// `tool_protocols.rs`'s `CustomToolProtocol`.
pub struct CustomToolProtocol {
    handlers: RwLock<
        HashMap<
            String,
            (
                ToolMetadata,
                Arc<dyn Fn(serde_json::Value) -> Result<ToolResult, Box<dyn Error + Send + Sync>> + Send + Sync>,
            ),
        >,
    >,
}

impl CustomToolProtocol {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register_tool(
        &self,
        metadata: ToolMetadata,
        handler: Arc<
            dyn Fn(serde_json::Value) -> Result<ToolResult, Box<dyn Error + Send + Sync>>
                + Send
                + Sync,
        >,
    ) {
        let name = metadata.name.clone();
        self.handlers.write().await.insert(name, (metadata, handler));
    }
}

impl Default for CustomToolProtocol {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolProtocol for CustomToolProtocol {
    async fn execute(
        &self,
        tool_name: &str,
        parameters: serde_json::Value,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
        let handlers = self.handlers.read().await;
        match handlers.get(tool_name) {
            Some((_, handler)) => handler(parameters),
            None => Err(Box::new(ToolError::NotFound(tool_name.to_string()))),
        }
    }

    async fn list_tools(&self) -> Result<Vec<ToolMetadata>, Box<dyn Error + Send + Sync>> {
        Ok(self
            .handlers
            .read()
            .await
            .values()
            .map(|(meta, _)| meta.clone())
            .collect())
    }

    fn protocol_name(&self) -> &str {
        "custom"
    }
}

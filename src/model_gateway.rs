//! The Model Gateway boundary (component C1, the adapter half).
//!
//! This is an external collaborator: the core depends only on the
//! [`ModelGateway`] trait and the message shapes below. No concrete vendor
//! client ships in this crate; tests exercise the trait through a local
//! mock, the same way the inherited `cloudllm` tree tests `ClientWrapper`
//! through `MockClient` rather than a live OpenAI/Claude/Gemini client.

use async_trait::async_trait;
use futures_util::stream::Stream;
use std::error::Error;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A tool call the model selected while producing a response.
#[derive(Debug, Clone)]
pub struct NativeToolCall {
    /// Provider-assigned call id, echoed back in the follow-up tool-result message.
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// A tool schema passed alongside a completion request.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// The role of a message in a conversation sent to the gateway.
#[derive(Debug, Clone)]
pub enum Role {
    System,
    User,
    Assistant,
    /// A tool-result message correlating with a prior assistant [`NativeToolCall`].
    Tool { call_id: String },
}

/// Token accounting returned alongside a completion, when the provider exposes it.
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
}

/// A single message in a conversation.
#[derive(Clone)]
pub struct Message {
    pub role: Role,
    /// Stored as `Arc<str>` so conversation histories can be cheaply cloned.
    pub content: Arc<str>,
    pub tool_calls: Vec<NativeToolCall>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<Arc<str>>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }
}

/// An incremental chunk of a streaming completion.
#[derive(Debug, Clone)]
pub struct MessageChunk {
    pub content: String,
    pub finish_reason: Option<String>,
}

pub type MessageChunkStream =
    Pin<Box<dyn Stream<Item = Result<MessageChunk, Box<dyn Error + Send + Sync>>> + Send>>;

pub type MessageStreamFuture<'a> = Pin<
    Box<
        dyn std::future::Future<
                Output = Result<Option<MessageChunkStream>, Box<dyn Error + Send + Sync>>,
            > + Send
            + 'a,
    >,
>;

/// Uniform completion + streaming + tool-calling surface over an external LLM provider.
///
/// Implementations must be `Send + Sync` since they are shared across the
/// concurrently dispatched Sub-Agents of a task.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Request a full request/response completion.
    ///
    /// `tools`, when `Some` and non-empty, are forwarded to the provider's
    /// function-calling API. `cancel` is observed cooperatively: an
    /// implementation should race its transport I/O against
    /// `cancel.cancelled()` and return a cancellation error if it fires
    /// first.
    async fn complete(
        &self,
        messages: &[Message],
        model_id: &str,
        tools: Option<Vec<ToolDefinition>>,
        cancel: &CancellationToken,
    ) -> Result<Message, Box<dyn Error + Send + Sync>>;

    /// Request a streaming completion. Implementations without streaming
    /// support may inherit the default, which resolves to `Ok(None)` — the
    /// caller then falls back to [`ModelGateway::complete`].
    fn complete_streaming<'a>(
        &'a self,
        _messages: &'a [Message],
        _model_id: &'a str,
        _tools: Option<Vec<ToolDefinition>>,
        _cancel: &'a CancellationToken,
    ) -> MessageStreamFuture<'a> {
        Box::pin(async { Ok(None) })
    }

    /// Identifier for the model this gateway instance targets (informational).
    fn model_name(&self) -> &str;

    /// Usage from the most recent completion, if the provider exposes it.
    async fn get_last_usage(&self) -> Option<TokenUsage> {
        None
    }
}

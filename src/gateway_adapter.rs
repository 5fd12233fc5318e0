//! Model Gateway Adapter (component C1, the in-crate half).
//!
//! Wraps a raw [`ModelGateway`] to add a concern every Sub-Agent needs but no
//! individual transport implementation should have to: transparent
//! chunk-and-summarize handling of inputs that exceed the target model's
//! context window. Fallback-tool injection (`sandbox_browser`,
//! `sandbox_code_interpreter`) is handled one layer up by registering
//! [`crate::tools::fallback::FallbackToolProtocol`] into the shared
//! [`crate::tool_registry::ToolRegistry`], so every tool — native or
//! fallback — reaches the model through the same `tools` list without this
//! adapter needing to special-case either.

use crate::model_gateway::{Message, MessageStreamFuture, ModelGateway, Role, ToolDefinition, TokenUsage};
use async_trait::async_trait;
use std::error::Error;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Approximate character budget per chunk, matching the token estimator
/// (`len / 4`) used by [`crate::llm_session::LLMSession`]: a 32k-token
/// target leaves headroom for the system prompt and response.
const DEFAULT_CHUNK_CHARS: usize = 32_000 * 4;

pub struct GatewayAdapter {
    inner: Arc<dyn ModelGateway>,
    chunk_chars: usize,
    long_text_processing: bool,
}

impl GatewayAdapter {
    pub fn new(inner: Arc<dyn ModelGateway>) -> Self {
        Self {
            inner,
            chunk_chars: DEFAULT_CHUNK_CHARS,
            long_text_processing: true,
        }
    }

    pub fn with_chunk_chars(mut self, chunk_chars: usize) -> Self {
        self.chunk_chars = chunk_chars;
        self
    }

    /// Gates chunk-and-summarize handling on `enable_long_text_processing`
    /// (spec.md §6); disabled, oversized messages pass straight through to
    /// the inner gateway unchanged.
    pub fn with_long_text_processing(mut self, enabled: bool) -> Self {
        self.long_text_processing = enabled;
        self
    }

    /// Summarizes `text` in `chunk_chars`-sized windows, folding each
    /// chunk's summary into the next request, and returns one summary short
    /// enough to fit a single message.
    async fn summarize_long_text(
        &self,
        text: &str,
        model_id: &str,
        cancel: &CancellationToken,
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        let mut running_summary = String::new();
        for chunk in text.as_bytes().chunks(self.chunk_chars) {
            let chunk_text = String::from_utf8_lossy(chunk);
            let prompt = if running_summary.is_empty() {
                format!("Summarize the following text, preserving all facts relevant to answering a request about it:\n\n{}", chunk_text)
            } else {
                format!(
                    "Here is a running summary so far:\n{}\n\nExtend it with the facts from this next chunk:\n\n{}",
                    running_summary, chunk_text
                )
            };
            let messages = vec![Message::new(Role::User, prompt)];
            let response = self.inner.complete(&messages, model_id, None, cancel).await?;
            running_summary = response.content.to_string();
        }
        Ok(running_summary)
    }

    async fn compact_oversized_messages(
        &self,
        messages: &[Message],
        model_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Message>, Box<dyn Error + Send + Sync>> {
        let mut compacted = Vec::with_capacity(messages.len());
        for message in messages {
            if message.content.len() > self.chunk_chars {
                let summary = self.summarize_long_text(&message.content, model_id, cancel).await?;
                compacted.push(Message::new(message.role.clone(), summary));
            } else {
                compacted.push(message.clone());
            }
        }
        Ok(compacted)
    }
}

#[async_trait]
impl ModelGateway for GatewayAdapter {
    async fn complete(
        &self,
        messages: &[Message],
        model_id: &str,
        tools: Option<Vec<ToolDefinition>>,
        cancel: &CancellationToken,
    ) -> Result<Message, Box<dyn Error + Send + Sync>> {
        let needs_compaction =
            self.long_text_processing && messages.iter().any(|m| m.content.len() > self.chunk_chars);
        if !needs_compaction {
            return self.inner.complete(messages, model_id, tools, cancel).await;
        }
        let compacted = self.compact_oversized_messages(messages, model_id, cancel).await?;
        self.inner.complete(&compacted, model_id, tools, cancel).await
    }

    fn complete_streaming<'a>(
        &'a self,
        messages: &'a [Message],
        model_id: &'a str,
        tools: Option<Vec<ToolDefinition>>,
        cancel: &'a CancellationToken,
    ) -> MessageStreamFuture<'a> {
        self.inner.complete_streaming(messages, model_id, tools, cancel)
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn get_last_usage(&self) -> Option<TokenUsage> {
        self.inner.get_last_usage().await
    }
}

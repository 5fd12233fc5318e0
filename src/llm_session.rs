//! Per-Sub-Agent conversational session against the Model Gateway.
//!
//! Rewritten from the inherited tree's `llm_session.rs` to use a trait
//! object (`Arc<dyn ModelGateway>`) rather than a generic `LLMSession<T:
//! ClientWrapper>` — the generic form in the inherited file is inconsistent
//! with how `agent.rs` actually constructs a session
//! (`LLMSession::new(client, ..)` where `client: Arc<dyn ClientWrapper>`),
//! so this rewrite follows the trait-object usage pattern rather than the
//! stale generic signature.

use crate::model_gateway::{Message, ModelGateway, Role};
use std::sync::Arc;

/// Maintains a running dialogue history against a token budget, trimming
/// the oldest messages first when the budget is exceeded. Uses the
/// teacher's approximate token estimator (one token per four characters)
/// rather than a real tokenizer dependency.
pub struct LLMSession {
    gateway: Arc<dyn ModelGateway>,
    model_id: String,
    system_prompt: Message,
    history: Vec<Message>,
    max_tokens: usize,
    token_count: usize,
}

fn count_tokens(text: &str) -> usize {
    (text.len() / 4).max(1)
}

fn count_message_tokens(message: &Message) -> usize {
    1 + count_tokens(&message.content)
}

impl LLMSession {
    pub fn new(
        gateway: Arc<dyn ModelGateway>,
        model_id: impl Into<String>,
        system_prompt: String,
        max_tokens: usize,
    ) -> Self {
        let system_prompt = Message::new(Role::System, system_prompt);
        let token_count = count_message_tokens(&system_prompt);
        Self {
            gateway,
            model_id: model_id.into(),
            system_prompt,
            history: Vec::new(),
            max_tokens,
            token_count,
        }
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn token_count(&self) -> usize {
        self.token_count
    }

    pub fn set_system_prompt(&mut self, prompt: String) {
        self.token_count -= count_message_tokens(&self.system_prompt);
        self.system_prompt = Message::new(Role::System, prompt);
        self.token_count += count_message_tokens(&self.system_prompt);
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Push a message onto the history and trim oldest-first until back
    /// under `max_tokens`. Does not itself call the gateway; callers
    /// (the Sub-Agent's turn loop) drive `complete`/`complete_streaming`
    /// directly so they can observe streaming deltas and tool calls.
    pub fn push(&mut self, message: Message) {
        self.token_count += count_message_tokens(&message);
        self.history.push(message);
        self.trim();
    }

    /// The full message list to send on the next turn: system prompt
    /// followed by history.
    pub fn messages_for_turn(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.history.len() + 1);
        messages.push(self.system_prompt.clone());
        messages.extend(self.history.iter().cloned());
        messages
    }

    pub fn gateway(&self) -> &Arc<dyn ModelGateway> {
        &self.gateway
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    fn trim(&mut self) {
        while self.token_count > self.max_tokens && !self.history.is_empty() {
            let removed = self.history.remove(0);
            self.token_count -= count_message_tokens(&removed);
        }
    }

    /// Collapses the oldest half of the history into one summarising
    /// system-role note. Used by `SelfCompressionStrategy`.
    pub fn compress_oldest_half(&mut self) {
        if self.history.len() < 2 {
            return;
        }
        let split = self.history.len() / 2;
        let (oldest, _) = self.history.split_at(split);
        let summary: String = oldest
            .iter()
            .map(|m| m.content.as_ref())
            .collect::<Vec<_>>()
            .join(" ");
        let summary = format!("[earlier context summarised]: {}", summary);
        let summary_message = Message::new(Role::System, summary);

        for message in oldest.iter() {
            self.token_count -= count_message_tokens(message);
        }
        self.token_count += count_message_tokens(&summary_message);

        let mut new_history = vec![summary_message];
        new_history.extend(self.history.drain(split..));
        self.history = new_history;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model_gateway::{MessageChunkStream, MessageStreamFuture, TokenUsage, ToolDefinition};
    use async_trait::async_trait;
    use std::error::Error;
    use tokio_util::sync::CancellationToken;

    /// Trivial mock gateway: echoes the last user message back, in the same
    /// spirit as the inherited tree's `MockClient` in `tests/agent_tests.rs`.
    pub struct EchoGateway;

    #[async_trait]
    impl ModelGateway for EchoGateway {
        async fn complete(
            &self,
            messages: &[Message],
            _model_id: &str,
            _tools: Option<Vec<ToolDefinition>>,
            _cancel: &CancellationToken,
        ) -> Result<Message, Box<dyn Error + Send + Sync>> {
            let last = messages.last().map(|m| m.content.clone()).unwrap_or_else(|| "".into());
            Ok(Message::new(Role::Assistant, last))
        }

        fn model_name(&self) -> &str {
            "echo"
        }

        async fn get_last_usage(&self) -> Option<TokenUsage> {
            None
        }
    }

    fn gateway() -> Arc<dyn ModelGateway> {
        Arc::new(EchoGateway)
    }

    #[test]
    fn new_session_counts_system_prompt_tokens() {
        let session = LLMSession::new(gateway(), "m", "hello".to_string(), 1000);
        assert!(session.token_count() > 0);
        assert!(session.history().is_empty());
    }

    #[test]
    fn push_trims_oldest_messages_once_over_budget() {
        let mut session = LLMSession::new(gateway(), "m", String::new(), 10);
        for i in 0..20 {
            session.push(Message::new(Role::User, format!("message number {}", i)));
        }
        assert!(session.token_count() <= 10);
        // the most recent message must have survived the trim
        assert!(session
            .history()
            .last()
            .unwrap()
            .content
            .contains("message number 19"));
    }

    #[test]
    fn messages_for_turn_prepends_system_prompt() {
        let mut session = LLMSession::new(gateway(), "m", "sys".to_string(), 1000);
        session.push(Message::new(Role::User, "hi"));
        let turn = session.messages_for_turn();
        assert_eq!(turn.len(), 2);
        matches!(turn[0].role, Role::System);
    }

    #[test]
    fn compress_oldest_half_reduces_message_count() {
        let mut session = LLMSession::new(gateway(), "m", String::new(), 10_000);
        for i in 0..10 {
            session.push(Message::new(Role::User, format!("msg {}", i)));
        }
        session.compress_oldest_half();
        assert!(session.history().len() < 10);
    }
}

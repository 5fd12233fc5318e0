//! Pluggable context-window-exhaustion handling for an `LLMSession`
//! (spec.md §4.8's long-text handling, delegated from the Sub-Agent to the
//! Model Gateway Adapter but implemented here as the strategy the adapter
//! selects between).
//!
//! Grounded on `context_strategy.rs`'s `ContextStrategy` trait and
//! `TrimStrategy` implementation.

use async_trait::async_trait;
use crate::llm_session::LLMSession;

#[async_trait]
pub trait ContextStrategy: Send + Sync {
    /// Whether the session's current token usage warrants compaction.
    fn should_compact(&self, session: &LLMSession) -> bool;

    /// Reduce the session's history to fit the configured token budget.
    async fn compact(&self, session: &mut LLMSession);

    fn name(&self) -> &str;
}

/// Drops the oldest messages until the session is back under its ratio of
/// `max_tokens`. This is the default strategy and the only one the
/// `LLMSession` itself performs unconditionally on every turn; registering
/// a `TrimStrategy` on top is a no-op layer kept for interface symmetry with
/// [`SelfCompressionStrategy`].
pub struct TrimStrategy {
    pub threshold: f64,
}

impl TrimStrategy {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl Default for TrimStrategy {
    fn default() -> Self {
        Self::new(0.85)
    }
}

#[async_trait]
impl ContextStrategy for TrimStrategy {
    fn should_compact(&self, session: &LLMSession) -> bool {
        session.token_count() as f64 > session.max_tokens() as f64 * self.threshold
    }

    async fn compact(&self, _session: &mut LLMSession) {
        // LLMSession::push_turn already trims oldest-first on every call;
        // there is nothing further to do here.
    }

    fn name(&self) -> &str {
        "trim"
    }
}

/// Summarises the oldest half of the history into a single system-style
/// note instead of discarding it outright, preserving more context per
/// token than plain trimming at the cost of a summarisation call. The
/// adapter-level counterpart of this compaction policy is
/// `enable_long_text_processing`, gated in
/// [`crate::gateway_adapter::GatewayAdapter`] rather than here.
pub struct SelfCompressionStrategy {
    pub threshold: f64,
}

impl SelfCompressionStrategy {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

#[async_trait]
impl ContextStrategy for SelfCompressionStrategy {
    fn should_compact(&self, session: &LLMSession) -> bool {
        session.token_count() as f64 > session.max_tokens() as f64 * self.threshold
    }

    async fn compact(&self, session: &mut LLMSession) {
        session.compress_oldest_half();
    }

    fn name(&self) -> &str {
        "self_compression"
    }
}

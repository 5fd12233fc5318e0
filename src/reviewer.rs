//! Quality-Gate Reviewer (component C6).
//!
//! Produces a raw [`QualityReport`] from a judge-prompt completion. Per
//! spec.md §4.5, the Reviewer itself does not apply retry-budget coercion,
//! critical-role escalation, or `add_step` validation — that policy lives in
//! the Wave Scheduler, which is the only component allowed to mutate an
//! [`crate::flow::ExecutionFlow`]. A Reviewer timeout is treated by the
//! caller as an implicit `continue`, never surfaced as a step failure.

use crate::model_gateway::{Message, ModelGateway, Role as GatewayRole};
use crate::role::Role;
use crate::step::{Step, StepDraft};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Continue,
    Retry,
    AddStep,
    SkipNext,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QualityReport {
    pub score: f32,
    pub decision: ReviewDecision,
    pub rationale: String,
    #[serde(default)]
    pub new_step: Option<StepDraft>,
}

pub struct Reviewer {
    gateway: Arc<dyn ModelGateway>,
    quality_threshold: f32,
}

impl Reviewer {
    pub fn new(gateway: Arc<dyn ModelGateway>, quality_threshold: f32) -> Self {
        Self {
            gateway,
            quality_threshold,
        }
    }

    /// Judges a completed step's output. `preceding_outputs` gives the judge
    /// prompt the context needed to detect e.g. a fabricated citation a
    /// fact-checker role would otherwise miss in isolation.
    pub async fn review(
        &self,
        step: &Step,
        output: &Value,
        cancel: &CancellationToken,
    ) -> Result<QualityReport, Box<dyn std::error::Error + Send + Sync>> {
        let prompt = format!(
            "Judge this step output against its expected output.\n\
             Role: {}\nDescription: {}\nExpected output: {}\nActual output: {}\n\n\
             Respond with a single JSON object: \
             {{\"score\": 0.0-1.0, \"decision\": \"continue\"|\"retry\"|\"add_step\"|\"skip_next\", \
             \"rationale\": \"...\", \"new_step\": null or {{ordinal, name, description, role, expected_output, depends_on_ordinals}}}}.\n\
             Use \"retry\" when the output is salvageable with another attempt, \"add_step\" when a \
             prerequisite step is missing, \"skip_next\" when downstream steps should be abandoned, \
             and \"continue\" otherwise.",
            step.role.as_str(),
            step.description,
            step.expected_output,
            output,
        );

        let messages = vec![
            Message::new(
                GatewayRole::System,
                Role::QualityChecker.template().default_system_prompt,
            ),
            Message::new(GatewayRole::User, prompt),
        ];

        let response = self.gateway.complete(&messages, "default", None, cancel).await?;
        let report: QualityReport = serde_json::from_str(response.content.as_ref())?;
        Ok(report)
    }

    pub fn passes(&self, report: &QualityReport) -> bool {
        report.score >= self.quality_threshold
    }
}

//! Scientific calculator native tool.
//!
//! Trimmed from the inherited `cloudllm::tools::calculator` adapter: kept
//! the `evalexpr`-backed evaluation core, dropped the degree/radian
//! function-name rewriting layer (out of scope for this engine — any role
//! needing trigonometry can express `evalexpr`'s own `math::` namespace
//! directly).

use crate::tool_registry::{
    CustomToolProtocol, ToolMetadata, ToolParameter, ToolParameterType, ToolResult,
};
use evalexpr::HashMapContext;
use evalexpr::ContextWithMutableVariables;
use std::error::Error;
use std::sync::Arc;

fn evaluate(expression: &str) -> Result<f64, Box<dyn Error + Send + Sync>> {
    let mut context = HashMapContext::new();
    context
        .set_value("pi".to_string(), evalexpr::Value::Float(std::f64::consts::PI))
        .ok();
    context
        .set_value("e".to_string(), evalexpr::Value::Float(std::f64::consts::E))
        .ok();

    let value = evalexpr::eval_with_context(expression, &context)
        .map_err(|e| -> Box<dyn Error + Send + Sync> { format!("{}", e).into() })?;

    match value {
        evalexpr::Value::Float(f) => Ok(f),
        evalexpr::Value::Int(i) => Ok(i as f64),
        other => Err(format!("expression did not evaluate to a number: {:?}", other).into()),
    }
}

/// Build a `CustomToolProtocol` with a single `calculator` tool registered.
pub async fn calculator_protocol() -> Arc<CustomToolProtocol> {
    let protocol = Arc::new(CustomToolProtocol::new());
    protocol
        .register_tool(
            ToolMetadata::new("calculator", "Evaluates a mathematical expression.").with_parameter(
                ToolParameter::new("expression", ToolParameterType::String)
                    .with_description("The expression to evaluate, e.g. '2 + 2 * 3'")
                    .required(),
            ),
            Arc::new(|params| {
                let expression = params
                    .get("expression")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| -> Box<dyn Error + Send + Sync> {
                        "missing required parameter 'expression'".into()
                    })?;
                match evaluate(expression) {
                    Ok(result) => Ok(ToolResult::success(serde_json::json!({ "result": result }))),
                    Err(e) => Ok(ToolResult::failure(e.to_string())),
                }
            }),
        )
        .await;
    protocol
}

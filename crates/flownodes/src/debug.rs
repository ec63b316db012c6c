use crate::action::ActionRequest;
use serde_json::{json, Value};

/// Log action: writes the message and input to the tracing log and passes
/// the input through.
pub(crate) fn perform(request: &ActionRequest) -> Value {
    let message = request
        .config
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("(no message)");

    match request.config.get("level").and_then(Value::as_str) {
        Some("warn") => tracing::warn!(node_id = %request.node_id, input = %request.input, "{}", message),
        Some("debug") => tracing::debug!(node_id = %request.node_id, input = %request.input, "{}", message),
        _ => tracing::info!(node_id = %request.node_id, input = %request.input, "{}", message),
    }

    json!({
        "message": message,
        "input": request.input,
    })
}

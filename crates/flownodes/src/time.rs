use crate::action::ActionRequest;
use crate::error::ProviderError;
use serde_json::Value;
use tokio::time::{sleep, Duration};

/// Longest accepted delay (one hour)
const MAX_DELAY_MS: u64 = 3_600_000;

/// Delay action: sleeps `delay_ms` (default 1000) then passes the input through.
pub(crate) async fn perform(request: &ActionRequest) -> Result<Value, ProviderError> {
    let delay_ms = match request.config.get("delay_ms") {
        None => 1000,
        Some(value) => value.as_u64().ok_or_else(|| {
            ProviderError::Config(format!("delay_ms must be a non-negative integer, got {}", value))
        })?,
    };
    if delay_ms > MAX_DELAY_MS {
        return Err(ProviderError::Config(format!(
            "delay_ms {} exceeds {}",
            delay_ms, MAX_DELAY_MS
        )));
    }

    tracing::debug!("Delaying {} for {}ms", request.node_id, delay_ms);
    sleep(Duration::from_millis(delay_ms)).await;
    Ok(request.input.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(config: Value) -> ActionRequest {
        ActionRequest {
            node_id: "d".into(),
            action_type: "delay".into(),
            config,
            input: json!({"keep": true}),
        }
    }

    #[tokio::test]
    async fn rejects_non_integer_delay() {
        assert!(perform(&request(json!({"delay_ms": "soon"}))).await.is_err());
        assert!(perform(&request(json!({"delay_ms": MAX_DELAY_MS + 1}))).await.is_err());
    }

    #[tokio::test]
    async fn passes_input_through() {
        let out = perform(&request(json!({"delay_ms": 1}))).await.unwrap();
        assert_eq!(out, json!({"keep": true}));
    }
}

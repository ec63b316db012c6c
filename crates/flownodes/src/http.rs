use crate::action::ActionRequest;
use crate::error::ProviderError;
use serde_json::{json, Map, Value};

/// HTTP request action.
///
/// Config: `url` (required), `method` (default `POST` when there is input,
/// `GET` otherwise), `headers` object, `body` (defaults to the input).
pub(crate) async fn perform(
    client: &reqwest::Client,
    request: &ActionRequest,
) -> Result<Value, ProviderError> {
    let config = &request.config;
    let url = config
        .get("url")
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::Config(format!("http action '{}' has no url", request.node_id)))?;

    let default_method = if request.input.is_null() { "GET" } else { "POST" };
    let method = config
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or(default_method)
        .to_uppercase();
    let body = config.get("body").unwrap_or(&request.input);

    tracing::info!("{} {}", method, url);

    let builder = match method.as_str() {
        "GET" => client.get(url),
        "DELETE" => client.delete(url),
        "POST" => client.post(url).json(body),
        "PUT" => client.put(url).json(body),
        "PATCH" => client.patch(url).json(body),
        _ => return Err(ProviderError::Config(format!("Unsupported method: {}", method))),
    };

    let builder = match config.get("headers") {
        Some(Value::Object(headers)) => headers.iter().fold(builder, |req, (key, value)| {
            match value.as_str() {
                Some(v) => req.header(key.as_str(), v),
                None => req,
            }
        }),
        _ => builder,
    };

    let response = builder.send().await?;
    let status = response.status();
    let headers: Map<String, Value> = response
        .headers()
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_str().unwrap_or("").to_string())))
        .collect();
    let text = response.text().await?;

    if !status.is_success() {
        return Err(ProviderError::Status {
            status: status.as_u16(),
            body: text,
        });
    }

    let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
    Ok(json!({
        "status": status.as_u16(),
        "headers": headers,
        "body": body,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_url_is_config_error() {
        let request = ActionRequest {
            node_id: "a".into(),
            action_type: "http".into(),
            config: json!({}),
            input: Value::Null,
        };
        let err = perform(&reqwest::Client::new(), &request).await.unwrap_err();
        assert!(matches!(err, ProviderError::Config(_)));
    }

    #[tokio::test]
    async fn unsupported_method_is_config_error() {
        let request = ActionRequest {
            node_id: "a".into(),
            action_type: "http".into(),
            config: json!({"url": "http://127.0.0.1:9/", "method": "TRACE"}),
            input: Value::Null,
        };
        let err = perform(&reqwest::Client::new(), &request).await.unwrap_err();
        assert!(matches!(err, ProviderError::Config(_)));
    }
}

use crate::error::ProviderError;
use crate::expr::{self, Expr};
use async_trait::async_trait;
use flowcore::{NodeContext, NodeError, NodeExecutor, NodeInput, NodeKind, NodeOutput, NodeSpec};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// What an AI node asks its provider for
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AiRequest {
    pub model: String,
    /// Prompt with `{{path}}` placeholders already rendered
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Upstream data the prompt is about
    pub input: Value,
}

/// Model backend used by [`AiExecutor`]
#[async_trait]
pub trait AiProvider: Send + Sync {
    async fn complete(&self, request: AiRequest) -> Result<Value, ProviderError>;
}

/// Calls a model with the node's prompt and the upstream data
pub struct AiExecutor {
    provider: Arc<dyn AiProvider>,
}

impl AiExecutor {
    pub fn new(provider: Arc<dyn AiProvider>) -> Self {
        Self { provider }
    }
}

fn required<'a>(node: &'a NodeSpec, key: &str) -> Result<&'a str, NodeError> {
    node.config_str(key)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| NodeError::Configuration(format!("ai node '{}' has no {}", node.id, key)))
}

#[async_trait]
impl NodeExecutor for AiExecutor {
    fn kind(&self) -> NodeKind {
        NodeKind::Ai
    }

    fn description(&self) -> &str {
        "Sends the upstream data and a prompt to a language model"
    }

    async fn execute(
        &self,
        node: &NodeSpec,
        input: NodeInput,
        ctx: &NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        let model = required(node, "model")?;
        let prompt = required(node, "prompt")?;
        let temperature = node.config.get("temperature").and_then(Value::as_f64);

        let scope = expr::scope(&input, ctx);
        let request = AiRequest {
            model: model.to_string(),
            prompt: render_template(prompt, &scope),
            temperature,
            input: input.primary(),
        };

        ctx.events.info(format!("Calling model {}", model));
        tracing::debug!("AI node {} attempt {} using {}", node.id, ctx.attempt, model);

        let response = self.provider.complete(request).await?;
        Ok(NodeOutput::new(response))
    }

    fn validate_config(&self, node: &NodeSpec) -> Result<(), NodeError> {
        required(node, "model")?;
        required(node, "prompt")?;
        Ok(())
    }
}

/// Replace every `{{expr}}` with the value of `expr` evaluated against `scope`.
///
/// Strings are inserted as-is, other values as compact JSON. Unresolvable
/// or malformed placeholders render as the empty string.
pub fn render_template(template: &str, scope: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let path = after[..end].trim();
        match Expr::parse(path).and_then(|e| e.evaluate(scope)) {
            Ok(Value::String(s)) => out.push_str(&s),
            Ok(Value::Null) | Err(_) => {}
            Ok(other) => out.push_str(&other.to_string()),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

/// Chat-completions client for any OpenAI-compatible endpoint
pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiProvider {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com/v1";

    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// `OPENAI_BASE_URL` (optional) and `OPENAI_API_KEY`
    pub fn from_env() -> Self {
        let base_url = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| Self::DEFAULT_BASE_URL.to_string());
        Self::new(base_url, std::env::var("OPENAI_API_KEY").ok())
    }

    fn body(request: &AiRequest) -> Value {
        let mut body = json!({
            "model": request.model,
            "messages": [
                { "role": "system", "content": request.prompt },
                { "role": "user", "content": request.input.to_string() },
            ],
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        body
    }
}

/// Pull the first choice out of a chat-completions response.
///
/// Content that parses as a JSON object is returned as that object so
/// conditions can address its fields; anything else comes back as `text`.
pub fn parse_completion(model: &str, response: &Value) -> Result<Value, ProviderError> {
    let content = response
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::Malformed("no choices[0].message.content".to_string()))?;

    match serde_json::from_str::<Value>(content.trim()) {
        Ok(Value::Object(map)) => Ok(Value::Object(map)),
        _ => Ok(json!({ "model": model, "text": content })),
    }
}

#[async_trait]
impl AiProvider for OpenAiProvider {
    async fn complete(&self, request: AiRequest) -> Result<Value, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut call = self.client.post(&url).json(&Self::body(&request));
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }

        let response = call.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let payload: Value = response.json().await?;
        parse_completion(&request.model, &payload)
    }
}

use flowcore::NodeError;
use thiserror::Error;

/// Failure reported by an AI or action provider
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected response status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Unsupported action type: {0}")]
    Unsupported(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<ProviderError> for NodeError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Unsupported(_) | ProviderError::Config(_) => {
                NodeError::Configuration(e.to_string())
            }
            other => NodeError::Provider(other.to_string()),
        }
    }
}

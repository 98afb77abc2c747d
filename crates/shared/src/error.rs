use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::domain::{ModelId, ModelType};

/// Failure body returned by the collaborator. Handlers report either under
/// `error` or under `detail`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub detail: Option<Value>,
}

impl ErrorBody {
    pub fn parse(raw: &[u8]) -> Option<Self> {
        serde_json::from_slice(raw).ok()
    }

    /// `error` wins over `detail`. Non-string details are rendered as compact JSON.
    pub fn message(&self) -> Option<String> {
        self.error
            .as_ref()
            .and_then(render_field)
            .or_else(|| self.detail.as_ref().and_then(render_field))
    }
}

fn render_field(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) if text.trim().is_empty() => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

/// A success response that violates the wire contract.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("supervised model {model_id} did not name its target column")]
    MissingTarget { model_id: ModelId },
    #[error("unsupervised model {model_id} unexpectedly names target column {target}")]
    UnexpectedTarget { model_id: ModelId, target: String },
    #[error("prediction response carries both predictions and anomaly scores")]
    AmbiguousInference,
    #[error("prediction response for a {expected} model is missing `{field}`")]
    MissingInference {
        expected: ModelType,
        field: &'static str,
    },
}

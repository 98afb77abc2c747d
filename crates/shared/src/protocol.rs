use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    domain::{
        AnalysisResult, DatasetSummary, InferenceResult, ModelDescriptor, ModelId, ModelKind,
        ModelType, PredictedLabel, ReferenceId,
    },
    error::ProtocolError,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub summary: DatasetSummary,
    #[serde(default)]
    pub target_detected: Option<String>,
    pub saved_path: String,
}

impl From<AnalyzeResponse> for AnalysisResult {
    fn from(value: AnalyzeResponse) -> Self {
        Self {
            summary: value.summary,
            detected_target: value.target_detected,
            reference: ReferenceId(value.saved_path),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainResponse {
    pub model_id: String,
    #[serde(rename = "type")]
    pub model_type: ModelType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl TryFrom<TrainResponse> for ModelDescriptor {
    type Error = ProtocolError;

    fn try_from(value: TrainResponse) -> Result<Self, Self::Error> {
        let id = ModelId(value.model_id);
        let kind = match (value.model_type, value.target) {
            (ModelType::Supervised, Some(target)) => ModelKind::Supervised { target },
            (ModelType::Supervised, None) => {
                return Err(ProtocolError::MissingTarget { model_id: id })
            }
            (ModelType::Unsupervised, None) => ModelKind::Unsupervised,
            (ModelType::Unsupervised, Some(target)) => {
                return Err(ProtocolError::UnexpectedTarget {
                    model_id: id,
                    target,
                })
            }
        };
        Ok(Self { id, kind })
    }
}

/// History point exactly as the collaborator sent it. Fields stay loosely
/// typed so that malformed points surface as validation errors downstream
/// instead of failing the whole response decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawHistoryRecord {
    pub timestamp: Value,
    pub value: Value,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predictions: Option<Vec<PredictedLabel>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anomaly_score: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<RawHistoryRecord>>,
}

impl PredictResponse {
    /// Resolves the field-presence shape into the variant fixed by the model type.
    pub fn into_inference(
        self,
        expected: ModelType,
    ) -> Result<(InferenceResult, Option<Vec<RawHistoryRecord>>), ProtocolError> {
        let result = match (expected, self.predictions, self.anomaly_score) {
            (_, Some(_), Some(_)) => return Err(ProtocolError::AmbiguousInference),
            (ModelType::Supervised, Some(predictions), None) => {
                InferenceResult::Supervised { predictions }
            }
            (ModelType::Unsupervised, None, Some(anomaly_scores)) => {
                InferenceResult::Unsupervised { anomaly_scores }
            }
            (ModelType::Supervised, None, _) => {
                return Err(ProtocolError::MissingInference {
                    expected,
                    field: "predictions",
                })
            }
            (ModelType::Unsupervised, _, None) => {
                return Err(ProtocolError::MissingInference {
                    expected,
                    field: "anomaly_score",
                })
            }
        };
        Ok((result, self.history))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub history: Vec<RawHistoryRecord>,
}

use std::{collections::BTreeMap, fmt};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_newtype!(ModelId);
// Server-side handle to an uploaded dataset; only valid until the next successful upload.
id_newtype!(ReferenceId);

/// Data-quality profile computed by the collaborator for an uploaded dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSummary {
    /// `(rows, columns)`.
    pub shape: (u64, u64),
    pub missing: BTreeMap<String, u64>,
    pub duplicates: u64,
    #[serde(default)]
    pub outliers: BTreeMap<String, u64>,
    #[serde(rename = "head", default)]
    pub preview: Vec<Map<String, Value>>,
}

impl DatasetSummary {
    pub fn rows(&self) -> u64 {
        self.shape.0
    }

    pub fn columns(&self) -> u64 {
        self.shape.1
    }

    pub fn columns_with_missing(&self) -> impl Iterator<Item = (&str, u64)> {
        self.missing
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(column, count)| (column.as_str(), *count))
    }

    pub fn is_complete(&self) -> bool {
        self.missing.values().all(|count| *count == 0)
    }

    pub fn total_outliers(&self) -> u64 {
        self.outliers.values().sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    pub summary: DatasetSummary,
    pub detected_target: Option<String>,
    pub reference: ReferenceId,
}

impl AnalysisResult {
    /// The only model kind a training run on this dataset may produce.
    pub fn expected_model_kind(&self) -> ModelKind {
        match &self.detected_target {
            Some(target) => ModelKind::Supervised {
                target: target.clone(),
            },
            None => ModelKind::Unsupervised,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    Supervised,
    Unsupervised,
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelType::Supervised => f.write_str("supervised"),
            ModelType::Unsupervised => f.write_str("unsupervised"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelKind {
    Supervised { target: String },
    Unsupervised,
}

impl ModelKind {
    pub fn model_type(&self) -> ModelType {
        match self {
            ModelKind::Supervised { .. } => ModelType::Supervised,
            ModelKind::Unsupervised => ModelType::Unsupervised,
        }
    }

    pub fn target(&self) -> Option<&str> {
        match self {
            ModelKind::Supervised { target } => Some(target),
            ModelKind::Unsupervised => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDescriptor {
    pub id: ModelId,
    pub kind: ModelKind,
}

impl ModelDescriptor {
    pub fn model_type(&self) -> ModelType {
        self.kind.model_type()
    }
}

/// One predicted label as returned by a supervised model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredictedLabel {
    Integer(i64),
    Number(f64),
    Flag(bool),
    Text(String),
}

impl fmt::Display for PredictedLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredictedLabel::Integer(value) => write!(f, "{value}"),
            PredictedLabel::Number(value) => write!(f, "{value}"),
            PredictedLabel::Flag(value) => write!(f, "{value}"),
            PredictedLabel::Text(value) => f.write_str(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InferenceResult {
    Supervised { predictions: Vec<PredictedLabel> },
    Unsupervised { anomaly_scores: Vec<f64> },
}

impl InferenceResult {
    pub fn model_type(&self) -> ModelType {
        match self {
            InferenceResult::Supervised { .. } => ModelType::Supervised,
            InferenceResult::Unsupervised { .. } => ModelType::Unsupervised,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            InferenceResult::Supervised { predictions } => predictions.len(),
            InferenceResult::Unsupervised { anomaly_scores } => anomaly_scores.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Display strings for at most `limit` leading rows. Scores keep four decimals.
    pub fn preview(&self, limit: usize) -> Vec<String> {
        match self {
            InferenceResult::Supervised { predictions } => predictions
                .iter()
                .take(limit)
                .map(ToString::to_string)
                .collect(),
            InferenceResult::Unsupervised { anomaly_scores } => anomaly_scores
                .iter()
                .take(limit)
                .map(|score| format!("{score:.4}"))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum HistoryKind {
    #[default]
    Prediction,
    AnomalyScore,
}

impl HistoryKind {
    /// Anything other than `anomaly_score` is charted as a prediction.
    pub fn from_wire(raw: Option<&str>) -> Self {
        match raw {
            Some("anomaly_score") => HistoryKind::AnomalyScore,
            _ => HistoryKind::Prediction,
        }
    }

    pub fn series_label(self) -> &'static str {
        match self {
            HistoryKind::Prediction => "Prediction Value",
            HistoryKind::AnomalyScore => "Anomaly Score",
        }
    }
}

/// A validated history point.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    pub timestamp: NaiveDateTime,
    pub value: f64,
    pub kind: HistoryKind,
}

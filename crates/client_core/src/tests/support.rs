//! Fixtures shared by the controller and session tests.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Mutex,
};

use async_trait::async_trait;
use serde_json::Value;
use shared::{
    domain::{
        AnalysisResult, DatasetSummary, InferenceResult, ModelDescriptor, ModelId, ModelKind,
        PredictedLabel, ReferenceId,
    },
    protocol::RawHistoryRecord,
};
use tokio::sync::oneshot;

use crate::{
    error::GatewayError,
    gateway::{DatasetFile, Prediction, RemoteGateway},
};

pub(crate) const DATA_REFERENCE: &str = "uploads/data.csv";
pub(crate) const SENSOR_REFERENCE: &str = "uploads/sensor.csv";

pub(crate) fn csv(name: &str) -> DatasetFile {
    DatasetFile::new(name, b"age,income,label\n31,5400,1\n".to_vec())
}

pub(crate) fn summary(rows: u64, columns: u64) -> DatasetSummary {
    DatasetSummary {
        shape: (rows, columns),
        missing: BTreeMap::from([("age".to_string(), 2), ("income".to_string(), 0)]),
        duplicates: 1,
        outliers: BTreeMap::new(),
        preview: Vec::new(),
    }
}

pub(crate) fn analysis(target: Option<&str>, reference: &str) -> AnalysisResult {
    AnalysisResult {
        summary: summary(120, 3),
        detected_target: target.map(str::to_string),
        reference: ReferenceId(reference.to_string()),
    }
}

pub(crate) fn supervised_model(id: &str, target: &str) -> ModelDescriptor {
    ModelDescriptor {
        id: ModelId(id.to_string()),
        kind: ModelKind::Supervised {
            target: target.to_string(),
        },
    }
}

pub(crate) fn unsupervised_model(id: &str) -> ModelDescriptor {
    ModelDescriptor {
        id: ModelId(id.to_string()),
        kind: ModelKind::Unsupervised,
    }
}

pub(crate) fn raw_record(timestamp: &str, value: f64, kind: &str) -> RawHistoryRecord {
    RawHistoryRecord {
        timestamp: Value::from(timestamp),
        value: Value::from(value),
        kind: Some(kind.to_string()),
    }
}

pub(crate) fn labels(values: &[i64]) -> InferenceResult {
    InferenceResult::Supervised {
        predictions: values.iter().copied().map(PredictedLabel::Integer).collect(),
    }
}

pub(crate) fn scores(values: &[f64]) -> InferenceResult {
    InferenceResult::Unsupervised {
        anomaly_scores: values.to_vec(),
    }
}

pub(crate) fn remote_error(status: u16, message: &str) -> GatewayError {
    GatewayError::Remote {
        status,
        message: message.to_string(),
    }
}

struct Hold {
    started: oneshot::Sender<()>,
    release: oneshot::Receiver<()>,
}

/// In-memory collaborator with canned answers keyed by file name, dataset
/// reference or model id. Any call can be parked with [`ScriptedGateway::hold`].
#[derive(Default)]
pub(crate) struct ScriptedGateway {
    analyses: HashMap<String, Result<AnalysisResult, GatewayError>>,
    models: HashMap<String, Result<ModelDescriptor, GatewayError>>,
    predictions: HashMap<String, Result<Prediction, GatewayError>>,
    histories: HashMap<String, Result<Vec<RawHistoryRecord>, GatewayError>>,
    holds: Mutex<HashMap<&'static str, Hold>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedGateway {
    /// `data.csv` trains a supervised model on `label`, `sensor.csv` an
    /// isolation model. Both models have a history.
    pub(crate) fn standard() -> Self {
        Self::default()
            .with_analysis("data.csv", Ok(analysis(Some("label"), DATA_REFERENCE)))
            .with_analysis("sensor.csv", Ok(analysis(None, SENSOR_REFERENCE)))
            .with_model(DATA_REFERENCE, Ok(supervised_model("m-sup", "label")))
            .with_model(SENSOR_REFERENCE, Ok(unsupervised_model("m-iso")))
            .with_prediction(
                "m-sup",
                Ok(Prediction {
                    result: labels(&[1, 0, 1]),
                    history: Some(vec![
                        raw_record("2024-03-02T08:00:00", 1.0, "prediction"),
                        raw_record("2024-03-01T08:00:00", 0.0, "prediction"),
                        raw_record("2024-03-03T08:00:00", 1.0, "prediction"),
                    ]),
                }),
            )
            .with_prediction(
                "m-iso",
                Ok(Prediction {
                    result: scores(&[0.12, 0.87]),
                    history: None,
                }),
            )
            .with_history(
                "m-sup",
                Ok(vec![raw_record("2024-03-01T08:00:00", 0.0, "prediction")]),
            )
            .with_history(
                "m-iso",
                Ok(vec![
                    raw_record("2024-03-01T10:00:00", 0.31, "anomaly_score"),
                    raw_record("2024-03-01T09:00:00", 0.12, "anomaly_score"),
                ]),
            )
    }

    pub(crate) fn with_analysis(
        mut self,
        file_name: &str,
        result: Result<AnalysisResult, GatewayError>,
    ) -> Self {
        self.analyses.insert(file_name.to_string(), result);
        self
    }

    pub(crate) fn with_model(
        mut self,
        reference: &str,
        result: Result<ModelDescriptor, GatewayError>,
    ) -> Self {
        self.models.insert(reference.to_string(), result);
        self
    }

    pub(crate) fn with_prediction(
        mut self,
        model_id: &str,
        result: Result<Prediction, GatewayError>,
    ) -> Self {
        self.predictions.insert(model_id.to_string(), result);
        self
    }

    pub(crate) fn with_history(
        mut self,
        model_id: &str,
        result: Result<Vec<RawHistoryRecord>, GatewayError>,
    ) -> Self {
        self.histories.insert(model_id.to_string(), result);
        self
    }

    /// Parks the next `operation` call. The first receiver fires once the call
    /// has been issued; dropping or sending on the sender lets it finish.
    pub(crate) fn hold(
        &self,
        operation: &'static str,
    ) -> (oneshot::Receiver<()>, oneshot::Sender<()>) {
        let (started_tx, started_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        self.holds.lock().unwrap().insert(
            operation,
            Hold {
                started: started_tx,
                release: release_rx,
            },
        );
        (started_rx, release_tx)
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    async fn enter(&self, operation: &'static str, detail: &str) {
        self.calls.lock().unwrap().push(format!("{operation} {detail}"));
        let hold = self.holds.lock().unwrap().remove(operation);
        if let Some(hold) = hold {
            let _ = hold.started.send(());
            let _ = hold.release.await;
        }
    }
}

fn scripted<T: Clone>(
    answers: &HashMap<String, Result<T, GatewayError>>,
    key: &str,
) -> Result<T, GatewayError> {
    answers
        .get(key)
        .cloned()
        .unwrap_or_else(|| Err(remote_error(404, &format!("nothing scripted for {key}"))))
}

#[async_trait]
impl RemoteGateway for ScriptedGateway {
    async fn analyze(&self, file: DatasetFile) -> Result<AnalysisResult, GatewayError> {
        self.enter("analyze", file.file_name()).await;
        scripted(&self.analyses, file.file_name())
    }

    async fn train(&self, reference: &ReferenceId) -> Result<ModelDescriptor, GatewayError> {
        self.enter("train", reference.as_str()).await;
        scripted(&self.models, reference.as_str())
    }

    async fn predict(
        &self,
        model: &ModelDescriptor,
        file: DatasetFile,
    ) -> Result<Prediction, GatewayError> {
        self.enter("predict", &format!("{} {}", model.id, file.file_name()))
            .await;
        scripted(&self.predictions, model.id.as_str())
    }

    async fn fetch_history(
        &self,
        model_id: &ModelId,
    ) -> Result<Vec<RawHistoryRecord>, GatewayError> {
        self.enter("history", model_id.as_str()).await;
        scripted(&self.histories, model_id.as_str())
    }

    async fn fetch_example(&self) -> Result<Vec<u8>, GatewayError> {
        self.enter("example", "").await;
        Ok(b"age,income,label\n".to_vec())
    }

    async fn fetch_report(&self, reference: &ReferenceId) -> Result<String, GatewayError> {
        self.enter("report", reference.as_str()).await;
        Ok(format!("<html><body>report for {reference}</body></html>"))
    }
}

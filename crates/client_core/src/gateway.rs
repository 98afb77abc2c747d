//! Request/response client for the analysis backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    multipart::{Form, Part},
    Client, RequestBuilder, Response, StatusCode,
};
use serde::de::DeserializeOwned;
use shared::{
    domain::{AnalysisResult, InferenceResult, ModelDescriptor, ModelId, ReferenceId},
    error::ErrorBody,
    protocol::{AnalyzeResponse, HistoryResponse, PredictResponse, RawHistoryRecord, TrainResponse},
};
use tracing::debug;
use url::Url;

use crate::error::{GatewayError, TransitionError};

const CSV_MIME: &str = "text/csv";

/// A tabular dataset selected by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetFile {
    file_name: String,
    bytes: Vec<u8>,
}

impl DatasetFile {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Only non-empty `.csv` files are submitted.
    pub fn validate(&self) -> Result<(), TransitionError> {
        if !self.file_name.to_ascii_lowercase().ends_with(".csv") {
            return Err(TransitionError::InvalidFile(format!(
                "{} is not a CSV file",
                self.file_name
            )));
        }
        if self.is_empty() {
            return Err(TransitionError::InvalidFile(format!(
                "{} is empty",
                self.file_name
            )));
        }
        Ok(())
    }

    fn into_part(self) -> Result<Part, GatewayError> {
        Part::bytes(self.bytes)
            .file_name(self.file_name)
            .mime_str(CSV_MIME)
            .map_err(|err| GatewayError::Transport(err.to_string()))
    }
}

/// Result of a predict call. The history, when present, is the model's
/// refreshed stream including the prediction just made.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub result: InferenceResult,
    pub history: Option<Vec<RawHistoryRecord>>,
}

#[async_trait]
pub trait RemoteGateway: Send + Sync {
    async fn analyze(&self, file: DatasetFile) -> Result<AnalysisResult, GatewayError>;
    async fn train(&self, reference: &ReferenceId) -> Result<ModelDescriptor, GatewayError>;
    /// The descriptor fixes which inference variant the response must carry.
    async fn predict(
        &self,
        model: &ModelDescriptor,
        file: DatasetFile,
    ) -> Result<Prediction, GatewayError>;
    async fn fetch_history(&self, model_id: &ModelId)
        -> Result<Vec<RawHistoryRecord>, GatewayError>;
    async fn fetch_example(&self) -> Result<Vec<u8>, GatewayError>;
    /// HTML data-quality report for an uploaded dataset.
    async fn fetch_report(&self, reference: &ReferenceId) -> Result<String, GatewayError>;
}

pub struct HttpGateway {
    http: Client,
    base_url: Url,
}

impl HttpGateway {
    pub fn new(base_url: &str) -> Result<Self, GatewayError> {
        Self::with_client(base_url, Client::new())
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| GatewayError::Transport(err.to_string()))?;
        Self::with_client(base_url, http)
    }

    pub fn with_client(base_url: &str, http: Client) -> Result<Self, GatewayError> {
        let base_url = Url::parse(base_url.trim())
            .map_err(|err| GatewayError::Transport(format!("invalid base url {base_url}: {err}")))?;
        if base_url.cannot_be_a_base() {
            return Err(GatewayError::Transport(format!(
                "base url {base_url} cannot carry a path"
            )));
        }
        Ok(Self { http, base_url })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn send(
        &self,
        request: RequestBuilder,
        fallback: &'static str,
    ) -> Result<Response, GatewayError> {
        let response = request.send().await.map_err(|err| {
            let text = err.to_string();
            GatewayError::Transport(if text.is_empty() {
                fallback.to_string()
            } else {
                text
            })
        })?;

        let status = response.status();
        debug!(url = %response.url(), status = status.as_u16(), "collaborator responded");
        if status.is_success() {
            return Ok(response);
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(err) => {
                debug!(status = status.as_u16(), error = %err, "failed to read error body");
                Default::default()
            }
        };
        let message = ErrorBody::parse(&body)
            .and_then(|body| body.message())
            .unwrap_or_else(|| status_message(status));
        Err(GatewayError::Remote {
            status: status.as_u16(),
            message,
        })
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, GatewayError> {
        let body = response
            .bytes()
            .await
            .map_err(|err| GatewayError::Transport(err.to_string()))?;
        serde_json::from_slice(&body).map_err(|err| GatewayError::Malformed(err.to_string()))
    }
}

fn status_message(status: StatusCode) -> String {
    format!("Request failed with status code {}", status.as_u16())
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn analyze(&self, file: DatasetFile) -> Result<AnalysisResult, GatewayError> {
        let form = Form::new().part("file", file.into_part()?);
        let request = self.http.post(self.endpoint(&["analyze"])).multipart(form);
        let response = self.send(request, "Failed to analyze file").await?;
        let body: AnalyzeResponse = Self::read_json(response).await?;
        Ok(body.into())
    }

    async fn train(&self, reference: &ReferenceId) -> Result<ModelDescriptor, GatewayError> {
        let form = Form::new().text("saved_path", reference.0.clone());
        let request = self.http.post(self.endpoint(&["train"])).multipart(form);
        let response = self.send(request, "Failed to train model").await?;
        let body: TrainResponse = Self::read_json(response).await?;
        Ok(ModelDescriptor::try_from(body)?)
    }

    async fn predict(
        &self,
        model: &ModelDescriptor,
        file: DatasetFile,
    ) -> Result<Prediction, GatewayError> {
        let form = Form::new()
            .text("model_id", model.id.0.clone())
            .part("data", file.into_part()?);
        let request = self.http.post(self.endpoint(&["predict"])).multipart(form);
        let response = self.send(request, "Failed to make predictions").await?;
        let body: PredictResponse = Self::read_json(response).await?;
        let (result, history) = body.into_inference(model.model_type())?;
        Ok(Prediction { result, history })
    }

    async fn fetch_history(
        &self,
        model_id: &ModelId,
    ) -> Result<Vec<RawHistoryRecord>, GatewayError> {
        let request = self
            .http
            .get(self.endpoint(&["predictions", "history", model_id.as_str()]));
        let response = self
            .send(request, "Failed to get prediction history")
            .await?;
        let body: HistoryResponse = Self::read_json(response).await?;
        Ok(body.history)
    }

    async fn fetch_example(&self) -> Result<Vec<u8>, GatewayError> {
        let request = self.http.get(self.endpoint(&["example"]));
        let response = self.send(request, "Failed to download example").await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|err| GatewayError::Transport(err.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn fetch_report(&self, reference: &ReferenceId) -> Result<String, GatewayError> {
        let request = self
            .http
            .get(self.endpoint(&["report"]))
            .query(&[("path", reference.as_str())]);
        let response = self.send(request, "Failed to get report").await?;
        response
            .text()
            .await
            .map_err(|err| GatewayError::Transport(err.to_string()))
    }
}

#[cfg(test)]
#[path = "tests/gateway_tests.rs"]
mod tests;

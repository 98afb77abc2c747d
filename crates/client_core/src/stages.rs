//! Per-stage operation contracts.
//!
//! Each stage owns a slot carrying its generation counter, the generation of
//! its in-flight operation (if any), and its last error. A request issued by
//! the controller carries a [`StageTicket`]; its completion is only applied
//! while that ticket is still the stage's in-flight generation.

use std::fmt;

use shared::{
    domain::{AnalysisResult, ModelDescriptor, ModelId, ReferenceId},
    protocol::RawHistoryRecord,
};
use tracing::{debug, info, warn};

use crate::{
    error::{GatewayError, StageError, TransitionError},
    gateway::{DatasetFile, Prediction, RemoteGateway},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Upload,
    Training,
    Prediction,
    History,
}

impl StageKind {
    pub(crate) fn fallback_message(self) -> &'static str {
        match self {
            StageKind::Upload => "Failed to analyze file",
            StageKind::Training => "Failed to train model",
            StageKind::Prediction => "Failed to make predictions",
            StageKind::History => "Failed to get prediction history",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageKind::Upload => f.write_str("upload"),
            StageKind::Training => f.write_str("training"),
            StageKind::Prediction => f.write_str("prediction"),
            StageKind::History => f.write_str("history"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTicket {
    stage: StageKind,
    generation: u64,
}

#[derive(Debug)]
pub struct Stage {
    kind: StageKind,
    generation: u64,
    in_flight: Option<u64>,
    error: Option<StageError>,
}

impl Stage {
    pub fn new(kind: StageKind) -> Self {
        Self {
            kind,
            generation: 0,
            in_flight: None,
            error: None,
        }
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn error(&self) -> Option<&StageError> {
        self.error.as_ref()
    }

    pub(crate) fn ensure_idle(&self) -> Result<(), TransitionError> {
        if self.is_in_flight() {
            return Err(TransitionError::StageBusy(self.kind));
        }
        Ok(())
    }

    /// Issues a fresh generation token. Clears the previous error.
    pub(crate) fn begin(&mut self) -> Result<StageTicket, TransitionError> {
        self.ensure_idle()?;
        Ok(self.restart())
    }

    /// Like [`Stage::begin`], but supersedes an operation already in flight.
    pub(crate) fn restart(&mut self) -> StageTicket {
        self.invalidate();
        self.generation += 1;
        self.in_flight = Some(self.generation);
        self.error = None;
        StageTicket {
            stage: self.kind,
            generation: self.generation,
        }
    }

    /// Returns `false` for a superseded ticket, which must then be discarded.
    pub(crate) fn complete(&mut self, ticket: StageTicket) -> bool {
        if ticket.stage != self.kind || self.in_flight != Some(ticket.generation) {
            debug!(
                stage = %self.kind,
                generation = ticket.generation,
                current = ?self.in_flight,
                "discarding stale completion"
            );
            return false;
        }
        self.in_flight = None;
        true
    }

    /// Supersedes the in-flight operation without cancelling it.
    pub(crate) fn invalidate(&mut self) {
        if let Some(generation) = self.in_flight.take() {
            debug!(stage = %self.kind, generation, "superseding in-flight operation");
        }
    }

    pub(crate) fn fail(&mut self, err: StageError) {
        warn!(stage = %self.kind, category = %err.category(), "{}", err.message());
        self.error = Some(err);
    }

    pub(crate) fn reset(&mut self) {
        self.invalidate();
        self.error = None;
    }
}

/// Outcome of an operation once applied to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Applied,
    Failed(StageError),
    /// A newer transition superseded this operation; its result was dropped.
    Stale,
}

#[derive(Debug)]
pub struct Completion<T> {
    pub ticket: StageTicket,
    pub outcome: Result<T, GatewayError>,
}

#[derive(Debug)]
pub struct UploadRequest {
    pub ticket: StageTicket,
    pub file: DatasetFile,
}

impl UploadRequest {
    pub async fn execute<G>(self, gateway: &G) -> Completion<AnalysisResult>
    where
        G: RemoteGateway + ?Sized,
    {
        let file_name = self.file.file_name().to_string();
        info!(file = %file_name, bytes = self.file.len(), "analyzing dataset");
        let outcome = gateway.analyze(self.file).await;
        if let Ok(analysis) = &outcome {
            info!(
                file = %file_name,
                rows = analysis.summary.rows(),
                columns = analysis.summary.columns(),
                target = ?analysis.detected_target,
                "dataset analyzed"
            );
        }
        Completion {
            ticket: self.ticket,
            outcome,
        }
    }
}

#[derive(Debug)]
pub struct TrainRequest {
    pub ticket: StageTicket,
    pub reference: ReferenceId,
}

impl TrainRequest {
    pub async fn execute<G>(self, gateway: &G) -> Completion<ModelDescriptor>
    where
        G: RemoteGateway + ?Sized,
    {
        info!(reference = %self.reference, "training model");
        let outcome = gateway.train(&self.reference).await;
        if let Ok(model) = &outcome {
            info!(model_id = %model.id, model_type = %model.model_type(), "model trained");
        }
        Completion {
            ticket: self.ticket,
            outcome,
        }
    }
}

#[derive(Debug)]
pub struct PredictRequest {
    pub ticket: StageTicket,
    pub model: ModelDescriptor,
    pub file: DatasetFile,
}

impl PredictRequest {
    pub async fn execute<G>(self, gateway: &G) -> Completion<Prediction>
    where
        G: RemoteGateway + ?Sized,
    {
        info!(model_id = %self.model.id, file = %self.file.file_name(), "running inference");
        let outcome = gateway.predict(&self.model, self.file).await;
        if let Ok(prediction) = &outcome {
            info!(
                model_id = %self.model.id,
                rows = prediction.result.len(),
                history = prediction.history.as_ref().map(Vec::len),
                "inference finished"
            );
        }
        Completion {
            ticket: self.ticket,
            outcome,
        }
    }
}

#[derive(Debug)]
pub struct HistoryRequest {
    pub ticket: StageTicket,
    pub model_id: ModelId,
}

impl HistoryRequest {
    pub async fn execute<G>(self, gateway: &G) -> Completion<Vec<RawHistoryRecord>>
    where
        G: RemoteGateway + ?Sized,
    {
        debug!(model_id = %self.model_id, "fetching prediction history");
        let outcome = gateway.fetch_history(&self.model_id).await;
        Completion {
            ticket: self.ticket,
            outcome,
        }
    }
}

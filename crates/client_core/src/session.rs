//! Async driver around [`WorkflowController`].
//!
//! The controller lock is only held for the synchronous begin/apply steps,
//! never across a gateway call, so operations of different stages may be
//! outstanding at the same time. Ordering problems between them are resolved
//! by the controller's generation tickets.

use std::sync::Arc;

use shared::domain::{DatasetSummary, ReferenceId};
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use crate::{
    error::{GatewayError, ReportError, StageError, TransitionError},
    gateway::{DatasetFile, RemoteGateway},
    history::ChartSeries,
    stages::{HistoryRequest, StageKind, StepOutcome},
    workflow::{WorkflowController, WorkflowPhase, WorkflowSnapshot},
};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    PhaseChanged(WorkflowPhase),
    StageFailed(StageError),
    ChartUpdated(ChartSeries),
    CompletionDiscarded(StageKind),
}

struct Observation {
    phase: WorkflowPhase,
    chart: Option<ChartSeries>,
}

impl Observation {
    fn of(controller: &WorkflowController) -> Self {
        Self {
            phase: controller.phase(),
            chart: controller.state().chart().cloned(),
        }
    }
}

pub struct WorkflowSession<G: RemoteGateway + ?Sized> {
    gateway: Arc<G>,
    controller: Mutex<WorkflowController>,
    events: broadcast::Sender<WorkflowEvent>,
}

impl<G: RemoteGateway + ?Sized> WorkflowSession<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            gateway,
            controller: Mutex::new(WorkflowController::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> WorkflowSnapshot {
        self.controller.lock().await.snapshot()
    }

    pub async fn phase(&self) -> WorkflowPhase {
        self.controller.lock().await.phase()
    }

    pub async fn summary(&self) -> Option<DatasetSummary> {
        let controller = self.controller.lock().await;
        controller
            .state()
            .analysis()
            .map(|analysis| analysis.summary.clone())
    }

    pub async fn upload(&self, file: DatasetFile) -> Result<StepOutcome, TransitionError> {
        let request = self
            .transition(|controller| controller.begin_upload(file))
            .await?;
        let completion = request.execute(self.gateway.as_ref()).await;

        let (outcome, history) = {
            let mut controller = self.controller.lock().await;
            let before = Observation::of(&controller);
            let (outcome, history) = controller.apply_upload(completion);
            self.publish(StageKind::Upload, &before, &controller, &outcome);
            (outcome, history)
        };

        // A failed upload restores the previous model, whose chart is reloaded.
        if let Some(request) = history {
            self.refresh_history(request).await;
        }
        Ok(outcome)
    }

    /// Trains on the current analysis, then loads the new model's history.
    /// The returned outcome is the training outcome; a history failure only
    /// degrades the chart.
    pub async fn train(&self) -> Result<StepOutcome, TransitionError> {
        let request = self.transition(WorkflowController::begin_training).await?;
        let completion = request.execute(self.gateway.as_ref()).await;

        let (outcome, history) = {
            let mut controller = self.controller.lock().await;
            let before = Observation::of(&controller);
            let (outcome, history) = controller.apply_training(completion);
            self.publish(StageKind::Training, &before, &controller, &outcome);
            (outcome, history)
        };

        if let Some(request) = history {
            self.refresh_history(request).await;
        }
        Ok(outcome)
    }

    pub async fn predict(&self, file: DatasetFile) -> Result<StepOutcome, TransitionError> {
        let request = self
            .transition(|controller| controller.begin_prediction(file))
            .await?;
        let completion = request.execute(self.gateway.as_ref()).await;

        let mut controller = self.controller.lock().await;
        let before = Observation::of(&controller);
        let outcome = controller.apply_prediction(completion);
        self.publish(StageKind::Prediction, &before, &controller, &outcome);
        Ok(outcome)
    }

    /// Raw bytes of the collaborator's example dataset. Leaves the workflow untouched.
    pub async fn download_example(&self) -> Result<Vec<u8>, GatewayError> {
        self.gateway.fetch_example().await
    }

    /// HTML data-quality report for the dataset currently analyzed.
    pub async fn report(&self) -> Result<String, ReportError> {
        let reference: ReferenceId = {
            let controller = self.controller.lock().await;
            controller
                .reference()
                .cloned()
                .ok_or(TransitionError::InvalidPhase {
                    action: "fetch a report",
                    phase: controller.phase(),
                })?
        };
        Ok(self.gateway.fetch_report(&reference).await?)
    }

    async fn refresh_history(&self, request: HistoryRequest) -> StepOutcome {
        let completion = request.execute(self.gateway.as_ref()).await;

        let mut controller = self.controller.lock().await;
        let before = Observation::of(&controller);
        let outcome = controller.apply_history(completion);
        self.publish(StageKind::History, &before, &controller, &outcome);
        outcome
    }

    async fn transition<R>(
        &self,
        start: impl FnOnce(&mut WorkflowController) -> Result<R, TransitionError>,
    ) -> Result<R, TransitionError> {
        let mut controller = self.controller.lock().await;
        let phase = controller.phase();
        let request = start(&mut *controller)?;
        if controller.phase() != phase {
            self.emit(WorkflowEvent::PhaseChanged(controller.phase()));
        }
        Ok(request)
    }

    fn publish(
        &self,
        stage: StageKind,
        before: &Observation,
        controller: &WorkflowController,
        outcome: &StepOutcome,
    ) {
        if let StepOutcome::Stale = outcome {
            debug!(stage = %stage, "completion superseded");
            self.emit(WorkflowEvent::CompletionDiscarded(stage));
            return;
        }
        if controller.phase() != before.phase {
            self.emit(WorkflowEvent::PhaseChanged(controller.phase()));
        }
        let chart = controller.state().chart();
        if let Some(chart) = chart.filter(|chart| Some(*chart) != before.chart.as_ref()) {
            self.emit(WorkflowEvent::ChartUpdated(chart.clone()));
        }
        if let StepOutcome::Failed(err) = outcome {
            self.emit(WorkflowEvent::StageFailed(err.clone()));
        }
    }

    fn emit(&self, event: WorkflowEvent) {
        // No subscriber is not an error.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;

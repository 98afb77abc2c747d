//! Canonical workflow state and its transitions.
//!
//! The controller never awaits. Every remote operation is split into a
//! `begin_*` call that validates the transition and hands out a request, and
//! an `apply_*` call that folds the completion back in. Completions whose
//! ticket was superseded in between are dropped.

use std::{fmt, mem};

use shared::{
    domain::{AnalysisResult, InferenceResult, ModelDescriptor, ModelKind, ReferenceId},
    protocol::RawHistoryRecord,
};
use tracing::{info, warn};

use crate::{
    error::{ErrorCategory, StageError, TransitionError},
    gateway::{DatasetFile, Prediction},
    history::{build_series, ChartSeries},
    stages::{
        Completion, HistoryRequest, PredictRequest, Stage, StageKind, StepOutcome, TrainRequest,
        UploadRequest,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowPhase {
    Idle,
    Analyzing,
    Analyzed,
    Training,
    Trained,
    Predicting,
    Predicted,
}

impl fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkflowPhase::Idle => "idle",
            WorkflowPhase::Analyzing => "analyzing",
            WorkflowPhase::Analyzed => "analyzed",
            WorkflowPhase::Training => "training",
            WorkflowPhase::Trained => "trained",
            WorkflowPhase::Predicting => "predicting",
            WorkflowPhase::Predicted => "predicted",
        };
        f.write_str(name)
    }
}

/// A model together with the analysis that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainedModel {
    pub analysis: AnalysisResult,
    pub model: ModelDescriptor,
    pub chart: ChartSeries,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum WorkflowState {
    #[default]
    Idle,
    /// `fallback` is the last settled state, restored if the upload fails.
    Analyzing {
        dataset: String,
        fallback: Box<WorkflowState>,
    },
    Analyzed(AnalysisResult),
    Training(AnalysisResult),
    Trained(TrainedModel),
    Predicting {
        trained: TrainedModel,
        previous: Option<InferenceResult>,
    },
    Predicted {
        trained: TrainedModel,
        inference: InferenceResult,
    },
}

impl WorkflowState {
    pub fn phase(&self) -> WorkflowPhase {
        match self {
            WorkflowState::Idle => WorkflowPhase::Idle,
            WorkflowState::Analyzing { .. } => WorkflowPhase::Analyzing,
            WorkflowState::Analyzed(_) => WorkflowPhase::Analyzed,
            WorkflowState::Training(_) => WorkflowPhase::Training,
            WorkflowState::Trained(_) => WorkflowPhase::Trained,
            WorkflowState::Predicting { .. } => WorkflowPhase::Predicting,
            WorkflowState::Predicted { .. } => WorkflowPhase::Predicted,
        }
    }

    /// Nothing from a superseded workflow is visible while analyzing.
    pub fn analysis(&self) -> Option<&AnalysisResult> {
        match self {
            WorkflowState::Analyzed(analysis) | WorkflowState::Training(analysis) => {
                Some(analysis)
            }
            _ => self.trained().map(|trained| &trained.analysis),
        }
    }

    pub fn model(&self) -> Option<&ModelDescriptor> {
        self.trained().map(|trained| &trained.model)
    }

    pub fn inference(&self) -> Option<&InferenceResult> {
        match self {
            WorkflowState::Predicted { inference, .. } => Some(inference),
            _ => None,
        }
    }

    pub fn chart(&self) -> Option<&ChartSeries> {
        self.trained().map(|trained| &trained.chart)
    }

    fn trained(&self) -> Option<&TrainedModel> {
        match self {
            WorkflowState::Trained(trained)
            | WorkflowState::Predicting { trained, .. }
            | WorkflowState::Predicted { trained, .. } => Some(trained),
            _ => None,
        }
    }

    fn trained_mut(&mut self) -> Option<&mut TrainedModel> {
        match self {
            WorkflowState::Trained(trained)
            | WorkflowState::Predicting { trained, .. }
            | WorkflowState::Predicted { trained, .. } => Some(trained),
            _ => None,
        }
    }

    /// Drops whatever operation is pending and returns the state it started from.
    fn into_settled(self) -> WorkflowState {
        match self {
            WorkflowState::Analyzing { fallback, .. } => *fallback,
            WorkflowState::Training(analysis) => WorkflowState::Analyzed(analysis),
            WorkflowState::Predicting {
                trained,
                previous: Some(inference),
            } => WorkflowState::Predicted { trained, inference },
            WorkflowState::Predicting {
                trained,
                previous: None,
            } => WorkflowState::Trained(trained),
            settled => settled,
        }
    }
}

/// Owned copy of everything a host needs to render the workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowSnapshot {
    pub phase: WorkflowPhase,
    pub analysis: Option<AnalysisResult>,
    pub model: Option<ModelDescriptor>,
    pub inference: Option<InferenceResult>,
    pub chart: Option<ChartSeries>,
    pub errors: Vec<StageError>,
    pub in_flight: Vec<StageKind>,
}

#[derive(Debug)]
pub struct WorkflowController {
    state: WorkflowState,
    upload: Stage,
    training: Stage,
    prediction: Stage,
    history: Stage,
}

impl Default for WorkflowController {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowController {
    pub fn new() -> Self {
        Self {
            state: WorkflowState::Idle,
            upload: Stage::new(StageKind::Upload),
            training: Stage::new(StageKind::Training),
            prediction: Stage::new(StageKind::Prediction),
            history: Stage::new(StageKind::History),
        }
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn phase(&self) -> WorkflowPhase {
        self.state.phase()
    }

    pub fn stage(&self, kind: StageKind) -> &Stage {
        match kind {
            StageKind::Upload => &self.upload,
            StageKind::Training => &self.training,
            StageKind::Prediction => &self.prediction,
            StageKind::History => &self.history,
        }
    }

    fn stage_mut(&mut self, kind: StageKind) -> &mut Stage {
        match kind {
            StageKind::Upload => &mut self.upload,
            StageKind::Training => &mut self.training,
            StageKind::Prediction => &mut self.prediction,
            StageKind::History => &mut self.history,
        }
    }

    fn stages(&self) -> [&Stage; 4] {
        [&self.upload, &self.training, &self.prediction, &self.history]
    }

    pub fn errors(&self) -> impl Iterator<Item = &StageError> {
        self.stages().into_iter().filter_map(Stage::error)
    }

    pub fn reference(&self) -> Option<&ReferenceId> {
        self.state.analysis().map(|analysis| &analysis.reference)
    }

    pub fn snapshot(&self) -> WorkflowSnapshot {
        WorkflowSnapshot {
            phase: self.phase(),
            analysis: self.state.analysis().cloned(),
            model: self.state.model().cloned(),
            inference: self.state.inference().cloned(),
            chart: self.state.chart().cloned(),
            errors: self.errors().cloned().collect(),
            in_flight: self
                .stages()
                .into_iter()
                .filter(|stage| stage.is_in_flight())
                .map(Stage::kind)
                .collect(),
        }
    }

    fn fail(&mut self, err: StageError) -> StepOutcome {
        self.stage_mut(err.stage()).fail(err.clone());
        StepOutcome::Failed(err)
    }

    /// Starts analysis of a new dataset, superseding whatever workflow is current.
    pub fn begin_upload(&mut self, file: DatasetFile) -> Result<UploadRequest, TransitionError> {
        self.upload.ensure_idle()?;
        file.validate()?;
        let ticket = self.upload.begin()?;
        for stage in [&mut self.training, &mut self.prediction, &mut self.history] {
            stage.invalidate();
        }

        let superseded = mem::take(&mut self.state);
        info!(file = %file.file_name(), superseded = %superseded.phase(), "upload started");
        self.state = WorkflowState::Analyzing {
            dataset: file.file_name().to_string(),
            fallback: Box::new(superseded.into_settled()),
        };
        Ok(UploadRequest { ticket, file })
    }

    /// A failure restores the superseded workflow. If that workflow has a
    /// model, its history must be fetched again since the upload dropped the
    /// pending fetch; the returned request carries the new ticket.
    pub fn apply_upload(
        &mut self,
        completion: Completion<AnalysisResult>,
    ) -> (StepOutcome, Option<HistoryRequest>) {
        if !self.upload.complete(completion.ticket) {
            return (StepOutcome::Stale, None);
        }
        let fallback = match mem::take(&mut self.state) {
            WorkflowState::Analyzing { fallback, .. } => *fallback,
            other => other.into_settled(),
        };

        match completion.outcome {
            Ok(analysis) => {
                for stage in [&mut self.training, &mut self.prediction, &mut self.history] {
                    stage.reset();
                }
                self.state = WorkflowState::Analyzed(analysis);
                (StepOutcome::Applied, None)
            }
            Err(err) => {
                self.state = fallback;
                let history = self
                    .state
                    .model()
                    .map(|model| model.id.clone())
                    .map(|model_id| HistoryRequest {
                        ticket: self.history.restart(),
                        model_id,
                    });
                (
                    self.fail(StageError::from_gateway(StageKind::Upload, &err)),
                    history,
                )
            }
        }
    }

    pub fn begin_training(&mut self) -> Result<TrainRequest, TransitionError> {
        self.training.ensure_idle()?;
        let reference = match &self.state {
            WorkflowState::Analyzed(analysis) => analysis.reference.clone(),
            other => {
                return Err(TransitionError::InvalidPhase {
                    action: "train",
                    phase: other.phase(),
                })
            }
        };
        let ticket = self.training.begin()?;
        self.state = match mem::take(&mut self.state) {
            WorkflowState::Analyzed(analysis) => WorkflowState::Training(analysis),
            other => other,
        };
        Ok(TrainRequest { ticket, reference })
    }

    /// On success the model's history must be fetched next; the returned
    /// request carries the ticket that fetch will be checked against.
    pub fn apply_training(
        &mut self,
        completion: Completion<ModelDescriptor>,
    ) -> (StepOutcome, Option<HistoryRequest>) {
        if !self.training.complete(completion.ticket) {
            return (StepOutcome::Stale, None);
        }
        let analysis = match mem::take(&mut self.state) {
            WorkflowState::Training(analysis) => analysis,
            other => {
                warn!(phase = %other.phase(), "training completed outside the training phase");
                self.state = other;
                return (StepOutcome::Stale, None);
            }
        };

        let outcome = completion
            .outcome
            .map_err(|err| StageError::from_gateway(StageKind::Training, &err))
            .and_then(|model| ensure_model_matches(&analysis, model));

        match outcome {
            Ok(model) => {
                let history = HistoryRequest {
                    ticket: self.history.restart(),
                    model_id: model.id.clone(),
                };
                self.state = WorkflowState::Trained(TrainedModel {
                    analysis,
                    model,
                    chart: ChartSeries::empty(),
                });
                (StepOutcome::Applied, Some(history))
            }
            Err(err) => {
                self.state = WorkflowState::Analyzed(analysis);
                (self.fail(err), None)
            }
        }
    }

    /// A failed fetch degrades to an empty chart and never leaves the trained state.
    pub fn apply_history(
        &mut self,
        completion: Completion<Vec<RawHistoryRecord>>,
    ) -> StepOutcome {
        if !self.history.complete(completion.ticket) {
            return StepOutcome::Stale;
        }
        let series = completion
            .outcome
            .map_err(|err| StageError::from_gateway(StageKind::History, &err))
            .and_then(|records| {
                build_series(&records)
                    .map_err(|err| StageError::from_validation(StageKind::History, &err))
            });

        let Some(trained) = self.state.trained_mut() else {
            return StepOutcome::Stale;
        };
        match series {
            Ok(series) => {
                trained.chart = series;
                StepOutcome::Applied
            }
            Err(err) => {
                trained.chart = ChartSeries::empty();
                self.fail(err)
            }
        }
    }

    pub fn begin_prediction(&mut self, file: DatasetFile) -> Result<PredictRequest, TransitionError> {
        self.prediction.ensure_idle()?;
        let model = match self.state.phase() {
            WorkflowPhase::Trained | WorkflowPhase::Predicted => self.state.model().cloned(),
            _ => None,
        };
        let Some(model) = model else {
            return Err(TransitionError::InvalidPhase {
                action: "predict",
                phase: self.phase(),
            });
        };
        file.validate()?;
        let ticket = self.prediction.begin()?;
        self.state = match mem::take(&mut self.state) {
            WorkflowState::Trained(trained) => WorkflowState::Predicting {
                trained,
                previous: None,
            },
            WorkflowState::Predicted { trained, inference } => WorkflowState::Predicting {
                trained,
                previous: Some(inference),
            },
            other => other,
        };
        Ok(PredictRequest {
            ticket,
            model,
            file,
        })
    }

    /// A failure returns to the settled state the prediction started from.
    pub fn apply_prediction(&mut self, completion: Completion<Prediction>) -> StepOutcome {
        if !self.prediction.complete(completion.ticket) {
            return StepOutcome::Stale;
        }
        let (mut trained, previous) = match mem::take(&mut self.state) {
            WorkflowState::Predicting { trained, previous } => (trained, previous),
            other => {
                warn!(phase = %other.phase(), "prediction completed outside the predicting phase");
                self.state = other;
                return StepOutcome::Stale;
            }
        };

        let outcome = completion
            .outcome
            .map_err(|err| StageError::from_gateway(StageKind::Prediction, &err))
            .and_then(|prediction| {
                let expected = trained.model.model_type();
                if prediction.result.model_type() == expected {
                    Ok(prediction)
                } else {
                    Err(StageError::new(
                        StageKind::Prediction,
                        ErrorCategory::Validation,
                        format!(
                            "{} result returned for {expected} model {}",
                            prediction.result.model_type(),
                            trained.model.id
                        ),
                    ))
                }
            });

        match outcome {
            Ok(Prediction { result, history }) => {
                if let Some(records) = history {
                    match build_series(&records) {
                        Ok(series) => {
                            // Supersedes any history fetch still in flight.
                            self.history.reset();
                            trained.chart = series;
                        }
                        Err(err) => {
                            // A fetch still in flight must not replace the kept chart.
                            self.history.invalidate();
                            self.history
                                .fail(StageError::from_validation(StageKind::History, &err));
                        }
                    }
                }
                self.state = WorkflowState::Predicted {
                    trained,
                    inference: result,
                };
                StepOutcome::Applied
            }
            Err(err) => {
                self.state = match previous {
                    Some(inference) => WorkflowState::Predicted { trained, inference },
                    None => WorkflowState::Trained(trained),
                };
                self.fail(err)
            }
        }
    }
}

/// The model kind is decided by the analysis alone; anything else is rejected.
fn ensure_model_matches(
    analysis: &AnalysisResult,
    model: ModelDescriptor,
) -> Result<ModelDescriptor, StageError> {
    let expected = analysis.expected_model_kind();
    if model.kind == expected {
        return Ok(model);
    }
    Err(StageError::new(
        StageKind::Training,
        ErrorCategory::Validation,
        format!(
            "model {} is {} but the analyzed dataset calls for {}",
            model.id,
            describe(&model.kind),
            describe(&expected)
        ),
    ))
}

fn describe(kind: &ModelKind) -> String {
    match kind {
        ModelKind::Supervised { target } => format!("supervised on `{target}`"),
        ModelKind::Unsupervised => "unsupervised".to_string(),
    }
}

#[cfg(test)]
#[path = "tests/workflow_tests.rs"]
mod tests;

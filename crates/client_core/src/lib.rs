//! Client-side workflow core: upload and analyze a dataset, train a model on
//! it, run inference, and chart the model's prediction history.

pub mod error;
pub mod gateway;
pub mod history;
pub mod session;
pub mod stages;
pub mod workflow;

pub use error::{ErrorCategory, GatewayError, ReportError, StageError, TransitionError};
pub use gateway::{DatasetFile, HttpGateway, Prediction, RemoteGateway};
pub use history::{build_series, ChartSeries, ValidationError};
pub use session::{WorkflowEvent, WorkflowSession};
pub use stages::{StageKind, StepOutcome};
pub use workflow::{WorkflowController, WorkflowPhase, WorkflowSnapshot, WorkflowState};

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;

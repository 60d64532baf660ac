use crate::progress::Stage;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MorphologyError {
    #[error("invalid input: {0}")]
    Input(#[from] InputError),
    #[error("graph consistency violated during {stage}: {detail}")]
    GraphConsistency { stage: Stage, detail: String },
    #[error("degenerate result during {stage}: {detail}")]
    DegenerateResult { stage: Stage, detail: String },
}

/// Rejections raised before a stage starts touching the graph.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InputError {
    #[error("dataset is empty")]
    EmptyDataset,
    #[error("feature {feature} has invalid geometry: {reason}")]
    InvalidGeometry { feature: usize, reason: &'static str },
    #[error("supplied place polygon {index} is invalid: {reason}")]
    InvalidPolygon { index: usize, reason: &'static str },
    #[error("{name} must be {expected}, got {value}")]
    OutOfRange {
        name: &'static str,
        expected: &'static str,
        value: f64,
    },
    #[error("could not parse configuration: {0}")]
    Config(String),
    #[error("{0} has not been run yet")]
    StageNotRun(Stage),
}

impl MorphologyError {
    pub(crate) fn consistency(stage: Stage, detail: impl Into<String>) -> Self {
        MorphologyError::GraphConsistency {
            stage,
            detail: detail.into(),
        }
    }

    pub(crate) fn degenerate(stage: Stage, detail: impl Into<String>) -> Self {
        MorphologyError::DegenerateResult {
            stage,
            detail: detail.into(),
        }
    }
}

pub type Result<T, E = MorphologyError> = std::result::Result<T, E>;

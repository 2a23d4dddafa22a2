use std::path::PathBuf;
use thiserror::Error;

/// Failures of a single video analysis. Every variant aborts the whole
/// analysis; no partial verdict is ever produced.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Could not open video {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("Failed to decode frame {index}: {reason}")]
    Decode { index: usize, reason: String },

    #[error("Failed to load model from {}: {reason}", path.display())]
    ModelLoad { path: PathBuf, reason: String },

    #[error("Inference failed: {0}")]
    Inference(String),
}

impl AnalysisError {
    pub fn is_open(&self) -> bool {
        matches!(self, AnalysisError::Open { .. })
    }
}

impl From<candle_core::Error> for AnalysisError {
    fn from(err: candle_core::Error) -> Self {
        AnalysisError::Inference(err.to_string())
    }
}

impl From<opencv::Error> for AnalysisError {
    fn from(err: opencv::Error) -> Self {
        AnalysisError::Inference(err.to_string())
    }
}

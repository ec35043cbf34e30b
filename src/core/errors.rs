//! Error types for the triage pipeline.
//!
//! This module defines the error taxonomy used across the pipeline:
//! per-request recoverable errors (image decoding), fatal startup errors
//! (missing model artifacts), and internal processing errors with the stage
//! they occurred in. Attribution-map generation failures are deliberately
//! *not* fatal; the pipeline catches them component-locally (see
//! [`crate::pipeline`]).

use std::path::PathBuf;
use thiserror::Error;

/// Stages of processing where an internal error can occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStage {
    /// Error occurred during tensor operations.
    TensorOperation,
    /// Error occurred during image normalization.
    Normalization,
    /// Error occurred during image or map resizing.
    Resize,
    /// Error occurred during attribution-map generation.
    Attribution,
    /// Error occurred while composing or saving an overlay image.
    Overlay,
}

impl std::fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingStage::TensorOperation => write!(f, "tensor operation"),
            ProcessingStage::Normalization => write!(f, "normalization"),
            ProcessingStage::Resize => write!(f, "resize"),
            ProcessingStage::Attribution => write!(f, "attribution"),
            ProcessingStage::Overlay => write!(f, "overlay"),
        }
    }
}

/// Errors that can occur in the triage pipeline.
#[derive(Error, Debug)]
pub enum TriageError {
    /// The source image could not be decoded. Per-request, caller input.
    #[error("image decode")]
    ImageDecode(#[source] image::ImageError),

    /// Error during a processing step.
    #[error("{kind} failed: {context}")]
    Processing {
        /// The stage of processing where the error occurred.
        kind: ProcessingStage,
        /// Additional context about the error.
        context: String,
        /// The underlying error that caused this error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Error during a model forward or backward pass.
    #[error("inference ({model_name}): {context}")]
    Inference {
        /// Name of the model the failure occurred in.
        model_name: String,
        /// Additional context about the error.
        context: String,
        /// The underlying error that caused this error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A model weight file is absent even after the artifact provider ran.
    /// Fatal: no inference is possible without it.
    #[error("model artifact missing: {path}")]
    ModelArtifactMissing {
        /// Path of the missing weight file.
        path: PathBuf,
    },

    /// A model was requested from the registry before it was loaded.
    #[error("model not loaded: {model_name}")]
    ModelNotLoaded {
        /// Name of the model that was not resident.
        model_name: String,
    },

    /// Error indicating a configuration problem.
    #[error("configuration: {message}")]
    ConfigError {
        /// A message describing the configuration error.
        message: String,
    },

    /// IO error.
    #[error("io")]
    Io(#[from] std::io::Error),
}

/// Convenient result alias for triage operations.
pub type TriageResult<T> = Result<T, TriageError>;

impl TriageError {
    /// Creates a processing error for overlay composition.
    pub fn overlay(context: &str, error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Processing {
            kind: ProcessingStage::Overlay,
            context: context.to_string(),
            source: Box::new(error),
        }
    }

    /// Creates a configuration error with the given message.
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }
}

/// Converts a Candle error into an inference error for the named model.
pub fn candle_inference(
    model_name: &str,
    context: impl Into<String>,
    err: candle_core::Error,
) -> TriageError {
    TriageError::Inference {
        model_name: model_name.to_string(),
        context: context.into(),
        source: Box::new(err),
    }
}

/// Converts a Candle error into a processing error for the given stage.
pub fn candle_processing(
    kind: ProcessingStage,
    context: impl Into<String>,
    err: candle_core::Error,
) -> TriageError {
    TriageError::Processing {
        kind,
        context: context.into(),
        source: Box::new(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processing_stage_display() {
        assert_eq!(ProcessingStage::Attribution.to_string(), "attribution");
        assert_eq!(ProcessingStage::TensorOperation.to_string(), "tensor operation");
    }

    #[test]
    fn error_messages_carry_context() {
        let err = TriageError::overlay(
            "write failed",
            std::io::Error::new(std::io::ErrorKind::InvalidData, "disk full"),
        );
        assert_eq!(err.to_string(), "overlay failed: write failed");

        let err = TriageError::ModelNotLoaded {
            model_name: "segmentation".to_string(),
        };
        assert_eq!(err.to_string(), "model not loaded: segmentation");
    }
}

//! Core infrastructure for the triage pipeline.
//!
//! This module contains the error taxonomy, the environment-driven
//! configuration surface, and the model registry that owns the two loaded
//! networks.

pub mod config;
pub mod errors;
pub mod registry;

pub use config::TriageConfig;
pub use errors::{ProcessingStage, TriageError, TriageResult};
pub use registry::{ArtifactProvider, ModelRegistry};

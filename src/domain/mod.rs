//! Domain types for chest X-ray triage.
//!
//! Class labels and probability distributions, the binary lung mask, and the
//! structured inference result returned to the request layer.

pub mod labels;
pub mod mask;
pub mod result;

pub use labels::{ClassLabel, ClassProbabilities};
pub use mask::Mask;
pub use result::{Finding, InferenceResult, recommendations_for};

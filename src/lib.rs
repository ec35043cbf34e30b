//! # CXR Triage
//!
//! A Rust library for automated chest X-ray triage. Given a single
//! radiograph it isolates the lung region, classifies the image into one of
//! four pulmonary conditions, and produces pixel-level attribution maps
//! showing which regions drove the classifier's decision.
//!
//! ## Pipeline
//!
//! raw image → segmentation preprocessing → U-Net lung mask → masked
//! classification preprocessing → ResNet-50 class probabilities → three
//! class-activation-mapping variants → mask-restricted heatmap overlays.
//!
//! ## Components
//!
//! * [`core`] - Error handling, configuration, and the model registry
//! * [`domain`] - Class labels, probabilities, masks, and inference results
//! * [`models`] - The segmentation and classification networks
//! * [`processors`] - Preprocessing, attribution generation, and overlay
//!   composition
//! * [`pipeline`] - The `predict(image) -> result` orchestration
//! * [`utils`] - Image and tensor helpers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cxr_triage::prelude::*;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TriageConfig::from_env();
//! let pipeline = TriagePipeline::new(config)?;
//! pipeline.load_models()?;
//!
//! let result = pipeline.predict(Path::new("chest_xray.png"))?;
//! println!("{} ({:.1}%)", result.predicted_class, result.confidence * 100.0);
//! # Ok(())
//! # }
//! ```
//!
//! Requests are served one at a time: the pipeline holds its registry lock
//! for the whole inference because the attribution variants share the
//! classification model's computation-graph state.

pub mod core;
pub mod domain;
pub mod models;
pub mod pipeline;
pub mod processors;
pub mod utils;

/// Prelude module for convenient imports.
///
/// Bring the essentials into scope with a single use statement:
///
/// ```rust
/// use cxr_triage::prelude::*;
/// ```
pub mod prelude {
    pub use crate::core::config::TriageConfig;
    pub use crate::core::{TriageError, TriageResult};
    pub use crate::domain::{ClassLabel, Finding, InferenceResult};
    pub use crate::pipeline::TriagePipeline;
    pub use crate::utils::load_image;
}

//! Image processing components of the triage pipeline.
//!
//! Preprocessing (image-to-tensor for both consumption modes), the
//! attribution engine (three class-activation-mapping variants over a shared
//! capture protocol), and the compositor that turns attribution maps into
//! mask-restricted heatmap overlays.

pub mod attribution;
pub mod overlay;
pub mod preprocess;

pub use attribution::{AttributionEngine, AttributionMap, CamAlgorithm};
pub use overlay::Compositor;
pub use preprocess::Preprocessor;

//! Neural network models for the triage pipeline.
//!
//! Both models run on Candle. Weights are plain tensors (not trainable
//! variables), so ordinary forward passes record no computation graph; the
//! classification model additionally exposes an explicit capture point for
//! the attribution engine's gradient computation.

pub mod classification;
pub mod segmentation;

pub use classification::{CapturedForward, ClassificationModel};
pub use segmentation::SegmentationModel;

/// Side length both models consume: images are resized to 224×224 before
/// normalization.
pub const INPUT_SIZE: usize = 224;

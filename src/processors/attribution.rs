//! Gradient-based attribution maps (class-activation mapping).
//!
//! Three variants share one capture protocol: run the classification forward
//! pass with the last residual stage's output exposed as a gradient leaf
//! (see [`ClassificationModel::forward_with_capture`]), backpropagate from
//! the predicted class's logit, and read back the activation and its
//! gradient. The variants differ only in how activation and gradient combine
//! into a single-channel map; a shared finalization step clips negatives,
//! min-max normalizes to `[0,1]`, and applies the display-visibility policy.
//!
//! "No map produced" is an expected outcome (flat gradients, saturated
//! graphs), not an error: generation returns `Ok(None)` in that case and the
//! pipeline simply omits the map from the result.

use crate::core::errors::{candle_processing, ProcessingStage, TriageResult};
use crate::models::ClassificationModel;
use crate::utils::{plane_from_tensor, resize_bilinear_chw};
use candle_core::{IndexOp, Tensor};

const EPSILON: f64 = 1e-8;
/// Peaks below this value are considered invisible on an overlay.
const VISIBILITY_FLOOR: f32 = 0.01;
/// Invisible maps are rescaled so their peak reaches this value.
const VISIBILITY_PEAK: f32 = 0.3;

fn stage_err(context: &str) -> impl Fn(candle_core::Error) -> crate::core::TriageError + '_ {
    move |e| candle_processing(ProcessingStage::Attribution, context, e)
}

/// The three class-activation-mapping variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CamAlgorithm {
    /// Basic Grad-CAM: channels weighted by the spatial mean of the gradient.
    GradCam,
    /// Grad-CAM++: second-order per-pixel channel weighting.
    GradCamPlusPlus,
    /// Layer-CAM: element-wise positive-gradient weighting, no pooling.
    LayerCam,
}

impl CamAlgorithm {
    /// All variants in the order they are generated per request.
    pub const ALL: [CamAlgorithm; 3] = [
        CamAlgorithm::GradCam,
        CamAlgorithm::GradCamPlusPlus,
        CamAlgorithm::LayerCam,
    ];

    /// File-name prefix and log identifier for this variant.
    pub fn name(&self) -> &'static str {
        match self {
            CamAlgorithm::GradCam => "gradcam",
            CamAlgorithm::GradCamPlusPlus => "gradcam_plus",
            CamAlgorithm::LayerCam => "layercam",
        }
    }
}

impl std::fmt::Display for CamAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A single-channel saliency map with values normalized to `[0, 1]`.
#[derive(Debug, Clone)]
pub struct AttributionMap {
    /// Row-major map values.
    pub data: Vec<f32>,
    /// Map width in pixels.
    pub width: usize,
    /// Map height in pixels.
    pub height: usize,
}

impl AttributionMap {
    /// Largest map value.
    pub fn peak(&self) -> f32 {
        self.data.iter().copied().fold(0.0, f32::max)
    }
}

/// Generates class-activation maps from a classification model.
#[derive(Debug, Default)]
pub struct AttributionEngine;

impl AttributionEngine {
    /// Creates an engine with the fixed normalization policy.
    pub fn new() -> Self {
        Self
    }

    /// Generates one attribution map for the given class index.
    ///
    /// The class index must come from the reporting forward pass; it is
    /// never re-derived here, so the map always explains the probabilities
    /// the caller reported.
    ///
    /// Returns `Ok(None)` when no map can be produced (no gradient reached
    /// the capture point). Tensor failures are real errors; the pipeline
    /// catches them per-variant.
    pub fn generate(
        &self,
        model: &ClassificationModel,
        input: &Tensor,
        class_index: usize,
        algorithm: CamAlgorithm,
    ) -> TriageResult<Option<AttributionMap>> {
        let Some((activation, gradient)) = self.capture(model, input, class_index)? else {
            return Ok(None);
        };

        let cam = match algorithm {
            CamAlgorithm::GradCam => combine_gradcam(&activation, &gradient)?,
            CamAlgorithm::GradCamPlusPlus => combine_gradcam_pp(&activation, &gradient)?,
            CamAlgorithm::LayerCam => combine_layercam(&activation, &gradient)?,
        };

        let (plane, width, height) = plane_from_tensor(&cam)?;
        Ok(Some(finalize(plane, width, height)))
    }

    /// Shared capture step: gradient-enabled forward pass, backpropagation
    /// from the selected class logit, and readback of the captured
    /// activation/gradient pair. A gradient whose spatial size disagrees
    /// with the activation's is bilinearly resized to match.
    fn capture(
        &self,
        model: &ClassificationModel,
        input: &Tensor,
        class_index: usize,
    ) -> TriageResult<Option<(Tensor, Tensor)>> {
        let captured = model.forward_with_capture(input)?;
        let target = captured
            .logits
            .i((0, class_index))
            .map_err(stage_err("select class logit"))?;
        let grads = target.backward().map_err(stage_err("backward"))?;

        let Some(gradient) = grads.get(&captured.activation) else {
            return Ok(None);
        };
        let activation = captured.activation.as_tensor().clone();

        let (_, _, act_h, act_w) = activation.dims4().map_err(stage_err("activation dims"))?;
        let (_, _, grad_h, grad_w) = gradient.dims4().map_err(stage_err("gradient dims"))?;
        let gradient = if (grad_h, grad_w) != (act_h, act_w) {
            resize_bilinear_chw(gradient, act_h, act_w)?
        } else {
            gradient.clone()
        };

        Ok(Some((activation, gradient)))
    }
}

/// Grad-CAM: per-channel weight is the spatial mean of the gradient; the map
/// is the weighted sum of activation channels.
fn combine_gradcam(activation: &Tensor, gradient: &Tensor) -> TriageResult<Tensor> {
    let weights = gradient
        .mean_keepdim(3)
        .and_then(|t| t.mean_keepdim(2))
        .map_err(stage_err("gradient pooling"))?;
    weights
        .broadcast_mul(activation)
        .and_then(|t| t.sum_keepdim(1))
        .map_err(stage_err("weighted channel sum"))
}

/// Grad-CAM++: per-pixel weight `grad² / (2·grad² + Σ_spatial(act·grad) + ε)`,
/// negative-clipped, multiplied by the positive gradient and the activation,
/// summed over channels.
fn combine_gradcam_pp(activation: &Tensor, gradient: &Tensor) -> TriageResult<Tensor> {
    let grad_sq = gradient.sqr().map_err(stage_err("gradient square"))?;
    let act_grad_sum = (activation * gradient)
        .and_then(|t| t.sum_keepdim(3))
        .and_then(|t| t.sum_keepdim(2))
        .map_err(stage_err("activation-gradient sum"))?;
    let denominator = grad_sq
        .affine(2.0, EPSILON)
        .and_then(|t| t.broadcast_add(&act_grad_sum))
        .map_err(stage_err("alpha denominator"))?;
    let alpha = grad_sq
        .div(&denominator)
        .and_then(|t| t.relu())
        .map_err(stage_err("alpha"))?;
    let positive_grad = gradient.relu().map_err(stage_err("positive gradient"))?;
    (alpha * positive_grad)
        .and_then(|t| t * activation.clone())
        .and_then(|t| t.sum_keepdim(1))
        .map_err(stage_err("alpha-weighted sum"))
}

/// Layer-CAM: positive gradient times raw (unclipped) activation, summed
/// over channels.
fn combine_layercam(activation: &Tensor, gradient: &Tensor) -> TriageResult<Tensor> {
    gradient
        .relu()
        .and_then(|g| g * activation.clone())
        .and_then(|t| t.sum_keepdim(1))
        .map_err(stage_err("positive-gradient sum"))
}

/// Shared finalization: clip negatives, min-max normalize to `[0, 1]`.
///
/// A zero-range map saturates to a flat 0.5 rather than dividing by zero,
/// and a map whose peak falls below the visibility floor is rescaled so its
/// peak reaches the minimum visible value. Display-usability policy, not a
/// correctness requirement.
fn finalize(mut data: Vec<f32>, width: usize, height: usize) -> AttributionMap {
    for v in &mut data {
        *v = v.max(0.0);
    }
    let min = data.iter().copied().fold(f32::INFINITY, f32::min);
    let max = data.iter().copied().fold(f32::NEG_INFINITY, f32::max);

    // Exact comparison: any non-degenerate range normalizes, however tiny.
    // A sub-epsilon range leaves the peak far below 1.0 after dividing by
    // the epsilon-guarded denominator, which is what the visibility rescale
    // below exists to catch.
    if max > min {
        let range = max - min + EPSILON as f32;
        for v in &mut data {
            *v = (*v - min) / range;
        }
        let peak = data.iter().copied().fold(0.0, f32::max);
        if peak < VISIBILITY_FLOOR {
            let scale = VISIBILITY_PEAK / (peak + EPSILON as f32);
            for v in &mut data {
                *v *= scale;
            }
        }
    } else {
        // Flat map: fall back to mid-value so the overlay stays visible.
        for v in &mut data {
            *v = 0.5;
        }
    }

    AttributionMap {
        data,
        width,
        height,
    }
}

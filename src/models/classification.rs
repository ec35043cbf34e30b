//! ResNet-50 classification model with a custom 4-class head.
//!
//! The backbone is a standard bottleneck ResNet-50 whose final fully
//! connected layer is replaced by `Dropout → Linear(2048→512) → ReLU →
//! Dropout → Linear(512→4)`. Dropout is inert at inference, so only the two
//! linear layers carry parameters. Parameter names follow the torchvision
//! layout under a `backbone.` prefix (`backbone.conv1`, `backbone.layer4.2.bn3`,
//! `backbone.fc.1`, `backbone.fc.4`), matching the original checkpoint.
//!
//! The attribution engine needs the gradient of a class logit with respect
//! to the last residual stage's output. Rather than hooking into an opaque
//! module graph, [`ClassificationModel::forward_with_capture`] splits the
//! forward pass at that fixed stage and re-roots the activation as a leaf
//! [`Var`]; backpropagating from a logit then yields exactly that gradient
//! from the`GradStore`. The capture point is part of the architecture, not a
//! runtime lookup.

use crate::core::errors::{candle_inference, TriageResult};
use crate::domain::ClassProbabilities;
use candle_core::{Tensor, Var};
use candle_nn::{
    batch_norm, conv2d_no_bias, linear, BatchNorm, Conv2d, Conv2dConfig, Linear, Module, ModuleT,
    VarBuilder,
};

const MODEL_NAME: &str = "classification";
/// Number of output classes.
pub const NUM_CLASSES: usize = 4;

fn infer(context: &str) -> impl Fn(candle_core::Error) -> crate::core::TriageError + '_ {
    move |e| candle_inference(MODEL_NAME, context, e)
}

fn conv_cfg(stride: usize, padding: usize) -> Conv2dConfig {
    Conv2dConfig {
        stride,
        padding,
        ..Default::default()
    }
}

/// A bottleneck residual block: 1×1 reduce, 3×3, 1×1 expand, with an
/// optional projection shortcut on the first block of a stage.
#[derive(Debug)]
struct Bottleneck {
    conv1: Conv2d,
    bn1: BatchNorm,
    conv2: Conv2d,
    bn2: BatchNorm,
    conv3: Conv2d,
    bn3: BatchNorm,
    downsample: Option<(Conv2d, BatchNorm)>,
}

impl Bottleneck {
    const EXPANSION: usize = 4;

    fn load(in_c: usize, width: usize, stride: usize, vb: VarBuilder) -> TriageResult<Self> {
        let out_c = width * Self::EXPANSION;
        let conv1 =
            conv2d_no_bias(in_c, width, 1, conv_cfg(1, 0), vb.pp("conv1")).map_err(infer("conv1"))?;
        let bn1 = batch_norm(width, 1e-5, vb.pp("bn1")).map_err(infer("bn1"))?;
        let conv2 = conv2d_no_bias(width, width, 3, conv_cfg(stride, 1), vb.pp("conv2"))
            .map_err(infer("conv2"))?;
        let bn2 = batch_norm(width, 1e-5, vb.pp("bn2")).map_err(infer("bn2"))?;
        let conv3 = conv2d_no_bias(width, out_c, 1, conv_cfg(1, 0), vb.pp("conv3"))
            .map_err(infer("conv3"))?;
        let bn3 = batch_norm(out_c, 1e-5, vb.pp("bn3")).map_err(infer("bn3"))?;

        let downsample = if stride != 1 || in_c != out_c {
            let vb = vb.pp("downsample");
            let conv = conv2d_no_bias(in_c, out_c, 1, conv_cfg(stride, 0), vb.pp("0"))
                .map_err(infer("downsample conv"))?;
            let bn = batch_norm(out_c, 1e-5, vb.pp("1")).map_err(infer("downsample bn"))?;
            Some((conv, bn))
        } else {
            None
        };

        Ok(Self {
            conv1,
            bn1,
            conv2,
            bn2,
            conv3,
            bn3,
            downsample,
        })
    }

    fn forward(&self, x: &Tensor) -> TriageResult<Tensor> {
        let shortcut = match &self.downsample {
            Some((conv, bn)) => conv
                .forward(x)
                .and_then(|s| bn.forward_t(&s, false))
                .map_err(infer("shortcut"))?,
            None => x.clone(),
        };
        let out = self
            .conv1
            .forward(x)
            .and_then(|t| self.bn1.forward_t(&t, false))
            .and_then(|t| t.relu())
            .map_err(infer("bottleneck 1x1 reduce"))?;
        let out = self
            .conv2
            .forward(&out)
            .and_then(|t| self.bn2.forward_t(&t, false))
            .and_then(|t| t.relu())
            .map_err(infer("bottleneck 3x3"))?;
        self.conv3
            .forward(&out)
            .and_then(|t| self.bn3.forward_t(&t, false))
            .and_then(|t| t + shortcut)
            .and_then(|t| t.relu())
            .map_err(infer("bottleneck 1x1 expand"))
    }
}

fn load_stage(
    in_c: usize,
    width: usize,
    blocks: usize,
    stride: usize,
    vb: VarBuilder,
) -> TriageResult<Vec<Bottleneck>> {
    let mut stage = Vec::with_capacity(blocks);
    stage.push(Bottleneck::load(in_c, width, stride, vb.pp("0"))?);
    for i in 1..blocks {
        stage.push(Bottleneck::load(
            width * Bottleneck::EXPANSION,
            width,
            1,
            vb.pp(i.to_string()),
        )?);
    }
    Ok(stage)
}

/// The classification forward pass split at the capture point: `logits` for
/// reporting or backpropagation, `activation` the last residual stage's
/// output re-rooted as a leaf variable so its gradient is retrievable after
/// `logits.backward()`.
pub struct CapturedForward {
    /// Raw class logits, shape `(1, 4)`.
    pub logits: Tensor,
    /// The `layer4` output, shape `(1, 2048, H, W)`, as a gradient leaf.
    pub activation: Var,
}

/// ResNet-50 feature extractor with the replaced 4-class head.
#[derive(Debug)]
pub struct ClassificationModel {
    conv1: Conv2d,
    bn1: BatchNorm,
    layer1: Vec<Bottleneck>,
    layer2: Vec<Bottleneck>,
    layer3: Vec<Bottleneck>,
    layer4: Vec<Bottleneck>,
    fc1: Linear,
    fc2: Linear,
}

impl ClassificationModel {
    /// Builds the network and pulls weights from the given builder.
    pub fn load(vb: VarBuilder) -> TriageResult<Self> {
        let vb = vb.pp("backbone");
        let conv1 = conv2d_no_bias(3, 64, 7, conv_cfg(2, 3), vb.pp("conv1"))
            .map_err(infer("stem conv"))?;
        let bn1 = batch_norm(64, 1e-5, vb.pp("bn1")).map_err(infer("stem bn"))?;
        let layer1 = load_stage(64, 64, 3, 1, vb.pp("layer1"))?;
        let layer2 = load_stage(256, 128, 4, 2, vb.pp("layer2"))?;
        let layer3 = load_stage(512, 256, 6, 2, vb.pp("layer3"))?;
        let layer4 = load_stage(1024, 512, 3, 2, vb.pp("layer4"))?;
        // Head Sequential indices: 0 dropout, 1 linear, 2 relu, 3 dropout, 4 linear.
        let fc = vb.pp("fc");
        let fc1 = linear(2048, 512, fc.pp("1")).map_err(infer("fc1"))?;
        let fc2 = linear(512, NUM_CLASSES, fc.pp("4")).map_err(infer("fc2"))?;
        Ok(Self {
            conv1,
            bn1,
            layer1,
            layer2,
            layer3,
            layer4,
            fc1,
            fc2,
        })
    }

    /// Backbone forward through `layer4`, producing `(N, 2048, H/32, W/32)`.
    fn forward_features(&self, x: &Tensor) -> TriageResult<Tensor> {
        let mut x = self
            .conv1
            .forward(x)
            .and_then(|t| self.bn1.forward_t(&t, false))
            .and_then(|t| t.relu())
            // 3x3 stride-2 max pool with padding 1; zero padding is
            // equivalent to -inf padding on post-ReLU values.
            .and_then(|t| t.pad_with_zeros(2, 1, 1))
            .and_then(|t| t.pad_with_zeros(3, 1, 1))
            .and_then(|t| t.max_pool2d_with_stride(3, 2))
            .map_err(infer("stem"))?;
        for stage in [&self.layer1, &self.layer2, &self.layer3, &self.layer4] {
            for block in stage {
                x = block.forward(&x)?;
            }
        }
        Ok(x)
    }

    /// Head forward from the captured stage: global average pool then the
    /// two linear layers (dropout is a no-op at inference).
    fn forward_head(&self, features: &Tensor) -> TriageResult<Tensor> {
        features
            .mean(3)
            .and_then(|t| t.mean(2))
            .and_then(|t| self.fc1.forward(&t))
            .and_then(|t| t.relu())
            .and_then(|t| self.fc2.forward(&t))
            .map_err(infer("head"))
    }

    /// Full forward pass producing `(N, 4)` logits.
    pub fn forward(&self, x: &Tensor) -> TriageResult<Tensor> {
        let features = self.forward_features(x)?;
        self.forward_head(&features)
    }

    /// Classifies a preprocessed tensor: forward pass and softmax over the
    /// four logits. No gradients are tracked on this path.
    pub fn classify(&self, x: &Tensor) -> TriageResult<ClassProbabilities> {
        let logits = self.forward(&x.detach())?;
        let probabilities = candle_nn::ops::softmax(&logits, 1).map_err(infer("softmax"))?;
        let values: Vec<f32> = probabilities
            .squeeze(0)
            .and_then(|t| t.to_dtype(candle_core::DType::F32))
            .and_then(|t| t.to_vec1())
            .map_err(infer("read probabilities"))?;
        let mut fixed = [0f32; NUM_CLASSES];
        fixed.copy_from_slice(&values);
        Ok(ClassProbabilities::new(fixed))
    }

    /// Runs the forward pass with the capture point exposed for attribution.
    ///
    /// The backbone output is detached into a fresh leaf [`Var`] and the head
    /// recomputed from it, so `backward()` on a logit only traverses the head
    /// and stops at the captured activation. That is exactly the gradient the
    /// class-activation-mapping variants need, at a fraction of a full
    /// backward pass.
    pub fn forward_with_capture(&self, x: &Tensor) -> TriageResult<CapturedForward> {
        let features = self.forward_features(&x.detach())?;
        let activation = Var::from_tensor(&features).map_err(infer("capture activation"))?;
        let logits = self.forward_head(activation.as_tensor())?;
        Ok(CapturedForward { logits, activation })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, IndexOp};

    fn zero_model() -> ClassificationModel {
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        ClassificationModel::load(vb).unwrap()
    }

    #[test]
    fn logits_have_four_classes() {
        let model = zero_model();
        let x = Tensor::zeros((1, 3, 224, 224), DType::F32, &Device::Cpu).unwrap();
        let logits = model.forward(&x).unwrap();
        assert_eq!(logits.dims(), &[1, NUM_CLASSES]);
    }

    #[test]
    fn probabilities_are_a_distribution() {
        let model = zero_model();
        let x = Tensor::zeros((1, 3, 224, 224), DType::F32, &Device::Cpu).unwrap();
        let probs = model.classify(&x).unwrap();
        let sum: f32 = probs.as_slice().iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        for &p in probs.as_slice() {
            assert!((0.0..=1.0).contains(&p));
        }
        // Zero weights give identical logits, hence a uniform distribution.
        for &p in probs.as_slice() {
            assert!((p - 0.25).abs() < 1e-6);
        }
    }

    #[test]
    fn capture_exposes_last_stage_activation() {
        let model = zero_model();
        let x = Tensor::zeros((1, 3, 224, 224), DType::F32, &Device::Cpu).unwrap();
        let captured = model.forward_with_capture(&x).unwrap();
        assert_eq!(captured.logits.dims(), &[1, NUM_CLASSES]);
        // 224 / 32 = 7 spatial, 2048 channels out of layer4.
        assert_eq!(captured.activation.dims(), &[1, 2048, 7, 7]);
    }

    #[test]
    fn backward_reaches_the_captured_activation() {
        let model = zero_model();
        let x = Tensor::zeros((1, 3, 224, 224), DType::F32, &Device::Cpu).unwrap();
        let captured = model.forward_with_capture(&x).unwrap();
        let target = captured.logits.i((0, 0)).unwrap();
        let grads = target.backward().unwrap();
        let grad = grads.get(&captured.activation).expect("gradient captured");
        assert_eq!(grad.dims(), captured.activation.dims());
    }
}

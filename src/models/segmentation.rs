//! U-Net lung segmentation model.
//!
//! A 4-level encoder-decoder with skip connections mapping a 3-channel
//! 224×224 image to a single-channel logit map at input resolution.
//! Parameter names mirror the original training checkpoint
//! (`inc.double_conv.0.weight`, `down1.maxpool_conv.1...`, `up1.up...`,
//! `outc.conv...`) so converted weight files load without renaming.

use crate::core::errors::{candle_inference, TriageResult};
use crate::domain::Mask;
use candle_core::Tensor;
use candle_nn::{
    batch_norm, conv2d, conv2d_no_bias, conv_transpose2d, BatchNorm, Conv2d, Conv2dConfig,
    ConvTranspose2d, ConvTranspose2dConfig, Module, ModuleT, VarBuilder,
};

const MODEL_NAME: &str = "segmentation";
/// Sigmoid threshold above which a pixel counts as lung.
pub const MASK_THRESHOLD: f32 = 0.5;

fn infer(context: &str) -> impl Fn(candle_core::Error) -> crate::core::TriageError + '_ {
    move |e| candle_inference(MODEL_NAME, context, e)
}

/// Two 3×3 convolutions, each followed by batch norm and ReLU.
#[derive(Debug)]
struct DoubleConv {
    conv1: Conv2d,
    bn1: BatchNorm,
    conv2: Conv2d,
    bn2: BatchNorm,
}

impl DoubleConv {
    fn load(in_c: usize, mid_c: usize, out_c: usize, vb: VarBuilder) -> TriageResult<Self> {
        let cfg = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };
        // Sequential indices from the checkpoint: 0/3 convs, 1/4 batch norms.
        let vb = vb.pp("double_conv");
        let conv1 = conv2d_no_bias(in_c, mid_c, 3, cfg, vb.pp("0")).map_err(infer("conv1"))?;
        let bn1 = batch_norm(mid_c, 1e-5, vb.pp("1")).map_err(infer("bn1"))?;
        let conv2 = conv2d_no_bias(mid_c, out_c, 3, cfg, vb.pp("3")).map_err(infer("conv2"))?;
        let bn2 = batch_norm(out_c, 1e-5, vb.pp("4")).map_err(infer("bn2"))?;
        Ok(Self {
            conv1,
            bn1,
            conv2,
            bn2,
        })
    }

    fn forward(&self, x: &Tensor) -> TriageResult<Tensor> {
        let x = self
            .conv1
            .forward(x)
            .and_then(|x| self.bn1.forward_t(&x, false))
            .and_then(|x| x.relu())
            .map_err(infer("first conv block"))?;
        self.conv2
            .forward(&x)
            .and_then(|x| self.bn2.forward_t(&x, false))
            .and_then(|x| x.relu())
            .map_err(infer("second conv block"))
    }
}

/// Downscaling stage: 2×2 max pool then [`DoubleConv`].
#[derive(Debug)]
struct Down {
    conv: DoubleConv,
}

impl Down {
    fn load(in_c: usize, out_c: usize, vb: VarBuilder) -> TriageResult<Self> {
        // Index 0 in the checkpoint is the (parameterless) max pool.
        let conv = DoubleConv::load(in_c, out_c, out_c, vb.pp("maxpool_conv").pp("1"))?;
        Ok(Self { conv })
    }

    fn forward(&self, x: &Tensor) -> TriageResult<Tensor> {
        let pooled = x.max_pool2d(2).map_err(infer("max pool"))?;
        self.conv.forward(&pooled)
    }
}

/// Upscaling stage: transposed convolution, center-pad to the skip tensor's
/// size, channel-concatenate, then [`DoubleConv`].
#[derive(Debug)]
struct Up {
    up: ConvTranspose2d,
    conv: DoubleConv,
}

impl Up {
    fn load(in_c: usize, out_c: usize, vb: VarBuilder) -> TriageResult<Self> {
        let cfg = ConvTranspose2dConfig {
            stride: 2,
            ..Default::default()
        };
        let up = conv_transpose2d(in_c, in_c / 2, 2, cfg, vb.pp("up")).map_err(infer("up"))?;
        let conv = DoubleConv::load(in_c, out_c, out_c, vb.pp("conv"))?;
        Ok(Self { up, conv })
    }

    fn forward(&self, x: &Tensor, skip: &Tensor) -> TriageResult<Tensor> {
        let mut x = self.up.forward(x).map_err(infer("transposed conv"))?;

        // Center-pad when the upsampled size disagrees with the skip tensor
        // (happens for inputs not divisible by 16).
        let (_, _, h, w) = x.dims4().map_err(infer("up dims"))?;
        let (_, _, skip_h, skip_w) = skip.dims4().map_err(infer("skip dims"))?;
        let diff_h = skip_h.saturating_sub(h);
        let diff_w = skip_w.saturating_sub(w);
        if diff_w > 0 {
            x = x
                .pad_with_zeros(3, diff_w / 2, diff_w - diff_w / 2)
                .map_err(infer("pad width"))?;
        }
        if diff_h > 0 {
            x = x
                .pad_with_zeros(2, diff_h / 2, diff_h - diff_h / 2)
                .map_err(infer("pad height"))?;
        }

        let joined = Tensor::cat(&[skip, &x], 1).map_err(infer("skip concat"))?;
        self.conv.forward(&joined)
    }
}

/// U-Net: 4 downsampling stages and symmetric upsampling stages with skip
/// connections, producing a single-channel logit map.
#[derive(Debug)]
pub struct SegmentationModel {
    inc: DoubleConv,
    down1: Down,
    down2: Down,
    down3: Down,
    down4: Down,
    up1: Up,
    up2: Up,
    up3: Up,
    up4: Up,
    outc: Conv2d,
}

impl SegmentationModel {
    /// Builds the network and pulls weights from the given builder.
    pub fn load(vb: VarBuilder) -> TriageResult<Self> {
        Ok(Self {
            inc: DoubleConv::load(3, 64, 64, vb.pp("inc"))?,
            down1: Down::load(64, 128, vb.pp("down1"))?,
            down2: Down::load(128, 256, vb.pp("down2"))?,
            down3: Down::load(256, 512, vb.pp("down3"))?,
            down4: Down::load(512, 1024, vb.pp("down4"))?,
            up1: Up::load(1024, 512, vb.pp("up1"))?,
            up2: Up::load(512, 256, vb.pp("up2"))?,
            up3: Up::load(256, 128, vb.pp("up3"))?,
            up4: Up::load(128, 64, vb.pp("up4"))?,
            outc: conv2d(64, 1, 1, Conv2dConfig::default(), vb.pp("outc").pp("conv"))
                .map_err(infer("outc"))?,
        })
    }

    /// Forward pass producing a `(N, 1, H, W)` logit map.
    pub fn forward(&self, x: &Tensor) -> TriageResult<Tensor> {
        let x1 = self.inc.forward(x)?;
        let x2 = self.down1.forward(&x1)?;
        let x3 = self.down2.forward(&x2)?;
        let x4 = self.down3.forward(&x3)?;
        let x5 = self.down4.forward(&x4)?;
        let x = self.up1.forward(&x5, &x4)?;
        let x = self.up2.forward(&x, &x3)?;
        let x = self.up3.forward(&x, &x2)?;
        let x = self.up4.forward(&x, &x1)?;
        self.outc.forward(&x).map_err(infer("output conv"))
    }

    /// Segments the lung region: forward pass, sigmoid, threshold at 0.5.
    ///
    /// Weights are plain tensors, so no computation graph is recorded; batch
    /// norm always applies running statistics, making the output
    /// deterministic for identical input bytes.
    pub fn segment(&self, x: &Tensor) -> TriageResult<Mask> {
        let logits = self.forward(x)?;
        let probabilities = candle_nn::ops::sigmoid(&logits).map_err(infer("sigmoid"))?;
        let (plane, width, height) = crate::utils::plane_from_tensor(&probabilities)?;
        Ok(Mask::from_probabilities(&plane, width, height, MASK_THRESHOLD))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn zero_model() -> SegmentationModel {
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        SegmentationModel::load(vb).unwrap()
    }

    #[test]
    fn forward_keeps_input_resolution() {
        let model = zero_model();
        let x = Tensor::zeros((1, 3, 64, 64), DType::F32, &Device::Cpu).unwrap();
        let logits = model.forward(&x).unwrap();
        assert_eq!(logits.dims(), &[1, 1, 64, 64]);
    }

    #[test]
    fn zero_logits_threshold_to_an_empty_mask() {
        let model = zero_model();
        let x = Tensor::zeros((1, 3, 32, 32), DType::F32, &Device::Cpu).unwrap();
        let mask = model.segment(&x).unwrap();
        assert_eq!((mask.width(), mask.height()), (32, 32));
        // sigmoid(0) = 0.5 exactly, which is not strictly above the threshold.
        assert_eq!(mask.count_ones(), 0);
    }

    #[test]
    fn forward_handles_sizes_not_divisible_by_sixteen() {
        let model = zero_model();
        let x = Tensor::zeros((1, 3, 50, 50), DType::F32, &Device::Cpu).unwrap();
        let logits = model.forward(&x).unwrap();
        assert_eq!(logits.dims(), &[1, 1, 50, 50]);
    }
}

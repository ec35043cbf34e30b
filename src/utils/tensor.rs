//! Tensor helpers shared by the attribution engine and the compositor.

use crate::core::errors::{candle_processing, ProcessingStage, TriageResult};
use candle_core::Tensor;

/// Bilinear resize of a single-channel row-major plane.
///
/// Matches the usual align-corners=false sampling: source coordinates are
/// `(dst + 0.5) * scale - 0.5`, clamped to the plane.
pub fn resize_bilinear(
    data: &[f32],
    width: usize,
    height: usize,
    new_width: usize,
    new_height: usize,
) -> Vec<f32> {
    if width == new_width && height == new_height {
        return data.to_vec();
    }
    let mut out = Vec::with_capacity(new_width * new_height);
    let scale_x = width as f32 / new_width as f32;
    let scale_y = height as f32 / new_height as f32;
    for y in 0..new_height {
        let src_y = ((y as f32 + 0.5) * scale_y - 0.5).clamp(0.0, (height - 1) as f32);
        let y0 = src_y.floor() as usize;
        let y1 = (y0 + 1).min(height - 1);
        let wy = src_y - y0 as f32;
        for x in 0..new_width {
            let src_x = ((x as f32 + 0.5) * scale_x - 0.5).clamp(0.0, (width - 1) as f32);
            let x0 = src_x.floor() as usize;
            let x1 = (x0 + 1).min(width - 1);
            let wx = src_x - x0 as f32;

            let top = data[y0 * width + x0] * (1.0 - wx) + data[y0 * width + x1] * wx;
            let bottom = data[y1 * width + x0] * (1.0 - wx) + data[y1 * width + x1] * wx;
            out.push(top * (1.0 - wy) + bottom * wy);
        }
    }
    out
}

/// Bilinear resize of a `(1, C, H, W)` tensor's spatial dimensions, channel
/// by channel. Used when a captured gradient's spatial size disagrees with
/// its activation's.
pub fn resize_bilinear_chw(
    tensor: &Tensor,
    new_height: usize,
    new_width: usize,
) -> TriageResult<Tensor> {
    let err = |context: &str, e| candle_processing(ProcessingStage::Resize, context, e);
    let (n, channels, height, width) = tensor
        .dims4()
        .map_err(|e| err("resize expects a rank-4 tensor", e))?;
    let planes: Vec<Vec<Vec<f32>>> = tensor
        .to_dtype(candle_core::DType::F32)
        .and_then(|t| t.reshape((n * channels, height, width)))
        .and_then(|t| t.to_vec3())
        .map_err(|e| err("read tensor planes", e))?;

    let mut resized = Vec::with_capacity(n * channels * new_height * new_width);
    for plane in planes {
        let flat: Vec<f32> = plane.into_iter().flatten().collect();
        resized.extend(resize_bilinear(&flat, width, height, new_width, new_height));
    }
    Tensor::from_vec(resized, (n, channels, new_height, new_width), tensor.device())
        .map_err(|e| err("rebuild resized tensor", e))
}

/// Extracts a `(1, 1, H, W)` or `(H, W)` tensor as a row-major f32 plane.
pub fn plane_from_tensor(tensor: &Tensor) -> TriageResult<(Vec<f32>, usize, usize)> {
    let err = |context: &str, e| {
        candle_processing(ProcessingStage::TensorOperation, context, e)
    };
    let squeezed = tensor
        .squeeze(0)
        .and_then(|t| t.squeeze(0))
        .unwrap_or_else(|_| tensor.clone());
    let (height, width) = squeezed
        .dims2()
        .map_err(|e| err("expected a single-channel map", e))?;
    let rows: Vec<Vec<f32>> = squeezed
        .to_dtype(candle_core::DType::F32)
        .and_then(|t| t.to_vec2())
        .map_err(|e| err("read map values", e))?;
    Ok((rows.into_iter().flatten().collect(), width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn identity_resize_is_a_copy() {
        let data = [0.0, 1.0, 2.0, 3.0];
        assert_eq!(resize_bilinear(&data, 2, 2, 2, 2), data.to_vec());
    }

    #[test]
    fn upsample_interpolates_between_corners() {
        let data = [0.0, 1.0];
        let out = resize_bilinear(&data, 2, 1, 4, 1);
        assert_eq!(out.len(), 4);
        // Monotonic left-to-right ramp, endpoints clamped to source values.
        for pair in out.windows(2) {
            assert!(pair[0] <= pair[1] + 1e-6);
        }
        assert!((out[0] - 0.0).abs() < 0.26);
        assert!((out[3] - 1.0).abs() < 0.26);
    }

    #[test]
    fn constant_plane_stays_constant() {
        let data = vec![0.7; 9];
        let out = resize_bilinear(&data, 3, 3, 7, 5);
        assert!(out.iter().all(|v| (v - 0.7).abs() < 1e-6));
    }

    #[test]
    fn chw_resize_changes_spatial_dims_only() {
        let tensor = Tensor::zeros((1, 4, 3, 3), candle_core::DType::F32, &Device::Cpu).unwrap();
        let resized = resize_bilinear_chw(&tensor, 7, 7).unwrap();
        assert_eq!(resized.dims(), &[1, 4, 7, 7]);
    }

    #[test]
    fn plane_extraction_flattens_row_major() {
        let tensor =
            Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], (1, 1, 2, 2), &Device::Cpu).unwrap();
        let (plane, width, height) = plane_from_tensor(&tensor).unwrap();
        assert_eq!((width, height), (2, 2));
        assert_eq!(plane, vec![1.0, 2.0, 3.0, 4.0]);
    }
}

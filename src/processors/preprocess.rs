//! Deterministic image-to-tensor conversion for the two consumption modes.
//!
//! Both modes resize to 224×224 and apply the same ImageNet per-channel
//! normalization; the classification mode re-decodes the *original* image
//! and multiplies by the lung mask before normalizing, so the classifier
//! sees masked true pixel values rather than the already-normalized
//! segmentation input.

use crate::core::errors::{candle_processing, ProcessingStage, TriageResult};
use crate::domain::Mask;
use crate::models::INPUT_SIZE;
use crate::utils::{load_image, resize_exact};
use candle_core::{Device, Tensor};
use image::RgbImage;
use std::path::Path;

/// Per-channel normalization mean (ImageNet statistics).
pub const NORMALIZE_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// Per-channel normalization standard deviation (ImageNet statistics).
pub const NORMALIZE_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Converts radiographs into normalized input tensors.
#[derive(Debug, Default)]
pub struct Preprocessor;

impl Preprocessor {
    /// Creates a preprocessor with the fixed resize/normalization policy.
    pub fn new() -> Self {
        Self
    }

    /// Prepares an image for the segmentation model: decode, resize to
    /// 224×224, scale to `[0,1]`, normalize, add a batch dimension.
    ///
    /// # Errors
    ///
    /// [`crate::core::TriageError::ImageDecode`] if the file cannot be
    /// decoded.
    pub fn prepare_for_segmentation(&self, path: &Path, device: &Device) -> TriageResult<Tensor> {
        let img = load_image(path)?;
        let resized = resize_exact(&img, INPUT_SIZE as u32, INPUT_SIZE as u32);
        self.to_tensor(&resized, None, device)
    }

    /// Prepares an image for the classification model: independently
    /// re-decode the original, resize, zero non-lung pixels via the mask,
    /// then apply the same normalization.
    pub fn prepare_for_classification(
        &self,
        path: &Path,
        mask: &Mask,
        device: &Device,
    ) -> TriageResult<Tensor> {
        let img = load_image(path)?;
        let resized = resize_exact(&img, INPUT_SIZE as u32, INPUT_SIZE as u32);
        let mask = mask.resize_nearest(INPUT_SIZE, INPUT_SIZE);
        self.to_tensor(&resized, Some(&mask), device)
    }

    /// Converts a 224×224 RGB image to a normalized `(1, 3, 224, 224)`
    /// tensor, optionally multiplying pixels by a mask before normalizing.
    fn to_tensor(
        &self,
        img: &RgbImage,
        mask: Option<&Mask>,
        device: &Device,
    ) -> TriageResult<Tensor> {
        let (width, height) = (img.width() as usize, img.height() as usize);
        let mut data = vec![0f32; 3 * height * width];
        for (y, row) in img.rows().enumerate() {
            for (x, pixel) in row.enumerate() {
                let keep = mask.map_or(true, |m| m.get(x, y));
                for c in 0..3 {
                    let value = if keep {
                        pixel.0[c] as f32 / 255.0
                    } else {
                        0.0
                    };
                    data[c * height * width + y * width + x] =
                        (value - NORMALIZE_MEAN[c]) / NORMALIZE_STD[c];
                }
            }
        }
        Tensor::from_vec(data, (1, 3, height, width), device)
            .map_err(|e| candle_processing(ProcessingStage::Normalization, "image to tensor", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn write_png(dir: &Path, name: &str, img: &RgbImage) -> std::path::PathBuf {
        let path = dir.join(name);
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn segmentation_tensor_shape_and_black_pixel_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "black.png", &RgbImage::new(64, 64));

        let tensor = Preprocessor::new()
            .prepare_for_segmentation(&path, &Device::Cpu)
            .unwrap();
        assert_eq!(tensor.dims(), &[1, 3, INPUT_SIZE, INPUT_SIZE]);

        // A black pixel normalizes to -mean/std per channel.
        let values: Vec<f32> = tensor.flatten_all().unwrap().to_vec1().unwrap();
        for c in 0..3 {
            let expected = -NORMALIZE_MEAN[c] / NORMALIZE_STD[c];
            let got = values[c * INPUT_SIZE * INPUT_SIZE];
            assert!((got - expected).abs() < 1e-5, "channel {c}: {got} vs {expected}");
        }
    }

    #[test]
    fn classification_mask_zeroes_non_lung_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let mut img = RgbImage::new(INPUT_SIZE as u32, INPUT_SIZE as u32);
        for pixel in img.pixels_mut() {
            *pixel = Rgb([255, 255, 255]);
        }
        let path = write_png(dir.path(), "white.png", &img);

        // Mask covering nothing: every pixel is zeroed before normalization.
        let empty = Mask::from_probabilities(
            &vec![0.0; INPUT_SIZE * INPUT_SIZE],
            INPUT_SIZE,
            INPUT_SIZE,
            0.5,
        );
        let tensor = Preprocessor::new()
            .prepare_for_classification(&path, &empty, &Device::Cpu)
            .unwrap();
        let values: Vec<f32> = tensor.flatten_all().unwrap().to_vec1().unwrap();
        let expected = -NORMALIZE_MEAN[0] / NORMALIZE_STD[0];
        assert!((values[0] - expected).abs() < 1e-5);

        // Mask covering everything: white stays white.
        let full = Mask::from_probabilities(
            &vec![1.0; INPUT_SIZE * INPUT_SIZE],
            INPUT_SIZE,
            INPUT_SIZE,
            0.5,
        );
        let tensor = Preprocessor::new()
            .prepare_for_classification(&path, &full, &Device::Cpu)
            .unwrap();
        let values: Vec<f32> = tensor.flatten_all().unwrap().to_vec1().unwrap();
        let expected = (1.0 - NORMALIZE_MEAN[0]) / NORMALIZE_STD[0];
        assert!((values[0] - expected).abs() < 1e-5);
    }

    #[test]
    fn missing_file_is_a_decode_error() {
        let err = Preprocessor::new()
            .prepare_for_segmentation(Path::new("/nonexistent/scan.png"), &Device::Cpu)
            .unwrap_err();
        assert!(matches!(err, crate::core::TriageError::ImageDecode(_)));
    }
}

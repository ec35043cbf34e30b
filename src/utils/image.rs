//! Utility functions for image loading and resizing.

use crate::core::errors::{TriageError, TriageResult};
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use std::path::Path;

/// Loads an image from a file path and converts it to an [`RgbImage`].
///
/// Any format supported by the `image` crate is accepted; grayscale
/// radiographs are expanded to three channels.
///
/// # Errors
///
/// Returns [`TriageError::ImageDecode`] if the file cannot be opened or
/// decoded.
pub fn load_image(path: &Path) -> TriageResult<RgbImage> {
    let img = image::open(path).map_err(TriageError::ImageDecode)?;
    Ok(dynamic_to_rgb(img))
}

/// Converts a [`DynamicImage`] to an [`RgbImage`].
pub fn dynamic_to_rgb(img: DynamicImage) -> RgbImage {
    img.to_rgb8()
}

/// Resizes an image to exactly `width`×`height` with bilinear filtering,
/// ignoring the aspect ratio.
pub fn resize_exact(img: &RgbImage, width: u32, height: u32) -> RgbImage {
    if img.width() == width && img.height() == height {
        return img.clone();
    }
    image::imageops::resize(img, width, height, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_hits_exact_dimensions() {
        let img = RgbImage::new(100, 50);
        let resized = resize_exact(&img, 224, 224);
        assert_eq!(resized.dimensions(), (224, 224));
    }

    #[test]
    fn load_rejects_non_image_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not_an_image.png");
        std::fs::write(&path, b"definitely not a png").unwrap();
        let err = load_image(&path).unwrap_err();
        assert!(matches!(err, TriageError::ImageDecode(_)));
    }

    #[test]
    fn load_roundtrips_a_saved_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gray.png");
        image::GrayImage::new(32, 32).save(&path).unwrap();
        let img = load_image(&path).unwrap();
        assert_eq!(img.dimensions(), (32, 32));
    }
}

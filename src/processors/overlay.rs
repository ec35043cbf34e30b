//! Heatmap rendering and image composition.
//!
//! Turns a normalized attribution map into a jet-colored heatmap, blends it
//! over the resized source radiograph, restricts the blend to the lung mask,
//! and writes the result as a PNG under the configured storage root.

use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use tracing::debug;

use crate::core::errors::{TriageError, TriageResult};
use crate::domain::Mask;
use crate::processors::attribution::AttributionMap;
use crate::utils::resize_bilinear;

/// Source-image weight in the blend; the heatmap gets the remainder.
const IMAGE_WEIGHT: f32 = 0.6;
const HEATMAP_WEIGHT: f32 = 1.0 - IMAGE_WEIGHT;

/// Renders attribution overlays and persists them to disk.
#[derive(Debug, Default)]
pub struct Compositor;

impl Compositor {
    pub fn new() -> Self {
        Self
    }

    /// Blends `map` over `source`, keeps blended pixels only inside the lung
    /// mask, and writes the result as a PNG at `output_path`.
    ///
    /// The map and mask are resampled to the source image's dimensions
    /// first (bilinear for the map, nearest for the mask). Parent
    /// directories are created as needed. Returns the written path.
    pub fn render(
        &self,
        source: &RgbImage,
        map: &AttributionMap,
        mask: &Mask,
        output_path: &Path,
    ) -> TriageResult<PathBuf> {
        let (width, height) = (source.width(), source.height());

        let plane = if (map.width as u32, map.height as u32) == (width, height) {
            map.data.clone()
        } else {
            resize_bilinear(
                &map.data,
                map.width,
                map.height,
                width as usize,
                height as usize,
            )
        };
        let mask = mask.resize_nearest(width as usize, height as usize);

        let mut out = source.clone();
        for (y, row) in plane.chunks_exact(width as usize).enumerate() {
            for (x, &value) in row.iter().enumerate() {
                if !mask.get(x, y) {
                    continue;
                }
                let heat = jet_color(value);
                let pixel = out.get_pixel_mut(x as u32, y as u32);
                for c in 0..3 {
                    let blended =
                        pixel.0[c] as f32 * IMAGE_WEIGHT + heat.0[c] as f32 * HEATMAP_WEIGHT;
                    pixel.0[c] = blended.round().clamp(0.0, 255.0) as u8;
                }
            }
        }

        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        out.save(output_path)
            .map_err(|e| TriageError::overlay("write overlay image", e))?;
        debug!(path = %output_path.display(), "overlay written");
        Ok(output_path.to_path_buf())
    }
}

/// Maps a normalized value through the jet colormap (blue → cyan → yellow
/// → red), matching the palette radiologist-facing tools conventionally use.
fn jet_color(value: f32) -> Rgb<u8> {
    let v = value.clamp(0.0, 1.0) * 4.0;
    let channel = |x: f32| (x.clamp(0.0, 1.0) * 255.0).round() as u8;
    let (r, g, b) = if v < 1.0 {
        (0.0, v, 1.0)
    } else if v < 2.0 {
        (0.0, 1.0, 2.0 - v)
    } else if v < 3.0 {
        (v - 2.0, 1.0, 0.0)
    } else {
        (1.0, 4.0 - v, 0.0)
    };
    Rgb([channel(r), channel(g), channel(b)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn full_mask(width: usize, height: usize) -> Mask {
        Mask::from_probabilities(&vec![1.0; width * height], width, height, 0.5)
    }

    fn flat_map(value: f32, side: usize) -> AttributionMap {
        AttributionMap {
            data: vec![value; side * side],
            width: side,
            height: side,
        }
    }

    #[test]
    fn jet_endpoints_are_blue_and_red() {
        assert_eq!(jet_color(0.0), Rgb([0, 0, 255]));
        assert_eq!(jet_color(1.0), Rgb([255, 0, 0]));
        // Out-of-range inputs clamp instead of wrapping.
        assert_eq!(jet_color(-3.0), Rgb([0, 0, 255]));
        assert_eq!(jet_color(5.0), Rgb([255, 0, 0]));
    }

    #[test]
    fn jet_midpoint_is_green() {
        assert_eq!(jet_color(0.5), Rgb([0, 255, 0]));
    }

    #[test]
    fn render_blends_only_inside_the_mask() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("overlay.png");
        let source = RgbImage::from_pixel(4, 4, Rgb([100, 100, 100]));

        // Mask covers the left half only.
        let mut probs = vec![0.0; 16];
        for y in 0..4 {
            probs[y * 4] = 1.0;
            probs[y * 4 + 1] = 1.0;
        }
        let mask = Mask::from_probabilities(&probs, 4, 4, 0.5);

        let out_path = Compositor::new()
            .render(&source, &flat_map(1.0, 4), &mask, &path)
            .unwrap();
        let written = image::open(&out_path).unwrap().to_rgb8();

        // Inside the mask: 0.6*100 + 0.4*255 red.
        assert_eq!(written.get_pixel(0, 0), &Rgb([162, 60, 60]));
        // Outside the mask the source pixel is untouched.
        assert_eq!(written.get_pixel(3, 0), &Rgb([100, 100, 100]));
    }

    #[test]
    fn render_creates_missing_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("static").join("gradcam").join("map.png");
        let source = RgbImage::from_pixel(8, 8, Rgb([0, 0, 0]));

        let out = Compositor::new()
            .render(&source, &flat_map(0.5, 8), &full_mask(8, 8), &path)
            .unwrap();
        assert!(out.exists());
    }

    #[test]
    fn render_resamples_map_and_mask_to_image_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("resized.png");
        let source = RgbImage::from_pixel(224, 224, Rgb([50, 50, 50]));

        // 7x7 map and 16x16 mask, as the models actually emit.
        let map = flat_map(1.0, 7);
        let mask = full_mask(16, 16);

        Compositor::new().render(&source, &map, &mask, &path).unwrap();
        let written = image::open(&path).unwrap().to_rgb8();
        assert_eq!(written.dimensions(), (224, 224));
        assert_eq!(written.get_pixel(112, 112), &Rgb([132, 30, 30]));
    }
}

//! Binary lung mask produced by the segmentation model.

/// A single-channel boolean mask at image resolution.
///
/// Derived once per inference by thresholding the segmentation model's
/// sigmoid output at 0.5; consumed by classification preprocessing (zeroing
/// non-lung pixels) and by the compositor (restricting the overlay region).
/// It lives only for the duration of one inference call.
#[derive(Debug, Clone)]
pub struct Mask {
    width: usize,
    height: usize,
    data: Vec<bool>,
}

impl Mask {
    /// Builds a mask by thresholding per-pixel probabilities (row-major).
    ///
    /// Thresholding is strict (`p > threshold`), so it is monotonic in the
    /// pre-sigmoid logit: raising a logit never turns a true pixel false.
    pub fn from_probabilities(
        probabilities: &[f32],
        width: usize,
        height: usize,
        threshold: f32,
    ) -> Self {
        debug_assert_eq!(probabilities.len(), width * height);
        Self {
            width,
            height,
            data: probabilities.iter().map(|&p| p > threshold).collect(),
        }
    }

    /// Mask width in pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Mask height in pixels.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Whether the pixel at `(x, y)` belongs to the lung region.
    pub fn get(&self, x: usize, y: usize) -> bool {
        self.data[y * self.width + x]
    }

    /// Number of lung pixels.
    pub fn count_ones(&self) -> usize {
        self.data.iter().filter(|&&b| b).count()
    }

    /// Nearest-neighbor resize to the given dimensions.
    pub fn resize_nearest(&self, new_width: usize, new_height: usize) -> Mask {
        if new_width == self.width && new_height == self.height {
            return self.clone();
        }
        let mut data = Vec::with_capacity(new_width * new_height);
        for y in 0..new_height {
            let src_y = (y * self.height / new_height).min(self.height - 1);
            for x in 0..new_width {
                let src_x = (x * self.width / new_width).min(self.width - 1);
                data.push(self.data[src_y * self.width + src_x]);
            }
        }
        Mask {
            width: new_width,
            height: new_height,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholding_is_binary_and_monotonic() {
        let probs = [0.0, 0.4999, 0.5, 0.5001, 1.0, 0.7];
        let mask = Mask::from_probabilities(&probs, 3, 2, 0.5);
        assert!(!mask.get(0, 0));
        assert!(!mask.get(1, 0));
        assert!(!mask.get(2, 0)); // strict: 0.5 is not > 0.5
        assert!(mask.get(0, 1));
        assert!(mask.get(1, 1));
        assert_eq!(mask.count_ones(), 3);

        // Increasing any probability never flips a true pixel to false.
        let bumped: Vec<f32> = probs.iter().map(|p| (p + 0.1).min(1.0)).collect();
        let bumped_mask = Mask::from_probabilities(&bumped, 3, 2, 0.5);
        for y in 0..2 {
            for x in 0..3 {
                assert!(!mask.get(x, y) || bumped_mask.get(x, y));
            }
        }
    }

    #[test]
    fn nearest_resize_preserves_regions() {
        let mask = Mask::from_probabilities(&[1.0, 0.0, 1.0, 0.0], 2, 2, 0.5);
        let big = mask.resize_nearest(4, 4);
        assert_eq!(big.width(), 4);
        assert!(big.get(0, 0) && big.get(1, 0));
        assert!(!big.get(2, 0) && !big.get(3, 0));
    }
}

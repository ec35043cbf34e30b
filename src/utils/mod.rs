//! Utility functions for images and tensors.

pub mod image;
pub mod tensor;

pub use image::{load_image, resize_exact};
pub use tensor::{plane_from_tensor, resize_bilinear, resize_bilinear_chw};

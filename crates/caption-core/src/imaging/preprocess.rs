//! Image normalisation ahead of inference.

use image::imageops::FilterType;
use image::DynamicImage;
use tracing::info;

use crate::config::DEFAULT_MAX_DIMENSION;
use crate::imaging::{Image, ImageDimensions};

/// Normalises an image before it reaches the model.
///
/// Infallible: on any internal problem the input is returned unchanged.
pub trait Preprocessor: Send + Sync {
    fn normalize(&self, image: Image) -> Image;
}

/// Converts to RGB and caps the longest side, keeping the aspect ratio.
#[derive(Debug, Clone)]
pub struct ResizePreprocessor {
    max_dimension: u32,
}

impl Default for ResizePreprocessor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DIMENSION)
    }
}

impl ResizePreprocessor {
    pub fn new(max_dimension: u32) -> Self {
        Self {
            max_dimension: max_dimension.max(1),
        }
    }

    pub fn max_dimension(&self) -> u32 {
        self.max_dimension
    }

    /// Size the image will have after normalisation.
    pub fn target_dimensions(&self, dims: ImageDimensions) -> ImageDimensions {
        let longest = dims.longest_side();
        if longest <= self.max_dimension {
            return dims;
        }
        let ratio = self.max_dimension as f64 / longest as f64;
        let scale = |side: u32| ((side as f64 * ratio) as u32).max(1);
        ImageDimensions::new(scale(dims.width), scale(dims.height))
    }
}

impl Preprocessor for ResizePreprocessor {
    fn normalize(&self, image: Image) -> Image {
        let format = image.format();
        let source = image.dimensions();
        let target = self.target_dimensions(source);

        if image.is_rgb8() && target == source {
            return image;
        }

        let mut pixels = DynamicImage::ImageRgb8(image.pixels().to_rgb8());
        if target != source {
            pixels = pixels.resize_exact(target.width, target.height, FilterType::Lanczos3);
            info!(from = %source, to = %target, "image resized for processing");
        }

        let normalized = Image::new(pixels);
        match format {
            Some(format) => normalized.with_format(format),
            None => normalized,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_rgb_image_passes_through() {
        let pre = ResizePreprocessor::default();
        let image = Image::new(DynamicImage::new_rgb8(320, 200));
        let out = pre.normalize(image);
        assert_eq!(out.dimensions(), ImageDimensions::new(320, 200));
    }

    #[test]
    fn test_non_rgb_is_converted() {
        let pre = ResizePreprocessor::default();
        let out = pre.normalize(Image::new(DynamicImage::new_luma8(10, 10)));
        assert!(out.is_rgb8());
        assert_eq!(out.dimensions(), ImageDimensions::new(10, 10));
    }

    #[test]
    fn test_large_image_scaled_to_longest_side() {
        let pre = ResizePreprocessor::new(100);
        let out = pre.normalize(Image::new(DynamicImage::new_rgb8(400, 200)));
        assert_eq!(out.dimensions(), ImageDimensions::new(100, 50));
    }

    #[test]
    fn test_target_never_collapses_to_zero() {
        let pre = ResizePreprocessor::new(10);
        let target = pre.target_dimensions(ImageDimensions::new(5000, 2));
        assert_eq!(target, ImageDimensions::new(10, 1));
    }
}

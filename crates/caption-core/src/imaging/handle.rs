//! Decoded image handle shared between pipeline stages.

use std::fmt;
use std::sync::Arc;

use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

impl ImageDimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn longest_side(&self) -> u32 {
        self.width.max(self.height)
    }
}

impl fmt::Display for ImageDimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Basic description of an image, for display and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub color: String,
    pub format: Option<String>,
}

/// Decoded image. Pixel data is reference counted, so clones are cheap.
#[derive(Clone)]
pub struct Image {
    pixels: Arc<DynamicImage>,
    format: Option<ImageFormat>,
}

impl Image {
    pub fn new(pixels: DynamicImage) -> Self {
        Self {
            pixels: Arc::new(pixels),
            format: None,
        }
    }

    /// Remember the container format the image was decoded from.
    pub fn with_format(mut self, format: ImageFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn dimensions(&self) -> ImageDimensions {
        ImageDimensions::new(self.pixels.width(), self.pixels.height())
    }

    pub fn pixels(&self) -> &DynamicImage {
        &self.pixels
    }

    pub fn format(&self) -> Option<ImageFormat> {
        self.format
    }

    pub fn is_rgb8(&self) -> bool {
        matches!(*self.pixels, DynamicImage::ImageRgb8(_))
    }

    pub fn info(&self) -> ImageInfo {
        let dims = self.dimensions();
        ImageInfo {
            width: dims.width,
            height: dims.height,
            color: format!("{:?}", self.pixels.color()),
            format: self.format.map(|f| format!("{f:?}")),
        }
    }
}

impl From<DynamicImage> for Image {
    fn from(pixels: DynamicImage) -> Self {
        Self::new(pixels)
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("dimensions", &self.dimensions())
            .field("color", &self.pixels.color())
            .field("format", &self.format)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimensions_and_info() {
        let image = Image::new(DynamicImage::new_rgb8(640, 480)).with_format(ImageFormat::Png);
        assert_eq!(image.dimensions(), ImageDimensions::new(640, 480));
        assert_eq!(image.dimensions().longest_side(), 640);
        assert_eq!(image.dimensions().to_string(), "640x480");

        let info = image.info();
        assert_eq!(info.width, 640);
        assert_eq!(info.format.as_deref(), Some("Png"));
        assert!(image.is_rgb8());
    }

    #[test]
    fn test_clone_shares_pixels() {
        let image = Image::new(DynamicImage::new_luma8(4, 4));
        let copy = image.clone();
        assert!(Arc::ptr_eq(&image.pixels, &copy.pixels));
        assert!(!copy.is_rgb8());
    }
}

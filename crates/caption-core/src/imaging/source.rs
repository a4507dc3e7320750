//! Validated image loading from files and in-memory uploads.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::ImageReader;
use tracing::debug;

use crate::config::DEFAULT_MAX_UPLOAD_BYTES;
use crate::error::{CaptionError, CaptionResult};
use crate::imaging::Image;

/// File extensions accepted by [`FileImageSource`].
pub const SUPPORTED_FORMATS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp"];

/// Where an image comes from.
#[derive(Debug, Clone)]
pub enum ImageRef {
    Path(PathBuf),
    /// Bytes received from a front-end upload, with the original file name.
    Upload { name: String, bytes: Vec<u8> },
}

impl ImageRef {
    pub fn name(&self) -> String {
        match self {
            ImageRef::Path(path) => path.display().to_string(),
            ImageRef::Upload { name, .. } => name.clone(),
        }
    }
}

/// Retrieves and decodes images for the workflow.
pub trait ImageSource: Send + Sync {
    fn load(&self, reference: &ImageRef) -> CaptionResult<Image>;
}

/// Loads images from disk or upload buffers after checking format and size.
#[derive(Debug, Clone)]
pub struct FileImageSource {
    max_bytes: u64,
}

impl Default for FileImageSource {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_UPLOAD_BYTES)
    }
}

impl FileImageSource {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }

    /// `true` when the file name carries a supported extension.
    pub fn is_supported_format(name: &str) -> bool {
        Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                SUPPORTED_FORMATS.contains(&ext.as_str())
            })
            .unwrap_or(false)
    }

    fn check_size(&self, size: u64) -> CaptionResult<()> {
        if size > self.max_bytes {
            return Err(CaptionError::ImageLoad(format!(
                "file too large: {size} bytes (maximum {} MB)",
                self.max_bytes / (1024 * 1024)
            )));
        }
        Ok(())
    }

    fn decode(bytes: &[u8]) -> CaptionResult<Image> {
        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| CaptionError::ImageLoad(format!("cannot read image: {e}")))?;
        let format = reader.format();
        let decoded = reader
            .decode()
            .map_err(|e| CaptionError::ImageLoad(format!("cannot decode image: {e}")))?;

        let image = Image::new(image::DynamicImage::ImageRgb8(decoded.to_rgb8()));
        Ok(match format {
            Some(format) => image.with_format(format),
            None => image,
        })
    }
}

impl ImageSource for FileImageSource {
    fn load(&self, reference: &ImageRef) -> CaptionResult<Image> {
        let name = reference.name();
        if name.trim().is_empty() {
            return Err(CaptionError::ImageLoad("no file provided".to_string()));
        }
        if !Self::is_supported_format(&name) {
            return Err(CaptionError::ImageLoad(format!(
                "unsupported file format; supported formats: {}",
                SUPPORTED_FORMATS.join(", ")
            )));
        }

        let image = match reference {
            ImageRef::Path(path) => {
                let meta = std::fs::metadata(path)
                    .map_err(|e| CaptionError::ImageLoad(format!("{}: {e}", path.display())))?;
                self.check_size(meta.len())?;
                let bytes = std::fs::read(path)
                    .map_err(|e| CaptionError::ImageLoad(format!("{}: {e}", path.display())))?;
                Self::decode(&bytes)?
            }
            ImageRef::Upload { bytes, .. } => {
                self.check_size(bytes.len() as u64)?;
                Self::decode(bytes)?
            }
        };

        debug!(source = %name, dimensions = %image.dimensions(), "image loaded");
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::new_rgba8(width, height)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_supported_format_check_is_case_insensitive() {
        assert!(FileImageSource::is_supported_format("cat.PNG"));
        assert!(FileImageSource::is_supported_format("dir/dog.jpeg"));
        assert!(!FileImageSource::is_supported_format("notes.txt"));
        assert!(!FileImageSource::is_supported_format("no_extension"));
    }

    #[test]
    fn test_upload_is_decoded_to_rgb() {
        let source = FileImageSource::default();
        let image = source
            .load(&ImageRef::Upload {
                name: "upload.png".to_string(),
                bytes: png_bytes(8, 6),
            })
            .unwrap();
        assert!(image.is_rgb8());
        assert_eq!(image.dimensions().width, 8);
        assert_eq!(image.format(), Some(ImageFormat::Png));
    }

    #[test]
    fn test_oversized_upload_rejected() {
        let source = FileImageSource::new(16);
        let err = source
            .load(&ImageRef::Upload {
                name: "big.png".to_string(),
                bytes: png_bytes(8, 8),
            })
            .unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_unsupported_extension_rejected_before_decoding() {
        let source = FileImageSource::default();
        let err = source
            .load(&ImageRef::Upload {
                name: "animation.webm".to_string(),
                bytes: vec![0, 1, 2],
            })
            .unwrap_err();
        assert!(matches!(err, CaptionError::ImageLoad(_)));
        assert!(err.to_string().contains("png, jpg, jpeg, gif, bmp"));
    }

    #[test]
    fn test_garbage_bytes_fail_to_decode() {
        let source = FileImageSource::default();
        let err = source
            .load(&ImageRef::Upload {
                name: "broken.png".to_string(),
                bytes: b"definitely not a png".to_vec(),
            })
            .unwrap_err();
        assert!(matches!(err, CaptionError::ImageLoad(_)));
    }

    #[test]
    fn test_loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        std::fs::write(&path, png_bytes(3, 5)).unwrap();

        let image = FileImageSource::default()
            .load(&ImageRef::Path(path))
            .unwrap();
        assert_eq!(image.dimensions().height, 5);
    }
}

//! Image seams consumed by the workflow.
//!
//! - [`Image`]: cheaply clonable decoded image
//! - [`ImageSource`] / [`FileImageSource`]: validated loading from disk or uploads
//! - [`Preprocessor`] / [`ResizePreprocessor`]: best-effort normalisation before inference

pub mod handle;
pub mod preprocess;
pub mod source;

pub use handle::{Image, ImageDimensions, ImageInfo};
pub use preprocess::{Preprocessor, ResizePreprocessor};
pub use source::{FileImageSource, ImageRef, ImageSource, SUPPORTED_FORMATS};

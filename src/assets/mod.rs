//! Archive extraction and image decoding.

pub mod decode;
pub mod extract;

pub use decode::{Bitmap, decode_image};
pub use extract::{Extraction, ResourceExtractor, is_populated};

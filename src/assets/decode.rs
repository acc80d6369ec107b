use std::sync::{Arc, OnceLock};

use anyhow::Context;

use crate::foundation::core::PixelSize;
use crate::foundation::error::{SvgaError, SvgaResult};

/// Decoded image, premultiplied RGBA8, ready to be wrapped in a pixmap.
#[derive(Clone)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub rgba8_premul: Arc<Vec<u8>>,
    /// Rasterizer paint built on first draw and shared by clones.
    pub(crate) paint: Arc<OnceLock<vello_cpu::Image>>,
}

impl std::fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bitmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.rgba8_premul.len())
            .finish()
    }
}

impl PartialEq for Bitmap {
    fn eq(&self, other: &Self) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.rgba8_premul == other.rgba8_premul
    }
}

impl Eq for Bitmap {}

impl Bitmap {
    /// Build a bitmap from straight-alpha RGBA8 pixels.
    pub fn from_rgba8(width: u32, height: u32, mut rgba8: Vec<u8>) -> SvgaResult<Self> {
        if rgba8.len() != PixelSize::new(width, height)?.rgba8_len() {
            return Err(SvgaError::validation(format!(
                "rgba8 buffer of {} bytes does not match {width}x{height}",
                rgba8.len()
            )));
        }
        premultiply_rgba8_in_place(&mut rgba8);
        Ok(Self::from_premul(width, height, rgba8))
    }

    pub(crate) fn from_premul(width: u32, height: u32, rgba8_premul: Vec<u8>) -> Self {
        Self {
            width,
            height,
            rgba8_premul: Arc::new(rgba8_premul),
            paint: Arc::new(OnceLock::new()),
        }
    }

    /// Bytes held by the pixel buffer; this is what caches weigh.
    pub fn byte_len(&self) -> usize {
        self.rgba8_premul.len()
    }
}

/// Decode PNG/JPEG/WebP bytes, optionally downsampling towards `target`.
pub fn decode_image(bytes: &[u8], target: Option<PixelSize>) -> SvgaResult<Bitmap> {
    let mut dyn_img = image::load_from_memory(bytes).context("decode image from memory")?;

    if let Some(target) = target {
        let sample = sample_size(dyn_img.width(), dyn_img.height(), target);
        if sample > 1 {
            let (w, h) = (
                (dyn_img.width() / sample).max(1),
                (dyn_img.height() / sample).max(1),
            );
            dyn_img = dyn_img.resize_exact(w, h, image::imageops::FilterType::Triangle);
        }
    }

    let rgba = dyn_img.to_rgba8();
    let (width, height) = rgba.dimensions();
    PixelSize::new(width, height)?;

    let mut rgba8_premul = rgba.into_raw();
    premultiply_rgba8_in_place(&mut rgba8_premul);

    Ok(Bitmap::from_premul(width, height, rgba8_premul))
}

/// Largest power-of-two divisor that keeps both halves of the image at or above `target`.
pub fn sample_size(width: u32, height: u32, target: PixelSize) -> u32 {
    let (half_w, half_h) = (width / 2, height / 2);
    let mut sample = 1u32;
    while half_w / sample >= target.width && half_h / sample >= target.height {
        sample *= 2;
    }
    sample
}

pub(crate) fn premultiply_rgba8_in_place(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        let a = px[3] as u16;
        if a == 0 {
            px[0] = 0;
            px[1] = 0;
            px[2] = 0;
            continue;
        }
        px[0] = ((px[0] as u16 * a + 127) / 255) as u8;
        px[1] = ((px[1] as u16 * a + 127) / 255) as u8;
        px[2] = ((px[2] as u16 * a + 127) / 255) as u8;
    }
}

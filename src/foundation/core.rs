use crate::foundation::error::{SvgaError, SvgaResult};

pub use kurbo::{Affine, BezPath, Point, Rect, Vec2};

/// Native canvas size of a movie, in movie units.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ViewBox {
    /// Width in movie units.
    pub width: f64,
    /// Height in movie units.
    pub height: f64,
}

impl ViewBox {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Return `true` when either side is zero, negative or not finite.
    pub fn is_degenerate(self) -> bool {
        !(self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0)
    }
}

/// Pixel dimensions of a render target.
///
/// Sides are limited to `u16::MAX` because the CPU rasterizer addresses pixmaps with 16-bit
/// coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct PixelSize {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl PixelSize {
    /// Create a validated size with both sides in `1..=u16::MAX`.
    pub fn new(width: u32, height: u32) -> SvgaResult<Self> {
        if width == 0 || height == 0 {
            return Err(SvgaError::validation("pixel size must be non-zero"));
        }
        if width > u32::from(u16::MAX) || height > u32::from(u16::MAX) {
            return Err(SvgaError::validation(format!(
                "pixel size {width}x{height} exceeds {}",
                u16::MAX
            )));
        }
        Ok(Self { width, height })
    }

    /// Re-check a size built from its fields or deserialized, with the bounds of [`new`](Self::new).
    pub fn validated(self) -> SvgaResult<Self> {
        Self::new(self.width, self.height)
    }

    /// Sides as the rasterizer's 16-bit pixmap dimensions.
    pub fn to_u16(self) -> SvgaResult<(u16, u16)> {
        let size = self.validated()?;
        match (u16::try_from(size.width), u16::try_from(size.height)) {
            (Ok(w), Ok(h)) => Ok((w, h)),
            _ => Err(SvgaError::validation(format!(
                "pixel size {}x{} exceeds {}",
                size.width,
                size.height,
                u16::MAX
            ))),
        }
    }

    /// Bytes needed for a tightly packed RGBA8 buffer of this size.
    pub fn rgba8_len(self) -> usize {
        (self.width as usize)
            .saturating_mul(self.height as usize)
            .saturating_mul(4)
    }
}

/// Straight-alpha RGBA8 color.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Rgba8 {
    /// Red channel.
    pub r: u8,
    /// Green channel.
    pub g: u8,
    /// Blue channel.
    pub b: u8,
    /// Alpha channel.
    pub a: u8,
}

impl Rgba8 {
    /// Fully transparent black.
    pub fn transparent() -> Self {
        Self::default()
    }

    /// Convert unit-range float channels (as stored in SVGA shape styles) to RGBA8.
    ///
    /// Channels are clamped to `[0, 1]`; non-finite values map to 0.
    pub fn from_unit(r: f32, g: f32, b: f32, a: f32) -> Self {
        fn q(v: f32) -> u8 {
            if !v.is_finite() {
                return 0;
            }
            (v.clamp(0.0, 1.0) * 255.0).round() as u8
        }

        Self {
            r: q(r),
            g: q(g),
            b: q(b),
            a: q(a),
        }
    }

    /// Return `true` when drawing with this color would put ink on the target.
    pub fn is_visible(self) -> bool {
        self.a > 0
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/core.rs"]
mod tests;

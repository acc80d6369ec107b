use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::foundation::core::{Affine, BezPath, Rect, Rgba8, ViewBox};

/// Suffix marking a sprite (and its image) as a matte layer.
pub const MATTE_SUFFIX: &str = ".matte";

/// Format-agnostic movie model produced by both the binary and the legacy JSON schema.
#[derive(Clone, Debug, Default)]
pub struct MovieDescription {
    /// Schema version string as found in the payload (may be empty).
    pub version: String,
    /// Native canvas size.
    pub view_box: ViewBox,
    /// Declared frame rate. `0` means "unspecified"; playback substitutes a default.
    pub fps: u32,
    /// Declared number of frames.
    pub frames: u32,
    /// Sprites in render order (first is drawn first).
    pub sprites: Vec<SpriteTimeline>,
    /// Image references by image key.
    pub images: BTreeMap<String, ImageRef>,
    /// Audio payloads split out of the image table by magic-byte sniffing.
    pub audio_payloads: BTreeMap<String, Vec<u8>>,
    /// Audio track descriptors.
    pub audios: Vec<AudioTrack>,
}

impl MovieDescription {
    pub fn has_audio(&self) -> bool {
        !self.audios.is_empty()
    }
}

/// Where the pixels of one image live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImageRef {
    /// Encoded image bytes embedded in the movie (PNG/JPEG/WebP).
    Inline(Arc<Vec<u8>>),
    /// Encoded image file in an extracted cache directory.
    File(PathBuf),
}

/// Per-sprite frame timeline.
#[derive(Clone, Debug, Default)]
pub struct SpriteTimeline {
    /// Image key this sprite draws (may be empty for pure vector sprites).
    pub image_key: String,
    /// Key of the matte sprite masking this one.
    pub matte_key: Option<String>,
    /// One pose per frame; may be shorter than the movie's frame count.
    pub frames: Vec<FramePose>,
}

impl SpriteTimeline {
    /// Matte sprites are never drawn directly; they mask sprites naming them in `matte_key`.
    pub fn is_matte(&self) -> bool {
        self.image_key.ends_with(MATTE_SUFFIX)
    }

    /// Pose for `frame`, if the timeline covers it.
    pub fn pose(&self, frame: u32) -> Option<&FramePose> {
        self.frames.get(frame as usize)
    }

    /// Key under which this sprite's bitmap is stored.
    pub fn bitmap_key(&self) -> &str {
        self.image_key
            .strip_suffix(MATTE_SUFFIX)
            .unwrap_or(&self.image_key)
    }
}

/// Sprite state on a single frame.
#[derive(Clone, Debug)]
pub struct FramePose {
    pub alpha: f64,
    /// Bounding layout; image bitmaps are stretched to its width/height.
    pub layout: Rect,
    pub transform: Affine,
    pub clip_path: Option<BezPath>,
    /// Vector shapes, shared with neighbouring frames when the payload says "keep".
    pub shapes: Arc<[Shape]>,
}

impl Default for FramePose {
    fn default() -> Self {
        Self {
            alpha: 0.0,
            layout: Rect::ZERO,
            transform: Affine::IDENTITY,
            clip_path: None,
            shapes: Arc::from(Vec::new()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Shape {
    pub geometry: ShapeGeometry,
    pub style: ShapeStyle,
    pub transform: Affine,
}

#[derive(Clone, Debug)]
pub enum ShapeGeometry {
    Path(BezPath),
    Rect {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        corner_radius: f64,
    },
    Ellipse {
        x: f64,
        y: f64,
        radius_x: f64,
        radius_y: f64,
    },
}

impl ShapeGeometry {
    /// Flatten the geometry into a path in shape space.
    pub fn to_path(&self) -> BezPath {
        use kurbo::Shape as _;

        match self {
            Self::Path(p) => p.clone(),
            Self::Rect {
                x,
                y,
                width,
                height,
                corner_radius,
            } => {
                let r = Rect::new(*x, *y, x + width, y + height);
                if *corner_radius > 0.0 {
                    kurbo::RoundedRect::from_rect(r, *corner_radius).to_path(0.1)
                } else {
                    r.to_path(0.1)
                }
            }
            Self::Ellipse {
                x,
                y,
                radius_x,
                radius_y,
            } => kurbo::Ellipse::new((*x, *y), (*radius_x, *radius_y), 0.0).to_path(0.1),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LineCap {
    #[default]
    Butt,
    Round,
    Square,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LineJoin {
    #[default]
    Miter,
    Round,
    Bevel,
}

/// Dash pattern: `dash` on, `gap` off, starting at `offset`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Dash {
    pub dash: f64,
    pub gap: f64,
    pub offset: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ShapeStyle {
    pub fill: Option<Rgba8>,
    pub stroke: Option<Rgba8>,
    pub stroke_width: f64,
    pub line_cap: LineCap,
    pub line_join: LineJoin,
    pub miter_limit: f64,
    pub dash: Option<Dash>,
}

impl Default for ShapeStyle {
    fn default() -> Self {
        Self {
            fill: None,
            stroke: None,
            stroke_width: 0.0,
            line_cap: LineCap::Butt,
            line_join: LineJoin::Miter,
            miter_limit: 4.0,
            dash: None,
        }
    }
}

impl ShapeStyle {
    pub(crate) fn dash_from_parts(dash: f64, gap: f64, offset: f64) -> Option<Dash> {
        if dash > 0.0 || gap > 0.0 {
            Some(Dash {
                dash: dash.max(1.0),
                gap: gap.max(1.0),
                offset,
            })
        } else {
            None
        }
    }
}

/// Audio clip placement on the movie timeline.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct AudioTrack {
    pub key: String,
    pub start_frame: u32,
    pub end_frame: u32,
    pub start_time_ms: u32,
    pub total_time_ms: u32,
}

/// Build an affine from SVGA's `(a, b, c, d, tx, ty)` matrix layout.
pub(crate) fn affine_from_svga(a: f64, b: f64, c: f64, d: f64, tx: f64, ty: f64) -> Affine {
    Affine::new([a, b, c, d, tx, ty])
}

/// Parse an SVG path string, tolerating the occasional malformed clip path.
pub(crate) fn parse_path(d: &str) -> Option<BezPath> {
    let d = d.trim();
    if d.is_empty() {
        return None;
    }
    match BezPath::from_svg(d) {
        Ok(p) => Some(p),
        Err(e) => {
            tracing::debug!(error = %e, "skipping unparsable svga path");
            None
        }
    }
}

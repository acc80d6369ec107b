use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::foundation::core::{Affine, PixelSize, ViewBox};
use crate::foundation::error::SvgaError;

/// How the movie canvas maps into a target buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalePolicy {
    /// Uniform scale so the whole canvas fits; letterboxed and centred.
    #[default]
    Fit,
    /// Uniform scale so the target is covered; overflow cropped, centred.
    Crop,
    /// Independent x/y scale; the canvas exactly fills the target.
    FillBounds,
    /// Like `Fit`, but never scales up.
    Inside,
}

impl ScalePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fit => "fit",
            Self::Crop => "crop",
            Self::FillBounds => "fill",
            Self::Inside => "inside",
        }
    }
}

impl FromStr for ScalePolicy {
    type Err = SvgaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fit" => Ok(Self::Fit),
            "crop" => Ok(Self::Crop),
            "fill" | "fill_bounds" => Ok(Self::FillBounds),
            "inside" => Ok(Self::Inside),
            other => Err(SvgaError::validation(format!("unknown scale policy '{other}'"))),
        }
    }
}

/// Transform from canvas units to target pixels. `None` for a degenerate canvas.
pub fn content_transform(view_box: ViewBox, target: PixelSize, policy: ScalePolicy) -> Option<Affine> {
    if view_box.is_degenerate() {
        return None;
    }
    let (vw, vh) = (view_box.width, view_box.height);
    let (tw, th) = (f64::from(target.width), f64::from(target.height));
    let (sx, sy) = (tw / vw, th / vh);

    let uniform = |s: f64| {
        let (dx, dy) = ((tw - vw * s) / 2.0, (th - vh * s) / 2.0);
        Affine::translate((dx, dy)) * Affine::scale(s)
    };

    Some(match policy {
        ScalePolicy::Fit => uniform(sx.min(sy)),
        ScalePolicy::Crop => uniform(sx.max(sy)),
        ScalePolicy::FillBounds => Affine::scale_non_uniform(sx, sy),
        ScalePolicy::Inside => uniform(sx.min(sy).min(1.0)),
    })
}

//! Legacy JSON schema (SVGA 1.x `movie.spec`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MovieSpec {
    pub ver: String,
    pub movie: Option<MovieSpecParams>,
    /// Image key -> file name (without extension) inside the archive.
    pub images: BTreeMap<String, String>,
    pub sprites: Vec<SpriteSpec>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MovieSpecParams {
    #[serde(rename = "viewBox")]
    pub view_box: Option<ViewBoxSpec>,
    pub fps: u32,
    pub frames: u32,
}

impl Default for MovieSpecParams {
    fn default() -> Self {
        Self {
            view_box: None,
            fps: 20,
            frames: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewBoxSpec {
    pub width: f64,
    pub height: f64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SpriteSpec {
    pub image_key: String,
    pub matte_key: Option<String>,
    pub frames: Vec<FrameSpec>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FrameSpec {
    pub alpha: f64,
    pub layout: Option<LayoutSpec>,
    pub transform: Option<TransformSpec>,
    pub clip_path: Option<String>,
    pub shapes: Vec<ShapeSpec>,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutSpec {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformSpec {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub tx: f64,
    pub ty: f64,
}

impl Default for TransformSpec {
    fn default() -> Self {
        Self {
            a: 1.0,
            b: 0.0,
            c: 0.0,
            d: 1.0,
            tx: 0.0,
            ty: 0.0,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShapeSpec {
    /// One of `shape`, `rect`, `ellipse`, `keep`.
    #[serde(rename = "type")]
    pub kind: String,
    pub args: Option<ShapeArgsSpec>,
    pub styles: Option<ShapeStyleSpec>,
    pub transform: Option<TransformSpec>,
}

/// Union of the argument objects of every shape kind; unused fields stay at their defaults.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ShapeArgsSpec {
    pub d: Option<String>,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub corner_radius: f64,
    pub radius_x: f64,
    pub radius_y: f64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ShapeStyleSpec {
    /// `[r, g, b, a]` in `0..=1`.
    pub fill: Option<[f32; 4]>,
    pub stroke: Option<[f32; 4]>,
    pub stroke_width: f64,
    pub line_cap: Option<String>,
    pub line_join: Option<String>,
    pub miter_limit: Option<f64>,
    /// `[dash, gap, offset]`.
    pub line_dash: Option<Vec<f64>>,
}

//! Writers for both schemas.
//!
//! Used by the CLI to re-pack movies and by tests to synthesise fixtures. Output decodes back to
//! an equivalent [`MovieDescription`] up to the `f32` precision of the binary schema.

use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Write as _};

use prost::Message as _;

use crate::foundation::core::{Affine, Rect, Rgba8};
use crate::foundation::error::{SvgaError, SvgaResult};
use crate::format::decode::{MOVIE_BINARY, MOVIE_SPEC};
use crate::format::json;
use crate::format::movie::{
    FramePose, ImageRef, LineCap, LineJoin, MovieDescription, Shape, ShapeGeometry, ShapeStyle,
    SpriteTimeline,
};
use crate::format::proto::{self, shape_entity};

/// Metadata schema used when packing an archive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Schema {
    /// `movie.binary` protobuf (SVGA 2.x).
    #[default]
    Binary,
    /// `movie.spec` JSON (SVGA 1.x).
    Json,
}

/// Encode `movie` as a zlib-deflated `MovieEntity`, the bare 2.x container.
pub fn encode_binary(movie: &MovieDescription) -> SvgaResult<Vec<u8>> {
    let raw = to_proto(movie)?.encode_to_vec();
    let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(&raw)
        .map_err(|e| SvgaError::io(format!("deflate movie: {e}")))?;
    enc.finish()
        .map_err(|e| SvgaError::io(format!("deflate movie: {e}")))
}

/// Pack `movie` into a ZIP archive with the given metadata schema.
///
/// Images are written as `<key>.png` entries; in the binary schema they are also inlined.
pub fn encode_archive(movie: &MovieDescription, schema: Schema) -> SvgaResult<Vec<u8>> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let opts = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    let zip_err = |e: zip::result::ZipError| SvgaError::io(format!("write archive: {e}"));
    let io_err = |e: std::io::Error| SvgaError::io(format!("write archive: {e}"));

    match schema {
        Schema::Binary => {
            zip.start_file(MOVIE_BINARY, opts).map_err(zip_err)?;
            zip.write_all(&to_proto(movie)?.encode_to_vec())
                .map_err(io_err)?;
        }
        Schema::Json => {
            let spec = to_json(movie);
            let text = serde_json::to_vec(&spec)
                .map_err(|e| SvgaError::io(format!("serialize {MOVIE_SPEC}: {e}")))?;
            zip.start_file(MOVIE_SPEC, opts).map_err(zip_err)?;
            zip.write_all(&text).map_err(io_err)?;
            for (key, image) in &movie.images {
                zip.start_file(format!("{key}.png"), opts).map_err(zip_err)?;
                zip.write_all(&image_bytes(image)?).map_err(io_err)?;
            }
        }
    }

    let cursor = zip.finish().map_err(zip_err)?;
    Ok(cursor.into_inner())
}

fn image_bytes(image: &ImageRef) -> SvgaResult<Vec<u8>> {
    match image {
        ImageRef::Inline(bytes) => Ok(bytes.as_ref().clone()),
        ImageRef::File(path) => std::fs::read(path)
            .map_err(|e| SvgaError::io(format!("read '{}': {e}", path.display()))),
    }
}

fn to_proto(movie: &MovieDescription) -> SvgaResult<proto::MovieEntity> {
    let mut images = HashMap::with_capacity(movie.images.len() + movie.audio_payloads.len());
    for (key, image) in &movie.images {
        images.insert(key.clone(), image_bytes(image)?);
    }
    for (key, audio) in &movie.audio_payloads {
        images.insert(key.clone(), audio.clone());
    }

    Ok(proto::MovieEntity {
        version: movie.version.clone(),
        params: Some(proto::MovieParams {
            view_box_width: movie.view_box.width as f32,
            view_box_height: movie.view_box.height as f32,
            fps: movie.fps as i32,
            frames: movie.frames as i32,
        }),
        images,
        sprites: movie.sprites.iter().map(sprite_to_proto).collect(),
        audios: movie
            .audios
            .iter()
            .map(|a| proto::AudioEntity {
                audio_key: a.key.clone(),
                start_frame: a.start_frame as i32,
                end_frame: a.end_frame as i32,
                start_time: a.start_time_ms as i32,
                total_time: a.total_time_ms as i32,
            })
            .collect(),
    })
}

fn transform_to_proto(t: Affine) -> proto::Transform {
    let [a, b, c, d, tx, ty] = t.as_coeffs();
    proto::Transform {
        a: a as f32,
        b: b as f32,
        c: c as f32,
        d: d as f32,
        tx: tx as f32,
        ty: ty as f32,
    }
}

fn sprite_to_proto(sprite: &SpriteTimeline) -> proto::SpriteEntity {
    proto::SpriteEntity {
        image_key: sprite.image_key.clone(),
        matte_key: sprite.matte_key.clone().unwrap_or_default(),
        frames: sprite
            .frames
            .iter()
            .map(|f: &FramePose| proto::FrameEntity {
                alpha: f.alpha as f32,
                layout: Some(proto::Layout {
                    x: f.layout.x0 as f32,
                    y: f.layout.y0 as f32,
                    width: f.layout.width() as f32,
                    height: f.layout.height() as f32,
                }),
                transform: Some(transform_to_proto(f.transform)),
                clip_path: f.clip_path.as_ref().map(|p| p.to_svg()).unwrap_or_default(),
                shapes: f.shapes.iter().map(shape_to_proto).collect(),
            })
            .collect(),
    }
}

fn unit(c: Rgba8) -> [f32; 4] {
    [c.r, c.g, c.b, c.a].map(|v| f32::from(v) / 255.0)
}

fn shape_to_proto(shape: &Shape) -> proto::ShapeEntity {
    use shape_entity::{Args, ShapeType};

    let (ty, args) = match &shape.geometry {
        ShapeGeometry::Path(p) => (
            ShapeType::Shape,
            Args::Shape(shape_entity::ShapeArgs { d: p.to_svg() }),
        ),
        ShapeGeometry::Rect {
            x,
            y,
            width,
            height,
            corner_radius,
        } => (
            ShapeType::Rect,
            Args::Rect(shape_entity::RectArgs {
                x: *x as f32,
                y: *y as f32,
                width: *width as f32,
                height: *height as f32,
                corner_radius: *corner_radius as f32,
            }),
        ),
        ShapeGeometry::Ellipse {
            x,
            y,
            radius_x,
            radius_y,
        } => (
            ShapeType::Ellipse,
            Args::Ellipse(shape_entity::EllipseArgs {
                x: *x as f32,
                y: *y as f32,
                radius_x: *radius_x as f32,
                radius_y: *radius_y as f32,
            }),
        ),
    };

    let st: &ShapeStyle = &shape.style;
    let color = |c: Rgba8| {
        let [r, g, b, a] = unit(c);
        shape_entity::RgbaColor { r, g, b, a }
    };
    let (dash_i, dash_ii, dash_iii) = st
        .dash
        .map_or((0.0, 0.0, 0.0), |d| (d.dash, d.gap, d.offset));

    proto::ShapeEntity {
        r#type: ty as i32,
        args: Some(args),
        styles: Some(shape_entity::ShapeStyle {
            fill: st.fill.map(color),
            stroke: st.stroke.map(color),
            stroke_width: st.stroke_width as f32,
            line_cap: match st.line_cap {
                LineCap::Butt => shape_entity::LineCap::Butt,
                LineCap::Round => shape_entity::LineCap::Round,
                LineCap::Square => shape_entity::LineCap::Square,
            } as i32,
            line_join: match st.line_join {
                LineJoin::Miter => shape_entity::LineJoin::Miter,
                LineJoin::Round => shape_entity::LineJoin::Round,
                LineJoin::Bevel => shape_entity::LineJoin::Bevel,
            } as i32,
            miter_limit: st.miter_limit as f32,
            line_dash_i: dash_i as f32,
            line_dash_ii: dash_ii as f32,
            line_dash_iii: dash_iii as f32,
        }),
        transform: Some(transform_to_proto(shape.transform)),
    }
}

fn transform_to_json(t: Affine) -> json::TransformSpec {
    let [a, b, c, d, tx, ty] = t.as_coeffs();
    json::TransformSpec { a, b, c, d, tx, ty }
}

fn to_json(movie: &MovieDescription) -> json::MovieSpec {
    json::MovieSpec {
        ver: movie.version.clone(),
        movie: Some(json::MovieSpecParams {
            view_box: Some(json::ViewBoxSpec {
                width: movie.view_box.width,
                height: movie.view_box.height,
            }),
            fps: movie.fps,
            frames: movie.frames,
        }),
        images: movie
            .images
            .keys()
            .map(|k| (k.clone(), k.clone()))
            .collect::<BTreeMap<_, _>>(),
        sprites: movie
            .sprites
            .iter()
            .map(|s| json::SpriteSpec {
                image_key: s.image_key.clone(),
                matte_key: s.matte_key.clone(),
                frames: s.frames.iter().map(frame_to_json).collect(),
            })
            .collect(),
    }
}

fn frame_to_json(f: &FramePose) -> json::FrameSpec {
    let layout: Rect = f.layout;
    json::FrameSpec {
        alpha: f.alpha,
        layout: Some(json::LayoutSpec {
            x: layout.x0,
            y: layout.y0,
            width: layout.width(),
            height: layout.height(),
        }),
        transform: Some(transform_to_json(f.transform)),
        clip_path: f.clip_path.as_ref().map(|p| p.to_svg()),
        shapes: f
            .shapes
            .iter()
            .map(|s| {
                let mut args = json::ShapeArgsSpec::default();
                let kind = match &s.geometry {
                    ShapeGeometry::Path(p) => {
                        args.d = Some(p.to_svg());
                        "shape"
                    }
                    ShapeGeometry::Rect {
                        x,
                        y,
                        width,
                        height,
                        corner_radius,
                    } => {
                        (args.x, args.y, args.width, args.height) = (*x, *y, *width, *height);
                        args.corner_radius = *corner_radius;
                        "rect"
                    }
                    ShapeGeometry::Ellipse {
                        x,
                        y,
                        radius_x,
                        radius_y,
                    } => {
                        (args.x, args.y, args.radius_x, args.radius_y) =
                            (*x, *y, *radius_x, *radius_y);
                        "ellipse"
                    }
                };
                let st = &s.style;
                json::ShapeSpec {
                    kind: kind.to_string(),
                    args: Some(args),
                    styles: Some(json::ShapeStyleSpec {
                        fill: st.fill.map(unit),
                        stroke: st.stroke.map(unit),
                        stroke_width: st.stroke_width,
                        line_cap: Some(
                            match st.line_cap {
                                LineCap::Butt => "butt",
                                LineCap::Round => "round",
                                LineCap::Square => "square",
                            }
                            .to_string(),
                        ),
                        line_join: Some(
                            match st.line_join {
                                LineJoin::Miter => "miter",
                                LineJoin::Round => "round",
                                LineJoin::Bevel => "bevel",
                            }
                            .to_string(),
                        ),
                        miter_limit: Some(st.miter_limit),
                        line_dash: st.dash.map(|d| vec![d.dash, d.gap, d.offset]),
                    }),
                    transform: Some(transform_to_json(s.transform)),
                }
            })
            .collect(),
    }
}

use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;

use prost::Message as _;

use crate::assets::extract::normalize_rel_path;
use crate::foundation::cancel::CancelToken;
use crate::foundation::core::{Affine, Rect, Rgba8, ViewBox};
use crate::foundation::error::{SvgaError, SvgaResult};
use crate::format::json::{self, MovieSpec};
use crate::format::movie::{
    AudioTrack, FramePose, ImageRef, LineCap, LineJoin, MATTE_SUFFIX, MovieDescription, Shape,
    ShapeGeometry, ShapeStyle, SpriteTimeline, affine_from_svga, parse_path,
};
use crate::format::proto::{self, shape_entity};

/// Metadata file name of the binary schema inside an archive or cache directory.
pub const MOVIE_BINARY: &str = "movie.binary";
/// Metadata file name of the legacy JSON schema inside an archive or cache directory.
pub const MOVIE_SPEC: &str = "movie.spec";

const ZIP_MAGIC: [u8; 4] = *b"PK\x03\x04";
const INFLATE_CHUNK: usize = 64 * 1024;
const MAX_INFLATED_BYTES: usize = 256 * 1024 * 1024;

/// Return `true` when the payload starts with a local-file ZIP signature.
pub fn is_zip(bytes: &[u8]) -> bool {
    bytes.len() > 4 && bytes[..4] == ZIP_MAGIC
}

/// Return `true` for payloads that look like MP3 audio (ID3 tag or MPEG frame sync).
pub fn is_audio(bytes: &[u8]) -> bool {
    bytes.starts_with(b"ID3") || bytes.starts_with(&[0xFF, 0xFB, 0x94])
}

/// Decode an SVGA payload (archive or deflated binary) into a [`MovieDescription`].
pub fn decode(bytes: &[u8]) -> SvgaResult<MovieDescription> {
    decode_with_cancel(bytes, &CancelToken::new())
}

/// Like [`decode`], polling `cancel` between inflate/unzip chunks.
#[tracing::instrument(level = "debug", skip(bytes, cancel), fields(len = bytes.len()))]
pub fn decode_with_cancel(bytes: &[u8], cancel: &CancelToken) -> SvgaResult<MovieDescription> {
    if bytes.is_empty() {
        return Err(SvgaError::resource("empty movie payload"));
    }
    if is_zip(bytes) {
        let entries = read_archive(bytes, cancel)?;
        return decode_archive_entries(&entries);
    }

    let raw = inflate(bytes, cancel)?;
    decode_inflated(&raw)
}

/// Decode an already inflated `MovieEntity` whose images are all inline.
pub(crate) fn decode_inflated(raw: &[u8]) -> SvgaResult<MovieDescription> {
    let entity = proto::MovieEntity::decode(raw)
        .map_err(|e| SvgaError::decode(format!("invalid movie entity: {e}")))?;
    from_proto(entity, &ImageLookup::None)
}

/// Decode a previously extracted cache directory (`movie.binary` preferred over `movie.spec`).
#[tracing::instrument(level = "debug")]
pub fn decode_dir(dir: &Path) -> SvgaResult<MovieDescription> {
    let binary = dir.join(MOVIE_BINARY);
    let spec = dir.join(MOVIE_SPEC);
    let lookup = ImageLookup::Dir(dir);

    if binary.is_file() {
        let bytes = std::fs::read(&binary)
            .map_err(|e| SvgaError::io(format!("read '{}': {e}", binary.display())))?;
        let entity = proto::MovieEntity::decode(bytes.as_slice())
            .map_err(|e| SvgaError::decode(format!("invalid {MOVIE_BINARY}: {e}")))?;
        return from_proto(entity, &lookup);
    }
    if spec.is_file() {
        let bytes = std::fs::read(&spec)
            .map_err(|e| SvgaError::io(format!("read '{}': {e}", spec.display())))?;
        let spec: MovieSpec = serde_json::from_slice(&bytes)
            .map_err(|e| SvgaError::decode(format!("invalid {MOVIE_SPEC}: {e}")))?;
        return from_json(spec, &lookup);
    }
    Err(SvgaError::decode(format!(
        "no {MOVIE_BINARY} or {MOVIE_SPEC} in '{}'",
        dir.display()
    )))
}

/// Inflate a zlib stream in bounded chunks.
///
/// A truncated or corrupt stream is a decode error; output is capped so a hostile payload
/// cannot exhaust memory.
pub fn inflate(bytes: &[u8], cancel: &CancelToken) -> SvgaResult<Vec<u8>> {
    let mut z = flate2::Decompress::new(true);
    let mut out = Vec::with_capacity(bytes.len().saturating_mul(4).min(MAX_INFLATED_BYTES));
    loop {
        cancel.check()?;
        if out.len() == out.capacity() {
            if out.len() >= MAX_INFLATED_BYTES {
                return Err(SvgaError::decode("inflated movie exceeds size limit"));
            }
            out.reserve(INFLATE_CHUNK);
        }

        let (before_in, before_out) = (z.total_in(), z.total_out());
        let status = z
            .decompress_vec(
                &bytes[before_in as usize..],
                &mut out,
                flate2::FlushDecompress::None,
            )
            .map_err(|e| SvgaError::decode(format!("corrupt deflate stream: {e}")))?;
        if status == flate2::Status::StreamEnd {
            break;
        }
        let stalled = z.total_in() == before_in && z.total_out() == before_out;
        if stalled && out.len() < out.capacity() {
            return Err(SvgaError::decode("truncated deflate stream"));
        }
    }
    if out.is_empty() {
        return Err(SvgaError::decode("inflated movie is empty"));
    }
    Ok(out)
}

/// Read every file entry of an in-memory archive. Directory entries are skipped.
fn read_archive(bytes: &[u8], cancel: &CancelToken) -> SvgaResult<HashMap<String, Vec<u8>>> {
    read_archive_capped(bytes, cancel, MAX_INFLATED_BYTES)
}

/// Like [`read_archive`], failing once the entries together inflate past `limit` bytes.
///
/// Declared entry sizes are not trusted; buffers grow with the bytes actually read.
fn read_archive_capped(
    bytes: &[u8],
    cancel: &CancelToken,
    limit: usize,
) -> SvgaResult<HashMap<String, Vec<u8>>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| SvgaError::decode(format!("corrupt archive: {e}")))?;

    // Validate every name before reading anything.
    for name in archive.file_names() {
        normalize_rel_path(name)?;
    }

    let mut out = HashMap::with_capacity(archive.len());
    let mut total = 0usize;
    for i in 0..archive.len() {
        cancel.check()?;
        let entry = archive
            .by_index(i)
            .map_err(|e| SvgaError::decode(format!("corrupt archive entry {i}: {e}")))?;
        if entry.is_dir() {
            continue;
        }
        let name = normalize_rel_path(entry.name())?;
        let remaining = limit.saturating_sub(total);
        let mut buf = Vec::new();
        entry
            .take(remaining as u64 + 1)
            .read_to_end(&mut buf)
            .map_err(|e| SvgaError::decode(format!("read archive entry '{name}': {e}")))?;
        if buf.len() > remaining {
            return Err(SvgaError::decode(format!(
                "archive contents exceed {limit} bytes"
            )));
        }
        total += buf.len();
        out.insert(name, buf);
    }
    Ok(out)
}

fn decode_archive_entries(entries: &HashMap<String, Vec<u8>>) -> SvgaResult<MovieDescription> {
    let lookup = ImageLookup::Archive(entries);
    if let Some(bytes) = entries.get(MOVIE_BINARY) {
        let entity = proto::MovieEntity::decode(bytes.as_slice())
            .map_err(|e| SvgaError::decode(format!("invalid {MOVIE_BINARY}: {e}")))?;
        return from_proto(entity, &lookup);
    }
    if let Some(bytes) = entries.get(MOVIE_SPEC) {
        let spec: MovieSpec = serde_json::from_slice(bytes)
            .map_err(|e| SvgaError::decode(format!("invalid {MOVIE_SPEC}: {e}")))?;
        return from_json(spec, &lookup);
    }
    Err(SvgaError::decode(format!(
        "archive has no {MOVIE_BINARY} or {MOVIE_SPEC}"
    )))
}

/// Resolves image names referenced by the structured data.
pub(crate) enum ImageLookup<'a> {
    None,
    Archive(&'a HashMap<String, Vec<u8>>),
    Dir(&'a Path),
}

impl ImageLookup<'_> {
    /// Try `<name>`, `<name>.png`, then `<key>.png`.
    fn resolve(&self, name: &str, key: &str) -> Option<ImageRef> {
        let candidates = [name.to_string(), format!("{name}.png"), format!("{key}.png")];
        let mut safe = candidates
            .iter()
            .filter_map(|c| normalize_rel_path(c).ok());
        match self {
            Self::None => None,
            Self::Archive(entries) => safe.find_map(|c| {
                entries
                    .get(c.as_str())
                    .map(|b| ImageRef::Inline(Arc::new(b.clone())))
            }),
            Self::Dir(dir) => safe.map(|c| dir.join(c)).find(|p| p.is_file()).map(ImageRef::File),
        }
    }
}

pub(crate) fn from_proto(
    entity: proto::MovieEntity,
    lookup: &ImageLookup<'_>,
) -> SvgaResult<MovieDescription> {
    let params = entity
        .params
        .ok_or_else(|| SvgaError::decode("movie parameters missing"))?;

    let mut movie = MovieDescription {
        version: entity.version,
        view_box: ViewBox::new(
            f64::from(params.view_box_width),
            f64::from(params.view_box_height),
        ),
        fps: params.fps.max(0) as u32,
        frames: params.frames.max(0) as u32,
        ..MovieDescription::default()
    };

    for (key, bytes) in entity.images {
        if bytes.len() < 4 {
            tracing::debug!(%key, len = bytes.len(), "skipping short image payload");
            continue;
        }
        if is_audio(&bytes) {
            movie.audio_payloads.insert(key, bytes);
            continue;
        }
        if image::guess_format(&bytes).is_ok() {
            movie.images.insert(key, ImageRef::Inline(Arc::new(bytes)));
            continue;
        }
        // Older archives store a file name instead of the encoded image.
        let resolved = std::str::from_utf8(&bytes)
            .ok()
            .and_then(|name| lookup.resolve(name.trim(), &key));
        match resolved {
            Some(r) => {
                movie.images.insert(key, r);
            }
            None => tracing::debug!(%key, "image reference did not resolve"),
        }
    }

    movie.sprites = entity.sprites.into_iter().map(sprite_from_proto).collect();
    movie.audios = entity
        .audios
        .into_iter()
        .map(|a| AudioTrack {
            key: a.audio_key,
            start_frame: a.start_frame.max(0) as u32,
            end_frame: a.end_frame.max(0) as u32,
            start_time_ms: a.start_time.max(0) as u32,
            total_time_ms: a.total_time.max(0) as u32,
        })
        .collect();
    Ok(movie)
}

fn sprite_from_proto(sprite: proto::SpriteEntity) -> SpriteTimeline {
    let mut prev_shapes: Arc<[Shape]> = Arc::from(Vec::new());
    let mut frames = Vec::with_capacity(sprite.frames.len());
    for f in sprite.frames {
        let keep = f
            .shapes
            .first()
            .is_some_and(|s| s.r#type == shape_entity::ShapeType::Keep as i32);
        let shapes: Arc<[Shape]> = if keep {
            prev_shapes.clone()
        } else {
            Arc::from(
                f.shapes
                    .iter()
                    .filter_map(shape_from_proto)
                    .collect::<Vec<_>>(),
            )
        };
        prev_shapes = shapes.clone();

        frames.push(FramePose {
            alpha: f64::from(f.alpha),
            layout: f.layout.map_or(Rect::ZERO, |l| {
                let (x, y) = (f64::from(l.x), f64::from(l.y));
                Rect::new(x, y, x + f64::from(l.width), y + f64::from(l.height))
            }),
            transform: f.transform.as_ref().map_or(Affine::IDENTITY, affine_from_proto),
            clip_path: parse_path(&f.clip_path),
            shapes,
        });
    }

    SpriteTimeline {
        image_key: sprite.image_key,
        matte_key: Some(sprite.matte_key).filter(|k| !k.is_empty()),
        frames,
    }
}

fn affine_from_proto(t: &proto::Transform) -> Affine {
    affine_from_svga(
        f64::from(t.a),
        f64::from(t.b),
        f64::from(t.c),
        f64::from(t.d),
        f64::from(t.tx),
        f64::from(t.ty),
    )
}

fn shape_from_proto(s: &proto::ShapeEntity) -> Option<Shape> {
    use shape_entity::Args;

    let geometry = match s.args.as_ref()? {
        Args::Shape(a) => ShapeGeometry::Path(parse_path(&a.d)?),
        Args::Rect(r) => ShapeGeometry::Rect {
            x: f64::from(r.x),
            y: f64::from(r.y),
            width: f64::from(r.width),
            height: f64::from(r.height),
            corner_radius: f64::from(r.corner_radius),
        },
        Args::Ellipse(e) => ShapeGeometry::Ellipse {
            x: f64::from(e.x),
            y: f64::from(e.y),
            radius_x: f64::from(e.radius_x),
            radius_y: f64::from(e.radius_y),
        },
    };

    let style = s.styles.as_ref().map_or_else(ShapeStyle::default, |st| {
        let color = |c: &shape_entity::RgbaColor| Rgba8::from_unit(c.r, c.g, c.b, c.a);
        ShapeStyle {
            fill: st.fill.as_ref().map(color),
            stroke: st.stroke.as_ref().map(color),
            stroke_width: f64::from(st.stroke_width),
            line_cap: match shape_entity::LineCap::try_from(st.line_cap) {
                Ok(shape_entity::LineCap::Round) => LineCap::Round,
                Ok(shape_entity::LineCap::Square) => LineCap::Square,
                _ => LineCap::Butt,
            },
            line_join: match shape_entity::LineJoin::try_from(st.line_join) {
                Ok(shape_entity::LineJoin::Round) => LineJoin::Round,
                Ok(shape_entity::LineJoin::Bevel) => LineJoin::Bevel,
                _ => LineJoin::Miter,
            },
            miter_limit: if st.miter_limit > 0.0 {
                f64::from(st.miter_limit)
            } else {
                4.0
            },
            dash: ShapeStyle::dash_from_parts(
                f64::from(st.line_dash_i),
                f64::from(st.line_dash_ii),
                f64::from(st.line_dash_iii),
            ),
        }
    });

    Some(Shape {
        geometry,
        style,
        transform: s.transform.as_ref().map_or(Affine::IDENTITY, affine_from_proto),
    })
}

pub(crate) fn from_json(spec: MovieSpec, lookup: &ImageLookup<'_>) -> SvgaResult<MovieDescription> {
    let params = spec
        .movie
        .ok_or_else(|| SvgaError::decode("movie parameters missing"))?;
    let view_box = params.view_box.unwrap_or_default();

    let mut images = BTreeMap::new();
    for (key, name) in &spec.images {
        let bitmap_key = key.strip_suffix(MATTE_SUFFIX).unwrap_or(key);
        match lookup.resolve(name, bitmap_key) {
            Some(r) => {
                images.insert(bitmap_key.to_string(), r);
            }
            None => tracing::debug!(%key, %name, "image file not found"),
        }
    }

    Ok(MovieDescription {
        version: spec.ver,
        view_box: ViewBox::new(view_box.width, view_box.height),
        fps: params.fps,
        frames: params.frames,
        sprites: spec.sprites.into_iter().map(sprite_from_json).collect(),
        images,
        audio_payloads: BTreeMap::new(),
        audios: Vec::new(),
    })
}

fn sprite_from_json(sprite: json::SpriteSpec) -> SpriteTimeline {
    let mut prev_shapes: Arc<[Shape]> = Arc::from(Vec::new());
    let mut frames = Vec::with_capacity(sprite.frames.len());
    for f in sprite.frames {
        let keep = f.shapes.first().is_some_and(|s| s.kind == "keep");
        let shapes: Arc<[Shape]> = if keep {
            prev_shapes.clone()
        } else {
            Arc::from(
                f.shapes
                    .iter()
                    .filter_map(shape_from_json)
                    .collect::<Vec<_>>(),
            )
        };
        prev_shapes = shapes.clone();

        frames.push(FramePose {
            alpha: f.alpha,
            layout: f.layout.map_or(Rect::ZERO, |l| {
                Rect::new(l.x, l.y, l.x + l.width, l.y + l.height)
            }),
            transform: f.transform.map_or(Affine::IDENTITY, affine_from_json),
            clip_path: f.clip_path.as_deref().and_then(parse_path),
            shapes,
        });
    }

    SpriteTimeline {
        image_key: sprite.image_key,
        matte_key: sprite.matte_key.filter(|k| !k.is_empty()),
        frames,
    }
}

fn affine_from_json(t: json::TransformSpec) -> Affine {
    affine_from_svga(t.a, t.b, t.c, t.d, t.tx, t.ty)
}

fn shape_from_json(s: &json::ShapeSpec) -> Option<Shape> {
    let args = s.args.as_ref()?;
    let geometry = match s.kind.as_str() {
        "shape" => ShapeGeometry::Path(parse_path(args.d.as_deref()?)?),
        "rect" => ShapeGeometry::Rect {
            x: args.x,
            y: args.y,
            width: args.width,
            height: args.height,
            corner_radius: args.corner_radius,
        },
        "ellipse" => ShapeGeometry::Ellipse {
            x: args.x,
            y: args.y,
            radius_x: args.radius_x,
            radius_y: args.radius_y,
        },
        _ => return None,
    };

    let style = s.styles.as_ref().map_or_else(ShapeStyle::default, |st| {
        let color = |c: &[f32; 4]| Rgba8::from_unit(c[0], c[1], c[2], c[3]);
        let dash = st.line_dash.as_deref().unwrap_or(&[]);
        let part = |i: usize| dash.get(i).copied().unwrap_or(0.0);
        ShapeStyle {
            fill: st.fill.as_ref().map(color),
            stroke: st.stroke.as_ref().map(color),
            stroke_width: st.stroke_width,
            line_cap: match st.line_cap.as_deref() {
                Some("round") => LineCap::Round,
                Some("square") => LineCap::Square,
                _ => LineCap::Butt,
            },
            line_join: match st.line_join.as_deref() {
                Some("round") => LineJoin::Round,
                Some("bevel") => LineJoin::Bevel,
                _ => LineJoin::Miter,
            },
            miter_limit: st.miter_limit.filter(|m| *m > 0.0).unwrap_or(4.0),
            dash: ShapeStyle::dash_from_parts(part(0), part(1), part(2)),
        }
    });

    Some(Shape {
        geometry,
        style,
        transform: s.transform.map_or(Affine::IDENTITY, affine_from_json),
    })
}

#[cfg(test)]
#[path = "../../tests/unit/format/decode.rs"]
mod tests;

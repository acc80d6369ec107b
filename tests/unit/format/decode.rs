use std::io::{Cursor, Write};
use std::sync::Arc;

use prost::Message as _;

use super::*;
use crate::foundation::error::ErrorKind;
use crate::format::encode::{Schema, encode_archive, encode_binary};

fn png_bytes(w: u32, h: u32, rgba: [u8; 4]) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(w, h, image::Rgba(rgba));
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

fn deflate(raw: &[u8]) -> Vec<u8> {
    let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(raw).unwrap();
    enc.finish().unwrap()
}

fn zip_with(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let opts = zip::write::SimpleFileOptions::default();
    for (name, bytes) in entries {
        zip.start_file(*name, opts).unwrap();
        zip.write_all(bytes).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

fn sample_movie() -> MovieDescription {
    let square = Shape {
        geometry: ShapeGeometry::Rect {
            x: 0.0,
            y: 0.0,
            width: 10.0,
            height: 10.0,
            corner_radius: 0.0,
        },
        style: ShapeStyle {
            fill: Some(Rgba8 {
                r: 255,
                g: 0,
                b: 0,
                a: 255,
            }),
            ..ShapeStyle::default()
        },
        transform: Affine::IDENTITY,
    };
    let shapes: Arc<[Shape]> = Arc::from(vec![square]);

    let mut movie = MovieDescription {
        version: "2.0.0".to_string(),
        view_box: ViewBox::new(100.0, 50.0),
        fps: 20,
        frames: 2,
        ..MovieDescription::default()
    };
    movie.sprites.push(SpriteTimeline {
        image_key: "hero".to_string(),
        matte_key: None,
        frames: vec![
            FramePose {
                alpha: 1.0,
                layout: Rect::new(0.0, 0.0, 20.0, 20.0),
                transform: Affine::translate((5.0, 5.0)),
                clip_path: None,
                shapes: shapes.clone(),
            },
            FramePose {
                alpha: 0.5,
                layout: Rect::new(0.0, 0.0, 20.0, 20.0),
                transform: Affine::translate((10.0, 0.0)),
                clip_path: None,
                shapes,
            },
        ],
    });
    movie.images.insert(
        "hero".to_string(),
        ImageRef::Inline(Arc::new(png_bytes(2, 2, [0, 255, 0, 255]))),
    );
    movie
}

fn params() -> Option<proto::MovieParams> {
    Some(proto::MovieParams {
        view_box_width: 10.0,
        view_box_height: 10.0,
        fps: 30,
        frames: 2,
    })
}

#[test]
fn binary_stream_decodes_params_and_poses() {
    let movie = sample_movie();
    let decoded = decode(&encode_binary(&movie).unwrap()).unwrap();

    assert_eq!(decoded.fps, 20);
    assert_eq!(decoded.frames, 2);
    assert_eq!(decoded.view_box, ViewBox::new(100.0, 50.0));
    assert_eq!(decoded.sprites.len(), 1);

    let sprite = &decoded.sprites[0];
    assert_eq!(sprite.frames[1].alpha, 0.5);
    assert_eq!(sprite.frames[0].transform, Affine::translate((5.0, 5.0)));
    assert_eq!(sprite.frames[0].layout, Rect::new(0.0, 0.0, 20.0, 20.0));
    assert_eq!(sprite.frames[0].shapes.len(), 1);
    assert_eq!(decoded.images.get("hero"), movie.images.get("hero"));
}

#[test]
fn binary_archive_decodes_like_bare_stream() {
    let movie = sample_movie();
    let zipped = encode_archive(&movie, Schema::Binary).unwrap();
    assert!(is_zip(&zipped));

    let decoded = decode(&zipped).unwrap();
    assert_eq!(decoded.frames, 2);
    assert_eq!(decoded.sprites[0].frames[1].transform, Affine::translate((10.0, 0.0)));
    assert!(matches!(decoded.images.get("hero"), Some(ImageRef::Inline(_))));
}

#[test]
fn keep_shape_reuses_previous_frame_shapes() {
    let rect = proto::ShapeEntity {
        r#type: shape_entity::ShapeType::Rect as i32,
        args: Some(shape_entity::Args::Rect(shape_entity::RectArgs {
            x: 0.0,
            y: 0.0,
            width: 4.0,
            height: 4.0,
            corner_radius: 0.0,
        })),
        styles: None,
        transform: None,
    };
    let keep = proto::ShapeEntity {
        r#type: shape_entity::ShapeType::Keep as i32,
        args: None,
        styles: None,
        transform: None,
    };
    let entity = proto::MovieEntity {
        version: String::new(),
        params: params(),
        images: Default::default(),
        sprites: vec![proto::SpriteEntity {
            image_key: "vector".to_string(),
            matte_key: String::new(),
            frames: vec![
                proto::FrameEntity {
                    alpha: 1.0,
                    shapes: vec![rect],
                    ..Default::default()
                },
                proto::FrameEntity {
                    alpha: 1.0,
                    shapes: vec![keep],
                    ..Default::default()
                },
            ],
        }],
        audios: Vec::new(),
    };

    let movie = decode(&deflate(&entity.encode_to_vec())).unwrap();
    let frames = &movie.sprites[0].frames;
    assert_eq!(frames[1].shapes.len(), 1);
    assert!(Arc::ptr_eq(&frames[0].shapes, &frames[1].shapes));
    assert_eq!(frames[0].transform, Affine::IDENTITY);
}

#[test]
fn short_payloads_are_skipped_and_audio_is_split_out() {
    let mut images = std::collections::HashMap::new();
    images.insert("tiny".to_string(), vec![1u8, 2, 3]);
    images.insert("bgm".to_string(), b"ID3\x03\x00\x00\x00".to_vec());
    images.insert("pic".to_string(), png_bytes(1, 1, [1, 2, 3, 255]));
    let entity = proto::MovieEntity {
        version: String::new(),
        params: params(),
        images,
        sprites: Vec::new(),
        audios: vec![proto::AudioEntity {
            audio_key: "bgm".to_string(),
            start_frame: 0,
            end_frame: 2,
            start_time: 0,
            total_time: 66,
        }],
    };

    let movie = decode(&deflate(&entity.encode_to_vec())).unwrap();
    assert_eq!(movie.images.keys().collect::<Vec<_>>(), vec!["pic"]);
    assert!(movie.audio_payloads.contains_key("bgm"));
    assert!(movie.has_audio());
    assert_eq!(movie.audios[0].total_time_ms, 66);
}

#[test]
fn audio_sniffing_recognises_id3_and_frame_sync() {
    assert!(is_audio(b"ID3abc"));
    assert!(is_audio(&[0xFF, 0xFB, 0x94, 0x00]));
    assert!(!is_audio(&[0xFF, 0xFB, 0x90, 0x00]));
    assert!(!is_audio(b"\x89PNG"));
}

#[test]
fn missing_params_is_a_decode_error() {
    let entity = proto::MovieEntity::default();
    let err = decode(&deflate(&entity.encode_to_vec())).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Decode);
}

#[test]
fn truncated_stream_is_a_decode_error() {
    let bytes = encode_binary(&sample_movie()).unwrap();
    let err = decode(&bytes[..bytes.len() / 2]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Decode);
}

#[test]
fn empty_payload_is_a_resource_error() {
    assert_eq!(decode(&[]).unwrap_err().kind(), ErrorKind::Resource);
}

#[test]
fn zip_sniff_needs_more_than_the_magic() {
    assert!(!is_zip(b"PK\x03\x04"));
    assert!(is_zip(b"PK\x03\x04\x00"));
    assert!(!is_zip(b"\x78\x9c\x00\x00\x00"));
}

#[test]
fn cancelled_token_stops_decoding() {
    let cancel = CancelToken::new();
    cancel.cancel();
    let err = decode_with_cancel(&encode_binary(&sample_movie()).unwrap(), &cancel).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
}

#[test]
fn json_archive_resolves_files_and_strips_matte_suffix() {
    let spec = r#"{
        "ver": "1.1.0",
        "movie": { "viewBox": { "width": 40, "height": 30 }, "fps": 15, "frames": 1 },
        "images": { "mask.matte": "mask", "hero": "hero_file" },
        "sprites": [
            { "imageKey": "mask.matte", "frames": [ { "alpha": 1.0 } ] },
            {
                "imageKey": "hero",
                "matteKey": "mask.matte",
                "frames": [ {
                    "alpha": 1.0,
                    "layout": { "x": 0, "y": 0, "width": 40, "height": 30 },
                    "transform": { "a": 2, "b": 0, "c": 0, "d": 2, "tx": 1, "ty": 1 }
                } ]
            }
        ]
    }"#;
    let png = png_bytes(1, 1, [9, 9, 9, 255]);
    let zipped = zip_with(&[
        (MOVIE_SPEC, spec.as_bytes()),
        ("mask.png", &png),
        ("hero_file", &png),
    ]);

    let movie = decode(&zipped).unwrap();
    assert_eq!(movie.fps, 15);
    assert!(movie.images.contains_key("mask"));
    assert!(movie.images.contains_key("hero"));
    assert!(movie.sprites[0].is_matte());
    assert_eq!(movie.sprites[1].matte_key.as_deref(), Some("mask.matte"));
    assert_eq!(
        movie.sprites[1].frames[0].transform,
        Affine::new([2.0, 0.0, 0.0, 2.0, 1.0, 1.0])
    );
}

#[test]
fn json_schema_defaults_apply() {
    let spec: MovieSpec =
        serde_json::from_str(r#"{ "movie": { "viewBox": { "width": 10, "height": 10 } } }"#)
            .unwrap();
    let movie = from_json(spec, &ImageLookup::None).unwrap();
    assert_eq!(movie.fps, 20);
    assert_eq!(movie.frames, 0);
    assert!(movie.sprites.is_empty());

    let spec: MovieSpec = serde_json::from_str(r#"{ "sprites": [] }"#).unwrap();
    assert_eq!(
        from_json(spec, &ImageLookup::None).unwrap_err().kind(),
        ErrorKind::Decode
    );
}

#[test]
fn json_archive_round_trips_through_encoder() {
    let movie = sample_movie();
    let decoded = decode(&encode_archive(&movie, Schema::Json).unwrap()).unwrap();
    assert_eq!(decoded.view_box, movie.view_box);
    assert_eq!(decoded.sprites[0].frames[1].alpha, 0.5);
    assert_eq!(decoded.images.get("hero"), movie.images.get("hero"));
}

#[test]
fn archive_entry_escaping_root_is_a_security_error() {
    let zipped = zip_with(&[(MOVIE_BINARY, b"xx"), ("../../evil.txt", b"boom")]);
    assert_eq!(decode(&zipped).unwrap_err().kind(), ErrorKind::Security);
}

#[test]
fn archive_without_metadata_is_a_decode_error() {
    let zipped = zip_with(&[("readme.txt", b"nothing here")]);
    assert_eq!(decode(&zipped).unwrap_err().kind(), ErrorKind::Decode);
}

#[test]
fn archive_reads_stop_at_the_size_limit() {
    let big = vec![7u8; 4096];
    let zipped = zip_with(&[("a.png", big.as_slice()), ("b.png", big.as_slice())]);
    let cancel = CancelToken::new();

    let all = read_archive_capped(&zipped, &cancel, 8192).unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all["b.png"].len(), 4096);

    let err = read_archive_capped(&zipped, &cancel, 6000).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Decode);
}

//! SVGA container decoding and encoding.
//!
//! Two schemas share one in-memory model ([`movie::MovieDescription`]): the compact binary
//! `MovieEntity` (deflated bare, or as `movie.binary` inside a ZIP) and the legacy JSON
//! `movie.spec` (always inside a ZIP, images stored as files).

pub mod decode;
pub mod encode;
pub mod json;
pub mod movie;
pub mod proto;

pub use decode::{decode, decode_dir, decode_with_cancel, is_audio, is_zip};
pub use encode::{Schema, encode_archive, encode_binary};
pub use movie::{
    AudioTrack, Dash, FramePose, ImageRef, LineCap, LineJoin, MovieDescription, Shape,
    ShapeGeometry, ShapeStyle, SpriteTimeline,
};

//! svgaplay decodes, caches and schedules SVGA vector animations.
//!
//! The engine is a pipeline of explicitly constructed services:
//!
//! - [`load::LoadCoordinator`] fetches a [`MovieSource`], coalescing concurrent requests per
//!   content key, and decodes it through [`format`] and [`assets`]
//! - the result is a prepared [`entity::AnimationEntity`] stored in a size-weighted
//!   [`cache::EntityCache`]
//! - [`playback::PlaybackScheduler`] turns ticks of a shared [`playback::EnvironmentClock`] into
//!   frame indices under a load-adaptive frame rate
//! - [`cache::FrameRenderCache`] rasterizes frames on the CPU into pooled pixel buffers
//!
//! [`Engine`] wires them together.
#![forbid(unsafe_code)]

mod foundation;

pub mod assets;
pub mod cache;
pub mod engine;
pub mod entity;
pub mod format;
pub mod load;
pub mod playback;
pub mod render;

pub use crate::foundation::cancel::CancelToken;
pub use crate::foundation::config::{
    ENV_CACHE_DIR, ENV_ENTITY_CACHE_BYTES, ENV_FRAME_CACHE_BYTES, ENV_LOADER_THREADS,
    EngineOpts, EntityCacheOpts, FrameCacheOpts, LoaderOpts, ThrottleOpts,
};
pub use crate::foundation::core::{Affine, BezPath, PixelSize, Point, Rect, Rgba8, Vec2, ViewBox};
pub use crate::foundation::error::{ErrorKind, SvgaError, SvgaResult};
pub use crate::foundation::fingerprint::Fingerprint;

pub use crate::cache::{EntityCache, FrameRenderCache, RenderCacheKey, RenderedFrame};
pub use crate::engine::Engine;
pub use crate::entity::{AnimationEntity, DynamicEntity};
pub use crate::format::MovieDescription;
pub use crate::load::{LoadFailure, LoadResult, MovieSource};
pub use crate::playback::{PlaybackEvent, PlaybackOpts, Priority};
pub use crate::render::ScalePolicy;

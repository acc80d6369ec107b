//! Entity and rendered-frame caches.

pub mod entity;
pub mod frame;

pub use entity::{EntityCache, EntityCacheStats};
pub use frame::{FrameCacheStats, FrameRenderCache, RenderCacheKey, RenderedFrame};

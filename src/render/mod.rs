//! CPU rasterization of movie frames.

pub mod cpu;
pub mod scale;
pub mod surface_pool;

pub use cpu::FrameRenderer;
pub use scale::{ScalePolicy, content_transform};
pub use surface_pool::{SurfacePool, SurfacePoolOpts, SurfacePoolStats};

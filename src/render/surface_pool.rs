use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::foundation::core::PixelSize;
use crate::foundation::error::SvgaResult;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfacePoolOpts {
    /// Maximum number of retained surfaces across all buckets.
    pub max_pooled_surfaces: usize,
    /// Maximum bytes retained across all buckets.
    pub max_pool_bytes: usize,
    /// Maximum number of retained surfaces per (w,h) bucket.
    pub max_surfaces_per_bucket: usize,
}

impl Default for SurfacePoolOpts {
    fn default() -> Self {
        Self {
            max_pooled_surfaces: 60,
            max_pool_bytes: 64 * 1024 * 1024,
            max_surfaces_per_bucket: 16,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SurfacePoolStats {
    pub retained_surfaces: usize,
    pub retained_bytes: usize,
    pub reused_surfaces: u64,
    pub alloc_surfaces: u64,
    pub alloc_bytes: u64,
    pub dropped_on_release: u64,
}

/// Bounded free-list of CPU pixmaps, bucketed by exact size.
///
/// Not synchronised; the frame cache guards it with one lock.
#[derive(Debug)]
pub struct SurfacePool {
    opts: SurfacePoolOpts,
    stats: SurfacePoolStats,
    buckets: HashMap<PixelSize, Vec<vello_cpu::Pixmap>>,
}

impl SurfacePool {
    pub fn new(opts: SurfacePoolOpts) -> Self {
        Self {
            opts,
            stats: SurfacePoolStats::default(),
            buckets: HashMap::new(),
        }
    }

    pub fn stats(&self) -> SurfacePoolStats {
        self.stats.clone()
    }

    /// Take a pooled pixmap of exactly `size`, or allocate one.
    ///
    /// Pooled pixmaps keep their old pixels; callers clear before drawing.
    pub fn acquire(&mut self, size: PixelSize) -> SvgaResult<vello_cpu::Pixmap> {
        let (width, height) = size.to_u16()?;
        let bytes = size.rgba8_len();
        if let Some(p) = self.buckets.get_mut(&size).and_then(Vec::pop) {
            self.stats.retained_surfaces = self.stats.retained_surfaces.saturating_sub(1);
            self.stats.retained_bytes = self.stats.retained_bytes.saturating_sub(bytes);
            self.stats.reused_surfaces = self.stats.reused_surfaces.saturating_add(1);
            return Ok(p);
        }

        self.stats.alloc_surfaces = self.stats.alloc_surfaces.saturating_add(1);
        self.stats.alloc_bytes = self.stats.alloc_bytes.saturating_add(bytes as u64);
        Ok(vello_cpu::Pixmap::new(width, height))
    }

    /// Return a pixmap; it is dropped instead when any bound would be exceeded.
    pub fn release(&mut self, pixmap: vello_cpu::Pixmap) {
        let size = PixelSize {
            width: u32::from(pixmap.width()),
            height: u32::from(pixmap.height()),
        };
        let bytes = size.rgba8_len();

        let over_count = self.stats.retained_surfaces >= self.opts.max_pooled_surfaces;
        let over_bytes = self.stats.retained_bytes.saturating_add(bytes) > self.opts.max_pool_bytes;
        let bucket = self.buckets.entry(size).or_default();
        if over_count || over_bytes || bucket.len() >= self.opts.max_surfaces_per_bucket {
            self.stats.dropped_on_release = self.stats.dropped_on_release.saturating_add(1);
            return;
        }

        bucket.push(pixmap);
        self.stats.retained_surfaces = self.stats.retained_surfaces.saturating_add(1);
        self.stats.retained_bytes = self.stats.retained_bytes.saturating_add(bytes);
    }

    /// Drop every retained pixmap.
    pub fn clear(&mut self) {
        self.buckets.clear();
        self.stats.retained_surfaces = 0;
        self.stats.retained_bytes = 0;
    }
}

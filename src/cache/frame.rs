use std::sync::{Arc, Mutex};

use lru::LruCache;

use crate::entity::{AnimationEntity, DynamicEntity};
use crate::foundation::config::FrameCacheOpts;
use crate::foundation::core::PixelSize;
use crate::foundation::error::SvgaResult;
use crate::foundation::sync::lock;
use crate::render::cpu::FrameRenderer;
use crate::render::scale::ScalePolicy;
use crate::render::surface_pool::{SurfacePool, SurfacePoolStats};

/// Identity of one rendered buffer.
///
/// `content` is a folded content hash, so distinct movies may collide; a collision only serves
/// stale pixels and never corrupts state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RenderCacheKey {
    pub content: u64,
    pub frame: u32,
    pub size: PixelSize,
    pub policy: ScalePolicy,
    /// Fingerprint of per-player overrides; `0` for none.
    pub dynamic: u64,
}

impl RenderCacheKey {
    pub fn new(content: u64, frame: u32, size: PixelSize, policy: ScalePolicy) -> Self {
        Self {
            content,
            frame,
            size,
            policy,
            dynamic: 0,
        }
    }

    pub fn with_dynamic(mut self, fingerprint: u64) -> Self {
        self.dynamic = fingerprint;
        self
    }
}

/// A premultiplied RGBA8 frame owned by the cache.
pub struct RenderedFrame {
    key: RenderCacheKey,
    pixmap: vello_cpu::Pixmap,
}

impl std::fmt::Debug for RenderedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderedFrame")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl RenderedFrame {
    pub fn key(&self) -> RenderCacheKey {
        self.key
    }

    pub fn size(&self) -> PixelSize {
        self.key.size
    }

    pub fn data_premul(&self) -> &[u8] {
        self.pixmap.data_as_u8_slice()
    }

    pub fn byte_len(&self) -> usize {
        self.key.size.rgba8_len()
    }

    /// Un-premultiplied copy, e.g. for PNG output.
    pub fn to_rgba8_straight(&self) -> Vec<u8> {
        let mut out = self.data_premul().to_vec();
        for px in out.chunks_exact_mut(4) {
            let a = u16::from(px[3]);
            if a == 0 || a == 255 {
                continue;
            }
            for c in &mut px[..3] {
                *c = ((u16::from(*c) * 255 + a / 2) / a).min(255) as u8;
            }
        }
        out
    }

    /// Premultiplied pixel at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.key.size.width || y >= self.key.size.height {
            return None;
        }
        let i = ((y as usize) * (self.key.size.width as usize) + x as usize) * 4;
        let px = self.data_premul().get(i..i + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub renders: u64,
    pub evictions: u64,
    /// Evicted buffers handed back to the pool.
    pub recycled: u64,
    pub entries: usize,
    pub bytes: usize,
    pub pool: SurfacePoolStats,
}

struct Inner {
    lru: LruCache<RenderCacheKey, Arc<RenderedFrame>>,
    bytes: usize,
    pool: SurfacePool,
    stats: FrameCacheStats,
}

impl Inner {
    fn recycle(&mut self, frame: Arc<RenderedFrame>) {
        self.bytes = self.bytes.saturating_sub(frame.byte_len());
        // Frames still held by a consumer are simply dropped from the cache.
        if let Ok(frame) = Arc::try_unwrap(frame) {
            self.pool.release(frame.pixmap);
            self.stats.recycled += 1;
        }
    }
}

/// Byte-bounded LRU of rendered frames backed by a reuse pool.
///
/// Rendering is serialised through one renderer; the LRU and the pool share a second lock that
/// is never held while drawing. Lock order is renderer, then cache state.
pub struct FrameRenderCache {
    opts: FrameCacheOpts,
    inner: Mutex<Inner>,
    renderer: Mutex<FrameRenderer>,
}

impl FrameRenderCache {
    pub fn new(opts: FrameCacheOpts) -> Self {
        let pool = SurfacePool::new(opts.pool.clone());
        Self {
            opts,
            inner: Mutex::new(Inner {
                lru: LruCache::unbounded(),
                bytes: 0,
                pool,
                stats: FrameCacheStats::default(),
            }),
            renderer: Mutex::new(FrameRenderer::new()),
        }
    }

    pub fn capacity_bytes(&self) -> usize {
        self.opts.capacity_bytes
    }

    pub fn get(&self, key: &RenderCacheKey) -> Option<Arc<RenderedFrame>> {
        let mut inner = lock(&self.inner);
        let hit = inner.lru.get(key).cloned();
        if hit.is_some() {
            inner.stats.hits += 1;
        } else {
            inner.stats.misses += 1;
        }
        hit
    }

    /// Return the cached frame for `key`, rendering it from `entity` on a miss.
    ///
    /// Concurrent callers asking for the same key get the same buffer.
    #[tracing::instrument(level = "debug", skip(self, entity, dynamic), fields(frame = key.frame))]
    pub fn render_and_cache(
        &self,
        key: &RenderCacheKey,
        entity: &AnimationEntity,
        dynamic: Option<&DynamicEntity>,
    ) -> SvgaResult<Arc<RenderedFrame>> {
        key.size.validated()?;
        if let Some(hit) = self.get(key) {
            return Ok(hit);
        }

        let mut renderer = lock(&self.renderer);
        // Another caller may have rendered this key while we waited for the renderer.
        if let Some(hit) = lock(&self.inner).lru.get(key).cloned() {
            return Ok(hit);
        }

        let mut pixmap = lock(&self.inner).pool.acquire(key.size)?;
        if let Err(e) = renderer.render(&mut pixmap, entity, key.frame, key.policy, dynamic) {
            lock(&self.inner).pool.release(pixmap);
            return Err(e);
        }

        let frame = Arc::new(RenderedFrame { key: *key, pixmap });
        let mut inner = lock(&self.inner);
        inner.stats.renders += 1;
        if let Some(old) = inner.lru.put(*key, frame.clone()) {
            inner.recycle(old);
        }
        inner.bytes = inner.bytes.saturating_add(frame.byte_len());

        while inner.bytes > self.opts.capacity_bytes {
            let Some((k, evicted)) = inner.lru.pop_lru() else {
                break;
            };
            inner.stats.evictions += 1;
            tracing::trace!(frame = k.frame, "rendered frame evicted");
            inner.recycle(evicted);
        }
        Ok(frame)
    }

    /// Drop every cached frame of one content hash.
    pub fn remove_content(&self, content: u64) {
        let mut inner = lock(&self.inner);
        let keys: Vec<RenderCacheKey> = inner
            .lru
            .iter()
            .map(|(k, _)| *k)
            .filter(|k| k.content == content)
            .collect();
        for k in keys {
            if let Some(frame) = inner.lru.pop(&k) {
                inner.recycle(frame);
            }
        }
    }

    /// Drop every cached frame; buffers go back to the pool where possible.
    pub fn clear(&self) {
        let mut inner = lock(&self.inner);
        while let Some((_, frame)) = inner.lru.pop_lru() {
            inner.recycle(frame);
        }
    }

    /// Release pooled buffers.
    pub fn trim_pool(&self) {
        lock(&self.inner).pool.clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> FrameCacheStats {
        let inner = lock(&self.inner);
        FrameCacheStats {
            entries: inner.lru.len(),
            bytes: inner.bytes,
            pool: inner.pool.stats(),
            ..inner.stats.clone()
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/cache/frame.rs"]
mod tests;

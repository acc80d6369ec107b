//! Explicitly constructed engine services.

use std::sync::Arc;

use crate::assets::extract::ResourceExtractor;
use crate::cache::entity::EntityCache;
use crate::cache::frame::{FrameRenderCache, RenderCacheKey, RenderedFrame};
use crate::entity::{AnimationEntity, DynamicEntity};
use crate::foundation::config::EngineOpts;
use crate::foundation::core::PixelSize;
use crate::foundation::error::SvgaResult;
use crate::load::coordinator::{
    LoadCoordinator, LoadHandle, LoadRequest, LoadResult, PendingLoad,
};
use crate::load::source::{ByteFetcher, DefaultFetcher};
use crate::playback::clock::EnvironmentClock;
use crate::playback::scheduler::{
    InstanceId, PlaybackEvent, PlaybackInstance, PlaybackOpts, PlaybackScheduler,
};
use crate::render::scale::ScalePolicy;

/// Caches, loader, clock and scheduler wired together.
///
/// Nothing here is process-global: tests and embedders build as many engines as they need.
pub struct Engine {
    opts: EngineOpts,
    entity_cache: Arc<EntityCache>,
    loader: LoadCoordinator,
    frame_cache: Arc<FrameRenderCache>,
    scheduler: PlaybackScheduler,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("entities", &self.entity_cache.len())
            .field("frames", &self.frame_cache.len())
            .field("loader", &self.loader)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Engine fetching over HTTP/disk, ticked manually through [`clock`](Self::clock).
    pub fn new(opts: EngineOpts) -> SvgaResult<Self> {
        let fetcher = Arc::new(DefaultFetcher::new(&opts.loader));
        Self::with_fetcher(opts, fetcher)
    }

    pub fn with_fetcher(opts: EngineOpts, fetcher: Arc<dyn ByteFetcher>) -> SvgaResult<Self> {
        Self::with_services(opts, fetcher, EnvironmentClock::manual())
    }

    pub fn with_services(
        opts: EngineOpts,
        fetcher: Arc<dyn ByteFetcher>,
        clock: EnvironmentClock,
    ) -> SvgaResult<Self> {
        opts.validate()?;
        let entity_cache = Arc::new(EntityCache::new(opts.entity_cache.clone()));
        let loader = LoadCoordinator::new(
            opts.loader.clone(),
            Arc::clone(&entity_cache),
            Arc::new(ResourceExtractor::new()),
            fetcher,
        )?;
        let frame_cache = Arc::new(FrameRenderCache::new(opts.frame_cache.clone()));
        let scheduler = PlaybackScheduler::new(clock, opts.throttle.clone());
        Ok(Self {
            opts,
            entity_cache,
            loader,
            frame_cache,
            scheduler,
        })
    }

    pub fn opts(&self) -> &EngineOpts {
        &self.opts
    }

    pub fn load(
        &self,
        request: impl Into<LoadRequest>,
        on_done: impl FnOnce(LoadResult) + Send + 'static,
    ) -> LoadHandle {
        self.loader.load(request, on_done)
    }

    pub fn load_pending(&self, request: impl Into<LoadRequest>) -> PendingLoad {
        self.loader.load_pending(request)
    }

    pub fn load_blocking(&self, request: impl Into<LoadRequest>) -> LoadResult {
        self.loader.load_blocking(request)
    }

    /// Render (or fetch from cache) one frame of `entity` at `size`.
    #[tracing::instrument(
        level = "debug",
        skip(self, entity, dynamic),
        fields(key = entity.cache_key())
    )]
    pub fn render_frame(
        &self,
        entity: &AnimationEntity,
        frame: u32,
        size: PixelSize,
        policy: ScalePolicy,
        dynamic: Option<&DynamicEntity>,
    ) -> SvgaResult<Arc<RenderedFrame>> {
        let key = RenderCacheKey::new(entity.content_id(), frame, size, policy)
            .with_dynamic(dynamic.map_or(0, DynamicEntity::fingerprint));
        self.frame_cache.render_and_cache(&key, entity, dynamic)
    }

    /// Start scheduling playback of `entity`; `sink` receives its events on each clock tick.
    pub fn play(
        &self,
        entity: &AnimationEntity,
        opts: PlaybackOpts,
        sink: impl Fn(InstanceId, &PlaybackEvent) + Send + Sync + 'static,
    ) -> InstanceId {
        self.scheduler
            .register(PlaybackInstance::for_entity(entity, opts), sink)
    }

    /// Drop an entity from the entity cache together with its rendered frames.
    pub fn evict(&self, cache_key: &str) -> Option<Arc<AnimationEntity>> {
        let entity = self.entity_cache.remove(cache_key)?;
        self.frame_cache.remove_content(entity.content_id());
        Some(entity)
    }

    pub fn entity_cache(&self) -> &Arc<EntityCache> {
        &self.entity_cache
    }

    pub fn frame_cache(&self) -> &Arc<FrameRenderCache> {
        &self.frame_cache
    }

    pub fn loader(&self) -> &LoadCoordinator {
        &self.loader
    }

    pub fn clock(&self) -> &EnvironmentClock {
        self.scheduler.clock()
    }

    pub fn scheduler(&self) -> &PlaybackScheduler {
        &self.scheduler
    }
}

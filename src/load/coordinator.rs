use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::assets::extract::{ResourceExtractor, is_populated};
use crate::cache::entity::EntityCache;
use crate::entity::{AnimationEntity, EntityOpts};
use crate::foundation::cancel::CancelToken;
use crate::foundation::config::LoaderOpts;
use crate::foundation::core::PixelSize;
use crate::foundation::error::{SvgaError, SvgaResult};
use crate::foundation::sync::lock;
use crate::format::decode::{
    MOVIE_BINARY, decode_dir, decode_inflated, decode_with_cancel, inflate, is_zip,
};
use crate::format::movie::MovieDescription;
use crate::load::pool::build_pool;
use crate::load::source::{ByteFetcher, ContentKey, MovieSource};

/// Failure delivered to every waiter of one load.
#[derive(Clone, Debug, thiserror::Error)]
#[error("loading '{alias}' failed: {error}")]
pub struct LoadFailure {
    pub error: Arc<SvgaError>,
    /// The source as the caller named it.
    pub alias: String,
}

impl LoadFailure {
    fn new(error: SvgaError, alias: impl Into<String>) -> Self {
        Self {
            error: Arc::new(error),
            alias: alias.into(),
        }
    }
}

pub type LoadResult = Result<Arc<AnimationEntity>, LoadFailure>;

type Waiter = Box<dyn FnOnce(LoadResult) + Send>;

/// One load request.
#[derive(Clone, Debug)]
pub struct LoadRequest {
    pub source: MovieSource,
    /// Expected display size; only the request that starts the pipeline applies it.
    pub target_size: Option<PixelSize>,
}

impl From<MovieSource> for LoadRequest {
    fn from(source: MovieSource) -> Self {
        Self {
            source,
            target_size: None,
        }
    }
}

impl From<&str> for LoadRequest {
    fn from(s: &str) -> Self {
        MovieSource::parse(s).into()
    }
}

struct InFlight {
    generation: u64,
    cancel: CancelToken,
    waiters: Vec<(u64, Waiter)>,
}

struct Shared {
    opts: LoaderOpts,
    cache_dir: PathBuf,
    cache: Arc<EntityCache>,
    extractor: Arc<ResourceExtractor>,
    fetcher: Arc<dyn ByteFetcher>,
    pool: rayon::ThreadPool,
    in_flight: Mutex<HashMap<ContentKey, InFlight>>,
    next_id: AtomicU64,
    pipelines: AtomicU64,
}

/// Deduplicates concurrent loads per [`ContentKey`] and runs them on a bounded worker pool.
///
/// Per key the state is either absent (idle or resolved into the entity cache) or in flight with
/// a list of waiters. An in-flight entry whose waiters all cancelled stays in the map until its
/// pipeline returns, so one key never has two pipelines at once. The in-flight map is the single
/// serialisation point: waiters are added, removed and drained only under its lock, so each
/// waiter is notified exactly once.
pub struct LoadCoordinator {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for LoadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadCoordinator")
            .field("cache_dir", &self.shared.cache_dir)
            .field("in_flight", &self.in_flight_len())
            .finish_non_exhaustive()
    }
}

impl LoadCoordinator {
    pub fn new(
        opts: LoaderOpts,
        cache: Arc<EntityCache>,
        extractor: Arc<ResourceExtractor>,
        fetcher: Arc<dyn ByteFetcher>,
    ) -> SvgaResult<Self> {
        let pool = build_pool(&opts)?;
        Ok(Self {
            shared: Arc::new(Shared {
                cache_dir: opts.resolved_cache_dir(),
                opts,
                cache,
                extractor,
                fetcher,
                pool,
                in_flight: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                pipelines: AtomicU64::new(0),
            }),
        })
    }

    /// Request an entity; `on_done` runs exactly once unless the returned handle cancels it first.
    ///
    /// Cache hits (and invalid sources) complete synchronously on the calling thread. Otherwise
    /// `on_done` runs on a loader worker.
    pub fn load(
        &self,
        request: impl Into<LoadRequest>,
        on_done: impl FnOnce(LoadResult) + Send + 'static,
    ) -> LoadHandle {
        let request = request.into();
        let alias = request.source.alias();
        let key = match ContentKey::for_source(&request.source) {
            Ok(k) => k,
            Err(e) => {
                on_done(Err(LoadFailure::new(e, alias)));
                return LoadHandle::done();
            }
        };

        if let Some(hit) = self.shared.cache.get(key.dir_name()) {
            tracing::debug!(%key, "entity cache hit");
            on_done(Ok(hit));
            return LoadHandle::done();
        }

        let waiter_id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let mut in_flight = lock(&self.shared.in_flight);
        if let Some(entry) = in_flight.get_mut(&key) {
            if entry.waiters.is_empty() {
                // Every earlier waiter cancelled but the pipeline is still running; re-arm it.
                entry.cancel.reset();
                tracing::debug!(%key, "re-armed cancelled load");
            }
            entry.waiters.push((waiter_id, Box::new(on_done)));
            tracing::debug!(%key, waiters = entry.waiters.len(), "joined in-flight load");
            return LoadHandle::waiting(&self.shared, key.clone(), entry.generation, waiter_id);
        }
        // A pipeline may have finished between the cache lookup and taking the lock.
        if let Some(hit) = self.shared.cache.get(key.dir_name()) {
            drop(in_flight);
            on_done(Ok(hit));
            return LoadHandle::done();
        }

        let generation = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancelToken::new();
        in_flight.insert(
            key.clone(),
            InFlight {
                generation,
                cancel: cancel.clone(),
                waiters: vec![(waiter_id, Box::new(on_done))],
            },
        );
        drop(in_flight);

        let handle = LoadHandle::waiting(&self.shared, key.clone(), generation, waiter_id);
        self.shared.spawn_pipeline(key, generation, request, cancel);
        handle
    }

    /// Channel flavour of [`load`](Self::load).
    pub fn load_pending(&self, request: impl Into<LoadRequest>) -> PendingLoad {
        let request = request.into();
        let alias = request.source.alias();
        let (tx, rx) = crossbeam_channel::bounded(1);
        let handle = self.load(request, move |result| {
            let _ = tx.send(result);
        });
        PendingLoad { rx, handle, alias }
    }

    /// Load and wait for the result on the calling thread.
    pub fn load_blocking(&self, request: impl Into<LoadRequest>) -> LoadResult {
        self.load_pending(request).wait()
    }

    /// Number of pipelines started since construction.
    pub fn pipelines_started(&self) -> u64 {
        self.shared.pipelines.load(Ordering::Relaxed)
    }

    pub fn in_flight_len(&self) -> usize {
        lock(&self.shared.in_flight).len()
    }

    pub fn cache_dir(&self) -> &Path {
        &self.shared.cache_dir
    }
}

impl Shared {
    fn spawn_pipeline(
        self: &Arc<Self>,
        key: ContentKey,
        generation: u64,
        request: LoadRequest,
        cancel: CancelToken,
    ) {
        self.pipelines.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::clone(self);
        self.pool.spawn(move || {
            let result = shared.run(&key, &request, &cancel);
            shared.finish(key, generation, request, result);
        });
    }

    #[tracing::instrument(level = "debug", skip_all, fields(key = %key))]
    fn run(
        &self,
        key: &ContentKey,
        request: &LoadRequest,
        cancel: &CancelToken,
    ) -> SvgaResult<Arc<AnimationEntity>> {
        self.jitter();
        cancel.check()?;

        let dest = self.cache_dir.join(key.dir_name());
        if self.opts.use_disk_cache && is_populated(&dest) {
            match decode_dir(&dest) {
                Ok(movie) => {
                    tracing::debug!(dir = %dest.display(), "disk cache hit");
                    return Ok(self.build_entity(key, movie, Some(dest), request.target_size));
                }
                Err(e) => {
                    tracing::warn!(
                        dir = %dest.display(),
                        error = %e,
                        "disk cache unusable; refetching"
                    );
                    let _ = std::fs::remove_dir_all(&dest);
                }
            }
        }

        let bytes = self.fetcher.fetch(&request.source, cancel)?;
        cancel.check()?;
        let (movie, dir) = self.decode_payload(&bytes, &dest, cancel)?;
        Ok(self.build_entity(key, movie, dir, request.target_size))
    }

    fn decode_payload(
        &self,
        bytes: &[u8],
        dest: &Path,
        cancel: &CancelToken,
    ) -> SvgaResult<(MovieDescription, Option<PathBuf>)> {
        if !self.opts.use_disk_cache {
            return Ok((decode_with_cancel(bytes, cancel)?, None));
        }
        if bytes.is_empty() {
            return Err(SvgaError::resource("empty movie payload"));
        }

        if is_zip(bytes) {
            self.extractor.extract(bytes, dest, cancel)?;
            return Ok((decode_dir(dest)?, Some(dest.to_path_buf())));
        }

        let raw = inflate(bytes, cancel)?;
        let movie = decode_inflated(&raw)?;
        match self.extractor.store_file(dest, MOVIE_BINARY, &raw) {
            Ok(_) => Ok((movie, Some(dest.to_path_buf()))),
            Err(e) => {
                tracing::warn!(dir = %dest.display(), error = %e, "could not write disk cache");
                Ok((movie, None))
            }
        }
    }

    fn build_entity(
        &self,
        key: &ContentKey,
        movie: MovieDescription,
        resource_dir: Option<PathBuf>,
        target_size: Option<PixelSize>,
    ) -> Arc<AnimationEntity> {
        let entity = Arc::new(AnimationEntity::new(
            movie,
            EntityOpts {
                cache_key: key.dir_name().to_string(),
                content_id: key.content_id(),
                resource_dir,
                target_size,
            },
        ));
        entity.prepare(|| {});
        entity
    }

    fn jitter(&self) {
        let (lo, hi) = (self.opts.jitter_min_ms, self.opts.jitter_max_ms);
        if hi == 0 {
            return;
        }
        let ms = fastrand::u64(lo.min(hi)..=hi);
        std::thread::sleep(Duration::from_millis(ms));
    }

    /// Store the result and notify every waiter. A pipeline that stopped on a cancel which
    /// was re-armed afterwards runs again for the new waiters.
    fn finish(
        self: &Arc<Self>,
        key: ContentKey,
        generation: u64,
        request: LoadRequest,
        result: SvgaResult<Arc<AnimationEntity>>,
    ) {
        let aborted = matches!(result, Err(SvgaError::Cancelled));
        let outcome: LoadResult = match result {
            Ok(entity) => {
                for (k, _) in self.cache.put(key.dir_name(), Arc::clone(&entity)) {
                    tracing::debug!(key = %k, "evicted while storing a fresh load");
                }
                Ok(entity)
            }
            Err(e) => {
                tracing::debug!(%key, error = %e, "load failed");
                Err(LoadFailure::new(e, request.source.alias()))
            }
        };

        let mut restart = None;
        let waiters = {
            let mut in_flight = lock(&self.in_flight);
            let waiting = match in_flight.get(&key) {
                Some(entry) if entry.generation == generation => Some(entry.waiters.len()),
                _ => None,
            };
            match waiting {
                Some(n) if aborted && n > 0 => {
                    let cancel = CancelToken::new();
                    if let Some(entry) = in_flight.get_mut(&key) {
                        entry.cancel = cancel.clone();
                    }
                    restart = Some(cancel);
                    Vec::new()
                }
                Some(_) => in_flight
                    .remove(&key)
                    .map(|e| e.waiters)
                    .unwrap_or_default(),
                None => Vec::new(),
            }
        };

        if let Some(cancel) = restart {
            tracing::debug!(%key, "restarting load for waiters that joined after a cancel");
            self.spawn_pipeline(key, generation, request, cancel);
            return;
        }

        tracing::debug!(%key, waiters = waiters.len(), ok = outcome.is_ok(), "load finished");
        for (_, waiter) in waiters {
            waiter(outcome.clone());
        }
    }

    fn cancel_waiter(&self, key: &ContentKey, generation: u64, waiter_id: u64) -> bool {
        let mut in_flight = lock(&self.in_flight);
        let Some(entry) = in_flight.get_mut(key) else {
            return false;
        };
        if entry.generation != generation {
            return false;
        }
        let before = entry.waiters.len();
        entry.waiters.retain(|(id, _)| *id != waiter_id);
        let removed = entry.waiters.len() != before;
        // The entry stays until the pipeline finishes so a new request cannot start a second
        // pipeline for the same key.
        if entry.waiters.is_empty() {
            entry.cancel.cancel();
            tracing::debug!(%key, "last waiter cancelled; aborting load");
        }
        removed
    }
}

/// Cancels one waiter registration.
#[derive(Debug, Clone)]
pub struct LoadHandle {
    target: Option<(Weak<Shared>, ContentKey, u64, u64)>,
}

impl LoadHandle {
    fn done() -> Self {
        Self { target: None }
    }

    fn waiting(shared: &Arc<Shared>, key: ContentKey, generation: u64, waiter_id: u64) -> Self {
        Self {
            target: Some((Arc::downgrade(shared), key, generation, waiter_id)),
        }
    }

    /// Remove this waiter. Returns `false` when it already completed or was cancelled.
    ///
    /// Cancelling the last waiter of a load aborts the underlying work.
    pub fn cancel(&self) -> bool {
        match &self.target {
            Some((shared, key, generation, waiter_id)) => shared
                .upgrade()
                .is_some_and(|s| s.cancel_waiter(key, *generation, *waiter_id)),
            None => false,
        }
    }
}

/// A load whose result arrives on a channel.
#[derive(Debug)]
pub struct PendingLoad {
    rx: crossbeam_channel::Receiver<LoadResult>,
    handle: LoadHandle,
    alias: String,
}

impl PendingLoad {
    /// Block until the load completes; a cancelled load reports [`SvgaError::Cancelled`].
    pub fn wait(self) -> LoadResult {
        self.rx
            .recv()
            .unwrap_or_else(|_| Err(LoadFailure::new(SvgaError::Cancelled, self.alias)))
    }

    /// Like [`wait`](Self::wait) with a deadline. `None` means still loading.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<LoadResult> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => None,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => Some(Err(
                LoadFailure::new(SvgaError::Cancelled, self.alias.clone()),
            )),
        }
    }

    pub fn try_get(&self) -> Option<LoadResult> {
        self.rx.try_recv().ok()
    }

    pub fn cancel(&self) -> bool {
        self.handle.cancel()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/load/coordinator.rs"]
mod tests;

//! Prepared, playable animations.

pub mod dynamic;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::assets::decode::{Bitmap, decode_image};
use crate::foundation::core::{PixelSize, ViewBox};
use crate::foundation::error::{SvgaError, SvgaResult};
use crate::foundation::sync::{lock, read, write};
use crate::format::movie::{AudioTrack, ImageRef, MovieDescription, SpriteTimeline};

pub use dynamic::DynamicEntity;

/// Weight charged for an entity without bitmaps.
pub const MIN_WEIGHT_BYTES: usize = 1024;

const AUDIO_DIR: &str = "audio";

type ReadyCallback = Box<dyn FnOnce() + Send>;

/// Construction options for [`AnimationEntity`].
#[derive(Clone, Debug, Default)]
pub struct EntityOpts {
    /// Entity cache key. Empty means the entity is not shared through the cache.
    pub cache_key: String,
    /// Content hash used to namespace rendered frames.
    pub content_id: u64,
    /// Extraction directory; audio files are written under `<dir>/audio/`.
    pub resource_dir: Option<PathBuf>,
    /// Expected display size; large images are downsampled towards it.
    pub target_size: Option<PixelSize>,
}

/// An audio track bound to its prepared file.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct AudioHandle {
    pub track: AudioTrack,
    /// `None` when the track has no payload, no duration, or no resource directory.
    pub path: Option<PathBuf>,
}

struct Resources {
    sprites: Arc<[SpriteTimeline]>,
    pending_images: BTreeMap<String, ImageRef>,
    bitmaps: HashMap<String, Bitmap>,
    audio_payloads: BTreeMap<String, Vec<u8>>,
    audios: Vec<AudioTrack>,
    audio_handles: Vec<AudioHandle>,
}

/// Decoded movie plus its prepared resources.
///
/// Shared between players through `Arc`; logically immutable after [`prepare`] apart from
/// disposal.
///
/// [`prepare`]: AnimationEntity::prepare
pub struct AnimationEntity {
    cache_key: String,
    content_id: u64,
    version: String,
    view_box: ViewBox,
    fps: u32,
    frames: u32,
    resource_dir: Option<PathBuf>,
    target_size: Option<PixelSize>,

    resources: RwLock<Resources>,
    on_ready: Mutex<Option<ReadyCallback>>,
    prepare_lock: Mutex<()>,
    prepared: AtomicBool,
    audio_ready: AtomicBool,
    cleared: AtomicBool,
}

impl std::fmt::Debug for AnimationEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnimationEntity")
            .field("cache_key", &self.cache_key)
            .field("view_box", &self.view_box)
            .field("fps", &self.fps)
            .field("frames", &self.frames)
            .field("prepared", &self.is_prepared())
            .field("cleared", &self.is_cleared())
            .finish_non_exhaustive()
    }
}

impl AnimationEntity {
    pub fn new(movie: MovieDescription, opts: EntityOpts) -> Self {
        Self {
            cache_key: opts.cache_key,
            content_id: opts.content_id,
            version: movie.version,
            view_box: movie.view_box,
            fps: movie.fps,
            frames: movie.frames,
            resource_dir: opts.resource_dir,
            target_size: opts.target_size,
            resources: RwLock::new(Resources {
                sprites: Arc::from(movie.sprites),
                pending_images: movie.images,
                bitmaps: HashMap::new(),
                audio_payloads: movie.audio_payloads,
                audios: movie.audios,
                audio_handles: Vec::new(),
            }),
            on_ready: Mutex::new(None),
            prepare_lock: Mutex::new(()),
            prepared: AtomicBool::new(false),
            audio_ready: AtomicBool::new(false),
            cleared: AtomicBool::new(false),
        }
    }

    /// Decode images (synchronously) and start audio setup (in the background), then invoke
    /// `on_ready` unless [`clear_callback`](Self::clear_callback) ran first.
    ///
    /// Repeated calls are cheap: resources are prepared once and later callbacks fire
    /// immediately.
    pub fn prepare(self: &Arc<Self>, on_ready: impl FnOnce() + Send + 'static) {
        *lock(&self.on_ready) = Some(Box::new(on_ready));

        {
            let _guard = lock(&self.prepare_lock);
            if !self.prepared.load(Ordering::Acquire) {
                self.decode_images();
                self.start_audio_setup();
                self.prepared.store(true, Ordering::Release);
            }
        }

        let callback = lock(&self.on_ready).take();
        if let Some(callback) = callback {
            callback();
        }
    }

    fn decode_images(&self) {
        let pending = std::mem::take(&mut write(&self.resources).pending_images);
        let mut decoded = HashMap::with_capacity(pending.len());
        for (key, image) in pending {
            let result = match &image {
                ImageRef::Inline(bytes) => decode_image(bytes, self.target_size),
                ImageRef::File(path) => std::fs::read(path)
                    .map_err(|e| SvgaError::io(format!("read '{}': {e}", path.display())))
                    .and_then(|bytes| decode_image(&bytes, self.target_size)),
            };
            match result {
                Ok(bitmap) => {
                    decoded.insert(key, bitmap);
                }
                Err(e) => tracing::warn!(%key, error = %e, "skipping undecodable image"),
            }
        }
        tracing::debug!(images = decoded.len(), key = %self.cache_key, "entity images decoded");
        write(&self.resources).bitmaps.extend(decoded);
    }

    fn start_audio_setup(self: &Arc<Self>) {
        if read(&self.resources).audios.is_empty() {
            self.audio_ready.store(true, Ordering::Release);
            return;
        }
        let entity = Arc::clone(self);
        rayon::spawn(move || entity.setup_audio());
    }

    fn setup_audio(&self) {
        let (payloads, tracks) = {
            let mut r = write(&self.resources);
            (std::mem::take(&mut r.audio_payloads), r.audios.clone())
        };

        let mut handles = Vec::with_capacity(tracks.len());
        for track in tracks {
            let path = match payloads.get(&track.key) {
                Some(bytes) if track.total_time_ms > 0 => match self.write_audio(&track.key, bytes) {
                    Ok(p) => Some(p),
                    Err(e) => {
                        tracing::warn!(key = %track.key, error = %e, "audio setup failed");
                        None
                    }
                },
                _ => None,
            };
            handles.push(AudioHandle { track, path });
        }

        if !self.is_cleared() {
            write(&self.resources).audio_handles = handles;
        }
        self.audio_ready.store(true, Ordering::Release);
    }

    fn write_audio(&self, key: &str, bytes: &[u8]) -> SvgaResult<PathBuf> {
        let dir = self
            .resource_dir
            .as_deref()
            .map(|d| d.join(AUDIO_DIR))
            .ok_or_else(|| SvgaError::resource("no resource directory for audio"))?;
        std::fs::create_dir_all(&dir)
            .map_err(|e| SvgaError::io(format!("create '{}': {e}", dir.display())))?;

        let path = dir.join(format!("{}.mp3", audio_file_stem(key)));
        if !path.is_file() {
            std::fs::write(&path, bytes)
                .map_err(|e| SvgaError::io(format!("write '{}': {e}", path.display())))?;
        }
        Ok(path)
    }

    /// Drop the pending ready callback without touching resources.
    pub fn clear_callback(&self) {
        lock(&self.on_ready).take();
    }

    /// Release audio; entities outside the cache also release bitmaps and sprites.
    pub fn clear(&self) {
        self.cleared.store(true, Ordering::Release);
        let mut r = write(&self.resources);
        r.audio_handles.clear();
        r.audio_payloads.clear();
        if self.cache_key.is_empty() {
            r.bitmaps.clear();
            r.pending_images.clear();
            r.sprites = Arc::from(Vec::new());
        }
    }

    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    pub fn content_id(&self) -> u64 {
        self.content_id
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn view_box(&self) -> ViewBox {
        self.view_box
    }

    /// Declared frame rate (`0` when the movie declares none).
    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn frames(&self) -> u32 {
        self.frames
    }

    pub fn resource_dir(&self) -> Option<&Path> {
        self.resource_dir.as_deref()
    }

    pub fn sprites(&self) -> Arc<[SpriteTimeline]> {
        read(&self.resources).sprites.clone()
    }

    pub fn bitmap(&self, key: &str) -> Option<Bitmap> {
        read(&self.resources).bitmaps.get(key).cloned()
    }

    pub fn bitmap_keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = read(&self.resources).bitmaps.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn audio_tracks(&self) -> Vec<AudioTrack> {
        read(&self.resources).audios.clone()
    }

    pub fn audio_handles(&self) -> Vec<AudioHandle> {
        read(&self.resources).audio_handles.clone()
    }

    /// Sum of decoded bitmap sizes.
    pub fn bitmap_bytes(&self) -> usize {
        read(&self.resources)
            .bitmaps
            .values()
            .map(Bitmap::byte_len)
            .sum()
    }

    /// Cache weight: bitmap bytes, floored at `floor` so bitmap-free entities still count.
    pub fn weight_bytes(&self, floor: usize) -> usize {
        self.bitmap_bytes().max(floor)
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared.load(Ordering::Acquire)
    }

    pub fn is_audio_ready(&self) -> bool {
        self.audio_ready.load(Ordering::Acquire)
    }

    pub fn is_cleared(&self) -> bool {
        self.cleared.load(Ordering::Acquire)
    }
}

fn audio_file_stem(key: &str) -> String {
    let stem: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if stem.is_empty() { "audio".to_string() } else { stem }
}

#[cfg(test)]
#[path = "../../tests/unit/entity/entity.rs"]
mod tests;

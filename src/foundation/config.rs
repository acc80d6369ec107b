use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::entity::MIN_WEIGHT_BYTES;
use crate::foundation::error::{SvgaError, SvgaResult};
use crate::playback::scheduler::LowPolicy;
use crate::render::surface_pool::SurfacePoolOpts;

const MIB: usize = 1024 * 1024;

/// Environment variable overriding [`EntityCacheOpts::capacity_bytes`].
pub const ENV_ENTITY_CACHE_BYTES: &str = "SVGA_ENTITY_CACHE_BYTES";
/// Environment variable overriding [`FrameCacheOpts::capacity_bytes`].
pub const ENV_FRAME_CACHE_BYTES: &str = "SVGA_FRAME_CACHE_BYTES";
/// Environment variable pinning the loader worker count.
pub const ENV_LOADER_THREADS: &str = "SVGA_LOADER_THREADS";
/// Environment variable overriding the disk cache root.
pub const ENV_CACHE_DIR: &str = "SVGA_CACHE_DIR";

/// Top-level engine configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOpts {
    pub entity_cache: EntityCacheOpts,
    pub frame_cache: FrameCacheOpts,
    pub loader: LoaderOpts,
    pub throttle: ThrottleOpts,
}

impl EngineOpts {
    /// Parse a (possibly partial) JSON configuration; missing fields keep their defaults.
    pub fn from_json_str(s: &str) -> SvgaResult<Self> {
        let opts: Self = serde_json::from_str(s)
            .map_err(|e| SvgaError::validation(format!("engine config: {e}")))?;
        opts.validate()?;
        Ok(opts)
    }

    /// Apply `SVGA_*` environment overrides. Unparsable or zero values are ignored.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|k| std::env::var(k).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let positive = |k: &str| {
            lookup(k)
                .and_then(|v| v.trim().parse::<usize>().ok())
                .filter(|&n| n > 0)
        };

        if let Some(n) = positive(ENV_ENTITY_CACHE_BYTES) {
            self.entity_cache.capacity_bytes = n;
        }
        if let Some(n) = positive(ENV_FRAME_CACHE_BYTES) {
            self.frame_cache.capacity_bytes = n;
        }
        if let Some(n) = positive(ENV_LOADER_THREADS) {
            self.loader.threads = Some(n);
        }
        if let Some(dir) = lookup(ENV_CACHE_DIR).filter(|v| !v.trim().is_empty()) {
            self.loader.cache_dir = Some(PathBuf::from(dir));
        }
        self
    }

    pub fn validate(&self) -> SvgaResult<()> {
        let l = &self.loader;
        if l.min_threads == 0 || l.min_threads > l.max_threads {
            return Err(SvgaError::validation(format!(
                "loader threads must satisfy 1 <= min ({}) <= max ({})",
                l.min_threads, l.max_threads
            )));
        }
        if l.jitter_min_ms > l.jitter_max_ms {
            return Err(SvgaError::validation("loader jitter min exceeds max"));
        }
        if l.low_memory_bytes > l.mid_memory_bytes {
            return Err(SvgaError::validation(
                "low-memory threshold exceeds mid-memory threshold",
            ));
        }
        if self.throttle.max_fps == 0 || self.throttle.default_fps == 0 {
            return Err(SvgaError::validation("frame rates must be non-zero"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityCacheOpts {
    /// Total weight budget in bytes.
    pub capacity_bytes: usize,
    /// Weight charged for entities that own no bitmaps.
    pub floor_weight_bytes: usize,
}

impl Default for EntityCacheOpts {
    fn default() -> Self {
        Self {
            capacity_bytes: 20 * MIB,
            floor_weight_bytes: MIN_WEIGHT_BYTES,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameCacheOpts {
    /// Total byte budget of cached rendered frames.
    pub capacity_bytes: usize,
    /// Reuse pool fed by evicted frames.
    pub pool: SurfacePoolOpts,
}

impl Default for FrameCacheOpts {
    fn default() -> Self {
        Self {
            capacity_bytes: 40 * MIB,
            pool: SurfacePoolOpts::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderOpts {
    /// Pin the worker count (still clamped to `min_threads..=max_threads`).
    pub threads: Option<usize>,
    pub min_threads: usize,
    pub max_threads: usize,
    /// Devices with less RAM than this get the minimum worker count.
    pub low_memory_bytes: u64,
    /// Devices below this get a small fixed pool.
    pub mid_memory_bytes: u64,
    /// Random delay before a load starts work.
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub user_agent: String,
    /// Root of per-content extraction directories. `None` uses a directory under the system
    /// temp dir.
    pub cache_dir: Option<PathBuf>,
    /// Root that asset paths resolve against. `None` uses the working directory.
    pub asset_root: Option<PathBuf>,
    /// Try a previously extracted directory before fetching.
    pub use_disk_cache: bool,
}

impl Default for LoaderOpts {
    fn default() -> Self {
        Self {
            threads: None,
            min_threads: 2,
            max_threads: 12,
            low_memory_bytes: 2_048_000_000,
            mid_memory_bytes: 3_000_000_000,
            jitter_min_ms: 10,
            jitter_max_ms: 150,
            connect_timeout_ms: 15_000,
            read_timeout_ms: 30_000,
            user_agent: format!("svgaplay/{}", env!("CARGO_PKG_VERSION")),
            cache_dir: None,
            asset_root: None,
            use_disk_cache: true,
        }
    }
}

impl LoaderOpts {
    pub fn resolved_cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("svgaplay-cache"))
    }
}

/// Frame-rate throttling breakpoints (observed fps).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleOpts {
    /// Upper bound on any instance's frame rate.
    pub max_fps: u32,
    /// Rate used when a movie declares none.
    pub default_fps: u32,
    /// Normal priority halves below this load.
    pub normal_threshold: u32,
    /// Low priority quarters below this load.
    pub low_quarter_threshold: u32,
    /// Graded low priority divides by three below this load.
    pub low_third_threshold: u32,
    /// Load under which instances opting in freeze on frame 0.
    pub critical_threshold: u32,
    pub low_policy: LowPolicy,
}

impl Default for ThrottleOpts {
    fn default() -> Self {
        Self {
            max_fps: 60,
            default_fps: 30,
            normal_threshold: 48,
            low_quarter_threshold: 40,
            low_third_threshold: 45,
            critical_threshold: 20,
            low_policy: LowPolicy::default(),
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/config.rs"]
mod tests;

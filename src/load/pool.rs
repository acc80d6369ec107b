//! Worker pool sizing for fetch/decode/extract work.

use crate::foundation::config::LoaderOpts;
use crate::foundation::error::{SvgaError, SvgaResult};

/// Pick a worker count for a device with `total_memory` bytes of RAM and `cpus` cores.
///
/// Low-memory devices get the minimum, mid-range devices four workers, and everything else one
/// worker per core. An explicit `threads` setting wins. The result is always clamped to
/// `min_threads..=max_threads`.
pub fn worker_count(opts: &LoaderOpts, total_memory: u64, cpus: usize) -> usize {
    let lo = opts.min_threads.max(1);
    let hi = opts.max_threads.max(lo);
    let n = match opts.threads {
        Some(n) => n,
        None if total_memory < opts.low_memory_bytes => lo,
        None if total_memory < opts.mid_memory_bytes => 4,
        None => cpus.clamp(4, hi.max(4)),
    };
    n.clamp(lo, hi)
}

/// [`worker_count`] for the current machine.
pub fn system_worker_count(opts: &LoaderOpts) -> usize {
    let mut sys = sysinfo::System::new();
    sys.refresh_memory();
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    worker_count(opts, sys.total_memory(), cpus)
}

pub(crate) fn build_pool(opts: &LoaderOpts) -> SvgaResult<rayon::ThreadPool> {
    let threads = system_worker_count(opts);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("svgaplay-load-{i}"))
        .build()
        .map_err(|e| SvgaError::validation(format!("failed to build loader thread pool: {e}")))?;
    tracing::info!(threads, "loader pool started");
    Ok(pool)
}

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::foundation::sync::{lock, read, write};

/// Load reported before a full second of ticks has been observed.
pub const DEFAULT_LOAD_FPS: u32 = 60;

const WINDOW_NS: u64 = 1_000_000_000;

/// One clock tick as seen by listeners.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tick {
    /// Monotonic timestamp supplied by the driver.
    pub now_ns: u64,
    /// Ticks observed during the last second.
    pub load_fps: u32,
}

pub type ListenerId = u64;

type Listener = Arc<dyn Fn(Tick) + Send + Sync>;

/// Source of ticks. Started when the first consumer attaches and stopped after the last one
/// detaches.
pub trait ClockDriver: Send + Sync {
    fn start(&self, sink: TickSink);
    fn stop(&self);
}

/// Driver-side entry point into a clock.
#[derive(Clone)]
pub struct TickSink {
    clock: Weak<ClockInner>,
}

impl TickSink {
    /// Deliver a tick. Returns `false` once the clock is gone.
    pub fn tick(&self, now_ns: u64) -> bool {
        match self.clock.upgrade() {
            Some(inner) => {
                inner.tick(now_ns);
                true
            }
            None => false,
        }
    }
}

/// Driver for callers that tick the clock themselves.
#[derive(Debug, Default)]
pub struct ManualDriver {
    running: Arc<AtomicBool>,
}

impl ManualDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared flag reporting whether the clock currently wants ticks.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }
}

impl ClockDriver for ManualDriver {
    fn start(&self, _sink: TickSink) {
        self.running.store(true, Ordering::Release);
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Background thread ticking at a fixed period.
#[derive(Debug)]
pub struct IntervalDriver {
    period: Duration,
    origin: Instant,
    worker: Mutex<Option<(Arc<AtomicBool>, JoinHandle<()>)>>,
}

impl IntervalDriver {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            origin: Instant::now(),
            worker: Mutex::new(None),
        }
    }

    /// 60 Hz.
    pub fn display_rate() -> Self {
        Self::new(Duration::from_nanos(16_666_667))
    }
}

impl ClockDriver for IntervalDriver {
    fn start(&self, sink: TickSink) {
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return;
        }
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let (period, origin) = (self.period, self.origin);
        let spawned = std::thread::Builder::new()
            .name("svgaplay-clock".to_string())
            .spawn(move || {
                while !flag.load(Ordering::Acquire) {
                    std::thread::sleep(period);
                    if flag.load(Ordering::Acquire) {
                        break;
                    }
                    let now = u64::try_from(origin.elapsed().as_nanos()).unwrap_or(u64::MAX);
                    if !sink.tick(now) {
                        break;
                    }
                }
            });
        match spawned {
            Ok(handle) => *worker = Some((stop, handle)),
            Err(e) => tracing::warn!(error = %e, "failed to start clock thread"),
        }
    }

    fn stop(&self) {
        let Some((stop, handle)) = lock(&self.worker).take() else {
            return;
        };
        stop.store(true, Ordering::Release);
        // The last detach may happen inside a listener running on the clock thread itself.
        if handle.thread().id() != std::thread::current().id() {
            let _ = handle.join();
        }
    }
}

#[derive(Default)]
struct LoadWindow {
    first_ns: Option<u64>,
    last_ns: Option<u64>,
    ticks: VecDeque<u64>,
    load_fps: u32,
}

struct ClockInner {
    driver: Box<dyn ClockDriver>,
    attached: Mutex<usize>,
    window: Mutex<LoadWindow>,
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
}

impl ClockInner {
    fn tick(&self, now_ns: u64) {
        let tick = {
            let mut w = lock(&self.window);
            let first = *w.first_ns.get_or_insert(now_ns);
            w.last_ns = Some(now_ns);
            w.ticks.push_back(now_ns);
            while w
                .ticks
                .front()
                .is_some_and(|&t| now_ns.saturating_sub(t) >= WINDOW_NS)
            {
                w.ticks.pop_front();
            }
            w.load_fps = if now_ns.saturating_sub(first) >= WINDOW_NS {
                u32::try_from(w.ticks.len()).unwrap_or(u32::MAX)
            } else {
                DEFAULT_LOAD_FPS
            };
            Tick {
                now_ns,
                load_fps: w.load_fps,
            }
        };

        // Snapshot so listeners may add or remove listeners while being called.
        let listeners: Vec<Listener> = read(&self.listeners)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for l in listeners {
            l(tick);
        }
    }
}

/// Shared ticking signal plus a one-second load metric.
///
/// Cloning shares the clock. The driver runs only while at least one [`ClockHandle`] is alive.
#[derive(Clone)]
pub struct EnvironmentClock {
    inner: Arc<ClockInner>,
}

impl std::fmt::Debug for EnvironmentClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentClock")
            .field("attached", &self.attached_count())
            .field("load_fps", &self.load_fps())
            .finish_non_exhaustive()
    }
}

impl EnvironmentClock {
    pub fn new(driver: impl ClockDriver + 'static) -> Self {
        Self {
            inner: Arc::new(ClockInner {
                driver: Box::new(driver),
                attached: Mutex::new(0),
                window: Mutex::new(LoadWindow {
                    load_fps: DEFAULT_LOAD_FPS,
                    ..LoadWindow::default()
                }),
                listeners: RwLock::new(Vec::new()),
                next_listener: AtomicU64::new(1),
            }),
        }
    }

    /// A clock ticked only through [`tick`](Self::tick).
    pub fn manual() -> Self {
        Self::new(ManualDriver::new())
    }

    /// Register a consumer; the first attachment starts the driver.
    pub fn attach(&self) -> ClockHandle {
        let mut attached = lock(&self.inner.attached);
        *attached += 1;
        if *attached == 1 {
            tracing::debug!("clock driver starting");
            self.inner.driver.start(TickSink {
                clock: Arc::downgrade(&self.inner),
            });
        }
        ClockHandle {
            clock: Arc::clone(&self.inner),
        }
    }

    pub fn attached_count(&self) -> usize {
        *lock(&self.inner.attached)
    }

    /// Deliver a tick and call every listener synchronously.
    pub fn tick(&self, now_ns: u64) {
        self.inner.tick(now_ns);
    }

    pub fn load_fps(&self) -> u32 {
        lock(&self.inner.window).load_fps
    }

    pub fn last_tick_ns(&self) -> Option<u64> {
        lock(&self.inner.window).last_ns
    }

    pub fn add_listener(&self, listener: impl Fn(Tick) + Send + Sync + 'static) -> ListenerId {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        write(&self.inner.listeners).push((id, Arc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = write(&self.inner.listeners);
        let before = listeners.len();
        listeners.retain(|(l, _)| *l != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        read(&self.inner.listeners).len()
    }
}

/// Keeps the clock driver running; dropping the last handle stops it.
pub struct ClockHandle {
    clock: Arc<ClockInner>,
}

impl std::fmt::Debug for ClockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClockHandle").finish_non_exhaustive()
    }
}

impl Drop for ClockHandle {
    fn drop(&mut self) {
        {
            let mut attached = lock(&self.clock.attached);
            *attached = attached.saturating_sub(1);
            if *attached > 0 {
                return;
            }
        }
        // Stopping joins the clock thread, whose listeners may attach; keep `attached` unlocked.
        tracing::debug!("last clock consumer detached; stopping driver");
        self.clock.driver.stop();

        let attached = lock(&self.clock.attached);
        if *attached > 0 {
            tracing::debug!("clock reattached while stopping; restarting driver");
            self.clock.driver.start(TickSink {
                clock: Arc::downgrade(&self.clock),
            });
        } else {
            *lock(&self.clock.window) = LoadWindow {
                load_fps: DEFAULT_LOAD_FPS,
                ..LoadWindow::default()
            };
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/playback/clock.rs"]
mod tests;

//! Load-adaptive frame scheduling.
//!
//! Each playing instance maps clock time to a frame index. The target frame rate is the movie's
//! own rate, capped, then throttled by priority when the shared clock reports that the process
//! is not keeping up. Redraws are edge-triggered: an instance reports a frame only when its
//! index changes.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::entity::AnimationEntity;
use crate::foundation::config::ThrottleOpts;
use crate::foundation::error::SvgaError;
use crate::foundation::sync::lock;
use crate::playback::clock::{ClockHandle, EnvironmentClock, ListenerId, Tick};

const NANOS_PER_SEC: u64 = 1_000_000_000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Never throttled.
    High,
    /// Halved while the clock reports load below the normal threshold.
    #[default]
    Normal,
    /// Always throttled; see [`LowPolicy`].
    Low,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

impl FromStr for Priority {
    type Err = SvgaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "normal" => Ok(Self::Normal),
            "low" => Ok(Self::Low),
            other => Err(SvgaError::validation(format!(
                "unknown priority '{other}' (expected high, normal or low)"
            ))),
        }
    }
}

/// How hard [`Priority::Low`] instances are throttled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LowPolicy {
    /// Always half rate.
    Halve,
    /// Quarter rate under the low-quarter threshold, half rate otherwise.
    #[default]
    QuarterUnderLoad,
    /// Quarter, third or half rate as load rises through the two low thresholds.
    Graded,
}

/// The movie's own rate, falling back to the default and capped.
pub fn base_fps(entity_fps: u32, opts: &ThrottleOpts) -> u32 {
    let fps = if entity_fps > 0 {
        entity_fps
    } else {
        opts.default_fps
    };
    fps.min(opts.max_fps).max(1)
}

/// Frame rate after priority throttling under `load_fps`. Never below 1.
pub fn target_fps(base: u32, priority: Priority, load_fps: u32, opts: &ThrottleOpts) -> u32 {
    let divisor = match priority {
        Priority::High => 1,
        Priority::Normal if load_fps < opts.normal_threshold => 2,
        Priority::Normal => 1,
        Priority::Low => match opts.low_policy {
            LowPolicy::Halve => 2,
            LowPolicy::QuarterUnderLoad if load_fps < opts.low_quarter_threshold => 4,
            LowPolicy::QuarterUnderLoad => 2,
            LowPolicy::Graded if load_fps < opts.low_quarter_threshold => 4,
            LowPolicy::Graded if load_fps < opts.low_third_threshold => 3,
            LowPolicy::Graded => 2,
        },
    };
    (base / divisor).max(1)
}

/// Per-instance playback settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackOpts {
    pub priority: Priority,
    /// Number of loops before finishing; `0` loops forever.
    pub loops: u32,
    /// Hold the first frame.
    pub stopped: bool,
    /// Hold the first frame while the clock reports critical load.
    pub allow_stop_on_critical_load: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PlaybackEvent {
    /// First tick evaluated for the instance.
    Started,
    /// The frame index changed; redraw.
    Frame(u32),
    /// Progress report; not emitted for [`Priority::Low`].
    Step { frame: u32, percentage: f64 },
    /// The configured loop count completed. Emitted once.
    Finished,
}

pub type PlaybackEvents = SmallVec<[PlaybackEvent; 4]>;

/// Frame selected for one point in time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FramePosition {
    pub frame: u32,
    pub target_fps: u32,
    /// All loops completed; `frame` is the held last frame.
    pub finished: bool,
}

/// Timing state of one playing animation.
#[derive(Clone, Debug)]
pub struct PlaybackInstance {
    fps: u32,
    frames: u32,
    opts: PlaybackOpts,
    start_ns: Option<u64>,
    last_frame: Option<u32>,
    started: bool,
    finished: bool,
}

impl PlaybackInstance {
    pub fn new(fps: u32, frames: u32, opts: PlaybackOpts) -> Self {
        Self {
            fps,
            frames,
            opts,
            start_ns: None,
            last_frame: None,
            started: false,
            finished: false,
        }
    }

    pub fn for_entity(entity: &AnimationEntity, opts: PlaybackOpts) -> Self {
        Self::new(entity.fps(), entity.frames(), opts)
    }

    pub fn opts(&self) -> &PlaybackOpts {
        &self.opts
    }

    pub fn set_stopped(&mut self, stopped: bool) {
        self.opts.stopped = stopped;
    }

    pub fn set_priority(&mut self, priority: Priority) {
        self.opts.priority = priority;
    }

    /// Play again from frame 0 on the next tick.
    pub fn restart(&mut self) {
        self.start_ns = None;
        self.last_frame = None;
        self.started = false;
        self.finished = false;
    }

    pub fn last_frame(&self) -> Option<u32> {
        self.last_frame
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Frame shown `elapsed_ns` after the start under the given load. `None` for empty movies.
    pub fn position_at(
        &self,
        elapsed_ns: u64,
        load_fps: u32,
        throttle: &ThrottleOpts,
    ) -> Option<FramePosition> {
        if self.frames == 0 {
            return None;
        }
        let target = target_fps(
            base_fps(self.fps, throttle),
            self.opts.priority,
            load_fps,
            throttle,
        );
        if self.is_held(load_fps, throttle) {
            return Some(FramePosition {
                frame: 0,
                target_fps: target,
                finished: false,
            });
        }

        let frame_ns = (NANOS_PER_SEC / u64::from(target)).max(1);
        let total = elapsed_ns / frame_ns;
        let frames = u64::from(self.frames);
        let iteration = total / frames;
        if self.opts.loops > 0 && iteration >= u64::from(self.opts.loops) {
            return Some(FramePosition {
                frame: self.frames - 1,
                target_fps: target,
                finished: true,
            });
        }
        Some(FramePosition {
            frame: (total % frames) as u32,
            target_fps: target,
            finished: false,
        })
    }

    /// Whether the stop flag or critical load pins the first frame.
    fn is_held(&self, load_fps: u32, throttle: &ThrottleOpts) -> bool {
        self.opts.stopped
            || (self.opts.allow_stop_on_critical_load && load_fps < throttle.critical_threshold)
    }

    /// Advance to `now_ns` and report what changed since the previous tick.
    ///
    /// A finished instance keeps its last frame, except while held on the first one.
    pub fn on_tick(
        &mut self,
        now_ns: u64,
        load_fps: u32,
        throttle: &ThrottleOpts,
    ) -> PlaybackEvents {
        let mut events = PlaybackEvents::new();
        let start = *self.start_ns.get_or_insert(now_ns);
        let Some(mut pos) = self.position_at(now_ns.saturating_sub(start), load_fps, throttle)
        else {
            return events;
        };
        if self.finished && !self.is_held(load_fps, throttle) {
            pos.frame = self.frames - 1;
            pos.finished = true;
        }

        if !self.started {
            self.started = true;
            events.push(PlaybackEvent::Started);
        }
        if self.last_frame != Some(pos.frame) {
            self.last_frame = Some(pos.frame);
            events.push(PlaybackEvent::Frame(pos.frame));
            if self.opts.priority != Priority::Low {
                events.push(PlaybackEvent::Step {
                    frame: pos.frame,
                    percentage: f64::from(pos.frame + 1) / f64::from(self.frames),
                });
            }
        }
        if pos.finished && !self.finished {
            self.finished = true;
            events.push(PlaybackEvent::Finished);
        }
        events
    }
}

pub type InstanceId = u64;

type EventSink = Arc<dyn Fn(InstanceId, &PlaybackEvent) + Send + Sync>;

struct Slot {
    instance: PlaybackInstance,
    sink: EventSink,
}

#[derive(Default)]
struct State {
    instances: BTreeMap<InstanceId, Slot>,
    attachment: Option<(ClockHandle, ListenerId)>,
}

struct Inner {
    clock: EnvironmentClock,
    throttle: ThrottleOpts,
    state: Mutex<State>,
    next_id: AtomicU64,
}

impl Inner {
    fn on_tick(&self, tick: Tick) {
        let mut out: Vec<(InstanceId, EventSink, PlaybackEvents)> = Vec::new();
        {
            let mut state = lock(&self.state);
            for (id, slot) in state.instances.iter_mut() {
                let events = slot.instance.on_tick(tick.now_ns, tick.load_fps, &self.throttle);
                if !events.is_empty() {
                    out.push((*id, Arc::clone(&slot.sink), events));
                }
            }
        }
        // Sinks run unlocked so they may register or remove instances.
        for (id, sink, events) in out {
            for e in &events {
                sink(id, e);
            }
        }
    }
}

/// Drives many [`PlaybackInstance`]s from one clock listener.
///
/// The scheduler holds a clock attachment only while at least one instance is registered.
#[derive(Clone)]
pub struct PlaybackScheduler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PlaybackScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackScheduler")
            .field("instances", &self.len())
            .finish_non_exhaustive()
    }
}

impl PlaybackScheduler {
    pub fn new(clock: EnvironmentClock, throttle: ThrottleOpts) -> Self {
        Self {
            inner: Arc::new(Inner {
                clock,
                throttle,
                state: Mutex::new(State::default()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn clock(&self) -> &EnvironmentClock {
        &self.inner.clock
    }

    pub fn throttle(&self) -> &ThrottleOpts {
        &self.inner.throttle
    }

    /// Start driving `instance`; `sink` receives its events on the clock thread.
    pub fn register(
        &self,
        instance: PlaybackInstance,
        sink: impl Fn(InstanceId, &PlaybackEvent) + Send + Sync + 'static,
    ) -> InstanceId {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut state = lock(&self.inner.state);
        state.instances.insert(
            id,
            Slot {
                instance,
                sink: Arc::new(sink),
            },
        );
        if state.attachment.is_none() {
            let weak: Weak<Inner> = Arc::downgrade(&self.inner);
            let listener = self.inner.clock.add_listener(move |tick| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_tick(tick);
                }
            });
            state.attachment = Some((self.inner.clock.attach(), listener));
        }
        id
    }

    /// Stop driving an instance and return its final state.
    pub fn unregister(&self, id: InstanceId) -> Option<PlaybackInstance> {
        let (slot, detached) = {
            let mut state = lock(&self.inner.state);
            let slot = state.instances.remove(&id);
            let detached = if state.instances.is_empty() {
                state.attachment.take()
            } else {
                None
            };
            (slot, detached)
        };
        // Dropped unlocked: stopping the driver may wait for an in-progress tick.
        if let Some((handle, listener)) = detached {
            self.inner.clock.remove_listener(listener);
            drop(handle);
        }
        slot.map(|s| s.instance)
    }

    pub fn set_stopped(&self, id: InstanceId, stopped: bool) -> bool {
        self.with_instance(id, |i| i.set_stopped(stopped)).is_some()
    }

    pub fn restart(&self, id: InstanceId) -> bool {
        self.with_instance(id, PlaybackInstance::restart).is_some()
    }

    pub fn current_frame(&self, id: InstanceId) -> Option<u32> {
        self.with_instance(id, |i| i.last_frame()).flatten()
    }

    pub fn is_finished(&self, id: InstanceId) -> Option<bool> {
        self.with_instance(id, |i| i.is_finished())
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.state).instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_instance<R>(
        &self,
        id: InstanceId,
        f: impl FnOnce(&mut PlaybackInstance) -> R,
    ) -> Option<R> {
        lock(&self.inner.state)
            .instances
            .get_mut(&id)
            .map(|slot| f(&mut slot.instance))
    }
}

#[cfg(test)]
#[path = "../../tests/unit/playback/scheduler.rs"]
mod tests;

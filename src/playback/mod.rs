//! Shared clock and adaptive frame scheduling.

pub mod clock;
pub mod scheduler;

pub use clock::{
    ClockDriver, ClockHandle, DEFAULT_LOAD_FPS, EnvironmentClock, IntervalDriver, ListenerId,
    ManualDriver, Tick, TickSink,
};
pub use scheduler::{
    FramePosition, InstanceId, LowPolicy, PlaybackEvent, PlaybackEvents, PlaybackInstance,
    PlaybackOpts, PlaybackScheduler, Priority, base_fps, target_fps,
};

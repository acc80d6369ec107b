use super::*;

const MS: u64 = 1_000_000;

fn throttle() -> ThrottleOpts {
    ThrottleOpts::default()
}

fn frames_of(events: &PlaybackEvents) -> Vec<u32> {
    events
        .iter()
        .filter_map(|e| match e {
            PlaybackEvent::Frame(f) => Some(*f),
            _ => None,
        })
        .collect()
}

#[test]
fn base_fps_defaults_and_caps() {
    let t = throttle();
    assert_eq!(base_fps(0, &t), 30);
    assert_eq!(base_fps(20, &t), 20);
    assert_eq!(base_fps(120, &t), 60);
}

#[test]
fn priority_throttling_table() {
    let mut t = throttle();
    assert_eq!(target_fps(20, Priority::High, 10, &t), 20);
    assert_eq!(target_fps(20, Priority::Normal, 48, &t), 20);
    assert_eq!(target_fps(20, Priority::Normal, 47, &t), 10);

    assert_eq!(target_fps(24, Priority::Low, 60, &t), 12);
    assert_eq!(target_fps(24, Priority::Low, 39, &t), 6);

    t.low_policy = LowPolicy::Halve;
    assert_eq!(target_fps(24, Priority::Low, 10, &t), 12);

    t.low_policy = LowPolicy::Graded;
    assert_eq!(target_fps(24, Priority::Low, 39, &t), 6);
    assert_eq!(target_fps(24, Priority::Low, 44, &t), 8);
    assert_eq!(target_fps(24, Priority::Low, 45, &t), 12);

    assert_eq!(target_fps(3, Priority::Low, 0, &t), 1);
}

#[test]
fn finite_loops_freeze_on_last_frame_and_finish_once() {
    let t = throttle();
    let opts = PlaybackOpts {
        loops: 2,
        ..PlaybackOpts::default()
    };
    let mut p = PlaybackInstance::new(10, 10, opts);

    let mut frames = Vec::new();
    let mut finished = 0;
    for step in 0..=60 {
        let events = p.on_tick(step * 50 * MS, 60, &t);
        frames.extend(frames_of(&events));
        finished += events
            .iter()
            .filter(|e| matches!(e, PlaybackEvent::Finished))
            .count();
    }

    let expected: Vec<u32> = (0..10).chain(0..10).collect();
    assert_eq!(frames, expected);
    assert_eq!(finished, 1);
    assert!(p.is_finished());
    assert_eq!(p.last_frame(), Some(9));
}

#[test]
fn high_priority_ignores_load() {
    let p = PlaybackInstance::new(
        20,
        100,
        PlaybackOpts {
            priority: Priority::High,
            ..PlaybackOpts::default()
        },
    );
    let pos = p.position_at(500 * MS, 30, &throttle()).unwrap();
    assert_eq!(pos.target_fps, 20);
    assert_eq!(pos.frame, 10);
}

#[test]
fn normal_priority_halves_under_load() {
    let p = PlaybackInstance::new(20, 100, PlaybackOpts::default());
    let pos = p.position_at(500 * MS, 40, &throttle()).unwrap();
    assert_eq!(pos.target_fps, 10);
    assert_eq!(pos.frame, 5);

    let relaxed = p.position_at(500 * MS, 60, &throttle()).unwrap();
    assert_eq!(relaxed.frame, 10);
}

#[test]
fn frame_index_wraps_with_infinite_loops() {
    let p = PlaybackInstance::new(10, 4, PlaybackOpts::default());
    let pos = p.position_at(1_000 * MS, 60, &throttle()).unwrap();
    assert_eq!(pos.frame, 2);
    assert!(!pos.finished);
}

#[test]
fn stop_flag_and_critical_load_hold_frame_zero() {
    let t = throttle();
    let mut p = PlaybackInstance::new(
        10,
        10,
        PlaybackOpts {
            stopped: true,
            ..PlaybackOpts::default()
        },
    );
    assert_eq!(p.position_at(730 * MS, 60, &t).unwrap().frame, 0);
    p.set_stopped(false);
    assert_eq!(p.position_at(730 * MS, 60, &t).unwrap().frame, 7);

    let critical = PlaybackInstance::new(
        10,
        10,
        PlaybackOpts {
            allow_stop_on_critical_load: true,
            priority: Priority::High,
            ..PlaybackOpts::default()
        },
    );
    assert_eq!(critical.position_at(730 * MS, 19, &t).unwrap().frame, 0);
    assert_eq!(critical.position_at(730 * MS, 20, &t).unwrap().frame, 7);
}

#[test]
fn stop_after_finish_returns_to_frame_zero() {
    let t = throttle();
    let mut p = PlaybackInstance::new(
        10,
        10,
        PlaybackOpts {
            loops: 1,
            ..PlaybackOpts::default()
        },
    );
    for step in 0..=20 {
        p.on_tick(step * 100 * MS, 60, &t);
    }
    assert!(p.is_finished());
    assert_eq!(p.last_frame(), Some(9));

    p.set_stopped(true);
    let held = p.on_tick(2_100 * MS, 60, &t);
    assert_eq!(frames_of(&held), vec![0]);
    assert!(!held.iter().any(|e| matches!(e, PlaybackEvent::Finished)));
    assert_eq!(p.last_frame(), Some(0));

    p.set_stopped(false);
    let resumed = p.on_tick(2_200 * MS, 60, &t);
    assert_eq!(frames_of(&resumed), vec![9]);
    assert!(!resumed.iter().any(|e| matches!(e, PlaybackEvent::Finished)));
    assert!(p.on_tick(2_300 * MS, 60, &t).is_empty());
}

#[test]
fn critical_load_after_finish_holds_frame_zero() {
    let t = throttle();
    let mut p = PlaybackInstance::new(
        10,
        10,
        PlaybackOpts {
            loops: 1,
            allow_stop_on_critical_load: true,
            ..PlaybackOpts::default()
        },
    );
    p.on_tick(0, 60, &t);
    p.on_tick(1_500 * MS, 60, &t);
    assert!(p.is_finished());
    assert_eq!(p.last_frame(), Some(9));

    assert_eq!(frames_of(&p.on_tick(1_600 * MS, 10, &t)), vec![0]);
    assert_eq!(frames_of(&p.on_tick(1_700 * MS, 60, &t)), vec![9]);
}

#[test]
fn redraws_are_edge_triggered() {
    let t = throttle();
    let mut p = PlaybackInstance::new(10, 10, PlaybackOpts::default());

    let first = p.on_tick(1_000 * MS, 60, &t);
    assert_eq!(first[0], PlaybackEvent::Started);
    assert_eq!(frames_of(&first), vec![0]);
    assert!(matches!(
        first.last(),
        Some(PlaybackEvent::Step { frame: 0, percentage }) if (*percentage - 0.1).abs() < 1e-9
    ));

    assert!(p.on_tick(1_016 * MS, 60, &t).is_empty());
    assert!(p.on_tick(1_099 * MS, 60, &t).is_empty());
    assert_eq!(frames_of(&p.on_tick(1_100 * MS, 60, &t)), vec![1]);
}

#[test]
fn low_priority_skips_step_events() {
    let mut p = PlaybackInstance::new(
        10,
        10,
        PlaybackOpts {
            priority: Priority::Low,
            ..PlaybackOpts::default()
        },
    );
    let events = p.on_tick(0, 60, &throttle());
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, PlaybackEvent::Step { .. }))
    );
    assert_eq!(frames_of(&events), vec![0]);
}

#[test]
fn empty_movies_emit_nothing() {
    let mut p = PlaybackInstance::new(10, 0, PlaybackOpts::default());
    assert!(p.on_tick(0, 60, &throttle()).is_empty());
    assert!(p.position_at(0, 60, &throttle()).is_none());
}

#[test]
fn restart_replays_from_the_first_frame() {
    let t = throttle();
    let mut p = PlaybackInstance::new(
        10,
        2,
        PlaybackOpts {
            loops: 1,
            ..PlaybackOpts::default()
        },
    );
    p.on_tick(0, 60, &t);
    p.on_tick(500 * MS, 60, &t);
    assert!(p.is_finished());

    p.restart();
    let events = p.on_tick(600 * MS, 60, &t);
    assert_eq!(events[0], PlaybackEvent::Started);
    assert_eq!(frames_of(&events), vec![0]);
}

#[test]
fn priority_parses_from_cli_strings() {
    assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
    assert_eq!(" low ".parse::<Priority>().unwrap(), Priority::Low);
    assert!("urgent".parse::<Priority>().is_err());
}

#[test]
fn scheduler_attaches_only_while_instances_exist() {
    let clock = EnvironmentClock::manual();
    let scheduler = PlaybackScheduler::new(clock.clone(), throttle());
    assert_eq!(clock.attached_count(), 0);

    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let instance = || PlaybackInstance::new(10, 10, PlaybackOpts::default());
    let a = scheduler.register(instance(), move |id, e| {
        sink.lock().unwrap().push((id, e.clone()));
    });
    let b = scheduler.register(instance(), |_, _| {});
    assert_eq!(clock.attached_count(), 1);
    assert_eq!(clock.listener_count(), 1);

    clock.tick(0);
    clock.tick(250 * MS);
    assert_eq!(scheduler.current_frame(a), Some(2));
    assert_eq!(scheduler.current_frame(b), Some(2));

    let frames: Vec<u32> = log
        .lock()
        .unwrap()
        .iter()
        .filter_map(|(id, e)| match e {
            PlaybackEvent::Frame(f) if *id == a => Some(*f),
            _ => None,
        })
        .collect();
    assert_eq!(frames, vec![0, 2]);

    assert!(scheduler.set_stopped(a, true));
    clock.tick(400 * MS);
    assert_eq!(scheduler.current_frame(a), Some(0));
    assert_eq!(scheduler.current_frame(b), Some(4));

    scheduler.unregister(a);
    assert_eq!(clock.attached_count(), 1);
    let last = scheduler.unregister(b).unwrap();
    assert_eq!(last.last_frame(), Some(4));
    assert_eq!(clock.attached_count(), 0);
    assert_eq!(clock.listener_count(), 0);
    assert!(scheduler.is_empty());
}

use std::sync::atomic::AtomicUsize;

use super::*;

const MS: u64 = 1_000_000;

#[test]
fn attachment_is_reference_counted() {
    let driver = ManualDriver::new();
    let running = driver.running_flag();
    let clock = EnvironmentClock::new(driver);
    assert!(!running.load(Ordering::Acquire));

    let a = clock.attach();
    let b = clock.attach();
    assert!(running.load(Ordering::Acquire));
    assert_eq!(clock.attached_count(), 2);

    drop(a);
    assert!(running.load(Ordering::Acquire));
    drop(b);
    assert!(!running.load(Ordering::Acquire));
    assert_eq!(clock.attached_count(), 0);
}

#[test]
fn load_defaults_until_a_full_window() {
    let clock = EnvironmentClock::manual();
    let _h = clock.attach();
    for i in 0..30 {
        clock.tick(i * 33 * MS);
    }
    assert_eq!(clock.load_fps(), DEFAULT_LOAD_FPS);

    // 30 Hz for more than a second.
    for i in 30..60 {
        clock.tick(i * 33 * MS + 500 * MS);
    }
    let load = clock.load_fps();
    assert!((29..=31).contains(&load), "load {load}");
    assert_eq!(clock.last_tick_ns(), Some(59 * 33 * MS + 500 * MS));
}

#[test]
fn detaching_resets_the_window() {
    let clock = EnvironmentClock::manual();
    let h = clock.attach();
    for i in 0..=20 {
        clock.tick(i * 100 * MS);
    }
    assert_eq!(clock.load_fps(), 10);
    drop(h);
    assert_eq!(clock.load_fps(), DEFAULT_LOAD_FPS);
    assert_eq!(clock.last_tick_ns(), None);
}

#[test]
fn listeners_run_synchronously_and_can_be_removed() {
    let clock = EnvironmentClock::manual();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let id = clock.add_listener(move |t| sink.lock().unwrap().push(t.now_ns));

    clock.tick(5);
    clock.tick(9);
    assert_eq!(*seen.lock().unwrap(), vec![5, 9]);

    assert!(clock.remove_listener(id));
    assert!(!clock.remove_listener(id));
    clock.tick(12);
    assert_eq!(seen.lock().unwrap().len(), 2);
    assert_eq!(clock.listener_count(), 0);
}

#[test]
fn listeners_may_unsubscribe_themselves() {
    let clock = EnvironmentClock::manual();
    let calls = Arc::new(AtomicUsize::new(0));
    let id_slot = Arc::new(Mutex::new(None));

    let (c, slot, inner) = (Arc::clone(&calls), Arc::clone(&id_slot), clock.clone());
    let id = clock.add_listener(move |_| {
        c.fetch_add(1, Ordering::SeqCst);
        if let Some(id) = *slot.lock().unwrap() {
            inner.remove_listener(id);
        }
    });
    *id_slot.lock().unwrap() = Some(id);

    clock.tick(1);
    clock.tick(2);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn interval_driver_ticks_while_attached() {
    let clock = EnvironmentClock::new(IntervalDriver::new(Duration::from_millis(2)));
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);
    clock.add_listener(move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });

    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let h = clock.attach();
    let deadline = Instant::now() + Duration::from_secs(5);
    while calls.load(Ordering::SeqCst) < 3 {
        assert!(Instant::now() < deadline);
        std::thread::sleep(Duration::from_millis(2));
    }
    drop(h);

    let after_stop = calls.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(calls.load(Ordering::SeqCst), after_stop);
}

#[test]
fn listener_may_attach_while_the_last_handle_drops() {
    let clock = EnvironmentClock::new(IntervalDriver::new(Duration::from_millis(1)));
    let held: Arc<Mutex<Option<ClockHandle>>> = Arc::new(Mutex::new(None));
    let once = AtomicBool::new(false);
    let (entered_tx, entered_rx) = std::sync::mpsc::channel();

    let (c, slot) = (clock.clone(), Arc::clone(&held));
    let id = clock.add_listener(move |_| {
        if once.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = entered_tx.send(());
        // Give the dropping thread time to reach the join.
        std::thread::sleep(Duration::from_millis(50));
        *lock(&slot) = Some(c.attach());
    });

    let h = clock.attach();
    entered_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("clock never ticked");

    let (done_tx, done_rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        drop(h);
        let _ = done_tx.send(());
    });
    done_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("dropping the last handle deadlocked");

    assert_eq!(clock.attached_count(), 1);
    let seen = clock.last_tick_ns();
    let deadline = Instant::now() + Duration::from_secs(5);
    while clock.last_tick_ns() == seen {
        assert!(Instant::now() < deadline, "driver did not keep ticking");
        std::thread::sleep(Duration::from_millis(2));
    }

    let last = lock(&held).take();
    drop(last);
    assert_eq!(clock.attached_count(), 0);
    assert!(clock.remove_listener(id));
}

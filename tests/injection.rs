mod common;

use std::thread;
use std::time::{Duration, Instant};

use input_dispatch::event::{InputEvent, KeyAction, KeyCode, MotionAction, PolicyFlags};
use input_dispatch::inject::{InjectionResult, InjectionSync};
use input_dispatch::window::{DisplayId, FocusRequest, Pid, Uid};

use crate::common::*;

const APP_UID: Uid = Uid(10_001);

#[test]
fn injected_touch_reports_success() {
    let policy = FakePolicy::default();
    let dispatcher = dispatcher(&policy);
    let app = dispatcher.create_input_channel("app").unwrap();
    dispatcher.set_input_windows(vec![full_screen(&app).with_owner(Pid(1), APP_UID)], DisplayId::DEFAULT);

    let event = InputEvent::Motion(touch(MotionAction::Down, &[(0, 10.0, 10.0)], Instant::now()));
    let result = dispatcher.inject_input_event(
        event,
        Some(APP_UID),
        InjectionSync::WaitForResult,
        TIMEOUT,
        PolicyFlags::PASS_TO_USER,
    );
    assert_eq!(result, InjectionResult::Succeeded);
    assert_eq!(consume_motion(&app).action, MotionAction::Down);
}

#[test]
fn injecting_into_foreign_window_is_denied() {
    let policy = FakePolicy::default();
    let dispatcher = dispatcher(&policy);
    let app = dispatcher.create_input_channel("app").unwrap();
    dispatcher.set_input_windows(vec![full_screen(&app).with_owner(Pid(1), APP_UID)], DisplayId::DEFAULT);

    let event = InputEvent::Motion(touch(MotionAction::Down, &[(0, 10.0, 10.0)], Instant::now()));
    let result = dispatcher.inject_input_event(
        event,
        Some(Uid(99)),
        InjectionSync::WaitForResult,
        TIMEOUT,
        PolicyFlags::PASS_TO_USER,
    );
    assert_eq!(result, InjectionResult::PermissionDenied);
    assert_no_message(&app);
}

#[test]
fn invalid_injected_motion_fails() {
    let policy = FakePolicy::default();
    let dispatcher = dispatcher(&policy);
    let event = InputEvent::Motion(touch(MotionAction::Down, &[], Instant::now()));
    let result =
        dispatcher.inject_input_event(event, None, InjectionSync::None, TIMEOUT, PolicyFlags::PASS_TO_USER);
    assert_eq!(result, InjectionResult::Failed);
}

#[test]
fn asynchronous_injection_returns_immediately() {
    let policy = FakePolicy::default();
    let dispatcher = dispatcher(&policy);
    let app = dispatcher.create_input_channel("app").unwrap();
    dispatcher.set_input_windows(vec![full_screen(&app)], DisplayId::DEFAULT);
    dispatcher.set_focused_window(FocusRequest::new(app.token(), DisplayId::DEFAULT));

    let event = InputEvent::Key(key(KeyAction::Down, KeyCode::SPACE));
    let result = dispatcher.inject_input_event(
        event,
        None,
        InjectionSync::None,
        Duration::ZERO,
        PolicyFlags::PASS_TO_USER | PolicyFlags::DISABLE_KEY_REPEAT,
    );
    assert_eq!(result, InjectionResult::Succeeded);
    assert_eq!(consume_key(&app).key_code, KeyCode::SPACE);
}

#[test]
fn wait_for_finished_blocks_until_acknowledged() {
    let policy = FakePolicy::default();
    let dispatcher = dispatcher(&policy);
    let app = dispatcher.create_input_channel("app").unwrap();
    dispatcher.set_input_windows(vec![full_screen(&app)], DisplayId::DEFAULT);

    let consumer = thread::spawn(move || {
        let message = app.receive_timeout(TIMEOUT).unwrap();
        thread::sleep(Duration::from_millis(50));
        app.finish(message.seq(), true).unwrap();
        app
    });

    let started = Instant::now();
    let event = InputEvent::Motion(touch(MotionAction::Down, &[(0, 10.0, 10.0)], Instant::now()));
    let result = dispatcher.inject_input_event(
        event,
        None,
        InjectionSync::WaitForFinished,
        TIMEOUT,
        PolicyFlags::PASS_TO_USER,
    );
    assert_eq!(result, InjectionResult::Succeeded);
    assert!(started.elapsed() >= Duration::from_millis(50));
    consumer.join().unwrap();
}

#[test]
fn unacknowledged_injection_times_out() {
    let policy = FakePolicy::default();
    let dispatcher = dispatcher(&policy);
    let app = dispatcher.create_input_channel("app").unwrap();
    dispatcher.set_input_windows(vec![full_screen(&app)], DisplayId::DEFAULT);

    let event = InputEvent::Motion(touch(MotionAction::Down, &[(0, 10.0, 10.0)], Instant::now()));
    let result = dispatcher.inject_input_event(
        event,
        None,
        InjectionSync::WaitForFinished,
        Duration::from_millis(100),
        PolicyFlags::PASS_TO_USER,
    );
    assert_eq!(result, InjectionResult::TimedOut);
    assert!(app.receive_timeout(TIMEOUT).is_some());
}

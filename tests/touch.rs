mod common;

use std::time::Instant;

use input_dispatch::event::{InputEvent, MotionAction, MotionFlags, PointerId};
use input_dispatch::notify::NotifyMotionArgs;
use input_dispatch::window::{DisplayId, Pid, Rect, Uid, WindowFlags};

use crate::common::*;

#[test]
fn touch_goes_to_topmost_window_under_pointer() {
    let policy = FakePolicy::default();
    let dispatcher = dispatcher(&policy);
    let top = dispatcher.create_input_channel("top").unwrap();
    let bottom = dispatcher.create_input_channel("bottom").unwrap();
    dispatcher.set_input_windows(
        vec![window(&top, Rect::new(0, 0, 500, 500)), full_screen(&bottom)],
        DisplayId::DEFAULT,
    );

    let down_time = Instant::now();
    dispatcher.notify_motion(&NotifyMotionArgs::new(touch(MotionAction::Down, &[(0, 100.0, 100.0)], down_time)));
    dispatcher.notify_motion(&NotifyMotionArgs::new(touch(MotionAction::Up, &[(0, 100.0, 100.0)], down_time)));

    assert_eq!(consume_motion(&top).action, MotionAction::Down);
    assert_eq!(consume_motion(&top).action, MotionAction::Up);
    assert_no_message(&bottom);

    dispatcher.notify_motion(&NotifyMotionArgs::new(touch(MotionAction::Down, &[(0, 800.0, 800.0)], Instant::now())));
    assert_eq!(consume_motion(&bottom).action, MotionAction::Down);
    assert_no_message(&top);
}

#[test]
fn gesture_stays_with_window_it_started_in() {
    let policy = FakePolicy::default();
    let dispatcher = dispatcher(&policy);
    let left = dispatcher.create_input_channel("left").unwrap();
    let right = dispatcher.create_input_channel("right").unwrap();
    dispatcher.set_input_windows(
        vec![window(&left, Rect::new(0, 0, 540, 1920)), window(&right, Rect::new(540, 0, 540, 1920))],
        DisplayId::DEFAULT,
    );

    let down_time = Instant::now();
    dispatcher.notify_motion(&NotifyMotionArgs::new(touch(MotionAction::Down, &[(0, 100.0, 100.0)], down_time)));
    dispatcher.notify_motion(&NotifyMotionArgs::new(touch(MotionAction::Move, &[(0, 900.0, 100.0)], down_time)));

    assert_eq!(consume_motion(&left).action, MotionAction::Down);
    let moved = consume_motion(&left);
    assert_eq!(moved.action, MotionAction::Move);
    assert_eq!(moved.pointers[0].coords.position.x, 900.0);
    assert_no_message(&right);
}

#[test]
fn second_pointer_is_split_to_other_window() {
    let policy = FakePolicy::default();
    let dispatcher = dispatcher(&policy);
    let left = dispatcher.create_input_channel("left").unwrap();
    let right = dispatcher.create_input_channel("right").unwrap();
    dispatcher.set_input_windows(
        vec![
            window(&left, Rect::new(0, 0, 540, 1920)).with_flags(WindowFlags::SPLIT_TOUCH),
            window(&right, Rect::new(540, 0, 540, 1920)).with_flags(WindowFlags::SPLIT_TOUCH),
        ],
        DisplayId::DEFAULT,
    );

    let down_time = Instant::now();
    dispatcher.notify_motion(&NotifyMotionArgs::new(touch(MotionAction::Down, &[(0, 100.0, 100.0)], down_time)));
    dispatcher.notify_motion(&NotifyMotionArgs::new(touch(
        MotionAction::PointerDown(1),
        &[(0, 100.0, 100.0), (1, 800.0, 100.0)],
        down_time,
    )));

    assert_eq!(consume_motion(&left).action, MotionAction::Down);
    let other = consume_motion(&left);
    assert_eq!(other.action, MotionAction::Move);
    assert_eq!(other.pointer_ids().collect::<Vec<_>>(), [PointerId::from(0)]);

    let split = consume_motion(&right);
    assert_eq!(split.action, MotionAction::Down);
    assert_eq!(split.pointer_ids().collect::<Vec<_>>(), [PointerId::from(1)]);
}

#[test]
fn window_under_foreign_overlay_is_flagged_obscured() {
    let policy = FakePolicy::default();
    let dispatcher = dispatcher(&policy);
    let overlay = dispatcher.create_input_channel("overlay").unwrap();
    let app = dispatcher.create_input_channel("app").unwrap();
    let overlay_window = full_screen(&overlay)
        .with_owner(Pid(1), Uid(1))
        .with_alpha(1.0)
        .with_flags(WindowFlags::NOT_TOUCHABLE);
    let app_window = full_screen(&app).with_owner(Pid(2), Uid(2));
    dispatcher.set_input_windows(vec![overlay_window, app_window], DisplayId::DEFAULT);

    dispatcher.notify_motion(&NotifyMotionArgs::new(touch(MotionAction::Down, &[(0, 100.0, 100.0)], Instant::now())));
    let down = consume_motion(&app);
    assert_eq!(down.action, MotionAction::Down);
    assert!(down.flags.contains(MotionFlags::WINDOW_IS_OBSCURED));
    assert_no_message(&overlay);

    let untrusted = policy.wait_for(TIMEOUT, |call| matches!(call, PolicyCall::UntrustedTouch(_)));
    assert_eq!(untrusted, Some(PolicyCall::UntrustedTouch("overlay".to_owned())));
}

#[test]
fn monitor_sees_every_touch() {
    let policy = FakePolicy::default();
    let dispatcher = dispatcher(&policy);
    let app = dispatcher.create_input_channel("app").unwrap();
    let monitor = dispatcher.create_input_monitor(DisplayId::DEFAULT, "gestures", Pid(10)).unwrap();
    dispatcher.set_input_windows(vec![full_screen(&app)], DisplayId::DEFAULT);

    dispatcher.notify_motion(&NotifyMotionArgs::new(touch(MotionAction::Down, &[(0, 10.0, 10.0)], Instant::now())));
    assert_eq!(consume_motion(&app).action, MotionAction::Down);
    assert_eq!(consume_motion(&monitor).action, MotionAction::Down);
}

#[test]
fn monitor_needs_real_display() {
    let policy = FakePolicy::default();
    let dispatcher = dispatcher(&policy);
    assert!(dispatcher.create_input_monitor(DisplayId::NONE, "nowhere", Pid(1)).is_err());
}

#[test]
fn spy_pilfering_cancels_other_windows() {
    let policy = FakePolicy::default();
    let dispatcher = dispatcher(&policy);
    let spy = dispatcher.create_input_channel("spy").unwrap();
    let app = dispatcher.create_input_channel("app").unwrap();
    dispatcher.set_input_windows(
        vec![
            full_screen(&spy).with_flags(WindowFlags::SPY | WindowFlags::NOT_FOCUSABLE | WindowFlags::TRUSTED_OVERLAY),
            full_screen(&app),
        ],
        DisplayId::DEFAULT,
    );

    let down_time = Instant::now();
    dispatcher.notify_motion(&NotifyMotionArgs::new(touch(MotionAction::Down, &[(0, 10.0, 10.0)], down_time)));
    assert_eq!(consume_motion(&app).action, MotionAction::Down);
    assert_eq!(consume_motion(&spy).action, MotionAction::Down);

    dispatcher.pilfer_pointers(spy.token()).unwrap();
    let cancel = consume_motion(&app);
    assert_eq!(cancel.action, MotionAction::Cancel);
    assert!(cancel.flags.contains(MotionFlags::CANCELED));

    dispatcher.notify_motion(&NotifyMotionArgs::new(touch(MotionAction::Move, &[(0, 20.0, 20.0)], down_time)));
    assert_eq!(consume_motion(&spy).action, MotionAction::Move);
    assert_no_message(&app);
}

#[test]
fn only_spies_may_pilfer() {
    let policy = FakePolicy::default();
    let dispatcher = dispatcher(&policy);
    let app = dispatcher.create_input_channel("app").unwrap();
    dispatcher.set_input_windows(vec![full_screen(&app)], DisplayId::DEFAULT);
    assert!(dispatcher.pilfer_pointers(app.token()).is_err());

    dispatcher.notify_motion(&NotifyMotionArgs::new(touch(MotionAction::Down, &[(0, 10.0, 10.0)], Instant::now())));
    assert_eq!(consume_motion(&app).action, MotionAction::Down);
    assert!(dispatcher.pilfer_pointers(app.token()).is_err());
}

#[test]
fn cancel_current_touch_cancels_gesture() {
    let policy = FakePolicy::default();
    let dispatcher = dispatcher(&policy);
    let app = dispatcher.create_input_channel("app").unwrap();
    dispatcher.set_input_windows(vec![full_screen(&app)], DisplayId::DEFAULT);

    let down_time = Instant::now();
    dispatcher.notify_motion(&NotifyMotionArgs::new(touch(MotionAction::Down, &[(0, 10.0, 10.0)], down_time)));
    assert_eq!(consume_motion(&app).action, MotionAction::Down);

    dispatcher.cancel_current_touch();
    assert_eq!(consume_motion(&app).action, MotionAction::Cancel);

    // The rest of the gesture has nowhere to go.
    dispatcher.notify_motion(&NotifyMotionArgs::new(touch(MotionAction::Move, &[(0, 20.0, 20.0)], down_time)));
    assert_no_message(&app);
}

#[test]
fn removed_window_gets_cancel() {
    let policy = FakePolicy::default();
    let dispatcher = dispatcher(&policy);
    let app = dispatcher.create_input_channel("app").unwrap();
    dispatcher.set_input_windows(vec![full_screen(&app)], DisplayId::DEFAULT);

    dispatcher.notify_motion(&NotifyMotionArgs::new(touch(MotionAction::Down, &[(0, 10.0, 10.0)], Instant::now())));
    assert_eq!(consume_motion(&app).action, MotionAction::Down);

    dispatcher.set_input_windows(Vec::new(), DisplayId::DEFAULT);
    assert_eq!(consume_motion(&app).action, MotionAction::Cancel);
}

#[test]
fn delivered_events_verify() {
    let policy = FakePolicy::default();
    let dispatcher = dispatcher(&policy);
    let app = dispatcher.create_input_channel("app").unwrap();
    dispatcher.set_input_windows(vec![full_screen(&app)], DisplayId::DEFAULT);

    dispatcher.notify_motion(&NotifyMotionArgs::new(touch(MotionAction::Down, &[(0, 10.0, 10.0)], Instant::now())));
    let delivered = consume_motion(&app);
    assert!(dispatcher.verify_input_event(&InputEvent::Motion(delivered.clone())).is_some());

    let mut forged = delivered;
    forged.action = MotionAction::Up;
    assert!(dispatcher.verify_input_event(&InputEvent::Motion(forged)).is_none());
}

#[test]
fn invalid_motion_is_dropped() {
    let policy = FakePolicy::default();
    let dispatcher = dispatcher(&policy);
    let app = dispatcher.create_input_channel("app").unwrap();
    dispatcher.set_input_windows(vec![full_screen(&app)], DisplayId::DEFAULT);

    let duplicate = touch(MotionAction::Down, &[(0, 10.0, 10.0), (0, 20.0, 20.0)], Instant::now());
    dispatcher.notify_motion(&NotifyMotionArgs::new(duplicate));
    assert_no_message(&app);
}

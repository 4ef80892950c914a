mod common;

use std::time::Duration;

use input_dispatch::config::DispatcherConfiguration;
use input_dispatch::event::{InputEvent, KeyAction, KeyCode, KeyFlags, PolicyFlags};
use input_dispatch::inject::{InjectionResult, InjectionSync};
use input_dispatch::notify::NotifyKeyArgs;
use input_dispatch::window::{ApplicationInfo, ApplicationToken, DisplayId, FocusRequest, WindowFlags};

use crate::common::*;

fn long_repeat_policy() -> FakePolicy {
    FakePolicy::with_configuration(DispatcherConfiguration::default().with_key_repeat_timeout(Duration::from_secs(60)))
}

#[test]
fn focused_window_receives_keys() {
    let policy = long_repeat_policy();
    let dispatcher = dispatcher(&policy);
    let consumer = dispatcher.create_input_channel("focused").unwrap();
    dispatcher.set_input_windows(vec![full_screen(&consumer)], DisplayId::DEFAULT);
    dispatcher.set_focused_window(FocusRequest::new(consumer.token(), DisplayId::DEFAULT));
    assert!(consume_focus(&consumer));

    dispatcher.notify_key(&NotifyKeyArgs::new(key(KeyAction::Down, KeyCode::A)));
    dispatcher.notify_key(&NotifyKeyArgs::new(key(KeyAction::Up, KeyCode::A)));

    let down = consume_key(&consumer);
    assert_eq!(down.action, KeyAction::Down);
    assert_eq!(down.key_code, KeyCode::A);
    let up = consume_key(&consumer);
    assert_eq!(up.action, KeyAction::Up);
    assert!(!up.flags.contains(KeyFlags::CANCELED));

    let change = policy.wait_for(TIMEOUT, |call| matches!(call, PolicyCall::FocusChanged(..)));
    assert_eq!(change, Some(PolicyCall::FocusChanged(None, Some(consumer.token()))));
}

#[test]
fn unfocusable_window_does_not_take_focus() {
    let policy = long_repeat_policy();
    let dispatcher = dispatcher(&policy);
    let consumer = dispatcher.create_input_channel("unfocusable").unwrap();
    let window = full_screen(&consumer).with_flags(WindowFlags::NOT_FOCUSABLE);
    dispatcher.set_input_windows(vec![window], DisplayId::DEFAULT);
    dispatcher.set_focused_window(FocusRequest::new(consumer.token(), DisplayId::DEFAULT));

    dispatcher.notify_key(&NotifyKeyArgs::new(key(KeyAction::Down, KeyCode::A)));
    assert_no_message(&consumer);
}

#[test]
fn pending_focus_request_applies_once_window_appears() {
    let policy = long_repeat_policy();
    let dispatcher = dispatcher(&policy);
    let consumer = dispatcher.create_input_channel("late").unwrap();
    dispatcher.set_focused_window(FocusRequest::new(consumer.token(), DisplayId::DEFAULT));
    assert_no_message(&consumer);

    dispatcher.set_input_windows(vec![full_screen(&consumer)], DisplayId::DEFAULT);
    assert!(consume_focus(&consumer));
}

#[test]
fn focus_change_cancels_held_key() {
    let policy = long_repeat_policy();
    let dispatcher = dispatcher(&policy);
    let first = dispatcher.create_input_channel("first").unwrap();
    let second = dispatcher.create_input_channel("second").unwrap();
    dispatcher.set_input_windows(vec![full_screen(&first), full_screen(&second)], DisplayId::DEFAULT);
    dispatcher.set_focused_window(FocusRequest::new(first.token(), DisplayId::DEFAULT));
    assert!(consume_focus(&first));

    dispatcher.notify_key(&NotifyKeyArgs::new(key(KeyAction::Down, KeyCode::B)));
    assert_eq!(consume_key(&first).action, KeyAction::Down);

    dispatcher.set_focused_window(FocusRequest::new(second.token(), DisplayId::DEFAULT));
    let cancel = consume_key(&first);
    assert_eq!(cancel.action, KeyAction::Up);
    assert!(cancel.flags.contains(KeyFlags::CANCELED));
    assert!(!consume_focus(&first));
    assert!(consume_focus(&second));
}

#[test]
fn key_without_focus_target_fails_injection() {
    let policy = long_repeat_policy();
    let dispatcher = dispatcher(&policy);
    let event = InputEvent::Key(key(KeyAction::Down, KeyCode::ENTER));
    let result = dispatcher.inject_input_event(
        event,
        None,
        InjectionSync::WaitForResult,
        TIMEOUT,
        PolicyFlags::PASS_TO_USER,
    );
    assert_eq!(result, InjectionResult::Failed);
}

#[test]
fn focused_application_without_window_raises_anr() {
    let policy = long_repeat_policy();
    let dispatcher = dispatcher(&policy);
    let application = ApplicationInfo::new(ApplicationToken::from(7), "starting")
        .with_dispatching_timeout(Duration::from_millis(100));
    dispatcher.set_focused_application(DisplayId::DEFAULT, Some(application.clone()));

    dispatcher.notify_key(&NotifyKeyArgs::new(key(KeyAction::Down, KeyCode::A)));
    let anr = policy.wait_for(TIMEOUT, |call| matches!(call, PolicyCall::NoFocusedWindowAnr(_)));
    assert_eq!(anr, Some(PolicyCall::NoFocusedWindowAnr(application)));
}

#[test]
fn policy_consumed_key_is_not_delivered() {
    let policy = long_repeat_policy();
    let dispatcher = dispatcher(&policy);
    let consumer = dispatcher.create_input_channel("focused").unwrap();
    dispatcher.set_input_windows(vec![full_screen(&consumer)], DisplayId::DEFAULT);
    dispatcher.set_focused_window(FocusRequest::new(consumer.token(), DisplayId::DEFAULT));
    assert!(consume_focus(&consumer));

    let mut args = NotifyKeyArgs::new(key(KeyAction::Down, KeyCode::A));
    args.policy_flags = PolicyFlags::empty();
    dispatcher.notify_key(&args);
    assert_no_message(&consumer);
}

#[test]
fn key_waiting_for_focused_window_times_out_and_raises_one_anr() {
    let policy = long_repeat_policy();
    let dispatcher = dispatcher(&policy);
    let application = ApplicationInfo::new(ApplicationToken::from(3), "launching")
        .with_dispatching_timeout(Duration::from_millis(300));
    dispatcher.set_focused_application(DisplayId::DEFAULT, Some(application));

    let event = InputEvent::Key(key(KeyAction::Down, KeyCode::A));
    let result = dispatcher.inject_input_event(
        event,
        None,
        InjectionSync::WaitForResult,
        Duration::from_millis(100),
        PolicyFlags::PASS_TO_USER,
    );
    assert_eq!(result, InjectionResult::TimedOut);

    assert!(policy.wait_for(TIMEOUT, |call| matches!(call, PolicyCall::NoFocusedWindowAnr(_))).is_some());
    std::thread::sleep(Duration::from_millis(500));
    let anrs = policy.calls().into_iter().filter(|call| matches!(call, PolicyCall::NoFocusedWindowAnr(_))).count();
    assert_eq!(anrs, 1);
}

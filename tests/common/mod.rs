#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use input_dispatch::channel::{InputConsumer, InputMessage};
use input_dispatch::config::DispatcherConfiguration;
use input_dispatch::event::{
    DeviceId, KeyAction, KeyCode, KeyEvent, MotionAction, MotionEvent, Pointer, PolicyFlags, Source,
};
use input_dispatch::policy::DispatcherPolicy;
use input_dispatch::window::{ApplicationInfo, DisplayId, InputToken, Pid, Rect, WindowInfo};
use input_dispatch::InputDispatcher;
use parking_lot::{Condvar, Mutex};

pub const TIMEOUT: Duration = Duration::from_secs(2);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// What the fake policy was told.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyCall {
    ConfigurationChanged,
    NoFocusedWindowAnr(ApplicationInfo),
    WindowUnresponsive(InputToken, Option<Pid>),
    WindowResponsive(InputToken, Option<Pid>),
    InputChannelBroken(InputToken),
    FocusChanged(Option<InputToken>, Option<InputToken>),
    UntrustedTouch(String),
    Switch(u32, u32),
}

#[derive(Default)]
struct Record {
    calls: Mutex<Vec<PolicyCall>>,
    changed: Condvar,
}

/// A policy that accepts everything and records its notifications.
#[derive(Clone, Default)]
pub struct FakePolicy {
    record: Arc<Record>,
    config: DispatcherConfiguration,
}

impl FakePolicy {
    pub fn with_configuration(config: DispatcherConfiguration) -> Self {
        Self { record: Arc::default(), config }
    }

    fn push(&self, call: PolicyCall) {
        self.record.calls.lock().push(call);
        self.record.changed.notify_all();
    }

    pub fn calls(&self) -> Vec<PolicyCall> {
        self.record.calls.lock().clone()
    }

    /// Waits until a recorded call matches.
    pub fn wait_for(&self, timeout: Duration, mut matches: impl FnMut(&PolicyCall) -> bool) -> Option<PolicyCall> {
        let deadline = Instant::now() + timeout;
        let mut calls = self.record.calls.lock();
        loop {
            if let Some(call) = calls.iter().find(|call| matches(call)) {
                return Some(call.clone());
            }
            if self.record.changed.wait_until(&mut calls, deadline).timed_out() {
                return calls.iter().find(|call| matches(call)).cloned();
            }
        }
    }
}

impl DispatcherPolicy for FakePolicy {
    fn dispatcher_configuration(&self) -> DispatcherConfiguration {
        self.config.clone()
    }

    fn notify_configuration_changed(&self, _when: Instant) {
        self.push(PolicyCall::ConfigurationChanged);
    }

    fn notify_no_focused_window_anr(&self, application: &ApplicationInfo) {
        self.push(PolicyCall::NoFocusedWindowAnr(application.clone()));
    }

    fn notify_window_unresponsive(&self, token: InputToken, pid: Option<Pid>, _reason: &str) {
        self.push(PolicyCall::WindowUnresponsive(token, pid));
    }

    fn notify_window_responsive(&self, token: InputToken, pid: Option<Pid>) {
        self.push(PolicyCall::WindowResponsive(token, pid));
    }

    fn notify_input_channel_broken(&self, token: InputToken) {
        self.push(PolicyCall::InputChannelBroken(token));
    }

    fn notify_focus_changed(&self, old_token: Option<InputToken>, new_token: Option<InputToken>) {
        self.push(PolicyCall::FocusChanged(old_token, new_token));
    }

    fn notify_untrusted_touch(&self, obscuring_window: &str) {
        self.push(PolicyCall::UntrustedTouch(obscuring_window.to_owned()));
    }

    fn notify_switch(&self, _when: Instant, switch_values: u32, switch_mask: u32, _policy_flags: PolicyFlags) {
        self.push(PolicyCall::Switch(switch_values, switch_mask));
    }
}

pub fn dispatcher(policy: &FakePolicy) -> InputDispatcher {
    init_tracing();
    let dispatcher = InputDispatcher::new(policy.clone()).unwrap();
    dispatcher.start().unwrap();
    dispatcher
}

pub fn window(consumer: &InputConsumer, frame: Rect) -> WindowInfo {
    WindowInfo::new(consumer.token(), consumer.name(), DisplayId::DEFAULT, frame)
}

pub fn full_screen(consumer: &InputConsumer) -> WindowInfo {
    window(consumer, Rect::new(0, 0, 1080, 1920))
}

pub fn key(action: KeyAction, key_code: KeyCode) -> KeyEvent {
    KeyEvent::new(DeviceId::from(1), action, key_code, Instant::now())
}

pub fn touch(action: MotionAction, pointers: &[(u32, f32, f32)], down_time: Instant) -> MotionEvent {
    let pointers = pointers.iter().map(|&(id, x, y)| Pointer::new(id, x, y)).collect();
    MotionEvent::new(DeviceId::from(2), Source::TOUCHSCREEN, DisplayId::DEFAULT, action, pointers, Instant::now())
        .with_down_time(down_time)
}

/// Receives the next message and acknowledges it as handled.
pub fn consume(consumer: &InputConsumer) -> InputMessage {
    let message = consumer
        .receive_timeout(TIMEOUT)
        .unwrap_or_else(|| panic!("'{}' did not receive a message", consumer.name()));
    consumer.finish(message.seq(), true).unwrap();
    message
}

/// Skips focus and touch mode messages, then returns the next key event.
pub fn consume_key(consumer: &InputConsumer) -> KeyEvent {
    loop {
        match consume(consumer) {
            InputMessage::Key { event, .. } => return event,
            InputMessage::Focus { .. } | InputMessage::TouchMode { .. } => continue,
            other => panic!("expected a key event, got {other:?}"),
        }
    }
}

pub fn consume_motion(consumer: &InputConsumer) -> MotionEvent {
    loop {
        match consume(consumer) {
            InputMessage::Motion { event, .. } => return event,
            InputMessage::Focus { .. } | InputMessage::TouchMode { .. } => continue,
            other => panic!("expected a motion event, got {other:?}"),
        }
    }
}

pub fn consume_focus(consumer: &InputConsumer) -> bool {
    match consume(consumer) {
        InputMessage::Focus { has_focus, .. } => has_focus,
        other => panic!("expected a focus event, got {other:?}"),
    }
}

pub fn assert_no_message(consumer: &InputConsumer) {
    if let Some(message) = consumer.receive_timeout(Duration::from_millis(100)) {
        panic!("'{}' unexpectedly received {message:?}", consumer.name());
    }
}

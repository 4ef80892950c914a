//! The decisions the dispatcher leaves to its embedder.

use std::time::{Duration, Instant};

use dpi::PhysicalPosition;

use crate::config::DispatcherConfiguration;
use crate::event::{DeviceId, InputEvent, KeyEvent, PolicyFlags, SensorAccuracy, SensorType};
use crate::window::{ApplicationInfo, DisplayId, InputToken, Pid};

/// What the policy wants done with a key that is about to be dispatched.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum KeyInterceptResult {
    /// Deliver it to the focused window.
    Continue,
    /// The policy consumed it.
    Skip,
    /// Ask again after the delay.
    TryAgainLater(Duration),
}

/// The kind of user activity reported to [`DispatcherPolicy::poke_user_activity`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum UserActivityType {
    Button,
    Touch,
    Other,
}

/// A pointer capture state change requested by a window.
///
/// `seq` increases with every request so stale confirmations can be told apart.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct PointerCaptureRequest {
    pub window: Option<InputToken>,
    pub enable: bool,
    pub seq: u32,
}

/// The handler of policy decisions and notifications.
///
/// The dispatcher never calls into the policy while its internal lock is held, so every method
/// may call back into the dispatcher.
pub trait DispatcherPolicy: Send + Sync {
    /// Returns the tuning parameters to use.
    fn dispatcher_configuration(&self) -> DispatcherConfiguration {
        DispatcherConfiguration::default()
    }

    fn notify_configuration_changed(&self, when: Instant) {
        let _ = when;
    }

    /// An application was given focus but never added a focusable window in time.
    fn notify_no_focused_window_anr(&self, application: &ApplicationInfo) {
        let _ = application;
    }

    /// A connection stopped acknowledging events in time.
    ///
    /// `pid` is known for monitors and for windows with a registered owner.
    fn notify_window_unresponsive(&self, token: InputToken, pid: Option<Pid>, reason: &str) {
        let _ = (token, pid, reason);
    }

    /// A connection that was reported unresponsive caught up.
    fn notify_window_responsive(&self, token: InputToken, pid: Option<Pid>) {
        let _ = (token, pid);
    }

    /// The consumer end of a channel went away and the connection was torn down.
    fn notify_input_channel_broken(&self, token: InputToken) {
        let _ = token;
    }

    fn notify_focus_changed(&self, old_token: Option<InputToken>, new_token: Option<InputToken>) {
        let _ = (old_token, new_token);
    }

    fn notify_sensor_event(
        &self,
        device_id: DeviceId,
        sensor_type: SensorType,
        accuracy: SensorAccuracy,
        timestamp: Instant,
        values: &[f32],
    ) {
        let _ = (device_id, sensor_type, accuracy, timestamp, values);
    }

    /// A drag ended. `token` is `None` when nothing accepted the drop.
    fn notify_drop_window(&self, token: Option<InputToken>, position: PhysicalPosition<f32>) {
        let _ = (token, position);
    }

    /// A touch went to a window covered by another application's window.
    fn notify_untrusted_touch(&self, obscuring_window: &str) {
        let _ = obscuring_window;
    }

    fn notify_switch(&self, when: Instant, switch_values: u32, switch_mask: u32, policy_flags: PolicyFlags) {
        let _ = (when, switch_values, switch_mask, policy_flags);
    }

    /// Apply a pointer capture change. Confirm it with `notify_pointer_capture_changed`.
    fn set_pointer_capture(&self, request: &PointerCaptureRequest) {
        let _ = request;
    }

    /// Called before a key is queued. Clear [`PolicyFlags::PASS_TO_USER`] to consume it.
    fn intercept_key_before_queueing(&self, event: &KeyEvent, policy_flags: &mut PolicyFlags) {
        let _ = (event, policy_flags);
    }

    /// Called before a motion event is queued. Clear [`PolicyFlags::PASS_TO_USER`] to consume it.
    fn intercept_motion_before_queueing(
        &self,
        display_id: DisplayId,
        event_time: Instant,
        policy_flags: &mut PolicyFlags,
    ) {
        let _ = (display_id, event_time, policy_flags);
    }

    fn intercept_key_before_dispatching(
        &self,
        token: Option<InputToken>,
        event: &KeyEvent,
        policy_flags: PolicyFlags,
    ) -> KeyInterceptResult {
        let _ = (token, event, policy_flags);
        KeyInterceptResult::Continue
    }

    /// A window did not handle a key. Return a fallback key to send it instead.
    fn dispatch_unhandled_key(
        &self,
        token: InputToken,
        event: &KeyEvent,
        policy_flags: PolicyFlags,
    ) -> Option<KeyEvent> {
        let _ = (token, event, policy_flags);
        None
    }

    /// The input filter. Return `false` to consume the event.
    fn filter_input_event(&self, event: &InputEvent, policy_flags: PolicyFlags) -> bool {
        let _ = (event, policy_flags);
        true
    }

    fn poke_user_activity(&self, event_time: Instant, activity: UserActivityType, display_id: DisplayId) {
        let _ = (event_time, activity, display_id);
    }

    /// A gesture started on a window that does not have focus.
    fn on_pointer_down_outside_focus(&self, touched_token: InputToken) {
        let _ = touched_token;
    }
}

//! The inbound queue and the dequeue side of the dispatch loop.

use std::time::Instant;

use tracing::{debug, info, trace};

use crate::command::Command;
use crate::entry::{DropReason, EntryId, EntryKind, InterceptState, KeyEntry};
use crate::event::{DeviceId, KeyAction, KeyEvent, KeyFlags, MotionAction, MotionEvent, PolicyFlags, SensorType, Source};
use crate::input_state::{CancelationMode, CancelationOptions};
use crate::inject::InjectionResult;
use crate::policy::KeyInterceptResult;
use crate::target::{add_target, InputTargetFlags};
use crate::touch::PointerIdSet;

use super::state::{DispatcherState, APP_SWITCH_TIMEOUT};

/// Moves `next_wakeup` earlier to `time`.
pub(crate) fn wake_at(next_wakeup: &mut Option<Instant>, time: Instant) {
    if next_wakeup.map_or(true, |current| time < current) {
        *next_wakeup = Some(time);
    }
}

fn is_app_switch_key_event(event: &KeyEvent, policy_flags: PolicyFlags) -> bool {
    !event.flags.contains(KeyFlags::CANCELED)
        && event.key_code.is_app_switch()
        && policy_flags.contains(PolicyFlags::TRUSTED | PolicyFlags::PASS_TO_USER)
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Kind {
    ConfigurationChanged,
    DeviceReset(DeviceId),
    Focus,
    TouchMode,
    PointerCaptureChanged,
    Drag,
    Key { is_app_switch: bool },
    Motion,
    Sensor,
}

impl DispatcherState {
    /// Appends an entry to the inbound queue. Returns whether the loop needs a wake-up.
    pub fn enqueue_inbound(&mut self, id: EntryId) -> bool {
        let mut need_wake = self.inbound.is_empty();
        self.inbound.push_back(id);
        let Some(entry) = self.arena.get(id) else { return need_wake };
        trace!("Enqueued {entry}");

        match &entry.kind {
            EntryKind::Key(key) => {
                if is_app_switch_key_event(&key.event, entry.policy_flags) {
                    match key.event.action {
                        KeyAction::Down => self.app_switch_saw_key_down = true,
                        KeyAction::Up if self.app_switch_saw_key_down => {
                            self.app_switch_due_time = Some(entry.event_time + APP_SWITCH_TIMEOUT);
                            self.app_switch_saw_key_down = false;
                            need_wake = true;
                        },
                        KeyAction::Up => {},
                    }
                }
            },
            EntryKind::Motion(motion) => {
                let motion = motion.clone();
                let injected = entry.is_injected();
                if self.should_prune_inbound_queue(&motion) {
                    self.next_unblocked_event = Some(id);
                    need_wake = true;
                }
                if !injected && !motion.action.is_gesture_boundary() {
                    self.prune_stale_moves(id, &motion);
                }
            },
            _ => {},
        }
        need_wake
    }

    /// A touch down outside the application we are waiting on makes everything queued before it
    /// obsolete.
    fn should_prune_inbound_queue(&self, motion: &MotionEvent) -> bool {
        if motion.action != MotionAction::Down || !motion.source.is_pointer() {
            return false;
        }
        let Some(awaited) = &self.awaited_focused_application else { return false };
        let Some(pointer) = motion.pointers.first() else { return false };
        let touched = self.find_touched_window_at(motion.display_id, pointer.coords.position, false);
        match touched.as_ref().and_then(|window| window.application.as_ref()) {
            Some(application) if application.token != awaited.token => {
                info!("Pruning input queue because user touched a different application while waiting for {}", awaited.name);
                true
            },
            _ => false,
        }
    }

    /// Drops queued move samples of the same stream once the queue grew past the threshold.
    fn prune_stale_moves(&mut self, newest: EntryId, motion: &MotionEvent) {
        if self.inbound.len() <= self.config.inbound_queue_prune_threshold {
            return;
        }
        let arena = &self.arena;
        let next_unblocked = self.next_unblocked_event;
        let pruned: Vec<EntryId> = self
            .inbound
            .iter()
            .copied()
            .filter(|id| *id != newest && Some(*id) != next_unblocked)
            .filter(|id| {
                arena.get(*id).is_some_and(|entry| {
                    !entry.is_injected()
                        && entry.motion().is_some_and(|queued| {
                            queued.action == motion.action
                                && queued.device_id == motion.device_id
                                && queued.source == motion.source
                                && queued.display_id == motion.display_id
                        })
                })
            })
            .collect();
        if pruned.is_empty() {
            return;
        }
        debug!("Pruned {} stale move samples from the inbound queue", pruned.len());
        self.inbound.retain(|id| !pruned.contains(id));
        for id in pruned {
            self.release_entry(id);
        }
    }

    /// Removes queued events of one sensor. Returns whether any were removed.
    pub fn flush_sensor(&mut self, device_id: DeviceId, sensor_type: SensorType) -> bool {
        let arena = &self.arena;
        let flushed: Vec<EntryId> = self
            .inbound
            .iter()
            .copied()
            .filter(|id| {
                arena.get(*id).is_some_and(|entry| {
                    matches!(&entry.kind, EntryKind::Sensor(sensor)
                        if sensor.device_id == device_id && sensor.sensor_type == sensor_type)
                })
            })
            .collect();
        self.inbound.retain(|id| !flushed.contains(id));
        let any = !flushed.is_empty();
        for id in flushed {
            self.release_inbound_event(id);
        }
        any
    }

    /// Takes at most one event off the queue and dispatches it.
    pub fn dispatch_once_inner(&mut self, now: Instant, next_wakeup: &mut Option<Instant>) {
        if !self.dispatch_enabled {
            self.reset_key_repeat();
        }
        if self.dispatch_frozen {
            trace!("Dispatch frozen. Waiting some more.");
            return;
        }

        let mut is_app_switch_due = self.app_switch_due_time.is_some_and(|due| due <= now);
        if let Some(due) = self.app_switch_due_time {
            wake_at(next_wakeup, due);
        }

        if self.pending_event.is_none() {
            if let Some(id) = self.inbound.pop_front() {
                self.pending_event = Some(id);
            } else {
                if is_app_switch_due {
                    self.reset_pending_app_switch(false);
                    is_app_switch_due = false;
                }
                if self.key_repeat.last_key_entry.is_some() {
                    if let Some(next_repeat) = self.key_repeat.next_repeat_time {
                        if now >= next_repeat {
                            self.pending_event = self.synthesize_key_repeat(now);
                        } else {
                            wake_at(next_wakeup, next_repeat);
                        }
                    }
                }
                if self.pending_event.is_none() {
                    return;
                }
            }
        }

        let Some(id) = self.pending_event else { return };
        let Some(entry) = self.arena.get(id) else {
            self.pending_event = None;
            return;
        };
        let is_stale = entry.age(now) >= self.config.stale_event_timeout;
        let mut drop_reason = if !entry.policy_flags.contains(PolicyFlags::PASS_TO_USER) {
            Some(DropReason::Policy)
        } else if !self.dispatch_enabled {
            Some(DropReason::Disabled)
        } else {
            None
        };
        let kind = match &entry.kind {
            EntryKind::ConfigurationChanged => Kind::ConfigurationChanged,
            EntryKind::DeviceReset { device_id } => Kind::DeviceReset(*device_id),
            EntryKind::Focus(_) => Kind::Focus,
            EntryKind::TouchMode { .. } => Kind::TouchMode,
            EntryKind::PointerCaptureChanged(_) => Kind::PointerCaptureChanged,
            EntryKind::Drag(_) => Kind::Drag,
            EntryKind::Key(key) => Kind::Key { is_app_switch: is_app_switch_key_event(&key.event, entry.policy_flags) },
            EntryKind::Motion(_) => Kind::Motion,
            EntryKind::Sensor(_) => Kind::Sensor,
        };
        if self.next_unblocked_event == Some(id) {
            self.next_unblocked_event = None;
        }

        match kind {
            Kind::Key { .. } | Kind::Motion => {},
            // Sensor events go to the policy rather than to windows.
            Kind::Sensor => drop_reason = drop_reason.filter(|reason| *reason != DropReason::Policy),
            _ => drop_reason = None,
        }

        let done = match kind {
            Kind::ConfigurationChanged => {
                self.dispatch_configuration_changed(id);
                true
            },
            Kind::DeviceReset(device_id) => {
                self.dispatch_device_reset(now, device_id);
                true
            },
            Kind::Focus => {
                self.dispatch_focus(now, id);
                true
            },
            Kind::TouchMode => {
                self.dispatch_touch_mode(now, id);
                true
            },
            Kind::PointerCaptureChanged => {
                self.dispatch_pointer_capture_changed(now, id, &mut drop_reason);
                true
            },
            Kind::Drag => {
                self.dispatch_drag(now, id);
                true
            },
            Kind::Key { is_app_switch } => {
                if is_app_switch_due {
                    if is_app_switch {
                        self.reset_pending_app_switch(true);
                    } else if drop_reason.is_none() {
                        drop_reason = Some(DropReason::AppSwitch);
                    }
                }
                if drop_reason.is_none() && is_stale {
                    drop_reason = Some(DropReason::Stale);
                }
                if drop_reason.is_none() && self.next_unblocked_event.is_some() {
                    drop_reason = Some(DropReason::Blocked);
                }
                self.dispatch_key(now, id, &mut drop_reason, next_wakeup)
            },
            Kind::Motion => {
                if drop_reason.is_none() && is_app_switch_due {
                    drop_reason = Some(DropReason::AppSwitch);
                }
                if drop_reason.is_none() && is_stale {
                    drop_reason = Some(DropReason::Stale);
                }
                if drop_reason.is_none() && self.next_unblocked_event.is_some() {
                    drop_reason = Some(DropReason::Blocked);
                }
                self.dispatch_motion(now, id, &mut drop_reason, next_wakeup)
            },
            Kind::Sensor => {
                if drop_reason.is_none() && is_app_switch_due {
                    drop_reason = Some(DropReason::AppSwitch);
                }
                if drop_reason.is_none() && is_stale {
                    drop_reason = Some(DropReason::Stale);
                }
                if drop_reason.is_none() {
                    self.dispatch_sensor(id);
                }
                true
            },
        };

        if done {
            if let Some(reason) = drop_reason {
                self.drop_inbound_event(id, reason);
            }
            self.release_pending_event();
            // Look at the next event right away.
            *next_wakeup = Some(now);
        }
    }

    fn drop_inbound_event(&mut self, id: EntryId, reason: DropReason) {
        let Some(entry) = self.arena.get(id) else { return };
        match reason {
            DropReason::Policy => debug!("Dropped event because policy consumed it: {entry}"),
            DropReason::Disabled => info!("Dropped event because input dispatch is disabled: {entry}"),
            DropReason::AppSwitch => info!("Dropped event because of pending overdue app switch: {entry}"),
            DropReason::Blocked => info!(
                "Dropped event because the current application is not responding and the user has \
                 started interacting with a different application: {entry}"
            ),
            DropReason::Stale => info!("Dropped event because it is stale: {entry}"),
            DropReason::NoPointerCapture => {
                info!("Dropped event because there is no window with Pointer Capture: {entry}")
            },
        }
        let message = match reason {
            DropReason::Policy => "inbound event was dropped because the policy consumed it",
            DropReason::Disabled => "inbound event was dropped because input dispatch is disabled",
            DropReason::AppSwitch => "inbound event was dropped because of pending overdue app switch",
            DropReason::Blocked => "inbound event was dropped because the current application is not responding",
            DropReason::Stale => "inbound event was dropped because it is stale",
            DropReason::NoPointerCapture => "inbound event was dropped because there is no window with Pointer Capture",
        };
        let options = match &entry.kind {
            EntryKind::Key(key) => Some(
                CancelationOptions::new(CancelationMode::NonPointerEvents, message)
                    .with_device(key.event.device_id)
                    .with_display(key.event.display_id),
            ),
            EntryKind::Motion(motion) => {
                let mode = if motion.source.is_pointer() {
                    CancelationMode::PointerEvents
                } else {
                    CancelationMode::NonPointerEvents
                };
                Some(
                    CancelationOptions::new(mode, message)
                        .with_device(motion.device_id)
                        .with_display(motion.display_id),
                )
            },
            _ => None,
        };
        if let Some(options) = options {
            self.synthesize_cancelation_events_for_all_connections(&options);
        }
    }

    fn synthesize_key_repeat(&mut self, now: Instant) -> Option<EntryId> {
        let last = self.key_repeat.last_key_entry?;
        let entry = self.arena.get(last)?;
        let key = entry.key()?;
        let policy_flags =
            entry.policy_flags & (PolicyFlags::WAKE | PolicyFlags::PASS_TO_USER | PolicyFlags::TRUSTED);
        let mut event = key.event.clone();
        event.repeat_count += 1;
        event.event_time = now;
        let id = self.new_entry(
            now,
            policy_flags,
            None,
            EntryKind::Key(KeyEntry {
                event,
                synthetic_repeat: true,
                intercept: InterceptState::Unknown,
                intercept_wakeup_time: None,
            }),
        );
        self.acquire_entry(id);
        if let Some(previous) = self.key_repeat.last_key_entry.replace(id) {
            self.release_entry(previous);
        }
        self.key_repeat.next_repeat_time = Some(now + self.config.key_repeat_delay);
        Some(id)
    }

    fn dispatch_configuration_changed(&mut self, id: EntryId) {
        let Some(entry) = self.arena.get(id) else { return };
        let event_time = entry.event_time;
        debug!("dispatchConfigurationChanged - eventTime={event_time:?}");
        // A configuration change may change key maps, so repeating keys stop.
        self.reset_key_repeat();
        self.post_command(Command::NotifyConfigurationChanged { event_time });
    }

    fn dispatch_device_reset(&mut self, _now: Instant, device_id: DeviceId) {
        debug!("dispatchDeviceReset - deviceId={device_id:?}");
        let repeating_device = self
            .key_repeat
            .last_key_entry
            .and_then(|last| self.arena.get(last))
            .and_then(|entry| entry.key())
            .map(|key| key.event.device_id);
        if repeating_device == Some(device_id) {
            self.reset_key_repeat();
        }
        let options = CancelationOptions::new(CancelationMode::AllEvents, "device was reset").with_device(device_id);
        self.synthesize_cancelation_events_for_all_connections(&options);
        for state in self.touch_states.values_mut() {
            if state.device_id == Some(device_id) {
                state.reset();
            }
        }
        self.touch_states.retain(|_, state| !state.windows.is_empty());
    }

    fn dispatch_sensor(&mut self, id: EntryId) {
        let Some(entry) = self.arena.get(id) else { return };
        if let EntryKind::Sensor(sensor) = &entry.kind {
            let command = Command::SensorEvent(sensor.clone());
            self.post_command(command);
        }
    }

    fn dispatch_key(
        &mut self,
        now: Instant,
        id: EntryId,
        drop_reason: &mut Option<DropReason>,
        next_wakeup: &mut Option<Instant>,
    ) -> bool {
        let Some(entry) = self.arena.get(id) else { return true };
        let Some(key) = entry.key() else { return true };
        let event_time = entry.event_time;
        let policy_flags = entry.policy_flags;
        let display_id = self.target_display(key.event.display_id);

        if !entry.dispatch_in_progress {
            let event = key.event.clone();
            let synthetic_repeat = key.synthetic_repeat;
            let mut repeat_count = event.repeat_count;
            if event.repeat_count == 0
                && event.action == KeyAction::Down
                && policy_flags.contains(PolicyFlags::TRUSTED)
                && !policy_flags.contains(PolicyFlags::DISABLE_KEY_REPEAT)
            {
                let last = self
                    .key_repeat
                    .last_key_entry
                    .and_then(|last| self.arena.get(last))
                    .and_then(|entry| entry.key())
                    .map(|key| (key.event.key_code, key.event.device_id, key.event.repeat_count));
                match last {
                    // The device repeats the key itself; keep counting from its last repeat.
                    Some((key_code, device_id, count)) if key_code == event.key_code && device_id == event.device_id => {
                        repeat_count = count + 1;
                    },
                    _ => self.reset_key_repeat(),
                }
                self.acquire_entry(id);
                if let Some(previous) = self.key_repeat.last_key_entry.replace(id) {
                    self.release_entry(previous);
                }
                self.key_repeat.next_repeat_time = Some(event_time + self.config.key_repeat_timeout);
            } else if !synthetic_repeat {
                self.reset_key_repeat();
            }

            if let Some(entry) = self.arena.get_mut(id) {
                entry.dispatch_in_progress = true;
                if let EntryKind::Key(key) = &mut entry.kind {
                    key.event.repeat_count = repeat_count;
                    if repeat_count == 1 {
                        key.event.flags |= KeyFlags::LONG_PRESS;
                    }
                }
            }
        }

        let Some((intercept, intercept_wakeup_time)) =
            self.arena.get(id).and_then(|entry| entry.key()).map(|key| (key.intercept, key.intercept_wakeup_time))
        else {
            return true;
        };
        let mut intercept = intercept;
        if intercept == InterceptState::TryAgainLater {
            if let Some(wakeup) = intercept_wakeup_time.filter(|wakeup| now < *wakeup) {
                wake_at(next_wakeup, wakeup);
                return false;
            }
            intercept = InterceptState::Unknown;
            self.set_intercept_state(id, InterceptState::Unknown, None);
        }

        match intercept {
            InterceptState::Unknown if policy_flags.contains(PolicyFlags::PASS_TO_USER) => {
                let token = self.focus.focused_window_token(display_id);
                self.acquire_entry(id);
                self.post_command(Command::InterceptKeyBeforeDispatching { token, entry: id });
                return false;
            },
            InterceptState::Unknown => self.set_intercept_state(id, InterceptState::Continue, None),
            InterceptState::Skip => {
                if drop_reason.is_none() {
                    *drop_reason = Some(DropReason::Policy);
                }
            },
            InterceptState::Continue | InterceptState::TryAgainLater => {},
        }

        if let Some(reason) = drop_reason {
            let result =
                if *reason == DropReason::Policy { InjectionResult::Succeeded } else { InjectionResult::Failed };
            self.set_injection_result(id, result);
            return true;
        }

        let (result, window) = self.find_focused_window_target(now, id, display_id, true, next_wakeup);
        if result == InjectionResult::Pending {
            return false;
        }
        self.set_injection_result(id, result);
        let (InjectionResult::Succeeded, Some(window)) = (result, window) else { return true };

        let mut targets = Vec::new();
        add_target(
            &mut targets,
            window,
            InputTargetFlags::FOREGROUND | InputTargetFlags::DISPATCH_AS_IS,
            PointerIdSet::default(),
            None,
        );
        self.add_global_monitoring_targets(&mut targets, display_id);
        self.dispatch_event(now, id, &targets);
        true
    }

    fn set_intercept_state(&mut self, id: EntryId, state: InterceptState, wakeup: Option<Instant>) {
        if let Some(EntryKind::Key(key)) = self.arena.get_mut(id).map(|entry| &mut entry.kind) {
            key.intercept = state;
            key.intercept_wakeup_time = wakeup;
        }
    }

    /// Records what the policy decided for a key offered before dispatch.
    pub fn apply_intercept_result(&mut self, now: Instant, id: EntryId, result: KeyInterceptResult) {
        match result {
            KeyInterceptResult::Continue => self.set_intercept_state(id, InterceptState::Continue, None),
            KeyInterceptResult::Skip => self.set_intercept_state(id, InterceptState::Skip, None),
            KeyInterceptResult::TryAgainLater(delay) => {
                self.set_intercept_state(id, InterceptState::TryAgainLater, Some(now + delay))
            },
        }
    }

    fn dispatch_motion(
        &mut self,
        now: Instant,
        id: EntryId,
        drop_reason: &mut Option<DropReason>,
        next_wakeup: &mut Option<Instant>,
    ) -> bool {
        let Some(entry) = self.arena.get_mut(id) else { return true };
        entry.dispatch_in_progress = true;
        let Some(motion) = entry.motion().cloned() else { return true };

        if let Some(reason) = drop_reason {
            let result =
                if *reason == DropReason::Policy { InjectionResult::Succeeded } else { InjectionResult::Failed };
            self.set_injection_result(id, result);
            return true;
        }

        let display_id = self.target_display(motion.display_id);
        let is_pointer_event = motion.source.is_pointer();
        let mut conflicting_pointer_actions = false;
        let (result, mut targets) = if is_pointer_event {
            let (result, targets, conflicting) = self.find_touched_window_targets(now, id, &motion);
            conflicting_pointer_actions = conflicting;
            (result, targets)
        } else if motion.source.contains(Source::MOUSE_RELATIVE) {
            let Some(token) = self.pointer_capture.window else {
                *drop_reason = Some(DropReason::NoPointerCapture);
                self.set_injection_result(id, InjectionResult::Failed);
                return true;
            };
            let mut targets = Vec::new();
            add_target(
                &mut targets,
                token,
                InputTargetFlags::FOREGROUND | InputTargetFlags::DISPATCH_AS_IS,
                PointerIdSet::default(),
                None,
            );
            (InjectionResult::Succeeded, targets)
        } else {
            let (result, window) = self.find_focused_window_target(now, id, display_id, false, next_wakeup);
            let mut targets = Vec::new();
            if let Some(window) = window.filter(|_| result == InjectionResult::Succeeded) {
                add_target(
                    &mut targets,
                    window,
                    InputTargetFlags::FOREGROUND | InputTargetFlags::DISPATCH_AS_IS,
                    PointerIdSet::default(),
                    None,
                );
            }
            (result, targets)
        };

        if result == InjectionResult::Pending {
            return false;
        }
        self.set_injection_result(id, result);
        if result == InjectionResult::PermissionDenied {
            return true;
        }
        if result != InjectionResult::Succeeded {
            let mode =
                if is_pointer_event { CancelationMode::PointerEvents } else { CancelationMode::NonPointerEvents };
            let options = CancelationOptions::new(mode, "input event injection failed")
                .with_device(motion.device_id)
                .with_display(display_id);
            self.synthesize_cancelation_events_for_all_connections(&options);
            return true;
        }

        self.add_global_monitoring_targets(&mut targets, display_id);
        if conflicting_pointer_actions {
            let options = CancelationOptions::new(CancelationMode::PointerEvents, "conflicting pointer actions")
                .with_display(display_id);
            self.synthesize_cancelation_events_for_all_connections(&options);
        }
        self.dispatch_event(now, id, &targets);
        true
    }

    fn dispatch_focus(&mut self, now: Instant, id: EntryId) {
        let Some(entry) = self.arena.get_mut(id) else { return };
        entry.dispatch_in_progress = true;
        let EntryKind::Focus(focus) = &entry.kind else { return };
        let token = focus.token;
        debug!("Focus {} on {token:?}, reason: {}", if focus.has_focus { "entering" } else { "leaving" }, focus.reason);
        if !self.connections.contains_key(&token) {
            // The window went away.
            return;
        }
        let mut targets = Vec::new();
        add_target(
            &mut targets,
            token,
            InputTargetFlags::FOREGROUND | InputTargetFlags::DISPATCH_AS_IS,
            PointerIdSet::default(),
            None,
        );
        self.dispatch_event(now, id, &targets);
    }

    fn dispatch_touch_mode(&mut self, now: Instant, id: EntryId) {
        let Some(entry) = self.arena.get_mut(id) else { return };
        entry.dispatch_in_progress = true;
        let EntryKind::TouchMode { display_id, .. } = entry.kind else { return };
        let tokens: Vec<_> = self
            .window_handles(display_id)
            .iter()
            .map(|window| window.token)
            .filter(|token| self.connections.contains_key(token))
            .collect();
        let mut targets = Vec::new();
        for token in tokens {
            add_target(
                &mut targets,
                token,
                InputTargetFlags::FOREGROUND | InputTargetFlags::DISPATCH_AS_IS,
                PointerIdSet::default(),
                None,
            );
        }
        if !targets.is_empty() {
            self.dispatch_event(now, id, &targets);
        }
    }

    fn dispatch_drag(&mut self, now: Instant, id: EntryId) {
        let Some(entry) = self.arena.get_mut(id) else { return };
        if entry.dispatch_in_progress {
            return;
        }
        entry.dispatch_in_progress = true;
        let EntryKind::Drag(drag) = &entry.kind else { return };
        let token = drag.token;
        if self.window_by_token(token).is_none() || !self.connections.contains_key(&token) {
            return;
        }
        let mut targets = Vec::new();
        add_target(
            &mut targets,
            token,
            InputTargetFlags::FOREGROUND | InputTargetFlags::DISPATCH_AS_IS,
            PointerIdSet::default(),
            None,
        );
        self.dispatch_event(now, id, &targets);
    }
}

#[cfg(test)]
mod tests {
    use crate::config::DispatcherConfiguration;
    use crate::event::{DeviceId, Pointer, Source};
    use crate::hmac::HmacKeyManager;
    use crate::window::{ApplicationInfo, ApplicationToken, DisplayId, InputToken, Rect, WindowInfo};

    use super::*;

    fn window_of(application: &ApplicationInfo) -> WindowInfo {
        WindowInfo::new(InputToken::from(1), "app", DisplayId::DEFAULT, Rect::new(0, 0, 100, 100))
            .with_application(application.clone())
    }

    #[test]
    fn touch_on_another_application_prunes_queue() {
        let mut state = DispatcherState::new(DispatcherConfiguration::default(), HmacKeyManager::new().unwrap());
        let starting = ApplicationInfo::new(ApplicationToken::from(1), "starting");
        let other = ApplicationInfo::new(ApplicationToken::from(2), "other");
        let down = MotionEvent::new(
            DeviceId::from(1),
            Source::TOUCHSCREEN,
            DisplayId::DEFAULT,
            MotionAction::Down,
            vec![Pointer::new(0, 10.0, 10.0)],
            Instant::now(),
        );

        state.set_input_windows(vec![window_of(&other)], DisplayId::DEFAULT);
        assert!(!state.should_prune_inbound_queue(&down));
        state.awaited_focused_application = Some(starting.clone());
        assert!(state.should_prune_inbound_queue(&down));

        state.set_input_windows(vec![window_of(&starting)], DisplayId::DEFAULT);
        assert!(!state.should_prune_inbound_queue(&down));
    }

    #[test]
    fn wake_at_keeps_earliest() {
        let now = Instant::now();
        let mut next = None;
        wake_at(&mut next, now + std::time::Duration::from_secs(2));
        wake_at(&mut next, now + std::time::Duration::from_secs(1));
        wake_at(&mut next, now + std::time::Duration::from_secs(3));
        assert_eq!(next, Some(now + std::time::Duration::from_secs(1)));
    }
}

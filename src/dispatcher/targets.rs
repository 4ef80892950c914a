//! Finding the windows an event goes to.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use dpi::PhysicalPosition;
use smol_str::SmolStr;
use tracing::{debug, error, info, warn};

use crate::command::Command;
use crate::entry::{DragEntry, EntryId, EntryKind};
use crate::event::{MotionAction, MotionEvent, PolicyFlags};
use crate::inject::InjectionResult;
use crate::target::{add_target, InputTarget, InputTargetFlags};
use crate::touch::{PointerIdSet, TouchState};
use crate::window::{DisplayId, InputToken, TouchOcclusionMode, Uid, WindowFlags, WindowInfo};

use super::inbound::wake_at;
use super::state::{DispatcherState, KEY_WAITING_FOR_EVENTS_TIMEOUT};

/// What covers a window at the point of a touch.
#[derive(Debug, Default)]
struct TouchOcclusionInfo {
    has_blocking_occlusion: bool,
    obscuring_opacity: f32,
    obscuring_name: Option<SmolStr>,
    obscuring_uid: Option<Uid>,
}

fn accepts_touch_at(window: &WindowInfo, display_id: DisplayId, point: PhysicalPosition<f32>) -> bool {
    window.display_id == display_id
        && window.is_visible()
        && !window.flags.contains(WindowFlags::NOT_TOUCHABLE)
        && window.touchable_region_contains(point)
}

/// Whether `other` counts as covering `window` for occlusion purposes.
fn can_be_obscured_by(window: &WindowInfo, other: &WindowInfo) -> bool {
    if window.token == other.token {
        return false;
    }
    if !other.is_visible() {
        return false;
    }
    if other.alpha == 0.0 && other.flags.contains(WindowFlags::NOT_TOUCHABLE) {
        // Fully transparent windows that cannot be touched are invisible to the user.
        return false;
    }
    if window.owner_uid == other.owner_uid {
        return false;
    }
    if other.flags.contains(WindowFlags::TRUSTED_OVERLAY) {
        return false;
    }
    other.display_id == window.display_id
}

impl DispatcherState {
    /// The top-most non-spy window accepting a touch at `point`.
    pub fn find_touched_window_at(
        &self,
        display_id: DisplayId,
        point: PhysicalPosition<f32>,
        ignore_drag_window: bool,
    ) -> Option<Arc<WindowInfo>> {
        let drag_token = self.drag.as_ref().map(|drag| drag.drag_window.token);
        self.window_handles(display_id)
            .iter()
            .filter(|window| !(ignore_drag_window && Some(window.token) == drag_token))
            .find(|window| !window.is_spy() && accepts_touch_at(window, display_id, point))
            .cloned()
    }

    fn find_touched_spy_windows_at(&self, display_id: DisplayId, point: PhysicalPosition<f32>) -> Vec<Arc<WindowInfo>> {
        self.window_handles(display_id)
            .iter()
            .filter(|window| window.is_spy() && accepts_touch_at(window, display_id, point))
            .cloned()
            .collect()
    }

    /// Windows above the touched one that watch for touches outside themselves.
    fn find_outside_targets(
        &self,
        display_id: DisplayId,
        point: PhysicalPosition<f32>,
        touched: Option<InputToken>,
    ) -> Vec<Arc<WindowInfo>> {
        self.window_handles(display_id)
            .iter()
            .take_while(|window| Some(window.token) != touched)
            .filter(|window| {
                window.flags.contains(WindowFlags::WATCH_OUTSIDE_TOUCH)
                    && !accepts_touch_at(window, display_id, point)
            })
            .cloned()
            .collect()
    }

    pub fn find_wallpaper_window_below(&self, window: &WindowInfo) -> Option<Arc<WindowInfo>> {
        self.window_handles(window.display_id)
            .iter()
            .skip_while(|other| other.token != window.token)
            .skip(1)
            .find(|other| other.flags.contains(WindowFlags::IS_WALLPAPER))
            .cloned()
    }

    fn windows_above<'a>(&'a self, window: &'a WindowInfo) -> impl Iterator<Item = &'a Arc<WindowInfo>> + 'a {
        self.window_handles(window.display_id).iter().take_while(move |other| other.token != window.token)
    }

    pub fn is_window_obscured_at_point(&self, window: &WindowInfo, point: PhysicalPosition<f32>) -> bool {
        self.windows_above(window).any(|other| can_be_obscured_by(window, other) && other.frame.contains(point))
    }

    pub fn is_window_obscured(&self, window: &WindowInfo) -> bool {
        self.windows_above(window).any(|other| can_be_obscured_by(window, other) && other.overlaps(window))
    }

    fn compute_touch_occlusion_info(&self, window: &WindowInfo, point: PhysicalPosition<f32>) -> TouchOcclusionInfo {
        let mut info = TouchOcclusionInfo::default();
        let mut opacity_by_uid: HashMap<Uid, f32> = HashMap::new();
        for other in self.windows_above(window) {
            if !can_be_obscured_by(window, other) || !other.frame.contains(point) {
                continue;
            }
            match other.touch_occlusion_mode {
                TouchOcclusionMode::BlockUntrusted => {
                    info.has_blocking_occlusion = true;
                    info.obscuring_name = Some(other.name.clone());
                    info.obscuring_uid = Some(other.owner_uid);
                    break;
                },
                TouchOcclusionMode::UseOpacity => {
                    // Windows of one owner combine like stacked translucent layers.
                    let opacity = opacity_by_uid.entry(other.owner_uid).or_insert(0.0);
                    *opacity = 1.0 - (1.0 - *opacity) * (1.0 - other.alpha);
                    if *opacity > info.obscuring_opacity {
                        info.obscuring_opacity = *opacity;
                        info.obscuring_name = Some(other.name.clone());
                        info.obscuring_uid = Some(other.owner_uid);
                    }
                },
                TouchOcclusionMode::Allow => {},
            }
        }
        info
    }

    fn is_touch_trusted(&self, info: &TouchOcclusionInfo) -> bool {
        if info.has_blocking_occlusion {
            warn!("Untrusted touch due to occlusion by {:?}/{:?}", info.obscuring_name, info.obscuring_uid);
            return false;
        }
        if info.obscuring_opacity > self.config.maximum_obscuring_opacity_for_touch {
            warn!(
                "Untrusted touch due to occlusion by {:?}/{:?} (obscuring opacity = {:.2}, maximum allowed = {:.2})",
                info.obscuring_name,
                info.obscuring_uid,
                info.obscuring_opacity,
                self.config.maximum_obscuring_opacity_for_touch
            );
            return false;
        }
        true
    }

    fn has_injection_permission(&self, id: EntryId, window: &WindowInfo) -> bool {
        let target_uid = self
            .arena
            .get(id)
            .and_then(|entry| entry.injection)
            .and_then(|injection| self.injections.get(injection))
            .and_then(|state| state.target_uid);
        match target_uid {
            Some(uid) if uid != window.owner_uid => {
                warn!("Permission denied: injecting event from uid {uid:?} into window {} owned by {:?}", window.name, window.owner_uid);
                false
            },
            _ => true,
        }
    }

    fn can_window_receive_motion(&self, window: &WindowInfo) -> bool {
        if window.flags.contains(WindowFlags::PAUSE_DISPATCHING) {
            info!("Not sending touch event to {} because it is paused", window.name);
            return false;
        }
        if window.flags.contains(WindowFlags::NO_INPUT_CHANNEL) {
            warn!("Not sending touch gesture to {} because it has no input channel", window.name);
            return false;
        }
        let Some(connection) = self.connections.get(&window.token) else {
            warn!("Not sending touch to {} because there's no corresponding connection", window.name);
            return false;
        };
        if !connection.is_responsive() {
            warn!("Not sending touch to {} because it is not responsive", window.name);
            return false;
        }
        true
    }

    fn should_drop_input(&self, window: &WindowInfo) -> bool {
        if window.flags.contains(WindowFlags::DROP_INPUT)
            || (window.flags.contains(WindowFlags::DROP_INPUT_IF_OBSCURED) && self.is_window_obscured(window))
        {
            info!("Dropping input for {} because it has DROP_INPUT set or is obscured", window.name);
            return true;
        }
        false
    }

    fn obscured_flags(&self, window: &WindowInfo, point: PhysicalPosition<f32>) -> InputTargetFlags {
        if self.is_window_obscured_at_point(window, point) {
            InputTargetFlags::WINDOW_IS_OBSCURED
        } else if self.is_window_obscured(window) {
            InputTargetFlags::WINDOW_IS_PARTIALLY_OBSCURED
        } else {
            InputTargetFlags::empty()
        }
    }

    /// Keys and non-pointer motions go to the focused window of `display_id`.
    pub fn find_focused_window_target(
        &mut self,
        now: Instant,
        id: EntryId,
        display_id: DisplayId,
        is_key: bool,
        next_wakeup: &mut Option<Instant>,
    ) -> (InjectionResult, Option<InputToken>) {
        let focused_window = self.focused_window(display_id).cloned();
        let focused_application = self.focused_applications.get(&display_id).cloned();

        let Some(window) = focused_window else {
            let Some(application) = focused_application else {
                info!(
                    "Dropping event because there is no focused window or focused application in display {display_id:?}"
                );
                return (InjectionResult::Failed, None);
            };
            // The application may still be starting up and add a window soon.
            return match self.no_focused_window_timeout {
                None => {
                    let timeout = application.dispatching_timeout;
                    warn!(
                        "Waiting because no window has focus but {} may eventually add a window when it \
                         finishes starting up. Will wait for {timeout:?}",
                        application.name
                    );
                    self.no_focused_window_timeout = Some(now + timeout);
                    self.awaited_focused_application = Some(application);
                    self.awaited_application_display = display_id;
                    wake_at(next_wakeup, now + timeout);
                    (InjectionResult::Pending, None)
                },
                Some(deadline) if now >= deadline => {
                    error!("Dropping event because there is no focused window");
                    (InjectionResult::Failed, None)
                },
                Some(deadline) => {
                    wake_at(next_wakeup, deadline);
                    (InjectionResult::Pending, None)
                },
            };
        };

        self.reset_no_focused_window_timeout();

        if window.flags.contains(WindowFlags::DROP_INPUT) {
            info!("Dropping event targeting {} because it has DROP_INPUT set", window.name);
            return (InjectionResult::Failed, None);
        }
        if !self.has_injection_permission(id, &window) {
            return (InjectionResult::PermissionDenied, None);
        }
        if window.flags.contains(WindowFlags::PAUSE_DISPATCHING) {
            info!("Waiting because {} is paused", window.name);
            return (InjectionResult::Pending, None);
        }
        // Keys wait for earlier events so that focus changes they cause apply in order.
        if is_key && self.should_wait_to_send_key(now, &window.name) {
            if let Some(timeout) = self.key_waiting_for_events_timeout {
                wake_at(next_wakeup, timeout);
            }
            return (InjectionResult::Pending, None);
        }
        (InjectionResult::Succeeded, Some(window.token))
    }

    fn should_wait_to_send_key(&mut self, now: Instant, focused_window_name: &str) -> bool {
        if self.anr_tracker.is_empty() {
            self.key_waiting_for_events_timeout = None;
            return false;
        }
        let Some(timeout) = self.key_waiting_for_events_timeout else {
            debug!("Waiting to send key to {focused_window_name} because there are unprocessed events");
            self.key_waiting_for_events_timeout = Some(now + KEY_WAITING_FOR_EVENTS_TIMEOUT);
            return true;
        };
        let waiting = now < timeout;
        if !waiting {
            warn!("Dispatching key to {focused_window_name} even though there are other unprocessed events");
        }
        waiting
    }

    /// Monitors of the display that can currently take events.
    pub fn add_global_monitoring_targets(&self, targets: &mut Vec<InputTarget>, display_id: DisplayId) {
        let Some(monitors) = self.global_monitors.get(&display_id) else { return };
        for token in monitors {
            match self.connections.get(token) {
                Some(connection) if connection.is_responsive() => {
                    add_target(targets, *token, InputTargetFlags::DISPATCH_AS_IS, PointerIdSet::default(), None)
                },
                Some(connection) => warn!("Unresponsive monitor {} will not get the new gesture", connection.name()),
                None => error!("Could not find connection for monitor {token:?}"),
            }
        }
    }

    /// Resolves the targets of a pointer event and updates the touch state of its display.
    ///
    /// The flag in the result is set when the event starts a gesture while another is still in
    /// progress; the old one must be cancelled first.
    pub fn find_touched_window_targets(
        &mut self,
        now: Instant,
        id: EntryId,
        motion: &MotionEvent,
    ) -> (InjectionResult, Vec<InputTarget>, bool) {
        let display_id = self.target_display(motion.display_id);
        let action = motion.action;
        if action.is_hover() || action == MotionAction::Scroll {
            return self.find_hover_targets(id, motion, display_id);
        }

        let old_state = self.touch_states.get(&display_id).cloned();
        let was_down = old_state.as_ref().is_some_and(|state| state.down);
        let mut state = old_state.unwrap_or_default();
        let mut is_split = state.split;
        let switched_device = state.device_id.is_some()
            && (state.device_id != Some(motion.device_id)
                || state.source != motion.source
                || state.display_id != Some(display_id));
        let new_gesture = action == MotionAction::Down;

        if new_gesture {
            state.reset();
            state.down = true;
            state.device_id = Some(motion.device_id);
            state.source = motion.source;
            state.display_id = Some(display_id);
            is_split = false;
        } else if switched_device && action == MotionAction::Move {
            info!("Dropping move event because a pointer for a different device is already active");
            return (InjectionResult::Failed, Vec::new(), false);
        }

        if new_gesture || (is_split && matches!(action, MotionAction::PointerDown(_))) {
            let Some(pointer) = motion.pointers.get(action.pointer_index()) else {
                return (InjectionResult::Failed, Vec::new(), false);
            };
            let point = pointer.coords.position;
            let pointer_ids = PointerIdSet::single(pointer.id);

            let mut touched_window = self.find_touched_window_at(display_id, point, false);
            let outside = if new_gesture {
                self.find_outside_targets(display_id, point, touched_window.as_ref().map(|window| window.token))
            } else {
                Vec::new()
            };
            if touched_window.is_none() {
                debug!("No new touched window at ({}, {}) in display {display_id:?}", point.x, point.y);
                touched_window = state.first_foreground_window().cloned();
            }
            match touched_window.as_ref().map(|window| window.supports_split_touch()) {
                Some(true) => is_split = true,
                // The gesture was split already; a window that cannot split does not join it.
                Some(false) if is_split => touched_window = None,
                _ => {},
            }

            let mut new_touched_windows = self.find_touched_spy_windows_at(display_id, point);
            if let Some(window) = touched_window {
                new_touched_windows.insert(0, window);
            }
            if new_touched_windows.is_empty() && !state.prevent_new_targets {
                info!("Dropping event because there is no touchable window at ({}, {}) on display {display_id:?}", point.x, point.y);
                if new_gesture {
                    self.touch_states.remove(&display_id);
                }
                return (InjectionResult::Failed, Vec::new(), false);
            }

            if state.prevent_new_targets {
                // A spy pilfered the gesture; new pointers only go to it.
                for touched in state.windows.iter_mut().filter(|touched| touched.is_pilfering) {
                    touched.pointer_ids = touched.pointer_ids.union(pointer_ids);
                }
            } else {
                for window in new_touched_windows {
                    if !self.can_window_receive_motion(&window) {
                        continue;
                    }
                    let mut target_flags = InputTargetFlags::DISPATCH_AS_IS;
                    let occlusion = self.compute_touch_occlusion_info(&window, point);
                    if !self.is_touch_trusted(&occlusion) {
                        if let Some(name) = occlusion.obscuring_name {
                            self.post_command(Command::UntrustedTouch(name));
                        }
                        target_flags |= InputTargetFlags::WINDOW_IS_OBSCURED;
                    }
                    if self.should_drop_input(&window) {
                        continue;
                    }
                    if !window.is_spy() {
                        target_flags |= InputTargetFlags::FOREGROUND;
                    }
                    if is_split {
                        target_flags |= InputTargetFlags::SPLIT;
                    }
                    target_flags |= self.obscured_flags(&window, point);
                    state.add_or_update_window(&window, target_flags, pointer_ids, Some(motion.event_time));

                    if target_flags.contains(InputTargetFlags::FOREGROUND)
                        && window.flags.contains(WindowFlags::DUPLICATE_TOUCH_TO_WALLPAPER)
                    {
                        if let Some(wallpaper) = self.find_wallpaper_window_below(&window) {
                            let mut wallpaper_flags = InputTargetFlags::DISPATCH_AS_IS
                                | InputTargetFlags::WINDOW_IS_OBSCURED
                                | InputTargetFlags::WINDOW_IS_PARTIALLY_OBSCURED;
                            if is_split {
                                wallpaper_flags |= InputTargetFlags::SPLIT;
                            }
                            state.add_or_update_window(&wallpaper, wallpaper_flags, pointer_ids, Some(motion.event_time));
                        }
                    }
                }
            }

            for window in outside {
                state.add_or_update_window(&window, InputTargetFlags::DISPATCH_AS_OUTSIDE, PointerIdSet::default(), None);
            }
        } else {
            if !state.down {
                debug!("Dropping event because the pointer is not down or we previously dropped the pointer down event");
                return (InjectionResult::Failed, Vec::new(), false);
            }

            self.add_drag_event(now, motion, display_id);

            if action == MotionAction::Move && motion.pointers.len() == 1 && state.is_slippery() {
                self.slip_touch(motion, display_id, &mut state, &mut is_split);
            }

            if !is_split {
                if let MotionAction::PointerDown(index) = action {
                    if let Some(pointer) = motion.pointers.get(index) {
                        // Without splitting every touched window gets the new pointer.
                        let drag_token = self.drag.as_ref().map(|drag| drag.drag_window.token);
                        for touched in state.windows.iter_mut().filter(|touched| Some(touched.token()) != drag_token) {
                            touched.pointer_ids.insert(pointer.id);
                        }
                    }
                }
            }
        }

        let has_foreground = state
            .windows
            .iter()
            .any(|touched| touched.target_flags.contains(InputTargetFlags::FOREGROUND) || touched.is_pilfering);
        if !has_foreground {
            info!("Dropping event because there is no touched window on display {display_id:?} to receive it");
            if new_gesture {
                self.touch_states.remove(&display_id);
            }
            return (InjectionResult::Failed, Vec::new(), false);
        }

        let denied = state.windows.iter().any(|touched| {
            touched.target_flags.contains(InputTargetFlags::FOREGROUND) && !self.has_injection_permission(id, &touched.window)
        });
        if denied {
            return (InjectionResult::PermissionDenied, Vec::new(), false);
        }

        if new_gesture {
            if let Some(foreground) = state.first_foreground_window().cloned() {
                // Watchers owned by someone else only learn that a touch happened.
                for touched in &mut state.windows {
                    if touched.target_flags.contains(InputTargetFlags::DISPATCH_AS_OUTSIDE)
                        && touched.window.owner_uid != foreground.owner_uid
                    {
                        touched.target_flags |= InputTargetFlags::ZERO_COORDS;
                    }
                }
                if motion.source.is_pointer() && self.focus.focused_window_token(self.focused_display) != Some(foreground.token) {
                    self.post_command(Command::PointerDownOutsideFocus(foreground.token));
                }
            }
        }

        let mut targets = Vec::new();
        for touched in &state.windows {
            add_target(&mut targets, touched.token(), touched.target_flags, touched.pointer_ids, touched.first_down_time);
        }

        state.filter_non_as_is_touch_windows();

        let mut conflicting = switched_device;
        match action {
            MotionAction::Up | MotionAction::Cancel => {
                if action == MotionAction::Cancel {
                    self.cancel_drag(motion);
                }
                state.reset();
            },
            MotionAction::Down if was_down => conflicting = true,
            MotionAction::PointerUp(index) => {
                if let Some(pointer) = motion.pointers.get(index) {
                    state.remove_pointer(pointer.id);
                }
            },
            _ => {},
        }

        if state.down && !state.windows.is_empty() {
            self.touch_states.insert(display_id, state);
        } else {
            self.touch_states.remove(&display_id);
        }
        (InjectionResult::Succeeded, targets, conflicting)
    }

    fn slip_touch(&mut self, motion: &MotionEvent, display_id: DisplayId, state: &mut TouchState, is_split: &mut bool) {
        let Some(pointer) = motion.pointers.first() else { return };
        let point = pointer.coords.position;
        let Some(old_window) = state.first_foreground_window().cloned() else { return };
        let Some(new_window) = self.find_touched_window_at(display_id, point, false) else { return };
        if old_window.token == new_window.token || !self.can_window_receive_motion(&new_window) {
            return;
        }
        debug!("Touch is slipping out of window {} into window {} in display {display_id:?}", old_window.name, new_window.name);

        let pointer_ids = PointerIdSet::single(pointer.id);
        state.add_or_update_window(&old_window, InputTargetFlags::DISPATCH_AS_SLIPPERY_EXIT, PointerIdSet::default(), None);

        if new_window.supports_split_touch() {
            *is_split = true;
        }
        let mut target_flags = InputTargetFlags::FOREGROUND | InputTargetFlags::DISPATCH_AS_SLIPPERY_ENTER;
        if *is_split {
            target_flags |= InputTargetFlags::SPLIT;
        }
        target_flags |= self.obscured_flags(&new_window, point);
        state.add_or_update_window(&new_window, target_flags, pointer_ids, Some(motion.event_time));

        self.slip_wallpaper_touch(target_flags, &old_window, &new_window, state, pointer_ids, motion.event_time);
    }

    /// Moves the wallpaper part of a touch along with a slip between two windows.
    pub fn slip_wallpaper_touch(
        &self,
        target_flags: InputTargetFlags,
        old_window: &WindowInfo,
        new_window: &WindowInfo,
        state: &mut TouchState,
        pointer_ids: PointerIdSet,
        event_time: Instant,
    ) {
        let old_has_wallpaper = old_window.flags.contains(WindowFlags::DUPLICATE_TOUCH_TO_WALLPAPER);
        let new_has_wallpaper = target_flags.contains(InputTargetFlags::FOREGROUND)
            && new_window.flags.contains(WindowFlags::DUPLICATE_TOUCH_TO_WALLPAPER);
        let old_wallpaper = if old_has_wallpaper { state.wallpaper_window().cloned() } else { None };
        let new_wallpaper = if new_has_wallpaper { self.find_wallpaper_window_below(new_window) } else { None };
        if old_wallpaper.as_ref().map(|window| window.token) == new_wallpaper.as_ref().map(|window| window.token) {
            return;
        }
        if let Some(wallpaper) = old_wallpaper {
            state.add_or_update_window(&wallpaper, InputTargetFlags::DISPATCH_AS_SLIPPERY_EXIT, PointerIdSet::default(), None);
        }
        if let Some(wallpaper) = new_wallpaper {
            state.add_or_update_window(
                &wallpaper,
                InputTargetFlags::DISPATCH_AS_SLIPPERY_ENTER
                    | InputTargetFlags::WINDOW_IS_OBSCURED
                    | InputTargetFlags::WINDOW_IS_PARTIALLY_OBSCURED,
                pointer_ids,
                Some(event_time),
            );
        }
    }

    /// Hover and scroll events go to the window under the pointer and never start a gesture.
    fn find_hover_targets(
        &mut self,
        id: EntryId,
        motion: &MotionEvent,
        display_id: DisplayId,
    ) -> (InjectionResult, Vec<InputTarget>, bool) {
        let action = motion.action;
        let Some(pointer) = motion.pointers.first() else {
            return (InjectionResult::Failed, Vec::new(), false);
        };
        let point = pointer.coords.position;
        let touched_window = self.find_touched_window_at(display_id, point, false);
        let mut targets = Vec::new();

        if let Some(window) = &touched_window {
            if !self.has_injection_permission(id, window) {
                return (InjectionResult::PermissionDenied, Vec::new(), false);
            }
        }
        let touched_token = touched_window.as_ref().map(|window| window.token);
        let mut receivers = Vec::new();
        if let Some(window) = touched_window {
            receivers.push(window);
        }
        receivers.extend(self.find_touched_spy_windows_at(display_id, point));
        for window in receivers {
            if !self.can_window_receive_motion(&window) || self.should_drop_input(&window) {
                continue;
            }
            let mut flags = InputTargetFlags::DISPATCH_AS_IS | self.obscured_flags(&window, point);
            if !window.is_spy() {
                flags |= InputTargetFlags::FOREGROUND;
            }
            add_target(&mut targets, window.token, flags, PointerIdSet::default(), None);
        }

        if action.is_hover() {
            let new_hover = if action == MotionAction::HoverExit { None } else { touched_token };
            let last_hover = self.hover_windows.get(&display_id).copied();
            if new_hover != last_hover {
                if let Some(last) = last_hover.filter(|last| action != MotionAction::HoverExit || Some(*last) != touched_token) {
                    add_target(&mut targets, last, InputTargetFlags::DISPATCH_AS_HOVER_EXIT, PointerIdSet::default(), None);
                }
                if let Some(new) = new_hover.filter(|new| action != MotionAction::HoverEnter || Some(*new) != touched_token) {
                    add_target(&mut targets, new, InputTargetFlags::DISPATCH_AS_HOVER_ENTER, PointerIdSet::default(), None);
                }
            }
            match new_hover {
                Some(token) => self.hover_windows.insert(display_id, token),
                None => self.hover_windows.remove(&display_id),
            };
        }

        if targets.is_empty() {
            info!("Dropping event because there is no touchable window at ({}, {}) on display {display_id:?}", point.x, point.y);
            return (InjectionResult::Failed, targets, false);
        }

        // Hovering means nothing is down any more.
        let mut conflicting = false;
        if action.is_hover() && self.touch_states.get(&display_id).is_some_and(|state| state.down) {
            conflicting = true;
            self.touch_states.remove(&display_id);
        }
        (InjectionResult::Succeeded, targets, conflicting)
    }

    fn enqueue_drag_event(&mut self, now: Instant, token: InputToken, is_exiting: bool, position: PhysicalPosition<f32>) {
        let id = self.new_entry(
            now,
            PolicyFlags::PASS_TO_USER,
            None,
            EntryKind::Drag(DragEntry { token, is_exiting, position }),
        );
        self.enqueue_inbound(id);
    }

    fn add_drag_event(&mut self, now: Instant, motion: &MotionEvent, display_id: DisplayId) {
        let Some(drag) = &self.drag else { return };
        if drag.drag_window.display_id != display_id {
            return;
        }
        let drag_pointer = drag.pointer_id;
        let Some(pointer) = motion.pointers.get(motion.action.pointer_index()) else { return };
        if pointer.id != drag_pointer {
            return;
        }
        let position = pointer.coords.position;
        match motion.action {
            MotionAction::Move => {
                let hover = self.find_touched_window_at(display_id, position, true).map(|window| window.token);
                let last_hover = self.drag.as_ref().and_then(|drag| drag.hover_window);
                if hover != last_hover {
                    if let Some(last) = last_hover {
                        self.enqueue_drag_event(now, last, true, position);
                    }
                    if let Some(drag) = &mut self.drag {
                        drag.hover_window = hover;
                    }
                }
                if let Some(token) = hover {
                    self.enqueue_drag_event(now, token, false, position);
                }
            },
            MotionAction::Up | MotionAction::PointerUp(_) => self.finish_drag_and_drop(display_id, position),
            _ => {},
        }
    }

    fn finish_drag_and_drop(&mut self, display_id: DisplayId, position: PhysicalPosition<f32>) {
        let drop_window = self.find_touched_window_at(display_id, position, true).map(|window| window.token);
        debug!("Drag finished over {drop_window:?}");
        self.post_command(Command::DropWindow { token: drop_window, position });
        self.drag = None;
    }

    fn cancel_drag(&mut self, motion: &MotionEvent) {
        let Some(drag) = &self.drag else { return };
        if drag.drag_window.display_id != self.target_display(motion.display_id) {
            return;
        }
        self.post_command(Command::DropWindow { token: None, position: PhysicalPosition::new(0.0, 0.0) });
        self.drag = None;
    }
}

#[cfg(test)]
mod tests {
    use crate::window::{Pid, Rect};

    use super::*;

    fn window(token: u64, uid: u32, frame: Rect) -> WindowInfo {
        WindowInfo::new(InputToken::from(token), "w", DisplayId::DEFAULT, frame).with_owner(Pid(1), Uid(uid))
    }

    #[test]
    fn same_owner_never_obscures() {
        let bottom = window(1, 10, Rect::new(0, 0, 100, 100));
        let top = window(2, 10, Rect::new(0, 0, 100, 100));
        assert!(!can_be_obscured_by(&bottom, &top));
        let foreign = window(3, 11, Rect::new(0, 0, 100, 100));
        assert!(can_be_obscured_by(&bottom, &foreign));
    }

    #[test]
    fn trusted_overlays_and_invisible_windows_do_not_obscure() {
        let bottom = window(1, 10, Rect::new(0, 0, 100, 100));
        let overlay = window(2, 11, Rect::new(0, 0, 100, 100)).with_flags(WindowFlags::TRUSTED_OVERLAY);
        assert!(!can_be_obscured_by(&bottom, &overlay));
        let hidden = window(3, 11, Rect::new(0, 0, 100, 100)).with_flags(WindowFlags::NOT_VISIBLE);
        assert!(!can_be_obscured_by(&bottom, &hidden));
        let ghost = window(4, 11, Rect::new(0, 0, 100, 100)).with_alpha(0.0).with_flags(WindowFlags::NOT_TOUCHABLE);
        assert!(!can_be_obscured_by(&bottom, &ghost));
    }

    #[test]
    fn touch_needs_visible_touchable_window() {
        let point = PhysicalPosition::new(5.0, 5.0);
        let plain = window(1, 10, Rect::new(0, 0, 10, 10));
        assert!(accepts_touch_at(&plain, DisplayId::DEFAULT, point));
        assert!(!accepts_touch_at(&plain, DisplayId::from(1), point));
        let untouchable = plain.clone().with_flags(WindowFlags::NOT_TOUCHABLE);
        assert!(!accepts_touch_at(&untouchable, DisplayId::DEFAULT, point));
        let far = PhysicalPosition::new(50.0, 5.0);
        assert!(!accepts_touch_at(&plain, DisplayId::DEFAULT, far));
    }
}

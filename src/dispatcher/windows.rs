//! Window, focus, touch mode and pointer capture updates coming from the window manager.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::command::Command;
use crate::entry::{DropReason, EntryId, EntryKind, FocusEntry};
use crate::event::PolicyFlags;
use crate::focus::FocusChanges;
use crate::input_state::{CancelationMode, CancelationOptions};
use crate::target::{add_target, InputTargetFlags};
use crate::touch::PointerIdSet;
use crate::window::{ApplicationInfo, DisplayId, FocusRequest, InputToken, Pid, Uid, WindowFlags, WindowInfo, WindowInfosUpdate};

use super::state::DispatcherState;

impl DispatcherState {
    /// Replaces the windows of one display, top-most first.
    pub fn set_input_windows(&mut self, windows: Vec<WindowInfo>, display_id: DisplayId) {
        let mut handles: Vec<Arc<WindowInfo>> = Vec::with_capacity(windows.len());
        for window in windows {
            if window.display_id != display_id {
                error!("Window {} is on display {:?}, not {display_id:?}", window.name, window.display_id);
                continue;
            }
            if handles.iter().any(|handle| handle.token == window.token) {
                error!("Window {} appears twice in the list for display {display_id:?}", window.name);
                continue;
            }
            if !window.flags.contains(WindowFlags::NO_INPUT_CHANNEL) && !self.connections.contains_key(&window.token) {
                debug!("Window {} has no registered input channel", window.name);
            }
            handles.push(Arc::new(window));
        }
        if handles.is_empty() {
            self.windows.remove(&display_id);
        } else {
            self.windows.insert(display_id, handles);
        }

        let windows = self.windows.get(&display_id).map_or(&[][..], Vec::as_slice);
        let changes = self.focus.set_input_windows(display_id, windows);
        if let Some(changes) = changes {
            self.on_focus_changed(changes);
        }

        self.update_touch_state_windows(display_id);

        let present = |state: &Self, token: InputToken| state.window_by_token_on(token, display_id).is_some();
        if self.hover_windows.get(&display_id).is_some_and(|token| !present(self, *token)) {
            self.hover_windows.remove(&display_id);
        }
        let drag_gone = self
            .drag
            .as_ref()
            .is_some_and(|drag| drag.drag_window.display_id == display_id && !present(self, drag.drag_window.token));
        if drag_gone {
            info!("Drag window went away");
            self.post_command(Command::DropWindow { token: None, position: dpi::PhysicalPosition::new(0.0, 0.0) });
            self.drag = None;
        }
    }

    /// Cancels touches on windows that went away and refreshes the metadata of the rest.
    fn update_touch_state_windows(&mut self, display_id: DisplayId) {
        let Some(state) = self.touch_states.get(&display_id) else { return };
        let mut removed = Vec::new();
        let mut refreshed = Vec::new();
        for touched in &state.windows {
            match self.window_by_token_on(touched.token(), display_id) {
                Some(window) if !window.flags.contains(WindowFlags::NOT_TOUCHABLE) => refreshed.push(window.clone()),
                _ => {
                    debug!("Touched window was removed: {} in display {display_id:?}", touched.window.name);
                    removed.push(touched.clone());
                },
            }
        }
        let wallpaper = state.wallpaper_window().map(|window| window.token);

        let options = CancelationOptions::new(CancelationMode::PointerEvents, "touched window was removed")
            .with_display(display_id);
        for touched in &removed {
            self.synthesize_cancelation_events_for_connection(touched.token(), &options);
            // The touch is gone, so the wallpaper copy of it goes too.
            if touched.target_flags.contains(InputTargetFlags::FOREGROUND)
                && touched.window.flags.contains(WindowFlags::DUPLICATE_TOUCH_TO_WALLPAPER)
            {
                if let Some(wallpaper) = wallpaper {
                    self.synthesize_cancelation_events_for_connection(wallpaper, &options);
                }
            }
        }

        let Some(state) = self.touch_states.get_mut(&display_id) else { return };
        for touched in &removed {
            state.remove_window_by_token(touched.token());
        }
        for window in refreshed {
            if let Some(touched) = state.touched_window_mut(window.token) {
                touched.window = window;
            }
        }
        if state.windows.is_empty() {
            self.touch_states.remove(&display_id);
        }
    }

    pub fn on_window_infos_changed(&mut self, update: WindowInfosUpdate) {
        let mut by_display: HashMap<DisplayId, Vec<WindowInfo>> = HashMap::new();
        for window in update.windows {
            by_display.entry(window.display_id).or_default().push(window);
        }
        // Displays missing from the update have no windows any more.
        let previous: Vec<_> = self.windows.keys().copied().filter(|display| !by_display.contains_key(display)).collect();
        for display_id in previous {
            by_display.insert(display_id, Vec::new());
        }
        self.displays = update.displays.into_iter().map(|display| (display.display_id, display)).collect();
        for (display_id, windows) in by_display {
            self.set_input_windows(windows, display_id);
        }
    }

    fn enqueue_focus_event(&mut self, token: InputToken, has_focus: bool, reason: String) {
        // The pending event goes back to the queue so focus changes are seen first.
        if let Some(pending) = self.pending_event.take() {
            self.inbound.push_front(pending);
        }
        let id = self.new_entry(
            Instant::now(),
            PolicyFlags::PASS_TO_USER,
            None,
            EntryKind::Focus(FocusEntry { token, has_focus, reason }),
        );
        // Behind other focus entries, ahead of everything else.
        let arena = &self.arena;
        let position = self
            .inbound
            .iter()
            .rposition(|queued| arena.get(*queued).is_some_and(|entry| matches!(entry.kind, EntryKind::Focus(_))))
            .map_or(0, |index| index + 1);
        self.inbound.insert(position, id);
    }

    pub fn on_focus_changed(&mut self, changes: FocusChanges) {
        info!(
            "Focus changed on display {:?} from {:?} to {:?}: {}",
            changes.display_id, changes.old_focus, changes.new_focus, changes.reason
        );
        if let Some(old) = changes.old_focus {
            if self.connections.contains_key(&old) {
                let options = CancelationOptions::new(CancelationMode::NonPointerEvents, "focus left window");
                self.synthesize_cancelation_events_for_connection(old, &options);
                self.enqueue_focus_event(old, false, changes.reason.clone());
            }
        }
        if let Some(new) = changes.new_focus {
            self.enqueue_focus_event(new, true, changes.reason.clone());
        }

        // Capture belongs to the focused window.
        self.disable_pointer_capture_forced();

        if changes.display_id == self.focused_display {
            self.post_command(Command::FocusChanged { old_token: changes.old_focus, new_token: changes.new_focus });
        }
    }

    pub fn set_focused_window(&mut self, request: FocusRequest) {
        let windows = self.windows.get(&request.display_id).map_or(&[][..], Vec::as_slice);
        if let Some(changes) = self.focus.set_focused_window(request, windows) {
            self.on_focus_changed(changes);
        }
    }

    pub fn set_focused_application(&mut self, display_id: DisplayId, application: Option<ApplicationInfo>) {
        let old = self.focused_applications.get(&display_id);
        if old.map(|old| old.token) == application.as_ref().map(|new| new.token) {
            return;
        }
        let was_awaited = old.is_some_and(|old| {
            self.awaited_focused_application.as_ref().is_some_and(|awaited| awaited.token == old.token)
        });
        if was_awaited {
            self.reset_no_focused_window_timeout();
        }
        match application {
            Some(application) => {
                debug!("Focused application on display {display_id:?} is {}", application.name);
                self.focused_applications.insert(display_id, application);
            },
            None => {
                self.focused_applications.remove(&display_id);
            },
        }
    }

    pub fn set_focused_display(&mut self, display_id: DisplayId) {
        if self.focused_display == display_id {
            return;
        }
        let old_token = self.focus.focused_window_token(self.focused_display);
        if let Some(old) = old_token {
            let options = CancelationOptions::new(
                CancelationMode::NonPointerEvents,
                "the display which contains this window no longer has focus",
            );
            self.synthesize_cancelation_events_for_connection(old, &options);
        }
        self.focused_display = display_id;
        let new_token = self.focus.focused_window_token(display_id);
        self.post_command(Command::FocusChanged { old_token, new_token });
        if new_token.is_none() {
            warn!("Focused display {display_id:?} does not have a focused window.");
        }
    }

    fn window_owned_by(&self, token: InputToken, pid: Pid, uid: Uid) -> bool {
        self.window_by_token(token).is_some_and(|window| window.owner_pid == pid && window.owner_uid == uid)
    }

    /// Records the new touch mode of a display. Returns whether it changed.
    pub fn set_in_touch_mode(
        &mut self,
        in_touch_mode: bool,
        pid: Pid,
        uid: Uid,
        has_permission: bool,
        display_id: DisplayId,
    ) -> bool {
        if self.in_touch_mode(display_id) == in_touch_mode {
            return false;
        }
        if !has_permission {
            let owns_focus = self
                .focus
                .focused_window_token(self.focused_display)
                .is_some_and(|token| self.window_owned_by(token, pid, uid));
            let owns_recent = self.interactions.tokens().any(|token| self.window_owned_by(token, pid, uid));
            if !owns_focus && !owns_recent {
                info!(
                    "Touch mode switch rejected, caller (pid={}, uid={}) doesn't own the focused window nor any of \
                     the previously interacted windows",
                    pid.0, uid.0
                );
                return false;
            }
        }
        self.touch_mode.insert(display_id, in_touch_mode);
        let id = self.new_entry(
            Instant::now(),
            PolicyFlags::PASS_TO_USER,
            None,
            EntryKind::TouchMode { in_touch_mode, display_id },
        );
        self.enqueue_inbound(id);
        true
    }

    // Pointer capture

    fn set_pointer_capture_locked(&mut self, enable: bool) {
        let request = &mut self.pointer_capture.current_request;
        request.enable = enable;
        request.window = if enable { self.focus.focused_window_token(self.focused_display) } else { None };
        request.seq = request.seq.wrapping_add(1);
        let request = *request;
        debug!("Setting pointer capture to {enable} (seq {})", request.seq);
        self.post_command(Command::SetPointerCapture(request));
    }

    /// Takes capture away after a focus change, telling the window if it knew it had it.
    fn disable_pointer_capture_forced(&mut self) {
        if !self.pointer_capture.current_request.enable && self.pointer_capture.window.is_none() {
            return;
        }
        debug!("Disabling Pointer Capture because the window lost focus.");
        if self.pointer_capture.current_request.enable {
            self.set_pointer_capture_locked(false);
        }
        if self.pointer_capture.window.is_none() {
            return;
        }
        if let Some(pending) = self.pending_event.take() {
            self.inbound.push_front(pending);
        }
        let request = self.pointer_capture.current_request;
        let id = self.new_entry(Instant::now(), PolicyFlags::PASS_TO_USER, None, EntryKind::PointerCaptureChanged(request));
        self.inbound.push_front(id);
    }

    pub fn request_pointer_capture(&mut self, token: InputToken, enabled: bool) {
        let action = if enabled { "enable" } else { "disable" };
        if self.window_by_token(token).is_none() {
            warn!("Ignoring request to {action} Pointer Capture: window does not exist.");
            return;
        }
        if self.focus.focused_window_token(self.focused_display) != Some(token) {
            warn!("Ignoring request to {action} Pointer Capture: window does not have focus.");
            return;
        }
        if self.pointer_capture.current_request.enable == enabled {
            warn!("Ignoring request to {action} Pointer Capture: it is already {action}d.");
            return;
        }
        if enabled && self.ineligible_pointer_capture_displays.contains(&self.focused_display) {
            warn!("Ignoring request to enable Pointer Capture: display is not eligible");
            return;
        }
        self.set_pointer_capture_locked(enabled);
    }

    pub fn set_display_eligibility_for_pointer_capture(&mut self, display_id: DisplayId, eligible: bool) {
        if eligible {
            self.ineligible_pointer_capture_displays.remove(&display_id);
        } else {
            self.ineligible_pointer_capture_displays.insert(display_id);
        }
    }

    /// Delivers a confirmed capture change to the window that gains or loses capture.
    pub fn dispatch_pointer_capture_changed(&mut self, now: Instant, id: EntryId, drop_reason: &mut Option<DropReason>) {
        *drop_reason = None;
        let Some(entry) = self.arena.get_mut(id) else { return };
        entry.dispatch_in_progress = true;
        let EntryKind::PointerCaptureChanged(request) = entry.kind else { return };
        let current = self.pointer_capture.current_request;

        let token = if request.enable {
            if self.pointer_capture.window.is_some() && request == current {
                debug!("Skipping dispatch of Pointer Capture being enabled: no state change.");
                return;
            }
            if !current.enable {
                // A window asked for capture and released it again before the confirmation.
                warn!("No window requested Pointer Capture.");
                *drop_reason = Some(DropReason::NoPointerCapture);
                return;
            }
            if request.seq != current.seq {
                info!("Skipping dispatch of Pointer Capture being enabled: sequence number mismatch.");
                return;
            }
            let token = self.focus.focused_window_token(self.focused_display);
            self.pointer_capture.window = token;
            token
        } else {
            // Disabling needs no sequence check.
            let Some(token) = self.pointer_capture.window.take() else { return };
            if current.enable {
                self.set_pointer_capture_locked(false);
            }
            Some(token)
        };

        let Some(token) = token.filter(|token| self.connections.contains_key(token)) else {
            // The window is gone; nothing to tell.
            *drop_reason = Some(DropReason::NoPointerCapture);
            return;
        };
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

    /// Forgets everything about a display that went away.
    pub fn display_removed(&mut self, display_id: DisplayId) {
        let had_activity = self.display_has_activity(display_id);
        self.set_input_windows(Vec::new(), display_id);
        self.set_focused_application(display_id, None);
        self.focus.display_removed(display_id);
        self.ineligible_pointer_capture_displays.remove(&display_id);
        self.touch_mode.remove(&display_id);
        self.displays.remove(&display_id);
        self.hover_windows.remove(&display_id);
        if had_activity {
            warn!("Display {display_id:?} was removed while it still had input in flight");
            self.reset_and_drop_everything("display removed");
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::DispatcherConfiguration;
    use crate::hmac::HmacKeyManager;
    use crate::window::Rect;

    use super::*;

    fn state() -> DispatcherState {
        DispatcherState::new(DispatcherConfiguration::default(), HmacKeyManager::new().unwrap())
    }

    fn window(token: u64, display: i32) -> WindowInfo {
        WindowInfo::new(InputToken::from(token), "w", DisplayId::from(display), Rect::new(0, 0, 100, 100))
    }

    #[test]
    fn windows_on_other_displays_are_rejected() {
        let mut state = state();
        state.set_input_windows(vec![window(1, 0), window(2, 1)], DisplayId::DEFAULT);
        assert_eq!(state.window_handles(DisplayId::DEFAULT).len(), 1);
        assert!(state.window_by_token(InputToken::from(2)).is_none());
    }

    #[test]
    fn focus_entries_stay_in_order_ahead_of_other_entries() {
        let mut state = state();
        let configuration = state.new_entry(Instant::now(), PolicyFlags::PASS_TO_USER, None, EntryKind::ConfigurationChanged);
        state.enqueue_inbound(configuration);
        state.enqueue_focus_event(InputToken::from(1), false, String::new());
        state.enqueue_focus_event(InputToken::from(2), true, String::new());

        let tokens: Vec<_> = state
            .inbound
            .iter()
            .map(|id| match &state.arena.get(*id).unwrap().kind {
                EntryKind::Focus(focus) => Some(focus.token),
                _ => None,
            })
            .collect();
        assert_eq!(tokens, [Some(InputToken::from(1)), Some(InputToken::from(2)), None]);
    }

    #[test]
    fn touch_mode_change_without_permission_needs_ownership() {
        let mut state = state();
        assert!(!state.set_in_touch_mode(false, Pid(5), Uid(5), false, DisplayId::DEFAULT));
        assert!(state.set_in_touch_mode(false, Pid(5), Uid(5), true, DisplayId::DEFAULT));
        assert!(!state.in_touch_mode(DisplayId::DEFAULT));
        // Same value again is not a change.
        assert!(!state.set_in_touch_mode(false, Pid(5), Uid(5), true, DisplayId::DEFAULT));
    }

    #[test]
    fn ineligible_display_refuses_capture() {
        let mut state = state();
        state.set_input_windows(vec![window(1, 0)], DisplayId::DEFAULT);
        state.set_focused_window(FocusRequest::new(InputToken::from(1), DisplayId::DEFAULT));
        state.set_display_eligibility_for_pointer_capture(DisplayId::DEFAULT, false);
        state.request_pointer_capture(InputToken::from(1), true);
        assert!(!state.pointer_capture.current_request.enable);

        state.set_display_eligibility_for_pointer_capture(DisplayId::DEFAULT, true);
        state.request_pointer_capture(InputToken::from(1), true);
        assert!(state.pointer_capture.current_request.enable);
        assert_eq!(state.pointer_capture.current_request.window, Some(InputToken::from(1)));
    }
}

//! Cutting streams short: cancellation, synthesized downs, touch transfer and resets.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::connection::ConnectionStatus;
use crate::entry::{EntryKind, InterceptState, KeyEntry};
use crate::error::DispatchError;
use crate::input_state::{CancelationMode, CancelationOptions, SynthesizedEvent};
use crate::target::{InputTarget, InputTargetFlags};
use crate::touch::{PointerIdSet, TouchedWindow};
use crate::window::{DisplayId, InputToken, WindowFlags, WindowInfo};

use super::state::{DispatcherState, DragState};

impl DispatcherState {
    fn enqueue_synthesized(&mut self, now: Instant, token: InputToken, events: Vec<SynthesizedEvent>, flags: InputTargetFlags) {
        for event in events {
            let (kind, policy_flags, pointer_ids) = match event {
                SynthesizedEvent::Key(event, policy_flags) => {
                    let key = KeyEntry {
                        event,
                        synthetic_repeat: false,
                        intercept: InterceptState::Continue,
                        intercept_wakeup_time: None,
                    };
                    (EntryKind::Key(key), policy_flags, PointerIdSet::default())
                },
                SynthesizedEvent::Motion(event, policy_flags) => {
                    let pointer_ids: PointerIdSet = event.pointer_ids().collect();
                    (EntryKind::Motion(event), policy_flags, pointer_ids)
                },
            };
            let id = self.new_entry(now, policy_flags, None, kind);
            let target = InputTarget { token, flags, pointer_ids, first_down_time: None };
            self.enqueue_dispatch_entries(now, id, &target);
            self.release_entry(id);
        }
    }

    pub fn synthesize_cancelation_events_for_connection(&mut self, token: InputToken, options: &CancelationOptions) {
        let Some(connection) = self.connections.get(&token) else { return };
        if connection.status == ConnectionStatus::Broken {
            return;
        }
        let now = Instant::now();
        let events = connection.input_state.synthesize_cancelation_events(now, options);
        if events.is_empty() {
            return;
        }
        debug!(
            "channel '{}' ~ Synthesized {} cancelation events to bring channel back in sync with reality: {}, mode={:?}",
            connection.name(),
            events.len(),
            options.reason,
            options.mode
        );
        self.enqueue_synthesized(now, token, events, InputTargetFlags::DISPATCH_AS_IS);
    }

    pub fn synthesize_cancelation_events_for_all_connections(&mut self, options: &CancelationOptions) {
        let tokens: Vec<_> = self.connections.keys().copied().collect();
        for token in tokens {
            self.synthesize_cancelation_events_for_connection(token, options);
        }
    }

    /// Replays the pointers a connection believes are down, for a window taking over a touch.
    fn synthesize_pointer_down_events_for_connection(&mut self, token: InputToken, target_flags: InputTargetFlags) {
        let Some(connection) = self.connections.get(&token) else { return };
        if connection.status == ConnectionStatus::Broken {
            return;
        }
        let now = Instant::now();
        let events = connection.input_state.synthesize_pointer_down_events(now);
        if events.is_empty() {
            return;
        }
        debug!("channel '{}' ~ Synthesized {} down events to ensure consistent event stream", connection.name(), events.len());
        let flags = (target_flags & !InputTargetFlags::DISPATCH_MASK) | InputTargetFlags::DISPATCH_AS_IS;
        self.enqueue_synthesized(now, token, events, flags);
    }

    /// Gives `to` the input state `from` has for pointers.
    fn merge_pointer_state(&mut self, from: InputToken, to: InputToken) {
        let Some(mut target) = self.connections.remove(&to) else { return };
        if let Some(source) = self.connections.get(&from) {
            source.input_state.merge_pointer_state_to(&mut target.input_state);
        }
        self.connections.insert(to, target);
    }

    /// Moves the gesture owned by `from` to `to`. Fails when `from` has no touch or `to` is
    /// not on the same display.
    pub fn transfer_touch_focus(&mut self, from: InputToken, to: InputToken, is_drag_drop: bool) -> bool {
        if from == to {
            debug!("Trivial transfer to same window");
            return true;
        }
        let Some((display_id, touched)) = self.touch_states.iter().find_map(|(display_id, state)| {
            state.touched_window(from).map(|touched| (*display_id, touched.clone()))
        }) else {
            debug!("Focus transfer failed because from window {from:?} did not have focus");
            return false;
        };
        let Some(to_window) = self.window_by_token_on(to, display_id).cloned() else {
            debug!("Focus transfer failed because to window {to:?} is not on display {display_id:?}");
            return false;
        };
        if is_drag_drop && touched.pointer_ids.len() != 1 {
            warn!("Drag and drop needs exactly one pointer, the touch has {}", touched.pointer_ids.len());
            return false;
        }
        debug!("transferTouchFocus: fromWindowHandle={} toWindowHandle={}", touched.window.name, to_window.name);

        let old_flags = touched.target_flags;
        let mut new_flags =
            old_flags & (InputTargetFlags::FOREGROUND | InputTargetFlags::SPLIT | InputTargetFlags::DISPATCH_AS_IS);
        if !to_window.is_spy() {
            new_flags |= InputTargetFlags::FOREGROUND;
        }
        let new_wallpaper = if new_flags.contains(InputTargetFlags::FOREGROUND)
            && to_window.flags.contains(WindowFlags::DUPLICATE_TOUCH_TO_WALLPAPER)
        {
            self.find_wallpaper_window_below(&to_window)
        } else {
            None
        };

        let Some(state) = self.touch_states.get_mut(&display_id) else { return false };
        state.remove_window_by_token(from);
        state.add_or_update_window(&to_window, new_flags, touched.pointer_ids, touched.first_down_time);
        let old_wallpaper = if old_flags.contains(InputTargetFlags::FOREGROUND)
            && touched.window.flags.contains(WindowFlags::DUPLICATE_TOUCH_TO_WALLPAPER)
        {
            state.wallpaper_window().cloned()
        } else {
            None
        };

        if is_drag_drop {
            if let Some(pointer_id) = touched.pointer_ids.iter().next() {
                self.drag = Some(DragState { drag_window: to_window.clone(), pointer_id, hover_window: None });
            }
        }

        if self.connections.contains_key(&from) && self.connections.contains_key(&to) {
            self.merge_pointer_state(from, to);
            let options = CancelationOptions::new(
                CancelationMode::PointerEvents,
                "transferring touch focus from this window to another window",
            );
            self.synthesize_cancelation_events_for_connection(from, &options);
            self.synthesize_pointer_down_events_for_connection(to, new_flags);
            self.transfer_wallpaper_touch(display_id, old_flags, to, old_wallpaper, new_wallpaper, &touched);
        }
        true
    }

    fn transfer_wallpaper_touch(
        &mut self,
        display_id: DisplayId,
        old_flags: InputTargetFlags,
        to: InputToken,
        old_wallpaper: Option<Arc<WindowInfo>>,
        new_wallpaper: Option<Arc<WindowInfo>>,
        touched: &TouchedWindow,
    ) {
        if old_wallpaper.as_ref().map(|window| window.token) == new_wallpaper.as_ref().map(|window| window.token) {
            return;
        }
        if let Some(wallpaper) = old_wallpaper {
            if let Some(state) = self.touch_states.get_mut(&display_id) {
                state.remove_window_by_token(wallpaper.token);
            }
            let options =
                CancelationOptions::new(CancelationMode::PointerEvents, "transferring touch focus to another window");
            self.synthesize_cancelation_events_for_connection(wallpaper.token, &options);
        }
        if let Some(wallpaper) = new_wallpaper {
            let flags = (old_flags & (InputTargetFlags::SPLIT | InputTargetFlags::DISPATCH_AS_IS))
                | InputTargetFlags::WINDOW_IS_OBSCURED
                | InputTargetFlags::WINDOW_IS_PARTIALLY_OBSCURED;
            if let Some(state) = self.touch_states.get_mut(&display_id) {
                state.add_or_update_window(&wallpaper, flags, touched.pointer_ids, touched.first_down_time);
            }
            if self.connections.contains_key(&wallpaper.token) {
                self.merge_pointer_state(to, wallpaper.token);
                self.synthesize_pointer_down_events_for_connection(wallpaper.token, flags);
            }
        }
    }

    /// Transfers the touch of the single foreground window on the display to `destination`.
    pub fn transfer_touch(&mut self, destination: InputToken, display_id: DisplayId) -> bool {
        let Some(state) = self.touch_states.get(&display_id) else {
            debug!("No touch state on display {display_id:?}");
            return false;
        };
        let mut foreground = state
            .windows
            .iter()
            .filter(|touched| touched.target_flags.contains(InputTargetFlags::FOREGROUND));
        let from = match (foreground.next(), foreground.next()) {
            (Some(touched), None) => touched.token(),
            (Some(_), Some(_)) => {
                info!("Two or more foreground windows are touched on display {display_id:?}, not transferring");
                return false;
            },
            _ => {
                debug!("Could not find a touched foreground window on display {display_id:?}");
                return false;
            },
        };
        self.transfer_touch_focus(from, destination, false)
    }

    /// Gives the rest of the gesture to the spy window `token` alone.
    pub fn pilfer_pointers(&mut self, token: InputToken) -> Result<(), DispatchError> {
        if !self.connections.contains_key(&token) {
            warn!("Attempted to pilfer pointers from an un-registered channel or invalid token");
            return Err(DispatchError::UnknownToken(token));
        }
        let Some((display_id, touched)) = self.touch_states.iter().find_map(|(display_id, state)| {
            state.touched_window(token).map(|touched| (*display_id, touched.clone()))
        }) else {
            warn!("Attempted to pilfer points from a channel without any on-going pointer streams. Ignoring.");
            return Err(DispatchError::NoActiveGesture(token));
        };
        if !touched.window.is_spy() {
            warn!("Attempted to pilfer pointers from a non-spy window {}", touched.window.name);
            return Err(DispatchError::NotASpy(token));
        }

        let (others, device_id) = match self.touch_states.get(&display_id) {
            Some(state) => (
                state.windows.iter().map(|touched| touched.token()).filter(|other| *other != token).collect::<Vec<_>>(),
                state.device_id,
            ),
            None => return Err(DispatchError::NoActiveGesture(token)),
        };
        let mut options = CancelationOptions::new(CancelationMode::PointerEvents, "input channel stole pointer stream")
            .with_display(display_id);
        if let Some(device_id) = device_id {
            options = options.with_device(device_id);
        }
        for other in &others {
            self.synthesize_cancelation_events_for_connection(*other, &options);
        }
        debug!("Pilfering pointers for {}, canceled {} windows", touched.window.name, others.len());

        if let Some(state) = self.touch_states.get_mut(&display_id) {
            if let Some(window) = state.touched_window_mut(token) {
                window.is_pilfering = true;
            }
            state.filter_windows_except(token);
            state.prevent_new_targets = true;
        }
        Ok(())
    }

    /// Cancels everything delivered so far and forgets all queued and gesture state.
    pub fn reset_and_drop_everything(&mut self, reason: &'static str) {
        debug!("Resetting and dropping all events ({reason})");
        let options = CancelationOptions::new(CancelationMode::AllEvents, reason);
        self.synthesize_cancelation_events_for_all_connections(&options);

        self.reset_key_repeat();
        self.release_pending_event();
        self.drain_inbound_queue();
        self.reset_no_focused_window_timeout();

        self.anr_tracker.clear();
        self.touch_states.clear();
        self.hover_windows.clear();
        self.drag = None;
    }

    pub fn cancel_current_touch(&mut self) {
        debug!("Canceling all ongoing pointer gestures on all displays.");
        let options = CancelationOptions::new(CancelationMode::PointerEvents, "cancel current touch");
        self.synthesize_cancelation_events_for_all_connections(&options);
        self.touch_states.clear();
        self.hover_windows.clear();
    }
}

//! The dispatch cycle of a connection: outbound queue, publish, wait queue, acknowledgement.

use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::channel::InputMessage;
use crate::command::Command;
use crate::connection::{Connection, ConnectionStatus, DispatchEntry, ResolvedEvent, Responsiveness};
use crate::entry::{EntryId, EntryKind, InterceptState, KeyEntry};
use crate::error::ChannelError;
use crate::event::{
    KeyAction, KeyCode, KeyEvent, KeyFlags, MotionAction, MotionEvent, MotionFlags, PointerCoords, PolicyFlags,
    INVALID_HMAC,
};
use crate::input_state::{CancelationMode, CancelationOptions};
use crate::policy::UserActivityType;
use crate::target::{InputTarget, InputTargetFlags};
use crate::touch::PointerIdSet;
use crate::verify::VerifiedInputEvent;
use crate::window::{ApplicationInfo, InputToken, Pid, WindowFlags};

use super::state::{DispatcherState, SLOW_EVENT_PROCESSING_WARNING_TIMEOUT};

/// A key acknowledged as unhandled, waiting for the policy to pick a fallback.
#[derive(Debug, Clone)]
pub(crate) struct UnhandledKey {
    pub token: InputToken,
    pub seq: u32,
    pub event: KeyEvent,
    pub policy_flags: PolicyFlags,
    fallback_key_code: Option<KeyCode>,
    initial_down: bool,
}

/// Builds the part of `motion` that concerns `pointer_ids`. Returns `None` when some of the
/// pointers are missing from the event.
pub(crate) fn split_motion_event(
    motion: &MotionEvent,
    pointer_ids: PointerIdSet,
    first_down_time: Option<Instant>,
) -> Option<MotionEvent> {
    let pointers: Vec<_> = motion.pointers.iter().filter(|pointer| pointer_ids.contains(pointer.id)).cloned().collect();
    if pointers.len() != pointer_ids.len() {
        // Happens when the device sends a broken sequence of pointer ids.
        warn!(
            "Dropping split motion event because the pointer count is {} but we expected there to be {} pointers",
            pointers.len(),
            pointer_ids.len()
        );
        return None;
    }

    let action = match motion.action {
        MotionAction::PointerDown(index) | MotionAction::PointerUp(index) => {
            let changed = motion.pointers.get(index)?.id;
            let is_down = matches!(motion.action, MotionAction::PointerDown(_));
            if !pointer_ids.contains(changed) {
                // Some other window's pointer changed.
                MotionAction::Move
            } else if pointers.len() == 1 {
                if is_down {
                    MotionAction::Down
                } else if motion.flags.contains(MotionFlags::CANCELED) {
                    MotionAction::Cancel
                } else {
                    MotionAction::Up
                }
            } else {
                let split_index = pointers.iter().position(|pointer| pointer.id == changed)?;
                if is_down {
                    MotionAction::PointerDown(split_index)
                } else {
                    MotionAction::PointerUp(split_index)
                }
            }
        },
        action => action,
    };

    let mut split = motion.clone();
    split.action = action;
    split.pointers = pointers;
    split.down_time = first_down_time.unwrap_or(motion.down_time);
    split.hmac = INVALID_HMAC;
    Some(split)
}

impl DispatcherState {
    fn connection_pid(&self, token: InputToken) -> Option<Pid> {
        let connection = self.connections.get(&token)?;
        match connection.monitor {
            Some(monitor) => Some(monitor.pid),
            None => self.window_by_token(token).map(|window| window.owner_pid),
        }
    }

    fn poke_user_activity(&mut self, id: EntryId) {
        let Some(entry) = self.arena.get(id) else { return };
        let Some(display_id) = entry.display_id() else { return };
        let activity = match &entry.kind {
            EntryKind::Key(key) => {
                if key.event.flags.contains(KeyFlags::CANCELED) {
                    return;
                }
                UserActivityType::Button
            },
            EntryKind::Motion(motion) => {
                if motion.action == MotionAction::Cancel {
                    return;
                }
                if motion.source.is_pointer() && !motion.action.is_hover() && motion.action != MotionAction::Scroll {
                    UserActivityType::Touch
                } else {
                    UserActivityType::Other
                }
            },
            _ => return,
        };
        let event_time = entry.event_time;
        let display_id = self.target_display(display_id);
        if self.focused_window(display_id).is_some_and(|window| window.flags.contains(WindowFlags::DISABLE_USER_ACTIVITY)) {
            return;
        }
        self.post_command(Command::PokeUserActivity { event_time, activity, display_id });
    }

    /// Delivers an entry to resolved targets.
    pub fn dispatch_event(&mut self, now: Instant, id: EntryId, targets: &[InputTarget]) {
        self.poke_user_activity(id);

        let is_interaction = self.arena.get(id).is_some_and(|entry| match &entry.kind {
            EntryKind::Key(_) => true,
            EntryKind::Motion(motion) => motion.action == MotionAction::Down,
            _ => false,
        });
        if is_interaction {
            let connections = &self.connections;
            let tokens = targets
                .iter()
                .filter(|target| target.flags.contains(InputTargetFlags::FOREGROUND))
                .map(|target| target.token)
                .filter(|token| connections.get(token).is_some_and(|connection| connection.monitor.is_none()));
            self.interactions.update(tokens.collect::<Vec<_>>());
        }

        for target in targets {
            if self.connections.contains_key(&target.token) {
                self.prepare_dispatch_cycle(now, id, target);
            } else {
                debug!("Dropping event delivery to target {:?} because it is no longer registered", target.token);
            }
        }
    }

    fn prepare_dispatch_cycle(&mut self, now: Instant, id: EntryId, target: &InputTarget) {
        let Some(connection) = self.connections.get(&target.token) else { return };
        if connection.status != ConnectionStatus::Normal {
            debug!("channel '{}' ~ Dropping event because the channel status is {}", connection.name(), connection.status);
            return;
        }

        if target.flags.contains(InputTargetFlags::SPLIT) {
            let split = self.arena.get(id).and_then(|entry| {
                let motion = entry.motion()?;
                (target.pointer_ids.len() != motion.pointers.len())
                    .then(|| (entry.event_time, entry.policy_flags, entry.injection, motion.clone()))
            });
            if let Some((event_time, policy_flags, injection, motion)) = split {
                let Some(split) = split_motion_event(&motion, target.pointer_ids, target.first_down_time) else {
                    return;
                };
                let split_id = self.new_entry(event_time, policy_flags, injection, EntryKind::Motion(split));
                self.enqueue_dispatch_entries(now, split_id, target);
                self.release_entry(split_id);
                return;
            }
        }
        self.enqueue_dispatch_entries(now, id, target);
    }

    pub fn enqueue_dispatch_entries(&mut self, now: Instant, id: EntryId, target: &InputTarget) {
        let was_empty = self.connections.get(&target.token).is_some_and(|connection| connection.outbound.is_empty());
        for mode in InputTargetFlags::DISPATCH_MODES {
            self.enqueue_dispatch_entry(id, target, mode);
        }
        let has_outbound = self.connections.get(&target.token).is_some_and(|connection| !connection.outbound.is_empty());
        // A busy connection picks the new entries up when its current cycle finishes.
        if was_empty && has_outbound {
            self.start_dispatch_cycle(now, target.token);
        }
    }

    fn enqueue_dispatch_entry(&mut self, id: EntryId, target: &InputTarget, mode: InputTargetFlags) {
        if !target.flags.contains(mode) {
            return;
        }
        let target_flags = (target.flags & !InputTargetFlags::DISPATCH_MASK) | mode;
        let Some(entry) = self.arena.get(id) else { return };
        let Some(connection) = self.connections.get_mut(&target.token) else { return };
        let policy_flags = entry.policy_flags;
        let injection = entry.injection;

        let resolved = match &entry.kind {
            EntryKind::Key(key) => {
                let action = key.event.action;
                let flags = key.event.flags;
                connection.input_state.track_key(&key.event, action, flags, policy_flags);
                ResolvedEvent::Key { action, flags }
            },
            EntryKind::Motion(motion) => {
                let mut action = match mode {
                    InputTargetFlags::DISPATCH_AS_OUTSIDE => MotionAction::Outside,
                    InputTargetFlags::DISPATCH_AS_HOVER_EXIT => MotionAction::HoverExit,
                    InputTargetFlags::DISPATCH_AS_HOVER_ENTER => MotionAction::HoverEnter,
                    InputTargetFlags::DISPATCH_AS_SLIPPERY_EXIT => MotionAction::Cancel,
                    InputTargetFlags::DISPATCH_AS_SLIPPERY_ENTER => MotionAction::Down,
                    _ => motion.action,
                };
                if action == MotionAction::HoverMove
                    && !connection.input_state.is_hovering(motion.device_id, motion.source, motion.display_id)
                {
                    debug!("channel '{}' ~ filling in missing hover enter event", connection.name());
                    action = MotionAction::HoverEnter;
                }
                let mut flags = motion.flags;
                if action == MotionAction::Cancel {
                    flags |= MotionFlags::CANCELED;
                }
                if target_flags.contains(InputTargetFlags::WINDOW_IS_OBSCURED) {
                    flags |= MotionFlags::WINDOW_IS_OBSCURED;
                }
                if target_flags.contains(InputTargetFlags::WINDOW_IS_PARTIALLY_OBSCURED) {
                    flags |= MotionFlags::WINDOW_IS_PARTIALLY_OBSCURED;
                }
                // The window joins the gesture late, so its part starts now.
                let down_time =
                    if mode == InputTargetFlags::DISPATCH_AS_SLIPPERY_ENTER { motion.event_time } else { motion.down_time };

                let tracked = if down_time == motion.down_time {
                    connection.input_state.track_motion(motion, action, flags, policy_flags)
                } else {
                    let mut event = motion.clone();
                    event.down_time = down_time;
                    connection.input_state.track_motion(&event, action, flags, policy_flags)
                };
                if !tracked {
                    debug!("channel '{}' ~ skipping inconsistent motion event {action:?}", connection.name());
                    return;
                }
                ResolvedEvent::Motion { action, flags, down_time }
            },
            _ => ResolvedEvent::Plain,
        };

        let seq = connection.next_seq();
        connection.outbound.push_back(DispatchEntry {
            seq,
            entry: id,
            target_flags,
            resolved,
            delivery_time: None,
            timeout_time: None,
        });
        self.acquire_entry(id);
        if target_flags.contains(InputTargetFlags::FOREGROUND) {
            if let Some(injection) = injection {
                self.injections.increment_pending(injection);
            }
        }
    }

    fn build_message(&self, dispatch: &DispatchEntry) -> Option<InputMessage> {
        let entry = self.arena.get(dispatch.entry)?;
        let seq = dispatch.seq;
        let message = match (&entry.kind, dispatch.resolved) {
            (EntryKind::Key(key), ResolvedEvent::Key { action, flags }) => {
                let mut event = key.event.clone();
                event.action = action;
                event.flags = flags;
                event.hmac = self.hmac.sign(&VerifiedInputEvent::Key((&event).into()));
                InputMessage::Key { seq, event }
            },
            (EntryKind::Motion(motion), ResolvedEvent::Motion { action, flags, down_time }) => {
                let mut event = motion.clone();
                event.action = action;
                event.flags = flags;
                event.down_time = down_time;
                if dispatch.target_flags.contains(InputTargetFlags::ZERO_COORDS) {
                    for pointer in &mut event.pointers {
                        pointer.coords = PointerCoords::new(0.0, 0.0);
                    }
                }
                event.hmac = self.hmac.sign(&VerifiedInputEvent::Motion((&event).into()));
                InputMessage::Motion { seq, event }
            },
            (EntryKind::Focus(focus), _) => InputMessage::Focus { seq, has_focus: focus.has_focus },
            (EntryKind::PointerCaptureChanged(request), _) => InputMessage::Capture { seq, enabled: request.enable },
            (EntryKind::Drag(drag), _) => InputMessage::Drag { seq, position: drag.position, is_exiting: drag.is_exiting },
            (EntryKind::TouchMode { in_touch_mode, .. }, _) => InputMessage::TouchMode { seq, in_touch_mode: *in_touch_mode },
            _ => return None,
        };
        Some(message)
    }

    /// Publishes outbound entries until the queue is empty or the channel is full.
    pub fn start_dispatch_cycle(&mut self, now: Instant, token: InputToken) {
        let timeout = self.dispatching_timeout(token);
        loop {
            let Some(connection) = self.connections.get(&token) else { return };
            if connection.status != ConnectionStatus::Normal {
                return;
            }
            let Some(dispatch) = connection.outbound.front() else { return };
            let Some(message) = self.build_message(dispatch) else {
                error!("channel '{}' ~ Bad event type in outbound queue", connection.name());
                if let Some(dispatch) = self.connections.get_mut(&token).and_then(|c| c.outbound.pop_front()) {
                    self.release_dispatch_entry(dispatch);
                }
                continue;
            };

            match connection.channel.publish(message) {
                Ok(()) => {},
                Err(ChannelError::WouldBlock) => {
                    if connection.wait.is_empty() {
                        error!(
                            "channel '{}' ~ Could not publish event because the channel is full. This is unexpected \
                             because the wait queue is empty",
                            connection.name()
                        );
                        self.abort_broken_dispatch_cycle(token, true);
                    } else {
                        debug!(
                            "channel '{}' ~ Could not publish event because the channel is full, waiting for the \
                             application to catch up",
                            connection.name()
                        );
                        if let Some(connection) = self.connections.get_mut(&token) {
                            connection.publisher_blocked = true;
                        }
                    }
                    return;
                },
                Err(ChannelError::Closed) => {
                    error!("channel '{}' ~ Could not publish event because the consumer is gone", connection.name());
                    self.abort_broken_dispatch_cycle(token, true);
                    return;
                },
            }

            let Some(connection) = self.connections.get_mut(&token) else { return };
            let Some(mut dispatch) = connection.outbound.pop_front() else { return };
            let timeout_time = now + timeout;
            dispatch.delivery_time = Some(now);
            dispatch.timeout_time = Some(timeout_time);
            if connection.is_responsive() {
                self.anr_tracker.insert(timeout_time, token);
            }
            connection.wait.push_back(dispatch);
        }
    }

    fn release_dispatch_entry(&mut self, dispatch: DispatchEntry) {
        if dispatch.has_foreground_target() {
            if let Some(injection) = self.arena.get(dispatch.entry).and_then(|entry| entry.injection) {
                self.injections.decrement_pending(injection);
            }
        }
        self.release_entry(dispatch.entry);
    }

    fn drain_dispatch_queues(&mut self, connection: &mut Connection) {
        let drained: Vec<_> = connection.outbound.drain(..).chain(connection.wait.drain(..)).collect();
        for dispatch in drained {
            self.release_dispatch_entry(dispatch);
        }
    }

    /// Stops delivering to a connection whose channel failed.
    pub fn abort_broken_dispatch_cycle(&mut self, token: InputToken, notify: bool) {
        let Some(mut connection) = self.connections.remove(&token) else { return };
        debug!("channel '{}' ~ abortBrokenDispatchCycle - notify={notify}", connection.name());
        self.drain_dispatch_queues(&mut connection);
        self.anr_tracker.erase_token(token);
        // Broken and zombie connections stay as they are.
        if connection.status == ConnectionStatus::Normal {
            connection.status = ConnectionStatus::Broken;
            if notify {
                error!("channel '{}' ~ Channel is unrecoverably broken and will be disposed!", connection.name());
                self.post_command(Command::InputChannelBroken(token));
            }
        }
        self.connections.insert(token, connection);
    }

    /// Publishes the cancelations still waiting in the outbound queue of a connection that is
    /// being removed, even when its channel is full. The other queued entries are never sent.
    pub fn flush_cancelations(&mut self, token: InputToken) {
        let Some(connection) = self.connections.get(&token) else { return };
        if connection.status != ConnectionStatus::Normal {
            return;
        }
        let messages: Vec<_> = connection
            .outbound
            .iter()
            .filter(|dispatch| dispatch.is_cancelation())
            .filter_map(|dispatch| self.build_message(dispatch))
            .collect();
        if messages.is_empty() {
            return;
        }
        debug!("channel '{}' ~ Flushing {} cancelations before removal", connection.name(), messages.len());
        for message in messages {
            if connection.channel.publish_past_capacity(message).is_err() {
                break;
            }
        }
    }

    /// Unregisters a connection and releases everything it still holds.
    pub fn remove_connection(&mut self, token: InputToken, notify: bool) -> bool {
        if !self.connections.contains_key(&token) {
            return false;
        }
        self.abort_broken_dispatch_cycle(token, notify);
        let Some(mut connection) = self.connections.remove(&token) else { return false };
        connection.status = ConnectionStatus::Zombie;
        if connection.monitor.is_some() {
            for monitors in self.global_monitors.values_mut() {
                monitors.retain(|monitor| *monitor != token);
            }
            self.global_monitors.retain(|_, monitors| !monitors.is_empty());
        }
        for state in self.touch_states.values_mut() {
            state.remove_window_by_token(token);
        }
        self.touch_states.retain(|_, state| !state.windows.is_empty());
        self.hover_windows.retain(|_, hovered| *hovered != token);
        self.interactions.remove(token);
        self.latency.remove(token);
        debug!("channel '{}' ~ removed", connection.name());
        true
    }

    /// Reads acknowledgements from every channel into commands, and tears down channels whose
    /// consumer went away.
    pub fn receive_finished_signals(&mut self) {
        let mut closed = Vec::new();
        for (token, connection) in &mut self.connections {
            if connection.status == ConnectionStatus::Zombie {
                continue;
            }
            loop {
                match connection.channel.receive_finished_signal() {
                    Ok(Some(signal)) => {
                        connection.publisher_blocked = false;
                        self.commands.push_back(Command::DispatchCycleFinished {
                            token: *token,
                            seq: signal.seq,
                            handled: signal.handled,
                            finish_time: signal.finish_time,
                        });
                    },
                    Ok(None) => break,
                    Err(_) => {
                        closed.push((*token, connection.monitor.is_none()));
                        break;
                    },
                }
            }
        }
        for (token, notify) in closed {
            if notify {
                warn!("channel {token:?} ~ Consumer closed input channel or an error occurred");
            }
            self.remove_connection(token, notify);
        }
    }

    /// First half of an acknowledgement. Returns the key to offer to the policy when it went
    /// unhandled.
    pub fn begin_cycle_finished(
        &mut self,
        token: InputToken,
        seq: u32,
        handled: bool,
        finish_time: Instant,
    ) -> Option<UnhandledKey> {
        let connection = self.connections.get(&token)?;
        if connection.status != ConnectionStatus::Normal {
            return None;
        }
        let dispatch = connection.wait.get(connection.find_wait_entry(seq)?)?.clone();
        let entry = self.arena.get(dispatch.entry)?;

        if let Some(delivery_time) = dispatch.delivery_time {
            let duration = finish_time.saturating_duration_since(delivery_time);
            if duration > SLOW_EVENT_PROCESSING_WARNING_TIMEOUT {
                info!("{} spent {duration:?} processing {entry}", connection.name());
            }
            self.latency.record(token, duration);
        }

        let (EntryKind::Key(key), ResolvedEvent::Key { action, flags }) = (&entry.kind, dispatch.resolved) else {
            return None;
        };
        if flags.contains(KeyFlags::FALLBACK) {
            return None;
        }
        let policy_flags = entry.policy_flags;
        let mut event = key.event.clone();
        event.action = action;
        event.flags = flags;

        let connection = self.connections.get_mut(&token)?;
        let original = event.key_code;
        let fallback_key_code = connection.input_state.fallback_key(original);
        if action == KeyAction::Up {
            connection.input_state.remove_fallback_key(original);
        }

        if handled || !dispatch.has_foreground_target() {
            // The window dealt with the key itself, so any fallback sent for it stops.
            if let Some(fallback) = fallback_key_code {
                if fallback != KeyCode::UNKNOWN {
                    let options = CancelationOptions::new(
                        CancelationMode::FallbackEvents,
                        "application handled the original non-fallback key or is no longer a foreground target, \
                         canceling previously dispatched fallback key",
                    )
                    .with_key_code(fallback);
                    self.synthesize_cancelation_events_for_connection(token, &options);
                }
                if let Some(connection) = self.connections.get_mut(&token) {
                    connection.input_state.remove_fallback_key(original);
                }
            }
            return None;
        }

        if flags.contains(KeyFlags::CANCELED) {
            return None;
        }
        let initial_down = action == KeyAction::Down && event.repeat_count == 0;
        if fallback_key_code.is_none() && !initial_down {
            debug!("Unhandled key event: Skipping unhandled key event processing since this is not an initial down");
            return None;
        }
        Some(UnhandledKey { token, seq, event, policy_flags, fallback_key_code, initial_down })
    }

    /// Second half of an acknowledgement: queues the fallback, retires the entry and continues
    /// the cycle.
    pub fn complete_cycle_finished(
        &mut self,
        now: Instant,
        token: InputToken,
        seq: u32,
        unhandled: Option<(UnhandledKey, Option<KeyEvent>)>,
    ) {
        if let Some((request, fallback)) = unhandled {
            self.apply_fallback(now, request, fallback);
        }

        let Some(connection) = self.connections.get_mut(&token) else { return };
        if let Some(index) = connection.find_wait_entry(seq) {
            if let Some(dispatch) = connection.wait.remove(index) {
                if let Some(timeout_time) = dispatch.timeout_time {
                    self.anr_tracker.erase(timeout_time, token);
                }
                let recovered = !connection.is_responsive() && connection.has_no_overdue_entries(now);
                if recovered {
                    connection.responsiveness = Responsiveness::Responsive;
                    info!("channel '{}' is responsive again", connection.name());
                    let pid = self.connection_pid(token);
                    self.post_command(Command::WindowResponsive { token, pid });
                }
                self.release_dispatch_entry(dispatch);
            }
        }
        self.start_dispatch_cycle(now, token);
    }

    fn apply_fallback(&mut self, now: Instant, request: UnhandledKey, fallback: Option<KeyEvent>) {
        let original = request.event.key_code;
        let Some(connection) = self.connections.get_mut(&request.token) else { return };
        if connection.status != ConnectionStatus::Normal {
            connection.input_state.remove_fallback_key(original);
            return;
        }

        let mut fallback_key_code = request.fallback_key_code;
        if request.initial_down {
            // The fallback is latched on the initial down and never changes afterwards.
            let code = fallback.as_ref().map_or(KeyCode::UNKNOWN, |event| event.key_code);
            connection.input_state.set_fallback_key(original, code);
            fallback_key_code = Some(code);
        }
        let latched = fallback_key_code.unwrap_or(KeyCode::UNKNOWN);

        let mut fallback = fallback;
        if latched != KeyCode::UNKNOWN && fallback.as_ref().map_or(true, |event| event.key_code != latched) {
            match &fallback {
                Some(event) => debug!(
                    "Unhandled key event: Policy requested to send key {} as a fallback for {}, but on the DOWN it \
                     had requested to send {} instead. Fallback canceled",
                    event.key_code.0, original.0, latched.0
                ),
                None => debug!(
                    "Unhandled key event: Policy did not request fallback for {}, but on the DOWN it had requested \
                     to send {}. Fallback canceled",
                    original.0, latched.0
                ),
            }
            let options =
                CancelationOptions::new(CancelationMode::FallbackEvents, "canceling fallback, policy no longer desires it")
                    .with_key_code(latched);
            self.synthesize_cancelation_events_for_connection(request.token, &options);
            fallback = None;
            if request.event.action != KeyAction::Up {
                if let Some(connection) = self.connections.get_mut(&request.token) {
                    connection.input_state.set_fallback_key(original, KeyCode::UNKNOWN);
                }
            }
        }

        let Some(fallback) = fallback.filter(|_| latched != KeyCode::UNKNOWN) else {
            debug!("Unhandled key event: No fallback key");
            return;
        };

        let Some(dispatch) = self
            .connections
            .get(&request.token)
            .and_then(|connection| connection.wait.get(connection.find_wait_entry(request.seq)?))
            .cloned()
        else {
            return;
        };
        let injection = self.arena.get(dispatch.entry).and_then(|entry| entry.injection);

        let mut event = request.event.clone();
        event.action = fallback.action;
        event.key_code = latched;
        event.scan_code = fallback.scan_code;
        event.meta_state = fallback.meta_state;
        event.repeat_count = fallback.repeat_count;
        event.down_time = fallback.down_time;
        event.event_time = fallback.event_time;
        event.flags = fallback.flags | KeyFlags::FALLBACK;
        event.hmac = INVALID_HMAC;
        debug!("Unhandled key event: Dispatching fallback key {} for {}", latched.0, original.0);

        let action = event.action;
        let flags = event.flags;
        let fallback_id = self.new_entry(
            now,
            request.policy_flags,
            injection,
            EntryKind::Key(KeyEntry {
                event,
                synthetic_repeat: false,
                intercept: InterceptState::Continue,
                intercept_wakeup_time: None,
            }),
        );
        let Some(connection) = self.connections.get_mut(&request.token) else {
            self.release_entry(fallback_id);
            return;
        };
        if let Some(key) = self.arena.get(fallback_id).and_then(|entry| entry.key()) {
            connection.input_state.track_key(&key.event, action, flags, request.policy_flags);
        }
        let seq = connection.next_seq();
        connection.outbound.push_front(DispatchEntry {
            seq,
            entry: fallback_id,
            target_flags: dispatch.target_flags,
            resolved: ResolvedEvent::Key { action, flags },
            delivery_time: None,
            timeout_time: None,
        });
        if dispatch.has_foreground_target() {
            if let Some(injection) = injection {
                self.injections.increment_pending(injection);
            }
        }
    }

    fn update_last_anr_state(&mut self, label: &str, reason: &str) {
        let mut state = format!("ANR:\n  Window: {label}\n  Reason: {reason}\n");
        self.dump_dispatch_state(&mut state);
        self.last_anr_state = state;
    }

    fn on_no_focused_window_anr(&mut self) {
        let Some(awaited) = self.awaited_focused_application.clone() else { return };
        let display_id = self.awaited_application_display;
        let still_focused = self
            .focused_applications
            .get(&display_id)
            .is_some_and(|application| application.token == awaited.token);
        if !still_focused {
            return;
        }
        if self.focused_window(display_id).is_some() {
            return;
        }
        self.on_application_anr(awaited);
    }

    fn on_application_anr(&mut self, application: ApplicationInfo) {
        let reason = format!("{} does not have a focused window", application.name);
        error!("ANR: {reason}");
        let label = application.name.to_string();
        self.update_last_anr_state(&label, &reason);
        self.post_command(Command::NoFocusedWindowAnr(application));
    }

    fn on_connection_anr(&mut self, now: Instant, token: InputToken) {
        let Some(connection) = self.connections.get(&token) else { return };
        let Some(oldest) = connection.wait.front() else {
            info!("Not raising ANR because the connection {} has recovered", connection.name());
            return;
        };
        let waited = oldest.delivery_time.map(|delivery| now.saturating_duration_since(delivery)).unwrap_or_default();
        let description = self.arena.get(oldest.entry).map(|entry| entry.to_string()).unwrap_or_default();
        let reason = format!("{} is not responding. Waited {waited:?} for {description}", connection.name());
        let label = self.window_by_token(token).map_or_else(|| connection.name().to_owned(), |window| window.name.to_string());
        error!("ANR: {reason}");
        self.update_last_anr_state(&label, &reason);

        let pid = self.connection_pid(token);
        self.post_command(Command::WindowUnresponsive { token, pid, reason });

        // New events keep piling up on the connection, so stop its streams.
        if self.connections.get(&token).is_some_and(|connection| connection.status == ConnectionStatus::Normal) {
            warn!("Canceling events for {label} because it is unresponsive");
            let options = CancelationOptions::new(CancelationMode::AllEvents, "application not responding");
            self.synthesize_cancelation_events_for_connection(token, &options);
        }
    }

    /// Raises due ANRs. Returns when the next check is needed.
    pub fn process_anrs(&mut self, now: Instant) -> Option<Instant> {
        let mut next_check = None;
        if let Some(timeout) = self.no_focused_window_timeout {
            if now >= timeout {
                self.on_no_focused_window_anr();
                self.reset_no_focused_window_timeout();
                return Some(now);
            }
            // The event gets dropped once the timeout passes.
            next_check = Some(timeout);
        }

        let Some((timeout, token)) = self.anr_tracker.first() else { return next_check };
        if now < timeout {
            return Some(next_check.map_or(timeout, |next| next.min(timeout)));
        }

        let Some(connection) = self.connections.get_mut(&token) else {
            error!("Could not find connection for ANR entry of {token:?}");
            self.anr_tracker.erase(timeout, token);
            return Some(now);
        };
        connection.responsiveness = Responsiveness::WaitingForAnr;
        // No more wake-ups for a connection already known to be unresponsive.
        self.anr_tracker.erase_token(token);
        self.on_connection_anr(now, token);
        Some(now)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::channel::{DispatcherWaker, InputChannel, WakeUpProvider};
    use crate::config::DispatcherConfiguration;
    use crate::event::{DeviceId, Pointer, Source};
    use crate::hmac::HmacKeyManager;
    use crate::window::DisplayId;

    use super::*;

    #[derive(Debug)]
    struct NoWakeUps;

    impl WakeUpProvider for NoWakeUps {
        fn wake_up(&self) {}
    }

    fn one_finger(action: MotionAction, down_time: Instant) -> MotionEvent {
        MotionEvent::new(
            DeviceId::from(1),
            Source::TOUCHSCREEN,
            DisplayId::DEFAULT,
            action,
            vec![Pointer::new(0, 10.0, 10.0)],
            Instant::now(),
        )
        .with_down_time(down_time)
    }

    fn two_finger(action: MotionAction) -> MotionEvent {
        MotionEvent::new(
            DeviceId::from(1),
            Source::TOUCHSCREEN,
            DisplayId::DEFAULT,
            action,
            vec![Pointer::new(0, 10.0, 10.0), Pointer::new(1, 60.0, 10.0)],
            Instant::now(),
        )
    }

    fn ids(raw: &[u32]) -> PointerIdSet {
        raw.iter().copied().map(crate::event::PointerId::from).collect()
    }

    #[test]
    fn second_pointer_down_becomes_down_for_its_own_window() {
        let first_down = Instant::now();
        let split = split_motion_event(&two_finger(MotionAction::PointerDown(1)), ids(&[1]), Some(first_down)).unwrap();
        assert_eq!(split.action, MotionAction::Down);
        assert_eq!(split.pointers.len(), 1);
        assert_eq!(split.down_time, first_down);
    }

    #[test]
    fn other_windows_pointer_change_is_a_move() {
        let split = split_motion_event(&two_finger(MotionAction::PointerUp(1)), ids(&[0]), None).unwrap();
        assert_eq!(split.action, MotionAction::Move);
        assert_eq!(u32::from(split.pointers[0].id), 0);
    }

    #[test]
    fn missing_pointers_drop_the_split() {
        assert!(split_motion_event(&two_finger(MotionAction::Move), ids(&[0, 5]), None).is_none());
    }

    #[test]
    fn removal_cancels_even_when_the_channel_is_full() {
        let mut state = DispatcherState::new(DispatcherConfiguration::default(), HmacKeyManager::new().unwrap());
        let token = InputToken::from(1);
        let (channel, consumer) = InputChannel::open_pair("full", token, 1, DispatcherWaker::new(Arc::new(NoWakeUps)));
        state.connections.insert(token, Connection::new(channel, None));
        let target = InputTarget {
            token,
            flags: InputTargetFlags::FOREGROUND | InputTargetFlags::DISPATCH_AS_IS,
            pointer_ids: PointerIdSet::default(),
            first_down_time: None,
        };

        let down_time = Instant::now();
        for action in [MotionAction::Down, MotionAction::Move] {
            let id = state.new_entry(down_time, PolicyFlags::PASS_TO_USER, None, EntryKind::Motion(one_finger(action, down_time)));
            state.dispatch_event(down_time, id, &[target.clone()]);
            state.release_entry(id);
        }
        // The move could not be published.
        assert_eq!(state.connections.get(&token).map(|connection| connection.outbound.len()), Some(1));

        let options = CancelationOptions::new(CancelationMode::AllEvents, "input channel removed");
        state.synthesize_cancelation_events_for_connection(token, &options);
        state.flush_cancelations(token);
        assert!(state.remove_connection(token, false));

        let actions: Vec<_> = std::iter::from_fn(|| consumer.try_receive())
            .map(|message| match message {
                InputMessage::Motion { event, .. } => event.action,
                other => panic!("expected a motion event, got {other:?}"),
            })
            .collect();
        assert_eq!(actions, [MotionAction::Down, MotionAction::Cancel]);
    }

    #[test]
    fn pointer_index_is_remapped() {
        let mut event = two_finger(MotionAction::PointerDown(1));
        event.pointers.push(Pointer::new(2, 90.0, 10.0));
        event.action = MotionAction::PointerDown(2);
        let split = split_motion_event(&event, ids(&[1, 2]), None).unwrap();
        assert_eq!(split.action, MotionAction::PointerDown(1));
    }
}

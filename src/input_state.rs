//! What each connection believes about key and pointer state, so streams can be cancelled.
//!
//! Every key and motion event delivered to a connection is tracked here. When a stream has to
//! be cut short, the mementos tell which keys are still down and which pointers are still
//! active, and cancellation events are synthesized for exactly those.

use std::collections::HashMap;
use std::time::Instant;

use tracing::debug;

use crate::event::{
    DeviceId, KeyAction, KeyCode, KeyEvent, KeyFlags, MetaState, MotionAction, MotionEvent,
    MotionFlags, Pointer, PolicyFlags, Source, INVALID_HMAC,
};
use crate::window::DisplayId;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum CancelationMode {
    AllEvents,
    PointerEvents,
    NonPointerEvents,
    FallbackEvents,
}

/// Which streams to cancel.
#[derive(Debug, Clone)]
pub(crate) struct CancelationOptions {
    pub mode: CancelationMode,
    pub reason: &'static str,
    pub device_id: Option<DeviceId>,
    pub display_id: Option<DisplayId>,
    /// Restricts key cancelation to one key code.
    pub key_code: Option<KeyCode>,
}

impl CancelationOptions {
    pub fn new(mode: CancelationMode, reason: &'static str) -> Self {
        Self { mode, reason, device_id: None, display_id: None, key_code: None }
    }

    pub fn with_key_code(mut self, key_code: KeyCode) -> Self {
        self.key_code = Some(key_code);
        self
    }

    pub fn with_device(mut self, device_id: DeviceId) -> Self {
        self.device_id = Some(device_id);
        self
    }

    pub fn with_display(mut self, display_id: DisplayId) -> Self {
        self.display_id = Some(display_id);
        self
    }
}

#[derive(Debug, Clone)]
struct KeyMemento {
    device_id: DeviceId,
    source: Source,
    display_id: DisplayId,
    key_code: KeyCode,
    scan_code: u32,
    meta_state: MetaState,
    flags: KeyFlags,
    down_time: Instant,
    policy_flags: PolicyFlags,
}

#[derive(Debug, Clone)]
struct MotionMemento {
    device_id: DeviceId,
    source: Source,
    display_id: DisplayId,
    flags: MotionFlags,
    pointers: Vec<Pointer>,
    down_time: Instant,
    policy_flags: PolicyFlags,
    hovering: bool,
}

/// An event synthesized to cancel or restore a stream.
#[derive(Debug, Clone)]
pub(crate) enum SynthesizedEvent {
    Key(KeyEvent, PolicyFlags),
    Motion(MotionEvent, PolicyFlags),
}

#[derive(Debug, Default)]
pub(crate) struct InputState {
    keys: Vec<KeyMemento>,
    motions: Vec<MotionMemento>,
    /// Fallback key latched for each original key, `KeyCode::UNKNOWN` when there is none.
    fallback_keys: HashMap<KeyCode, KeyCode>,
}

impl InputState {
    pub fn is_neutral(&self) -> bool {
        self.keys.is_empty() && self.motions.is_empty()
    }

    pub fn is_hovering(&self, device_id: DeviceId, source: Source, display_id: DisplayId) -> bool {
        self.motions.iter().any(|memento| {
            memento.hovering
                && memento.device_id == device_id
                && memento.source == source
                && memento.display_id == display_id
        })
    }

    fn find_key(&self, event: &KeyEvent) -> Option<usize> {
        self.keys.iter().position(|memento| {
            memento.device_id == event.device_id
                && memento.source == event.source
                && memento.display_id == event.display_id
                && memento.key_code == event.key_code
                && memento.scan_code == event.scan_code
        })
    }

    fn find_motion(&self, event: &MotionEvent, hovering: bool) -> Option<usize> {
        self.motions.iter().position(|memento| {
            memento.device_id == event.device_id
                && memento.source == event.source
                && memento.display_id == event.display_id
                && memento.hovering == hovering
        })
    }

    /// Records a key about to be delivered with the given action and flags.
    ///
    /// Inconsistent key ups are still delivered: a window may legitimately receive the up of a
    /// key that went down before it existed.
    pub fn track_key(&mut self, event: &KeyEvent, action: KeyAction, flags: KeyFlags, policy_flags: PolicyFlags) {
        let index = self.find_key(event);
        match action {
            KeyAction::Up => {
                if let Some(index) = index {
                    self.keys.remove(index);
                } else {
                    debug!("Dispatching key up without a matching down: {:?}", event.key_code);
                }
            },
            KeyAction::Down => {
                if let Some(index) = index {
                    self.keys.remove(index);
                }
                self.keys.push(KeyMemento {
                    device_id: event.device_id,
                    source: event.source,
                    display_id: event.display_id,
                    key_code: event.key_code,
                    scan_code: event.scan_code,
                    meta_state: event.meta_state,
                    flags,
                    down_time: event.down_time,
                    policy_flags,
                });
            },
        }
    }

    /// Records a motion event about to be delivered. Returns `false` when the event does not
    /// fit the stream the connection has seen and must not be delivered.
    pub fn track_motion(
        &mut self,
        event: &MotionEvent,
        action: MotionAction,
        flags: MotionFlags,
        policy_flags: PolicyFlags,
    ) -> bool {
        match action {
            MotionAction::Up | MotionAction::Cancel => match self.find_motion(event, false) {
                Some(index) => {
                    self.motions.remove(index);
                    true
                },
                None => false,
            },
            MotionAction::Down => {
                if let Some(index) = self.find_motion(event, false) {
                    self.motions.remove(index);
                }
                self.add_motion(event, flags, policy_flags, false);
                true
            },
            MotionAction::PointerUp(_) | MotionAction::PointerDown(_) | MotionAction::Move => {
                // Relative devices move without ever going down or up.
                if event.source.intersects(Source::MOUSE_RELATIVE | Source::TRACKBALL | Source::JOYSTICK) {
                    return true;
                }
                match self.find_motion(event, false) {
                    Some(index) => {
                        let memento = &mut self.motions[index];
                        memento.pointers = event.pointers.clone();
                        if let MotionAction::PointerUp(index) = action {
                            if index < memento.pointers.len() {
                                memento.pointers.remove(index);
                            }
                        }
                        true
                    },
                    None => false,
                }
            },
            MotionAction::HoverExit => match self.find_motion(event, true) {
                Some(index) => {
                    self.motions.remove(index);
                    true
                },
                None => false,
            },
            MotionAction::HoverEnter | MotionAction::HoverMove => {
                if let Some(index) = self.find_motion(event, true) {
                    self.motions.remove(index);
                }
                self.add_motion(event, flags, policy_flags, true);
                true
            },
            MotionAction::Outside | MotionAction::Scroll => true,
        }
    }

    fn add_motion(&mut self, event: &MotionEvent, flags: MotionFlags, policy_flags: PolicyFlags, hovering: bool) {
        self.motions.push(MotionMemento {
            device_id: event.device_id,
            source: event.source,
            display_id: event.display_id,
            flags,
            pointers: event.pointers.clone(),
            down_time: event.down_time,
            policy_flags,
            hovering,
        });
    }

    fn should_cancel_key(memento: &KeyMemento, options: &CancelationOptions) -> bool {
        if options.device_id.is_some_and(|device_id| device_id != memento.device_id)
            || options.display_id.is_some_and(|display_id| display_id != memento.display_id)
            || options.key_code.is_some_and(|key_code| key_code != memento.key_code)
        {
            return false;
        }
        match options.mode {
            CancelationMode::AllEvents | CancelationMode::NonPointerEvents => true,
            CancelationMode::FallbackEvents => memento.flags.contains(KeyFlags::FALLBACK),
            CancelationMode::PointerEvents => false,
        }
    }

    fn should_cancel_motion(memento: &MotionMemento, options: &CancelationOptions) -> bool {
        if options.device_id.is_some_and(|device_id| device_id != memento.device_id)
            || options.display_id.is_some_and(|display_id| display_id != memento.display_id)
        {
            return false;
        }
        match options.mode {
            CancelationMode::AllEvents => true,
            CancelationMode::PointerEvents => memento.source.is_pointer(),
            CancelationMode::NonPointerEvents => !memento.source.is_pointer(),
            CancelationMode::FallbackEvents => false,
        }
    }

    /// Builds the events that cancel every matching stream.
    ///
    /// The mementos are left in place; tracking the synthesized events clears them.
    pub fn synthesize_cancelation_events(&self, now: Instant, options: &CancelationOptions) -> Vec<SynthesizedEvent> {
        let mut events = Vec::new();
        for memento in self.keys.iter().filter(|memento| Self::should_cancel_key(memento, options)) {
            let event = KeyEvent {
                device_id: memento.device_id,
                source: memento.source,
                display_id: memento.display_id,
                action: KeyAction::Up,
                flags: memento.flags | KeyFlags::CANCELED,
                key_code: memento.key_code,
                scan_code: memento.scan_code,
                meta_state: memento.meta_state,
                repeat_count: 0,
                down_time: memento.down_time,
                event_time: now,
                hmac: INVALID_HMAC,
            };
            events.push(SynthesizedEvent::Key(event, memento.policy_flags));
        }
        for memento in self.motions.iter().filter(|memento| Self::should_cancel_motion(memento, options)) {
            let action = if memento.hovering { MotionAction::HoverExit } else { MotionAction::Cancel };
            let mut event = MotionEvent::new(
                memento.device_id,
                memento.source,
                memento.display_id,
                action,
                memento.pointers.clone(),
                now,
            );
            event.flags = memento.flags | MotionFlags::CANCELED;
            event.down_time = memento.down_time;
            events.push(SynthesizedEvent::Motion(event, memento.policy_flags));
        }
        events
    }

    /// Builds the DOWN and POINTER_DOWN events that bring a new window up to the pointers of
    /// every active gesture.
    pub fn synthesize_pointer_down_events(&self, now: Instant) -> Vec<SynthesizedEvent> {
        let mut events = Vec::new();
        for memento in self.motions.iter().filter(|memento| !memento.hovering && !memento.pointers.is_empty()) {
            for count in 1..=memento.pointers.len() {
                let action = if count == 1 { MotionAction::Down } else { MotionAction::PointerDown(count - 1) };
                let mut event = MotionEvent::new(
                    memento.device_id,
                    memento.source,
                    memento.display_id,
                    action,
                    memento.pointers[..count].to_vec(),
                    now,
                );
                event.flags = memento.flags;
                event.down_time = now;
                events.push(SynthesizedEvent::Motion(event, memento.policy_flags));
            }
        }
        events
    }

    /// Copies pointer streams this state has and `other` lacks, so `other` can be brought up to
    /// the same pointers by synthesized downs.
    pub fn merge_pointer_state_to(&self, other: &mut InputState) {
        for memento in self.motions.iter().filter(|memento| !memento.hovering && memento.source.is_pointer()) {
            let exists = other.motions.iter().any(|theirs| {
                !theirs.hovering
                    && theirs.device_id == memento.device_id
                    && theirs.source == memento.source
                    && theirs.display_id == memento.display_id
            });
            if !exists {
                other.motions.push(memento.clone());
            }
        }
    }

    pub fn fallback_key(&self, original: KeyCode) -> Option<KeyCode> {
        self.fallback_keys.get(&original).copied()
    }

    pub fn set_fallback_key(&mut self, original: KeyCode, fallback: KeyCode) {
        self.fallback_keys.insert(original, fallback);
    }

    pub fn remove_fallback_key(&mut self, original: KeyCode) {
        self.fallback_keys.remove(&original);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(action: MotionAction, pointers: Vec<Pointer>) -> MotionEvent {
        MotionEvent::new(DeviceId::from(1), Source::TOUCHSCREEN, DisplayId::DEFAULT, action, pointers, Instant::now())
    }

    fn key(action: KeyAction) -> KeyEvent {
        KeyEvent::new(DeviceId::from(2), action, KeyCode::A, Instant::now())
    }

    fn track(state: &mut InputState, event: &MotionEvent) -> bool {
        state.track_motion(event, event.action, event.flags, PolicyFlags::PASS_TO_USER)
    }

    #[test]
    fn move_without_down_is_inconsistent() {
        let mut state = InputState::default();
        assert!(!track(&mut state, &touch(MotionAction::Move, vec![Pointer::new(0, 1.0, 1.0)])));
    }

    #[test]
    fn cancel_covers_every_active_pointer() {
        let mut state = InputState::default();
        assert!(track(&mut state, &touch(MotionAction::Down, vec![Pointer::new(0, 1.0, 1.0)])));
        let two = vec![Pointer::new(0, 1.0, 1.0), Pointer::new(3, 5.0, 5.0)];
        assert!(track(&mut state, &touch(MotionAction::PointerDown(1), two)));

        let options = CancelationOptions::new(CancelationMode::PointerEvents, "test");
        let events = state.synthesize_cancelation_events(Instant::now(), &options);
        assert_eq!(events.len(), 1);
        let SynthesizedEvent::Motion(cancel, _) = &events[0] else { panic!("expected motion") };
        assert_eq!(cancel.action, MotionAction::Cancel);
        assert!(cancel.flags.contains(MotionFlags::CANCELED));
        assert_eq!(cancel.pointer_ids().map(u32::from).collect::<Vec<_>>(), [0, 3]);

        assert!(track(&mut state, cancel));
        assert!(state.is_neutral());
    }

    #[test]
    fn pointer_up_shrinks_memento() {
        let mut state = InputState::default();
        track(&mut state, &touch(MotionAction::Down, vec![Pointer::new(0, 1.0, 1.0)]));
        let two = vec![Pointer::new(0, 1.0, 1.0), Pointer::new(1, 5.0, 5.0)];
        track(&mut state, &touch(MotionAction::PointerDown(1), two.clone()));
        track(&mut state, &touch(MotionAction::PointerUp(0), two));
        let events = state.synthesize_pointer_down_events(Instant::now());
        assert_eq!(events.len(), 1);
        let SynthesizedEvent::Motion(down, _) = &events[0] else { panic!("expected motion") };
        assert_eq!(down.action, MotionAction::Down);
        assert_eq!(down.pointer_ids().map(u32::from).collect::<Vec<_>>(), [1]);
    }

    #[test]
    fn key_cancelation_respects_mode_and_device() {
        let mut state = InputState::default();
        state.track_key(&key(KeyAction::Down), KeyAction::Down, KeyFlags::empty(), PolicyFlags::TRUSTED);

        let pointer_only = CancelationOptions::new(CancelationMode::PointerEvents, "test");
        assert!(state.synthesize_cancelation_events(Instant::now(), &pointer_only).is_empty());

        let other_device = CancelationOptions::new(CancelationMode::AllEvents, "test").with_device(DeviceId::from(9));
        assert!(state.synthesize_cancelation_events(Instant::now(), &other_device).is_empty());

        let all = CancelationOptions::new(CancelationMode::NonPointerEvents, "test");
        let events = state.synthesize_cancelation_events(Instant::now(), &all);
        let [SynthesizedEvent::Key(up, flags)] = events.as_slice() else { panic!("expected one key") };
        assert_eq!(up.action, KeyAction::Up);
        assert!(up.flags.contains(KeyFlags::CANCELED));
        assert_eq!(*flags, PolicyFlags::TRUSTED);
    }

    #[test]
    fn merge_copies_missing_pointer_streams() {
        let mut from = InputState::default();
        track(&mut from, &touch(MotionAction::Down, vec![Pointer::new(4, 1.0, 1.0)]));
        let mut to = InputState::default();
        from.merge_pointer_state_to(&mut to);
        let events = to.synthesize_pointer_down_events(Instant::now());
        let [SynthesizedEvent::Motion(down, _)] = events.as_slice() else { panic!("expected one motion") };
        assert_eq!(down.pointer_ids().map(u32::from).collect::<Vec<_>>(), [4]);
    }

    #[test]
    fn hover_cancels_as_hover_exit() {
        let mut state = InputState::default();
        let mut hover = touch(MotionAction::HoverEnter, vec![Pointer::new(0, 1.0, 1.0)]);
        hover.source = Source::MOUSE;
        track(&mut state, &hover);
        assert!(state.is_hovering(hover.device_id, Source::MOUSE, DisplayId::DEFAULT));

        let options = CancelationOptions::new(CancelationMode::AllEvents, "test");
        let events = state.synthesize_cancelation_events(Instant::now(), &options);
        let [SynthesizedEvent::Motion(exit, _)] = events.as_slice() else { panic!("expected one motion") };
        assert_eq!(exit.action, MotionAction::HoverExit);
    }
}

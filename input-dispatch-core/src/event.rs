//! The input events that flow from devices, through the dispatcher, to consumers.

use std::time::Instant;

use bitflags::bitflags;
use dpi::PhysicalPosition;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::window::DisplayId;

/// Largest pointer id a gesture may use.
pub const MAX_POINTER_ID: u32 = 31;

/// Most pointers a single motion event may carry.
pub const MAX_POINTERS: usize = 16;

/// The MAC value of an event that was never signed.
pub const INVALID_HMAC: [u8; 32] = [0; 32];

/// Identifier of an input device.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceId(i32);

impl DeviceId {
    /// The device used for events injected without a real device behind them.
    pub const VIRTUAL_KEYBOARD: DeviceId = DeviceId(-1);
}

impl From<DeviceId> for i32 {
    fn from(device_id: DeviceId) -> Self {
        device_id.0
    }
}

impl From<i32> for DeviceId {
    fn from(raw: i32) -> Self {
        Self(raw)
    }
}

/// Identifier of one pointer within a gesture.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PointerId(u32);

impl PointerId {
    pub fn is_valid(self) -> bool {
        self.0 <= MAX_POINTER_ID
    }
}

impl From<PointerId> for u32 {
    fn from(pointer_id: PointerId) -> Self {
        pointer_id.0
    }
}

impl From<u32> for PointerId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

bitflags! {
    /// The kind of hardware an event came from.
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct Source: u32 {
        const KEYBOARD = 1 << 0;
        const DPAD = 1 << 1;
        const GAMEPAD = 1 << 2;
        const TOUCHSCREEN = 1 << 3;
        const MOUSE = 1 << 4;
        const STYLUS = 1 << 5;
        /// Relative mouse motion, only delivered while a window holds pointer capture.
        const MOUSE_RELATIVE = 1 << 6;
        const TOUCHPAD = 1 << 7;
        const TRACKBALL = 1 << 8;
        const JOYSTICK = 1 << 9;
        const ROTARY_ENCODER = 1 << 10;
        const SENSOR = 1 << 11;
    }
}

impl Source {
    /// Whether events from this source are routed by position rather than by focus.
    pub fn is_pointer(self) -> bool {
        self.intersects(Source::TOUCHSCREEN | Source::MOUSE | Source::STYLUS)
    }

    pub fn is_from(self, source: Source) -> bool {
        self.contains(source)
    }
}

bitflags! {
    /// Flags attached by the device layer and the policy.
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct PolicyFlags: u32 {
        const WAKE = 1 << 0;
        const VIRTUAL = 1 << 1;
        const FUNCTION = 1 << 2;
        const GESTURE = 1 << 3;
        const INJECTED = 1 << 4;
        /// The event came from a trusted source.
        const TRUSTED = 1 << 5;
        /// The event already went through the input filter.
        const FILTERED = 1 << 6;
        const DISABLE_KEY_REPEAT = 1 << 7;
        const INTERACTIVE = 1 << 8;
        /// The event should be delivered to applications.
        const PASS_TO_USER = 1 << 9;
    }
}

bitflags! {
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct MetaState: u32 {
        const SHIFT_ON = 1 << 0;
        const ALT_ON = 1 << 1;
        const CTRL_ON = 1 << 2;
        const META_ON = 1 << 3;
        const FUNCTION_ON = 1 << 4;
    }
}

/// Key code of a key event.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct KeyCode(pub i32);

impl KeyCode {
    pub const UNKNOWN: KeyCode = KeyCode(0);
    pub const HOME: KeyCode = KeyCode(3);
    pub const BACK: KeyCode = KeyCode(4);
    pub const ENDCALL: KeyCode = KeyCode(6);
    pub const DPAD_UP: KeyCode = KeyCode(19);
    pub const DPAD_DOWN: KeyCode = KeyCode(20);
    pub const VOLUME_UP: KeyCode = KeyCode(24);
    pub const VOLUME_DOWN: KeyCode = KeyCode(25);
    pub const A: KeyCode = KeyCode(29);
    pub const B: KeyCode = KeyCode(30);
    pub const SPACE: KeyCode = KeyCode(62);
    pub const ENTER: KeyCode = KeyCode(66);
    pub const ESCAPE: KeyCode = KeyCode(111);
    pub const APP_SWITCH: KeyCode = KeyCode(187);

    /// Keys whose release preempts pending input so the switch happens promptly.
    pub fn is_app_switch(self) -> bool {
        matches!(self, KeyCode::HOME | KeyCode::ENDCALL | KeyCode::APP_SWITCH)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum KeyAction {
    Down,
    Up,
}

bitflags! {
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct KeyFlags: u32 {
        const SOFT_KEYBOARD = 1 << 0;
        const VIRTUAL_HARD_KEY = 1 << 1;
        /// The key stream was cancelled; the matching UP carries this flag.
        const CANCELED = 1 << 2;
        const LONG_PRESS = 1 << 3;
        /// Generated by the policy for a key the application did not handle.
        const FALLBACK = 1 << 4;
    }
}

/// A key press or release.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyEvent {
    pub device_id: DeviceId,
    pub source: Source,
    pub display_id: DisplayId,
    pub action: KeyAction,
    pub flags: KeyFlags,
    pub key_code: KeyCode,
    pub scan_code: u32,
    pub meta_state: MetaState,
    pub repeat_count: u32,
    pub down_time: Instant,
    pub event_time: Instant,
    /// Set by the dispatcher on delivery; see `InputDispatcher::verify_input_event`.
    pub hmac: [u8; 32],
}

impl KeyEvent {
    pub fn new(device_id: DeviceId, action: KeyAction, key_code: KeyCode, event_time: Instant) -> Self {
        Self {
            device_id,
            source: Source::KEYBOARD,
            display_id: DisplayId::NONE,
            action,
            flags: KeyFlags::empty(),
            key_code,
            scan_code: 0,
            meta_state: MetaState::empty(),
            repeat_count: 0,
            down_time: event_time,
            event_time,
            hmac: INVALID_HMAC,
        }
    }

    pub fn with_display(mut self, display_id: DisplayId) -> Self {
        self.display_id = display_id;
        self
    }

    pub fn with_down_time(mut self, down_time: Instant) -> Self {
        self.down_time = down_time;
        self
    }
}

/// What happened to the pointers of a motion event.
///
/// The index in `PointerDown`/`PointerUp` refers to [`MotionEvent::pointers`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MotionAction {
    Down,
    Up,
    Move,
    Cancel,
    /// Sent to windows watching for touches that start outside of them.
    Outside,
    PointerDown(usize),
    PointerUp(usize),
    HoverEnter,
    HoverMove,
    HoverExit,
    Scroll,
}

impl MotionAction {
    /// Index of the pointer that went down or up, zero for every other action.
    pub fn pointer_index(self) -> usize {
        match self {
            MotionAction::PointerDown(index) | MotionAction::PointerUp(index) => index,
            _ => 0,
        }
    }

    pub fn is_hover(self) -> bool {
        matches!(self, MotionAction::HoverEnter | MotionAction::HoverMove | MotionAction::HoverExit)
    }

    /// Whether the action can never be pruned or coalesced away.
    pub fn is_gesture_boundary(self) -> bool {
        !matches!(self, MotionAction::Move | MotionAction::HoverMove)
    }
}

bitflags! {
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct MotionFlags: u32 {
        /// Another application's window covered the touch point.
        const WINDOW_IS_OBSCURED = 1 << 0;
        /// Another application's window overlaps this window somewhere.
        const WINDOW_IS_PARTIALLY_OBSCURED = 1 << 1;
        /// The gesture was cancelled.
        const CANCELED = 1 << 2;
        const IS_GENERATED_GESTURE = 1 << 3;
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ToolType {
    #[default]
    Unknown,
    Finger,
    Stylus,
    Mouse,
    Eraser,
    Palm,
}

/// Position and pressure of one pointer.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PointerCoords {
    pub position: PhysicalPosition<f32>,
    pub pressure: f32,
    pub size: f32,
}

impl PointerCoords {
    pub fn new(x: f32, y: f32) -> Self {
        Self { position: PhysicalPosition::new(x, y), pressure: 1.0, size: 0.0 }
    }
}

/// One pointer of a motion event.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Pointer {
    pub id: PointerId,
    pub tool_type: ToolType,
    pub coords: PointerCoords,
}

impl Pointer {
    pub fn new(id: u32, x: f32, y: f32) -> Self {
        Self { id: PointerId::from(id), tool_type: ToolType::Finger, coords: PointerCoords::new(x, y) }
    }
}

/// A touch, mouse or stylus sample.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionEvent {
    pub device_id: DeviceId,
    pub source: Source,
    pub display_id: DisplayId,
    pub action: MotionAction,
    pub flags: MotionFlags,
    pub meta_state: MetaState,
    pub button_state: u32,
    pub down_time: Instant,
    pub event_time: Instant,
    pub pointers: Vec<Pointer>,
    /// Set by the dispatcher on delivery; see `InputDispatcher::verify_input_event`.
    pub hmac: [u8; 32],
}

impl MotionEvent {
    pub fn new(
        device_id: DeviceId,
        source: Source,
        display_id: DisplayId,
        action: MotionAction,
        pointers: Vec<Pointer>,
        event_time: Instant,
    ) -> Self {
        Self {
            device_id,
            source,
            display_id,
            action,
            flags: MotionFlags::empty(),
            meta_state: MetaState::empty(),
            button_state: 0,
            down_time: event_time,
            event_time,
            pointers,
            hmac: INVALID_HMAC,
        }
    }

    pub fn with_down_time(mut self, down_time: Instant) -> Self {
        self.down_time = down_time;
        self
    }

    pub fn pointer_ids(&self) -> impl Iterator<Item = PointerId> + '_ {
        self.pointers.iter().map(|pointer| pointer.id)
    }

    /// The pointer the action refers to.
    pub fn action_pointer(&self) -> Option<&Pointer> {
        self.pointers.get(self.action.pointer_index())
    }

    /// Checks the invariants every motion event must satisfy before it is queued.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.pointers.is_empty() || self.pointers.len() > MAX_POINTERS {
            return Err("invalid pointer count");
        }
        if let MotionAction::PointerDown(index) | MotionAction::PointerUp(index) = self.action {
            if index >= self.pointers.len() || self.pointers.len() < 2 {
                return Err("invalid action pointer index");
            }
        }
        let mut seen = 0u32;
        for id in self.pointer_ids() {
            if !id.is_valid() {
                return Err("pointer id out of range");
            }
            let bit = 1u32 << u32::from(id);
            if seen & bit != 0 {
                return Err("duplicate pointer id");
            }
            seen |= bit;
        }
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SensorType {
    Accelerometer,
    MagneticField,
    Gyroscope,
    Light,
    Pressure,
    Proximity,
    Gravity,
    LinearAcceleration,
    RotationVector,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SensorAccuracy {
    Unreliable,
    Low,
    Medium,
    High,
}

/// An event handed to the dispatcher by an injector, or offered to the input filter.
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    Key(KeyEvent),
    Motion(MotionEvent),
}

impl InputEvent {
    pub fn event_time(&self) -> Instant {
        match self {
            InputEvent::Key(key) => key.event_time,
            InputEvent::Motion(motion) => motion.event_time,
        }
    }

    pub fn display_id(&self) -> DisplayId {
        match self {
            InputEvent::Key(key) => key.display_id,
            InputEvent::Motion(motion) => motion.display_id,
        }
    }
}

impl From<KeyEvent> for InputEvent {
    fn from(event: KeyEvent) -> Self {
        InputEvent::Key(event)
    }
}

impl From<MotionEvent> for InputEvent {
    fn from(event: MotionEvent) -> Self {
        InputEvent::Motion(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn motion(action: MotionAction, pointers: Vec<Pointer>) -> MotionEvent {
        MotionEvent::new(
            DeviceId::from(1),
            Source::TOUCHSCREEN,
            DisplayId::DEFAULT,
            action,
            pointers,
            Instant::now(),
        )
    }

    #[test]
    fn validate_rejects_duplicate_ids() {
        let event = motion(MotionAction::Move, vec![Pointer::new(1, 0.0, 0.0), Pointer::new(1, 5.0, 5.0)]);
        assert_eq!(event.validate(), Err("duplicate pointer id"));
    }

    #[test]
    fn validate_rejects_out_of_range_ids() {
        let event = motion(MotionAction::Down, vec![Pointer::new(MAX_POINTER_ID + 1, 0.0, 0.0)]);
        assert_eq!(event.validate(), Err("pointer id out of range"));
    }

    #[test]
    fn validate_checks_action_index() {
        let event = motion(MotionAction::PointerDown(2), vec![Pointer::new(0, 0.0, 0.0), Pointer::new(1, 1.0, 1.0)]);
        assert!(event.validate().is_err());
        let event = motion(MotionAction::PointerDown(1), vec![Pointer::new(0, 0.0, 0.0), Pointer::new(1, 1.0, 1.0)]);
        assert_eq!(event.validate(), Ok(()));
    }

    #[test]
    fn pointer_sources() {
        assert!(Source::TOUCHSCREEN.is_pointer());
        assert!((Source::MOUSE | Source::KEYBOARD).is_pointer());
        assert!(!Source::MOUSE_RELATIVE.is_pointer());
        assert!(!Source::JOYSTICK.is_pointer());
    }
}

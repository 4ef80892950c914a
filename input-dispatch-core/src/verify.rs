//! The signed subset of an event.
//!
//! Only fields that cannot change in transit are covered, so a consumer can hand a received
//! event back to the dispatcher and learn whether the dispatcher really produced it.

use std::time::Instant;

use crate::event::{
    DeviceId, InputEvent, KeyAction, KeyEvent, KeyFlags, MetaState, MotionAction, MotionEvent,
    MotionFlags, Source,
};
use crate::window::DisplayId;

/// Key flags covered by the signature.
pub const VERIFIED_KEY_FLAGS: KeyFlags = KeyFlags::CANCELED.union(KeyFlags::FALLBACK);

/// Motion flags covered by the signature.
pub const VERIFIED_MOTION_FLAGS: MotionFlags = MotionFlags::WINDOW_IS_OBSCURED
    .union(MotionFlags::WINDOW_IS_PARTIALLY_OBSCURED)
    .union(MotionFlags::CANCELED);

#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedKeyEvent {
    pub device_id: DeviceId,
    pub event_time: Instant,
    pub source: Source,
    pub display_id: DisplayId,
    pub action: KeyAction,
    pub down_time: Instant,
    pub flags: KeyFlags,
    pub key_code: i32,
    pub scan_code: u32,
    pub meta_state: MetaState,
    pub repeat_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedMotionEvent {
    pub device_id: DeviceId,
    pub event_time: Instant,
    pub source: Source,
    pub display_id: DisplayId,
    pub raw_x: f32,
    pub raw_y: f32,
    pub action: MotionAction,
    pub down_time: Instant,
    pub flags: MotionFlags,
    pub meta_state: MetaState,
    pub button_state: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VerifiedInputEvent {
    Key(VerifiedKeyEvent),
    Motion(VerifiedMotionEvent),
}

impl From<&KeyEvent> for VerifiedKeyEvent {
    fn from(event: &KeyEvent) -> Self {
        Self {
            device_id: event.device_id,
            event_time: event.event_time,
            source: event.source,
            display_id: event.display_id,
            action: event.action,
            down_time: event.down_time,
            flags: event.flags & VERIFIED_KEY_FLAGS,
            key_code: event.key_code.0,
            scan_code: event.scan_code,
            meta_state: event.meta_state,
            repeat_count: event.repeat_count,
        }
    }
}

impl From<&MotionEvent> for VerifiedMotionEvent {
    fn from(event: &MotionEvent) -> Self {
        let position = event.pointers.first().map(|pointer| pointer.coords.position);
        Self {
            device_id: event.device_id,
            event_time: event.event_time,
            source: event.source,
            display_id: event.display_id,
            raw_x: position.map_or(0.0, |p| p.x),
            raw_y: position.map_or(0.0, |p| p.y),
            action: event.action,
            down_time: event.down_time,
            flags: event.flags & VERIFIED_MOTION_FLAGS,
            meta_state: event.meta_state,
            button_state: event.button_state,
        }
    }
}

impl From<&InputEvent> for VerifiedInputEvent {
    fn from(event: &InputEvent) -> Self {
        match event {
            InputEvent::Key(key) => VerifiedInputEvent::Key(key.into()),
            InputEvent::Motion(motion) => VerifiedInputEvent::Motion(motion.into()),
        }
    }
}

//! Queued events and the arena that owns them.
//!
//! An entry is referenced from several places at once: the inbound queue, the recent-event
//! ring, the key repeat state and the wait queues of every connection it went to. Those places
//! hold an [`EntryId`] and take a reference in the [`EntryArena`]; the entry is freed when the
//! last reference is released.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use dpi::PhysicalPosition;

use crate::event::{DeviceId, KeyEvent, MotionEvent, PolicyFlags, SensorAccuracy, SensorType};
use crate::injection::InjectionId;
use crate::policy::PointerCaptureRequest;
use crate::window::{DisplayId, InputToken};

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct EntryId(u64);

impl From<EntryId> for u64 {
    fn from(id: EntryId) -> Self {
        id.0
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum InterceptState {
    Unknown,
    Continue,
    Skip,
    TryAgainLater,
}

#[derive(Debug, Clone)]
pub(crate) struct KeyEntry {
    pub event: KeyEvent,
    /// Generated by the dispatcher's own repeat timer.
    pub synthetic_repeat: bool,
    pub intercept: InterceptState,
    pub intercept_wakeup_time: Option<Instant>,
}

#[derive(Debug, Clone)]
pub(crate) struct FocusEntry {
    pub token: InputToken,
    pub has_focus: bool,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub(crate) struct DragEntry {
    pub token: InputToken,
    pub is_exiting: bool,
    pub position: PhysicalPosition<f32>,
}

#[derive(Debug, Clone)]
pub(crate) struct SensorEntry {
    pub device_id: DeviceId,
    pub sensor_type: SensorType,
    pub accuracy: SensorAccuracy,
    pub hw_timestamp: Instant,
    pub values: Vec<f32>,
}

#[derive(Debug, Clone)]
pub(crate) enum EntryKind {
    ConfigurationChanged,
    DeviceReset { device_id: DeviceId },
    Focus(FocusEntry),
    PointerCaptureChanged(PointerCaptureRequest),
    Drag(DragEntry),
    TouchMode { in_touch_mode: bool, display_id: DisplayId },
    Key(KeyEntry),
    Motion(MotionEvent),
    Sensor(SensorEntry),
}

#[derive(Debug, Clone)]
pub(crate) struct EventEntry {
    pub event_time: Instant,
    pub policy_flags: PolicyFlags,
    pub injection: Option<InjectionId>,
    pub dispatch_in_progress: bool,
    pub kind: EntryKind,
}

impl EventEntry {
    pub fn key(&self) -> Option<&KeyEntry> {
        match &self.kind {
            EntryKind::Key(key) => Some(key),
            _ => None,
        }
    }

    pub fn motion(&self) -> Option<&MotionEvent> {
        match &self.kind {
            EntryKind::Motion(motion) => Some(motion),
            _ => None,
        }
    }

    pub fn is_injected(&self) -> bool {
        self.injection.is_some()
    }

    /// The display the entry is bound to, if any.
    pub fn display_id(&self) -> Option<DisplayId> {
        match &self.kind {
            EntryKind::Key(key) => Some(key.event.display_id),
            EntryKind::Motion(motion) => Some(motion.display_id),
            EntryKind::TouchMode { display_id, .. } => Some(*display_id),
            _ => None,
        }
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.event_time)
    }
}

impl fmt::Display for EventEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            EntryKind::ConfigurationChanged => write!(f, "ConfigurationChangedEvent()"),
            EntryKind::DeviceReset { device_id } => write!(f, "DeviceResetEvent(deviceId={device_id:?})"),
            EntryKind::Focus(focus) => {
                write!(f, "FocusEvent(hasFocus={}, token={:?}, reason={})", focus.has_focus, focus.token, focus.reason)
            },
            EntryKind::PointerCaptureChanged(request) => {
                write!(f, "PointerCaptureChangedEvent(enable={}, seq={})", request.enable, request.seq)
            },
            EntryKind::Drag(drag) => {
                write!(f, "DragEntry({:?}, x={}, y={}, exiting={})", drag.token, drag.position.x, drag.position.y, drag.is_exiting)
            },
            EntryKind::TouchMode { in_touch_mode, display_id } => {
                write!(f, "TouchModeEvent(inTouchMode={in_touch_mode}, displayId={display_id:?})")
            },
            EntryKind::Key(key) => write!(
                f,
                "KeyEvent(deviceId={:?}, displayId={:?}, action={:?}, keyCode={}, flags={:?}, repeatCount={})",
                key.event.device_id,
                key.event.display_id,
                key.event.action,
                key.event.key_code.0,
                key.event.flags,
                key.event.repeat_count,
            ),
            EntryKind::Motion(motion) => {
                write!(
                    f,
                    "MotionEvent(deviceId={:?}, source={:?}, displayId={:?}, action={:?}, pointers=[",
                    motion.device_id, motion.source, motion.display_id, motion.action,
                )?;
                for (index, pointer) in motion.pointers.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    let position = pointer.coords.position;
                    write!(f, "{}: ({:.1}, {:.1})", u32::from(pointer.id), position.x, position.y)?;
                }
                f.write_str("])")
            },
            EntryKind::Sensor(sensor) => {
                write!(f, "SensorEvent(deviceId={:?}, sensorType={:?})", sensor.device_id, sensor.sensor_type)
            },
        }
    }
}

/// Why an entry was dropped before reaching any window.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum DropReason {
    Policy,
    AppSwitch,
    Disabled,
    Blocked,
    Stale,
    NoPointerCapture,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            DropReason::Policy => "POLICY",
            DropReason::AppSwitch => "APP_SWITCH",
            DropReason::Disabled => "DISABLED",
            DropReason::Blocked => "BLOCKED",
            DropReason::Stale => "STALE",
            DropReason::NoPointerCapture => "NO_POINTER_CAPTURE",
        })
    }
}

#[derive(Debug)]
struct Slot {
    entry: EventEntry,
    refs: usize,
}

/// Reference counted storage for every live entry.
#[derive(Debug, Default)]
pub(crate) struct EntryArena {
    next_id: u64,
    slots: HashMap<EntryId, Slot>,
}

impl EntryArena {
    /// Stores a new entry holding one reference.
    pub fn allocate(
        &mut self,
        event_time: Instant,
        policy_flags: PolicyFlags,
        injection: Option<InjectionId>,
        kind: EntryKind,
    ) -> EntryId {
        self.next_id += 1;
        let id = EntryId(self.next_id);
        let entry = EventEntry { event_time, policy_flags, injection, dispatch_in_progress: false, kind };
        self.slots.insert(id, Slot { entry, refs: 1 });
        id
    }

    pub fn acquire(&mut self, id: EntryId) {
        if let Some(slot) = self.slots.get_mut(&id) {
            slot.refs += 1;
        }
    }

    /// Drops one reference. Returns the entry when that was the last one.
    pub fn release(&mut self, id: EntryId) -> Option<EventEntry> {
        let slot = self.slots.get_mut(&id)?;
        slot.refs -= 1;
        if slot.refs > 0 {
            return None;
        }
        self.slots.remove(&id).map(|slot| slot.entry)
    }

    pub fn get(&self, id: EntryId) -> Option<&EventEntry> {
        self.slots.get(&id).map(|slot| &slot.entry)
    }

    pub fn get_mut(&mut self, id: EntryId) -> Option<&mut EventEntry> {
        self.slots.get_mut(&id).map(|slot| &mut slot.entry)
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_lives_until_last_release() {
        let mut arena = EntryArena::default();
        let id = arena.allocate(Instant::now(), PolicyFlags::empty(), None, EntryKind::ConfigurationChanged);
        arena.acquire(id);
        assert!(arena.release(id).is_none());
        assert!(arena.get(id).is_some());
        assert!(arena.release(id).is_some());
        assert!(arena.get(id).is_none());
        assert!(arena.release(id).is_none());
    }

    #[test]
    fn ids_are_unique() {
        let mut arena = EntryArena::default();
        let now = Instant::now();
        let a = arena.allocate(now, PolicyFlags::empty(), None, EntryKind::ConfigurationChanged);
        arena.release(a);
        let b = arena.allocate(now, PolicyFlags::empty(), None, EntryKind::ConfigurationChanged);
        assert_ne!(a, b);
    }
}

//! Arguments of the `notify_*` calls made by the device layer.

use std::time::Instant;

use crate::event::{
    DeviceId, KeyEvent, MotionEvent, PolicyFlags, SensorAccuracy, SensorType, Source,
};
use crate::policy::PointerCaptureRequest;

#[derive(Debug, Clone, PartialEq)]
pub struct NotifyConfigurationChangedArgs {
    pub event_time: Instant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotifyKeyArgs {
    pub event: KeyEvent,
    pub policy_flags: PolicyFlags,
}

impl NotifyKeyArgs {
    /// Args for a key from a trusted device that should reach applications.
    pub fn new(event: KeyEvent) -> Self {
        Self { event, policy_flags: PolicyFlags::PASS_TO_USER }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotifyMotionArgs {
    pub event: MotionEvent,
    pub policy_flags: PolicyFlags,
}

impl NotifyMotionArgs {
    pub fn new(event: MotionEvent) -> Self {
        Self { event, policy_flags: PolicyFlags::PASS_TO_USER }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotifySensorArgs {
    pub event_time: Instant,
    pub device_id: DeviceId,
    pub source: Source,
    pub sensor_type: SensorType,
    pub accuracy: SensorAccuracy,
    pub accuracy_changed: bool,
    pub hw_timestamp: Instant,
    pub values: Vec<f32>,
    pub policy_flags: PolicyFlags,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotifySwitchArgs {
    pub event_time: Instant,
    pub policy_flags: PolicyFlags,
    pub switch_values: u32,
    pub switch_mask: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotifyDeviceResetArgs {
    pub event_time: Instant,
    pub device_id: DeviceId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotifyPointerCaptureChangedArgs {
    pub event_time: Instant,
    pub request: PointerCaptureRequest,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotifyVibratorStateArgs {
    pub event_time: Instant,
    pub device_id: DeviceId,
    pub is_on: bool,
}

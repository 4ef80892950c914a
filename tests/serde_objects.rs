#![cfg(feature = "serde")]

use input_dispatch::{
    event::{
        DeviceId, KeyAction, KeyCode, KeyFlags, MetaState, MotionAction, MotionFlags, Pointer, PointerCoords,
        PointerId, PolicyFlags, SensorAccuracy, SensorType, Source, ToolType,
    },
    inject::{InjectionResult, InjectionSync},
    window::{
        ApplicationToken, DisplayId, DisplayInfo, InputToken, Pid, Rect, TouchOcclusionMode, Uid, WindowFlags,
    },
};
use serde::{Deserialize, Serialize};

#[allow(dead_code)]
fn needs_serde<S: Serialize + Deserialize<'static>>() {}

#[test]
fn events_serde() {
    needs_serde::<DeviceId>();
    needs_serde::<PointerId>();
    needs_serde::<Source>();
    needs_serde::<PolicyFlags>();
    needs_serde::<MetaState>();
    needs_serde::<KeyCode>();
    needs_serde::<KeyAction>();
    needs_serde::<KeyFlags>();
    needs_serde::<MotionAction>();
    needs_serde::<MotionFlags>();
    needs_serde::<ToolType>();
    needs_serde::<PointerCoords>();
    needs_serde::<Pointer>();
    needs_serde::<SensorType>();
    needs_serde::<SensorAccuracy>();
}

#[test]
fn window_serde() {
    needs_serde::<InputToken>();
    needs_serde::<ApplicationToken>();
    needs_serde::<DisplayId>();
    needs_serde::<DisplayInfo>();
    needs_serde::<Rect>();
    needs_serde::<WindowFlags>();
    needs_serde::<TouchOcclusionMode>();
    needs_serde::<Pid>();
    needs_serde::<Uid>();
}

#[test]
fn injection_serde() {
    needs_serde::<InjectionSync>();
    needs_serde::<InjectionResult>();
}

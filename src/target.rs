//! Resolved destinations of an event.

use std::time::Instant;

use bitflags::bitflags;

use crate::touch::PointerIdSet;
use crate::window::InputToken;

bitflags! {
    /// How an event is delivered to one target.
    ///
    /// The `DISPATCH_AS_*` bits select the form of the event; a target may carry several, and
    /// receives one copy per bit.
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub(crate) struct InputTargetFlags: u32 {
        /// The target consumes the event. Injection waits on foreground targets.
        const FOREGROUND = 1 << 0;
        const WINDOW_IS_OBSCURED = 1 << 1;
        /// Only the pointers in the target's set are delivered.
        const SPLIT = 1 << 2;
        /// Pointer coordinates are withheld.
        const ZERO_COORDS = 1 << 3;
        const DISPATCH_AS_IS = 1 << 8;
        const DISPATCH_AS_OUTSIDE = 1 << 9;
        const DISPATCH_AS_HOVER_ENTER = 1 << 10;
        const DISPATCH_AS_HOVER_EXIT = 1 << 11;
        const DISPATCH_AS_SLIPPERY_EXIT = 1 << 12;
        const DISPATCH_AS_SLIPPERY_ENTER = 1 << 13;
        const WINDOW_IS_PARTIALLY_OBSCURED = 1 << 14;

        const DISPATCH_MASK = Self::DISPATCH_AS_IS.bits()
            | Self::DISPATCH_AS_OUTSIDE.bits()
            | Self::DISPATCH_AS_HOVER_ENTER.bits()
            | Self::DISPATCH_AS_HOVER_EXIT.bits()
            | Self::DISPATCH_AS_SLIPPERY_EXIT.bits()
            | Self::DISPATCH_AS_SLIPPERY_ENTER.bits();
    }
}

impl InputTargetFlags {
    /// The dispatch modes in delivery order.
    pub const DISPATCH_MODES: [InputTargetFlags; 6] = [
        InputTargetFlags::DISPATCH_AS_HOVER_EXIT,
        InputTargetFlags::DISPATCH_AS_OUTSIDE,
        InputTargetFlags::DISPATCH_AS_HOVER_ENTER,
        InputTargetFlags::DISPATCH_AS_IS,
        InputTargetFlags::DISPATCH_AS_SLIPPERY_EXIT,
        InputTargetFlags::DISPATCH_AS_SLIPPERY_ENTER,
    ];
}

#[derive(Debug, Clone)]
pub(crate) struct InputTarget {
    pub token: InputToken,
    pub flags: InputTargetFlags,
    pub pointer_ids: PointerIdSet,
    /// When the target's own part of the gesture started, if that differs from the event.
    pub first_down_time: Option<Instant>,
}

/// Adds a target, merging it into an existing one for the same token.
pub(crate) fn add_target(
    targets: &mut Vec<InputTarget>,
    token: InputToken,
    flags: InputTargetFlags,
    pointer_ids: PointerIdSet,
    first_down_time: Option<Instant>,
) {
    if let Some(target) = targets.iter_mut().find(|target| target.token == token) {
        target.flags |= flags;
        target.pointer_ids = target.pointer_ids.union(pointer_ids);
        if target.first_down_time.is_none() {
            target.first_down_time = first_down_time;
        }
        return;
    }
    targets.push(InputTarget { token, flags, pointer_ids, first_down_time });
}

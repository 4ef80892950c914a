//! Work deferred until the dispatcher lock can be released.
//!
//! Locked code never calls the policy. It queues a [`Command`] instead, and the dispatch loop
//! runs the queue after the critical section, releasing the lock around each policy call.

use std::time::Instant;

use dpi::PhysicalPosition;
use smol_str::SmolStr;

use crate::entry::{EntryId, SensorEntry};
use crate::policy::{PointerCaptureRequest, UserActivityType};
use crate::window::{ApplicationInfo, DisplayId, InputToken, Pid};

#[derive(Debug, Clone)]
pub(crate) enum Command {
    NotifyConfigurationChanged { event_time: Instant },
    NoFocusedWindowAnr(ApplicationInfo),
    WindowUnresponsive { token: InputToken, pid: Option<Pid>, reason: String },
    WindowResponsive { token: InputToken, pid: Option<Pid> },
    InputChannelBroken(InputToken),
    FocusChanged { old_token: Option<InputToken>, new_token: Option<InputToken> },
    SensorEvent(SensorEntry),
    DropWindow { token: Option<InputToken>, position: PhysicalPosition<f32> },
    UntrustedTouch(SmolStr),
    SetPointerCapture(PointerCaptureRequest),
    /// Holds a reference on the entry until it runs.
    InterceptKeyBeforeDispatching { token: Option<InputToken>, entry: EntryId },
    DispatchCycleFinished { token: InputToken, seq: u32, handled: bool, finish_time: Instant },
    PokeUserActivity { event_time: Instant, activity: UserActivityType, display_id: DisplayId },
    PointerDownOutsideFocus(InputToken),
}

//! Result codes of event injection.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How long `inject_input_event` blocks.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum InjectionSync {
    /// Return as soon as the event is queued.
    #[default]
    None,
    /// Wait until the dispatcher has decided where the event goes.
    WaitForResult,
    /// Wait until every foreground window that received the event acknowledged it.
    WaitForFinished,
}

/// The outcome of an injection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum InjectionResult {
    /// The event was delivered, or consumed by the policy.
    Succeeded,
    /// The target window belongs to a different uid than the injector asked for.
    PermissionDenied,
    /// The event was invalid or no target could be found.
    Failed,
    /// The result did not arrive before the timeout.
    TimedOut,
    /// Not decided yet.
    Pending,
}

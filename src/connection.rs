//! Per-channel delivery state.

use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;

use crate::channel::InputChannel;
use crate::entry::EntryId;
use crate::event::{KeyAction, KeyFlags, MotionAction, MotionFlags};
use crate::input_state::InputState;
use crate::target::InputTargetFlags;
use crate::window::{DisplayId, InputToken, Pid};

/// The form an event takes for one particular target.
#[derive(Debug, Copy, Clone, PartialEq)]
pub(crate) enum ResolvedEvent {
    Key { action: KeyAction, flags: KeyFlags },
    Motion { action: MotionAction, flags: MotionFlags, down_time: Instant },
    /// Focus, drag, capture and touch mode entries are delivered as they are.
    Plain,
}

/// One event on its way to one connection.
#[derive(Debug, Clone)]
pub(crate) struct DispatchEntry {
    pub seq: u32,
    pub entry: EntryId,
    pub target_flags: InputTargetFlags,
    pub resolved: ResolvedEvent,
    pub delivery_time: Option<Instant>,
    pub timeout_time: Option<Instant>,
}

impl DispatchEntry {
    pub fn has_foreground_target(&self) -> bool {
        self.target_flags.contains(InputTargetFlags::FOREGROUND)
    }

    pub fn is_cancelation(&self) -> bool {
        match self.resolved {
            ResolvedEvent::Key { flags, .. } => flags.contains(KeyFlags::CANCELED),
            ResolvedEvent::Motion { action, .. } => action == MotionAction::Cancel,
            ResolvedEvent::Plain => false,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum ConnectionStatus {
    Normal,
    /// A publish failed or the consumer went away.
    Broken,
    /// Unregistered; kept only until in-flight commands are done with it.
    Zombie,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            ConnectionStatus::Normal => "NORMAL",
            ConnectionStatus::Broken => "BROKEN",
            ConnectionStatus::Zombie => "ZOMBIE",
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Responsiveness {
    Responsive,
    /// A deadline passed and the policy is about to be told.
    WaitingForAnr,
    AnrNotified,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct MonitorInfo {
    pub display_id: DisplayId,
    pub pid: Pid,
}

#[derive(Debug)]
pub(crate) struct Connection {
    pub channel: InputChannel,
    pub monitor: Option<MonitorInfo>,
    pub status: ConnectionStatus,
    pub responsiveness: Responsiveness,
    /// The channel was full the last time a publish was attempted.
    pub publisher_blocked: bool,
    /// Entries not yet published.
    pub outbound: VecDeque<DispatchEntry>,
    /// Entries published and waiting for their acknowledgement.
    pub wait: VecDeque<DispatchEntry>,
    pub input_state: InputState,
    next_seq: u32,
}

impl Connection {
    pub fn new(channel: InputChannel, monitor: Option<MonitorInfo>) -> Self {
        Self {
            channel,
            monitor,
            status: ConnectionStatus::Normal,
            responsiveness: Responsiveness::Responsive,
            publisher_blocked: false,
            outbound: VecDeque::new(),
            wait: VecDeque::new(),
            input_state: InputState::default(),
            next_seq: 0,
        }
    }

    pub fn token(&self) -> InputToken {
        self.channel.token()
    }

    pub fn name(&self) -> &str {
        self.channel.name()
    }

    pub fn is_responsive(&self) -> bool {
        self.responsiveness == Responsiveness::Responsive
    }

    /// Next sequence number; never zero.
    pub fn next_seq(&mut self) -> u32 {
        self.next_seq = self.next_seq.wrapping_add(1);
        if self.next_seq == 0 {
            self.next_seq = 1;
        }
        self.next_seq
    }

    pub fn find_wait_entry(&self, seq: u32) -> Option<usize> {
        self.wait.iter().position(|dispatch| dispatch.seq == seq)
    }

    /// Whether no published entry has passed its deadline.
    pub fn has_no_overdue_entries(&self, now: Instant) -> bool {
        self.wait.iter().all(|dispatch| dispatch.timeout_time.map_or(true, |timeout| timeout >= now))
    }
}

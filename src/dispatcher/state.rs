//! Everything the dispatcher lock guards.
//!
//! [`DispatcherState`] has no access to the policy. Code that needs a policy decision queues a
//! [`Command`] and the owner of the lock runs it once the critical section is over.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::anr::AnrTracker;
use crate::command::Command;
use crate::config::DispatcherConfiguration;
use crate::connection::Connection;
use crate::entry::{EntryArena, EntryId, EntryKind};
use crate::event::{PointerId, PolicyFlags};
use crate::focus::FocusResolver;
use crate::hmac::HmacKeyManager;
use crate::inject::InjectionResult;
use crate::injection::{InjectionId, Injections};
use crate::latency::{InteractionTracker, LatencyTracker};
use crate::policy::PointerCaptureRequest;
use crate::ring_buffer::RingBuffer;
use crate::touch::TouchState;
use crate::window::{ApplicationInfo, DisplayId, DisplayInfo, InputToken, WindowInfo};

/// Entries kept after dispatch for diagnostics.
pub(crate) const RECENT_QUEUE_MAX_SIZE: usize = 10;
/// How long after an app switch key is released pending events are dropped.
pub(crate) const APP_SWITCH_TIMEOUT: Duration = Duration::from_millis(500);
/// How long a key waits for other connections to catch up.
pub(crate) const KEY_WAITING_FOR_EVENTS_TIMEOUT: Duration = Duration::from_millis(500);
/// Consumers taking longer than this to acknowledge are logged.
pub(crate) const SLOW_EVENT_PROCESSING_WARNING_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Default)]
pub(crate) struct KeyRepeatState {
    pub last_key_entry: Option<EntryId>,
    pub next_repeat_time: Option<Instant>,
}

#[derive(Debug, Clone)]
pub(crate) struct DragState {
    pub drag_window: Arc<WindowInfo>,
    pub pointer_id: PointerId,
    /// The window last sent a drag location, other than the drag window.
    pub hover_window: Option<InputToken>,
}

#[derive(Debug, Default)]
pub(crate) struct PointerCaptureState {
    pub current_request: PointerCaptureRequest,
    /// The window that was told it holds capture.
    pub window: Option<InputToken>,
}

pub(crate) struct DispatcherState {
    pub config: DispatcherConfiguration,
    pub hmac: HmacKeyManager,

    pub arena: EntryArena,
    pub injections: Injections,
    pub inbound: VecDeque<EntryId>,
    pub recent: RingBuffer<EntryId>,
    pub pending_event: Option<EntryId>,
    pub next_unblocked_event: Option<EntryId>,
    pub commands: VecDeque<Command>,

    pub connections: HashMap<InputToken, Connection>,
    pub global_monitors: HashMap<DisplayId, Vec<InputToken>>,
    pub next_token: u64,

    pub windows: HashMap<DisplayId, Vec<Arc<WindowInfo>>>,
    pub displays: HashMap<DisplayId, DisplayInfo>,
    pub touch_states: HashMap<DisplayId, TouchState>,
    pub hover_windows: HashMap<DisplayId, InputToken>,
    pub focus: FocusResolver,
    pub focused_applications: HashMap<DisplayId, ApplicationInfo>,
    pub focused_display: DisplayId,
    pub no_focused_window_timeout: Option<Instant>,
    pub awaited_focused_application: Option<ApplicationInfo>,
    pub awaited_application_display: DisplayId,
    pub touch_mode: HashMap<DisplayId, bool>,
    pub pointer_capture: PointerCaptureState,
    pub ineligible_pointer_capture_displays: HashSet<DisplayId>,
    pub drag: Option<DragState>,

    pub anr_tracker: AnrTracker,
    pub last_anr_state: String,
    pub key_repeat: KeyRepeatState,
    pub app_switch_due_time: Option<Instant>,
    pub app_switch_saw_key_down: bool,
    pub key_waiting_for_events_timeout: Option<Instant>,

    pub dispatch_enabled: bool,
    pub dispatch_frozen: bool,
    pub input_filter_enabled: bool,

    pub interactions: InteractionTracker,
    pub latency: LatencyTracker,

    /// A wake-up arrived since the loop last looked.
    pub wake_pending: bool,
    pub exit_requested: bool,
    pub running: bool,
    /// Incremented on every loop iteration, for `monitor`.
    pub loop_generation: u64,
}

impl DispatcherState {
    pub fn new(config: DispatcherConfiguration, hmac: HmacKeyManager) -> Self {
        Self {
            config,
            hmac,
            arena: EntryArena::default(),
            injections: Injections::default(),
            inbound: VecDeque::new(),
            recent: RingBuffer::with_capacity(RECENT_QUEUE_MAX_SIZE),
            pending_event: None,
            next_unblocked_event: None,
            commands: VecDeque::new(),
            connections: HashMap::new(),
            global_monitors: HashMap::new(),
            next_token: 0,
            windows: HashMap::new(),
            displays: HashMap::new(),
            touch_states: HashMap::new(),
            hover_windows: HashMap::new(),
            focus: FocusResolver::default(),
            focused_applications: HashMap::new(),
            focused_display: DisplayId::DEFAULT,
            no_focused_window_timeout: None,
            awaited_focused_application: None,
            awaited_application_display: DisplayId::NONE,
            touch_mode: HashMap::new(),
            pointer_capture: PointerCaptureState::default(),
            ineligible_pointer_capture_displays: HashSet::new(),
            drag: None,
            anr_tracker: AnrTracker::default(),
            last_anr_state: String::new(),
            key_repeat: KeyRepeatState::default(),
            app_switch_due_time: None,
            app_switch_saw_key_down: false,
            key_waiting_for_events_timeout: None,
            dispatch_enabled: true,
            dispatch_frozen: false,
            input_filter_enabled: false,
            interactions: InteractionTracker::default(),
            latency: LatencyTracker::default(),
            wake_pending: false,
            exit_requested: false,
            running: false,
            loop_generation: 0,
        }
    }

    pub fn post_command(&mut self, command: Command) {
        self.commands.push_back(command);
    }

    pub fn allocate_token(&mut self) -> InputToken {
        self.next_token += 1;
        InputToken::from(self.next_token)
    }

    // Entries

    pub fn new_entry(
        &mut self,
        event_time: Instant,
        policy_flags: PolicyFlags,
        injection: Option<InjectionId>,
        kind: EntryKind,
    ) -> EntryId {
        if let Some(injection) = injection {
            self.injections.attach(injection);
        }
        self.arena.allocate(event_time, policy_flags, injection, kind)
    }

    pub fn acquire_entry(&mut self, id: EntryId) {
        self.arena.acquire(id);
    }

    pub fn release_entry(&mut self, id: EntryId) {
        if let Some(entry) = self.arena.release(id) {
            if let Some(injection) = entry.injection {
                self.injections.detach(injection);
            }
        }
    }

    pub fn set_injection_result(&mut self, id: EntryId, result: InjectionResult) {
        let Some(injection) = self.arena.get(id).and_then(|entry| entry.injection) else { return };
        debug!("Setting injection result to {result:?}");
        self.injections.set_result(injection, result);
    }

    /// Done with an entry taken off the inbound queue.
    pub fn release_inbound_event(&mut self, id: EntryId) {
        if let Some(injection) = self.arena.get(id).and_then(|entry| entry.injection) {
            // Nothing delivered it, so whoever waits on it failed.
            self.injections.set_result(injection, InjectionResult::Failed);
        }
        if self.next_unblocked_event == Some(id) {
            self.next_unblocked_event = None;
        }
        self.add_recent_event(id);
        self.release_entry(id);
    }

    fn add_recent_event(&mut self, id: EntryId) {
        // Keys and motions are what anyone reading a dump cares about.
        let interesting = self
            .arena
            .get(id)
            .is_some_and(|entry| matches!(entry.kind, EntryKind::Key(_) | EntryKind::Motion(_)));
        if !interesting {
            return;
        }
        self.acquire_entry(id);
        if let Some(evicted) = self.recent.push_back(id) {
            self.release_entry(evicted);
        }
    }

    pub fn release_pending_event(&mut self) {
        if let Some(id) = self.pending_event.take() {
            self.release_inbound_event(id);
        }
    }

    pub fn drain_inbound_queue(&mut self) {
        while let Some(id) = self.inbound.pop_front() {
            self.release_inbound_event(id);
        }
    }

    pub fn reset_key_repeat(&mut self) {
        if let Some(id) = self.key_repeat.last_key_entry.take() {
            self.release_entry(id);
        }
        self.key_repeat.next_repeat_time = None;
    }

    pub fn reset_no_focused_window_timeout(&mut self) {
        self.no_focused_window_timeout = None;
        self.awaited_focused_application = None;
    }

    pub fn reset_pending_app_switch(&mut self, handled: bool) {
        self.app_switch_due_time = None;
        if handled {
            debug!("App switch has arrived");
        } else {
            debug!("App switch was abandoned");
        }
    }

    // Windows

    pub fn window_handles(&self, display_id: DisplayId) -> &[Arc<WindowInfo>] {
        self.windows.get(&display_id).map_or(&[][..], Vec::as_slice)
    }

    pub fn window_by_token(&self, token: InputToken) -> Option<&Arc<WindowInfo>> {
        self.windows.values().flatten().find(|window| window.token == token)
    }

    pub fn window_by_token_on(&self, token: InputToken, display_id: DisplayId) -> Option<&Arc<WindowInfo>> {
        self.window_handles(display_id).iter().find(|window| window.token == token)
    }

    /// Resolves `DisplayId::NONE` to the focused display.
    pub fn target_display(&self, display_id: DisplayId) -> DisplayId {
        if display_id == DisplayId::NONE {
            self.focused_display
        } else {
            display_id
        }
    }

    pub fn focused_window(&self, display_id: DisplayId) -> Option<&Arc<WindowInfo>> {
        let token = self.focus.focused_window_token(display_id)?;
        self.window_by_token_on(token, display_id)
    }

    pub fn in_touch_mode(&self, display_id: DisplayId) -> bool {
        self.touch_mode.get(&display_id).copied().unwrap_or(true)
    }

    /// The dispatching timeout of a connection.
    pub fn dispatching_timeout(&self, token: InputToken) -> Duration {
        let Some(connection) = self.connections.get(&token) else {
            return self.config.default_dispatching_timeout;
        };
        if connection.monitor.is_some() {
            return self.config.monitor_dispatching_timeout;
        }
        self.window_by_token(token)
            .map_or(self.config.default_dispatching_timeout, |window| window.dispatching_timeout)
    }

    /// Whether a gesture or a queued event still targets the display.
    pub fn display_has_activity(&self, display_id: DisplayId) -> bool {
        let touching = self.touch_states.get(&display_id).is_some_and(|state| state.down);
        let queued = self
            .inbound
            .iter()
            .chain(self.pending_event.iter())
            .filter_map(|id| self.arena.get(*id))
            .any(|entry| entry.display_id() == Some(display_id));
        touching || queued
    }

    pub fn log_dispatch_state_change(&self) {
        info!(
            "Dispatch state: enabled={}, frozen={}, input filter={}",
            self.dispatch_enabled, self.dispatch_frozen, self.input_filter_enabled
        );
    }
}

//! The dispatch engine.
//!
//! [`InputDispatcher`] owns one [`DispatcherState`] behind a single lock. Producers lock it
//! briefly to queue work; the dispatch loop locks it to drain the queue. The policy is only
//! ever called from [`Inner::run_command`] and the public entry points, never while the state
//! is locked.

use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, info, trace, warn};

use crate::channel::{DispatcherWaker, InputChannel, InputConsumer, WakeUpProvider, DEFAULT_CHANNEL_CAPACITY};
use crate::command::Command;
use crate::connection::{Connection, MonitorInfo, Responsiveness};
use crate::entry::{EntryKind, InterceptState, KeyEntry, SensorEntry};
use crate::error::DispatchError;
use crate::event::{DeviceId, InputEvent, KeyFlags, PolicyFlags, SensorType};
use crate::hmac::HmacKeyManager;
use crate::inject::{InjectionResult, InjectionSync};
use crate::input_state::{CancelationMode, CancelationOptions};
use crate::notify::{
    NotifyConfigurationChangedArgs, NotifyDeviceResetArgs, NotifyKeyArgs, NotifyMotionArgs, NotifyPointerCaptureChangedArgs,
    NotifySensorArgs, NotifySwitchArgs, NotifyVibratorStateArgs,
};
use crate::policy::DispatcherPolicy;
use crate::verify::VerifiedInputEvent;
use crate::window::{
    ApplicationInfo, DisplayId, FocusRequest, InputToken, Pid, Uid, WindowInfo, WindowInfosUpdate,
};

mod cancel;
mod cycle;
mod dump;
mod inbound;
pub(crate) mod state;
mod targets;
mod windows;

use self::state::DispatcherState;

/// How long `monitor` and `wait_for_idle` wait for the loop.
const IDLE_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

struct Inner {
    state: Mutex<DispatcherState>,
    /// The dispatch loop sleeps on this.
    wake: Condvar,
    /// Injectors wait on this for results and finished dispatches.
    injection_done: Condvar,
    idle: Condvar,
    alive: Condvar,
    policy: Box<dyn DispatcherPolicy>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// Wakes the loop when a consumer acknowledges or closes its channel.
#[derive(Debug)]
struct LoopWaker {
    inner: Weak<Inner>,
}

impl WakeUpProvider for LoopWaker {
    fn wake_up(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.wake_loop();
        }
    }
}

impl Inner {
    fn wake_loop(&self) {
        let mut state = self.state.lock();
        state.wake_pending = true;
        self.wake.notify_one();
    }

    fn thread_loop(&self) {
        debug!("Dispatch thread started");
        let mut state = self.state.lock();
        while !state.exit_requested {
            let next_wakeup = self.dispatch_once_locked(&mut state);
            if state.exit_requested {
                break;
            }
            self.wait_for_work(&mut state, next_wakeup);
        }
        state.running = false;
        debug!("Dispatch thread exiting");
    }

    fn wait_for_work(&self, state: &mut MutexGuard<'_, DispatcherState>, next_wakeup: Option<Instant>) {
        if !state.wake_pending {
            match next_wakeup {
                Some(deadline) if deadline <= Instant::now() => {},
                Some(deadline) => {
                    trace!("Dispatch loop sleeping for {:?}", deadline.saturating_duration_since(Instant::now()));
                    self.wake.wait_until(state, deadline);
                },
                None => self.wake.wait(state),
            }
        }
        state.wake_pending = false;
    }

    /// One iteration of the loop. Returns when the next one is due, `None` meaning "when woken".
    fn dispatch_once_locked(&self, state: &mut MutexGuard<'_, DispatcherState>) -> Option<Instant> {
        let now = Instant::now();
        state.wake_pending = false;
        state.receive_finished_signals();

        let mut next_wakeup = None;
        // Commands first: they may change what the next event should do.
        if state.commands.is_empty() {
            state.dispatch_once_inner(now, &mut next_wakeup);
        }
        if self.run_commands(state) {
            next_wakeup = Some(now);
        }

        if let Some(anr_check) = state.process_anrs(now) {
            inbound::wake_at(&mut next_wakeup, anr_check);
        }
        if state.injections.dirty {
            state.injections.dirty = false;
            self.injection_done.notify_all();
        }

        if next_wakeup.is_none() {
            self.idle.notify_all();
        }
        state.loop_generation = state.loop_generation.wrapping_add(1);
        self.alive.notify_all();
        next_wakeup
    }

    /// Runs queued commands. Returns whether there were any.
    fn run_commands(&self, state: &mut MutexGuard<'_, DispatcherState>) -> bool {
        if state.commands.is_empty() {
            return false;
        }
        while let Some(command) = state.commands.pop_front() {
            self.run_command(state, command);
        }
        true
    }

    fn run_command(&self, state: &mut MutexGuard<'_, DispatcherState>, command: Command) {
        let policy = &*self.policy;
        match command {
            Command::NotifyConfigurationChanged { event_time } => {
                MutexGuard::unlocked(state, || policy.notify_configuration_changed(event_time));
            },
            Command::NoFocusedWindowAnr(application) => {
                MutexGuard::unlocked(state, || policy.notify_no_focused_window_anr(&application));
            },
            Command::WindowUnresponsive { token, pid, reason } => {
                MutexGuard::unlocked(state, || policy.notify_window_unresponsive(token, pid, &reason));
                if let Some(connection) = state.connections.get_mut(&token) {
                    if connection.responsiveness == Responsiveness::WaitingForAnr {
                        connection.responsiveness = Responsiveness::AnrNotified;
                    }
                }
            },
            Command::WindowResponsive { token, pid } => {
                MutexGuard::unlocked(state, || policy.notify_window_responsive(token, pid));
            },
            Command::InputChannelBroken(token) => {
                MutexGuard::unlocked(state, || policy.notify_input_channel_broken(token));
            },
            Command::FocusChanged { old_token, new_token } => {
                MutexGuard::unlocked(state, || policy.notify_focus_changed(old_token, new_token));
            },
            Command::SensorEvent(sensor) => {
                MutexGuard::unlocked(state, || {
                    policy.notify_sensor_event(
                        sensor.device_id,
                        sensor.sensor_type,
                        sensor.accuracy,
                        sensor.hw_timestamp,
                        &sensor.values,
                    )
                });
            },
            Command::DropWindow { token, position } => {
                MutexGuard::unlocked(state, || policy.notify_drop_window(token, position));
            },
            Command::UntrustedTouch(name) => {
                MutexGuard::unlocked(state, || policy.notify_untrusted_touch(&name));
            },
            Command::SetPointerCapture(request) => {
                MutexGuard::unlocked(state, || policy.set_pointer_capture(&request));
            },
            Command::InterceptKeyBeforeDispatching { token, entry } => {
                let key = state
                    .arena
                    .get(entry)
                    .and_then(|queued| Some((queued.key()?.event.clone(), queued.policy_flags)));
                if let Some((event, policy_flags)) = key {
                    let result = MutexGuard::unlocked(state, || {
                        policy.intercept_key_before_dispatching(token, &event, policy_flags)
                    });
                    state.apply_intercept_result(Instant::now(), entry, result);
                }
                state.release_entry(entry);
            },
            Command::DispatchCycleFinished { token, seq, handled, finish_time } => {
                let unhandled = match state.begin_cycle_finished(token, seq, handled, finish_time) {
                    Some(request) => {
                        let fallback = MutexGuard::unlocked(state, || {
                            policy.dispatch_unhandled_key(request.token, &request.event, request.policy_flags)
                        });
                        Some((request, fallback))
                    },
                    None => None,
                };
                state.complete_cycle_finished(Instant::now(), token, seq, unhandled);
            },
            Command::PokeUserActivity { event_time, activity, display_id } => {
                MutexGuard::unlocked(state, || policy.poke_user_activity(event_time, activity, display_id));
            },
            Command::PointerDownOutsideFocus(token) => {
                MutexGuard::unlocked(state, || policy.on_pointer_down_outside_focus(token));
            },
        }
    }

    /// Applies `f` to the state and wakes the loop when it reports new work.
    fn with_state<R>(&self, f: impl FnOnce(&mut DispatcherState) -> (R, bool)) -> R {
        let mut state = self.state.lock();
        let (result, need_wake) = f(&mut state);
        if need_wake {
            state.wake_pending = true;
            self.wake.notify_one();
        }
        result
    }
}

/// Routes input events from devices to the windows and monitors that should receive them.
///
/// Producers call the `notify_*` methods from any thread. Delivery happens on the dispatch
/// thread started by [`InputDispatcher::start`], or on whichever thread calls
/// [`InputDispatcher::dispatch_once`].
pub struct InputDispatcher {
    inner: Arc<Inner>,
}

impl InputDispatcher {
    /// Creates a stopped dispatcher. The configuration comes from the policy.
    pub fn new(policy: impl DispatcherPolicy + 'static) -> Result<Self, DispatchError> {
        let config = policy.dispatcher_configuration();
        let hmac = HmacKeyManager::new()?;
        let inner = Arc::new(Inner {
            state: Mutex::new(DispatcherState::new(config, hmac)),
            wake: Condvar::new(),
            injection_done: Condvar::new(),
            idle: Condvar::new(),
            alive: Condvar::new(),
            policy: Box::new(policy),
            thread: Mutex::new(None),
        });
        Ok(Self { inner })
    }

    /// Spawns the dispatch thread.
    pub fn start(&self) -> Result<(), DispatchError> {
        let mut thread = self.inner.thread.lock();
        if thread.is_some() {
            return Err(DispatchError::AlreadyRunning);
        }
        {
            let mut state = self.inner.state.lock();
            state.exit_requested = false;
            state.running = true;
        }
        let inner = self.inner.clone();
        let handle = thread::Builder::new().name("InputDispatcher".into()).spawn(move || inner.thread_loop());
        match handle {
            Ok(handle) => {
                *thread = Some(handle);
                Ok(())
            },
            Err(err) => {
                self.inner.state.lock().running = false;
                Err(err.into())
            },
        }
    }

    /// Stops the dispatch thread and waits for it to exit.
    pub fn stop(&self) -> Result<(), DispatchError> {
        let Some(handle) = self.inner.thread.lock().take() else {
            return Err(DispatchError::NotRunning);
        };
        {
            let mut state = self.inner.state.lock();
            state.exit_requested = true;
            self.inner.wake.notify_one();
        }
        if handle.join().is_err() {
            warn!("Dispatch thread panicked");
        }
        Ok(())
    }

    /// Runs one loop iteration on the calling thread. Returns when the next iteration is due,
    /// or `None` when nothing is scheduled.
    pub fn dispatch_once(&self) -> Option<Instant> {
        let mut state = self.inner.state.lock();
        self.inner.dispatch_once_locked(&mut state)
    }

    fn waker(&self) -> DispatcherWaker {
        DispatcherWaker::new(Arc::new(LoopWaker { inner: Arc::downgrade(&self.inner) }))
    }

    // Device layer

    pub fn notify_configuration_changed(&self, args: &NotifyConfigurationChangedArgs) {
        debug!("notifyConfigurationChanged - eventTime={:?}", args.event_time);
        self.inner.with_state(|state| {
            let id = state.new_entry(args.event_time, PolicyFlags::PASS_TO_USER, None, EntryKind::ConfigurationChanged);
            ((), state.enqueue_inbound(id))
        });
    }

    /// Runs the input filter outside the lock. Returns `false` when it consumed the event.
    fn pass_input_filter(&self, event: &InputEvent, policy_flags: &mut PolicyFlags) -> bool {
        if !self.inner.state.lock().input_filter_enabled {
            return true;
        }
        *policy_flags |= PolicyFlags::FILTERED;
        self.inner.policy.filter_input_event(event, *policy_flags)
    }

    pub fn notify_key(&self, args: &NotifyKeyArgs) {
        let mut event = args.event.clone();
        let mut policy_flags = args.policy_flags | PolicyFlags::TRUSTED;
        if policy_flags.contains(PolicyFlags::VIRTUAL) {
            event.flags |= KeyFlags::VIRTUAL_HARD_KEY;
        }
        debug!("notifyKey - device={:?}, action={:?}, keyCode={}", event.device_id, event.action, event.key_code.0);

        self.inner.policy.intercept_key_before_queueing(&event, &mut policy_flags);
        let event = InputEvent::Key(event);
        if !self.pass_input_filter(&event, &mut policy_flags) {
            return;
        }
        let InputEvent::Key(event) = event else { return };
        self.inner.with_state(|state| {
            let key = KeyEntry { event, synthetic_repeat: false, intercept: InterceptState::Unknown, intercept_wakeup_time: None };
            let id = state.new_entry(key.event.event_time, policy_flags, None, EntryKind::Key(key));
            ((), state.enqueue_inbound(id))
        });
    }

    pub fn notify_motion(&self, args: &NotifyMotionArgs) {
        if let Err(reason) = args.event.validate() {
            warn!("Dropping invalid motion event: {reason}");
            return;
        }
        let mut policy_flags = args.policy_flags | PolicyFlags::TRUSTED;
        trace!("notifyMotion - {:?}", args.event);

        self.inner.policy.intercept_motion_before_queueing(args.event.display_id, args.event.event_time, &mut policy_flags);
        let event = InputEvent::Motion(args.event.clone());
        if !self.pass_input_filter(&event, &mut policy_flags) {
            return;
        }
        let InputEvent::Motion(event) = event else { return };
        self.inner.with_state(|state| {
            let id = state.new_entry(event.event_time, policy_flags, None, EntryKind::Motion(event));
            ((), state.enqueue_inbound(id))
        });
    }

    pub fn notify_sensor(&self, args: &NotifySensorArgs) {
        debug!(
            "notifySensor - device={:?}, sensor={:?}, accuracy={:?}",
            args.device_id, args.sensor_type, args.accuracy
        );
        let sensor = SensorEntry {
            device_id: args.device_id,
            sensor_type: args.sensor_type,
            accuracy: args.accuracy,
            hw_timestamp: args.hw_timestamp,
            values: args.values.clone(),
        };
        let policy_flags = args.policy_flags | PolicyFlags::TRUSTED;
        self.inner.with_state(|state| {
            let id = state.new_entry(args.event_time, policy_flags, None, EntryKind::Sensor(sensor));
            ((), state.enqueue_inbound(id))
        });
    }

    /// Switches skip the queue and go straight to the policy.
    pub fn notify_switch(&self, args: &NotifySwitchArgs) {
        debug!("notifySwitch - values={:#x}, mask={:#x}", args.switch_values, args.switch_mask);
        let policy_flags = args.policy_flags | PolicyFlags::TRUSTED;
        self.inner.policy.notify_switch(args.event_time, args.switch_values, args.switch_mask, policy_flags);
    }

    pub fn notify_device_reset(&self, args: &NotifyDeviceResetArgs) {
        debug!("notifyDeviceReset - device={:?}", args.device_id);
        self.inner.with_state(|state| {
            let kind = EntryKind::DeviceReset { device_id: args.device_id };
            let id = state.new_entry(args.event_time, PolicyFlags::PASS_TO_USER, None, kind);
            ((), state.enqueue_inbound(id))
        });
    }

    pub fn notify_pointer_capture_changed(&self, args: &NotifyPointerCaptureChangedArgs) {
        debug!("notifyPointerCaptureChanged - enable={}", args.request.enable);
        self.inner.with_state(|state| {
            let kind = EntryKind::PointerCaptureChanged(args.request);
            let id = state.new_entry(args.event_time, PolicyFlags::PASS_TO_USER, None, kind);
            ((), state.enqueue_inbound(id))
        });
    }

    pub fn notify_vibrator_state(&self, args: &NotifyVibratorStateArgs) {
        debug!("notifyVibratorState - device={:?}, isOn={}", args.device_id, args.is_on);
    }

    // Injection

    /// Queues an event on behalf of an injector.
    ///
    /// With `target_uid` set, every window the event goes to must belong to that uid. Unless
    /// `sync` is [`InjectionSync::None`], this blocks for at most `timeout`.
    pub fn inject_input_event(
        &self,
        event: InputEvent,
        target_uid: Option<Uid>,
        sync: InjectionSync,
        timeout: Duration,
        policy_flags: PolicyFlags,
    ) -> InjectionResult {
        let mut policy_flags = policy_flags | PolicyFlags::INJECTED | PolicyFlags::TRUSTED;
        let kind = match event {
            InputEvent::Key(mut event) => {
                if policy_flags.contains(PolicyFlags::VIRTUAL) {
                    event.flags |= KeyFlags::VIRTUAL_HARD_KEY;
                }
                if !policy_flags.contains(PolicyFlags::FILTERED) {
                    self.inner.policy.intercept_key_before_queueing(&event, &mut policy_flags);
                }
                let intercept = InterceptState::Unknown;
                EntryKind::Key(KeyEntry { event, synthetic_repeat: false, intercept, intercept_wakeup_time: None })
            },
            InputEvent::Motion(event) => {
                if let Err(reason) = event.validate() {
                    warn!("Rejecting injected motion event: {reason}");
                    return InjectionResult::Failed;
                }
                if !policy_flags.contains(PolicyFlags::FILTERED) {
                    self.inner.policy.intercept_motion_before_queueing(event.display_id, event.event_time, &mut policy_flags);
                }
                EntryKind::Motion(event)
            },
        };

        let is_async = sync == InjectionSync::None;
        let end_time = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        let injection = state.injections.create(target_uid, is_async);
        let event_time = match &kind {
            EntryKind::Key(key) => key.event.event_time,
            EntryKind::Motion(motion) => motion.event_time,
            _ => Instant::now(),
        };
        let id = state.new_entry(event_time, policy_flags, Some(injection), kind);
        if state.enqueue_inbound(id) {
            state.wake_pending = true;
            self.inner.wake.notify_one();
        }
        if is_async {
            debug!("Injection is asynchronous");
            return InjectionResult::Succeeded;
        }

        let mut result = loop {
            let current = state.injections.get(injection).map_or(InjectionResult::Failed, |injection| injection.result);
            if current != InjectionResult::Pending {
                break current;
            }
            if self.inner.injection_done.wait_until(&mut state, end_time).timed_out() {
                let current = state.injections.get(injection).map_or(InjectionResult::Failed, |injection| injection.result);
                if current == InjectionResult::Pending {
                    debug!("Timed out waiting for injection result to become available.");
                    break InjectionResult::TimedOut;
                }
                break current;
            }
        };

        if result == InjectionResult::Succeeded && sync == InjectionSync::WaitForFinished {
            loop {
                let pending = state.injections.get(injection).map_or(0, |injection| injection.pending_foreground_dispatches);
                if pending == 0 {
                    break;
                }
                debug!("Waiting for {pending} pending foreground dispatches.");
                if self.inner.injection_done.wait_until(&mut state, end_time).timed_out()
                    && state.injections.get(injection).is_some_and(|injection| injection.pending_foreground_dispatches != 0)
                {
                    debug!("Timed out waiting for pending foreground dispatches to finish.");
                    result = InjectionResult::TimedOut;
                    break;
                }
            }
        }
        state.injections.remove(injection);
        debug!("Injection finished with result {result:?}");
        result
    }

    /// Checks that `event` was signed by this dispatcher.
    pub fn verify_input_event(&self, event: &InputEvent) -> Option<VerifiedInputEvent> {
        let hmac = match event {
            InputEvent::Key(key) => &key.hmac,
            InputEvent::Motion(motion) => &motion.hmac,
        };
        let verified = VerifiedInputEvent::from(event);
        let state = self.inner.state.lock();
        state.hmac.verify(&verified, hmac).then_some(verified)
    }

    // Registration

    /// Registers a channel for a window. Put the consumer's token into its [`WindowInfo`].
    pub fn create_input_channel(&self, name: &str) -> Result<InputConsumer, DispatchError> {
        let waker = self.waker();
        self.inner.with_state(|state| {
            let token = state.allocate_token();
            let (channel, consumer) = InputChannel::open_pair(name, token, DEFAULT_CHANNEL_CAPACITY, waker);
            debug!("channel '{name}' ~ createInputChannel");
            state.connections.insert(token, Connection::new(channel, None));
            (Ok(consumer), false)
        })
    }

    /// Registers a monitor that gets every pointer event of a display.
    pub fn create_input_monitor(&self, display_id: DisplayId, name: &str, pid: Pid) -> Result<InputConsumer, DispatchError> {
        if i32::from(display_id) < 0 {
            return Err(DispatchError::InvalidDisplay(display_id));
        }
        let waker = self.waker();
        self.inner.with_state(|state| {
            let token = state.allocate_token();
            let (channel, consumer) = InputChannel::open_pair(name, token, DEFAULT_CHANNEL_CAPACITY, waker);
            info!("channel '{name}' ~ createInputMonitor on display {display_id:?}");
            state.connections.insert(token, Connection::new(channel, Some(MonitorInfo { display_id, pid })));
            state.global_monitors.entry(display_id).or_default().push(token);
            (Ok(consumer), false)
        })
    }

    /// Unregisters a channel. Streams still open on it are cancelled first.
    pub fn remove_input_channel(&self, token: InputToken) -> Result<(), DispatchError> {
        self.inner.with_state(|state| {
            if !state.connections.contains_key(&token) {
                return (Err(DispatchError::UnknownToken(token)), false);
            }
            let options = CancelationOptions::new(CancelationMode::AllEvents, "input channel removed");
            state.synthesize_cancelation_events_for_connection(token, &options);
            state.flush_cancelations(token);
            state.remove_connection(token, false);
            (Ok(()), true)
        })
    }

    /// Hands the rest of the gesture to the spy window owning `token`.
    pub fn pilfer_pointers(&self, token: InputToken) -> Result<(), DispatchError> {
        self.inner.with_state(|state| {
            let result = state.pilfer_pointers(token);
            let wake = result.is_ok();
            (result, wake)
        })
    }

    // Window manager

    /// Replaces the windows of a display. Windows are listed top-most first.
    pub fn set_input_windows(&self, windows: Vec<WindowInfo>, display_id: DisplayId) {
        self.inner.with_state(|state| {
            state.set_input_windows(windows, display_id);
            ((), true)
        });
    }

    pub fn on_window_infos_changed(&self, update: WindowInfosUpdate) {
        self.inner.with_state(|state| {
            state.on_window_infos_changed(update);
            ((), true)
        });
    }

    pub fn set_focused_application(&self, display_id: DisplayId, application: Option<ApplicationInfo>) {
        self.inner.with_state(|state| {
            state.set_focused_application(display_id, application);
            ((), true)
        });
    }

    pub fn set_focused_window(&self, request: FocusRequest) {
        self.inner.with_state(|state| {
            state.set_focused_window(request);
            ((), true)
        });
    }

    pub fn set_focused_display(&self, display_id: DisplayId) {
        self.inner.with_state(|state| {
            state.set_focused_display(display_id);
            ((), true)
        });
    }

    /// Changes the touch mode of a display. Returns whether it changed.
    pub fn set_in_touch_mode(&self, in_touch_mode: bool, pid: Pid, uid: Uid, has_permission: bool, display_id: DisplayId) -> bool {
        self.inner.with_state(|state| {
            let changed = state.set_in_touch_mode(in_touch_mode, pid, uid, has_permission, display_id);
            (changed, changed)
        })
    }

    pub fn set_maximum_obscuring_opacity_for_touch(&self, opacity: f32) -> Result<(), DispatchError> {
        if !(0.0..=1.0).contains(&opacity) {
            return Err(DispatchError::InvalidArgument("obscuring opacity must be within 0.0..=1.0"));
        }
        self.inner.state.lock().config.maximum_obscuring_opacity_for_touch = opacity;
        Ok(())
    }

    pub fn request_pointer_capture(&self, token: InputToken, enabled: bool) {
        self.inner.with_state(|state| {
            state.request_pointer_capture(token, enabled);
            ((), !state.commands.is_empty())
        });
    }

    pub fn set_display_eligibility_for_pointer_capture(&self, display_id: DisplayId, eligible: bool) {
        self.inner.state.lock().set_display_eligibility_for_pointer_capture(display_id, eligible);
    }

    pub fn display_removed(&self, display_id: DisplayId) {
        self.inner.with_state(|state| {
            state.display_removed(display_id);
            ((), true)
        });
    }

    pub fn transfer_touch_focus(&self, from: InputToken, to: InputToken, is_drag_drop: bool) -> bool {
        self.inner.with_state(|state| {
            let transferred = state.transfer_touch_focus(from, to, is_drag_drop);
            (transferred, transferred)
        })
    }

    pub fn transfer_touch(&self, destination: InputToken, display_id: DisplayId) -> bool {
        self.inner.with_state(|state| {
            let transferred = state.transfer_touch(destination, display_id);
            (transferred, transferred)
        })
    }

    pub fn cancel_current_touch(&self) {
        self.inner.with_state(|state| {
            state.cancel_current_touch();
            ((), true)
        });
    }

    // Dispatch control

    /// `enabled == false` drops every event; `frozen` stops dequeuing without dropping.
    pub fn set_input_dispatch_mode(&self, enabled: bool, frozen: bool) {
        self.inner.with_state(|state| {
            if state.dispatch_enabled == enabled && state.dispatch_frozen == frozen {
                return ((), false);
            }
            if state.dispatch_frozen && !frozen {
                state.reset_no_focused_window_timeout();
            }
            if state.dispatch_enabled && !enabled {
                state.reset_and_drop_everything("dispatcher is being disabled");
            }
            state.dispatch_enabled = enabled;
            state.dispatch_frozen = frozen;
            state.log_dispatch_state_change();
            ((), true)
        });
    }

    pub fn set_input_filter_enabled(&self, enabled: bool) {
        self.inner.with_state(|state| {
            if state.input_filter_enabled == enabled {
                return ((), false);
            }
            state.input_filter_enabled = enabled;
            state.reset_and_drop_everything("input filter is being enabled or disabled");
            state.log_dispatch_state_change();
            ((), true)
        });
    }

    /// Reloads the configuration from the policy.
    pub fn request_refresh_configuration(&self) {
        let config = self.inner.policy.dispatcher_configuration();
        debug!("Refreshed configuration: {config:?}");
        self.inner.state.lock().config = config;
    }

    pub fn set_monitor_dispatching_timeout_for_test(&self, timeout: Duration) {
        self.inner.state.lock().config.monitor_dispatching_timeout = timeout;
    }

    /// Removes queued events of one sensor. Returns whether any were queued.
    pub fn flush_sensor(&self, device_id: DeviceId, sensor_type: SensorType) -> bool {
        self.inner.state.lock().flush_sensor(device_id, sensor_type)
    }

    // Diagnostics

    pub fn dump(&self) -> String {
        let state = self.inner.state.lock();
        let mut out = String::from("Input Dispatcher State:\n");
        state.dump_dispatch_state(&mut out);
        if !state.last_anr_state.is_empty() {
            out.push_str("\nInput Dispatcher State at time of last ANR:\n");
            out.push_str(&state.last_anr_state);
        }
        out
    }

    /// Whether the dispatch thread completes a loop iteration in time.
    pub fn monitor(&self) -> bool {
        let mut state = self.inner.state.lock();
        if !state.running {
            return false;
        }
        let generation = state.loop_generation;
        state.wake_pending = true;
        self.inner.wake.notify_one();
        let deadline = Instant::now() + IDLE_PROBE_TIMEOUT;
        while state.loop_generation == generation {
            if self.inner.alive.wait_until(&mut state, deadline).timed_out() {
                return state.loop_generation != generation;
            }
        }
        true
    }

    /// Waits until the dispatch thread has nothing left to do.
    pub fn wait_for_idle(&self) -> bool {
        let mut state = self.inner.state.lock();
        if !state.running {
            return false;
        }
        state.wake_pending = true;
        self.inner.wake.notify_one();
        !self.inner.idle.wait_until(&mut state, Instant::now() + IDLE_PROBE_TIMEOUT).timed_out()
    }
}

impl Drop for InputDispatcher {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

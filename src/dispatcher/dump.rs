use std::fmt::Write;
use std::time::Instant;

use crate::connection::Connection;
use crate::entry::EntryId;

use super::state::DispatcherState;

impl DispatcherState {
    fn dump_entry(&self, out: &mut String, indent: &str, id: EntryId, now: Instant) {
        match self.arena.get(id) {
            Some(entry) => {
                let _ = writeln!(out, "{indent}{entry}, age={:?}", entry.age(now));
            },
            None => {
                let _ = writeln!(out, "{indent}<released entry {id:?}>");
            },
        }
    }

    fn dump_connection(&self, out: &mut String, connection: &Connection, now: Instant) {
        let _ = writeln!(
            out,
            "    '{}': status={}, monitor={}, responsive={}, publisher_blocked={}, input_state={}",
            connection.name(),
            connection.status,
            connection.monitor.is_some(),
            connection.is_responsive(),
            connection.publisher_blocked,
            if connection.input_state.is_neutral() { "neutral" } else { "active" },
        );
        if connection.outbound.is_empty() {
            let _ = writeln!(out, "      OutboundQueue: <empty>");
        } else {
            let _ = writeln!(out, "      OutboundQueue:");
            for dispatch in &connection.outbound {
                let _ = write!(out, "        seq={}, flags={:?}: ", dispatch.seq, dispatch.target_flags);
                self.dump_entry(out, "", dispatch.entry, now);
            }
        }
        if connection.wait.is_empty() {
            let _ = writeln!(out, "      WaitQueue: <empty>");
        } else {
            let _ = writeln!(out, "      WaitQueue:");
            for dispatch in &connection.wait {
                let wait = dispatch.delivery_time.map(|delivery| now.saturating_duration_since(delivery));
                let _ = write!(out, "        seq={}, wait={wait:?}: ", dispatch.seq);
                self.dump_entry(out, "", dispatch.entry, now);
            }
        }
    }

    /// Appends a human readable description of the whole state.
    pub fn dump_dispatch_state(&self, out: &mut String) {
        let now = Instant::now();
        let _ = writeln!(
            out,
            "  DispatchEnabled: {}\n  DispatchFrozen: {}\n  InputFilterEnabled: {}",
            self.dispatch_enabled, self.dispatch_frozen, self.input_filter_enabled
        );
        let _ = writeln!(out, "  Configuration: {:?}", self.config);
        let _ = writeln!(out, "  FocusedDisplayId: {:?}", self.focused_display);

        if self.focused_applications.is_empty() {
            let _ = writeln!(out, "  FocusedApplications: <none>");
        }
        for (display_id, application) in &self.focused_applications {
            let _ = writeln!(
                out,
                "  FocusedApplication: display {display_id:?}: name='{}', dispatchingTimeout={:?}",
                application.name, application.dispatching_timeout
            );
        }
        self.focus.dump(out);

        if self.touch_states.is_empty() {
            let _ = writeln!(out, "  TouchStates: <no displays touched>");
        }
        for (display_id, state) in &self.touch_states {
            let _ = writeln!(
                out,
                "  TouchState on display {display_id:?}: down={}, split={}, device={:?}, source={:?}",
                state.down, state.split, state.device_id, state.source
            );
            for touched in &state.windows {
                let _ = writeln!(
                    out,
                    "    '{}': pointers={:?}, flags={:?}, pilfering={}",
                    touched.window.name, touched.pointer_ids, touched.target_flags, touched.is_pilfering
                );
            }
        }
        for (display_id, token) in &self.hover_windows {
            let _ = writeln!(out, "  HoveredWindow on display {display_id:?}: {token:?}");
        }
        if let Some(drag) = &self.drag {
            let _ = writeln!(
                out,
                "  DragState: window='{}', pointer={:?}, hover={:?}",
                drag.drag_window.name, drag.pointer_id, drag.hover_window
            );
        }

        if self.windows.is_empty() {
            let _ = writeln!(out, "  Windows: <none>");
        }
        for (display_id, windows) in &self.windows {
            let touch_mode = self.in_touch_mode(*display_id);
            let _ = writeln!(out, "  Display {display_id:?}: inTouchMode={touch_mode}");
            for (index, window) in windows.iter().enumerate() {
                let _ = writeln!(
                    out,
                    "    {index}: name='{}', frame={:?}, flags={:?}, alpha={:.2}, ownerPid={}, ownerUid={}, \
                     dispatchingTimeout={:?}",
                    window.name,
                    window.frame,
                    window.flags,
                    window.alpha,
                    window.owner_pid.0,
                    window.owner_uid.0,
                    window.dispatching_timeout
                );
            }
        }

        for (display_id, monitors) in &self.global_monitors {
            let _ = writeln!(out, "  Global monitors on display {display_id:?}: {monitors:?}");
        }
        let _ = writeln!(
            out,
            "  PointerCapture: requested={}, window={:?}, seq={}",
            self.pointer_capture.current_request.enable,
            self.pointer_capture.window,
            self.pointer_capture.current_request.seq
        );

        match self.pending_event {
            Some(id) => self.dump_entry(out, "  PendingEvent: ", id, now),
            None => {
                let _ = writeln!(out, "  PendingEvent: <none>");
            },
        }
        if self.inbound.is_empty() {
            let _ = writeln!(out, "  InboundQueue: <empty>");
        } else {
            let _ = writeln!(out, "  InboundQueue: length={}", self.inbound.len());
            for id in &self.inbound {
                self.dump_entry(out, "    ", *id, now);
            }
        }
        if self.recent.is_empty() {
            let _ = writeln!(out, "  RecentQueue: <empty>");
        } else {
            let _ = writeln!(out, "  RecentQueue: length={}", self.recent.len());
            for id in self.recent.iter() {
                self.dump_entry(out, "    ", *id, now);
            }
        }

        if self.connections.is_empty() {
            let _ = writeln!(out, "  Connections: <none>");
        } else {
            let _ = writeln!(out, "  Connections:");
            let mut connections: Vec<_> = self.connections.values().collect();
            connections.sort_by_key(|connection| connection.token());
            for connection in connections {
                self.dump_connection(out, connection, now);
            }
        }

        if self.anr_tracker.is_empty() {
            let _ = writeln!(out, "  AnrTracker: <empty>");
        } else {
            let _ = writeln!(out, "  AnrTracker:");
            for (timeout, token) in self.anr_tracker.iter() {
                let remaining = timeout.saturating_duration_since(now);
                let _ = writeln!(out, "    {token:?}: in {remaining:?}");
            }
        }
        if let Some(timeout) = self.no_focused_window_timeout {
            let name = self.awaited_focused_application.as_ref().map(|application| application.name.as_str());
            let _ = writeln!(
                out,
                "  NoFocusedWindowTimeout: in {:?}, awaiting {name:?}",
                timeout.saturating_duration_since(now)
            );
        }
        if let Some(next) = self.key_repeat.next_repeat_time {
            let _ = writeln!(out, "  KeyRepeat: next in {:?}", next.saturating_duration_since(now));
        }
        if let Some(due) = self.app_switch_due_time {
            let _ = writeln!(out, "  AppSwitch: due in {:?}", due.saturating_duration_since(now));
        }
        self.latency.dump(out);
    }
}

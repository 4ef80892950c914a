//! Focus arbitration per display.
//!
//! Focus follows the latest [`FocusRequest`] of a display. When the requested window is not
//! focusable yet, focus is removed and the request stays pending, so it is granted as soon as a
//! window update makes the window focusable.

use std::collections::HashMap;
use std::fmt::{self, Write};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::window::{DisplayId, FocusRequest, InputToken, WindowFlags, WindowInfo};

/// The outcome of a focus change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FocusChanges {
    pub old_focus: Option<InputToken>,
    pub new_focus: Option<InputToken>,
    pub display_id: DisplayId,
    pub reason: String,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Focusability {
    Ok,
    NoWindow,
    NotFocusable,
    NotVisible,
}

impl fmt::Display for Focusability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Focusability::Ok => "OK",
            Focusability::NoWindow => "NO_WINDOW",
            Focusability::NotFocusable => "NOT_FOCUSABLE",
            Focusability::NotVisible => "NOT_VISIBLE",
        })
    }
}

#[derive(Debug, Default)]
pub(crate) struct FocusResolver {
    focused_windows: HashMap<DisplayId, InputToken>,
    requests: HashMap<DisplayId, FocusRequest>,
    last_results: HashMap<DisplayId, Focusability>,
}

impl FocusResolver {
    pub fn focused_window_token(&self, display_id: DisplayId) -> Option<InputToken> {
        self.focused_windows.get(&display_id).copied()
    }

    /// Re-evaluates focus after the windows of a display changed.
    pub fn set_input_windows(
        &mut self,
        display_id: DisplayId,
        windows: &[Arc<WindowInfo>],
    ) -> Option<FocusChanges> {
        let current = self.focused_window_token(display_id);
        let mut remove_reason = String::new();
        if let Some(requested) = self.requests.get(&display_id).and_then(|request| request.token) {
            let result = is_token_focusable(requested, windows);
            if result == Focusability::Ok && current == Some(requested) {
                return None;
            }
            let previous = self.last_results.insert(display_id, result).unwrap_or(Focusability::NoWindow);
            if result == Focusability::Ok {
                return self.update_focused_window(
                    display_id,
                    format!("Window became focusable. Previous reason: {previous}"),
                    Some(requested),
                );
            }
            remove_reason = result.to_string();
        }
        self.update_focused_window(display_id, remove_reason, None)
    }

    pub fn set_focused_window(
        &mut self,
        request: FocusRequest,
        windows: &[Arc<WindowInfo>],
    ) -> Option<FocusChanges> {
        let display_id = request.display_id;
        let current = self.focused_window_token(display_id);
        if current == request.token {
            debug!("Focus request ignored: {:?} is already focused on {display_id:?}", request.token);
            return None;
        }

        let Some(token) = request.token else {
            self.requests.insert(display_id, request);
            return self.update_focused_window(display_id, "setFocusedWindow with null token".into(), None);
        };

        // Conditional requests only apply while the named window has focus and are not kept.
        if let Some(focused_token) = request.focused_token {
            if current != Some(focused_token) {
                warn!(
                    "setFocusedWindow {token:?} on {display_id:?} ignored, reason: focusedToken \
                     {focused_token:?} is not focused"
                );
                return None;
            }
            let result = is_token_focusable(token, windows);
            if result == Focusability::Ok {
                return self.update_focused_window(
                    display_id,
                    "setFocusedWindow with focus check".into(),
                    Some(token),
                );
            }
            warn!("setFocusedWindow {token:?} ignored, reason: {result}");
            return None;
        }

        let result = is_token_focusable(token, windows);
        self.requests.insert(display_id, request);
        self.last_results.insert(display_id, result);
        if result == Focusability::Ok {
            return self.update_focused_window(display_id, "setFocusedWindow".into(), Some(token));
        }
        self.update_focused_window(display_id, format!("Waiting for window because {result}"), None)
    }

    pub fn display_removed(&mut self, display_id: DisplayId) {
        self.focused_windows.remove(&display_id);
        self.requests.remove(&display_id);
        self.last_results.remove(&display_id);
    }

    fn update_focused_window(
        &mut self,
        display_id: DisplayId,
        reason: String,
        new_focus: Option<InputToken>,
    ) -> Option<FocusChanges> {
        let old_focus = self.focused_window_token(display_id);
        if old_focus == new_focus {
            return None;
        }
        match new_focus {
            Some(token) => self.focused_windows.insert(display_id, token),
            None => self.focused_windows.remove(&display_id),
        };
        Some(FocusChanges { old_focus, new_focus, display_id, reason })
    }

    pub fn dump(&self, out: &mut String) {
        if self.focused_windows.is_empty() {
            let _ = writeln!(out, "  FocusedWindows: <none>");
        }
        for (display_id, token) in &self.focused_windows {
            let _ = writeln!(out, "  FocusedWindow: display {display_id:?}: {token:?}");
        }
        for (display_id, request) in &self.requests {
            let result = self.last_results.get(display_id).copied().unwrap_or(Focusability::NoWindow);
            let _ = writeln!(
                out,
                "  FocusRequest: display {display_id:?}: {:?} result={result}",
                request.token
            );
        }
    }
}

fn is_token_focusable(token: InputToken, windows: &[Arc<WindowInfo>]) -> Focusability {
    let mut window_found = false;
    let mut visible_window_found = false;
    for window in windows.iter().filter(|window| window.token == token) {
        window_found = true;
        if window.is_visible() {
            visible_window_found = true;
        }
        if window.flags.contains(WindowFlags::NOT_FOCUSABLE) {
            return Focusability::NotFocusable;
        }
    }
    if !window_found {
        Focusability::NoWindow
    } else if !visible_window_found {
        Focusability::NotVisible
    } else {
        Focusability::Ok
    }
}

#[cfg(test)]
mod tests {
    use crate::window::Rect;

    use super::*;

    fn window(token: u64, flags: WindowFlags) -> Arc<WindowInfo> {
        Arc::new(
            WindowInfo::new(InputToken::from(token), "w", DisplayId::DEFAULT, Rect::new(0, 0, 10, 10))
                .with_flags(flags),
        )
    }

    fn request(token: u64) -> FocusRequest {
        FocusRequest::new(InputToken::from(token), DisplayId::DEFAULT)
    }

    #[test]
    fn focus_is_granted_to_focusable_window() {
        let mut resolver = FocusResolver::default();
        let windows = [window(1, WindowFlags::empty())];
        let changes = resolver.set_focused_window(request(1), &windows).unwrap();
        assert_eq!(changes.old_focus, None);
        assert_eq!(changes.new_focus, Some(InputToken::from(1)));
        assert_eq!(resolver.focused_window_token(DisplayId::DEFAULT), Some(InputToken::from(1)));
    }

    #[test]
    fn identical_window_updates_do_not_change_focus() {
        let mut resolver = FocusResolver::default();
        let windows = [window(1, WindowFlags::empty())];
        resolver.set_focused_window(request(1), &windows);
        assert_eq!(resolver.set_input_windows(DisplayId::DEFAULT, &windows), None);
        assert_eq!(resolver.set_input_windows(DisplayId::DEFAULT, &windows), None);
    }

    #[test]
    fn pending_request_is_granted_when_window_becomes_focusable() {
        let mut resolver = FocusResolver::default();
        let hidden = [window(1, WindowFlags::NOT_VISIBLE)];
        assert_eq!(resolver.set_focused_window(request(1), &hidden), None);
        assert_eq!(resolver.focused_window_token(DisplayId::DEFAULT), None);

        let shown = [window(1, WindowFlags::empty())];
        let changes = resolver.set_input_windows(DisplayId::DEFAULT, &shown).unwrap();
        assert_eq!(changes.new_focus, Some(InputToken::from(1)));
        assert!(changes.reason.starts_with("Window became focusable"));
    }

    #[test]
    fn focus_is_revoked_when_window_stops_being_focusable() {
        let mut resolver = FocusResolver::default();
        resolver.set_focused_window(request(1), &[window(1, WindowFlags::empty())]);
        let changes = resolver
            .set_input_windows(DisplayId::DEFAULT, &[window(1, WindowFlags::NOT_FOCUSABLE)])
            .unwrap();
        assert_eq!(changes.old_focus, Some(InputToken::from(1)));
        assert_eq!(changes.new_focus, None);
        assert_eq!(changes.reason, "NOT_FOCUSABLE");
    }

    #[test]
    fn conditional_request_requires_current_focus() {
        let mut resolver = FocusResolver::default();
        let windows = [window(1, WindowFlags::empty()), window(2, WindowFlags::empty())];
        resolver.set_focused_window(request(1), &windows);

        let mut conditional = request(2);
        conditional.focused_token = Some(InputToken::from(3));
        assert_eq!(resolver.set_focused_window(conditional, &windows), None);

        conditional.focused_token = Some(InputToken::from(1));
        let changes = resolver.set_focused_window(conditional, &windows).unwrap();
        assert_eq!(changes.new_focus, Some(InputToken::from(2)));
    }
}

//! Per-display record of which windows own which pointers.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::event::{DeviceId, PointerId, Source, MAX_POINTER_ID};
use crate::target::InputTargetFlags;
use crate::window::{DisplayId, InputToken, WindowFlags, WindowInfo};

/// A set of pointer ids in `0..=MAX_POINTER_ID`.
#[derive(Default, Copy, Clone, PartialEq, Eq, Hash)]
pub(crate) struct PointerIdSet(u32);

impl PointerIdSet {
    pub fn single(id: PointerId) -> Self {
        let mut set = Self::default();
        set.insert(id);
        set
    }

    fn bit(id: PointerId) -> u32 {
        let raw = u32::from(id);
        debug_assert!(raw <= MAX_POINTER_ID);
        1u32.checked_shl(raw).unwrap_or(0)
    }

    pub fn insert(&mut self, id: PointerId) {
        self.0 |= Self::bit(id);
    }

    pub fn remove(&mut self, id: PointerId) {
        self.0 &= !Self::bit(id);
    }

    pub fn contains(self, id: PointerId) -> bool {
        self.0 & Self::bit(id) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn iter(self) -> impl Iterator<Item = PointerId> {
        (0..=MAX_POINTER_ID).filter(move |raw| self.0 & (1 << raw) != 0).map(PointerId::from)
    }
}

impl FromIterator<PointerId> for PointerIdSet {
    fn from_iter<I: IntoIterator<Item = PointerId>>(iter: I) -> Self {
        let mut set = Self::default();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

impl fmt::Debug for PointerIdSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(u32::from)).finish()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct TouchedWindow {
    pub window: Arc<WindowInfo>,
    pub target_flags: InputTargetFlags,
    pub pointer_ids: PointerIdSet,
    /// When this window received its first pointer of the gesture.
    pub first_down_time: Option<Instant>,
    pub is_pilfering: bool,
}

impl TouchedWindow {
    pub fn token(&self) -> InputToken {
        self.window.token
    }
}

/// The gesture in progress on one display.
#[derive(Debug, Clone, Default)]
pub(crate) struct TouchState {
    pub down: bool,
    pub split: bool,
    pub device_id: Option<DeviceId>,
    pub source: Source,
    pub display_id: Option<DisplayId>,
    pub windows: Vec<TouchedWindow>,
    /// Set once a spy pilfered the gesture: later pointers go nowhere else.
    pub prevent_new_targets: bool,
}

impl TouchState {
    pub fn reset(&mut self) {
        *self = TouchState::default();
    }

    pub fn add_or_update_window(
        &mut self,
        window: &Arc<WindowInfo>,
        target_flags: InputTargetFlags,
        pointer_ids: PointerIdSet,
        event_time: Option<Instant>,
    ) {
        if target_flags.contains(InputTargetFlags::SPLIT) {
            self.split = true;
        }
        if let Some(touched) = self.windows.iter_mut().find(|touched| touched.window.token == window.token) {
            touched.target_flags |= target_flags;
            if target_flags.contains(InputTargetFlags::DISPATCH_AS_SLIPPERY_EXIT) {
                touched.target_flags.remove(InputTargetFlags::DISPATCH_AS_IS);
            }
            // The first pointer this window gets marks the start of its part of the gesture.
            if touched.pointer_ids.is_empty() && !pointer_ids.is_empty() {
                touched.first_down_time = event_time;
            }
            touched.pointer_ids = touched.pointer_ids.union(pointer_ids);
            return;
        }
        self.windows.push(TouchedWindow {
            window: window.clone(),
            target_flags,
            pointer_ids,
            first_down_time: if pointer_ids.is_empty() { None } else { event_time },
            is_pilfering: false,
        });
    }

    pub fn remove_window_by_token(&mut self, token: InputToken) {
        self.windows.retain(|touched| touched.window.token != token);
    }

    /// Keeps only windows that receive the event as-is, and makes that their only mode.
    pub fn filter_non_as_is_touch_windows(&mut self) {
        self.windows.retain_mut(|touched| {
            if touched.target_flags.contains(InputTargetFlags::DISPATCH_AS_IS)
                || touched.target_flags.contains(InputTargetFlags::DISPATCH_AS_SLIPPERY_ENTER)
            {
                touched.target_flags.remove(InputTargetFlags::DISPATCH_MASK);
                touched.target_flags |= InputTargetFlags::DISPATCH_AS_IS;
                true
            } else {
                false
            }
        });
    }

    /// Drops the pointer from every window. Windows left without pointers are removed.
    pub fn remove_pointer(&mut self, id: PointerId) {
        for touched in &mut self.windows {
            touched.pointer_ids.remove(id);
        }
        self.windows.retain(|touched| !touched.pointer_ids.is_empty());
    }

    pub fn filter_windows_except(&mut self, token: InputToken) {
        self.windows.retain(|touched| touched.window.token == token);
    }

    pub fn first_foreground_window(&self) -> Option<&Arc<WindowInfo>> {
        self.windows
            .iter()
            .find(|touched| touched.target_flags.contains(InputTargetFlags::FOREGROUND))
            .map(|touched| &touched.window)
    }

    pub fn wallpaper_window(&self) -> Option<&Arc<WindowInfo>> {
        self.windows
            .iter()
            .find(|touched| touched.window.flags.contains(WindowFlags::IS_WALLPAPER))
            .map(|touched| &touched.window)
    }

    pub fn touched_window(&self, token: InputToken) -> Option<&TouchedWindow> {
        self.windows.iter().find(|touched| touched.window.token == token)
    }

    pub fn touched_window_mut(&mut self, token: InputToken) -> Option<&mut TouchedWindow> {
        self.windows.iter_mut().find(|touched| touched.window.token == token)
    }

    /// Whether the single foreground window lets its pointer slip to another window.
    pub fn is_slippery(&self) -> bool {
        let mut foreground = self
            .windows
            .iter()
            .filter(|touched| touched.target_flags.contains(InputTargetFlags::FOREGROUND));
        match (foreground.next(), foreground.next()) {
            (Some(touched), None) => touched.window.flags.contains(WindowFlags::SLIPPERY),
            _ => false,
        }
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

    fn ids(raw: &[u32]) -> PointerIdSet {
        raw.iter().copied().map(PointerId::from).collect()
    }

    #[test]
    fn pointer_id_set_operations() {
        let a = ids(&[0, 3, 31]);
        let b = ids(&[3, 4]);
        assert_eq!(a.len(), 3);
        assert!(a.contains(PointerId::from(31)));
        assert!(!b.contains(PointerId::from(0)));
        assert_eq!(a.union(b), ids(&[0, 3, 4, 31]));
        assert_eq!(a.iter().map(u32::from).collect::<Vec<_>>(), [0, 3, 31]);
    }

    #[test]
    fn split_windows_own_disjoint_pointers() {
        let now = Instant::now();
        let mut state = TouchState::default();
        let flags = InputTargetFlags::FOREGROUND | InputTargetFlags::SPLIT | InputTargetFlags::DISPATCH_AS_IS;
        state.add_or_update_window(&window(1, WindowFlags::SPLIT_TOUCH), flags, ids(&[0]), Some(now));
        state.add_or_update_window(&window(2, WindowFlags::SPLIT_TOUCH), flags, ids(&[1]), Some(now));
        assert!(state.split);
        assert_eq!(state.windows[0].pointer_ids.union(state.windows[1].pointer_ids), ids(&[0, 1]));

        state.remove_pointer(PointerId::from(0));
        assert_eq!(state.windows.len(), 1);
        assert_eq!(state.windows[0].token(), InputToken::from(2));
    }

    #[test]
    fn first_down_time_is_set_when_first_pointer_arrives() {
        let start = Instant::now();
        let later = start + std::time::Duration::from_millis(5);
        let mut state = TouchState::default();
        let spy = window(1, WindowFlags::SPY);
        state.add_or_update_window(&spy, InputTargetFlags::DISPATCH_AS_OUTSIDE, PointerIdSet::default(), Some(start));
        assert_eq!(state.windows[0].first_down_time, None);
        state.add_or_update_window(&spy, InputTargetFlags::DISPATCH_AS_IS, ids(&[2]), Some(later));
        assert_eq!(state.windows[0].first_down_time, Some(later));
    }

    #[test]
    fn filter_keeps_as_is_and_slippery_enter() {
        let mut state = TouchState::default();
        state.add_or_update_window(&window(1, WindowFlags::empty()), InputTargetFlags::DISPATCH_AS_OUTSIDE, PointerIdSet::default(), None);
        state.add_or_update_window(
            &window(2, WindowFlags::empty()),
            InputTargetFlags::FOREGROUND | InputTargetFlags::DISPATCH_AS_SLIPPERY_ENTER,
            ids(&[0]),
            None,
        );
        state.filter_non_as_is_touch_windows();
        assert_eq!(state.windows.len(), 1);
        assert!(state.windows[0].target_flags.contains(InputTargetFlags::DISPATCH_AS_IS));
        assert!(!state.windows[0].target_flags.contains(InputTargetFlags::DISPATCH_AS_SLIPPERY_ENTER));
    }

    #[test]
    fn slippery_needs_a_single_foreground_window() {
        let mut state = TouchState::default();
        let flags = InputTargetFlags::FOREGROUND | InputTargetFlags::DISPATCH_AS_IS;
        state.add_or_update_window(&window(1, WindowFlags::SLIPPERY), flags, ids(&[0]), None);
        assert!(state.is_slippery());
        state.add_or_update_window(&window(2, WindowFlags::empty()), flags, ids(&[1]), None);
        assert!(!state.is_slippery());
    }
}

//! Window metadata consumed by the dispatcher.
//!
//! The window manager owns the real windows. The dispatcher only sees snapshots of their
//! input-relevant state, delivered through [`WindowInfosUpdate`] or per-display lists.

use std::time::{Duration, Instant};

use bitflags::bitflags;
use dpi::{PhysicalPosition, PhysicalSize};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::config::DEFAULT_DISPATCHING_TIMEOUT;

/// Identifier of an input channel, and of the window that receives input through it.
///
/// A window is bound to its channel by carrying the token that the channel was registered
/// under.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct InputToken(u64);

impl InputToken {
    /// Returns a dummy token, useful for unit testing.
    ///
    /// The value never collides with a token handed out by a dispatcher.
    pub const fn dummy() -> Self {
        InputToken(0)
    }
}

impl From<InputToken> for u64 {
    fn from(token: InputToken) -> Self {
        token.0
    }
}

impl From<u64> for InputToken {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Identifier of an application, used to attribute "no focused window" timeouts.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ApplicationToken(u64);

impl From<ApplicationToken> for u64 {
    fn from(token: ApplicationToken) -> Self {
        token.0
    }
}

impl From<u64> for ApplicationToken {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Identifier of a logical display.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DisplayId(i32);

impl DisplayId {
    /// The built-in display.
    pub const DEFAULT: DisplayId = DisplayId(0);
    /// Not associated with any display.
    pub const NONE: DisplayId = DisplayId(-1);

    /// Whether this names a real display.
    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl From<DisplayId> for i32 {
    fn from(display_id: DisplayId) -> Self {
        display_id.0
    }
}

impl From<i32> for DisplayId {
    fn from(raw: i32) -> Self {
        Self(raw)
    }
}

/// Process id of a window owner or an injector.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Pid(pub i32);

/// User id of a window owner or an injector.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Uid(pub u32);

/// An axis aligned rectangle in display pixels.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Rect {
    pub position: PhysicalPosition<i32>,
    pub size: PhysicalSize<u32>,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { position: PhysicalPosition::new(x, y), size: PhysicalSize::new(width, height) }
    }

    fn right(&self) -> i64 {
        self.position.x as i64 + self.size.width as i64
    }

    fn bottom(&self) -> i64 {
        self.position.y as i64 + self.size.height as i64
    }

    /// Whether the point lies inside. The right and bottom edges are exclusive.
    pub fn contains(&self, point: PhysicalPosition<f32>) -> bool {
        let (x, y) = (point.x as f64, point.y as f64);
        x >= self.position.x as f64
            && y >= self.position.y as f64
            && x < self.right() as f64
            && y < self.bottom() as f64
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        (self.position.x as i64) < other.right()
            && (other.position.x as i64) < self.right()
            && (self.position.y as i64) < other.bottom()
            && (other.position.y as i64) < self.bottom()
    }

    pub fn is_empty(&self) -> bool {
        self.size.width == 0 || self.size.height == 0
    }
}

bitflags! {
    /// Input configuration of a window.
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct WindowFlags: u32 {
        const NOT_VISIBLE = 1 << 0;
        const NOT_FOCUSABLE = 1 << 1;
        const NOT_TOUCHABLE = 1 << 2;
        /// Pointers of one gesture may be split between this window and others.
        const SPLIT_TOUCH = 1 << 3;
        /// Touches landing on this window are also delivered to the wallpaper below it.
        const DUPLICATE_TOUCH_TO_WALLPAPER = 1 << 4;
        const IS_WALLPAPER = 1 << 5;
        /// Keep events queued instead of delivering them.
        const PAUSE_DISPATCHING = 1 << 6;
        /// Never counts as an obscuring window.
        const TRUSTED_OVERLAY = 1 << 7;
        /// Receive `OUTSIDE` when a gesture starts somewhere else.
        const WATCH_OUTSIDE_TOUCH = 1 << 8;
        /// A single pointer moving off this window slips to the window below it.
        const SLIPPERY = 1 << 9;
        const DISABLE_USER_ACTIVITY = 1 << 10;
        /// Drop all input targeted at this window.
        const DROP_INPUT = 1 << 11;
        /// Drop input when the window is obscured at the point of the touch.
        const DROP_INPUT_IF_OBSCURED = 1 << 12;
        /// Observe touches without consuming them.
        const SPY = 1 << 13;
        const NO_INPUT_CHANNEL = 1 << 14;
    }
}

/// How a window affects touches on the windows below it.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TouchOcclusionMode {
    /// Touches below are untrusted whenever this window overlaps them.
    BlockUntrusted,
    /// Touches below are untrusted when the combined opacity of the owner's windows exceeds the
    /// configured maximum.
    #[default]
    UseOpacity,
    /// Never makes touches untrusted.
    Allow,
}

/// The application that owns a window, or that is expected to add one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ApplicationInfo {
    pub token: ApplicationToken,
    pub name: SmolStr,
    pub dispatching_timeout: Duration,
}

impl ApplicationInfo {
    pub fn new(token: ApplicationToken, name: impl Into<SmolStr>) -> Self {
        Self { token, name: name.into(), dispatching_timeout: DEFAULT_DISPATCHING_TIMEOUT }
    }

    pub fn with_dispatching_timeout(mut self, timeout: Duration) -> Self {
        self.dispatching_timeout = timeout;
        self
    }
}

/// Snapshot of the input state of one window.
///
/// Windows are passed to the dispatcher top-most first.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowInfo {
    pub token: InputToken,
    pub name: SmolStr,
    pub display_id: DisplayId,
    pub frame: Rect,
    /// Where the window accepts touches. Empty means the whole frame.
    pub touchable_region: Vec<Rect>,
    pub flags: WindowFlags,
    pub alpha: f32,
    pub touch_occlusion_mode: TouchOcclusionMode,
    pub owner_pid: Pid,
    pub owner_uid: Uid,
    pub dispatching_timeout: Duration,
    pub application: Option<ApplicationInfo>,
}

impl WindowInfo {
    pub fn new(token: InputToken, name: impl Into<SmolStr>, display_id: DisplayId, frame: Rect) -> Self {
        Self {
            token,
            name: name.into(),
            display_id,
            frame,
            touchable_region: Vec::new(),
            flags: WindowFlags::empty(),
            alpha: 1.0,
            touch_occlusion_mode: TouchOcclusionMode::default(),
            owner_pid: Pid(0),
            owner_uid: Uid(0),
            dispatching_timeout: DEFAULT_DISPATCHING_TIMEOUT,
            application: None,
        }
    }

    pub fn with_flags(mut self, flags: WindowFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_owner(mut self, pid: Pid, uid: Uid) -> Self {
        self.owner_pid = pid;
        self.owner_uid = uid;
        self
    }

    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_touch_occlusion_mode(mut self, mode: TouchOcclusionMode) -> Self {
        self.touch_occlusion_mode = mode;
        self
    }

    pub fn with_touchable_region(mut self, region: Vec<Rect>) -> Self {
        self.touchable_region = region;
        self
    }

    pub fn with_dispatching_timeout(mut self, timeout: Duration) -> Self {
        self.dispatching_timeout = timeout;
        self
    }

    pub fn with_application(mut self, application: ApplicationInfo) -> Self {
        self.application = Some(application);
        self
    }

    pub fn is_visible(&self) -> bool {
        !self.flags.contains(WindowFlags::NOT_VISIBLE)
    }

    pub fn is_spy(&self) -> bool {
        self.flags.contains(WindowFlags::SPY)
    }

    pub fn supports_split_touch(&self) -> bool {
        self.flags.contains(WindowFlags::SPLIT_TOUCH)
    }

    /// Whether a touch at `point` lands on this window.
    pub fn touchable_region_contains(&self, point: PhysicalPosition<f32>) -> bool {
        if self.touchable_region.is_empty() {
            self.frame.contains(point)
        } else {
            self.touchable_region.iter().any(|rect| rect.contains(point))
        }
    }

    pub fn overlaps(&self, other: &WindowInfo) -> bool {
        self.frame.intersects(&other.frame)
    }
}

/// Size information for one display.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DisplayInfo {
    pub display_id: DisplayId,
    pub size: PhysicalSize<u32>,
}

/// A complete snapshot of the windows on every display.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowInfosUpdate {
    /// All windows, top-most first within each display.
    pub windows: Vec<WindowInfo>,
    pub displays: Vec<DisplayInfo>,
}

/// A request that a window take focus on its display.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FocusRequest {
    /// The window to focus, or `None` to clear focus.
    pub token: Option<InputToken>,
    /// When set, the request only applies while this window still has focus.
    pub focused_token: Option<InputToken>,
    pub display_id: DisplayId,
    pub timestamp: Instant,
}

impl FocusRequest {
    pub fn new(token: InputToken, display_id: DisplayId) -> Self {
        Self { token: Some(token), focused_token: None, display_id, timestamp: Instant::now() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_edges_are_half_open() {
        let rect = Rect::new(10, 10, 100, 50);
        assert!(rect.contains(PhysicalPosition::new(10.0, 10.0)));
        assert!(rect.contains(PhysicalPosition::new(109.9, 59.9)));
        assert!(!rect.contains(PhysicalPosition::new(110.0, 30.0)));
        assert!(!rect.contains(PhysicalPosition::new(50.0, 60.0)));
    }

    #[test]
    fn touchable_region_overrides_frame() {
        let window = WindowInfo::new(InputToken::from(1), "w", DisplayId::DEFAULT, Rect::new(0, 0, 100, 100))
            .with_touchable_region(vec![Rect::new(0, 0, 10, 10)]);
        assert!(window.touchable_region_contains(PhysicalPosition::new(5.0, 5.0)));
        assert!(!window.touchable_region_contains(PhysicalPosition::new(50.0, 50.0)));
    }

    #[test]
    fn rect_intersection() {
        let a = Rect::new(0, 0, 10, 10);
        assert!(a.intersects(&Rect::new(5, 5, 10, 10)));
        assert!(!a.intersects(&Rect::new(10, 0, 10, 10)));
    }
}

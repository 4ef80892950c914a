//! Dispatcher tuning parameters.

use std::time::Duration;

/// Dispatching timeout for windows and applications that do not set their own.
pub const DEFAULT_DISPATCHING_TIMEOUT: Duration = Duration::from_secs(5);

/// Tuning parameters for the dispatcher.
///
/// The policy supplies this on construction and whenever
/// `InputDispatcher::request_refresh_configuration` is called.
///
/// ```
/// # use std::time::Duration;
/// # use input_dispatch_core::config::DispatcherConfiguration;
/// let config = DispatcherConfiguration::default()
///     .with_key_repeat_timeout(Duration::from_millis(300))
///     .with_key_repeat_delay(Duration::from_millis(30));
/// assert_eq!(config.key_repeat_delay, Duration::from_millis(30));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherConfiguration {
    /// Time a key must be held before the first synthetic repeat.
    pub key_repeat_timeout: Duration,
    /// Interval between synthetic repeats.
    pub key_repeat_delay: Duration,
    /// Events older than this when they reach the head of the queue are dropped.
    pub stale_event_timeout: Duration,
    /// Queue length above which older `MOVE` samples are pruned.
    pub inbound_queue_prune_threshold: usize,
    /// Timeout for windows that have no application timeout.
    pub default_dispatching_timeout: Duration,
    /// Timeout for monitor connections.
    pub monitor_dispatching_timeout: Duration,
    /// Combined opacity of another application's windows above which a touch is untrusted.
    pub maximum_obscuring_opacity_for_touch: f32,
}

impl Default for DispatcherConfiguration {
    fn default() -> Self {
        Self {
            key_repeat_timeout: Duration::from_millis(500),
            key_repeat_delay: Duration::from_millis(50),
            stale_event_timeout: Duration::from_secs(10),
            inbound_queue_prune_threshold: 64,
            default_dispatching_timeout: DEFAULT_DISPATCHING_TIMEOUT,
            monitor_dispatching_timeout: DEFAULT_DISPATCHING_TIMEOUT,
            maximum_obscuring_opacity_for_touch: 0.8,
        }
    }
}

impl DispatcherConfiguration {
    pub fn with_key_repeat_timeout(mut self, timeout: Duration) -> Self {
        self.key_repeat_timeout = timeout;
        self
    }

    pub fn with_key_repeat_delay(mut self, delay: Duration) -> Self {
        self.key_repeat_delay = delay;
        self
    }

    pub fn with_stale_event_timeout(mut self, timeout: Duration) -> Self {
        self.stale_event_timeout = timeout;
        self
    }

    pub fn with_inbound_queue_prune_threshold(mut self, threshold: usize) -> Self {
        self.inbound_queue_prune_threshold = threshold;
        self
    }

    pub fn with_default_dispatching_timeout(mut self, timeout: Duration) -> Self {
        self.default_dispatching_timeout = timeout;
        self
    }

    pub fn with_monitor_dispatching_timeout(mut self, timeout: Duration) -> Self {
        self.monitor_dispatching_timeout = timeout;
        self
    }

    pub fn with_maximum_obscuring_opacity_for_touch(mut self, opacity: f32) -> Self {
        self.maximum_obscuring_opacity_for_touch = opacity;
        self
    }
}

//! Interaction and latency bookkeeping.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Write;
use std::time::Duration;

use tracing::debug;

use crate::ring_buffer::RingBuffer;
use crate::window::InputToken;

const LATENCY_SAMPLES: usize = 32;

/// The windows the user last interacted with.
#[derive(Debug, Default)]
pub(crate) struct InteractionTracker {
    tokens: BTreeSet<InputToken>,
}

impl InteractionTracker {
    /// Records the foreground, non-monitor targets of a key or of a touch down.
    pub fn update(&mut self, tokens: impl IntoIterator<Item = InputToken>) {
        let tokens: BTreeSet<_> = tokens.into_iter().collect();
        if tokens.is_empty() || tokens == self.tokens {
            return;
        }
        debug!("Interaction with: {tokens:?}");
        self.tokens = tokens;
    }

    pub fn tokens(&self) -> impl Iterator<Item = InputToken> + '_ {
        self.tokens.iter().copied()
    }

    pub fn remove(&mut self, token: InputToken) {
        self.tokens.remove(&token);
    }
}

/// Delivery-to-acknowledgement durations per connection.
#[derive(Debug, Default)]
pub(crate) struct LatencyTracker {
    samples: HashMap<InputToken, RingBuffer<Duration>>,
}

impl LatencyTracker {
    pub fn record(&mut self, token: InputToken, latency: Duration) {
        self.samples.entry(token).or_insert_with(|| RingBuffer::with_capacity(LATENCY_SAMPLES)).push_back(latency);
    }

    pub fn remove(&mut self, token: InputToken) {
        self.samples.remove(&token);
    }

    /// The largest recorded latency of the connection.
    pub fn worst(&self, token: InputToken) -> Option<Duration> {
        self.samples.get(&token).and_then(|samples| samples.iter().max().copied())
    }

    pub fn dump(&self, out: &mut String) {
        let _ = writeln!(out, "  Latency:");
        let mut tokens: Vec<_> = self.samples.keys().copied().collect();
        tokens.sort();
        for token in tokens {
            let Some(samples) = self.samples.get(&token) else { continue };
            let total: Duration = samples.iter().sum();
            let average = total / samples.len().max(1) as u32;
            let worst = self.worst(token).unwrap_or_default();
            let _ = writeln!(
                out,
                "    {token:?}: samples={}, average={average:?}, worst={worst:?}",
                samples.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interaction_ignores_empty_updates() {
        let mut tracker = InteractionTracker::default();
        tracker.update([InputToken::from(1)]);
        tracker.update([]);
        assert_eq!(tracker.tokens().collect::<Vec<_>>(), [InputToken::from(1)]);
    }

    #[test]
    fn latency_keeps_recent_samples() {
        let mut tracker = LatencyTracker::default();
        let token = InputToken::from(1);
        tracker.record(token, Duration::from_secs(9));
        for _ in 0..LATENCY_SAMPLES {
            tracker.record(token, Duration::from_millis(1));
        }
        assert_eq!(tracker.worst(token), Some(Duration::from_millis(1)));
        let mut out = String::new();
        tracker.dump(&mut out);
        assert!(out.contains("samples=32"));
    }
}

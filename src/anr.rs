//! Dispatch deadlines of every connection, ordered by time.

use std::collections::BTreeMap;
use std::time::Instant;

use crate::window::InputToken;

/// A multiset of `(deadline, token)` pairs.
///
/// A connection has entries here only while it is responsive and has events waiting for an
/// acknowledgement.
#[derive(Debug, Default)]
pub(crate) struct AnrTracker {
    deadlines: BTreeMap<(Instant, InputToken), usize>,
}

impl AnrTracker {
    pub fn insert(&mut self, timeout: Instant, token: InputToken) {
        *self.deadlines.entry((timeout, token)).or_insert(0) += 1;
    }

    /// Removes one occurrence of the pair.
    pub fn erase(&mut self, timeout: Instant, token: InputToken) {
        if let Some(count) = self.deadlines.get_mut(&(timeout, token)) {
            *count -= 1;
            if *count == 0 {
                self.deadlines.remove(&(timeout, token));
            }
        }
    }

    /// Removes every deadline of the token.
    pub fn erase_token(&mut self, token: InputToken) {
        self.deadlines.retain(|(_, entry_token), _| *entry_token != token);
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    pub fn first(&self) -> Option<(Instant, InputToken)> {
        self.deadlines.keys().next().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Instant, InputToken)> + '_ {
        self.deadlines.iter().flat_map(|(key, count)| std::iter::repeat(*key).take(*count))
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn first_is_earliest_deadline() {
        let now = Instant::now();
        let mut tracker = AnrTracker::default();
        tracker.insert(now + Duration::from_secs(2), InputToken::from(1));
        tracker.insert(now + Duration::from_secs(1), InputToken::from(2));
        assert_eq!(tracker.first(), Some((now + Duration::from_secs(1), InputToken::from(2))));
    }

    #[test]
    fn duplicates_need_matching_erases() {
        let now = Instant::now();
        let token = InputToken::from(1);
        let mut tracker = AnrTracker::default();
        tracker.insert(now, token);
        tracker.insert(now, token);
        tracker.erase(now, token);
        assert_eq!(tracker.first(), Some((now, token)));
        tracker.erase(now, token);
        assert!(tracker.is_empty());
    }

    #[test]
    fn erase_token_drops_all_of_its_deadlines() {
        let now = Instant::now();
        let mut tracker = AnrTracker::default();
        tracker.insert(now, InputToken::from(1));
        tracker.insert(now + Duration::from_millis(5), InputToken::from(1));
        tracker.insert(now + Duration::from_millis(9), InputToken::from(2));
        tracker.erase_token(InputToken::from(1));
        assert_eq!(tracker.iter().collect::<Vec<_>>(), [(now + Duration::from_millis(9), InputToken::from(2))]);
    }
}

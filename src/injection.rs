//! Bookkeeping for injectors waiting on the outcome of their event.

use std::collections::HashMap;

use crate::inject::InjectionResult;
use crate::window::Uid;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub(crate) struct InjectionId(u64);

#[derive(Debug, Clone)]
pub(crate) struct InjectionState {
    /// When set, every target window must be owned by this uid.
    pub target_uid: Option<Uid>,
    /// Nobody waits; the state is dropped with the last entry.
    pub is_async: bool,
    pub result: InjectionResult,
    /// Foreground dispatch entries still waiting for an acknowledgement.
    pub pending_foreground_dispatches: usize,
    /// Entries referring to this state.
    entries: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Injections {
    next_id: u64,
    states: HashMap<InjectionId, InjectionState>,
    /// Set whenever a result or counter changes, so waiters get notified.
    pub dirty: bool,
}

impl Injections {
    pub fn create(&mut self, target_uid: Option<Uid>, is_async: bool) -> InjectionId {
        self.next_id += 1;
        let id = InjectionId(self.next_id);
        self.states.insert(id, InjectionState {
            target_uid,
            is_async,
            result: InjectionResult::Pending,
            pending_foreground_dispatches: 0,
            entries: 0,
        });
        id
    }

    pub fn get(&self, id: InjectionId) -> Option<&InjectionState> {
        self.states.get(&id)
    }

    /// Records that an entry refers to `id`.
    pub fn attach(&mut self, id: InjectionId) {
        if let Some(state) = self.states.get_mut(&id) {
            state.entries += 1;
        }
    }

    /// An entry referring to `id` was freed. Asynchronous states go away with their last entry.
    pub fn detach(&mut self, id: InjectionId) {
        let Some(state) = self.states.get_mut(&id) else { return };
        state.entries = state.entries.saturating_sub(1);
        if state.entries == 0 && state.is_async {
            self.states.remove(&id);
        }
    }

    /// Sets the result unless one was already set.
    pub fn set_result(&mut self, id: InjectionId, result: InjectionResult) {
        if let Some(state) = self.states.get_mut(&id) {
            if state.result == InjectionResult::Pending {
                state.result = result;
                self.dirty = true;
            }
        }
    }

    pub fn increment_pending(&mut self, id: InjectionId) {
        if let Some(state) = self.states.get_mut(&id) {
            state.pending_foreground_dispatches += 1;
        }
    }

    pub fn decrement_pending(&mut self, id: InjectionId) {
        if let Some(state) = self.states.get_mut(&id) {
            state.pending_foreground_dispatches = state.pending_foreground_dispatches.saturating_sub(1);
            if state.pending_foreground_dispatches == 0 {
                self.dirty = true;
            }
        }
    }

    /// The waiter gave up or got its answer.
    pub fn remove(&mut self, id: InjectionId) {
        if let Some(state) = self.states.get_mut(&id) {
            if state.entries == 0 {
                self.states.remove(&id);
            } else {
                state.is_async = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_result_wins() {
        let mut injections = Injections::default();
        let id = injections.create(None, false);
        injections.set_result(id, InjectionResult::Failed);
        injections.set_result(id, InjectionResult::Succeeded);
        assert_eq!(injections.get(id).unwrap().result, InjectionResult::Failed);
        assert!(injections.dirty);
    }

    #[test]
    fn async_state_is_freed_with_its_entries() {
        let mut injections = Injections::default();
        let id = injections.create(None, true);
        injections.attach(id);
        injections.attach(id);
        injections.detach(id);
        assert!(injections.get(id).is_some());
        injections.detach(id);
        assert!(injections.get(id).is_none());
    }

    #[test]
    fn removed_waiter_keeps_state_for_live_entries() {
        let mut injections = Injections::default();
        let id = injections.create(None, false);
        injections.attach(id);
        injections.remove(id);
        assert!(injections.get(id).is_some());
        injections.detach(id);
        assert!(injections.get(id).is_none());
    }
}

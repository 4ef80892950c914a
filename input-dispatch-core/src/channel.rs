//! In-memory transport between the dispatcher and a consumer.
//!
//! A channel is a pair: the [`InputChannel`] end stays with the dispatcher, which publishes
//! [`InputMessage`]s on it, and the [`InputConsumer`] end goes to whoever registered the
//! channel. The consumer acknowledges every message with [`InputConsumer::finish`]; each
//! acknowledgement, and the consumer going away, wakes the dispatcher through its
//! [`DispatcherWaker`].

use std::collections::VecDeque;
use std::fmt::{self, Debug};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dpi::PhysicalPosition;
use parking_lot::{Condvar, Mutex};
use smol_str::SmolStr;

use crate::error::ChannelError;
use crate::event::{KeyEvent, MotionEvent};
use crate::window::InputToken;

/// Messages a channel buffers before `publish` reports [`ChannelError::WouldBlock`].
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// A handle that wakes the dispatch loop.
#[derive(Clone, Debug)]
pub struct DispatcherWaker {
    pub(crate) provider: Arc<dyn WakeUpProvider>,
}

impl DispatcherWaker {
    pub fn new(provider: Arc<dyn WakeUpProvider>) -> Self {
        Self { provider }
    }

    /// Wake the dispatch loop. Wake-ups that arrive while it is busy are coalesced.
    pub fn wake_up(&self) {
        self.provider.wake_up();
    }
}

pub trait WakeUpProvider: Send + Sync + Debug {
    /// See [`DispatcherWaker::wake_up`] for details.
    fn wake_up(&self);
}

/// One message delivered to a consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum InputMessage {
    Key { seq: u32, event: KeyEvent },
    Motion { seq: u32, event: MotionEvent },
    Focus { seq: u32, has_focus: bool },
    Capture { seq: u32, enabled: bool },
    Drag { seq: u32, position: PhysicalPosition<f32>, is_exiting: bool },
    TouchMode { seq: u32, in_touch_mode: bool },
}

impl InputMessage {
    /// The sequence number to pass to [`InputConsumer::finish`].
    pub fn seq(&self) -> u32 {
        match self {
            InputMessage::Key { seq, .. }
            | InputMessage::Motion { seq, .. }
            | InputMessage::Focus { seq, .. }
            | InputMessage::Capture { seq, .. }
            | InputMessage::Drag { seq, .. }
            | InputMessage::TouchMode { seq, .. } => *seq,
        }
    }
}

/// An acknowledgement read back by the dispatcher.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FinishedSignal {
    pub seq: u32,
    pub handled: bool,
    pub finish_time: Instant,
}

#[derive(Default)]
struct ChannelState {
    messages: VecDeque<InputMessage>,
    finished: VecDeque<FinishedSignal>,
    dispatcher_closed: bool,
    consumer_closed: bool,
}

struct Shared {
    name: SmolStr,
    token: InputToken,
    capacity: usize,
    state: Mutex<ChannelState>,
    readable: Condvar,
}

impl Shared {
    fn close(&self, dispatcher_side: bool) {
        let mut state = self.state.lock();
        if dispatcher_side {
            state.dispatcher_closed = true;
        } else {
            state.consumer_closed = true;
        }
        self.readable.notify_all();
    }
}

/// The dispatcher's end of a channel.
pub struct InputChannel {
    shared: Arc<Shared>,
}

impl InputChannel {
    /// Opens a connected pair.
    pub fn open_pair(
        name: impl Into<SmolStr>,
        token: InputToken,
        capacity: usize,
        waker: DispatcherWaker,
    ) -> (InputChannel, InputConsumer) {
        let shared = Arc::new(Shared {
            name: name.into(),
            token,
            capacity,
            state: Mutex::new(ChannelState::default()),
            readable: Condvar::new(),
        });
        (InputChannel { shared: shared.clone() }, InputConsumer { shared, waker })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn token(&self) -> InputToken {
        self.shared.token
    }

    /// Writes a message for the consumer.
    pub fn publish(&self, message: InputMessage) -> Result<(), ChannelError> {
        self.push(message, false)
    }

    /// Writes a message even when the channel is full. Meant for the last messages of a
    /// channel that is about to be removed.
    pub fn publish_past_capacity(&self, message: InputMessage) -> Result<(), ChannelError> {
        self.push(message, true)
    }

    fn push(&self, message: InputMessage, ignore_capacity: bool) -> Result<(), ChannelError> {
        let mut state = self.shared.state.lock();
        if state.consumer_closed {
            return Err(ChannelError::Closed);
        }
        if !ignore_capacity && state.messages.len() >= self.shared.capacity {
            return Err(ChannelError::WouldBlock);
        }
        state.messages.push_back(message);
        self.shared.readable.notify_one();
        Ok(())
    }

    /// Reads the next acknowledgement, if any.
    ///
    /// Fails with [`ChannelError::Closed`] once the consumer is gone and every acknowledgement
    /// it sent has been read.
    pub fn receive_finished_signal(&self) -> Result<Option<FinishedSignal>, ChannelError> {
        let mut state = self.shared.state.lock();
        match state.finished.pop_front() {
            Some(signal) => Ok(Some(signal)),
            None if state.consumer_closed => Err(ChannelError::Closed),
            None => Ok(None),
        }
    }
}

impl Drop for InputChannel {
    fn drop(&mut self) {
        self.shared.close(true);
    }
}

impl Debug for InputChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputChannel")
            .field("name", &self.shared.name)
            .field("token", &self.shared.token)
            .finish_non_exhaustive()
    }
}

/// The consumer's end of a channel.
///
/// Dropping it closes the channel; the dispatcher then tears the connection down.
pub struct InputConsumer {
    shared: Arc<Shared>,
    waker: DispatcherWaker,
}

impl InputConsumer {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// The token to put into [`WindowInfo::token`](crate::window::WindowInfo::token).
    pub fn token(&self) -> InputToken {
        self.shared.token
    }

    pub fn try_receive(&self) -> Option<InputMessage> {
        self.shared.state.lock().messages.pop_front()
    }

    /// Blocks until a message arrives or the dispatcher drops its end.
    pub fn receive(&self) -> Option<InputMessage> {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(message) = state.messages.pop_front() {
                return Some(message);
            }
            if state.dispatcher_closed {
                return None;
            }
            self.shared.readable.wait(&mut state);
        }
    }

    /// Blocks until a message arrives or `timeout` passes.
    pub fn receive_timeout(&self, timeout: Duration) -> Option<InputMessage> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            if let Some(message) = state.messages.pop_front() {
                return Some(message);
            }
            if state.dispatcher_closed {
                return None;
            }
            if self.shared.readable.wait_until(&mut state, deadline).timed_out() {
                return state.messages.pop_front();
            }
        }
    }

    /// Acknowledges the message with sequence number `seq`.
    pub fn finish(&self, seq: u32, handled: bool) -> Result<(), ChannelError> {
        {
            let mut state = self.shared.state.lock();
            if state.dispatcher_closed {
                return Err(ChannelError::Closed);
            }
            state.finished.push_back(FinishedSignal { seq, handled, finish_time: Instant::now() });
        }
        self.waker.wake_up();
        Ok(())
    }
}

impl Drop for InputConsumer {
    fn drop(&mut self) {
        self.shared.close(false);
        self.waker.wake_up();
    }
}

impl Debug for InputConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputConsumer")
            .field("name", &self.shared.name)
            .field("token", &self.shared.token)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Debug, Default)]
    struct CountingWaker(AtomicUsize);

    impl WakeUpProvider for CountingWaker {
        fn wake_up(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn pair(capacity: usize) -> (InputChannel, InputConsumer, Arc<CountingWaker>) {
        let counter = Arc::new(CountingWaker::default());
        let (channel, consumer) = InputChannel::open_pair(
            "test",
            InputToken::from(1),
            capacity,
            DispatcherWaker::new(counter.clone()),
        );
        (channel, consumer, counter)
    }

    #[test]
    fn full_channel_would_block() {
        let (channel, consumer, _) = pair(1);
        channel.publish(InputMessage::Focus { seq: 1, has_focus: true }).unwrap();
        assert_eq!(
            channel.publish(InputMessage::Focus { seq: 2, has_focus: false }),
            Err(ChannelError::WouldBlock)
        );
        assert_eq!(consumer.try_receive().map(|m| m.seq()), Some(1));
        channel.publish(InputMessage::Focus { seq: 2, has_focus: false }).unwrap();
    }

    #[test]
    fn messages_can_go_past_capacity_while_the_consumer_is_open() {
        let (channel, consumer, _) = pair(1);
        channel.publish(InputMessage::Focus { seq: 1, has_focus: true }).unwrap();
        channel.publish_past_capacity(InputMessage::Focus { seq: 2, has_focus: false }).unwrap();
        drop(channel);
        assert_eq!(consumer.try_receive().map(|m| m.seq()), Some(1));
        assert_eq!(consumer.try_receive().map(|m| m.seq()), Some(2));
        assert_eq!(consumer.receive(), None);
    }

    #[test]
    fn finish_wakes_dispatcher() {
        let (channel, consumer, counter) = pair(4);
        consumer.finish(3, true).unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        let signal = channel.receive_finished_signal().unwrap().unwrap();
        assert_eq!((signal.seq, signal.handled), (3, true));
        assert_eq!(channel.receive_finished_signal(), Ok(None));
    }

    #[test]
    fn dropped_consumer_closes_after_pending_acks() {
        let (channel, consumer, counter) = pair(4);
        consumer.finish(1, false).unwrap();
        drop(consumer);
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
        assert!(channel.receive_finished_signal().unwrap().is_some());
        assert_eq!(channel.receive_finished_signal(), Err(ChannelError::Closed));
        assert_eq!(
            channel.publish(InputMessage::TouchMode { seq: 1, in_touch_mode: true }),
            Err(ChannelError::Closed)
        );
    }

    #[test]
    fn receive_timeout_returns_none_when_idle() {
        let (_channel, consumer, _) = pair(4);
        assert!(consumer.receive_timeout(Duration::from_millis(10)).is_none());
    }
}

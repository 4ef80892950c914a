//! Common error types.

use std::{error, fmt, io};

use crate::window::{DisplayId, InputToken};

/// A general error that may occur while driving the dispatcher or registering channels.
#[derive(Debug)]
pub enum DispatchError {
    /// The dispatch thread is already running.
    AlreadyRunning,
    /// The dispatch thread was asked to stop but was never started.
    NotRunning,
    /// No input channel is registered under this token.
    UnknownToken(InputToken),
    /// The display id does not name a real display.
    InvalidDisplay(DisplayId),
    /// The token is not part of any gesture in progress.
    NoActiveGesture(InputToken),
    /// Only spy windows may pilfer pointers.
    NotASpy(InputToken),
    /// An argument was outside of its accepted range.
    InvalidArgument(&'static str),
    /// The verification key could not be generated.
    KeyGeneration(getrandom::Error),
    /// The dispatch thread could not be spawned.
    ThreadSpawn(io::Error),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRunning => f.pad("the dispatcher thread is already running"),
            Self::NotRunning => f.pad("the dispatcher thread is not running"),
            Self::UnknownToken(token) => write!(f, "no input channel registered for {token:?}"),
            Self::InvalidDisplay(display_id) => write!(f, "invalid display {display_id:?}"),
            Self::NoActiveGesture(token) => write!(f, "{token:?} is not part of an active gesture"),
            Self::NotASpy(token) => write!(f, "{token:?} is not a spy window"),
            Self::InvalidArgument(reason) => write!(f, "invalid argument: {reason}"),
            Self::KeyGeneration(err) => write!(f, "failed to generate the verification key: {err}"),
            Self::ThreadSpawn(err) => write!(f, "failed to spawn the dispatcher thread: {err}"),
        }
    }
}

impl error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::ThreadSpawn(err) => Some(err),
            _ => None,
        }
    }
}

impl From<getrandom::Error> for DispatchError {
    fn from(value: getrandom::Error) -> Self {
        Self::KeyGeneration(value)
    }
}

impl From<io::Error> for DispatchError {
    fn from(value: io::Error) -> Self {
        Self::ThreadSpawn(value)
    }
}

/// The error type for channel reads and writes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ChannelError {
    /// The channel buffer is full; retry once the consumer catches up.
    WouldBlock,
    /// The other end of the channel is gone.
    Closed,
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WouldBlock => f.pad("the input channel is full"),
            Self::Closed => f.pad("the input channel is closed"),
        }
    }
}

impl error::Error for ChannelError {}

#[cfg(test)]
mod tests {
    #![allow(clippy::redundant_clone)]

    use super::*;

    // Eat attributes for testing
    #[test]
    fn ensure_fmt_does_not_panic() {
        let _ = format!(
            "{:?}, {}",
            DispatchError::UnknownToken(InputToken::from(7)),
            DispatchError::InvalidArgument("opacity")
        );
        let _ = format!("{:?}, {}", ChannelError::Closed, ChannelError::WouldBlock.clone());
        let _ = format!(
            "{}",
            DispatchError::from(io::Error::new(io::ErrorKind::Other, "no threads"))
        );
    }
}

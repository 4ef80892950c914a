//! An input event dispatcher.
//!
//! `input-dispatch` takes raw key, motion and sensor events from a device layer, decides which
//! windows and monitors should see them, and delivers them over [`channel`]s with flow control
//! and unresponsiveness detection.
//!
//! # Building a dispatcher
//!
//! A dispatcher is created from a [`DispatcherPolicy`], which supplies the configuration and is
//! consulted at the points where a window manager gets a say:
//!
//! ```no_run
//! use input_dispatch::policy::DispatcherPolicy;
//! use input_dispatch::InputDispatcher;
//!
//! struct Policy;
//!
//! impl DispatcherPolicy for Policy {}
//!
//! let dispatcher = InputDispatcher::new(Policy).unwrap();
//! let consumer = dispatcher.create_input_channel("status bar").unwrap();
//! dispatcher.start().unwrap();
//! # let _ = consumer;
//! ```
//!
//! Windows are described with [`window::WindowInfo`] and handed over per display with
//! [`InputDispatcher::set_input_windows`]. Each window names the [`window::InputToken`] of the
//! channel created for it.
//!
//! # Delivery
//!
//! Events are published to each channel in order, up to the channel's capacity. A consumer
//! must call [`channel::InputConsumer::finish`] for every message it receives; a window that
//! leaves a message unacknowledged past its dispatching timeout is reported to
//! [`DispatcherPolicy::notify_window_unresponsive`].
//!
//! [`DispatcherPolicy`]: policy::DispatcherPolicy
//! [`DispatcherPolicy::notify_window_unresponsive`]: policy::DispatcherPolicy::notify_window_unresponsive

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub use input_dispatch_core::{channel, config, error, event, inject, notify, policy, verify, window};

pub use crate::dispatcher::InputDispatcher;

mod anr;
mod command;
mod connection;
mod dispatcher;
mod entry;
mod focus;
mod hmac;
mod injection;
mod input_state;
mod latency;
mod ring_buffer;
mod target;
mod touch;

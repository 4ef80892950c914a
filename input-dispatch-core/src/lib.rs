//! Base types for an input event dispatcher.
//!
//! This crate contains the types and traits from [`input-dispatch`] that producers, consumers
//! and policy implementations share. It lets a device layer or a window manager talk to the
//! dispatcher without depending on the engine itself.
//!
//! [`input-dispatch`]: https://docs.rs/input-dispatch

pub mod channel;
pub mod config;
pub mod error;
pub mod event;
pub mod inject;
pub mod notify;
pub mod policy;
pub mod verify;
pub mod window;

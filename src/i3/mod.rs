//! i3 / sway specific implementations.
//!
//! This module provides concrete backends for the
//! [`WindowManager`](crate::traits::WindowManager) and
//! [`EventSource`](crate::traits::EventSource) traits, powered by the i3 IPC
//! protocol (which sway speaks as well).
//!
//! Nothing outside this module should reference the IPC protocol directly.

pub mod events;
pub mod ipc;
pub mod tree;
pub mod wm;

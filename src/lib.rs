//! **i3expo**: a workspace expo overlay for i3 and sway.
//!
//! A background thread keeps a screenshot of every workspace the user has
//! visited.  On request, a full-screen overlay shows them as a grid of
//! tiles.  Clicking a tile (or choosing it with the arrow keys) switches to
//! that workspace; dragging the focused window onto a tile moves it there.
//! Optional placeholder tiles open new, empty workspaces.
//!
//! # Architecture
//!
//! The crate is organised around a few traits:
//!
//! * [`traits::WindowManager`]: queries and commands sent to the window
//!   manager, so session and layout logic are not coupled to i3 IPC.
//! * [`traits::FrameGrabber`]: whole-screen captures.
//! * [`traits::EventSource`] / [`traits::CommandSource`]: the transports
//!   that deliver window-manager events and user intent.
//!
//! [`sync`] turns events into screenshots stored in [`knowledge`].
//! [`controller`] opens a [`session`] over that knowledge, which lays out
//! [`tile`]s with [`grid`] and [`allocator`] and resolves into a
//! [`command::CommandBatch`].  Concrete implementations live in [`i3`]
//! (i3/sway IPC), [`capture`] (X11 `GetImage` or `grim`) and [`ipc`]
//! (Unix-socket control listener).

pub mod allocator;
pub mod capture;
pub mod command;
pub mod config;
pub mod controller;
pub mod daemon;
pub mod frames;
pub mod grid;
pub mod i3;
pub mod ipc;
pub mod knowledge;
pub mod session;
pub mod sync;
pub mod tile;
pub mod traits;
pub mod visualizer;

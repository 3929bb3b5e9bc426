//! Core traits that decouple i3expo from any specific window manager,
//! capture backend, or transport mechanism.
//!
//! Every concrete backend (i3/sway IPC, an external screenshot tool, a
//! Unix-socket listener, a test harness, …) implements one of these traits.
//! The [`Synchronizer`](crate::sync::Synchronizer) and the
//! [`OverlayController`](crate::controller::OverlayController) only depend on
//! these abstractions.

use crate::command::{Command, Focus, OutputInfo, Rect, WorkspaceInfo};
use crate::knowledge::Screenshot;
use std::sync::mpsc;

/// Abstraction over a window manager that reports focus, workspaces and
/// outputs, and accepts string commands.
///
/// An implementation might talk to i3 or sway via IPC, or it might be a
/// recording stub used in tests.
pub trait WindowManager {
    /// The error type produced by this window manager.
    type Error: std::error::Error + Send + 'static;

    /// Locate the focused container and its workspace.  `Ok(None)` when
    /// nothing is focused.
    fn focus(&self) -> Result<Option<Focus>, Self::Error>;

    /// Return the list of workspaces that currently exist.
    fn workspaces(&self) -> Result<Vec<WorkspaceInfo>, Self::Error>;

    /// Return the list of outputs the window manager knows about.
    fn outputs(&self) -> Result<Vec<OutputInfo>, Self::Error>;

    /// Run a (possibly semicolon-separated) command string.
    ///
    /// Fire-and-forget from the caller's point of view: an error only means
    /// the window manager rejected at least one sub-command.
    fn run_command(&self, command: &str) -> Result<(), Self::Error>;
}

/// Captures a region of the screen as an RGB buffer.
///
/// Implementations are expected to be fast compared to one frame of the
/// overlay; no retry happens on failure.
pub trait FrameGrabber {
    /// The error type produced by this grabber.
    type Error: std::error::Error + Send + 'static;

    /// Capture `rect` (absolute desktop coordinates).
    fn capture(&self, rect: Rect) -> Result<Screenshot, Self::Error>;
}

/// Something that happened in the window manager and may make the
/// knowledge store stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WmEvent {
    /// A `window` event with its `change` field (`"new"`, `"close"`, …).
    Window(String),
    /// A `workspace` event with its `change` field (`"focus"`, `"init"`, …).
    Workspace(String),
}

/// A source of [`Command`]s.
///
/// Implementations listen on some transport (a Unix socket, an in-memory
/// channel) and forward parsed commands into the provided
/// [`mpsc::Sender`].
///
/// # Contract
///
/// * [`run`](CommandSource::run) **blocks** until the source is exhausted or
///   an unrecoverable error occurs.
/// * Each received command must be sent through `sink` exactly once.
/// * Implementations must be [`Send`] so they can run on a dedicated thread.
pub trait CommandSource: Send {
    /// The error type produced by this source.
    type Error: std::error::Error + Send + 'static;

    /// Start listening and forward every incoming [`Command`] into `sink`.
    ///
    /// This method blocks the calling thread.  To run multiple sources
    /// concurrently, spawn each one on its own thread.
    fn run(&mut self, sink: mpsc::Sender<Command>) -> Result<(), Self::Error>;
}

/// A source of [`WmEvent`]s, typically a window-manager event subscription.
///
/// Same contract as [`CommandSource`]; additionally the source must return
/// once its sink is closed.
pub trait EventSource: Send {
    /// The error type produced by this source.
    type Error: std::error::Error + Send + 'static;

    /// Start listening and forward every relevant event into `sink`.
    fn run(&mut self, sink: mpsc::Sender<WmEvent>) -> Result<(), Self::Error>;
}

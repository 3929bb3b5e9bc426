//! Commands and types used throughout i3expo.
//!
//! This module defines the vocabulary that all components share:
//! [`Command`] describes what the control socket can ask of the daemon,
//! [`WmCommand`] / [`CommandBatch`] describe what the daemon asks of the
//! window manager, and [`Rect`] / [`OutputInfo`] / [`WorkspaceInfo`] /
//! [`WindowInfo`] provide the supporting data types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric identifier the window manager assigns to a workspace container.
pub type WorkspaceId = i64;

/// Numeric identifier of a window container (`con_id`).
pub type WindowId = i64;

/// An axis-aligned rectangle in screen pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge.
    pub fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    /// Whether the point lies inside the rectangle (half-open on the
    /// right and bottom edges).
    pub fn contains(&self, px: f64, py: f64) -> bool {
        px >= self.x as f64
            && py >= self.y as f64
            && px < self.right() as f64
            && py < self.bottom() as f64
    }

    /// Whether the two rectangles share any area.
    pub fn intersects(&self, other: &Rect) -> bool {
        (self.x as i64) < other.right()
            && (other.x as i64) < self.right()
            && (self.y as i64) < other.bottom()
            && (other.y as i64) < self.bottom()
    }

    /// `true` for landscape (and square) rectangles.
    pub fn is_landscape(&self) -> bool {
        self.width >= self.height
    }

    /// Shrink the rectangle by `amount` on every side.  Returns `None` when
    /// nothing would be left.
    pub fn inset(&self, amount: u32) -> Option<Rect> {
        let twice = amount.checked_mul(2)?;
        if self.width <= twice || self.height <= twice {
            return None;
        }
        Some(Rect {
            x: self.x + amount as i32,
            y: self.y + amount as i32,
            width: self.width - twice,
            height: self.height - twice,
        })
    }
}

/// Direction for keyboard navigation across the expo grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Left,
    Right,
    Up,
    Down,
}

impl Direction {
    /// `(d_row, d_col)` step for this direction.
    pub fn delta(self) -> (isize, isize) {
        match self {
            Direction::Left => (0, -1),
            Direction::Right => (0, 1),
            Direction::Up => (-1, 0),
            Direction::Down => (1, 0),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Left => write!(f, "left"),
            Direction::Right => write!(f, "right"),
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

/// Parse a direction from a key or word (case-insensitive; accepts arrow
/// key names and the vi keys `h`, `j`, `k`, `l`).
pub fn parse_direction(s: &str) -> Option<Direction> {
    let normalized: String = s
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_')
        .flat_map(|c| c.to_lowercase())
        .collect();
    match normalized.as_str() {
        "left" | "kpleft" | "h" => Some(Direction::Left),
        "right" | "kpright" | "l" => Some(Direction::Right),
        "up" | "kpup" | "k" => Some(Direction::Up),
        "down" | "kpdown" | "j" => Some(Direction::Down),
        _ => None,
    }
}

/// Every action the control socket can request from the daemon.
///
/// On the wire each command is a JSON string: `"Toggle"`, `"Reload"`,
/// `"Quit"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Open the overlay, or cancel it if it is already open.
    Toggle,
    /// Re-read the configuration file.
    Reload,
    /// Shut the daemon down.
    Quit,
}

impl Command {
    /// Parse the command-line spelling used by `i3expod <command>`.
    pub fn from_arg(arg: &str) -> Option<Command> {
        match arg.trim().to_lowercase().as_str() {
            "toggle" | "show" => Some(Command::Toggle),
            "reload" => Some(Command::Reload),
            "quit" | "exit" => Some(Command::Quit),
            _ => None,
        }
    }
}

/// Static information about an output known to the window manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputInfo {
    /// Unique name the window manager uses for this output (e.g. `"DP-1"`).
    pub name: String,
    /// Position and size on the virtual desktop.
    pub rect: Rect,
    /// Whether the output is currently in use.
    pub active: bool,
    /// Whether the display configuration marks this output as primary.
    pub primary: bool,
    /// Name of the workspace currently visible on this output.
    pub current_workspace: Option<String>,
}

/// A workspace as reported by the window manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceInfo {
    pub id: WorkspaceId,
    /// Workspace number, if the name starts with one.
    pub num: Option<i64>,
    pub name: String,
    pub visible: bool,
    pub focused: bool,
    pub output: String,
    pub rect: Rect,
}

/// Minimal information about a window container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    pub id: WindowId,
    /// Human-readable title.
    pub name: String,
    /// Absolute position and size.
    pub rect: Rect,
}

/// Where keyboard focus currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Focus {
    /// The workspace that contains the focused container.
    pub workspace: WorkspaceInfo,
    /// The focused window, or `None` when the workspace itself is focused
    /// (an empty workspace).
    pub window: Option<WindowInfo>,
}

/// How a command addresses a workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceRef {
    /// An existing workspace, by name.
    Name(String),
    /// A workspace by number; creates it if it does not exist.
    Number(i64),
}

impl fmt::Display for WorkspaceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkspaceRef::Name(name) => write!(f, "{}", quote(name)),
            WorkspaceRef::Number(n) => write!(f, "number {}", n),
        }
    }
}

/// One sub-command of the window manager's command grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WmCommand {
    /// `workspace --no-auto-back-and-forth <ref>`
    Workspace(WorkspaceRef),
    /// `move workspace to output <name>`
    MoveWorkspaceToOutput(String),
    /// `[con_id="<id>"] move container to workspace <ref>`
    MoveContainerToWorkspace {
        window: WindowId,
        target: WorkspaceRef,
    },
}

impl fmt::Display for WmCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Without the flag a switch to the already-focused workspace
            // would bounce back when `workspace_auto_back_and_forth` is set.
            WmCommand::Workspace(target) => {
                write!(f, "workspace --no-auto-back-and-forth {}", target)
            }
            WmCommand::MoveWorkspaceToOutput(output) => {
                write!(f, "move workspace to output {}", quote(output))
            }
            WmCommand::MoveContainerToWorkspace { window, target } => write!(
                f,
                "[con_id=\"{}\"] move container to workspace --no-auto-back-and-forth {}",
                window, target
            ),
        }
    }
}

/// A sequence of [`WmCommand`]s sent as one semicolon-separated request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandBatch(pub Vec<WmCommand>);

impl CommandBatch {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn commands(&self) -> &[WmCommand] {
        &self.0
    }
}

impl fmt::Display for CommandBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, cmd) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", cmd)?;
        }
        Ok(())
    }
}

/// Quote a workspace or output name for the command parser.
fn quote(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 2);
    out.push('"');
    for c in raw.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

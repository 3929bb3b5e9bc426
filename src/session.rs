//! The interaction state machine of one overlay session.
//!
//! A [`Session`] is built from a frozen knowledge snapshot and fed
//! [`InputEvent`]s once per frame.  It tracks focus in two modes (pointer
//! hover and keyboard navigation over the [`NavMatrix`](crate::grid::NavMatrix)),
//! lets the focused window's thumbnail be dragged onto another tile, and
//! finally resolves to a commit or a cancel.  The resolution is turned into
//! a [`CommandBatch`] by [`Session::commands`]; the session itself never
//! talks to the window manager.
//!
//! ```text
//! Focused(mouse | keyboard) ──pointer down on thumbnail──▶ Dragging
//!        │   ▲                                                │
//!        │   └──────────── release on origin / outside ───────┤
//!        │                                                    │
//!  Enter / click                                   release on other tile
//!        ▼                                                    ▼
//!   Committed(Jump)        Escape / close ──▶ Cancelled   Committed(MoveWindow)
//! ```

use crate::allocator::Placeholder;
use crate::command::{
    parse_direction, CommandBatch, Direction, Rect, WindowId, WmCommand, WorkspaceId,
    WorkspaceRef,
};
use crate::grid::{fit, pack, Layout, PackParams};
use crate::knowledge::{Knowledge, Screenshot};
use crate::tile::{collect_tiles, Tile, TileKey};
use log::{debug, warn};
use std::collections::VecDeque;

/// Button number of the primary (left) pointer button.
pub const PRIMARY_BUTTON: u32 = 1;

/// A key, reduced to what the overlay reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Direction(Direction),
    Enter,
    Escape,
    Other,
}

impl Key {
    /// Map a key name (`"Left"`, `"KP_Enter"`, `"l"`, …).
    pub fn from_name(name: &str) -> Key {
        match name {
            "Return" | "KP_Enter" | "ISO_Enter" => Key::Enter,
            "Escape" => Key::Escape,
            other => parse_direction(other).map_or(Key::Other, Key::Direction),
        }
    }
}

/// Raw input delivered by the renderer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    PointerMotion { x: f64, y: f64 },
    PointerDown { button: u32, x: f64, y: f64 },
    PointerUp { button: u32, x: f64, y: f64 },
    Key(Key),
    /// The overlay window was closed from outside.
    CloseRequested,
}

impl InputEvent {
    fn is_pointer(&self) -> bool {
        matches!(
            self,
            InputEvent::PointerMotion { .. }
                | InputEvent::PointerDown { .. }
                | InputEvent::PointerUp { .. }
        )
    }
}

/// Buffers input between frames and hands out one coalesced frame at a
/// time.
#[derive(Debug, Default)]
pub struct InputQueue {
    events: VecDeque<InputEvent>,
}

impl InputQueue {
    pub fn push(&mut self, event: InputEvent) {
        self.events.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// The events to process this frame.
    ///
    /// Consecutive pointer motions collapse into the latest one.  A pointer
    /// press ends the frame (what follows is handled next frame).  A key or
    /// a pointer release ends the frame and discards the rest of the queued
    /// input from the same device; a close request discards everything.
    pub fn take_frame(&mut self) -> Vec<InputEvent> {
        let mut frame: Vec<InputEvent> = Vec::new();
        while let Some(event) = self.events.pop_front() {
            match event {
                InputEvent::PointerMotion { .. } => {
                    match frame.last_mut() {
                        Some(last) if matches!(last, InputEvent::PointerMotion { .. }) => {
                            *last = event
                        }
                        _ => frame.push(event),
                    }
                }
                InputEvent::PointerDown { .. } => {
                    frame.push(event);
                    break;
                }
                InputEvent::PointerUp { .. } => {
                    frame.push(event);
                    self.events.retain(|e| !e.is_pointer());
                    break;
                }
                InputEvent::Key(_) => {
                    frame.push(event);
                    self.events.retain(|e| !matches!(e, InputEvent::Key(_)));
                    break;
                }
                InputEvent::CloseRequested => {
                    frame.push(event);
                    self.events.clear();
                    break;
                }
            }
        }
        frame
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Mouse,
    Keyboard,
}

/// The focused window as shown floating above its workspace's tile.
#[derive(Debug, Clone, PartialEq)]
pub struct FloatingWindow {
    pub id: WindowId,
    pub name: String,
    /// Workspace the window lives on.
    pub origin: WorkspaceId,
    /// Resting position, in overlay coordinates.
    pub rect: Rect,
    pub screenshot: Option<Screenshot>,
}

/// Present only while the floating window is being dragged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragState {
    /// Upper-left corner of the dragged thumbnail.
    pub pos: (f64, f64),
    /// Pointer position relative to `pos` at grab time.
    pub offset: (f64, f64),
    pub origin: WorkspaceId,
    /// Slot under the pointer.
    pub target: Option<usize>,
}

/// How a committed session ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Switch to the tile's workspace, creating it for a placeholder.
    Jump(TileKey),
    /// Move the captured window onto the tile's workspace.
    MoveWindow { window: WindowId, target: TileKey },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Focused { mode: Mode, focus: Option<usize> },
    Dragging { focus: Option<usize>, drag: DragState },
    Committed(Resolution),
    Cancelled,
}

pub struct Session {
    tiles: Vec<Tile>,
    layout: Layout,
    state: SessionState,
    window: Option<FloatingWindow>,
    /// Name of the workspace visible on the primary output at start.
    primary_workspace: Option<String>,
}

impl Session {
    /// Lay out `knowledge` plus `placeholders` and start in mouse mode with
    /// the active workspace focused.
    pub fn new(
        knowledge: &Knowledge,
        placeholders: &[Placeholder],
        params: &PackParams,
        thumb_stretch: bool,
    ) -> Self {
        let tiles = collect_tiles(knowledge, placeholders);
        let layout = pack(&tiles, params);
        if !layout.dropped.is_empty() {
            warn!(
                "{} tile(s) do not fit on the overlay and are hidden",
                layout.dropped.len()
            );
        }

        let active_slot = knowledge.active().and_then(|id| {
            let tile = tiles.iter().position(|t| t.key == TileKey::Workspace(id))?;
            layout.index_of_tile(tile)
        });
        let focus = active_slot.or((!layout.placed.is_empty()).then_some(0));

        let window = active_slot.and_then(|slot| {
            let record = knowledge.workspace(knowledge.active()?)?;
            let capture = record.focused_window.as_ref()?;
            let inner = layout.placed[slot].rect.inset(params.frame_width)?;
            let shown = fit(record.size, inner, thumb_stretch);
            let sx = shown.width as f64 / record.size.0.max(1) as f64;
            let sy = shown.height as f64 / record.size.1.max(1) as f64;
            Some(FloatingWindow {
                id: capture.id,
                name: capture.name.clone(),
                origin: record.id,
                rect: Rect::new(
                    shown.x + (capture.rect.x as f64 * sx).round() as i32,
                    shown.y + (capture.rect.y as f64 * sy).round() as i32,
                    (capture.rect.width as f64 * sx).round() as u32,
                    (capture.rect.height as f64 * sy).round() as u32,
                ),
                screenshot: capture.screenshot.clone(),
            })
        });

        let primary_workspace = knowledge
            .visible_primary()
            .and_then(|id| knowledge.workspace(id))
            .map(|w| w.name.clone());

        Self {
            tiles,
            layout,
            state: SessionState::Focused {
                mode: Mode::Mouse,
                focus,
            },
            window,
            primary_workspace,
        }
    }

    //  Accessors

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn window(&self) -> Option<&FloatingWindow> {
        self.window.as_ref()
    }

    /// Focused slot (index into the layout's placed tiles).
    pub fn focus(&self) -> Option<usize> {
        match &self.state {
            SessionState::Focused { focus, .. } | SessionState::Dragging { focus, .. } => *focus,
            _ => None,
        }
    }

    pub fn drag(&self) -> Option<&DragState> {
        match &self.state {
            SessionState::Dragging { drag, .. } => Some(drag),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.state,
            SessionState::Committed(_) | SessionState::Cancelled
        )
    }

    /// Tile shown in slot `slot`.
    pub fn tile_at(&self, slot: usize) -> Option<&Tile> {
        self.tiles.get(self.layout.placed.get(slot)?.tile)
    }

    //  Input

    /// Process one frame of input.
    pub fn handle_frame(&mut self, events: impl IntoIterator<Item = InputEvent>) {
        for event in events {
            if self.is_finished() {
                break;
            }
            self.handle(event);
        }
    }

    pub fn handle(&mut self, event: InputEvent) {
        debug!("input {:?}", event);
        let state = std::mem::replace(&mut self.state, SessionState::Cancelled);
        self.state = match (state, event) {
            (done @ (SessionState::Committed(_) | SessionState::Cancelled), _) => done,

            (_, InputEvent::CloseRequested) | (_, InputEvent::Key(Key::Escape)) => {
                SessionState::Cancelled
            }

            (SessionState::Focused { focus, .. }, InputEvent::PointerMotion { x, y }) => {
                SessionState::Focused {
                    mode: Mode::Mouse,
                    focus: self.layout.hit(x, y).or(focus),
                }
            }
            (SessionState::Dragging { focus, mut drag }, InputEvent::PointerMotion { x, y }) => {
                drag.pos = (x - drag.offset.0, y - drag.offset.1);
                drag.target = self.layout.hit(x, y);
                SessionState::Dragging {
                    focus: drag.target.or(focus),
                    drag,
                }
            }

            (SessionState::Focused { focus, .. }, InputEvent::PointerDown { button, x, y })
                if button == PRIMARY_BUTTON =>
            {
                match self.window.as_ref().filter(|w| w.rect.contains(x, y)) {
                    Some(window) => {
                        let target = self.layout.hit(x, y);
                        SessionState::Dragging {
                            focus: target.or(focus),
                            drag: DragState {
                                pos: (window.rect.x as f64, window.rect.y as f64),
                                offset: (x - window.rect.x as f64, y - window.rect.y as f64),
                                origin: window.origin,
                                target,
                            },
                        }
                    }
                    None => SessionState::Focused {
                        mode: Mode::Mouse,
                        focus: self.layout.hit(x, y).or(focus),
                    },
                }
            }

            (SessionState::Dragging { focus, drag }, InputEvent::PointerUp { button, x, y })
                if button == PRIMARY_BUTTON =>
            {
                self.drop_window(focus, &drag, x, y)
            }
            (SessionState::Focused { focus, .. }, InputEvent::PointerUp { button, x, y })
                if button == PRIMARY_BUTTON =>
            {
                self.jump(self.layout.hit(x, y).or(focus), Mode::Mouse)
            }

            (SessionState::Focused { focus, .. }, InputEvent::Key(Key::Direction(d))) => {
                let next = match focus {
                    Some(from) => self.layout.nav.step(from, d),
                    None => self.layout.nav.get(0, 0),
                };
                SessionState::Focused {
                    mode: Mode::Keyboard,
                    focus: next,
                }
            }
            (SessionState::Focused { focus, .. }, InputEvent::Key(Key::Enter)) => {
                self.jump(focus, Mode::Keyboard)
            }
            (SessionState::Focused { focus, .. }, InputEvent::Key(Key::Other)) => {
                SessionState::Focused {
                    mode: Mode::Keyboard,
                    focus,
                }
            }

            // Other buttons, and keys while dragging.
            (state, _) => state,
        };
    }

    fn jump(&self, focus: Option<usize>, mode: Mode) -> SessionState {
        match focus.and_then(|slot| self.tile_at(slot)) {
            Some(tile) => SessionState::Committed(Resolution::Jump(tile.key.clone())),
            None => SessionState::Focused { mode, focus },
        }
    }

    fn drop_window(&self, focus: Option<usize>, drag: &DragState, x: f64, y: f64) -> SessionState {
        let target = self
            .layout
            .hit(x, y)
            .and_then(|slot| self.tile_at(slot))
            .filter(|tile| tile.key != TileKey::Workspace(drag.origin));
        match (target, &self.window) {
            (Some(tile), Some(window)) => SessionState::Committed(Resolution::MoveWindow {
                window: window.id,
                target: tile.key.clone(),
            }),
            _ => SessionState::Focused {
                mode: Mode::Mouse,
                focus: self.layout.hit(x, y).or(focus),
            },
        }
    }

    //  Outcome

    fn workspace_ref(&self, key: &TileKey) -> Option<WorkspaceRef> {
        match key {
            TileKey::Workspace(id) => self
                .tiles
                .iter()
                .find(|t| &t.key == key)
                .map(|t| WorkspaceRef::Name(t.label.clone()))
                .or_else(|| {
                    warn!("workspace {} vanished from the session", id);
                    None
                }),
            TileKey::Placeholder { num, .. } => Some(WorkspaceRef::Number(*num)),
        }
    }

    /// Commands that realise the session's outcome.  Empty while the
    /// session is still running.
    pub fn commands(&self) -> CommandBatch {
        let transit = self
            .primary_workspace
            .clone()
            .map(|name| WmCommand::Workspace(WorkspaceRef::Name(name)));

        let mut cmds: Vec<WmCommand> = Vec::new();
        match &self.state {
            SessionState::Focused { .. } | SessionState::Dragging { .. } => {}
            SessionState::Cancelled => cmds.extend(transit),
            SessionState::Committed(Resolution::Jump(key)) => {
                // Pass through the primary output's workspace first so the
                // window manager's back-and-forth history points there.
                cmds.extend(transit);
                if let Some(target) = self.workspace_ref(key) {
                    cmds.push(WmCommand::Workspace(target));
                }
                if let TileKey::Placeholder { output, .. } = key {
                    cmds.push(WmCommand::MoveWorkspaceToOutput(output.clone()));
                }
            }
            SessionState::Committed(Resolution::MoveWindow { window, target }) => {
                if let Some(target) = self.workspace_ref(target) {
                    cmds.push(WmCommand::MoveContainerToWorkspace {
                        window: *window,
                        target,
                    });
                }
            }
        }
        cmds.dedup();
        CommandBatch(cmds)
    }
}

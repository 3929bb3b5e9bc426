//! Overlay lifecycle.
//!
//! [`OverlayController`] sits between the control surface and the renderer.
//! It opens a [`Session`] on toggle (freezing the knowledge store for the
//! session's lifetime) and feeds it one frame of input at a time.
//!
//! Closing takes two steps.  When the session resolves, its captures are
//! dropped and the overlay enters a closing state with the store still
//! frozen.  The renderer then takes the overlay off the screen and calls
//! [`OverlayController::release`], which hands the [`CommandBatch`] to the
//! command dispatcher and lifts the freeze.  No workspace switch may run
//! while the overlay is still mapped.
//!
//! The controller never runs window-manager commands itself; batches leave
//! through an [`mpsc::Sender`] so a slow IPC round-trip cannot stall the
//! frame loop.

use crate::allocator::{self, AllocationPolicy};
use crate::command::{CommandBatch, Rect};
use crate::grid::PackParams;
use crate::knowledge::{KnowledgeStore, OutputRecord, FALLBACK_WORKSPACE_SIZE};
use crate::session::{InputEvent, InputQueue, Session};
use crate::sync::capture_session_start;
use crate::traits::{FrameGrabber, WindowManager};
use log::{debug, info, warn};
use std::sync::mpsc;
use std::sync::Arc;

/// The parts of the configuration a session is built from.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub padding_percent: (f64, f64),
    pub spacing_percent: (f64, f64),
    pub frame_width: u32,
    pub thumb_stretch: bool,
    /// `None` disables placeholder tiles.
    pub new_workspaces: Option<AllocationPolicy>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            padding_percent: (5.0, 5.0),
            spacing_percent: (5.0, 5.0),
            frame_width: 5,
            thumb_stretch: false,
            new_workspaces: Some(AllocationPolicy::Sequential),
        }
    }
}

/// An open overlay.
pub struct ActiveOverlay {
    pub session: Session,
    /// Output the overlay covers; `None` if no output is known.
    pub output: Option<OutputRecord>,
    /// Overlay size in pixels.
    pub screen: (u32, u32),
    queue: InputQueue,
}

enum Overlay {
    Idle,
    Active(Box<ActiveOverlay>),
    /// Resolved; waiting for [`OverlayController::release`].
    Closing(CommandBatch),
}

/// What a call to [`OverlayController::frame`] found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    Idle,
    Running,
    /// The session resolved this frame.  Hide the overlay, then call
    /// [`OverlayController::release`].
    Closed(CommandBatch),
}

pub struct OverlayController<W, G> {
    store: Arc<KnowledgeStore>,
    wm: W,
    grabber: G,
    settings: SessionSettings,
    batches: mpsc::Sender<CommandBatch>,
    overlay: Overlay,
}

impl<W: WindowManager, G: FrameGrabber> OverlayController<W, G> {
    pub fn new(
        store: Arc<KnowledgeStore>,
        wm: W,
        grabber: G,
        settings: SessionSettings,
        batches: mpsc::Sender<CommandBatch>,
    ) -> Self {
        Self {
            store,
            wm,
            grabber,
            settings,
            batches,
            overlay: Overlay::Idle,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.overlay, Overlay::Active(_))
    }

    pub fn active(&self) -> Option<&ActiveOverlay> {
        match &self.overlay {
            Overlay::Active(active) => Some(active),
            Overlay::Idle | Overlay::Closing(_) => None,
        }
    }

    /// A session resolved but [`release`](Self::release) has not run yet.
    pub fn is_closing(&self) -> bool {
        matches!(self.overlay, Overlay::Closing(_))
    }

    pub fn store(&self) -> &Arc<KnowledgeStore> {
        &self.store
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Takes effect from the next session on.
    pub fn set_settings(&mut self, settings: SessionSettings) {
        self.settings = settings;
    }

    /// Open the overlay, or cancel the open one.  Returns whether the
    /// overlay is open afterwards.
    pub fn toggle(&mut self) -> bool {
        if self.is_active() {
            self.cancel();
            false
        } else {
            self.open()
        }
    }

    /// Freeze the store, snapshot the session start and lay out the tiles.
    /// Returns `false` if the store was already frozen.
    pub fn open(&mut self) -> bool {
        if self.is_active() {
            return true;
        }
        self.release();
        if !self.store.freeze() {
            warn!("knowledge store already frozen, not opening the overlay");
            return false;
        }
        let start = capture_session_start(&self.store, &self.wm, &self.grabber);
        debug!("session start: {:?}", start);

        let k = self.store.read();
        let output = k.primary_output().cloned();
        let screen = output
            .as_ref()
            .map(|o| (o.rect.width, o.rect.height))
            .filter(|(w, h)| *w > 0 && *h > 0)
            .unwrap_or(FALLBACK_WORKSPACE_SIZE);
        let placeholders = match self.settings.new_workspaces {
            Some(policy) => allocator::for_session(&k, policy),
            None => Vec::new(),
        };
        let params = PackParams {
            screen_width: screen.0,
            screen_height: screen.1,
            padding_percent: self.settings.padding_percent,
            spacing_percent: self.settings.spacing_percent,
            frame_width: self.settings.frame_width,
        };
        let session = Session::new(&k, &placeholders, &params, self.settings.thumb_stretch);
        drop(k);

        info!(
            "overlay opened with {} tile(s) on {}",
            session.layout().placed.len(),
            output.as_ref().map_or("<unknown output>", |o| o.name.as_str())
        );
        self.overlay = Overlay::Active(Box::new(ActiveOverlay {
            session,
            output,
            screen,
            queue: InputQueue::default(),
        }));
        true
    }

    /// Queue input for the next frame.  Ignored while idle.
    pub fn push_input(&mut self, event: InputEvent) {
        if let Overlay::Active(active) = &mut self.overlay {
            active.queue.push(event);
        }
    }

    /// Process one frame of queued input.
    pub fn frame(&mut self) -> FrameOutcome {
        let Overlay::Active(active) = &mut self.overlay else {
            return FrameOutcome::Idle;
        };
        let events = active.queue.take_frame();
        active.session.handle_frame(events);
        if active.session.is_finished() {
            FrameOutcome::Closed(self.close())
        } else {
            FrameOutcome::Running
        }
    }

    /// Cancel the open session, restoring the primary output's workspace.
    pub fn cancel(&mut self) -> Option<CommandBatch> {
        let Overlay::Active(active) = &mut self.overlay else {
            return None;
        };
        active.session.handle(InputEvent::CloseRequested);
        Some(self.close())
    }

    /// Drop the session and its captures.  The store stays frozen until
    /// [`release`](Self::release).
    fn close(&mut self) -> CommandBatch {
        let overlay = std::mem::replace(&mut self.overlay, Overlay::Idle);
        let Overlay::Active(active) = overlay else {
            self.overlay = overlay;
            return CommandBatch::default();
        };
        let batch = active.session.commands();
        info!("overlay closed: {:?}", active.session.state());
        drop(active);
        self.store.write().release_session_captures();
        self.overlay = Overlay::Closing(batch.clone());
        batch
    }

    /// Once the overlay is off the screen: queue the closed session's
    /// commands and unfreeze the store.  Returns `false` if nothing was
    /// closing.
    pub fn release(&mut self) -> bool {
        if !self.is_closing() {
            return false;
        }
        let Overlay::Closing(batch) = std::mem::replace(&mut self.overlay, Overlay::Idle) else {
            return false;
        };
        if !batch.is_empty() {
            debug!("queueing commands: {}", batch);
            if let Err(mpsc::SendError(batch)) = self.batches.send(batch) {
                warn!("command dispatcher is gone, dropping: {}", batch);
            }
        }
        self.store.unfreeze();
        true
    }
}

/// The overlay's drawing area in desktop coordinates.
pub fn overlay_rect(active: &ActiveOverlay) -> Rect {
    let (x, y) = active.output.as_ref().map_or((0, 0), |o| (o.rect.x, o.rect.y));
    Rect::new(x, y, active.screen.0, active.screen.1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Direction, OutputInfo, WmCommand, WorkspaceRef};
    use crate::session::Key;
    use crate::sync::tests::{workspace, MockGrabber, MockWm};
    use crate::tile::TileKey;

    fn controller(
        wm: MockWm,
        settings: SessionSettings,
    ) -> (
        OverlayController<MockWm, MockGrabber>,
        mpsc::Receiver<CommandBatch>,
    ) {
        let store = Arc::new(KnowledgeStore::default());
        store
            .write()
            .observe_workspaces(&wm.workspaces.lock().unwrap());
        let (tx, rx) = mpsc::channel();
        (
            OverlayController::new(store, wm, MockGrabber::default(), settings, tx),
            rx,
        )
    }

    /// Three workspaces with "3" visible; the tree cannot be read, so
    /// nothing is focused.
    fn three_workspaces() -> MockWm {
        let wm = MockWm::sample();
        *wm.tree.lock().unwrap() = None;
        *wm.workspaces.lock().unwrap() = vec![
            workspace(1, "1", false),
            workspace(2, "2", false),
            workspace(3, "3", true),
        ];
        *wm.outputs.lock().unwrap() = vec![OutputInfo {
            name: "DP-1".into(),
            rect: Rect::new(0, 0, 1920, 1080),
            active: true,
            primary: true,
            current_workspace: Some("3".into()),
        }];
        wm
    }

    #[test]
    fn open_freezes_and_release_unfreezes() {
        let (mut c, _rx) = controller(MockWm::sample(), SessionSettings::default());
        assert!(c.toggle());
        assert!(c.store().is_frozen());
        assert!(c.active().is_some());
        assert!(!c.toggle());
        assert!(c.is_closing());
        assert!(c.store().is_frozen());
        assert!(c.release());
        assert!(!c.store().is_frozen());
        assert!(!c.is_active());
        assert!(!c.release());
    }

    #[test]
    fn escape_restores_visible_workspace() {
        let (mut c, rx) = controller(three_workspaces(), SessionSettings::default());
        c.toggle();
        c.push_input(InputEvent::Key(Key::Direction(Direction::Down)));
        assert_eq!(c.frame(), FrameOutcome::Running);
        c.push_input(InputEvent::Key(Key::Escape));
        let outcome = c.frame();
        let expected = CommandBatch(vec![WmCommand::Workspace(WorkspaceRef::Name("3".into()))]);
        assert_eq!(outcome, FrameOutcome::Closed(expected.clone()));

        // Nothing leaves before the overlay is released.
        assert!(rx.try_recv().is_err());
        assert!(c.store().is_frozen());
        assert_eq!(c.frame(), FrameOutcome::Idle);

        assert!(c.release());
        assert_eq!(rx.try_recv().unwrap(), expected);
        assert!(!c.store().is_frozen());
    }

    #[test]
    fn session_start_captures_focused_window() {
        let (mut c, _rx) = controller(MockWm::sample(), SessionSettings::default());
        c.open();
        let active = c.active().unwrap();
        let window = active.session.window().expect("firefox is focused");
        assert_eq!(window.id, 203);
        assert_eq!(active.output.as_ref().map(|o| o.name.as_str()), Some("DP-1"));
        assert_eq!(overlay_rect(active), Rect::new(0, 0, 1920, 1080));
        assert_eq!(
            c.store().read().workspace(200).unwrap().focused_window.as_ref().map(|w| w.id),
            Some(203)
        );

        c.cancel();
        let k = c.store().read();
        assert!(k.workspace(200).unwrap().focused_window.is_none());
        assert_eq!(k.visible_primary(), None);
    }

    #[test]
    fn placeholders_follow_settings() {
        let (mut c, _rx) = controller(three_workspaces(), SessionSettings::default());
        c.open();
        let keys: Vec<TileKey> = c
            .active()
            .unwrap()
            .session
            .tiles()
            .iter()
            .map(|t| t.key.clone())
            .collect();
        assert_eq!(
            keys,
            vec![
                TileKey::Workspace(1),
                TileKey::Workspace(2),
                TileKey::Workspace(3),
                TileKey::Placeholder {
                    num: 1000,
                    output: "DP-1".into()
                },
            ]
        );
        c.cancel();

        c.set_settings(SessionSettings {
            new_workspaces: None,
            ..SessionSettings::default()
        });
        c.open();
        assert_eq!(c.active().unwrap().session.tiles().len(), 3);
    }

    #[test]
    fn enter_on_active_workspace_sends_one_switch() {
        let (mut c, rx) = controller(MockWm::sample(), SessionSettings::default());
        c.open();
        c.push_input(InputEvent::Key(Key::Enter));
        assert!(matches!(c.frame(), FrameOutcome::Closed(_)));
        c.release();
        assert_eq!(
            rx.try_recv().unwrap().to_string(),
            "workspace --no-auto-back-and-forth \"2: web\""
        );
    }

    #[test]
    fn does_not_open_over_a_foreign_freeze() {
        let (mut c, _rx) = controller(MockWm::sample(), SessionSettings::default());
        assert!(c.store().freeze());
        assert!(!c.open());
        assert!(!c.is_active());
        assert_eq!(c.frame(), FrameOutcome::Idle);
        assert!(c.cancel().is_none());
    }

    #[test]
    fn input_while_idle_is_dropped() {
        let (mut c, rx) = controller(MockWm::sample(), SessionSettings::default());
        c.push_input(InputEvent::Key(Key::Enter));
        c.open();
        assert_eq!(c.frame(), FrameOutcome::Running);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn reopening_releases_a_pending_close() {
        let (mut c, rx) = controller(three_workspaces(), SessionSettings::default());
        c.open();
        c.cancel();
        assert!(c.is_closing());
        assert!(c.toggle());
        assert_eq!(rx.try_recv().unwrap().to_string(), "workspace --no-auto-back-and-forth \"3\"");
        assert!(c.store().is_frozen());
        assert!(c.is_active());
    }
}

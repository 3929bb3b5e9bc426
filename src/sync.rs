//! The knowledge synchronizer.
//!
//! [`Synchronizer::sync`] reconciles the [`KnowledgeStore`] with the live
//! window-manager state: vanished workspaces are evicted, the workspace
//! holding keyboard focus is captured and marked active.  Requests that
//! arrive within the configured minimum interval of the previous sync are
//! dropped by a [`RateLimiter`].
//!
//! [`capture_session_start`] is the one-off snapshot taken when an overlay
//! session opens, after the store has been frozen.

use crate::command::{Focus, OutputInfo, Rect, WindowId, WorkspaceId, WorkspaceInfo};
use crate::knowledge::{FocusedWindowCapture, KnowledgeStore};
use crate::traits::{FrameGrabber, WindowManager};
use log::{debug, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Drops sync requests that arrive too soon after the previous one.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    min_interval: Duration,
    last: Option<Instant>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn set_min_interval(&mut self, min_interval: Duration) {
        self.min_interval = min_interval;
    }

    /// Whether a sync may run at `now`.
    pub fn ready(&self, now: Instant) -> bool {
        self.last
            .map_or(true, |last| now.saturating_duration_since(last) >= self.min_interval)
    }

    /// Record a completed sync.
    pub fn mark(&mut self, now: Instant) {
        self.last = Some(now);
    }

    /// Forget the previous sync so the next request runs immediately.
    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// What a call to [`Synchronizer::sync`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// An overlay session holds the freeze; nothing was touched.
    Frozen,
    /// Dropped by the rate limiter.
    Throttled,
    /// The store was updated and `active` marked active.
    Synced {
        active: WorkspaceId,
        captured: bool,
    },
    /// Nothing could be captured; metadata may still have been refreshed.
    Skipped(String),
}

pub struct Synchronizer<W, G> {
    store: Arc<KnowledgeStore>,
    wm: W,
    grabber: G,
    limiter: RateLimiter,
}

impl<W: WindowManager, G: FrameGrabber> Synchronizer<W, G> {
    pub fn new(store: Arc<KnowledgeStore>, wm: W, grabber: G, min_interval: Duration) -> Self {
        Self {
            store,
            wm,
            grabber,
            limiter: RateLimiter::new(min_interval),
        }
    }

    pub fn store(&self) -> &Arc<KnowledgeStore> {
        &self.store
    }

    pub fn limiter_mut(&mut self) -> &mut RateLimiter {
        &mut self.limiter
    }

    /// A workspace switch just happened: make sure the next request is not
    /// throttled by timing from the previous workspace.
    pub fn reset_limiter(&mut self) {
        self.limiter.reset();
    }

    pub fn sync(&mut self) -> SyncOutcome {
        self.sync_at(Instant::now())
    }

    pub fn sync_at(&mut self, now: Instant) -> SyncOutcome {
        if self.store.is_frozen() {
            return SyncOutcome::Frozen;
        }
        if !self.limiter.ready(now) {
            return SyncOutcome::Throttled;
        }
        let outcome = self.run_sync();
        if outcome != SyncOutcome::Frozen {
            self.limiter.mark(now);
        }
        debug!("sync: {:?}", outcome);
        outcome
    }

    fn run_sync(&mut self) -> SyncOutcome {
        let (focus, workspaces, outputs) = match query(&self.wm) {
            Ok(state) => state,
            Err(reason) => {
                warn!("sync skipped: {}", reason);
                return SyncOutcome::Skipped(reason);
            }
        };

        let Some(focus) = focus else {
            let applied = self.store.update_unless_frozen(|k| {
                k.observe_workspaces(&workspaces);
                k.set_outputs(&outputs);
            });
            return match applied {
                Some(()) => SyncOutcome::Skipped("no focused workspace".into()),
                None => SyncOutcome::Frozen,
            };
        };
        let info = resolve_workspace(&focus, &workspaces);

        // Capture outside the lock; a slow grabber must not stall readers.
        let screenshot = match self.grabber.capture(info.rect) {
            Ok(shot) => Some(shot),
            Err(e) => {
                warn!("capture of workspace {:?} failed: {}", info.name, e);
                None
            }
        };
        let captured = screenshot.is_some();

        let applied = self.store.update_unless_frozen(|k| {
            k.observe_workspaces(&workspaces);
            k.set_outputs(&outputs);
            k.record_capture(&info, screenshot);
        });
        match applied {
            Some(()) => SyncOutcome::Synced {
                active: info.id,
                captured,
            },
            None => SyncOutcome::Frozen,
        }
    }
}

type LiveState = (Option<Focus>, Vec<WorkspaceInfo>, Vec<OutputInfo>);

fn query<W: WindowManager>(wm: &W) -> Result<LiveState, String> {
    let focus = wm.focus().map_err(|e| format!("focus: {}", e))?;
    let workspaces = wm.workspaces().map_err(|e| format!("workspaces: {}", e))?;
    let outputs = wm.outputs().map_err(|e| format!("outputs: {}", e))?;
    Ok((focus, workspaces, outputs))
}

/// Prefer the workspace list's entry (it carries the visible/focused flags
/// and the final rect) over the one reconstructed from the tree.
fn resolve_workspace(focus: &Focus, workspaces: &[WorkspaceInfo]) -> WorkspaceInfo {
    workspaces
        .iter()
        .find(|w| w.id == focus.workspace.id)
        .cloned()
        .unwrap_or_else(|| focus.workspace.clone())
}

//  Session start

/// What [`capture_session_start`] found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStart {
    /// Workspace visible on the primary output; the restore target on
    /// cancel and the transit point on jump.
    pub visible_primary: Option<WorkspaceId>,
    /// The focused window that was captured, if any.
    pub focused_window: Option<WindowId>,
}

/// Snapshot the focused window and the workspace visible on the primary
/// output.  Must be called by the holder of the freeze.
pub fn capture_session_start<W, G>(store: &KnowledgeStore, wm: &W, grabber: &G) -> SessionStart
where
    W: WindowManager,
    G: FrameGrabber,
{
    let focus = match wm.focus() {
        Ok(focus) => focus,
        Err(e) => {
            warn!("session start: cannot locate focus: {}", e);
            None
        }
    };
    let outputs = wm.outputs().unwrap_or_else(|e| {
        warn!("session start: cannot list outputs: {}", e);
        Vec::new()
    });
    let workspaces = wm.workspaces().unwrap_or_else(|e| {
        warn!("session start: cannot list workspaces: {}", e);
        Vec::new()
    });

    let window_capture = focus.as_ref().and_then(|f| {
        let window = f.window.as_ref()?;
        let screenshot = grabber
            .capture(window.rect)
            .map_err(|e| warn!("capture of focused window failed: {}", e))
            .ok();
        Some((f.workspace.id, capture_window(window, &f.workspace.rect, screenshot)))
    });

    let mut k = store.write();
    if !outputs.is_empty() {
        k.set_outputs(&outputs);
    }
    if let Some(f) = &focus {
        k.mark_active(f.workspace.id);
    }
    let focused_window = match window_capture {
        Some((workspace, capture)) => {
            let id = capture.id;
            k.set_focused_window(workspace, Some(capture));
            Some(id)
        }
        None => {
            if let Some(active) = k.active() {
                k.set_focused_window(active, None);
            }
            None
        }
    };

    let primary = k.primary_output().map(|o| o.name.clone());
    let visible_primary = primary.and_then(|name| {
        workspaces
            .iter()
            .find(|w| w.visible && w.output == name)
            .map(|w| w.id)
    });
    if visible_primary.is_none() {
        warn!("no workspace visible on the primary output");
    }
    k.set_visible_primary(visible_primary);

    SessionStart {
        visible_primary,
        focused_window,
    }
}

fn capture_window(
    window: &crate::command::WindowInfo,
    workspace_rect: &Rect,
    screenshot: Option<crate::knowledge::Screenshot>,
) -> FocusedWindowCapture {
    FocusedWindowCapture {
        id: window.id,
        name: window.name.clone(),
        rect: Rect::new(
            window.rect.x - workspace_rect.x,
            window.rect.y - workspace_rect.y,
            window.rect.width,
            window.rect.height,
        ),
        screenshot,
    }
}

//! The knowledge store: what i3expo currently believes about workspaces
//! and outputs.
//!
//! [`Knowledge`] is a plain owned state object.  [`KnowledgeStore`] wraps it
//! for cross-thread use: the background [`Synchronizer`](crate::sync::Synchronizer)
//! is the only writer while the overlay is closed, and an overlay session
//! *freezes* the store for its whole lifetime so it can read a stable
//! snapshot.  The freeze flag is toggled under the write lock, so a writer
//! that checks the flag while holding the lock can never interleave with a
//! session.

use crate::command::{OutputInfo, Rect, WindowId, WorkspaceId, WorkspaceInfo};
use log::debug;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Size assumed for a workspace that was never captured and whose
/// rectangle is unknown.
pub const FALLBACK_WORKSPACE_SIZE: (u32, u32) = (1920, 1080);

/// An owned, immutable RGB image (3 bytes per pixel, row-major, no padding).
///
/// Cloning is cheap: the pixel buffer is reference-counted.
#[derive(Clone, PartialEq, Eq)]
pub struct Screenshot {
    width: u32,
    height: u32,
    pixels: Arc<[u8]>,
}

impl Screenshot {
    /// Wrap a raw RGB buffer.  Returns `None` if the buffer length does not
    /// match `width * height * 3`, or if either dimension is zero.
    pub fn from_rgb(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(3)?;
        if width == 0 || height == 0 || pixels.len() != expected {
            return None;
        }
        Some(Self {
            width,
            height,
            pixels: pixels.into(),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// The raw RGB bytes.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// RGB triple at `(x, y)`, or `None` when out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 3;
        Some([self.pixels[i], self.pixels[i + 1], self.pixels[i + 2]])
    }
}

impl fmt::Debug for Screenshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Screenshot({}x{})", self.width, self.height)
    }
}

/// The focused window as captured when an overlay session opened.
#[derive(Debug, Clone, PartialEq)]
pub struct FocusedWindowCapture {
    pub id: WindowId,
    pub name: String,
    /// Position relative to the workspace's upper-left corner.
    pub rect: Rect,
    pub screenshot: Option<Screenshot>,
}

/// Everything known about one workspace.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkspaceRecord {
    pub id: WorkspaceId,
    pub num: Option<i64>,
    pub name: String,
    pub output: String,
    /// Native size in pixels.
    pub size: (u32, u32),
    /// Last capture of the workspace, if it was ever visited.
    pub screenshot: Option<Screenshot>,
    /// Only present on the workspace that was active at the last capture.
    pub focused_window: Option<FocusedWindowCapture>,
}

impl WorkspaceRecord {
    fn from_info(info: &WorkspaceInfo) -> Self {
        Self {
            id: info.id,
            num: info.num,
            name: info.name.clone(),
            output: info.output.clone(),
            size: size_of(&info.rect),
            screenshot: None,
            focused_window: None,
        }
    }

    fn refresh(&mut self, info: &WorkspaceInfo) {
        self.num = info.num;
        self.name.clone_from(&info.name);
        self.output.clone_from(&info.output);
        if self.screenshot.is_none() {
            self.size = size_of(&info.rect);
        }
    }
}

fn size_of(rect: &Rect) -> (u32, u32) {
    if rect.width == 0 || rect.height == 0 {
        FALLBACK_WORKSPACE_SIZE
    } else {
        (rect.width, rect.height)
    }
}

/// One output, as of the last sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRecord {
    pub name: String,
    pub rect: Rect,
    /// Display label from the configuration, if any.
    pub alias: Option<String>,
    pub primary: bool,
}

impl OutputRecord {
    /// The alias if one is configured, otherwise the output name.
    pub fn label(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// Point-in-time knowledge about workspaces and outputs.
#[derive(Debug, Default)]
pub struct Knowledge {
    active: Option<WorkspaceId>,
    workspaces: HashMap<WorkspaceId, WorkspaceRecord>,
    outputs: Vec<OutputRecord>,
    visible_primary: Option<WorkspaceId>,
    output_aliases: HashMap<String, String>,
    image_cache: HashMap<String, Screenshot>,
}

impl Knowledge {
    pub fn new(output_aliases: HashMap<String, String>) -> Self {
        Self {
            output_aliases,
            ..Self::default()
        }
    }

    //  Accessors

    /// The workspace that was active at the last successful sync.
    pub fn active(&self) -> Option<WorkspaceId> {
        self.active
    }

    pub fn workspace(&self, id: WorkspaceId) -> Option<&WorkspaceRecord> {
        self.workspaces.get(&id)
    }

    /// All records, in no particular order.
    pub fn workspaces(&self) -> impl Iterator<Item = &WorkspaceRecord> {
        self.workspaces.values()
    }

    /// All record ids, ascending.
    pub fn workspace_ids(&self) -> Vec<WorkspaceId> {
        let mut ids: Vec<WorkspaceId> = self.workspaces.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Workspace numbers in use (the namespace placeholders must avoid).
    pub fn workspace_numbers(&self) -> Vec<i64> {
        self.workspaces.values().filter_map(|w| w.num).collect()
    }

    pub fn outputs(&self) -> &[OutputRecord] {
        &self.outputs
    }

    /// The output flagged primary, else the first known output.
    pub fn primary_output(&self) -> Option<&OutputRecord> {
        self.outputs
            .iter()
            .find(|o| o.primary)
            .or_else(|| self.outputs.first())
    }

    /// Workspace that was visible on the primary output when the current
    /// session started.
    pub fn visible_primary(&self) -> Option<WorkspaceId> {
        self.visible_primary
    }

    //  Mutation

    pub fn set_visible_primary(&mut self, id: Option<WorkspaceId>) {
        self.visible_primary = id;
    }

    /// Replace the output aliases, re-labelling the known outputs.
    pub fn set_output_aliases(&mut self, aliases: HashMap<String, String>) {
        self.output_aliases = aliases;
        for output in &mut self.outputs {
            output.alias = self.output_aliases.get(&output.name).cloned();
        }
    }

    /// Replace the output list with the active outputs in `live`.
    pub fn set_outputs(&mut self, live: &[OutputInfo]) {
        self.outputs = live
            .iter()
            .filter(|o| o.active)
            .map(|o| OutputRecord {
                name: o.name.clone(),
                rect: o.rect,
                alias: self.output_aliases.get(&o.name).cloned(),
                primary: o.primary,
            })
            .collect();
    }

    /// Drop every record whose id is absent from `live_ids`.  Returns the
    /// removed ids, ascending.
    pub fn retain_live(&mut self, live_ids: &[WorkspaceId]) -> Vec<WorkspaceId> {
        let mut removed: Vec<WorkspaceId> = self
            .workspaces
            .keys()
            .filter(|id| !live_ids.contains(id))
            .copied()
            .collect();
        removed.sort_unstable();
        for id in &removed {
            debug!("forgetting workspace {}", id);
            self.workspaces.remove(id);
        }
        if self.active.is_some_and(|a| removed.contains(&a)) {
            self.active = None;
        }
        if self.visible_primary.is_some_and(|v| removed.contains(&v)) {
            self.visible_primary = None;
        }
        removed
    }

    /// Evict vanished workspaces, then create records for new ones and
    /// refresh names/outputs of existing ones.  Screenshots are untouched.
    pub fn observe_workspaces(&mut self, live: &[WorkspaceInfo]) -> Vec<WorkspaceId> {
        let live_ids: Vec<WorkspaceId> = live.iter().map(|w| w.id).collect();
        let removed = self.retain_live(&live_ids);
        for info in live {
            self.workspaces
                .entry(info.id)
                .and_modify(|rec| rec.refresh(info))
                .or_insert_with(|| WorkspaceRecord::from_info(info));
        }
        removed
    }

    /// Upsert the record for `info`, store `screenshot` if there is one
    /// (otherwise the previous capture is kept) and mark it active.
    pub fn record_capture(&mut self, info: &WorkspaceInfo, screenshot: Option<Screenshot>) {
        let record = self
            .workspaces
            .entry(info.id)
            .or_insert_with(|| WorkspaceRecord::from_info(info));
        record.refresh(info);
        if let Some(shot) = screenshot {
            record.size = shot.size();
            record.screenshot = Some(shot);
        }
        self.active = Some(info.id);
    }

    /// Mark an existing record active.  Returns `false` if the id is unknown.
    pub fn mark_active(&mut self, id: WorkspaceId) -> bool {
        if self.workspaces.contains_key(&id) {
            self.active = Some(id);
            true
        } else {
            false
        }
    }

    /// Attach a focused-window capture to `workspace`, clearing it from
    /// every other record.
    pub fn set_focused_window(
        &mut self,
        workspace: WorkspaceId,
        capture: Option<FocusedWindowCapture>,
    ) {
        for record in self.workspaces.values_mut() {
            record.focused_window = None;
        }
        if let Some(record) = self.workspaces.get_mut(&workspace) {
            record.focused_window = capture;
        }
    }

    /// Drop the per-session focused-window captures.
    pub fn release_session_captures(&mut self) {
        for record in self.workspaces.values_mut() {
            record.focused_window = None;
        }
        self.visible_primary = None;
    }

    //  Derived image cache

    /// Return the cached image for `key`, running `load` on a miss.
    /// Failed loads are not cached.
    pub fn cached_image(
        &mut self,
        key: &str,
        load: impl FnOnce() -> Option<Screenshot>,
    ) -> Option<Screenshot> {
        if let Some(img) = self.image_cache.get(key) {
            return Some(img.clone());
        }
        let img = load()?;
        self.image_cache.insert(key.to_string(), img.clone());
        Some(img)
    }

    /// Forget every derived image (e.g. after a configuration reload).
    pub fn clear_image_cache(&mut self) {
        self.image_cache.clear();
    }
}

/// [`Knowledge`] shared between the synchronizer thread and the overlay.
#[derive(Debug, Default)]
pub struct KnowledgeStore {
    knowledge: RwLock<Knowledge>,
    frozen: AtomicBool,
}

impl KnowledgeStore {
    pub fn new(knowledge: Knowledge) -> Self {
        Self {
            knowledge: RwLock::new(knowledge),
            frozen: AtomicBool::new(false),
        }
    }

    /// Shared read access.
    pub fn read(&self) -> RwLockReadGuard<'_, Knowledge> {
        self.knowledge.read()
    }

    /// Exclusive access regardless of the freeze flag.  Reserved for the
    /// holder of the freeze (the overlay session) and for setup code.
    pub fn write(&self) -> RwLockWriteGuard<'_, Knowledge> {
        self.knowledge.write()
    }

    /// Run `f` with exclusive access unless the store is frozen.
    ///
    /// Returns `None` without calling `f` while a session holds the freeze.
    pub fn update_unless_frozen<R>(&self, f: impl FnOnce(&mut Knowledge) -> R) -> Option<R> {
        let mut guard = self.knowledge.write();
        if self.frozen.load(Ordering::Acquire) {
            return None;
        }
        Some(f(&mut guard))
    }

    /// Freeze the store.  Returns `true` if this call froze it, `false` if
    /// it was already frozen.
    pub fn freeze(&self) -> bool {
        let _guard = self.knowledge.write();
        self.frozen
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Lift the freeze.
    pub fn unfreeze(&self) {
        let _guard = self.knowledge.write();
        self.frozen.store(false, Ordering::Release);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ws(id: WorkspaceId, name: &str) -> WorkspaceInfo {
        WorkspaceInfo {
            id,
            num: name.parse().ok(),
            name: name.into(),
            visible: false,
            focused: false,
            output: "DP-1".into(),
            rect: Rect::new(0, 0, 2560, 1440),
        }
    }

    fn shot(w: u32, h: u32) -> Screenshot {
        Screenshot::from_rgb(w, h, vec![7; (w * h * 3) as usize]).unwrap()
    }

    #[test]
    fn screenshot_rejects_wrong_length() {
        assert!(Screenshot::from_rgb(2, 2, vec![0; 11]).is_none());
        assert!(Screenshot::from_rgb(0, 2, vec![]).is_none());
        let s = Screenshot::from_rgb(2, 1, vec![1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(s.pixel(1, 0), Some([4, 5, 6]));
        assert_eq!(s.pixel(2, 0), None);
    }

    #[test]
    fn eviction_keeps_only_live_ids() {
        let mut k = Knowledge::default();
        k.observe_workspaces(&[ws(1, "1"), ws(2, "2"), ws(3, "3"), ws(4, "4")]);
        assert_eq!(k.workspace_ids(), vec![1, 2, 3, 4]);

        let removed = k.retain_live(&[1, 3]);
        assert_eq!(removed, vec![2, 4]);
        assert_eq!(k.workspace_ids(), vec![1, 3]);
    }

    #[test]
    fn evicting_the_active_workspace_clears_active() {
        let mut k = Knowledge::default();
        k.record_capture(&ws(2, "2"), None);
        assert_eq!(k.active(), Some(2));
        k.retain_live(&[1]);
        assert_eq!(k.active(), None);
    }

    #[test]
    fn record_capture_marks_exactly_one_active() {
        let mut k = Knowledge::default();
        k.record_capture(&ws(1, "1"), Some(shot(4, 2)));
        k.record_capture(&ws(5, "5"), Some(shot(2, 4)));
        assert_eq!(k.active(), Some(5));
        assert_eq!(k.workspace(5).unwrap().size, (2, 4));
        assert_eq!(k.workspace(1).unwrap().size, (4, 2));
    }

    #[test]
    fn missing_capture_keeps_previous_screenshot() {
        let mut k = Knowledge::default();
        k.record_capture(&ws(1, "1"), Some(shot(4, 2)));
        k.record_capture(&ws(1, "renamed"), None);
        let rec = k.workspace(1).unwrap();
        assert_eq!(rec.name, "renamed");
        assert_eq!(rec.screenshot.as_ref().map(|s| s.size()), Some((4, 2)));
    }

    #[test]
    fn observe_creates_records_without_screenshots() {
        let mut k = Knowledge::default();
        k.observe_workspaces(&[ws(9, "9")]);
        let rec = k.workspace(9).unwrap();
        assert!(rec.screenshot.is_none());
        assert_eq!(rec.size, (2560, 1440));
        assert_eq!(k.workspace_numbers(), vec![9]);
    }

    #[test]
    fn zero_sized_workspace_falls_back() {
        let mut k = Knowledge::default();
        let mut info = ws(1, "1");
        info.rect = Rect::default();
        k.observe_workspaces(&[info]);
        assert_eq!(k.workspace(1).unwrap().size, FALLBACK_WORKSPACE_SIZE);
    }

    #[test]
    fn mark_active_requires_known_id() {
        let mut k = Knowledge::default();
        k.observe_workspaces(&[ws(1, "1")]);
        assert!(!k.mark_active(2));
        assert!(k.mark_active(1));
        assert_eq!(k.active(), Some(1));
    }

    #[test]
    fn focused_window_lives_on_one_record() {
        let mut k = Knowledge::default();
        k.observe_workspaces(&[ws(1, "1"), ws(2, "2")]);
        let capture = FocusedWindowCapture {
            id: 77,
            name: "term".into(),
            rect: Rect::new(0, 0, 10, 10),
            screenshot: None,
        };
        k.set_focused_window(1, Some(capture.clone()));
        k.set_focused_window(2, Some(capture));
        assert!(k.workspace(1).unwrap().focused_window.is_none());
        assert!(k.workspace(2).unwrap().focused_window.is_some());
        k.release_session_captures();
        assert!(k.workspace(2).unwrap().focused_window.is_none());
    }

    #[test]
    fn outputs_get_aliases_and_primary_fallback() {
        let mut aliases = HashMap::new();
        aliases.insert("HDMI-A-1".to_string(), "TV".to_string());
        let mut k = Knowledge::new(aliases);
        k.set_outputs(&[
            OutputInfo {
                name: "HDMI-A-1".into(),
                rect: Rect::new(0, 0, 1920, 1080),
                active: true,
                primary: false,
                current_workspace: None,
            },
            OutputInfo {
                name: "VGA-1".into(),
                rect: Rect::new(0, 0, 1024, 768),
                active: false,
                primary: true,
                current_workspace: None,
            },
        ]);
        assert_eq!(k.outputs().len(), 1, "inactive outputs are skipped");
        assert_eq!(k.outputs()[0].label(), "TV");
        assert_eq!(k.primary_output().map(|o| o.name.as_str()), Some("HDMI-A-1"));

        k.set_output_aliases(HashMap::new());
        assert_eq!(k.outputs()[0].label(), "HDMI-A-1");
    }

    #[test]
    fn image_cache_loads_once() {
        let mut k = Knowledge::default();
        let mut loads = 0;
        for _ in 0..3 {
            let img = k.cached_image("wallpaper.png", || {
                loads += 1;
                Some(shot(1, 1))
            });
            assert!(img.is_some());
        }
        assert_eq!(loads, 1);
        assert!(k.cached_image("missing", || None).is_none());
        k.clear_image_cache();
        k.cached_image("wallpaper.png", || {
            loads += 1;
            Some(shot(1, 1))
        });
        assert_eq!(loads, 2);
    }

    #[test]
    fn frozen_store_rejects_updates() {
        let store = KnowledgeStore::default();
        assert!(store.update_unless_frozen(|k| k.mark_active(1)).is_some());
        assert!(store.freeze());
        assert!(!store.freeze(), "second freeze reports already frozen");
        assert!(store.update_unless_frozen(|_| ()).is_none());
        store.unfreeze();
        assert!(!store.is_frozen());
        assert!(store.update_unless_frozen(|_| ()).is_some());
    }

    #[test]
    fn freeze_is_visible_across_threads() {
        let store = Arc::new(KnowledgeStore::default());
        assert!(store.freeze());
        let remote = Arc::clone(&store);
        let applied = std::thread::spawn(move || remote.update_unless_frozen(|_| ()).is_some())
            .join()
            .unwrap();
        assert!(!applied);
    }
}

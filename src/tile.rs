//! Tiles: the cells of one overlay session.
//!
//! A tile is either an existing workspace or a placeholder for a workspace
//! that would be created on one output.  Tiles are built from a frozen
//! [`Knowledge`] snapshot once per session.

use crate::allocator::Placeholder;
use crate::command::WorkspaceId;
use crate::knowledge::{Knowledge, FALLBACK_WORKSPACE_SIZE};

/// Identifies what a tile stands for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TileKey {
    Workspace(WorkspaceId),
    /// A workspace number to create, bound to an output.
    Placeholder { num: i64, output: String },
}

/// Drives the palette choice when rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileStatus {
    /// The workspace that was active at session start.
    Active,
    /// Visited before; a screenshot exists.
    Inactive,
    /// Never captured.
    Unknown,
    /// Not created yet.
    Placeholder,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    pub key: TileKey,
    /// Native size; only the aspect ratio matters for packing.
    pub size: (u32, u32),
    pub label: String,
    pub status: TileStatus,
}

impl Tile {
    pub fn is_landscape(&self) -> bool {
        self.size.0 >= self.size.1
    }

    pub fn workspace(&self) -> Option<WorkspaceId> {
        match self.key {
            TileKey::Workspace(id) => Some(id),
            TileKey::Placeholder { .. } => None,
        }
    }
}

/// Existing workspaces in id order, followed by `placeholders` in the
/// order given.
pub fn collect_tiles(knowledge: &Knowledge, placeholders: &[Placeholder]) -> Vec<Tile> {
    let active = knowledge.active();
    let mut tiles: Vec<Tile> = knowledge
        .workspace_ids()
        .into_iter()
        .filter_map(|id| knowledge.workspace(id))
        .map(|record| Tile {
            key: TileKey::Workspace(record.id),
            size: record.size,
            label: record.name.clone(),
            status: if active == Some(record.id) {
                TileStatus::Active
            } else if record.screenshot.is_some() {
                TileStatus::Inactive
            } else {
                TileStatus::Unknown
            },
        })
        .collect();

    tiles.extend(placeholders.iter().map(|p| {
        let output = knowledge.outputs().iter().find(|o| o.name == p.output);
        let size = output
            .map(|o| (o.rect.width, o.rect.height))
            .filter(|(w, h)| *w > 0 && *h > 0)
            .unwrap_or(FALLBACK_WORKSPACE_SIZE);
        Tile {
            key: TileKey::Placeholder {
                num: p.num,
                output: p.output.clone(),
            },
            size,
            label: output.map_or_else(|| p.output.clone(), |o| o.label().to_string()),
            status: TileStatus::Placeholder,
        }
    }));
    tiles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{OutputInfo, Rect, WorkspaceInfo};
    use crate::knowledge::Screenshot;
    use std::collections::HashMap;

    fn ws(id: WorkspaceId, w: u32, h: u32) -> WorkspaceInfo {
        WorkspaceInfo {
            id,
            num: Some(id),
            name: id.to_string(),
            visible: false,
            focused: false,
            output: "DP-1".into(),
            rect: Rect::new(0, 0, w, h),
        }
    }

    #[test]
    fn statuses_follow_knowledge() {
        let mut k = Knowledge::default();
        k.observe_workspaces(&[ws(3, 1920, 1080), ws(1, 1920, 1080), ws(2, 1080, 1920)]);
        let shot = Screenshot::from_rgb(2, 1, vec![0; 6]).unwrap();
        k.record_capture(&ws(2, 1080, 1920), Some(shot.clone()));
        k.record_capture(&ws(1, 1920, 1080), Some(shot));

        let tiles = collect_tiles(&k, &[]);
        let keys: Vec<_> = tiles.iter().map(|t| t.workspace()).collect();
        assert_eq!(keys, vec![Some(1), Some(2), Some(3)]);
        assert_eq!(tiles[0].status, TileStatus::Active);
        assert_eq!(tiles[1].status, TileStatus::Inactive);
        assert_eq!(tiles[2].status, TileStatus::Unknown);
    }

    #[test]
    fn placeholders_take_output_size_and_alias() {
        let mut aliases = HashMap::new();
        aliases.insert("HDMI-A-1".to_string(), "TV".to_string());
        let mut k = Knowledge::new(aliases);
        k.set_outputs(&[OutputInfo {
            name: "HDMI-A-1".into(),
            rect: Rect::new(1920, 0, 1080, 1920),
            active: true,
            primary: false,
            current_workspace: None,
        }]);
        let tiles = collect_tiles(
            &k,
            &[
                Placeholder {
                    num: 1000,
                    output: "HDMI-A-1".into(),
                },
                Placeholder {
                    num: 1001,
                    output: "gone".into(),
                },
            ],
        );
        assert_eq!(tiles.len(), 2);
        assert_eq!(tiles[0].label, "TV");
        assert!(!tiles[0].is_landscape());
        assert_eq!(tiles[0].status, TileStatus::Placeholder);
        assert_eq!(tiles[1].size, FALLBACK_WORKSPACE_SIZE);
        assert_eq!(tiles[1].label, "gone");
        assert_eq!(tiles[1].workspace(), None);
    }
}

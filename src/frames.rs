//! Per-session frame slots.
//!
//! Every placed tile gets one [`FrameSlot`] holding its rectangle and the
//! rendered bitmaps for each [`Variant`], produced lazily and reused for the
//! rest of the session.  The arena is generic over the bitmap type so that
//! the memoization can be exercised without a display.

use crate::command::Rect;
use crate::grid::Layout;
use crate::tile::{Tile, TileKey, TileStatus};

/// Which rendering of a slot to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    Neutral,
    /// Keyboard or pointer focus.
    Hover,
    /// Drop target while dragging a window.
    DragHover,
}

impl Variant {
    fn index(self) -> usize {
        match self {
            Variant::Neutral => 0,
            Variant::Hover => 1,
            Variant::DragHover => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FrameSlot<T> {
    pub key: TileKey,
    pub status: TileStatus,
    pub label: String,
    /// Outer rectangle in overlay coordinates.
    pub rect: Rect,
    /// Variant currently on screen.
    pub shown: Variant,
    cache: [Option<T>; 3],
}

impl<T> FrameSlot<T> {
    pub fn is_cached(&self, variant: Variant) -> bool {
        self.cache[variant.index()].is_some()
    }
}

/// Index-addressed slots, in the layout's placement order.
#[derive(Debug, Clone)]
pub struct FrameArena<T> {
    slots: Vec<FrameSlot<T>>,
}

impl<T> Default for FrameArena<T> {
    fn default() -> Self {
        Self { slots: Vec::new() }
    }
}

impl<T> FrameArena<T> {
    pub fn new(tiles: &[Tile], layout: &Layout) -> Self {
        let slots = layout
            .placed
            .iter()
            .filter_map(|placed| {
                let tile = tiles.get(placed.tile)?;
                Some(FrameSlot {
                    key: tile.key.clone(),
                    status: tile.status,
                    label: tile.label.clone(),
                    rect: placed.rect,
                    shown: Variant::Neutral,
                    cache: [None, None, None],
                })
            })
            .collect();
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&FrameSlot<T>> {
        self.slots.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FrameSlot<T>> {
        self.slots.iter()
    }

    /// Index of the slot for `key`.
    pub fn position(&self, key: &TileKey) -> Option<usize> {
        self.slots.iter().position(|s| &s.key == key)
    }

    /// Update which variant each slot shows: `focus` gets `focus_variant`,
    /// every other slot goes back to neutral.  Returns the indices whose
    /// variant changed.
    pub fn highlight(&mut self, focus: Option<usize>, focus_variant: Variant) -> Vec<usize> {
        let mut changed = Vec::new();
        for (i, slot) in self.slots.iter_mut().enumerate() {
            let want = if Some(i) == focus {
                focus_variant
            } else {
                Variant::Neutral
            };
            if slot.shown != want {
                slot.shown = want;
                changed.push(i);
            }
        }
        changed
    }

    /// The bitmap for `variant` of slot `index`, rendering it on first use.
    /// A failed render is retried on the next call.
    pub fn bitmap(
        &mut self,
        index: usize,
        variant: Variant,
        render: impl FnOnce(&FrameSlot<T>, Variant) -> Option<T>,
    ) -> Option<&T> {
        let slot = self.slots.get_mut(index)?;
        let i = variant.index();
        if slot.cache[i].is_none() {
            slot.cache[i] = render(&*slot, variant);
        }
        slot.cache[i].as_ref()
    }

    /// Drop every rendered bitmap.
    pub fn release(&mut self) {
        for slot in &mut self.slots {
            slot.cache = [None, None, None];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{pack, PackParams};

    fn arena() -> FrameArena<String> {
        let tiles: Vec<Tile> = (1..=3)
            .map(|id| Tile {
                key: TileKey::Workspace(id),
                size: (1920, 1080),
                label: format!("ws{}", id),
                status: TileStatus::Inactive,
            })
            .collect();
        let layout = pack(
            &tiles,
            &PackParams {
                screen_width: 1920,
                screen_height: 1080,
                padding_percent: (5.0, 5.0),
                spacing_percent: (5.0, 5.0),
                frame_width: 5,
            },
        );
        FrameArena::new(&tiles, &layout)
    }

    #[test]
    fn one_slot_per_placed_tile() {
        let a = arena();
        assert_eq!(a.len(), 3);
        assert_eq!(a.position(&TileKey::Workspace(2)), Some(1));
        assert_eq!(a.get(2).map(|s| s.label.as_str()), Some("ws3"));
    }

    #[test]
    fn bitmaps_are_rendered_once_per_variant() {
        let mut a = arena();
        let mut renders = 0;
        for _ in 0..3 {
            let bmp = a.bitmap(0, Variant::Hover, |slot, v| {
                renders += 1;
                Some(format!("{}:{:?}", slot.label, v))
            });
            assert_eq!(bmp.map(String::as_str), Some("ws1:Hover"));
        }
        assert_eq!(renders, 1);
        assert!(a.get(0).unwrap().is_cached(Variant::Hover));
        assert!(!a.get(0).unwrap().is_cached(Variant::Neutral));

        a.release();
        assert!(!a.get(0).unwrap().is_cached(Variant::Hover));
    }

    #[test]
    fn failed_render_is_retried() {
        let mut a = arena();
        assert!(a.bitmap(1, Variant::Neutral, |_, _| None).is_none());
        assert!(a.bitmap(1, Variant::Neutral, |_, _| Some("ok".into())).is_some());
        assert!(a.bitmap(9, Variant::Neutral, |_, _| Some("x".into())).is_none());
    }

    #[test]
    fn highlight_reports_changes() {
        let mut a = arena();
        assert_eq!(a.highlight(Some(1), Variant::Hover), vec![1]);
        assert_eq!(a.highlight(Some(1), Variant::Hover), Vec::<usize>::new());
        assert_eq!(a.highlight(Some(2), Variant::DragHover), vec![1, 2]);
        assert_eq!(a.highlight(None, Variant::Hover), vec![2]);
    }
}

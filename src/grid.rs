//! Grid packing.
//!
//! [`pack`] lays out a session's tiles on the overlay.  The grid side is
//! estimated from a weighted tile count (a portrait tile counts as
//! [`PORTRAIT_WEIGHT`] of a landscape one), tiles are sorted landscape
//! first, and each row greedily takes every pending tile that still fits
//! before the right padding.  Portrait tiles are narrowed by their aspect
//! ratio so that more of them share a row.
//!
//! The estimate is only a starting point: if tiles are left over, packing
//! is retried with a larger side until everything fits or the cells become
//! too small to draw a frame, at which point the remaining tiles are
//! dropped for the session.
//!
//! Alongside the rectangles the packer builds a [`NavMatrix`] indexed by
//! `(row, column within row)` for keyboard navigation.

use crate::command::{Direction, Rect};
use crate::tile::Tile;

/// How much of a landscape tile's width a portrait tile is assumed to use
/// when estimating the grid side.  Empirical, not exact.
pub const PORTRAIT_WEIGHT: f64 = 0.5;

/// Screen geometry and spacing for one packing run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PackParams {
    pub screen_width: u32,
    pub screen_height: u32,
    /// Outer padding in percent of the screen size, `(x, y)`.
    pub padding_percent: (f64, f64),
    /// Gap between cells in percent of the screen size, `(x, y)`.
    pub spacing_percent: (f64, f64),
    /// Frame thickness in pixels.
    pub frame_width: u32,
}

/// One tile's place on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacedTile {
    /// Index into the slice passed to [`pack`].
    pub tile: usize,
    /// Outer rectangle including the frame.
    pub rect: Rect,
    pub row: usize,
    pub col: usize,
}

/// Keyboard navigation over a packed layout.
///
/// Rows may have different lengths; the matrix is as wide as the longest
/// row and the remaining cells are unfilled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavMatrix {
    cells: Vec<Vec<Option<usize>>>,
}

impl NavMatrix {
    fn from_placed(placed: &[PlacedTile]) -> Self {
        let rows = placed.iter().map(|p| p.row + 1).max().unwrap_or(0);
        let cols = placed.iter().map(|p| p.col + 1).max().unwrap_or(0);
        let mut cells = vec![vec![None; cols]; rows];
        for (i, p) in placed.iter().enumerate() {
            cells[p.row][p.col] = Some(i);
        }
        Self { cells }
    }

    pub fn rows(&self) -> usize {
        self.cells.len()
    }

    pub fn cols(&self) -> usize {
        self.cells.first().map_or(0, Vec::len)
    }

    /// Placed-tile index at `(row, col)`, if that cell is filled.
    pub fn get(&self, row: usize, col: usize) -> Option<usize> {
        self.cells.get(row)?.get(col).copied().flatten()
    }

    pub fn filled(&self) -> usize {
        self.cells.iter().flatten().filter(|c| c.is_some()).count()
    }

    fn position_of(&self, index: usize) -> Option<(usize, usize)> {
        self.cells.iter().enumerate().find_map(|(r, row)| {
            row.iter()
                .position(|c| *c == Some(index))
                .map(|c| (r, c))
        })
    }

    /// Move one cell from placed tile `from`, clamped at the matrix edges.
    /// Landing on an unfilled cell (or starting from an unknown index)
    /// yields the first tile.
    pub fn step(&self, from: usize, direction: Direction) -> Option<usize> {
        let first = self.get(0, 0);
        let Some((row, col)) = self.position_of(from) else {
            return first;
        };
        let (d_row, d_col) = direction.delta();
        let row = clamp_step(row, d_row, self.rows());
        let col = clamp_step(col, d_col, self.cols());
        self.get(row, col).or(first)
    }
}

fn clamp_step(pos: usize, delta: isize, len: usize) -> usize {
    let max = len.saturating_sub(1) as isize;
    (pos as isize + delta).clamp(0, max) as usize
}

/// Result of [`pack`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Layout {
    /// Placed tiles in row-major order.
    pub placed: Vec<PlacedTile>,
    pub nav: NavMatrix,
    /// Indices of tiles that could not be placed.
    pub dropped: Vec<usize>,
    /// Grid side the layout was produced with.
    pub side: usize,
}

impl Layout {
    /// Placed-tile index whose rectangle contains the point.
    pub fn hit(&self, x: f64, y: f64) -> Option<usize> {
        self.placed.iter().position(|p| p.rect.contains(x, y))
    }

    /// Placed-tile index for tile `tile`.
    pub fn index_of_tile(&self, tile: usize) -> Option<usize> {
        self.placed.iter().position(|p| p.tile == tile)
    }
}

/// Place `content` inside `within`: scaled to fit and centred, or filling
/// it exactly when `stretch` is set.
pub fn fit(content: (u32, u32), within: Rect, stretch: bool) -> Rect {
    let (cw, ch) = (content.0.max(1) as f64, content.1.max(1) as f64);
    let (ww, wh) = (within.width as f64, within.height as f64);
    if stretch {
        return within;
    }
    let (rx, ry) = (ww / cw, wh / ch);
    let (w, h) = if rx < ry {
        (within.width, (rx * ch).round() as u32)
    } else {
        ((ry * cw).round() as u32, within.height)
    };
    Rect::new(
        within.x + ((ww - w as f64) / 2.0).round() as i32,
        within.y + ((wh - h as f64) / 2.0).round() as i32,
        w,
        h,
    )
}

/// Spacing resolved to pixels.
#[derive(Debug, Clone, Copy)]
struct Metrics {
    width: i64,
    height: i64,
    pad_x: i64,
    pad_y: i64,
    space_x: i64,
    space_y: i64,
    frame: i64,
}

impl Metrics {
    fn new(params: &PackParams) -> Self {
        let percent = |total: u32, p: f64| (total as f64 * p / 100.0).round() as i64;
        Self {
            width: params.screen_width as i64,
            height: params.screen_height as i64,
            pad_x: percent(params.screen_width, params.padding_percent.0),
            pad_y: percent(params.screen_height, params.padding_percent.1),
            space_x: percent(params.screen_width, params.spacing_percent.0),
            space_y: percent(params.screen_height, params.spacing_percent.1),
            frame: params.frame_width as i64,
        }
    }

    /// Outer cell size for a grid of `side`, or `None` when a frame would
    /// not leave any room for content.
    fn cell(&self, side: usize) -> Option<(i64, i64)> {
        let side = side as i64;
        let w = (self.width - 2 * self.pad_x - self.space_x * (side - 1)).div_euclid(side);
        let h = (self.height - 2 * self.pad_y - self.space_y * (side - 1)).div_euclid(side);
        (w > 2 * self.frame && h > 2 * self.frame).then_some((w, h))
    }

    fn right_limit(&self) -> i64 {
        self.width - self.pad_x
    }
}

fn tile_width(tile: &Tile, outer_w: i64) -> i64 {
    if tile.is_landscape() {
        return outer_w;
    }
    // outer_w / (h / w), in integers.
    let (w, h) = (tile.size.0.max(1) as i64, tile.size.1.max(1) as i64);
    outer_w * w / h
}

/// Pack `tiles` onto the screen described by `params`.
///
/// Deterministic: identical inputs always give identical layouts.
pub fn pack(tiles: &[Tile], params: &PackParams) -> Layout {
    if tiles.is_empty() {
        return Layout::default();
    }
    let metrics = Metrics::new(params);

    let weighted: f64 = tiles
        .iter()
        .map(|t| if t.is_landscape() { 1.0 } else { PORTRAIT_WEIGHT })
        .sum();
    let mut side = (weighted.sqrt().ceil() as usize).max(1);

    let mut order: Vec<usize> = (0..tiles.len()).collect();
    order.sort_by_key(|&i| !tiles[i].is_landscape());

    let Some(mut cell) = metrics.cell(side) else {
        return Layout {
            dropped: (0..tiles.len()).collect(),
            side,
            ..Layout::default()
        };
    };

    loop {
        let (placed, pending, unfit) = pack_rows(tiles, &order, side, cell, &metrics);
        let retry = if pending.is_empty() {
            None
        } else {
            metrics.cell(side + 1)
        };
        match retry {
            Some(bigger) => {
                side += 1;
                cell = bigger;
            }
            None => {
                let mut dropped: Vec<usize> = pending.into_iter().chain(unfit).collect();
                dropped.sort_unstable();
                return Layout {
                    nav: NavMatrix::from_placed(&placed),
                    placed,
                    dropped,
                    side,
                };
            }
        }
    }
}

/// One greedy pass over `side` rows.  Returns the placed tiles, the tiles
/// that did not fit any row, and the tiles too small or too wide to place
/// at this cell size.
fn pack_rows(
    tiles: &[Tile],
    order: &[usize],
    side: usize,
    (outer_w, outer_h): (i64, i64),
    m: &Metrics,
) -> (Vec<PlacedTile>, Vec<usize>, Vec<usize>) {
    let usable = m.right_limit() - m.pad_x;
    let (mut pending, unfit): (Vec<usize>, Vec<usize>) = order.iter().partition(|&&i| {
        let w = tile_width(&tiles[i], outer_w);
        w > 2 * m.frame && w <= usable
    });
    let mut placed = Vec::with_capacity(pending.len());

    for row in 0..side {
        if pending.is_empty() {
            break;
        }
        let y = m.pad_y + row as i64 * (outer_h + m.space_y);
        let mut x = m.pad_x;
        let mut col = 0;
        let mut i = 0;
        while i < pending.len() {
            let tile = pending[i];
            let w = tile_width(&tiles[tile], outer_w);
            if x + w <= m.right_limit() {
                placed.push(PlacedTile {
                    tile,
                    rect: Rect::new(x as i32, y as i32, w as u32, outer_h as u32),
                    row,
                    col,
                });
                x += w + m.space_x;
                col += 1;
                pending.remove(i);
            } else {
                i += 1;
            }
        }
    }
    (placed, pending, unfit)
}

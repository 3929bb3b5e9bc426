//! Overlay rendering.
//!
//! When the `visualizer-gtk` feature is enabled, [`gtk::run_main_loop`]
//! takes over the main thread and drives command processing, input and
//! drawing through the GLib main loop.
//!
//! The helpers in this module are toolkit-independent: pixel-format
//! conversion for screenshots and wallpapers, wallpaper blur, highlight
//! strength per
//! [`Variant`], and label placement.

#[cfg(feature = "visualizer-gtk")]
pub mod gtk;

use crate::command::Rect;
use crate::config::LabelPosition;
use crate::frames::Variant;
use crate::knowledge::Screenshot;

/// Gap between a tile and its label, in pixels.
pub const LABEL_GAP: f64 = 4.0;

/// Convert an RGB screenshot to cairo's native-endian `xRGB32` rows of
/// `stride` bytes.  Returns `None` if `stride` is too small for one row.
pub fn to_xrgb32(shot: &Screenshot, stride: usize) -> Option<Vec<u8>> {
    let width = shot.width() as usize;
    if stride < width * 4 {
        return None;
    }
    let mut out = vec![0u8; stride * shot.height() as usize];
    for (row, dst_row) in shot
        .pixels()
        .chunks_exact(width * 3)
        .zip(out.chunks_exact_mut(stride))
    {
        for (src, dst) in row.chunks_exact(3).zip(dst_row.chunks_exact_mut(4)) {
            let px = u32::from_be_bytes([0xff, src[0], src[1], src[2]]);
            dst.copy_from_slice(&px.to_ne_bytes());
        }
    }
    Some(out)
}

/// Repack rows of `channels`-byte pixels (RGB or RGBA, `rowstride` bytes
/// per row) into a tightly packed RGB [`Screenshot`].  Alpha is dropped.
pub fn pack_rgb(
    bytes: &[u8],
    width: u32,
    height: u32,
    rowstride: usize,
    channels: usize,
) -> Option<Screenshot> {
    if !(3..=4).contains(&channels) || rowstride < width as usize * channels {
        return None;
    }
    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for y in 0..height as usize {
        let start = y * rowstride;
        // The last row may be shorter than the stride.
        let row = bytes.get(start..start + width as usize * channels)?;
        for px in row.chunks_exact(channels) {
            rgb.extend_from_slice(&px[..3]);
        }
    }
    Screenshot::from_rgb(width, height, rgb)
}

/// Gaussian blur of an RGB screenshot.
pub fn blur_rgb(shot: &Screenshot, sigma: f32) -> Option<Screenshot> {
    let (width, height) = shot.size();
    let image = image::RgbImage::from_raw(width, height, shot.pixels().to_vec())?;
    let blurred = image::imageops::blur(&image, sigma);
    Screenshot::from_rgb(width, height, blurred.into_raw())
}

/// Opacity of the white wash drawn over a highlighted tile.
pub fn highlight_alpha(variant: Variant, highlight_percentage: u8) -> f64 {
    let base = f64::from(highlight_percentage.min(100)) / 100.0;
    match variant {
        Variant::Neutral => 0.0,
        Variant::Hover => base,
        Variant::DragHover => (base * 2.0).min(1.0),
    }
}

/// Baseline origin for a label of the given extents next to `tile`.
pub fn label_origin(
    tile: Rect,
    position: LabelPosition,
    text_width: f64,
    text_height: f64,
    frame_width: u32,
) -> (f64, f64) {
    let x = tile.x as f64 + (tile.width as f64 - text_width) / 2.0;
    let y = match position {
        LabelPosition::Below => tile.bottom() as f64 + LABEL_GAP + text_height,
        LabelPosition::Above => tile.y as f64 - LABEL_GAP,
        LabelPosition::Inside => tile.bottom() as f64 - frame_width as f64 - LABEL_GAP,
    };
    (x, y)
}

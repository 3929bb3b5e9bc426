//! [`FrameGrabber`] backends.
//!
//! Under X11 (i3) a region is read straight from the root window with a
//! `GetImage` request over an [`x11rb`] connection.  Wayland (sway) has no
//! such request, so there `grim` is run and its PPM output decoded with the
//! [`image`] crate.  [`ScreenGrabber`] picks one of the two from the
//! configured [`CaptureBackend`].

use crate::command::Rect;
use crate::knowledge::Screenshot;
use crate::traits::FrameGrabber;
use log::{debug, info};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::process::{Command, Stdio};
use x11rb::connection::Connection;
use x11rb::errors::{ConnectError, ConnectionError, ReplyError};
use x11rb::protocol::xproto::{ConnectionExt as _, ImageFormat, Window};
use x11rb::rust_connection::RustConnection;

/// Which capture path to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureBackend {
    /// `grim` when `WAYLAND_DISPLAY` is set, X11 otherwise.
    #[default]
    Auto,
    /// `GetImage` on the X11 root window.
    #[serde(alias = "import")]
    X11,
    Grim,
}

impl CaptureBackend {
    /// Resolve [`CaptureBackend::Auto`] against the environment.
    pub fn resolve(self) -> CaptureBackend {
        match self {
            CaptureBackend::Auto => {
                if std::env::var_os("WAYLAND_DISPLAY").is_some_and(|v| !v.is_empty()) {
                    CaptureBackend::Grim
                } else {
                    CaptureBackend::X11
                }
            }
            other => other,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("cannot capture an empty region")]
    EmptyRegion,
    #[error("region {0:?} is outside the X11 coordinate range")]
    OutOfRange(Rect),
    #[error("cannot connect to the X server: {0}")]
    Connect(#[from] ConnectError),
    #[error("X11 connection error: {0}")]
    Connection(#[from] ConnectionError),
    #[error("GetImage failed: {0}")]
    Reply(#[from] ReplyError),
    #[error("unsupported pixmap: {bits_per_pixel} bits per pixel, {len} bytes for {width}x{height}")]
    Pixmap {
        bits_per_pixel: u8,
        len: usize,
        width: u32,
        height: u32,
    },
    #[error("failed to run grim: {0}")]
    Spawn(std::io::Error),
    #[error("grim exited with {status}: {stderr}")]
    Failed {
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("cannot decode image: {0}")]
    Decode(#[from] image::ImageError),
}

impl CaptureError {
    /// Whether the X11 connection is unusable and must be re-opened.
    fn is_disconnect(&self) -> bool {
        matches!(
            self,
            CaptureError::Connection(_) | CaptureError::Reply(ReplyError::ConnectionError(_))
        )
    }
}

//  X11

struct X11Link {
    conn: RustConnection,
    root: Window,
}

/// Reads the X11 root window.  The connection is opened on first use and
/// re-opened after it breaks.
#[derive(Default)]
pub struct X11Grabber {
    link: Mutex<Option<X11Link>>,
}

impl X11Grabber {
    pub fn new() -> Self {
        Self::default()
    }

    fn connect() -> Result<X11Link, CaptureError> {
        let (conn, screen) = x11rb::connect(None)?;
        let root = conn.setup().roots[screen].root;
        info!("connected to the X server (screen {}, root 0x{:x})", screen, root);
        Ok(X11Link { conn, root })
    }
}

impl FrameGrabber for X11Grabber {
    type Error = CaptureError;

    fn capture(&self, rect: Rect) -> Result<Screenshot, CaptureError> {
        let (x, y, width, height) = x11_region(rect)?;
        let mut guard = self.link.lock();
        let link = match guard.take() {
            Some(link) => link,
            None => Self::connect()?,
        };
        let reply = link
            .conn
            .get_image(ImageFormat::Z_PIXMAP, link.root, x, y, width, height, !0)
            .map_err(CaptureError::from)
            .and_then(|cookie| cookie.reply().map_err(CaptureError::from));
        match reply {
            Ok(reply) => {
                let bits_per_pixel = link
                    .conn
                    .setup()
                    .pixmap_formats
                    .iter()
                    .find(|format| format.depth == reply.depth)
                    .map_or(32, |format| format.bits_per_pixel);
                *guard = Some(link);
                zpixmap_to_rgb(&reply.data, bits_per_pixel, rect.width, rect.height)
            }
            Err(e) => {
                if e.is_disconnect() {
                    debug!("dropping the X11 connection: {}", e);
                } else {
                    *guard = Some(link);
                }
                Err(e)
            }
        }
    }
}

/// `rect` as `GetImage` arguments.
fn x11_region(rect: Rect) -> Result<(i16, i16, u16, u16), CaptureError> {
    if rect.width == 0 || rect.height == 0 {
        return Err(CaptureError::EmptyRegion);
    }
    let out = |_| CaptureError::OutOfRange(rect);
    Ok((
        i16::try_from(rect.x).map_err(out)?,
        i16::try_from(rect.y).map_err(out)?,
        u16::try_from(rect.width).map_err(out)?,
        u16::try_from(rect.height).map_err(out)?,
    ))
}

/// Convert a `ZPixmap` reply (BGRX or BGR pixels, rows possibly padded) to
/// RGB.  `bits_per_pixel` comes from the server's pixmap format for the
/// reply's depth.
pub fn zpixmap_to_rgb(
    data: &[u8],
    bits_per_pixel: u8,
    width: u32,
    height: u32,
) -> Result<Screenshot, CaptureError> {
    let unsupported = || CaptureError::Pixmap {
        bits_per_pixel,
        len: data.len(),
        width,
        height,
    };
    let (w, h) = (width as usize, height as usize);
    if w == 0 || h == 0 || !(bits_per_pixel == 24 || bits_per_pixel == 32) {
        return Err(unsupported());
    }
    let bytes_per_pixel = usize::from(bits_per_pixel / 8);
    let stride = data.len() / h;
    if stride < w * bytes_per_pixel {
        return Err(unsupported());
    }
    let mut rgb = Vec::with_capacity(w * h * 3);
    for row in data.chunks_exact(stride).take(h) {
        for px in row[..w * bytes_per_pixel].chunks_exact(bytes_per_pixel) {
            rgb.extend_from_slice(&[px[2], px[1], px[0]]);
        }
    }
    Screenshot::from_rgb(width, height, rgb).ok_or_else(unsupported)
}

//  Wayland

/// Runs `grim` for every capture.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrimGrabber;

fn grim_args(rect: Rect) -> Vec<String> {
    vec![
        "-g".into(),
        format!("{},{} {}x{}", rect.x, rect.y, rect.width, rect.height),
        "-t".into(),
        "ppm".into(),
        "-".into(),
    ]
}

impl FrameGrabber for GrimGrabber {
    type Error = CaptureError;

    fn capture(&self, rect: Rect) -> Result<Screenshot, CaptureError> {
        if rect.width == 0 || rect.height == 0 {
            return Err(CaptureError::EmptyRegion);
        }
        let output = Command::new("grim")
            .args(grim_args(rect))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(CaptureError::Spawn)?;
        if !output.status.success() {
            return Err(CaptureError::Failed {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        decode_pnm(&output.stdout)
    }
}

/// Decode a PNM (PPM, PGM, ...) image into RGB.
pub fn decode_pnm(bytes: &[u8]) -> Result<Screenshot, CaptureError> {
    let image = image::load_from_memory_with_format(bytes, image::ImageFormat::Pnm)?.into_rgb8();
    let (width, height) = image.dimensions();
    Screenshot::from_rgb(width, height, image.into_raw()).ok_or(CaptureError::EmptyRegion)
}

//  Backend selection

/// The grabber the daemon uses, chosen by [`CaptureBackend`].
pub enum ScreenGrabber {
    X11(X11Grabber),
    Grim(GrimGrabber),
}

impl ScreenGrabber {
    pub fn new(backend: CaptureBackend) -> Self {
        match backend.resolve() {
            CaptureBackend::Grim => ScreenGrabber::Grim(GrimGrabber),
            CaptureBackend::X11 | CaptureBackend::Auto => ScreenGrabber::X11(X11Grabber::new()),
        }
    }

    pub fn backend(&self) -> CaptureBackend {
        match self {
            ScreenGrabber::X11(_) => CaptureBackend::X11,
            ScreenGrabber::Grim(_) => CaptureBackend::Grim,
        }
    }
}

impl FrameGrabber for ScreenGrabber {
    type Error = CaptureError;

    fn capture(&self, rect: Rect) -> Result<Screenshot, CaptureError> {
        match self {
            ScreenGrabber::X11(grabber) => grabber.capture(rect),
            ScreenGrabber::Grim(grabber) => grabber.capture(rect),
        }
    }
}

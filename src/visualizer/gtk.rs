//! GTK4 + layer-shell overlay that runs on the **main thread**.
//!
//! # Widget tree
//!
//! ```text
//! window                  (layer-shell, overlay layer, all edges anchored;
//! │                        a fullscreen toplevel where layer-shell is missing)
//! └ GtkDrawingArea        (everything is painted with cairo)
//! ```
//!
//! i3 on X11 has no layer-shell protocol, so there the window is made
//! fullscreen on the primary output instead.
//!
//! # Frame
//!
//! A GLib timeout at the configured frame rate drains the control channel,
//! lets the [`OverlayController`] process one frame of queued input and
//! schedules a redraw when the highlighted tile changed (every frame while
//! a window is being dragged).  When a session closes the window is
//! unmapped and the display synced before the controller releases the
//! session's commands.  Drawing paints, in order: the background,
//! each [`FrameSlot`]'s memoized bitmap for its current [`Variant`], the
//! labels, and the floating focused-window thumbnail.

use super::{blur_rgb, highlight_alpha, label_origin, pack_rgb, to_xrgb32};
use crate::command::{Command, Rect};
use crate::config::{AppearanceConfig, Color, Config, LabelConfig, Palette};
use crate::controller::{ActiveOverlay, FrameOutcome, OverlayController};
use crate::daemon::{Reloader, Shutdown};
use crate::frames::{FrameArena, FrameSlot, Variant};
use crate::grid::fit;
use crate::knowledge::{KnowledgeStore, Screenshot};
use crate::session::{InputEvent, Key};
use crate::tile::{TileKey, TileStatus};
use crate::traits::{FrameGrabber, WindowManager};
use gtk4::prelude::*;
use gtk4::{cairo, gdk, gdk_pixbuf, glib};
use gtk4_layer_shell::{Edge, KeyboardMode, Layer, LayerShell};
use log::{debug, info, warn};
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;
use std::sync::{mpsc, Arc};

/// Wallpapers are decoded at this fraction of the screen size; tiles are
/// much smaller than the screen anyway.
const WALLPAPER_DOWNSCALE: u32 = 4;

const WALLPAPER_BLUR_SIGMA: f32 = 3.0;

//  Painting

/// Drawing state of one open overlay.
struct Scene {
    arena: FrameArena<cairo::ImageSurface>,
    wallpaper: Option<Screenshot>,
    /// Focused-window thumbnail, converted once.
    window: Option<cairo::ImageSurface>,
}

/// What a tile bitmap is drawn from.
struct TileLook<'a> {
    palette: &'a Palette,
    frame_width: u32,
    highlight: u8,
    thumb_stretch: bool,
    image: Option<&'a Screenshot>,
}

struct Painter {
    appearance: AppearanceConfig,
    labels: LabelConfig,
    frame_width: u32,
    scene: Option<Scene>,
}

impl Painter {
    fn new(config: &Config) -> Self {
        Self {
            appearance: config.appearance.clone(),
            labels: config.labels.clone(),
            frame_width: config.layout.frame_width_px,
            scene: None,
        }
    }

    /// Takes effect from the next session on.
    fn set_config(&mut self, config: &Config) {
        self.appearance = config.appearance.clone();
        self.labels = config.labels.clone();
        self.frame_width = config.layout.frame_width_px;
    }

    fn begin(&mut self, active: &ActiveOverlay, store: &KnowledgeStore) {
        let session = &active.session;
        let wallpaper = self.appearance.wallpaper.as_ref().and_then(|path| {
            let key = format!("wallpaper:{}", path.display());
            store
                .write()
                .cached_image(&key, || load_wallpaper(path, active.screen))
        });
        let window = session
            .window()
            .and_then(|w| w.screenshot.as_ref())
            .and_then(|shot| {
                screenshot_surface(shot)
                    .map_err(|e| warn!("cannot convert window thumbnail: {}", e))
                    .ok()
            });
        self.scene = Some(Scene {
            arena: FrameArena::new(session.tiles(), session.layout()),
            wallpaper,
            window,
        });
    }

    /// Drop every bitmap of the session.
    fn end(&mut self) {
        self.scene = None;
    }

    /// Move the highlight to the session's focus.  Returns whether a redraw
    /// is needed.
    fn follow_focus(&mut self, active: &ActiveOverlay) -> bool {
        let Some(scene) = &mut self.scene else {
            return false;
        };
        let dragging = active.session.drag().is_some();
        let variant = if dragging {
            Variant::DragHover
        } else {
            Variant::Hover
        };
        let changed = scene.arena.highlight(active.session.focus(), variant);
        dragging || !changed.is_empty()
    }

    fn draw(
        &mut self,
        cr: &cairo::Context,
        active: &ActiveOverlay,
        store: &KnowledgeStore,
    ) -> Result<(), cairo::Error> {
        let Painter {
            appearance,
            labels,
            frame_width,
            scene,
        } = self;
        let Some(scene) = scene else {
            return Ok(());
        };

        set_color(cr, appearance.background);
        cr.paint()?;

        for i in 0..scene.arena.len() {
            let Some(slot) = scene.arena.get(i) else {
                continue;
            };
            let (variant, rect) = (slot.shown, slot.rect);
            let image = match &slot.key {
                TileKey::Workspace(id) => store
                    .read()
                    .workspace(*id)
                    .and_then(|r| r.screenshot.clone()),
                TileKey::Placeholder { .. } => scene.wallpaper.clone(),
            };
            let look = TileLook {
                palette: &appearance.palette,
                frame_width: *frame_width,
                highlight: appearance.highlight_percentage,
                thumb_stretch: appearance.thumb_stretch,
                image: image.as_ref(),
            };
            let bitmap = scene.arena.bitmap(i, variant, |slot, variant| {
                render_tile(slot, variant, &look)
                    .map_err(|e| warn!("cannot render tile {:?}: {}", slot.label, e))
                    .ok()
            });
            if let Some(bitmap) = bitmap {
                cr.set_source_surface(bitmap, rect.x as f64, rect.y as f64)?;
                cr.paint()?;
            }
        }

        if labels.show {
            cr.select_font_face(&labels.font, cairo::FontSlant::Normal, cairo::FontWeight::Normal);
            cr.set_font_size(labels.size);
            set_color(cr, labels.color);
            for slot in scene.arena.iter() {
                let extents = cr.text_extents(&slot.label)?;
                let (x, y) = label_origin(
                    slot.rect,
                    labels.position,
                    extents.width(),
                    extents.height(),
                    *frame_width,
                );
                cr.move_to(x - extents.x_bearing(), y);
                cr.show_text(&slot.label)?;
            }
        }

        if let Some(window) = active.session.window() {
            let (x, y) = match active.session.drag() {
                Some(drag) => drag.pos,
                None => (window.rect.x as f64, window.rect.y as f64),
            };
            let colors = appearance.palette.for_status(TileStatus::Active);
            let (w, h) = (window.rect.width as f64, window.rect.height as f64);
            match &scene.window {
                Some(thumb) => {
                    cr.save()?;
                    cr.translate(x, y);
                    cr.scale(w / thumb.width().max(1) as f64, h / thumb.height().max(1) as f64);
                    cr.set_source_surface(thumb, 0.0, 0.0)?;
                    cr.paint()?;
                    cr.restore()?;
                }
                None => {
                    set_color(cr, colors.tile);
                    cr.rectangle(x, y, w, h);
                    cr.fill()?;
                }
            }
            set_color(cr, colors.frame);
            cr.set_line_width(f64::from((*frame_width).max(1)));
            cr.rectangle(x, y, w, h);
            cr.stroke()?;
        }
        Ok(())
    }
}

fn set_color(cr: &cairo::Context, color: Color) {
    let (r, g, b, a) = color.to_f64();
    cr.set_source_rgba(r, g, b, a);
}

/// Wrap a screenshot in a cairo surface.
fn screenshot_surface(shot: &Screenshot) -> Result<cairo::ImageSurface, cairo::Error> {
    let stride = cairo::Format::Rgb24.stride_for_width(shot.width())?;
    let data = to_xrgb32(shot, stride as usize).ok_or(cairo::Error::InvalidStride)?;
    cairo::ImageSurface::create_for_data(
        data,
        cairo::Format::Rgb24,
        shot.width() as i32,
        shot.height() as i32,
        stride,
    )
}

/// Render one variant of a tile: frame, fill, thumbnail or glyph, and the
/// highlight wash.
fn render_tile(
    slot: &FrameSlot<cairo::ImageSurface>,
    variant: Variant,
    look: &TileLook<'_>,
) -> Result<cairo::ImageSurface, cairo::Error> {
    let surface = cairo::ImageSurface::create(
        cairo::Format::ARgb32,
        slot.rect.width as i32,
        slot.rect.height as i32,
    )?;
    {
        let cr = cairo::Context::new(&surface)?;
        let colors = look.palette.for_status(slot.status);
        set_color(&cr, colors.frame);
        cr.paint()?;

        let local = Rect::new(0, 0, slot.rect.width, slot.rect.height);
        if let Some(inner) = local.inset(look.frame_width) {
            set_color(&cr, colors.tile);
            cr.rectangle(
                inner.x as f64,
                inner.y as f64,
                inner.width as f64,
                inner.height as f64,
            );
            cr.fill()?;

            match look.image {
                Some(image) => {
                    // Wallpapers always cover the whole tile.
                    let stretch = look.thumb_stretch || slot.status == TileStatus::Placeholder;
                    paint_image(&cr, image, fit(image.size(), inner, stretch))?;
                }
                None if slot.status == TileStatus::Placeholder => {
                    draw_glyph(&cr, "+", inner, colors.frame)?
                }
                None if slot.status == TileStatus::Unknown => {
                    draw_glyph(&cr, "?", inner, colors.frame)?
                }
                None => {}
            }
        }

        let alpha = highlight_alpha(variant, look.highlight);
        if alpha > 0.0 {
            cr.set_source_rgba(1.0, 1.0, 1.0, alpha);
            cr.paint()?;
        }
    }
    surface.flush();
    Ok(surface)
}

fn paint_image(cr: &cairo::Context, image: &Screenshot, dst: Rect) -> Result<(), cairo::Error> {
    let src = screenshot_surface(image)?;
    cr.save()?;
    cr.rectangle(dst.x as f64, dst.y as f64, dst.width as f64, dst.height as f64);
    cr.clip();
    cr.translate(dst.x as f64, dst.y as f64);
    cr.scale(
        dst.width as f64 / image.width() as f64,
        dst.height as f64 / image.height() as f64,
    );
    cr.set_source_surface(&src, 0.0, 0.0)?;
    cr.source().set_filter(cairo::Filter::Good);
    cr.paint()?;
    cr.restore()
}

fn draw_glyph(cr: &cairo::Context, glyph: &str, inner: Rect, color: Color) -> Result<(), cairo::Error> {
    cr.select_font_face("sans-serif", cairo::FontSlant::Normal, cairo::FontWeight::Bold);
    cr.set_font_size(inner.height as f64 * 0.5);
    let e = cr.text_extents(glyph)?;
    let cx = inner.x as f64 + inner.width as f64 / 2.0;
    let cy = inner.y as f64 + inner.height as f64 / 2.0;
    set_color(cr, color);
    cr.move_to(
        cx - e.width() / 2.0 - e.x_bearing(),
        cy - e.height() / 2.0 - e.y_bearing(),
    );
    cr.show_text(glyph)
}

/// Load, downscale and blur the placeholder wallpaper.
fn load_wallpaper(path: &Path, screen: (u32, u32)) -> Option<Screenshot> {
    let (w, h) = (
        (screen.0 / WALLPAPER_DOWNSCALE).max(1),
        (screen.1 / WALLPAPER_DOWNSCALE).max(1),
    );
    let pixbuf = gdk_pixbuf::Pixbuf::from_file_at_scale(path, w as i32, h as i32, true)
        .map_err(|e| warn!("cannot load wallpaper {}: {}", path.display(), e))
        .ok()?;
    let bytes = pixbuf.read_pixel_bytes();
    let shot = pack_rgb(
        &bytes,
        pixbuf.width() as u32,
        pixbuf.height() as u32,
        pixbuf.rowstride() as usize,
        pixbuf.n_channels() as usize,
    )?;
    debug!("wallpaper {} loaded at {}x{}", path.display(), shot.width(), shot.height());
    blur_rgb(&shot, WALLPAPER_BLUR_SIGMA)
}

fn find_monitor(connector: &str) -> Option<gdk::Monitor> {
    let display = gdk::Display::default()?;
    let monitors = display.monitors();
    (0..monitors.n_items())
        .filter_map(|i| monitors.item(i).and_downcast::<gdk::Monitor>())
        .find(|m| m.connector().is_some_and(|c| c.as_str() == connector))
}

//  Public API

/// Run the GTK4 main loop on the **current** (main) thread until a
/// [`Command::Quit`] arrives or the control channel closes.
pub fn run_main_loop<W, G>(
    controller: OverlayController<W, G>,
    cmd_rx: mpsc::Receiver<Command>,
    config: Config,
    reloader: Reloader,
    shutdown: Shutdown,
) where
    W: WindowManager + 'static,
    G: FrameGrabber + 'static,
{
    gtk4::init().expect("failed to initialise GTK4");
    info!("GTK4 initialised on main thread");

    let frame_interval = config.overlay.frame_interval();
    let controller = Rc::new(RefCell::new(controller));
    let painter = Rc::new(RefCell::new(Painter::new(&config)));

    //  Overlay window
    let window = gtk4::Window::new();
    let layer_shell = gtk4_layer_shell::is_supported();
    if layer_shell {
        window.init_layer_shell();
        window.set_layer(Layer::Overlay);
        window.set_namespace("i3expo");
        window.set_keyboard_mode(KeyboardMode::None);
        window.set_exclusive_zone(-1);
        for edge in [Edge::Left, Edge::Right, Edge::Top, Edge::Bottom] {
            window.set_anchor(edge, true);
        }
    } else {
        info!("layer-shell not supported, using a fullscreen window");
        window.set_title(Some("i3expo"));
    }
    window.set_decorated(false);

    let area = gtk4::DrawingArea::new();
    area.set_hexpand(true);
    area.set_vexpand(true);
    window.set_child(Some(&area));

    {
        let controller = Rc::clone(&controller);
        let painter = Rc::clone(&painter);
        area.set_draw_func(move |_, cr, _, _| {
            let controller = controller.borrow();
            let Some(active) = controller.active() else {
                return;
            };
            if let Err(e) = painter.borrow_mut().draw(cr, active, controller.store()) {
                warn!("draw failed: {}", e);
            }
        });
    }

    //  Input
    let motion = gtk4::EventControllerMotion::new();
    {
        let controller = Rc::clone(&controller);
        motion.connect_motion(move |_, x, y| {
            controller
                .borrow_mut()
                .push_input(InputEvent::PointerMotion { x, y });
        });
    }
    area.add_controller(motion);

    let click = gtk4::GestureClick::new();
    click.set_button(0);
    {
        let controller = Rc::clone(&controller);
        click.connect_pressed(move |gesture, _, x, y| {
            let button = gesture.current_button();
            controller
                .borrow_mut()
                .push_input(InputEvent::PointerDown { button, x, y });
        });
    }
    {
        let controller = Rc::clone(&controller);
        click.connect_released(move |gesture, _, x, y| {
            let button = gesture.current_button();
            controller
                .borrow_mut()
                .push_input(InputEvent::PointerUp { button, x, y });
        });
    }
    area.add_controller(click);

    let keys = gtk4::EventControllerKey::new();
    {
        let controller = Rc::clone(&controller);
        keys.connect_key_pressed(move |_, keyval, _, _| {
            let name = keyval.name().map(|n| n.to_string()).unwrap_or_default();
            controller
                .borrow_mut()
                .push_input(InputEvent::Key(Key::from_name(&name)));
            glib::Propagation::Stop
        });
    }
    window.add_controller(keys);

    {
        let controller = Rc::clone(&controller);
        window.connect_close_request(move |_| {
            controller.borrow_mut().push_input(InputEvent::CloseRequested);
            glib::Propagation::Stop
        });
    }

    let show = {
        let window = window.clone();
        let area = area.clone();
        let controller = Rc::clone(&controller);
        let painter = Rc::clone(&painter);
        move || {
            let output = {
                let controller = controller.borrow();
                let Some(active) = controller.active() else {
                    return;
                };
                painter.borrow_mut().begin(active, controller.store());
                active.output.as_ref().map(|o| o.name.clone())
            };
            let monitor = output.as_deref().and_then(find_monitor);
            if monitor.is_none() {
                debug!("no GDK monitor for {:?}, using the default", output);
            }
            if layer_shell {
                if let Some(monitor) = &monitor {
                    window.set_monitor(Some(monitor));
                }
                window.set_keyboard_mode(KeyboardMode::Exclusive);
            } else {
                match &monitor {
                    Some(monitor) => window.fullscreen_on_monitor(monitor),
                    None => window.fullscreen(),
                }
            }
            window.set_visible(true);
            window.present();
            area.queue_draw();
        }
    };
    // Unmap, wait for the display server, then let the session's commands
    // go out.
    let hide = {
        let window = window.clone();
        let controller = Rc::clone(&controller);
        let painter = Rc::clone(&painter);
        move || {
            painter.borrow_mut().end();
            if layer_shell {
                window.set_keyboard_mode(KeyboardMode::None);
            }
            window.set_visible(false);
            window.display().sync();
            controller.borrow_mut().release();
        }
    };

    info!(
        "visualizer ready ({} fps, config: {})",
        config.overlay.frame_rate,
        reloader.path().display()
    );

    //  Main event loop
    let main_loop = glib::MainLoop::new(None, false);
    {
        let main_loop = main_loop.clone();
        glib::timeout_add_local(frame_interval, move || {
            // 1. Drain control commands.
            let mut quit = false;
            loop {
                match cmd_rx.try_recv() {
                    Ok(Command::Toggle) => {
                        let open = controller.borrow_mut().toggle();
                        if open {
                            show();
                        } else {
                            hide();
                        }
                    }
                    Ok(Command::Reload) => {
                        let store = Arc::clone(controller.borrow().store());
                        if let Some(config) = reloader.reload(&store) {
                            controller
                                .borrow_mut()
                                .set_settings(config.session_settings());
                            painter.borrow_mut().set_config(&config);
                        }
                    }
                    Ok(Command::Quit) => {
                        controller.borrow_mut().cancel();
                        hide();
                        quit = true;
                    }
                    Err(mpsc::TryRecvError::Empty) => break,
                    Err(mpsc::TryRecvError::Disconnected) => {
                        quit = true;
                        break;
                    }
                }
            }

            // 2. One frame of input.
            let outcome = controller.borrow_mut().frame();
            match outcome {
                FrameOutcome::Idle => {}
                FrameOutcome::Running => {
                    let redraw = {
                        let controller = controller.borrow();
                        controller
                            .active()
                            .is_some_and(|active| painter.borrow_mut().follow_focus(active))
                    };
                    if redraw {
                        area.queue_draw();
                    }
                }
                FrameOutcome::Closed(batch) => {
                    debug!("session resolved: {}", batch);
                    hide();
                }
            }

            if quit {
                info!("quit requested, leaving main loop");
                shutdown.request();
                main_loop.quit();
                return glib::ControlFlow::Break;
            }
            glib::ControlFlow::Continue
        });
    }

    info!("entering GLib main loop");
    main_loop.run();
    window.destroy();
    info!("GLib main loop exited");
}

//! Entry point for the **i3expod** daemon.
//!
//! `i3expod` with no arguments starts the daemon.  `i3expod toggle`,
//! `i3expod reload` and `i3expod quit` send the command to a running
//! daemon over its control socket and exit.
//!
//! The daemon spawns its background threads (event subscription,
//! screenshot synchronizer, command dispatcher, control listener) and
//! processes control commands on the main thread.  When the
//! `visualizer-gtk` feature is enabled the main thread runs the GLib main
//! loop (GTK4 requires it) and polls the command channel from there.
//! Without the feature, a simple headless loop is used instead.

use i3expo::capture::ScreenGrabber;
use i3expo::command::Command;
use i3expo::config::Config;
use i3expo::controller::OverlayController;
use i3expo::daemon::{Reloader, Shutdown, SyncTiming, SyncWorker, Threads};
use i3expo::i3::events::I3EventSource;
use i3expo::i3::wm::I3Wm;
use i3expo::ipc::listener::{default_socket_path, send_command, UnixSocketListener};
use i3expo::knowledge::{Knowledge, KnowledgeStore};
use i3expo::sync::Synchronizer;
use i3expo::traits::{FrameGrabber, WindowManager};
use log::{error, info};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};

/// `$XDG_CONFIG_HOME/i3expo/config.json`.
fn config_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        format!("{}/.config", home)
    });
    PathBuf::from(base).join("i3expo").join("config.json")
}

//  Main

fn main() {
    env_logger::init();

    match std::env::args().nth(1) {
        None => run_daemon(),
        Some(arg) => match Command::from_arg(&arg) {
            Some(cmd) => run_client(cmd),
            None => {
                eprintln!("usage: i3expod [toggle|reload|quit]");
                std::process::exit(2);
            }
        },
    }
}

/// Send one command to the running daemon.
fn run_client(cmd: Command) {
    let path = default_socket_path();
    if let Err(e) = send_command(&path, cmd) {
        error!("cannot reach i3expod at {}: {}", path.display(), e);
        std::process::exit(1);
    }
}

fn run_daemon() {
    let path = config_path();
    let config = match Config::load_or_default(&path) {
        Ok(cfg) => {
            info!("using config {}", path.display());
            cfg
        }
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let store = Arc::new(KnowledgeStore::new(Knowledge::new(
        config.output_aliases.clone(),
    )));
    let timing = Arc::new(RwLock::new(SyncTiming::default()));
    let reloader = Reloader::new(path, Arc::clone(&timing));
    reloader.apply(&config, &store);
    let shutdown = Shutdown::new();

    let backend = config.capture.backend.resolve();
    info!("capturing with {:?}", backend);

    let (event_tx, event_rx) = mpsc::channel();
    let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
    let (batch_tx, batch_rx) = mpsc::channel();

    let mut threads = Threads::new();
    let source_shutdown = shutdown.clone();
    threads.spawn_event_source(
        move || I3EventSource::new(source_shutdown.clone()),
        event_tx,
        shutdown.clone(),
    );
    let sync = Synchronizer::new(
        Arc::clone(&store),
        I3Wm::new(),
        ScreenGrabber::new(backend),
        config.capture.min_interval(),
    );
    threads.spawn_sync_worker(SyncWorker::new(
        sync,
        event_rx,
        Arc::clone(&timing),
        shutdown.clone(),
    ));
    threads.spawn_dispatcher(I3Wm::new(), batch_rx, shutdown.clone());
    threads.spawn_command_source(
        UnixSocketListener::new(default_socket_path(), shutdown.clone()),
        cmd_tx,
    );

    let controller = OverlayController::new(
        Arc::clone(&store),
        I3Wm::new(),
        ScreenGrabber::new(backend),
        config.session_settings(),
        batch_tx,
    );

    start_event_loop(controller, cmd_rx, config, reloader, shutdown.clone());

    shutdown.request();
    threads.join();
    info!("i3expod stopped");
}

//  Event loops

#[cfg(feature = "visualizer-gtk")]
fn start_event_loop<W, G>(
    controller: OverlayController<W, G>,
    cmd_rx: mpsc::Receiver<Command>,
    config: Config,
    reloader: Reloader,
    shutdown: Shutdown,
) where
    W: WindowManager + 'static,
    G: FrameGrabber + 'static,
{
    i3expo::visualizer::gtk::run_main_loop(controller, cmd_rx, config, reloader, shutdown);
}

#[cfg(not(feature = "visualizer-gtk"))]
fn start_event_loop<W, G>(
    mut controller: OverlayController<W, G>,
    cmd_rx: mpsc::Receiver<Command>,
    config: Config,
    reloader: Reloader,
    shutdown: Shutdown,
) where
    W: WindowManager,
    G: FrameGrabber,
{
    info!("i3expod running without a visualizer");
    let interval = config.overlay.frame_interval();
    loop {
        match cmd_rx.recv_timeout(interval) {
            Ok(Command::Toggle) => {
                let open = controller.toggle();
                info!("overlay {}", if open { "opened" } else { "closed" });
            }
            Ok(Command::Reload) => {
                let store = Arc::clone(controller.store());
                if let Some(config) = reloader.reload(&store) {
                    controller.set_settings(config.session_settings());
                }
            }
            Ok(Command::Quit) => {
                controller.cancel();
                controller.release();
                break;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
        controller.frame();
        // Nothing is on screen to take down first.
        controller.release();
    }
    info!("leaving main loop");
    shutdown.request();
}

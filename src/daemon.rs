//! Background threads of the daemon.
//!
//! * the **event thread** runs an [`EventSource`] (the i3 subscription) and
//!   reconnects when the window manager restarts;
//! * the **sync worker** turns events and a fallback tick into
//!   [`Synchronizer::sync`] calls;
//! * the **command dispatcher** runs the [`CommandBatch`]es an overlay
//!   session produced, so the render loop never waits on IPC.
//!
//! Every loop watches the same [`Shutdown`] flag (or the closing of its
//! input channel) and exits within one tick once it is raised.

use crate::command::CommandBatch;
use crate::config::Config;
use crate::knowledge::KnowledgeStore;
use crate::sync::{SyncOutcome, Synchronizer};
use crate::traits::{EventSource, FrameGrabber, WindowManager, WmEvent};
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Delay before re-subscribing after the event connection dropped.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

const DISPATCH_POLL: Duration = Duration::from_millis(100);

/// Cooperative, process-wide stop request.
#[derive(Debug, Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Sleep for up to `total`, waking early on shutdown.  Returns whether
    /// shutdown was requested.
    pub fn sleep(&self, total: Duration) -> bool {
        let step = Duration::from_millis(50);
        let mut slept = Duration::ZERO;
        while slept < total && !self.is_requested() {
            let chunk = step.min(total - slept);
            std::thread::sleep(chunk);
            slept += chunk;
        }
        self.is_requested()
    }
}

//  Sync worker

/// What an event asks of the synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Ignore,
    Sync,
    /// A workspace switch: forget the rate limit, then sync.
    ResetAndSync,
}

impl SyncTrigger {
    pub fn for_event(event: &WmEvent) -> SyncTrigger {
        match event {
            WmEvent::Window(change) => match change.as_str() {
                "new" | "close" | "move" | "floating" | "fullscreen_mode" | "focus" => {
                    SyncTrigger::Sync
                }
                _ => SyncTrigger::Ignore,
            },
            WmEvent::Workspace(change) if change == "focus" => SyncTrigger::ResetAndSync,
            WmEvent::Workspace(_) => SyncTrigger::Ignore,
        }
    }
}

/// Timing of the sync worker, adjustable on reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTiming {
    pub min_interval: Duration,
    pub fallback_tick: Duration,
}

impl Default for SyncTiming {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(150),
            fallback_tick: Duration::from_millis(1000),
        }
    }
}

pub struct SyncWorker<W, G> {
    sync: Synchronizer<W, G>,
    events: mpsc::Receiver<WmEvent>,
    timing: Arc<RwLock<SyncTiming>>,
    shutdown: Shutdown,
}

impl<W: WindowManager, G: FrameGrabber> SyncWorker<W, G> {
    pub fn new(
        sync: Synchronizer<W, G>,
        events: mpsc::Receiver<WmEvent>,
        timing: Arc<RwLock<SyncTiming>>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            sync,
            events,
            timing,
            shutdown,
        }
    }

    pub fn synchronizer(&self) -> &Synchronizer<W, G> {
        &self.sync
    }

    /// Wait for one event (or the fallback tick) and act on it.  Returns
    /// `None` when the event channel is closed.
    pub fn step(&mut self) -> Option<Option<SyncOutcome>> {
        let timing = *self.timing.read();
        if self.sync.limiter_mut().min_interval() != timing.min_interval {
            self.sync.limiter_mut().set_min_interval(timing.min_interval);
        }
        match self.events.recv_timeout(timing.fallback_tick) {
            Ok(event) => Some(match SyncTrigger::for_event(&event) {
                SyncTrigger::Ignore => None,
                SyncTrigger::Sync => Some(self.sync.sync()),
                SyncTrigger::ResetAndSync => {
                    self.sync.reset_limiter();
                    Some(self.sync.sync())
                }
            }),
            Err(RecvTimeoutError::Timeout) => Some(Some(self.sync.sync())),
            Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Loop until shutdown or until the event channel closes.
    pub fn run(mut self) {
        info!("sync worker started");
        while !self.shutdown.is_requested() {
            match self.step() {
                Some(Some(SyncOutcome::Skipped(reason))) => debug!("sync skipped: {}", reason),
                Some(_) => {}
                None => {
                    // No event source anymore; keep the fallback tick going.
                    let tick = self.timing.read().fallback_tick;
                    if self.shutdown.sleep(tick) {
                        break;
                    }
                    self.sync.sync();
                }
            }
        }
        info!("sync worker stopped");
    }
}

//  Reload

/// Re-reads the configuration file and pushes the parts owned by
/// background state (sync timing, output aliases) to where they live.
pub struct Reloader {
    path: PathBuf,
    timing: Arc<RwLock<SyncTiming>>,
}

impl Reloader {
    pub fn new(path: PathBuf, timing: Arc<RwLock<SyncTiming>>) -> Self {
        Self { path, timing }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the new configuration, or `None` (keeping the old one) if
    /// the file is invalid.
    pub fn reload(&self, store: &KnowledgeStore) -> Option<Config> {
        match Config::load_or_default(&self.path) {
            Ok(config) => {
                self.apply(&config, store);
                info!("reloaded config from {}", self.path.display());
                Some(config)
            }
            Err(e) => {
                error!("{}; keeping the previous configuration", e);
                None
            }
        }
    }

    /// Push `config` into the sync timing and the knowledge store.
    pub fn apply(&self, config: &Config, store: &KnowledgeStore) {
        *self.timing.write() = SyncTiming {
            min_interval: config.capture.min_interval(),
            fallback_tick: config.capture.fallback_tick(),
        };
        let mut k = store.write();
        k.set_output_aliases(config.output_aliases.clone());
        k.clear_image_cache();
    }
}

//  Command dispatcher

/// Run every batch received on `batches` against `wm`.  Returns when all
/// senders are gone, or once shutdown is requested and nothing is queued.
/// Failures are logged, never retried.
pub fn dispatch_commands<W: WindowManager>(
    wm: &W,
    batches: mpsc::Receiver<CommandBatch>,
    shutdown: &Shutdown,
) {
    loop {
        let batch = match batches.recv_timeout(DISPATCH_POLL) {
            Ok(batch) => batch,
            Err(RecvTimeoutError::Timeout) if shutdown.is_requested() => break,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if batch.is_empty() {
            continue;
        }
        let command = batch.to_string();
        debug!("running: {}", command);
        if let Err(e) = wm.run_command(&command) {
            error!("window manager rejected {:?}: {}", command, e);
        }
    }
    info!("command dispatcher stopped");
}

//  Thread spawning

/// Join handles of the background threads.
#[derive(Default)]
pub struct Threads {
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl Threads {
    pub fn new() -> Self {
        Self::default()
    }

    fn spawn(&mut self, name: &'static str, f: impl FnOnce() + Send + 'static) {
        match std::thread::Builder::new().name(name.into()).spawn(f) {
            Ok(handle) => self.handles.push((name, handle)),
            Err(e) => error!("cannot spawn {} thread: {}", name, e),
        }
    }

    /// Run `make_source()` on its own thread, re-creating it after a
    /// failure until shutdown is requested or the sink closes.
    pub fn spawn_event_source<S, F>(
        &mut self,
        make_source: F,
        sink: mpsc::Sender<WmEvent>,
        shutdown: Shutdown,
    ) where
        S: EventSource,
        F: Fn() -> S + Send + 'static,
    {
        self.spawn("i3expo-events", move || {
            while !shutdown.is_requested() {
                match make_source().run(sink.clone()) {
                    Ok(()) => break,
                    Err(e) => {
                        warn!("event subscription failed: {}", e);
                        if shutdown.sleep(RECONNECT_DELAY) {
                            break;
                        }
                    }
                }
            }
            info!("event thread stopped");
        });
    }

    pub fn spawn_sync_worker<W, G>(&mut self, worker: SyncWorker<W, G>)
    where
        W: WindowManager + Send + 'static,
        G: FrameGrabber + Send + 'static,
    {
        self.spawn("i3expo-sync", move || worker.run());
    }

    pub fn spawn_dispatcher<W>(
        &mut self,
        wm: W,
        batches: mpsc::Receiver<CommandBatch>,
        shutdown: Shutdown,
    ) where
        W: WindowManager + Send + 'static,
    {
        self.spawn("i3expo-commands", move || {
            dispatch_commands(&wm, batches, &shutdown)
        });
    }

    pub fn spawn_command_source<S>(
        &mut self,
        mut source: S,
        sink: mpsc::Sender<crate::command::Command>,
    ) where
        S: crate::traits::CommandSource + Send + 'static,
    {
        self.spawn("i3expo-control", move || {
            if let Err(e) = source.run(sink) {
                error!("command source error: {}", e);
            }
        });
    }

    /// Wait for every thread.  Call after raising [`Shutdown`] and dropping
    /// the senders the threads wait on.
    pub fn join(self) {
        for (name, handle) in self.handles {
            if handle.join().is_err() {
                error!("{} thread panicked", name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{WmCommand, WorkspaceRef};
    use crate::sync::tests::{MockError, MockGrabber, MockWm};
    use std::sync::Mutex;
    use std::time::Instant;

    fn worker(
        min_interval: Duration,
    ) -> (SyncWorker<MockWm, Arc<MockGrabber>>, mpsc::Sender<WmEvent>, Arc<MockGrabber>) {
        let grabber = Arc::new(MockGrabber::default());
        let sync = Synchronizer::new(
            Arc::new(KnowledgeStore::default()),
            MockWm::sample(),
            Arc::clone(&grabber),
            min_interval,
        );
        let (tx, rx) = mpsc::channel();
        let timing = Arc::new(RwLock::new(SyncTiming {
            min_interval,
            fallback_tick: Duration::from_millis(50),
        }));
        (SyncWorker::new(sync, rx, timing, Shutdown::new()), tx, grabber)
    }

    fn captures(grabber: &MockGrabber) -> usize {
        grabber.calls.lock().unwrap().len()
    }

    #[test]
    fn triggers_by_event() {
        assert_eq!(
            SyncTrigger::for_event(&WmEvent::Window("new".into())),
            SyncTrigger::Sync
        );
        assert_eq!(
            SyncTrigger::for_event(&WmEvent::Window("title".into())),
            SyncTrigger::Ignore
        );
        assert_eq!(
            SyncTrigger::for_event(&WmEvent::Workspace("focus".into())),
            SyncTrigger::ResetAndSync
        );
        assert_eq!(
            SyncTrigger::for_event(&WmEvent::Workspace("init".into())),
            SyncTrigger::Ignore
        );
    }

    #[test]
    fn window_events_are_rate_limited() {
        let (mut w, tx, grabber) = worker(Duration::from_secs(60));
        tx.send(WmEvent::Window("new".into())).unwrap();
        tx.send(WmEvent::Window("close".into())).unwrap();
        tx.send(WmEvent::Window("title".into())).unwrap();

        assert!(matches!(w.step(), Some(Some(SyncOutcome::Synced { .. }))));
        assert_eq!(w.step(), Some(Some(SyncOutcome::Throttled)));
        assert_eq!(w.step(), Some(None));
        assert_eq!(captures(&grabber), 1);
    }

    #[test]
    fn workspace_focus_bypasses_the_limit() {
        let (mut w, tx, grabber) = worker(Duration::from_secs(60));
        tx.send(WmEvent::Window("focus".into())).unwrap();
        tx.send(WmEvent::Workspace("focus".into())).unwrap();
        w.step();
        w.step();
        assert_eq!(captures(&grabber), 2);
        assert_eq!(w.synchronizer().store().read().active(), Some(200));
    }

    #[test]
    fn quiet_periods_fall_back_to_the_tick() {
        let (mut w, tx, grabber) = worker(Duration::ZERO);
        assert!(matches!(w.step(), Some(Some(SyncOutcome::Synced { .. }))));
        assert_eq!(captures(&grabber), 1);
        drop(tx);
        assert_eq!(w.step(), None);
    }

    #[test]
    fn fallback_tick_is_waited_out_in_full() {
        let (mut w, _tx, grabber) = worker(Duration::ZERO);
        w.timing.write().fallback_tick = Duration::from_millis(700);
        let started = Instant::now();
        assert!(matches!(w.step(), Some(Some(SyncOutcome::Synced { .. }))));
        assert!(started.elapsed() >= Duration::from_millis(650));
        assert_eq!(captures(&grabber), 1);
    }

    #[test]
    fn timing_changes_apply_to_the_limiter() {
        let (mut w, tx, _grabber) = worker(Duration::from_secs(60));
        w.timing.write().min_interval = Duration::ZERO;
        tx.send(WmEvent::Window("new".into())).unwrap();
        tx.send(WmEvent::Window("new".into())).unwrap();
        w.step();
        assert!(matches!(w.step(), Some(Some(SyncOutcome::Synced { .. }))));
    }

    #[test]
    fn worker_stops_on_shutdown() {
        let (w, _tx, _grabber) = worker(Duration::ZERO);
        let shutdown = w.shutdown.clone();
        let mut threads = Threads::new();
        threads.spawn_sync_worker(w);
        std::thread::sleep(Duration::from_millis(100));
        shutdown.request();
        threads.join();
    }

    #[test]
    fn dispatcher_runs_batches_in_order() {
        let wm = Arc::new(MockWm::sample());
        let (tx, rx) = mpsc::channel();
        let mut threads = Threads::new();
        threads.spawn_dispatcher(Arc::clone(&wm), rx, Shutdown::new());

        tx.send(CommandBatch(vec![
            WmCommand::Workspace(WorkspaceRef::Name("3".into())),
            WmCommand::Workspace(WorkspaceRef::Number(1000)),
        ]))
        .unwrap();
        tx.send(CommandBatch::default()).unwrap();
        tx.send(CommandBatch(vec![WmCommand::MoveWorkspaceToOutput("DP-2".into())]))
            .unwrap();
        drop(tx);
        threads.join();

        assert_eq!(
            wm.commands(),
            vec![
                "workspace --no-auto-back-and-forth \"3\"; workspace --no-auto-back-and-forth number 1000",
                "move workspace to output \"DP-2\"",
            ]
        );
    }

    #[test]
    fn dispatcher_stops_on_shutdown_with_live_sender() {
        let wm = Arc::new(MockWm::sample());
        let (tx, rx) = mpsc::channel();
        let shutdown = Shutdown::new();
        let mut threads = Threads::new();
        threads.spawn_dispatcher(Arc::clone(&wm), rx, shutdown.clone());

        tx.send(CommandBatch(vec![WmCommand::Workspace(WorkspaceRef::Name("2".into()))]))
            .unwrap();
        shutdown.request();
        threads.join();

        assert_eq!(wm.commands(), vec!["workspace --no-auto-back-and-forth \"2\""]);
        drop(tx);
    }

    /// Fails `failures` times, then exits cleanly.
    struct FlakySource {
        attempts: Arc<Mutex<u32>>,
        failures: u32,
    }

    impl EventSource for FlakySource {
        type Error = MockError;

        fn run(&mut self, sink: mpsc::Sender<WmEvent>) -> Result<(), MockError> {
            let mut attempts = self.attempts.lock().unwrap();
            *attempts += 1;
            if *attempts <= self.failures {
                return Err(MockError);
            }
            let _ = sink.send(WmEvent::Workspace("focus".into()));
            Ok(())
        }
    }

    #[test]
    fn event_source_is_restarted_after_failure() {
        let attempts = Arc::new(Mutex::new(0));
        let (tx, rx) = mpsc::channel();
        let mut threads = Threads::new();
        let counter = Arc::clone(&attempts);
        threads.spawn_event_source(
            move || FlakySource {
                attempts: Arc::clone(&counter),
                failures: 1,
            },
            tx,
            Shutdown::new(),
        );
        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(event, WmEvent::Workspace("focus".into()));
        threads.join();
        assert_eq!(*attempts.lock().unwrap(), 2);
    }

    #[test]
    fn reload_updates_timing_and_aliases() {
        let path = std::env::temp_dir().join(format!("i3expo-reload-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"{ "capture": { "min_interval_ms": 10, "fallback_tick_ms": 20 },
                 "output_aliases": { "DP-1": "Left" } }"#,
        )
        .unwrap();
        let timing = Arc::new(RwLock::new(SyncTiming::default()));
        let store = KnowledgeStore::default();
        store.write().set_outputs(&MockWm::sample().outputs.lock().unwrap());
        let reloader = Reloader::new(path.clone(), Arc::clone(&timing));

        let config = reloader.reload(&store).unwrap();
        assert_eq!(config.capture.min_interval_ms, 10);
        assert_eq!(timing.read().fallback_tick, Duration::from_millis(20));
        assert_eq!(store.read().outputs()[0].label(), "Left");

        std::fs::write(&path, "{ broken").unwrap();
        assert!(reloader.reload(&store).is_none());
        assert_eq!(timing.read().min_interval, Duration::from_millis(10));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn shutdown_sleep_wakes_early() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.sleep(Duration::from_millis(10)));
        shutdown.request();
        let start = std::time::Instant::now();
        assert!(shutdown.sleep(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}

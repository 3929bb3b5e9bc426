//! Unix-socket [`CommandSource`] implementation.
//!
//! Binds a Unix stream socket and accepts one connection at a time.
//! Each line received is parsed as a JSON-encoded [`Command`]; a bare word
//! (`toggle`, `reload`, `quit`) is accepted too so that
//! `echo toggle | socat - UNIX-CONNECT:...` works from a key binding.
//!
//! # Wire format
//!
//! Every message is a single line followed by `\n`:
//!
//! ```json
//! "Toggle"
//! "Reload"
//! "Quit"
//! ```

use crate::command::Command;
use crate::daemon::Shutdown;
use crate::traits::CommandSource;
use log::{debug, error, info, warn};
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

/// How often the accept loop looks at the shutdown flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// `$XDG_RUNTIME_DIR/i3expo.sock`, or `/tmp/i3expo.sock`.
pub fn default_socket_path() -> PathBuf {
    let runtime = std::env::var("XDG_RUNTIME_DIR").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(runtime).join("i3expo.sock")
}

/// A [`CommandSource`] that listens on a Unix stream socket.
///
/// Each accepted connection can send multiple newline-delimited commands.
/// When the connection closes, the listener waits for the next one.
pub struct UnixSocketListener {
    path: PathBuf,
    shutdown: Shutdown,
}

/// Errors produced by the Unix socket listener.
#[derive(Debug, thiserror::Error)]
pub enum UnixSocketError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl UnixSocketListener {
    /// The socket file is created when [`run`](CommandSource::run) is called
    /// and removed when the listener stops.
    pub fn new(path: impl AsRef<Path>, shutdown: Shutdown) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            shutdown,
        }
    }

    /// The filesystem path of the socket.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read commands from one client until it disconnects.  Returns `false`
    /// once the sink is closed.
    fn serve(&self, stream: UnixStream, sink: &mpsc::Sender<Command>) -> bool {
        if let Err(e) = stream.set_nonblocking(false) {
            warn!("cannot configure client socket: {}", e);
            return true;
        }
        let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
        for line in BufReader::new(stream).lines() {
            let text = match line {
                Ok(text) => text,
                Err(e) => {
                    debug!("read error: {}", e);
                    break;
                }
            };
            if text.trim().is_empty() {
                continue;
            }
            match parse_line(&text) {
                Ok(cmd) => {
                    debug!("received {:?}", cmd);
                    if sink.send(cmd).is_err() {
                        info!("sink closed, shutting down");
                        return false;
                    }
                }
                Err(e) => error!("bad command {:?}: {}", text, e),
            }
        }
        true
    }
}

fn parse_line(text: &str) -> Result<Command, UnixSocketError> {
    match serde_json::from_str::<Command>(text) {
        Ok(cmd) => Ok(cmd),
        Err(e) => Command::from_arg(text).ok_or(UnixSocketError::Json(e)),
    }
}

impl CommandSource for UnixSocketListener {
    type Error = UnixSocketError;

    /// Bind the socket and accept connections until shutdown is requested
    /// or the sink is closed.
    fn run(&mut self, sink: mpsc::Sender<Command>) -> Result<(), Self::Error> {
        // Remove stale socket if present.
        let _ = std::fs::remove_file(&self.path);

        let listener = UnixListener::bind(&self.path)?;
        listener.set_nonblocking(true)?;
        info!("listening on {}", self.path.display());

        while !self.shutdown.is_requested() {
            match listener.accept() {
                Ok((stream, _)) => {
                    debug!("client connected");
                    if !self.serve(stream, &sink) {
                        break;
                    }
                    debug!("client disconnected");
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    error!("accept error: {}", e);
                    std::thread::sleep(POLL_INTERVAL);
                }
            }
        }
        let _ = std::fs::remove_file(&self.path);
        info!("listener on {} stopped", self.path.display());
        Ok(())
    }
}

/// Send one command to a running daemon.
pub fn send_command(path: &Path, cmd: Command) -> Result<(), UnixSocketError> {
    let mut stream = UnixStream::connect(path)?;
    let line = serde_json::to_string(&cmd)?;
    writeln!(stream, "{}", line)?;
    stream.flush()?;
    Ok(())
}

//  Tests

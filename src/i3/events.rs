//! [`EventSource`] backed by an i3 / sway event subscription.
//!
//! Opens a dedicated IPC connection, subscribes to `window` and
//! `workspace` events and forwards their `change` field.  The socket is
//! polled with a short read timeout so that a [`Shutdown`] request is
//! noticed even when the window manager is quiet.

use super::ipc::{self, EVENT_WINDOW, EVENT_WORKSPACE, SUBSCRIBE};
use super::wm::I3Error;
use crate::daemon::Shutdown;
use crate::traits::{EventSource, WmEvent};
use log::{debug, info};
use serde::Deserialize;
use std::io::{ErrorKind, Read};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

/// How long to wait for the first byte of an event before re-checking the
/// shutdown flag.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Timeout for the remainder of a message once its first byte arrived.
const MESSAGE_TIMEOUT: Duration = Duration::from_secs(2);

const SUBSCRIPTION: &[u8] = br#"["window","workspace"]"#;

pub struct I3EventSource {
    socket: Option<PathBuf>,
    shutdown: Shutdown,
}

#[derive(Deserialize)]
struct EventJson {
    change: String,
}

#[derive(Deserialize)]
struct SubscribeReplyJson {
    success: bool,
}

impl I3EventSource {
    pub fn new(shutdown: Shutdown) -> Self {
        Self {
            socket: None,
            shutdown,
        }
    }

    pub fn with_socket(path: impl Into<PathBuf>, shutdown: Shutdown) -> Self {
        Self {
            socket: Some(path.into()),
            shutdown,
        }
    }

    fn connect(&self) -> Result<UnixStream, I3Error> {
        let path = self
            .socket
            .clone()
            .or_else(ipc::socket_path)
            .ok_or_else(|| I3Error("neither I3SOCK nor SWAYSOCK is set".into()))?;
        let mut stream = UnixStream::connect(&path)
            .map_err(|e| I3Error(format!("connect to {}: {}", path.display(), e)))?;
        set_timeout(&stream, MESSAGE_TIMEOUT)?;

        ipc::write_message(&mut stream, SUBSCRIBE, SUBSCRIPTION)?;
        let (kind, reply) = ipc::read_message(&mut stream)?;
        let reply: SubscribeReplyJson = serde_json::from_slice(&reply)
            .map_err(|e| I3Error(format!("parse subscribe reply: {}", e)))?;
        if kind != SUBSCRIBE || !reply.success {
            return Err(I3Error("subscription rejected".into()));
        }
        Ok(stream)
    }
}

fn set_timeout(stream: &UnixStream, timeout: Duration) -> Result<(), I3Error> {
    stream
        .set_read_timeout(Some(timeout))
        .map_err(|e| I3Error(format!("set timeout: {}", e)))
}

/// Decode one event message.  Returns `None` for event types we did not
/// subscribe to and for payloads without a `change` field.
pub(crate) fn parse_event(kind: u32, payload: &[u8]) -> Option<WmEvent> {
    let change = serde_json::from_slice::<EventJson>(payload).ok()?.change;
    match kind {
        EVENT_WINDOW => Some(WmEvent::Window(change)),
        EVENT_WORKSPACE => Some(WmEvent::Workspace(change)),
        _ => None,
    }
}

impl EventSource for I3EventSource {
    type Error = I3Error;

    /// Subscribe and forward events until shutdown is requested or the
    /// sink is closed.
    fn run(&mut self, sink: mpsc::Sender<WmEvent>) -> Result<(), Self::Error> {
        let mut stream = self.connect()?;
        info!("subscribed to window and workspace events");

        while !self.shutdown.is_requested() {
            // Only the first byte is read under the short timeout; a
            // timeout in the middle of a message would desynchronise the
            // stream.
            set_timeout(&stream, POLL_INTERVAL)?;
            let mut first = [0u8; 1];
            match stream.read(&mut first) {
                Ok(0) => return Err(I3Error("event socket closed".into())),
                Ok(_) => {}
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    continue
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(I3Error(format!("read event: {}", e))),
            }

            set_timeout(&stream, MESSAGE_TIMEOUT)?;
            let (kind, payload) = {
                let mut reader = (&first[..]).chain(&mut stream);
                ipc::read_message(&mut reader)?
            };
            if let Some(event) = parse_event(kind, &payload) {
                debug!("wm event {:?}", event);
                if sink.send(event).is_err() {
                    info!("event sink closed, unsubscribing");
                    return Ok(());
                }
            }
        }
        info!("event source shutting down");
        Ok(())
    }
}

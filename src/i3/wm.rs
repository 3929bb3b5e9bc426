//! [`WindowManager`] implementation backed by i3 / sway IPC.
//!
//! Communicates directly with the window manager through the socket named
//! by `I3SOCK` (or `SWAYSOCK`), avoiding any shell command invocation or
//! third-party crate for socket discovery.

use super::ipc::{self, ProtocolError};
use super::tree::Node;
use crate::command::{Focus, OutputInfo, Rect, WorkspaceInfo};
use crate::traits::WindowManager;
use serde::Deserialize;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

/// Upper bound on how long a single request may block.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// i3/sway-backed window manager.
///
/// No connection is held open; each method call performs one short-lived
/// request.
#[derive(Debug, Clone, Default)]
pub struct I3Wm {
    socket: Option<PathBuf>,
}

/// Errors that can occur when talking to i3 or sway.
#[derive(Debug, thiserror::Error)]
#[error("i3 IPC error: {0}")]
pub struct I3Error(pub(crate) String);

impl From<ProtocolError> for I3Error {
    fn from(e: ProtocolError) -> Self {
        I3Error(e.to_string())
    }
}

impl I3Wm {
    /// Create a handle that resolves the socket from the environment on
    /// every request.
    pub fn new() -> Self {
        Self { socket: None }
    }

    /// Create a handle bound to an explicit socket path.
    pub fn with_socket(path: impl Into<PathBuf>) -> Self {
        Self {
            socket: Some(path.into()),
        }
    }

    /// Fetch and parse the whole layout tree.
    pub fn tree(&self) -> Result<Node, I3Error> {
        let json = self.request(ipc::GET_TREE, "")?;
        serde_json::from_str(&json).map_err(parse_err)
    }

    fn socket_path(&self) -> Result<PathBuf, I3Error> {
        self.socket
            .clone()
            .or_else(ipc::socket_path)
            .ok_or_else(|| I3Error("neither I3SOCK nor SWAYSOCK is set".into()))
    }

    /// Send one request and return the reply payload as a string.
    fn request(&self, kind: u32, payload: &str) -> Result<String, I3Error> {
        let path = self.socket_path()?;
        let mut stream = UnixStream::connect(&path)
            .map_err(|e| I3Error(format!("connect to {}: {}", path.display(), e)))?;
        stream
            .set_read_timeout(Some(REQUEST_TIMEOUT))
            .map_err(|e| I3Error(format!("set timeout: {}", e)))?;

        ipc::write_message(&mut stream, kind, payload.as_bytes())?;
        let (reply_kind, reply) = ipc::read_message(&mut stream)?;
        if reply_kind != kind {
            return Err(I3Error(format!(
                "expected reply type {}, got {}",
                kind, reply_kind
            )));
        }
        String::from_utf8(reply).map_err(|e| I3Error(format!("utf-8: {}", e)))
    }
}

//  Minimal serde structs for the JSON we care about

/// Subset of one element of the `GET_WORKSPACES` reply.
#[derive(Deserialize)]
struct WorkspaceJson {
    id: i64,
    num: i64,
    name: String,
    visible: bool,
    focused: bool,
    output: String,
    rect: Rect,
}

/// Subset of one element of the `GET_OUTPUTS` reply.
#[derive(Deserialize)]
struct OutputJson {
    name: String,
    active: bool,
    #[serde(default)]
    primary: bool,
    rect: Rect,
    #[serde(default)]
    current_workspace: Option<String>,
}

/// One element of the `RUN_COMMAND` reply.
#[derive(Deserialize)]
struct CommandReplyJson {
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

fn parse_err(e: serde_json::Error) -> I3Error {
    I3Error(format!("parse: {}", e))
}

pub(crate) fn parse_workspaces(json: &str) -> Result<Vec<WorkspaceInfo>, I3Error> {
    let workspaces: Vec<WorkspaceJson> = serde_json::from_str(json).map_err(parse_err)?;
    Ok(workspaces
        .into_iter()
        .map(|w| WorkspaceInfo {
            id: w.id,
            num: (w.num >= 0).then_some(w.num),
            name: w.name,
            visible: w.visible,
            focused: w.focused,
            output: w.output,
            rect: w.rect,
        })
        .collect())
}

pub(crate) fn parse_outputs(json: &str) -> Result<Vec<OutputInfo>, I3Error> {
    let outputs: Vec<OutputJson> = serde_json::from_str(json).map_err(parse_err)?;
    Ok(outputs
        .into_iter()
        .map(|o| OutputInfo {
            name: o.name,
            rect: o.rect,
            active: o.active,
            primary: o.primary,
            current_workspace: o.current_workspace,
        })
        .collect())
}

/// Turn a `RUN_COMMAND` reply into an error if any sub-command failed.
pub(crate) fn check_command_reply(json: &str) -> Result<(), I3Error> {
    let replies: Vec<CommandReplyJson> = serde_json::from_str(json).map_err(parse_err)?;
    let failures: Vec<String> = replies
        .into_iter()
        .filter(|r| !r.success)
        .map(|r| r.error.unwrap_or_else(|| "unknown error".into()))
        .collect();
    if failures.is_empty() {
        Ok(())
    } else {
        Err(I3Error(format!("command failed: {}", failures.join("; "))))
    }
}

//  WindowManager implementation

impl WindowManager for I3Wm {
    type Error = I3Error;

    fn focus(&self) -> Result<Option<Focus>, Self::Error> {
        Ok(self.tree()?.find_focused())
    }

    fn workspaces(&self) -> Result<Vec<WorkspaceInfo>, Self::Error> {
        parse_workspaces(&self.request(ipc::GET_WORKSPACES, "")?)
    }

    fn outputs(&self) -> Result<Vec<OutputInfo>, Self::Error> {
        parse_outputs(&self.request(ipc::GET_OUTPUTS, "")?)
    }

    fn run_command(&self, command: &str) -> Result<(), Self::Error> {
        check_command_reply(&self.request(ipc::RUN_COMMAND, command)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;
    use std::sync::atomic::{AtomicU32, Ordering};

    static TEST_ID: AtomicU32 = AtomicU32::new(0);

    fn tmp_socket_path() -> PathBuf {
        let id = TEST_ID.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!("i3expo-wm-test-{}-{}.sock", std::process::id(), id))
    }

    #[test]
    fn parses_workspaces_reply() {
        let json = r#"[
            {"id": 94, "num": 1, "name": "1", "visible": true, "focused": true, "urgent": false,
             "rect": {"x": 0, "y": 0, "width": 1920, "height": 1080}, "output": "DP-1"},
            {"id": 95, "num": -1, "name": "mail", "visible": false, "focused": false, "urgent": false,
             "rect": {"x": 1920, "y": 0, "width": 1080, "height": 1920}, "output": "HDMI-A-1"}
        ]"#;
        let ws = parse_workspaces(json).unwrap();
        assert_eq!(ws.len(), 2);
        assert_eq!(ws[0].num, Some(1));
        assert!(ws[0].focused);
        assert_eq!(ws[1].num, None, "named workspaces carry num -1");
        assert_eq!(ws[1].rect, Rect::new(1920, 0, 1080, 1920));
    }

    #[test]
    fn parses_outputs_reply() {
        let json = r#"[
            {"name": "xroot-0", "active": false, "primary": false,
             "rect": {"x": 0, "y": 0, "width": 3000, "height": 1920}, "current_workspace": null},
            {"name": "DP-1", "active": true, "primary": true,
             "rect": {"x": 0, "y": 0, "width": 1920, "height": 1080}, "current_workspace": "1"}
        ]"#;
        let outs = parse_outputs(json).unwrap();
        assert_eq!(outs.len(), 2);
        assert!(!outs[0].active);
        assert!(outs[1].primary);
        assert_eq!(outs[1].current_workspace.as_deref(), Some("1"));
    }

    #[test]
    fn sway_outputs_without_primary_field() {
        let json = r#"[{"name": "eDP-1", "active": true,
                       "rect": {"x": 0, "y": 0, "width": 2256, "height": 1504}}]"#;
        let outs = parse_outputs(json).unwrap();
        assert!(!outs[0].primary);
        assert_eq!(outs[0].current_workspace, None);
    }

    #[test]
    fn command_reply_failures_are_errors() {
        assert!(check_command_reply(r#"[{"success": true}]"#).is_ok());
        let err = check_command_reply(
            r#"[{"success": true}, {"success": false, "error": "No output matched"}]"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("No output matched"));
    }

    #[test]
    fn missing_socket_is_an_error() {
        let wm = I3Wm::with_socket("/nonexistent/i3expo/ipc.sock");
        assert!(wm.workspaces().is_err());
    }

    #[test]
    fn run_command_round_trip_over_socket() {
        let path = tmp_socket_path();
        let listener = UnixListener::bind(&path).unwrap();

        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let (kind, payload) = ipc::read_message(&mut stream).unwrap();
            ipc::write_message(&mut stream, kind, br#"[{"success":true}]"#).unwrap();
            (kind, String::from_utf8(payload).unwrap())
        });

        let wm = I3Wm::with_socket(&path);
        wm.run_command("workspace --no-auto-back-and-forth \"3\"").unwrap();

        let (kind, payload) = server.join().unwrap();
        assert_eq!(kind, ipc::RUN_COMMAND);
        assert_eq!(payload, "workspace --no-auto-back-and-forth \"3\"");
        let _ = std::fs::remove_file(&path);
    }
}

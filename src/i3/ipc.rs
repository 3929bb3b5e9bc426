//! Wire framing for the i3 IPC protocol.
//!
//! Every message, in both directions, is
//!
//! ```text
//! "i3-ipc" | u32 payload length | u32 message type | JSON payload
//! ```
//!
//! with both integers in native byte order.  Event messages pushed by the
//! window manager have the high bit of the type set.

use std::io::{self, Read, Write};
use std::path::PathBuf;

pub const MAGIC: &[u8; 6] = b"i3-ipc";

/// Header length: magic + length + type.
pub const HEADER_LEN: usize = 14;

/// Replies larger than this are treated as a protocol error.
const MAX_PAYLOAD: u32 = 64 * 1024 * 1024;

pub const RUN_COMMAND: u32 = 0;
pub const GET_WORKSPACES: u32 = 1;
pub const SUBSCRIBE: u32 = 2;
pub const GET_OUTPUTS: u32 = 3;
pub const GET_TREE: u32 = 4;

/// Set on the type of every event message.
pub const EVENT_BIT: u32 = 1 << 31;
pub const EVENT_WORKSPACE: u32 = EVENT_BIT;
pub const EVENT_WINDOW: u32 = EVENT_BIT | 3;

/// Errors produced while framing or unframing a message.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("bad magic in message header")]
    BadMagic,
    #[error("payload of {0} bytes exceeds limit")]
    TooLarge(u32),
}

/// Resolve the IPC socket path from `I3SOCK`, falling back to `SWAYSOCK`.
pub fn socket_path() -> Option<PathBuf> {
    ["I3SOCK", "SWAYSOCK"]
        .iter()
        .filter_map(|var| std::env::var_os(var))
        .find(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Frame `payload` as a message of type `kind`.
pub fn encode(kind: u32, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&(payload.len() as u32).to_ne_bytes());
    buf.extend_from_slice(&kind.to_ne_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Write one framed message.
pub fn write_message<W: Write>(out: &mut W, kind: u32, payload: &[u8]) -> Result<(), ProtocolError> {
    out.write_all(&encode(kind, payload))?;
    out.flush()?;
    Ok(())
}

/// Read one framed message, returning `(type, payload)`.
pub fn read_message<R: Read>(input: &mut R) -> Result<(u32, Vec<u8>), ProtocolError> {
    let mut header = [0u8; HEADER_LEN];
    input.read_exact(&mut header)?;
    if &header[..6] != MAGIC {
        return Err(ProtocolError::BadMagic);
    }
    let len = u32::from_ne_bytes([header[6], header[7], header[8], header[9]]);
    let kind = u32::from_ne_bytes([header[10], header[11], header[12], header[13]]);
    if len > MAX_PAYLOAD {
        return Err(ProtocolError::TooLarge(len));
    }
    let mut payload = vec![0u8; len as usize];
    input.read_exact(&mut payload)?;
    Ok((kind, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn framed_message_reads_back() {
        let bytes = encode(GET_TREE, b"{}");
        assert_eq!(bytes.len(), HEADER_LEN + 2);
        assert_eq!(&bytes[..6], MAGIC);

        let (kind, payload) = read_message(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(kind, GET_TREE);
        assert_eq!(payload, b"{}");
    }

    #[test]
    fn consecutive_messages_on_one_stream() {
        let mut bytes = encode(EVENT_WINDOW, br#"{"change":"new"}"#);
        bytes.extend(encode(EVENT_WORKSPACE, br#"{"change":"focus"}"#));
        let mut cursor = Cursor::new(bytes);
        assert_eq!(read_message(&mut cursor).unwrap().0, EVENT_WINDOW);
        assert_eq!(read_message(&mut cursor).unwrap().0, EVENT_WORKSPACE);
        assert!(matches!(read_message(&mut cursor), Err(ProtocolError::Io(_))));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = encode(RUN_COMMAND, b"[]");
        bytes[0] = b'x';
        assert!(matches!(
            read_message(&mut Cursor::new(bytes)),
            Err(ProtocolError::BadMagic)
        ));
    }

    #[test]
    fn truncated_payload_is_an_io_error() {
        let mut bytes = encode(RUN_COMMAND, b"[1,2,3]");
        bytes.truncate(bytes.len() - 2);
        assert!(matches!(
            read_message(&mut Cursor::new(bytes)),
            Err(ProtocolError::Io(_))
        ));
    }

    #[test]
    fn event_types_have_high_bit() {
        assert_ne!(EVENT_WINDOW & EVENT_BIT, 0);
        assert_ne!(EVENT_WORKSPACE & EVENT_BIT, 0);
        assert_eq!(GET_WORKSPACES & EVENT_BIT, 0);
    }
}

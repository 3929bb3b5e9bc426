//! Control socket that accepts commands over a Unix socket.
//!
//! Key bindings (`i3expod toggle`, scripts, `socat`) connect to the socket
//! and send newline-delimited commands to the running daemon.

pub mod listener;

//! IPC bridge between a parent process and its child.
//!
//! # Architecture
//!
//! - **protocol**: wire frames (Ready, Payload, Shutdown) and payload classification
//! - **codec**: length-delimited JSON framing for AsyncRead/AsyncWrite
//! - **channel**: non-blocking duplex endpoint backed by reader/writer tasks

pub mod channel;
pub mod codec;
pub mod protocol;

pub use channel::{Channel, ChannelError};
pub use protocol::{Frame, Payload, RemoteError, RemoteErrorKind, SessionId};

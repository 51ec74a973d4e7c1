use bytes::Bytes;

use super::protocol::Command;

/// An event produced by the decoder while reading a client connection.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ClientEvent {
    /// A complete command line.
    Command(Command),
    /// A chunk of a job body following a `put` command.
    PutChunk(Bytes),
    /// The trailing CR-LF after a job body was consumed.
    PutEnd,
    /// Some input was discarded while resynchronising after a framing error.
    Discarded,
}

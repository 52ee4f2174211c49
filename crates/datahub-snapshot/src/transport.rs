//! Snapshot transport: a unidirectional, non-blocking pipe.
//!
//! The write end belongs to the engine; the read end is handed to the
//! caller. Targets without anonymous pipe support stream through a
//! pre-provisioned named FIFO instead (path from `HubConfig::snapshot`),
//! whose read end is held by the external consumer.

use std::io;
use std::path::Path;
use tokio::net::unix::pipe;

/// Create an anonymous non-blocking pipe pair.
pub fn anonymous_pipe() -> io::Result<(pipe::Sender, pipe::Receiver)> {
    pipe::pipe()
}

/// Open the write end of an existing named FIFO.
///
/// POSIX semantics apply: the open fails with `ENXIO` until a reader holds
/// the other end, so the consumer must attach first.
pub fn open_fifo_sender(path: &Path) -> io::Result<pipe::Sender> {
    pipe::OpenOptions::new().open_sender(path)
}

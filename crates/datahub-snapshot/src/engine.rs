//! The snapshot engine: pass loop, backpressured drains, and termination.
//!
//! A snapshot claims the hub's single snapshot slot (pausing structural
//! mutation), then alternates walker steps with bounded drains to the sink.
//! The hub is only borrowed between awaits, so value pushes keep flowing
//! while the stream is in flight.

use crate::formatter::{Formatter, SnapshotFormat};
use crate::json::JsonFormatter;
use crate::transport;
use crate::walk::{FilterMask, WalkEvent, Walker, mark_relevance};
use datahub_core::error::{HubError, Result};
use datahub_core::hub::DataHub;
use datahub_core::tree::EntryId;
use std::cell::RefCell;
use std::io;
use std::rc::Rc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// A formatter may request at most this many passes; more ends the
/// snapshot with `OutOfRange`.
pub const MAX_PASSES: usize = 10;

/// Terminal status of a snapshot, delivered to the completion callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotStatus {
    /// Normal completion.
    Ok,
    /// The reader side of the pipe hung up.
    Closed,
    /// Unrecoverable I/O condition.
    Fault,
    /// The formatter exceeded [`MAX_PASSES`].
    OutOfRange,
}

/// A snapshot request.
#[derive(Debug, Clone)]
pub struct SnapshotParams {
    /// Subtree root path.
    pub path: String,
    /// Only entries modified after this timestamp are reported.
    pub since: f64,
    pub format: SnapshotFormat,
    /// Physically release all deletion records once the snapshot completes.
    pub flush_deletions: bool,
}

impl SnapshotParams {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            since: 0.0,
            format: SnapshotFormat::Json,
            flush_deletions: false,
        }
    }
}

/// A claimed snapshot, ready to stream. Between [`begin`] and
/// [`PreparedSnapshot::stream`] the hub is update-paused.
pub struct PreparedSnapshot {
    hub: Rc<RefCell<DataHub>>,
    root: EntryId,
    since: f64,
    frozen_serial: u64,
    flush_deletions: bool,
    formatter: Box<dyn Formatter>,
}

/// Validate a request and claim the snapshot slot.
///
/// Fails synchronously with `Busy` if a snapshot is already running,
/// `NotFound` if the path does not resolve, `Unsupported` for an unknown
/// format (checked by the caller constructing [`SnapshotParams`]).
pub fn begin(hub: &Rc<RefCell<DataHub>>, params: &SnapshotParams) -> Result<PreparedSnapshot> {
    let formatter: Box<dyn Formatter> = match params.format {
        SnapshotFormat::Json => Box::new(JsonFormatter::new()),
    };
    begin_with_formatter(hub, params, formatter)
}

/// [`begin`] with an explicit formatter instead of one selected by
/// `params.format`.
pub fn begin_with_formatter(
    hub: &Rc<RefCell<DataHub>>,
    params: &SnapshotParams,
    formatter: Box<dyn Formatter>,
) -> Result<PreparedSnapshot> {
    let mut h = hub.borrow_mut();
    let root = h
        .tree()
        .find(&params.path)
        .ok_or_else(|| HubError::NotFound(params.path.clone()))?;
    h.try_begin_snapshot()?;
    let frozen_serial = h.tree().serial();
    drop(h);

    Ok(PreparedSnapshot {
        hub: hub.clone(),
        root,
        since: params.since,
        frozen_serial,
        flush_deletions: params.flush_deletions,
        formatter,
    })
}

impl PreparedSnapshot {
    /// Release the snapshot slot without streaming anything.
    pub fn abort(mut self) {
        self.formatter.close();
        self.hub.borrow_mut().finish_snapshot(&[], false);
    }

    /// Stream the snapshot to `sink` and return the terminal status.
    ///
    /// On any termination the formatter is closed, structural mutation
    /// resumes (applying deferred operations), `new` flags clear on the
    /// traversed entries, and deletion records flush if requested and the
    /// stream completed.
    pub async fn stream<W: AsyncWrite + Unpin>(mut self, mut sink: W) -> SnapshotStatus {
        let chunk = self.hub.borrow().config().limits.max_string_bytes.max(64);
        let mut buf: Vec<u8> = Vec::new();
        let mut visited: Vec<EntryId> = Vec::new();
        let mut filter = FilterMask::LIVE;
        let mut passes = 0usize;

        let status = 'run: loop {
            passes += 1;
            if passes > MAX_PASSES {
                break SnapshotStatus::OutOfRange;
            }

            {
                let mut hub = self.hub.borrow_mut();
                mark_relevance(hub.tree_mut(), self.root, filter, self.since, self.frozen_serial);
            }
            let mut walker = Walker::new(self.root);
            {
                let hub = self.hub.borrow();
                self.formatter.start_tree(&mut buf, hub.tree(), self.root);
            }
            if let Err(err) = drain(&mut sink, &mut buf, chunk).await {
                break map_io(&err);
            }

            loop {
                let finished = {
                    let hub = self.hub.borrow();
                    let tree = hub.tree();
                    match walker.step(tree) {
                        WalkEvent::Node(id) => {
                            self.formatter.begin_node(&mut buf, tree, self.root, id);
                            false
                        }
                        WalkEvent::NodeDone(id) => {
                            self.formatter.end_node(&mut buf, tree, self.root, id);
                            false
                        }
                        WalkEvent::Finished => {
                            self.formatter.end_tree(&mut buf, tree, self.root);
                            true
                        }
                    }
                };
                if let Err(err) = drain(&mut sink, &mut buf, chunk).await {
                    break 'run map_io(&err);
                }
                // Suspension point: the engine never holds the loop across
                // a whole pass.
                tokio::task::yield_now().await;
                if finished {
                    break;
                }
            }
            visited.append(&mut walker.visited);

            let request = self.formatter.request();
            if !request.scan {
                break SnapshotStatus::Ok;
            }
            filter = request.filter;
        };

        let _ = sink.shutdown().await;
        self.formatter.close();
        let flush = self.flush_deletions && status == SnapshotStatus::Ok;
        self.hub.borrow_mut().finish_snapshot(&visited, flush);
        debug!("snapshot of {:?} finished: {status:?}", self.root);
        status
    }
}

/// One-call convenience: claim, stream, return the terminal status.
pub async fn snapshot_to<W: AsyncWrite + Unpin>(
    hub: &Rc<RefCell<DataHub>>,
    params: &SnapshotParams,
    sink: W,
) -> Result<SnapshotStatus> {
    let prepared = begin(hub, params)?;
    Ok(prepared.stream(sink).await)
}

/// Claim a snapshot, create the transport pipe, and spawn the streaming
/// task on the current `LocalSet`. The read end is returned to the caller;
/// the completion callback fires asynchronously with the terminal status.
pub fn start_snapshot(
    hub: &Rc<RefCell<DataHub>>,
    params: &SnapshotParams,
    on_complete: impl FnOnce(SnapshotStatus) + 'static,
) -> Result<tokio::net::unix::pipe::Receiver> {
    let prepared = begin(hub, params)?;
    let (tx, rx) = match transport::anonymous_pipe() {
        Ok(pair) => pair,
        Err(err) => {
            prepared.abort();
            return Err(HubError::Fault(err.to_string()));
        }
    };
    tokio::task::spawn_local(async move {
        let status = prepared.stream(tx).await;
        on_complete(status);
    });
    Ok(rx)
}

/// Drain the out-buffer in bounded chunks, yielding between writes so the
/// sink's backpressure never wedges the cooperative loop.
async fn drain<W: AsyncWrite + Unpin>(
    sink: &mut W,
    buf: &mut Vec<u8>,
    chunk: usize,
) -> io::Result<()> {
    let mut offset = 0;
    while offset < buf.len() {
        let end = (offset + chunk).min(buf.len());
        sink.write_all(&buf[offset..end]).await?;
        offset = end;
        tokio::task::yield_now().await;
    }
    buf.clear();
    Ok(())
}

fn map_io(err: &io::Error) -> SnapshotStatus {
    match err.kind() {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof
        | io::ErrorKind::WriteZero
        | io::ErrorKind::ConnectionReset => SnapshotStatus::Closed,
        _ => SnapshotStatus::Fault,
    }
}

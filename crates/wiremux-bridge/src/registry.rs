//! Connection registry and id allocation
//!
//! The registry is one of the two structures shared between the dispatch
//! loop and the per-stream forwarding tasks (the other is the serialized
//! tunnel write path). Entries are inserted exactly once, when a local
//! connection is accepted or a remote dial succeeds, and removed exactly
//! once by whichever side first observes termination; removing an absent
//! id is a no-op.

use crate::reply::{DialOutcome, DialReplySender};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use wiremux_proto::ConnId;

/// Any duplex byte-stream the bridge can forward.
pub trait StreamDuplex: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> StreamDuplex for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

pub(crate) type BoxedStream = Box<dyn StreamDuplex>;

fn stream_closed() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stream closed")
}

/// One registered stream: the write half of the local duplex stream, a
/// per-connection shutdown token, and (for locally-initiated streams)
/// the pending dial reply toward the front-end.
pub(crate) struct ConnEntry {
    writer: Mutex<WriteHalf<BoxedStream>>,
    shutdown: CancellationToken,
    reply: StdMutex<Option<DialReplySender>>,
}

impl ConnEntry {
    pub(crate) fn new(writer: WriteHalf<BoxedStream>, reply: Option<DialReplySender>) -> Self {
        Self {
            writer: Mutex::new(writer),
            shutdown: CancellationToken::new(),
            reply: StdMutex::new(reply),
        }
    }

    /// Write payload bytes to the local stream.
    ///
    /// Races the shutdown token, so a write blocked behind a stalled
    /// local client releases the writer lock as soon as the entry is
    /// closed instead of pinning it; [`close`](Self::close) waits on
    /// that same lock.
    pub(crate) async fn write(&self, data: &[u8]) -> std::io::Result<()> {
        let mut writer = tokio::select! {
            _ = self.shutdown.cancelled() => return Err(stream_closed()),
            guard = self.writer.lock() => guard,
        };
        tokio::select! {
            _ = self.shutdown.cancelled() => Err(stream_closed()),
            res = writer.write_all(data) => res,
        }
    }

    /// Close the local stream and wake its forwarding loop. Idempotent.
    ///
    /// Cancels the token before taking the writer lock; any in-flight
    /// [`write`](Self::write) aborts and frees the lock, so this cannot
    /// wait behind a stream that stopped draining.
    pub(crate) async fn close(&self) {
        self.shutdown.cancel();
        let _ = self.writer.lock().await.shutdown().await;
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub(crate) fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.shutdown.cancelled()
    }

    /// Take the pending dial reply, if it has not been delivered yet.
    /// Taking it a second time yields `None`, so a reply goes out at
    /// most once per connection.
    pub(crate) fn take_reply(&self) -> Option<DialReplySender> {
        self.reply.lock().unwrap().take()
    }

    /// Deliver the dial outcome to the front-end, if still awaited.
    pub(crate) fn deliver_reply(&self, outcome: DialOutcome) {
        if let Some(reply) = self.take_reply() {
            // The front-end may have given up on the connection already.
            let _ = reply.send(outcome);
        }
    }
}

/// Concurrent map of connection id to registered stream.
#[derive(Default)]
pub(crate) struct ConnRegistry {
    conns: StdMutex<HashMap<ConnId, Arc<ConnEntry>>>,
}

impl ConnRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn store(&self, cid: ConnId, entry: Arc<ConnEntry>) {
        self.conns.lock().unwrap().insert(cid, entry);
    }

    pub(crate) fn load(&self, cid: ConnId) -> Option<Arc<ConnEntry>> {
        self.conns.lock().unwrap().get(&cid).cloned()
    }

    /// Remove and return the entry for `cid`. Removing an id that is
    /// absent (already removed by the other failure detector) is a
    /// silent no-op.
    pub(crate) fn remove(&self, cid: ConnId) -> Option<Arc<ConnEntry>> {
        self.conns.lock().unwrap().remove(&cid)
    }

    /// Take every entry out of the registry. Teardown iterates the
    /// returned list so every registered stream gets closed, not just
    /// the first.
    pub(crate) fn drain(&self) -> Vec<(ConnId, Arc<ConnEntry>)> {
        self.conns.lock().unwrap().drain().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.conns.lock().unwrap().len()
    }
}

/// Monotonic connection id allocator owned by the bridge.
///
/// Ids start at 1 and are never reclaimed. After 2^32 allocations the
/// counter wraps and may collide with a still-open id; a single bridge
/// is not expected to live that long.
#[derive(Default)]
pub(crate) struct ConnIdAllocator {
    next: AtomicU32,
}

impl ConnIdAllocator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn next(&self) -> ConnId {
        self.next.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }
}

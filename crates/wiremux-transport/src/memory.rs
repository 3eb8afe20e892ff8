//! In-memory tunnel pair
//!
//! Two [`Tunnel`] halves joined by bounded channels. Used by the bridge
//! tests and by demos that run both ends of a tunnel in one process.
//! Closing either half kills the whole tunnel: pending and future reads
//! and writes on both halves fail with [`TransportError::Closed`],
//! mirroring how a closed network transport fails its peer.

use crate::{Tunnel, TransportError, TransportResult};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// One half of an in-memory tunnel.
pub struct MemoryTunnel {
    tx: mpsc::Sender<Bytes>,
    rx: Mutex<mpsc::Receiver<Bytes>>,
    // Shared by both halves; cancelled on first close.
    closed: CancellationToken,
}

/// Create a connected pair of in-memory tunnels with the given
/// per-direction channel capacity.
pub fn tunnel_pair(capacity: usize) -> (MemoryTunnel, MemoryTunnel) {
    let (a_tx, b_rx) = mpsc::channel(capacity);
    let (b_tx, a_rx) = mpsc::channel(capacity);
    let closed = CancellationToken::new();

    let a = MemoryTunnel {
        tx: a_tx,
        rx: Mutex::new(a_rx),
        closed: closed.clone(),
    };
    let b = MemoryTunnel {
        tx: b_tx,
        rx: Mutex::new(b_rx),
        closed,
    };
    (a, b)
}

impl MemoryTunnel {
    /// Whether either half has closed the tunnel.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[async_trait]
impl Tunnel for MemoryTunnel {
    async fn write_message(&self, msg: &[u8]) -> TransportResult<()> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        tokio::select! {
            _ = self.closed.cancelled() => Err(TransportError::Closed),
            res = self.tx.send(Bytes::copy_from_slice(msg)) => {
                res.map_err(|_| TransportError::Closed)
            }
        }
    }

    async fn read_message(&self) -> TransportResult<Bytes> {
        let mut rx = tokio::select! {
            _ = self.closed.cancelled() => return Err(TransportError::Closed),
            guard = self.rx.lock() => guard,
        };
        tokio::select! {
            _ = self.closed.cancelled() => Err(TransportError::Closed),
            msg = rx.recv() => msg.ok_or(TransportError::Closed),
        }
    }

    async fn close(&self) -> TransportResult<()> {
        self.closed.cancel();
        Ok(())
    }
}

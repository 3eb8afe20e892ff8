//! Transport boundary for the wiremux bridge
//!
//! The bridge consumes an already-established, authenticated transport as
//! an opaque message-oriented channel. This crate defines that boundary
//! plus the key-store boundary consumed at tunnel-establishment time, and
//! ships an in-memory tunnel pair for tests and demos.

pub mod keys;
pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use keys::{KeyStore, MemoryKeyStore};
pub use memory::{tunnel_pair, MemoryTunnel};

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("tunnel closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// A pre-established, authenticated, message-oriented transport.
///
/// The transport delivers whole messages reliably and in the order they
/// were written; the bridge builds no reliability of its own on top.
/// Writes from multiple tasks must be serialized by the caller, and
/// exactly one task may read.
#[async_trait]
pub trait Tunnel: Send + Sync {
    /// Send one complete frame.
    async fn write_message(&self, msg: &[u8]) -> TransportResult<()>;

    /// Block until one complete frame arrives.
    async fn read_message(&self) -> TransportResult<Bytes>;

    /// Close the tunnel, failing pending reads and writes on both ends.
    /// Safe to call more than once.
    async fn close(&self) -> TransportResult<()>;
}

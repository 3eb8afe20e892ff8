//! Wiremux Protocol Definitions
//!
//! Wire format for the multiplexed tunnel: fixed 5-byte header (1 byte
//! frame kind + 4 bytes connection id, big-endian) followed by a
//! kind-specific payload. Frames are self-delimited by the transport, so
//! no length field is carried here.

pub mod frame;

pub use frame::{ConnId, FrameError, FrameKind, HEADER_LEN};

//! Frame encoding/decoding for the multiplexed tunnel
//!
//! Encoders write the header at offset 0 and the payload starting at
//! [`HEADER_LEN`] into a caller-supplied buffer and return the total
//! length used, so a forwarding loop can reuse one buffer for every
//! frame it sends. Decoders borrow the payload from the received frame;
//! copy it if it must outlive the frame buffer.

use thiserror::Error;

/// Connection id identifying one multiplexed stream within a bridge.
pub type ConnId = u32;

/// Header length: 1 byte kind + 4 bytes connection id (big-endian).
pub const HEADER_LEN: usize = 1 + 4;

/// Frame kinds carried over the tunnel.
///
/// Values 0 and 1 are service signals owned by the tunnel establishment
/// layer; the bridge ignores them. TCP proxy frames start at 50.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Tunnel-level keep-alive, outside the bridge core.
    KeepAlive = 0,
    /// Tunnel-level close signal, outside the bridge core.
    Shutdown = 1,
    /// Open a stream to the UTF-8 "host:port" destination in the payload.
    Open = 50,
    /// Close a stream. Empty payload.
    Close = 51,
    /// Raw application bytes for a stream.
    Data = 52,
    /// Dial for a previously requested Open failed; payload is the
    /// UTF-8 error message.
    DialError = 53,
    /// Dial succeeded; payload is the UTF-8 bound local address.
    DialSuccess = 54,
}

impl FrameKind {
    /// Map a raw kind byte to a known frame kind.
    ///
    /// Returns `None` for unrecognized values so callers can log and
    /// skip instead of failing; the header and payload of such frames
    /// still decode cleanly.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(FrameKind::KeepAlive),
            1 => Some(FrameKind::Shutdown),
            50 => Some(FrameKind::Open),
            51 => Some(FrameKind::Close),
            52 => Some(FrameKind::Data),
            53 => Some(FrameKind::DialError),
            54 => Some(FrameKind::DialSuccess),
            _ => None,
        }
    }
}

/// Frame decoding errors
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame truncated: {0} bytes, header needs {HEADER_LEN}")]
    Truncated(usize),

    #[error("payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

/// Write the frame kind at offset 0.
///
/// Panics if `dst` is shorter than [`HEADER_LEN`].
pub fn set_kind(dst: &mut [u8], kind: FrameKind) {
    dst[0] = kind as u8;
}

/// Write the connection id, big-endian, at offset 1.
///
/// Panics if `dst` is shorter than [`HEADER_LEN`].
pub fn set_cid(dst: &mut [u8], cid: ConnId) {
    dst[1..HEADER_LEN].copy_from_slice(&cid.to_be_bytes());
}

/// Decode the header of a received frame into `(raw kind, cid)`.
///
/// The kind is returned raw so unrecognized values pass through.
pub fn decode_header(frame: &[u8]) -> Result<(u8, ConnId), FrameError> {
    if frame.len() < HEADER_LEN {
        return Err(FrameError::Truncated(frame.len()));
    }
    let mut cid = [0u8; 4];
    cid.copy_from_slice(&frame[1..HEADER_LEN]);
    Ok((frame[0], u32::from_be_bytes(cid)))
}

fn encode(kind: FrameKind, cid: ConnId, payload: &[u8], dst: &mut [u8]) -> usize {
    set_kind(dst, kind);
    set_cid(dst, cid);
    dst[HEADER_LEN..HEADER_LEN + payload.len()].copy_from_slice(payload);
    HEADER_LEN + payload.len()
}

fn payload(frame: &[u8]) -> Result<(ConnId, &[u8]), FrameError> {
    let (_, cid) = decode_header(frame)?;
    Ok((cid, &frame[HEADER_LEN..]))
}

/// Encode an Open frame requesting a dial to `target`.
///
/// Panics if `dst` is shorter than `HEADER_LEN + target.len()`.
pub fn encode_open(cid: ConnId, target: &str, dst: &mut [u8]) -> usize {
    encode(FrameKind::Open, cid, target.as_bytes(), dst)
}

/// Decode an Open frame into `(cid, destination "host:port")`.
pub fn decode_open(frame: &[u8]) -> Result<(ConnId, &str), FrameError> {
    let (cid, payload) = payload(frame)?;
    Ok((cid, std::str::from_utf8(payload)?))
}

/// Encode a Close frame. Always [`HEADER_LEN`] bytes.
pub fn encode_close(cid: ConnId, dst: &mut [u8]) -> usize {
    set_kind(dst, FrameKind::Close);
    set_cid(dst, cid);
    HEADER_LEN
}

/// Decode a Close frame into its connection id.
pub fn decode_close(frame: &[u8]) -> Result<ConnId, FrameError> {
    decode_header(frame).map(|(_, cid)| cid)
}

/// Write a Data header in place, leaving the payload region untouched.
///
/// The forwarding loop reads stream bytes directly into
/// `dst[HEADER_LEN..]` and then stamps the header with this, avoiding a
/// payload copy per frame.
pub fn set_data_header(cid: ConnId, dst: &mut [u8]) {
    set_kind(dst, FrameKind::Data);
    set_cid(dst, cid);
}

/// Encode a Data frame from an already-assembled payload.
pub fn encode_data(cid: ConnId, data: &[u8], dst: &mut [u8]) -> usize {
    encode(FrameKind::Data, cid, data, dst)
}

/// Decode a Data frame into `(cid, payload view)`.
pub fn decode_data(frame: &[u8]) -> Result<(ConnId, &[u8]), FrameError> {
    payload(frame)
}

/// Encode a DialError frame carrying the dial failure message.
pub fn encode_dial_error(cid: ConnId, message: &str, dst: &mut [u8]) -> usize {
    encode(FrameKind::DialError, cid, message.as_bytes(), dst)
}

/// Decode a DialError frame into `(cid, error message)`.
pub fn decode_dial_error(frame: &[u8]) -> Result<(ConnId, &str), FrameError> {
    let (cid, payload) = payload(frame)?;
    Ok((cid, std::str::from_utf8(payload)?))
}

/// Encode a DialSuccess frame carrying the bound local address.
pub fn encode_dial_success(cid: ConnId, bound_addr: &str, dst: &mut [u8]) -> usize {
    encode(FrameKind::DialSuccess, cid, bound_addr.as_bytes(), dst)
}

/// Decode a DialSuccess frame into `(cid, bound address)`.
pub fn decode_dial_success(frame: &[u8]) -> Result<(ConnId, &str), FrameError> {
    let (cid, payload) = payload(frame)?;
    Ok((cid, std::str::from_utf8(payload)?))
}

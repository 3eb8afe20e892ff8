//! Bridge: multiplexes independent TCP byte-streams over one tunnel
//!
//! One bridge owns one tunnel, the connection registry, and the id
//! allocator. Locally-accepted connections become Open frames sent to
//! the peer; Open frames received from the peer become real outbound
//! TCP dials. Bytes flow in both directions as Data frames. A failure
//! on one proxied stream is scoped to its connection id; any tunnel
//! read or write failure poisons the whole bridge, because ordering and
//! identity guarantees for every other stream ride on that one channel.

use crate::registry::{BoxedStream, ConnEntry, ConnIdAllocator, ConnRegistry, StreamDuplex};
use crate::reply::{DialOutcome, DialReplySender};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::OnceLock;
use tokio::io::{AsyncReadExt, ReadHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use wiremux_proto::{frame, ConnId, FrameKind, HEADER_LEN};
use wiremux_transport::{Tunnel, TransportError, TransportResult};

/// Payload capacity of the reusable forwarding buffer.
const IO_BUF_LEN: usize = 16 * 1024;

/// A multiplexer instance bound to one tunnel.
pub struct Bridge {
    tunnel: Arc<dyn Tunnel>,

    // All forwarding tasks and the Open handlers write concurrently;
    // the tunnel only promises atomic messages for serialized writers.
    write_lock: Mutex<()>,

    registry: ConnRegistry,
    ids: ConnIdAllocator,

    // Fires once on teardown; checked at the top of every dispatch
    // iteration and watched by every forwarding loop.
    lifetime: CancellationToken,

    // First error that tore the bridge down, set exactly once.
    cause: OnceLock<TransportError>,
}

impl Bridge {
    /// Wrap an established tunnel and start the dispatch loop.
    ///
    /// `shutdown` bounds the bridge's lifetime: cancelling it tears the
    /// bridge down at the next dispatch iteration. The bridge becomes
    /// the tunnel's sole reader.
    pub fn open(tunnel: Arc<dyn Tunnel>, shutdown: CancellationToken) -> Arc<Self> {
        let bridge = Arc::new(Self {
            tunnel,
            write_lock: Mutex::new(()),
            registry: ConnRegistry::new(),
            ids: ConnIdAllocator::new(),
            lifetime: shutdown,
            cause: OnceLock::new(),
        });

        tokio::spawn(Arc::clone(&bridge).serve_tunnel());

        bridge
    }

    /// Whether the bridge has been torn down.
    pub fn is_closed(&self) -> bool {
        self.lifetime.is_cancelled()
    }

    /// The first tunnel error that caused teardown, if teardown was not
    /// a clean shutdown.
    pub fn fault(&self) -> Option<&TransportError> {
        self.cause.get()
    }

    /// Number of currently registered streams.
    pub fn active_conns(&self) -> usize {
        self.registry.len()
    }

    /// Tear the bridge down: fire the lifetime token, close the tunnel
    /// and close every registered stream. Idempotent, and safe to call
    /// from racing failure detectors.
    pub async fn close(&self) {
        self.lifetime.cancel();
        let _ = self.tunnel.close().await;
        for (cid, entry) in self.registry.drain() {
            debug!("closing stream {} during teardown", cid);
            entry.close().await;
        }
    }

    /// Record the teardown cause (first writer wins) and tear down.
    async fn fail(&self, err: TransportError) {
        let _ = self.cause.set(err);
        self.close().await;
    }

    async fn tun_write(&self, msg: &[u8]) -> TransportResult<()> {
        let _guard = self.write_lock.lock().await;
        self.tunnel.write_message(msg).await
    }

    /// Entry point for the front-end proxy: forward one accepted local
    /// connection to `target_addr` on the peer's side.
    ///
    /// Sends the Open frame and then pumps the stream until it
    /// terminates, so the caller's task is occupied for the lifetime of
    /// the connection. The dial outcome is delivered on `reply` once
    /// the peer reports it.
    pub async fn handle_conn<S>(&self, stream: S, target_addr: &str, reply: DialReplySender)
    where
        S: StreamDuplex + 'static,
    {
        let cid = self.ids.next();
        let (reader, writer) = tokio::io::split(Box::new(stream) as BoxedStream);
        let entry = Arc::new(ConnEntry::new(writer, Some(reply)));
        self.registry.store(cid, entry.clone());

        info!("forwarding local connection to {} as stream {}", target_addr, cid);

        let mut buf = vec![0u8; HEADER_LEN + target_addr.len()];
        let len = frame::encode_open(cid, target_addr, &mut buf);
        if let Err(e) = self.tun_write(&buf[..len]).await {
            error!("failed to send Open frame for stream {}: {}", cid, e);
            self.fail(e).await;
            return;
        }

        // Forwarding starts before the peer's dial result arrives; Data
        // frames sent early are delivered once the peer has registered
        // the dialed stream, which transport ordering guarantees happens
        // after it processed our Open.
        self.serve_conn(reader, &entry, cid).await;
        self.registry.remove(cid);
    }

    /// Per-stream forwarding loop: local reads become Data frames.
    ///
    /// Returns when the stream terminates. EOF and local read errors
    /// are scoped to this stream and announced with one Close frame;
    /// tunnel write failures are fatal to the whole bridge.
    async fn serve_conn(&self, mut reader: ReadHalf<BoxedStream>, entry: &ConnEntry, cid: ConnId) {
        let mut buf = vec![0u8; HEADER_LEN + IO_BUF_LEN];
        loop {
            let read = tokio::select! {
                _ = entry.closed() => None,
                res = reader.read(&mut buf[HEADER_LEN..]) => Some(res),
            };

            let res = match read {
                Some(res) => res,
                None => {
                    // Closed from the dispatch side: a peer Close frame,
                    // a failed local write, or bridge teardown. During
                    // teardown the tunnel is already gone, so stay quiet.
                    if !self.lifetime.is_cancelled() {
                        self.send_close(cid, &mut buf).await;
                    }
                    return;
                }
            };

            match res {
                Ok(0) => {
                    debug!("stream {} reached EOF", cid);
                    entry.close().await;
                    self.send_close(cid, &mut buf).await;
                    return;
                }
                Ok(n) => {
                    frame::set_data_header(cid, &mut buf);
                    if let Err(e) = self.tun_write(&buf[..HEADER_LEN + n]).await {
                        error!("failed to send Data frame for stream {}: {}", cid, e);
                        self.fail(e).await;
                        return;
                    }
                }
                Err(e) => {
                    warn!("failed to read from stream {}: {}", cid, e);
                    entry.close().await;
                    self.send_close(cid, &mut buf).await;
                    return;
                }
            }
        }
    }

    async fn send_close(&self, cid: ConnId, buf: &mut [u8]) {
        let len = frame::encode_close(cid, buf);
        if let Err(e) = self.tun_write(&buf[..len]).await {
            error!("failed to send Close frame for stream {}: {}", cid, e);
            self.fail(e).await;
        }
    }

    /// Dispatch loop: the sole reader of the tunnel. Decodes each frame
    /// and routes it; any tunnel read failure is fatal.
    async fn serve_tunnel(self: Arc<Self>) {
        loop {
            if self.lifetime.is_cancelled() {
                warn!("bridge shutdown requested, closing tunnel");
                self.close().await;
                return;
            }

            let msg = match self.tunnel.read_message().await {
                Ok(msg) => msg,
                Err(e) => {
                    error!("failed to read from tunnel: {}", e);
                    self.fail(e).await;
                    return;
                }
            };

            let (raw_kind, cid) = match frame::decode_header(&msg) {
                Ok(header) => header,
                Err(e) => {
                    warn!("discarding malformed frame: {}", e);
                    continue;
                }
            };

            match FrameKind::from_u8(raw_kind) {
                Some(FrameKind::Open) => match frame::decode_open(&msg) {
                    Ok((cid, target)) => {
                        // One slow dial must not stall frames for other
                        // streams, so each Open gets its own task.
                        let target = target.to_string();
                        let bridge = Arc::clone(&self);
                        tokio::spawn(bridge.handle_open(cid, target));
                    }
                    Err(e) => {
                        warn!("discarding malformed Open frame for stream {}: {}", cid, e)
                    }
                },

                Some(FrameKind::Close) => {
                    if let Some(entry) = self.registry.remove(cid) {
                        debug!("peer closed stream {}", cid);
                        entry.close().await;
                    }
                    // Absent id: the stream already terminated locally.
                }

                Some(FrameKind::Data) => {
                    let payload = &msg[HEADER_LEN..];
                    if let Some(entry) = self.registry.load(cid) {
                        if let Err(e) = entry.write(payload).await {
                            error!("failed to write to stream {}: {}", cid, e);
                            // Closing here wakes the stream's forwarding
                            // loop, which sends the Close frame; the
                            // notification always comes from the side
                            // that observed the failure.
                            self.registry.remove(cid);
                            entry.close().await;
                        }
                    } else {
                        warn!("no registered stream {} for Data frame", cid);
                    }
                }

                Some(FrameKind::DialSuccess) => match frame::decode_dial_success(&msg) {
                    Ok((cid, addr)) => {
                        if let Some(entry) = self.registry.load(cid) {
                            match addr.parse::<SocketAddr>() {
                                Ok(bound_addr) => {
                                    debug!("peer dialed stream {} from {}", cid, bound_addr);
                                    entry.deliver_reply(DialOutcome::Success { bound_addr });
                                }
                                Err(_) => warn!(
                                    "unparseable bound address {:?} in DialSuccess for stream {}",
                                    addr, cid
                                ),
                            }
                        }
                    }
                    Err(e) => warn!(
                        "discarding malformed DialSuccess frame for stream {}: {}",
                        cid, e
                    ),
                },

                Some(FrameKind::DialError) => match frame::decode_dial_error(&msg) {
                    Ok((cid, message)) => {
                        if let Some(entry) = self.registry.remove(cid) {
                            warn!("peer failed to dial for stream {}: {}", cid, message);
                            entry.deliver_reply(DialOutcome::from_error_text(message));
                            entry.close().await;
                        }
                    }
                    Err(e) => warn!(
                        "discarding malformed DialError frame for stream {}: {}",
                        cid, e
                    ),
                },

                Some(FrameKind::KeepAlive) | Some(FrameKind::Shutdown) => {
                    // Service signaling belongs to the tunnel
                    // establishment layer, not the bridge.
                    debug!("ignoring service frame kind {}", raw_kind);
                }

                None => warn!("unknown frame kind {}, ignoring", raw_kind),
            }
        }
    }

    /// Handle a peer Open request: dial the destination and forward.
    async fn handle_open(self: Arc<Self>, cid: ConnId, target: String) {
        let stream = match TcpStream::connect(&target).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("failed to dial {} for stream {}: {}", target, cid, e);
                self.send_dial_error(cid, &e.to_string()).await;
                return;
            }
        };

        let bound_addr = match stream.local_addr() {
            Ok(addr) => addr.to_string(),
            Err(e) => {
                warn!("no local address for dialed stream {}: {}", cid, e);
                self.send_dial_error(cid, &e.to_string()).await;
                return;
            }
        };

        info!("dialed {} for stream {}", target, cid);

        let (reader, writer) = tokio::io::split(Box::new(stream) as BoxedStream);
        let entry = Arc::new(ConnEntry::new(writer, None));
        self.registry.store(cid, entry.clone());

        let mut buf = vec![0u8; HEADER_LEN + bound_addr.len()];
        let len = frame::encode_dial_success(cid, &bound_addr, &mut buf);
        if let Err(e) = self.tun_write(&buf[..len]).await {
            error!("failed to send DialSuccess frame for stream {}: {}", cid, e);
            self.fail(e).await;
            return;
        }

        self.serve_conn(reader, &entry, cid).await;
        self.registry.remove(cid);
    }

    async fn send_dial_error(&self, cid: ConnId, message: &str) {
        let mut buf = vec![0u8; HEADER_LEN + message.len()];
        let len = frame::encode_dial_error(cid, message, &mut buf);
        if let Err(e) = self.tun_write(&buf[..len]).await {
            error!("failed to send DialError frame for stream {}: {}", cid, e);
            self.fail(e).await;
        }
    }
}

//! Listener: owns the connectionless socket, reads datagrams, dispatches parsing, and exposes an
//! output stream of decoded payloads and errors.

use std::io::{self, Read};
use std::mem::MaybeUninit;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{SystemTime, UNIX_EPOCH};

use flate2::read::{GzDecoder, ZlibDecoder};
use sha1::{Digest, Sha1};
use tokio::io::unix::AsyncFd;
use tokio::net::{UdpSocket, UnixDatagram};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, trace};

use crate::defaults;
use crate::net::error::{CorrelationId, FatalError, RecoverableError};
use crate::net::host::{ListenAddress, ListenTransport};
use crate::net::reassembly::{ChunkOutcome, Reassembler};

/// Output of the listener: the pipeline driver's single consumer loop reads these off `Done`.
pub enum Done {
    /// A fully decoded GELF body, tagged with the correlation id of the datagram (or, for a
    /// reassembled chunk set, of whichever chunk happened to complete it) that produced it.
    Payload { id: CorrelationId, body: Vec<u8> },
    /// A recoverable, per-message failure: logged by the driver, never fatal.
    Error(RecoverableError),
    /// The socket could not be bound; the driver that receives this terminates the process.
    Fatal(FatalError),
}

enum Socket {
    Udp(UdpSocket),
    Unix(UnixDatagram),
    Raw(AsyncFd<socket2::Socket>),
}

impl Socket {
    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Socket::Udp(socket) => socket.recv(buf).await,
            Socket::Unix(socket) => socket.recv(buf).await,
            Socket::Raw(fd) => loop {
                let mut guard = fd.readable().await?;
                // SAFETY: `MaybeUninit<u8>` has the same layout as `u8`; `Socket::recv` only
                // ever writes into the slice, so reading back the initialized prefix is sound.
                let uninit: &mut [MaybeUninit<u8>] = unsafe {
                    std::slice::from_raw_parts_mut(buf.as_mut_ptr().cast(), buf.len())
                };
                match guard.try_io(|inner| inner.get_ref().recv(uninit)) {
                    Ok(result) => return result,
                    Err(_would_block) => continue,
                }
            },
        }
    }
}

/// Per-listener buffer pool used for decompression scratch space (the `sync.Pool` analog). Read
/// buffers themselves are allocated fresh per datagram rather than pooled, since they're handed
/// off to their own per-datagram parse task.
struct BufferPool {
    buffers: StdMutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    fn new() -> Self {
        BufferPool {
            buffers: StdMutex::new(Vec::new()),
        }
    }

    fn checkout(&self) -> Vec<u8> {
        self.buffers
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(defaults::read_buffer_size()))
    }

    fn checkin(&self, mut buf: Vec<u8>) {
        buf.clear();
        self.buffers.lock().unwrap().push(buf);
    }
}

pub struct Listener {
    address: ListenAddress,
    socket: Mutex<Option<Arc<Socket>>>,
    shutdown: watch::Sender<bool>,
    reassembler: Arc<Reassembler>,
    buffer_pool: BufferPool,
}

impl Listener {
    pub fn new(address: ListenAddress) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Listener {
            address,
            socket: Mutex::new(None),
            shutdown,
            reassembler: Arc::new(Reassembler::new()),
            buffer_pool: BufferPool::new(),
        })
    }

    async fn bind(&self) -> Result<Arc<Socket>, FatalError> {
        let mut guard = self.socket.lock().await;
        if let Some(socket) = guard.as_ref() {
            return Ok(socket.clone());
        }
        let socket = Arc::new(bind_socket(&self.address).await?);
        *guard = Some(socket.clone());
        Ok(socket)
    }

    /// Bind (once) and loop reading datagrams until the socket errors fatally or [`Listener::close`]
    /// is called. Each datagram is dispatched to its own task; `done` receives every decoded
    /// payload, recoverable error, and (at most once) a fatal error.
    pub async fn listen(self: Arc<Self>, done: mpsc::Sender<Done>) {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            return;
        }

        let socket = match self.bind().await {
            Ok(socket) => socket,
            Err(fatal) => {
                let _ = done.send(Done::Fatal(fatal)).await;
                return;
            }
        };

        let sweeper = self.reassembler.clone();
        tokio::spawn(sweeper.run_sweeper());

        loop {
            let mut buf = vec![0u8; defaults::read_buffer_size()];
            let n = tokio::select! {
                result = socket.recv(&mut buf) => match result {
                    Ok(n) => n,
                    Err(err) => {
                        error!(%err, "listener read failed");
                        continue;
                    }
                },
                _ = shutdown.changed() => break,
            };
            buf.truncate(n);

            let reassembler = self.reassembler.clone();
            let done = done.clone();
            tokio::spawn(async move {
                parse(buf, reassembler, done).await;
            });
        }
    }

    /// Close the socket (if one was ever bound) and wake any `listen` loop parked on it.
    /// Idempotent: sending `true` to an already-closed watch, or taking an already-empty socket
    /// slot, are both no-ops.
    pub async fn close(&self) {
        let _ = self.shutdown.send(true);
        if self.socket.lock().await.take().is_some() {
            debug!(%self.address, "listener closed");
        }
    }
}

async fn bind_socket(address: &ListenAddress) -> Result<Socket, FatalError> {
    let authority = address.authority();
    match address.transport() {
        ListenTransport::Udp | ListenTransport::Udp4 | ListenTransport::Udp6 => {
            let socket = UdpSocket::bind(authority).await.map_err(|source| FatalError::Bind {
                address: authority.to_string(),
                source,
            })?;
            Ok(Socket::Udp(socket))
        }
        ListenTransport::Unixgram => {
            let _ = std::fs::remove_file(authority);
            let socket =
                UnixDatagram::bind(authority).map_err(|source| FatalError::Bind {
                    address: authority.to_string(),
                    source,
                })?;
            Ok(Socket::Unix(socket))
        }
        ListenTransport::RawIp { version, protocol } => {
            let proto_num: i32 = protocol.parse().unwrap_or(0);
            let domain = match version {
                Some(6) => socket2::Domain::IPV6,
                _ => socket2::Domain::IPV4,
            };
            let socket = socket2::Socket::new(
                domain,
                socket2::Type::RAW,
                Some(socket2::Protocol::from(proto_num)),
            )
            .map_err(|source| FatalError::Bind {
                address: authority.to_string(),
                source,
            })?;
            let bind_addr: SocketAddr = format!("{}:0", authority)
                .parse()
                .unwrap_or_else(|_| "0.0.0.0:0".parse().unwrap());
            socket
                .bind(&bind_addr.into())
                .map_err(|source| FatalError::Bind {
                    address: authority.to_string(),
                    source,
                })?;
            socket.set_nonblocking(true).map_err(|source| FatalError::Bind {
                address: authority.to_string(),
                source,
            })?;
            let fd = AsyncFd::new(socket).map_err(|source| FatalError::Bind {
                address: authority.to_string(),
                source,
            })?;
            Ok(Socket::Raw(fd))
        }
    }
}

/// Inspect the first two bytes of a datagram and dispatch accordingly. Always computes the
/// correlation id, unconditionally, even for a full-buffer read.
async fn parse(buf: Vec<u8>, reassembler: Arc<Reassembler>, done: mpsc::Sender<Done>) {
    let id = correlation_id(&buf);

    match buf.get(0..2) {
        Some([0x1e, 0x0f]) => handle_chunk(buf, id, reassembler, done).await,
        Some([0x1f, 0x8b]) => {
            emit_decompressed(GzDecoder::new(&buf[..]), id, done).await;
        }
        Some([0x78, 0xe5]) | Some([0x78, 0x9c]) | Some([0x78, 0xda]) => {
            emit_decompressed(ZlibDecoder::new(&buf[..]), id, done).await;
        }
        _ => {
            trace!(%id, len = buf.len(), "raw payload");
            let _ = done.send(Done::Payload { id, body: buf }).await;
        }
    }
}

async fn emit_decompressed<R: Read>(mut decoder: R, id: CorrelationId, done: mpsc::Sender<Done>) {
    let mut decoded = Vec::new();
    match decoder.read_to_end(&mut decoded) {
        Ok(_) => {
            let _ = done.send(Done::Payload { id, body: decoded }).await;
        }
        Err(source) => {
            let _ = done
                .send(Done::Error(RecoverableError::Decompress { id, source }))
                .await;
        }
    }
}

async fn handle_chunk(
    buf: Vec<u8>,
    sid: CorrelationId,
    reassembler: Arc<Reassembler>,
    done: mpsc::Sender<Done>,
) {
    if buf.len() < 12 {
        debug!(%sid, "chunk header shorter than 12 bytes, dropping");
        return;
    }
    let mut message_id = [0u8; 8];
    message_id.copy_from_slice(&buf[2..10]);
    let index = buf[10];
    let count = buf[11];
    let body = buf[12..].to_vec();

    match reassembler.accept(message_id, index, count, body, sid).await {
        Some(ChunkOutcome::Complete(merged)) => {
            let _ = done.send(Done::Payload { id: sid, body: merged }).await;
        }
        Some(ChunkOutcome::Pending) | None => {}
    }
}

/// SHA-1(arrival-time ‖ datagram bytes), truncated to 8 bytes. The design fixes a bug present in
/// the source, which only computed this when the read was strictly shorter than the buffer,
/// leaving full-buffer reads with an all-zero id; here it runs unconditionally.
fn correlation_id(buf: &[u8]) -> CorrelationId {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let mut hasher = Sha1::new();
    hasher.update(&nanos.to_be_bytes());
    hasher.update(buf);
    let digest = hasher.finalize();
    let mut id = [0u8; 8];
    id.copy_from_slice(&digest[..8]);
    CorrelationId(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_id_is_deterministic_given_same_time_bucket() {
        // Two calls a few nanoseconds apart will differ because the clock advances, which is
        // expected: the point of the fix is that it is never all-zero, unlike the source's
        // buffer-truncation bug.
        let id = correlation_id(b"hello");
        assert_ne!(id.0, [0u8; 8]);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_stops_the_listen_loop() {
        let address: ListenAddress = "udp://127.0.0.1:0".parse().unwrap();
        let listener = Listener::new(address);
        let (done_tx, _done_rx) = mpsc::channel(4);
        let handle = tokio::spawn(listener.clone().listen(done_tx));

        // Give the loop a moment to bind and park in its read.
        tokio::task::yield_now().await;

        listener.close().await;
        listener.close().await;

        handle.await.unwrap();
    }

    #[tokio::test]
    async fn close_before_listen_has_bound_is_a_no_op() {
        let address: ListenAddress = "udp://127.0.0.1:0".parse().unwrap();
        let listener = Listener::new(address);
        listener.close().await;
    }
}

//! Newline-delimited JSON channel over TCP.
//!
//! One request frame per line (`{"id", "type", "params"}`), one reply frame
//! per line (`{"id", "result"}`). The connection is opened lazily on the
//! first send and reopened on the next send after it drops. A reader task
//! routes each reply to the request with the same id; when the connection
//! ends, every request still waiting on it fails with a post-send
//! connection error.
//!
//! Once any byte of a request may have reached the peer, failures are
//! reported as post-send. A write abandoned halfway (the caller's deadline
//! expired) leaves the stream unusable, so the next send reconnects.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::{PeerChannel, PendingReply, WireReply, WireRequest};
use crate::error::{BridgeError, BridgeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelOptions {
    pub connect_timeout: Duration,
    pub max_frame_bytes: usize,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(3000),
            max_frame_bytes: 16 * 1024 * 1024,
        }
    }
}

type ReplySender = oneshot::Sender<BridgeResult<Value>>;

/// Requests awaiting a reply, keyed by correlation id. Each entry remembers
/// the connection generation it was written to.
type PendingMap = Arc<Mutex<HashMap<u64, (u64, ReplySender)>>>;

struct Link {
    writer: OwnedWriteHalf,
    generation: u64,
    open: Arc<AtomicBool>,
    /// False while a frame is partly written.
    intact: bool,
}

impl Link {
    fn usable(&self) -> bool {
        self.intact && self.open.load(Ordering::Acquire)
    }
}

pub struct TcpChannel {
    addr: String,
    options: ChannelOptions,
    link: tokio::sync::Mutex<Option<Link>>,
    pending: PendingMap,
    generation: AtomicU64,
}

impl TcpChannel {
    pub fn new(addr: impl Into<String>, options: ChannelOptions) -> Self {
        Self {
            addr: addr.into(),
            options,
            link: tokio::sync::Mutex::new(None),
            pending: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    async fn connect(&self) -> BridgeResult<Link> {
        let stream = tokio::time::timeout(
            self.options.connect_timeout,
            TcpStream::connect(&self.addr),
        )
        .await
        .map_err(|_| {
            BridgeError::connection(
                format!(
                    "connect to {} timed out after {}ms",
                    self.addr,
                    self.options.connect_timeout.as_millis()
                ),
                false,
            )
        })?
        .map_err(|e| BridgeError::connection(format!("connect to {}: {}", self.addr, e), false))?;
        let _ = stream.set_nodelay(true);

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let open = Arc::new(AtomicBool::new(true));
        let (reader, writer) = stream.into_split();

        tokio::spawn(read_loop(
            reader,
            self.pending.clone(),
            open.clone(),
            generation,
            self.options.max_frame_bytes,
            self.addr.clone(),
        ));

        info!(peer = %self.addr, generation, "Connected to instance");
        Ok(Link {
            writer,
            generation,
            open,
            intact: true,
        })
    }

    /// Make sure `slot` holds a usable link, reconnecting if needed.
    async fn ensure_link<'a>(&self, slot: &'a mut Option<Link>) -> BridgeResult<&'a mut Link> {
        if !slot.as_ref().is_some_and(Link::usable) {
            if slot.is_some() {
                debug!(peer = %self.addr, "Connection dropped, reconnecting");
            }
            *slot = None;
            *slot = Some(self.connect().await?);
        }
        slot.as_mut()
            .ok_or_else(|| BridgeError::connection("no connection", false))
    }
}

#[async_trait]
impl PeerChannel for TcpChannel {
    fn describe(&self) -> String {
        self.addr.clone()
    }

    async fn send(&self, request: WireRequest) -> BridgeResult<PendingReply> {
        let mut frame = serde_json::to_vec(&request).map_err(|e| {
            BridgeError::type_mismatch("params", format!("cannot encode request: {}", e))
        })?;
        if frame.len() > self.options.max_frame_bytes {
            return Err(BridgeError::type_mismatch(
                "params",
                format!(
                    "request of {} bytes exceeds the {} byte frame limit",
                    frame.len(),
                    self.options.max_frame_bytes
                ),
            ));
        }
        frame.push(b'\n');

        let mut guard = self.link.lock().await;
        let link = self.ensure_link(&mut guard).await?;

        let id = request.id;
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = lock(&self.pending);
            if pending.contains_key(&id) {
                return Err(BridgeError::connection(
                    format!("request id {} is already in flight", id),
                    false,
                ));
            }
            // Registered before writing so a fast reply is never missed.
            pending.insert(id, (link.generation, tx));
        }
        // Built before writing so the entry is removed however this returns.
        let cleanup = self.pending.clone();
        let reply = PendingReply::new(rx).on_drop(move || {
            lock(&cleanup).remove(&id);
        });

        link.intact = false;
        if let Err(e) = write_frame(&mut link.writer, &frame, &self.addr).await {
            link.open.store(false, Ordering::Release);
            *guard = None;
            return Err(e);
        }
        link.intact = true;
        debug!(peer = %self.addr, request_id = id, bytes = frame.len(), "Request written");

        Ok(reply)
    }

    async fn probe(&self) -> BridgeResult<()> {
        let mut guard = self.link.lock().await;
        self.ensure_link(&mut guard).await.map(|_| ())
    }
}

/// Write one frame. Any failure here is post-send: part of the frame may
/// already be with the peer.
async fn write_frame<W>(writer: &mut W, frame: &[u8], peer: &str) -> BridgeResult<()>
where
    W: AsyncWrite + Unpin,
{
    let written = async {
        writer.write_all(frame).await?;
        writer.flush().await
    }
    .await;
    written.map_err(|e| BridgeError::connection(format!("write to {}: {}", peer, e), true))
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn read_loop(
    reader: OwnedReadHalf,
    pending: PendingMap,
    open: Arc<AtomicBool>,
    generation: u64,
    max_frame_bytes: usize,
    peer: String,
) {
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    let reason = loop {
        line.clear();
        let limit = max_frame_bytes as u64 + 1;
        let read = (&mut reader).take(limit).read_until(b'\n', &mut line).await;
        match read {
            Ok(0) => break "connection closed by instance".to_string(),
            Ok(_) => {}
            Err(e) => break format!("read error: {}", e),
        }

        if line.last() != Some(&b'\n') && line.len() > max_frame_bytes {
            break format!("reply frame exceeds the {} byte limit", max_frame_bytes);
        }

        let frame = trim_line(&line);
        if frame.is_empty() {
            continue;
        }

        let reply: WireReply = match serde_json::from_slice(frame) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(peer = %peer, error = %e, "Discarding malformed reply frame");
                continue;
            }
        };

        let waiter = lock(&pending).remove(&reply.id);
        match waiter {
            Some((_, tx)) => {
                if tx.send(Ok(reply.result)).is_err() {
                    debug!(peer = %peer, request_id = reply.id, "Reply arrived after caller gave up");
                }
            }
            None => {
                debug!(peer = %peer, request_id = reply.id, "Discarding reply for unknown request");
            }
        }
    };

    open.store(false, Ordering::Release);
    info!(peer = %peer, generation, reason = %reason, "Instance connection ended");

    let orphaned: Vec<ReplySender> = {
        let mut pending = lock(&pending);
        let ids: Vec<u64> = pending
            .iter()
            .filter(|(_, (entry_generation, _))| *entry_generation == generation)
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter()
            .filter_map(|id| pending.remove(&id).map(|(_, tx)| tx))
            .collect()
    };
    for tx in orphaned {
        let _ = tx.send(Err(BridgeError::connection(reason.clone(), true)));
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\n' | b'\r' | b' ' | b'\t') {
        end -= 1;
    }
    &line[..end]
}

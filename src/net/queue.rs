//! Connection Queue: the bounded hand-off between the pipeline driver and a connection pool's
//! workers, plus identity generation and per-item completion signalling.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use sha1::{Digest, Sha1};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::trace;

use super::error::CorrelationId;

/// A single forward unit: one framed payload destined for the remote, plus its retry
/// bookkeeping. Owned by the queue channel until dequeued, then by the worker servicing it;
/// readers of `status` only ever observe completion.
pub struct QueueItem {
    pub id: CorrelationId,
    pub data: Vec<u8>,
    tries: AtomicUsize,
    errors: Mutex<Vec<String>>,
    status: Mutex<Option<oneshot::Sender<()>>>,
}

impl QueueItem {
    fn new(id: CorrelationId, data: Vec<u8>) -> (Arc<Self>, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Arc::new(QueueItem {
                id,
                data,
                tries: AtomicUsize::new(0),
                errors: Mutex::new(Vec::new()),
                status: Mutex::new(Some(tx)),
            }),
            rx,
        )
    }

    pub fn tries(&self) -> usize {
        self.tries.load(Ordering::SeqCst)
    }

    /// Record one failed attempt. Called by the pool before deciding whether to retry.
    pub async fn record_error(&self, error: impl std::fmt::Display) {
        self.tries.fetch_add(1, Ordering::SeqCst);
        self.errors.lock().await.push(error.to_string());
    }

    pub async fn errors(&self) -> Vec<String> {
        self.errors.lock().await.clone()
    }

    /// Close `status`, waking anyone waiting on the item's [`ItemHandle`]. Idempotent: a second
    /// call is a no-op, matching the one-shot-per-item contract.
    pub async fn close(&self) {
        if let Some(tx) = self.status.lock().await.take() {
            let _ = tx.send(());
        }
    }
}

/// A handle returned by [`ConnectionQueue::push`]. `wait` blocks until the item's status closes,
/// i.e. until it is either delivered or finally abandoned.
pub struct ItemHandle {
    item: Arc<QueueItem>,
    status: oneshot::Receiver<()>,
}

impl ItemHandle {
    pub async fn wait(self) -> Arc<QueueItem> {
        let _ = self.status.await;
        self.item
    }
}

/// Bounded queue of pending send items shared by a connection pool's workers.
#[derive(Clone)]
pub struct ConnectionQueue {
    sender: mpsc::Sender<Arc<QueueItem>>,
}

impl ConnectionQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Arc<QueueItem>>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (ConnectionQueue { sender }, receiver)
    }

    /// Construct an item (synthesizing an id if none is given), enqueue it, and return a handle.
    /// Blocks if the queue is full.
    pub async fn push(&self, data: Vec<u8>, id: Option<CorrelationId>) -> ItemHandle {
        let id = id.unwrap_or_else(|| synthesize_id(&data));
        let (item, status) = QueueItem::new(id, data);
        trace!(id = %item.id, "enqueuing item");
        // The queue is only ever closed by dropping every `ConnectionQueue` clone, which does not
        // happen while a handle to this queue is in active use.
        let _ = self.sender.send(item.clone()).await;
        ItemHandle { item, status }
    }

    /// Re-enqueue an item that failed, to the tail of the queue. Returns `false` if the queue has
    /// since been closed.
    pub(super) async fn requeue(&self, item: Arc<QueueItem>) -> bool {
        self.sender.send(item).await.is_ok()
    }

    /// Push then wait for completion. Always reports the full length of `data` written, since
    /// per-item errors are surfaced through logs rather than this call's return value.
    pub async fn write(&self, data: Vec<u8>) -> usize {
        let len = data.len();
        let handle = self.push(data, None).await;
        handle.wait().await;
        len
    }
}

/// SHA-1(payload ‖ little-endian unix seconds), truncated to 8 bytes. Same inputs in the same
/// second yield the same id.
fn synthesize_id(data: &[u8]) -> CorrelationId {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.update(&secs.to_le_bytes());
    let digest = hasher.finalize();
    let mut id = [0u8; 8];
    id.copy_from_slice(&digest[..8]);
    CorrelationId(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_payload_same_second_same_id() {
        let data = b"{\"short_message\":\"hi\"}".to_vec();
        let a = synthesize_id(&data);
        let b = synthesize_id(&data);
        assert_eq!(a.0, b.0);
    }

    #[tokio::test]
    async fn push_preserves_explicit_id() {
        let (queue, mut rx) = ConnectionQueue::new(4);
        let id = CorrelationId([1, 2, 3, 4, 5, 6, 7, 8]);
        let handle = queue.push(b"payload".to_vec(), Some(id)).await;
        let item = rx.recv().await.unwrap();
        assert_eq!(item.id.0, id.0);
        item.close().await;
        let completed = handle.wait().await;
        assert_eq!(completed.tries(), 0);
    }

    #[tokio::test]
    async fn write_returns_full_length() {
        let (queue, mut rx) = ConnectionQueue::new(4);
        tokio::spawn(async move {
            let item = rx.recv().await.unwrap();
            item.close().await;
        });
        let written = queue.write(b"hello".to_vec()).await;
        assert_eq!(written, 5);
    }
}

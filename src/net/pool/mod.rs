//! Connection Pool: a transport-polymorphic worker pool. Each variant (plain TCP, TCP+TLS, HTTP,
//! HTTPS) only needs to say how to dial and how to write one item; the dequeue/retry/drop loop
//! is shared once here, per the design's sum-of-transports-behind-a-trait approach.

mod http;
mod https;
mod tcp;
mod tcp_tls;

pub use http::HttpPool;
pub use https::HttpsPool;
pub use tcp::TcpPool;
pub use tcp_tls::TcpTlsPool;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, trace, warn};

use crate::defaults;
use crate::net::error::DialError;
use crate::net::queue::{ConnectionQueue, QueueItem};

/// What a connection pool variant needs to provide: how to open a connection (or HTTP client)
/// and how to push one item's bytes over it. The dequeue/retry loop below is the same for every
/// variant.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Connection: Send;

    async fn dial(&self) -> Result<Self::Connection, DialError>;

    async fn write(
        &self,
        connection: &mut Self::Connection,
        data: &[u8],
    ) -> Result<usize, std::io::Error>;
}

/// A running pool: the queue to push items onto, and a handle to close/wait on its workers.
pub struct Pool {
    pub queue: ConnectionQueue,
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Pool {
    pub fn start<T: Transport>(transport: T, tries: usize, workers: usize) -> Pool {
        let (queue, receiver) = ConnectionQueue::new(defaults::queue_capacity());
        let receiver = Arc::new(Mutex::new(receiver));
        let transport = Arc::new(transport);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            handles.push(tokio::spawn(worker_loop(
                transport.clone(),
                receiver.clone(),
                queue.clone(),
                shutdown_rx.clone(),
                tries,
            )));
        }

        Pool {
            queue,
            shutdown,
            handles: Mutex::new(handles),
        }
    }

    /// Signal every worker to stop once it has drained whatever is already queued, then wait for
    /// all of them to exit.
    ///
    /// Every worker keeps its own `ConnectionQueue` (sender) alive for the life of its loop so it
    /// can requeue a failed item, so a tokio mpsc channel closed only by dropping the pool's own
    /// sender never actually closes — the senders the workers themselves hold keep it open. A
    /// worker parked in `receiver.recv().await` also holds that receiver's `Mutex` guard for as
    /// long as it waits, so a second task can't step in and call `Receiver::close()` either — it
    /// would block behind the very guard it's trying to interrupt. A `watch` channel sidesteps
    /// both: each worker selects between its own `recv()` and its shutdown receiver's `changed()`,
    /// so it preempts itself, and `changed()` fires even if the value was set before the worker
    /// started waiting on it.
    pub async fn close(self) {
        let Pool {
            queue,
            shutdown,
            handles,
        } = self;
        let _ = shutdown.send(true);
        drop(queue);
        for handle in handles.into_inner() {
            let _ = handle.await;
        }
    }

    /// Block until every worker task has exited, without signalling shutdown first.
    pub async fn wait(&self) {
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
    }
}

async fn worker_loop<T: Transport>(
    transport: Arc<T>,
    receiver: Arc<Mutex<tokio::sync::mpsc::Receiver<Arc<QueueItem>>>>,
    queue: ConnectionQueue,
    mut shutdown: watch::Receiver<bool>,
    tries: usize,
) {
    let mut connection: Option<T::Connection> = None;

    loop {
        let item = {
            let mut receiver = receiver.lock().await;
            if *shutdown.borrow() {
                match receiver.try_recv() {
                    Ok(item) => item,
                    Err(_) => return,
                }
            } else {
                tokio::select! {
                    item = receiver.recv() => match item {
                        Some(item) => item,
                        None => return,
                    },
                    _ = shutdown.changed() => match receiver.try_recv() {
                        Ok(item) => item,
                        Err(_) => return,
                    },
                }
            }
        };

        if connection.is_none() {
            match transport.dial().await {
                Ok(conn) => connection = Some(conn),
                Err(err) => {
                    error!(id = %item.id, %err, "dial failed, worker terminating");
                    item.close().await;
                    return;
                }
            }
        }

        let conn = connection.as_mut().expect("connection just established");
        match transport.write(conn, &item.data).await {
            Ok(n) => {
                trace!(id = %item.id, bytes = n, "wrote item to remote");
                item.close().await;
            }
            Err(source) => {
                item.record_error(&source).await;
                connection = None;
                if item.tries() < tries {
                    trace!(id = %item.id, tries = item.tries(), "retrying item");
                    if !queue.requeue(item).await {
                        warn!("queue closed while retrying an item; dropping it");
                    }
                } else {
                    warn!(id = %item.id, tries = item.tries(), "ALERT: discarded after retries exhausted");
                    item.close().await;
                }
            }
        }
    }
}

//! Pipeline driver: the single consumer loop that reads decoded payloads off a [`Listener`]'s
//! `Done` stream, frames each with a delimiter, and hands it to a connection pool's queue.
//!
//! This is pure wiring — every decision about *how* to decompress or forward already happened in
//! [`crate::net::listener`] and [`crate::net::pool`]; this module only owns the loop that
//! connects the two.

use tokio::sync::mpsc;
use tracing::error;

use crate::net::error::FatalError;
use crate::net::listener::Done;
use crate::net::queue::ConnectionQueue;

/// The single byte appended to every payload before it is pushed to a stream-transport pool.
/// HTTP/HTTPS bodies are discrete and never carry one (see `crate::net::pool::http`).
#[derive(Debug, Clone, Copy)]
pub enum Delimiter {
    Null,
    NewLine,
}

impl Delimiter {
    fn byte(self) -> u8 {
        match self {
            Delimiter::Null => 0,
            Delimiter::NewLine => b'\n',
        }
    }
}

/// Drain `done` until the listener closes it or reports a fatal error.
///
/// For each payload: optionally dump it to stdout (`--print`), then, if a pool is attached,
/// append the configured delimiter (if any — HTTP/HTTPS pools pass `None`, since their bodies are
/// discrete and never carry one) and push it onto the pool's queue under the same correlation id
/// the listener assigned. Recoverable errors are logged and otherwise ignored. A fatal error is
/// returned to the caller, which terminates the process.
pub async fn run(
    mut done: mpsc::Receiver<Done>,
    queue: Option<ConnectionQueue>,
    delimiter: Option<Delimiter>,
    print: bool,
) -> Result<(), FatalError> {
    while let Some(event) = done.recv().await {
        match event {
            Done::Fatal(fatal) => return Err(fatal),
            Done::Error(err) => error!(%err, "listener reported a recoverable error"),
            Done::Payload { id, mut body } => {
                if print {
                    println!(
                        "\n#### {} ####\n{}\n##########################\n",
                        id,
                        String::from_utf8_lossy(&body)
                    );
                }
                if let Some(queue) = &queue {
                    if let Some(delimiter) = delimiter {
                        body.push(delimiter.byte());
                    }
                    // Fire-and-forget: the driver does not wait for delivery, matching the
                    // source's forwarding loop. Push still blocks briefly if the queue (bound 10)
                    // is momentarily full.
                    queue.push(body, Some(id)).await;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::error::CorrelationId;

    #[tokio::test]
    async fn forwards_payload_with_null_delimiter() {
        let (done_tx, done_rx) = mpsc::channel(4);
        let (queue, mut receiver) = ConnectionQueue::new(4);

        done_tx
            .send(Done::Payload {
                id: CorrelationId([1; 8]),
                body: b"hello".to_vec(),
            })
            .await
            .unwrap();
        drop(done_tx);

        let driver = tokio::spawn(run(done_rx, Some(queue), Some(Delimiter::Null), false));
        let item = receiver.recv().await.unwrap();
        assert_eq!(item.data, b"hello\0");
        item.close().await;
        driver.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn new_line_delimiter_is_configurable() {
        let (done_tx, done_rx) = mpsc::channel(4);
        let (queue, mut receiver) = ConnectionQueue::new(4);

        done_tx
            .send(Done::Payload {
                id: CorrelationId([2; 8]),
                body: b"hi".to_vec(),
            })
            .await
            .unwrap();
        drop(done_tx);

        let driver = tokio::spawn(run(done_rx, Some(queue), Some(Delimiter::NewLine), false));
        let item = receiver.recv().await.unwrap();
        assert_eq!(item.data, b"hi\n");
        item.close().await;
        driver.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn http_transport_carries_no_delimiter() {
        let (done_tx, done_rx) = mpsc::channel(4);
        let (queue, mut receiver) = ConnectionQueue::new(4);

        done_tx
            .send(Done::Payload {
                id: CorrelationId([3; 8]),
                body: b"hi".to_vec(),
            })
            .await
            .unwrap();
        drop(done_tx);

        let driver = tokio::spawn(run(done_rx, Some(queue), None, false));
        let item = receiver.recv().await.unwrap();
        assert_eq!(item.data, b"hi");
        item.close().await;
        driver.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn fatal_error_terminates_the_driver() {
        let (done_tx, done_rx) = mpsc::channel(4);
        done_tx
            .send(Done::Fatal(FatalError::Bind {
                address: "udp://0.0.0.0:1".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
            }))
            .await
            .unwrap();

        let result = run(done_rx, None, Some(Delimiter::Null), false).await;
        assert!(result.is_err());
    }
}

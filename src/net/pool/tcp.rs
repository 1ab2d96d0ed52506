//! Plain TCP pool variant: dial = connect a TCP socket tuned with the design's keep-alive.

use socket2::{Domain, Socket, TcpKeepalive, Type};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use super::Transport;
use crate::defaults;
use crate::net::error::DialError;
use async_trait::async_trait;

pub struct TcpPool {
    remote: String,
}

impl TcpPool {
    pub fn new(remote: impl Into<String>) -> Self {
        TcpPool {
            remote: remote.into(),
        }
    }
}

/// Resolve `remote` and open a TCP connection with the default 3-minute keep-alive applied.
/// Plain TCP dial has no explicit timeout (the design reserves the 1-minute timeout for the TLS
/// handshake), matching the source's library-default behavior.
pub(super) async fn dial(remote: &str) -> Result<TcpStream, DialError> {
    let addr = tokio::net::lookup_host(remote)
        .await
        .map_err(|source| DialError::Connect {
            remote: remote.to_string(),
            source,
        })?
        .next()
        .ok_or_else(|| DialError::Connect {
            remote: remote.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses resolved"),
        })?;

    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::STREAM, None).map_err(|source| DialError::Connect {
        remote: remote.to_string(),
        source,
    })?;
    socket.set_nodelay(true).ok();
    let keepalive = TcpKeepalive::new().with_time(defaults::tcp_keepalive());
    socket.set_tcp_keepalive(&keepalive).ok();
    socket
        .connect(&addr.into())
        .map_err(|source| DialError::Connect {
            remote: remote.to_string(),
            source,
        })?;
    socket.set_nonblocking(true).map_err(|source| DialError::Connect {
        remote: remote.to_string(),
        source,
    })?;

    TcpStream::from_std(socket.into()).map_err(|source| DialError::Connect {
        remote: remote.to_string(),
        source,
    })
}

#[async_trait]
impl Transport for TcpPool {
    type Connection = TcpStream;

    async fn dial(&self) -> Result<Self::Connection, DialError> {
        dial(&self.remote).await
    }

    async fn write(
        &self,
        connection: &mut Self::Connection,
        data: &[u8],
    ) -> Result<usize, std::io::Error> {
        connection.write_all(data).await?;
        Ok(data.len())
    }
}

//! TCP+TLS pool variant: dial = TCP connect (same keep-alive as the plain variant) then wrap in
//! a TLS session, trusting a CA bundle and presenting a client keypair loaded once at
//! construction.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio_rustls::rustls;
use tokio_rustls::webpki::{DNSName, DNSNameRef};
use tokio_rustls::{client::TlsStream, TlsConnector};

use super::{tcp, Transport};
use crate::defaults;
use crate::net::error::DialError;
use crate::timeout::WithTimeout;
use crate::transport::pem;

pub struct TcpTlsPool {
    remote: String,
    host: DNSName,
    tls_config: Arc<rustls::ClientConfig>,
}

impl TcpTlsPool {
    /// Load the CA bundle and, unless `no_client_auth` is set, the client keypair, once.
    pub fn new(
        remote: impl Into<String>,
        ca: impl AsRef<Path>,
        client_pem: impl AsRef<Path>,
        client_crt: impl AsRef<Path>,
        no_client_auth: bool,
    ) -> Result<Self, std::io::Error> {
        let remote = remote.into();
        let (host, _port) = split_host_port(&remote);
        let host = DNSNameRef::try_from_ascii_str(&host)
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid TLS server name"))?
            .to_owned();

        let mut tls_config = rustls::ClientConfig::new();
        for cert in pem::read_certificates(ca)? {
            tls_config
                .root_store
                .add(&cert)
                .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "invalid CA certificate"))?;
        }
        if !no_client_auth {
            let certs = pem::read_certificates(client_crt)?;
            let key = pem::read_private_key(client_pem)?;
            tls_config
                .set_single_client_cert(certs, key)
                .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        }

        Ok(TcpTlsPool {
            remote,
            host,
            tls_config: Arc::new(tls_config),
        })
    }
}

fn split_host_port(authority: &str) -> (String, u16) {
    match authority.rsplit_once(':') {
        Some((host, port)) => (host.to_string(), port.parse().unwrap_or(0)),
        None => (authority.to_string(), 0),
    }
}

#[async_trait]
impl Transport for TcpTlsPool {
    type Connection = TlsStream<tokio::net::TcpStream>;

    async fn dial(&self) -> Result<Self::Connection, DialError> {
        let tcp = tcp::dial(&self.remote).await?;
        let connector = TlsConnector::from(self.tls_config.clone());
        connector
            .connect(self.host.as_ref(), tcp)
            .with_timeout(defaults::tls_dial_timeout())
            .await
            .map_err(|_| DialError::Tls {
                remote: self.remote.clone(),
                source: std::io::Error::new(std::io::ErrorKind::TimedOut, "TLS handshake timed out"),
            })?
            .map_err(|source| DialError::Tls {
                remote: self.remote.clone(),
                source,
            })
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

//! HTTPS pool variant: as [`super::http::HttpPool`], but the client is configured with the same
//! CA+keypair scheme used by the TCP+TLS variant.

use std::path::Path;

use async_trait::async_trait;
use reqwest::{Certificate, Identity};
use tracing::trace;

use super::Transport;
use crate::net::error::DialError;
use crate::transport::pem;

pub struct HttpsPool {
    url: String,
    client: reqwest::Client,
}

impl HttpsPool {
    pub fn new(
        url: impl Into<String>,
        ca: impl AsRef<Path>,
        client_pem: impl AsRef<Path>,
        client_crt: impl AsRef<Path>,
        no_client_auth: bool,
    ) -> Result<Self, std::io::Error> {
        let mut builder = reqwest::Client::builder();

        for cert in pem::read_certificates(ca)? {
            let certificate = Certificate::from_der(&cert.0).map_err(invalid_data)?;
            builder = builder.add_root_certificate(certificate);
        }

        if !no_client_auth {
            let mut identity_pem = std::fs::read(&client_crt)?;
            identity_pem.extend_from_slice(&std::fs::read(&client_pem)?);
            let identity = Identity::from_pem(&identity_pem).map_err(invalid_data)?;
            builder = builder.identity(identity);
        }

        let client = builder.build().map_err(invalid_data)?;
        Ok(HttpsPool {
            url: url.into(),
            client,
        })
    }
}

fn invalid_data(err: impl std::fmt::Display) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string())
}

#[async_trait]
impl Transport for HttpsPool {
    type Connection = reqwest::Client;

    async fn dial(&self) -> Result<Self::Connection, DialError> {
        Ok(self.client.clone())
    }

    async fn write(
        &self,
        connection: &mut Self::Connection,
        data: &[u8],
    ) -> Result<usize, std::io::Error> {
        match connection.post(&self.url).body(data.to_vec()).send().await {
            Ok(response) => {
                trace!(status = %response.status(), "POST completed");
                Ok(data.len())
            }
            Err(err) => Err(std::io::Error::new(std::io::ErrorKind::Other, err)),
        }
    }
}

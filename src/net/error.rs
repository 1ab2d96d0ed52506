//! Error taxonomy for the ingest-and-forward pipeline.
//!
//! Four kinds, matching the design's error handling section: validation errors surface as
//! `anyhow::Error` at the CLI boundary and never reach here; the other three each have a home
//! below.

use std::fmt;
use thiserror::Error;

/// Address parsing failures: malformed scheme, missing authority, unknown transport token.
/// Always a validation error, returned from argument parsing and never logged by a running
/// pipeline.
#[derive(Debug, Error)]
pub enum HostAddressError {
    #[error("address is empty")]
    Empty,
    #[error("missing `://` separator in address: {0:?}")]
    MissingSeparator(String),
    #[error("unrecognized transport scheme: {0:?}")]
    UnknownScheme(String),
    #[error("raw IP scheme is missing a `:<protocol>` suffix: {0:?}")]
    MissingProtocol(String),
    #[error("empty authority in address: {0:?}")]
    EmptyAuthority(String),
}

/// Inability to bind the listen socket. Fatal: carried once on the `Done` stream and terminates
/// the process.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

/// Per-message failures that are logged and dropped; they never stop the listener or a worker.
#[derive(Debug, Error)]
pub enum RecoverableError {
    #[error("failed to decompress payload [{id}]: {source}")]
    Decompress {
        id: CorrelationId,
        #[source]
        source: std::io::Error,
    },
    #[error("chunked message timed out waiting for missing chunks [{id}]")]
    ReassemblyTimeout { id: CorrelationId },
    #[error("write to remote failed [{id}]: {source}")]
    Write {
        id: CorrelationId,
        #[source]
        source: std::io::Error,
    },
    #[error("discarded after {tries} tries [{id}]")]
    RetriesExhausted { id: CorrelationId, tries: usize },
}

/// Dial failure inside a pool worker. The worker that observes this terminates; the queue item
/// being serviced is dropped. Other workers are unaffected.
#[derive(Debug, Error)]
pub enum DialError {
    #[error("failed to connect to {remote}: {source}")]
    Connect {
        remote: String,
        #[source]
        source: std::io::Error,
    },
    #[error("TLS handshake with {remote} failed: {source}")]
    Tls {
        remote: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to load TLS material: {0}")]
    Material(#[source] std::io::Error),
}

/// An 8-byte opaque correlation id, rendered as uppercase hex in every log line that touches a
/// single message, as required of every component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(pub [u8; 8]);

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.0))
    }
}

impl From<[u8; 8]> for CorrelationId {
    fn from(bytes: [u8; 8]) -> Self {
        CorrelationId(bytes)
    }
}

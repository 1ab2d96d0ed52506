//! Numeric and duration constants pinned by the design, collected in one place so the
//! components that consume them never hard-code a literal.

use std::time::Duration;

/// Size of the buffer a listener reads each datagram into.
pub const fn read_buffer_size() -> usize {
    8192
}

/// Deadline after which an incomplete chunked message is abandoned.
pub const fn reassembly_deadline() -> Duration {
    Duration::from_secs(5)
}

/// Interval of the background sweep that checks in-flight chunked messages for completion
/// or timeout.
pub const fn reassembly_tick() -> Duration {
    Duration::from_millis(250)
}

/// Bound on the connection queue shared by a pool's workers.
pub const fn queue_capacity() -> usize {
    10
}

/// Keep-alive applied to dialed TCP connections (plain and TLS).
pub const fn tcp_keepalive() -> Duration {
    Duration::from_secs(3 * 60)
}

/// Timeout applied to the TLS handshake when dialing a `tcp+tls`/`https` remote.
pub const fn tls_dial_timeout() -> Duration {
    Duration::from_secs(60)
}

/// Default number of times a queue item is attempted before it is dropped.
pub const fn tries() -> usize {
    5
}

/// Default number of worker tasks in a connection pool.
pub const fn workers() -> usize {
    10
}

/// Default path to the client certificate used for mTLS to the remote.
pub const fn client_pem() -> &'static str {
    "./Client.pem"
}

/// Default path to the client certificate chain used for mTLS to the remote.
pub const fn client_crt() -> &'static str {
    "./Client.crt"
}

/// Default path to the CA bundle trusted when dialing a secure remote.
pub const fn ca_bundle() -> &'static str {
    "./CA_Root.crt"
}

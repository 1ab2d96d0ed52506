//! A GELF ingestion proxy: accepts GELF datagrams on a local connectionless endpoint,
//! reassembles chunked messages, decompresses them, and forwards the resulting payloads to a
//! remote Graylog input over a bounded pool of worker connections with retry.

pub mod cli;
pub mod defaults;
pub mod net;
pub mod pipeline;
pub mod timeout;
pub mod transport;

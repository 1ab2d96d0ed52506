//! The ingest-and-forward pipeline: host address parsing, the connection queue and pool, the
//! connectionless listener, and chunk reassembly.

pub mod error;
pub mod host;
pub mod listener;
pub mod pool;
pub mod queue;
pub mod reassembly;

//! TLS material loading. The only transport concern this crate owns directly; everything else
//! about a connection's wire protocol lives with its [`crate::net::pool`] variant.

pub mod pem;

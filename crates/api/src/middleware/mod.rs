//! Request extractors.
//!
//! - [`client_ip::ClientIp`] -- The caller's address, honouring proxy headers.

pub mod client_ip;

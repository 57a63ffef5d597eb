//! A DNS proxy that answers plain UDP queries by asking a DNS-over-HTTPS JSON
//! API, caching answers for as long as their TTLs allow.
//!
//! The API host itself is resolved by [`resolver::bootstrap::BootstrapResolver`]
//! straight from fixed nameservers, so the proxy can be the only resolver a
//! host has.

pub mod config;
pub mod handler;
pub mod protocol;
pub mod resolver;
pub mod server;

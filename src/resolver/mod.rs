//! Hostname resolution.
//!
//! The cache never talks to the network directly; it goes through a
//! [`Resolve`] implementation so tests can substitute a deterministic stub.

use std::future::Future;
use std::io;
use std::net::IpAddr;

/// Turns a hostname into a network address.
pub trait Resolve: Send + Sync + 'static {
    /// Resolves `host` to a single address.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the host is unknown or the lookup fails.
    fn resolve(&self, host: &str) -> impl Future<Output = io::Result<IpAddr>> + Send;
}

/// Resolver backed by the operating system (`getaddrinfo`).
///
/// The lookup itself is blocking and runs on Tokio's blocking pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolve for SystemResolver {
    async fn resolve(&self, host: &str) -> io::Result<IpAddr> {
        // The port is irrelevant for the lookup; only the address is kept.
        let mut addrs = tokio::net::lookup_host((host, 0)).await?;
        addrs.next().map(|addr| addr.ip()).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses found for {host}"),
            )
        })
    }
}

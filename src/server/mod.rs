//! Async forwarding proxy using Tokio.
//!
//! Accepts client TCP connections and hands each one to its own request
//! handler task. Handlers share one [`ResolutionCache`]; every forwarded
//! request gets its own response relay task.

mod handler;
mod relay;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::cache::ResolutionCache;
use crate::config::{ConfigError, ProxyConfig};
use crate::resolver::Resolve;

use handler::handle_connection;

/// Errors produced by the proxy.
///
/// Handler errors end the affected client connection only; they are logged
/// where the handler task ends and never reach the accept loop.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("request has no Host line and no previous host is known")]
    MissingHost,

    #[error("failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to connect to upstream {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to forward request to upstream {addr}: {source}")]
    Forward {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// The forwarding proxy.
///
/// # Examples
///
/// ```rust,no_run
/// use fwdproxy::config::ProxyConfig;
/// use fwdproxy::resolver::SystemResolver;
/// use fwdproxy::server::Proxy;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let proxy = Proxy::bind("127.0.0.1:5005", ProxyConfig::default(), SystemResolver).await?;
///     proxy.run().await?;
///     Ok(())
/// }
/// ```
pub struct Proxy<R> {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: Arc<ProxyConfig>,
    cache: Arc<ResolutionCache<R>>,
}

impl<R: Resolve> Proxy<R> {
    /// Validates `config`, binds the listener and creates the shared cache.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Config`] for an invalid configuration and
    /// [`ProxyError::Bind`] if the address cannot be bound.
    pub async fn bind(
        addr: impl AsRef<str>,
        config: ProxyConfig,
        resolver: R,
    ) -> Result<Self, ProxyError> {
        config.validate()?;

        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ProxyError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        let cache = Arc::new(ResolutionCache::new(resolver, config.cache_ttl));

        Ok(Self {
            listener,
            local_addr,
            config: Arc::new(config),
            cache,
        })
    }

    /// Returns the local address the proxy is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared handle to the resolution cache.
    pub fn cache(&self) -> Arc<ResolutionCache<R>> {
        Arc::clone(&self.cache)
    }

    /// Accepts connections forever, spawning one handler task per client.
    ///
    /// # Errors
    ///
    /// Accept failures are logged and skipped, so this only returns if the
    /// task is cancelled.
    pub async fn run(self) -> Result<(), ProxyError> {
        info!(address = %self.local_addr, upstream_port = self.config.upstream_port, "proxy listening");

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let cache = Arc::clone(&self.cache);
            let config = Arc::clone(&self.config);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, cache, config).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

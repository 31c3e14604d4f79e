//! Proxy configuration.
//!
//! All knobs have defaults matching a plain HTTP forward proxy: a 30 second
//! hostname cache, upstream port 80 and 16 KiB read buffers.

use std::time::Duration;

use thiserror::Error;

/// How long a resolved hostname stays in the cache.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

/// Standard HTTP port every upstream connection is opened on.
pub const DEFAULT_UPSTREAM_PORT: u16 = 80;

/// Capacity of one client request read (16 KiB).
pub const DEFAULT_REQUEST_BUF_SIZE: usize = 16 * 1024;

/// Capacity of one upstream response read (16 KiB).
pub const DEFAULT_RELAY_BUF_SIZE: usize = 16 * 1024;

/// Errors produced by [`ProxyConfig::validate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}

/// Runtime configuration shared by every handler and relay.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use fwdproxy::config::ProxyConfig;
///
/// let config = ProxyConfig::default()
///     .with_cache_ttl(Duration::from_secs(5))
///     .with_upstream_port(8080);
///
/// assert_eq!(config.upstream_port, 8080);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Time-to-live of a resolution cache entry.
    pub cache_ttl: Duration,
    /// Destination port for upstream connections.
    pub upstream_port: u16,
    /// Size of the per-connection request buffer.
    pub request_buffer_size: usize,
    /// Size of the per-relay response buffer.
    pub relay_buffer_size: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            upstream_port: DEFAULT_UPSTREAM_PORT,
            request_buffer_size: DEFAULT_REQUEST_BUF_SIZE,
            relay_buffer_size: DEFAULT_RELAY_BUF_SIZE,
        }
    }
}

impl ProxyConfig {
    /// Sets how long a resolved hostname stays cached.
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Sets the destination port for upstream connections.
    #[must_use]
    pub fn with_upstream_port(mut self, port: u16) -> Self {
        self.upstream_port = port;
        self
    }

    /// Sets the size of one client request read.
    #[must_use]
    pub fn with_request_buffer_size(mut self, size: usize) -> Self {
        self.request_buffer_size = size;
        self
    }

    /// Sets the size of one upstream response read.
    #[must_use]
    pub fn with_relay_buffer_size(mut self, size: usize) -> Self {
        self.relay_buffer_size = size;
        self
    }

    /// Checks that no size or duration is zero.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Zero`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_ttl.is_zero() {
            return Err(ConfigError::Zero { field: "cache_ttl" });
        }
        if self.upstream_port == 0 {
            return Err(ConfigError::Zero {
                field: "upstream_port",
            });
        }
        if self.request_buffer_size == 0 {
            return Err(ConfigError::Zero {
                field: "request_buffer_size",
            });
        }
        if self.relay_buffer_size == 0 {
            return Err(ConfigError::Zero {
                field: "relay_buffer_size",
            });
        }
        Ok(())
    }
}

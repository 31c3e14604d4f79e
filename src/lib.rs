//! # fwdproxy
//!
//! A small async forwarding HTTP proxy written in Rust.
//!
//! Each client connection is read chunk by chunk. The destination is taken
//! from the chunk's `Host:` line, resolved through a shared TTL cache, and
//! the chunk is forwarded unmodified to that host on port 80. Responses are
//! relayed back by a separate task per forwarded request.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fwdproxy::{Proxy, ProxyConfig, SystemResolver};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let proxy = Proxy::bind("127.0.0.1:5005", ProxyConfig::default(), SystemResolver).await?;
//!     println!("Proxying on {}", proxy.local_addr());
//!     proxy.run().await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod http;
pub mod resolver;
pub mod server;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{CacheStats, ResolutionCache};
pub use config::ProxyConfig;
pub use resolver::{Resolve, SystemResolver};
pub use server::{Proxy, ProxyError};

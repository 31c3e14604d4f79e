//! Per-connection request handler.
//!
//! Each chunk read from the client is sent, unmodified, over a fresh
//! upstream connection to the host named in the chunk. The handler does not
//! wait for the response: a relay task is spawned for it and the handler goes
//! straight back to reading the client.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::ProxyError;
use super::relay::{ClientWriter, relay_response};
use crate::cache::ResolutionCache;
use crate::config::ProxyConfig;
use crate::http::HostTracker;
use crate::resolver::Resolve;

/// Handles a single client connection over its lifetime.
///
/// Returns once the client closes its side or an iteration fails. In both
/// cases the most recent upstream connection and the client connection are
/// closed before returning; close failures are only logged.
///
/// # Errors
///
/// Client read errors, [`ProxyError::MissingHost`] on a first chunk without
/// a host, and resolve, connect or forward failures.
pub(crate) async fn handle_connection<R: Resolve>(
    stream: TcpStream,
    peer_addr: SocketAddr,
    cache: Arc<ResolutionCache<R>>,
    config: Arc<ProxyConfig>,
) -> Result<(), ProxyError> {
    let (mut reader, writer) = stream.into_split();
    let client: ClientWriter = Arc::new(Mutex::new(writer));
    let mut upstream = None;

    let result = forward_requests(
        &mut reader,
        &client,
        &mut upstream,
        peer_addr,
        &cache,
        &config,
    )
    .await;

    close(upstream, &client, peer_addr).await;
    result
}

async fn forward_requests<R: Resolve>(
    reader: &mut OwnedReadHalf,
    client: &ClientWriter,
    upstream: &mut Option<OwnedWriteHalf>,
    peer_addr: SocketAddr,
    cache: &ResolutionCache<R>,
    config: &ProxyConfig,
) -> Result<(), ProxyError> {
    let mut buf = BytesMut::with_capacity(config.request_buffer_size);
    let mut hosts = HostTracker::new();

    loop {
        buf.clear();
        let bytes_read = reader.read_buf(&mut buf).await?;

        if bytes_read == 0 {
            debug!(peer = %peer_addr, "connection closed by peer");
            return Ok(());
        }

        trace!(peer = %peer_addr, request = %String::from_utf8_lossy(&buf), "request chunk");

        let host = hosts
            .host_for(&buf)
            .ok_or(ProxyError::MissingHost)?
            .to_owned();

        let ip = cache
            .resolve(&host)
            .await
            .map_err(|source| ProxyError::Resolve {
                host: host.clone(),
                source,
            })?;
        let addr = SocketAddr::new(ip, config.upstream_port);

        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| ProxyError::Connect { addr, source })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(upstream = %addr, error = %e, "failed to disable Nagle");
        }
        let (upstream_reader, mut upstream_writer) = stream.into_split();

        upstream_writer
            .write_all(&buf)
            .await
            .map_err(|source| ProxyError::Forward { addr, source })?;
        upstream_writer
            .flush()
            .await
            .map_err(|source| ProxyError::Forward { addr, source })?;

        debug!(peer = %peer_addr, host = %host, upstream = %addr, bytes = bytes_read, "request forwarded");

        // Replacing the previous writer half-closes that exchange's upstream.
        *upstream = Some(upstream_writer);

        tokio::spawn(relay_response(
            upstream_reader,
            Arc::clone(client),
            peer_addr,
            addr,
            config.relay_buffer_size,
        ));
    }
}

async fn close(upstream: Option<OwnedWriteHalf>, client: &ClientWriter, peer_addr: SocketAddr) {
    if let Some(mut upstream) = upstream {
        if let Err(e) = upstream.shutdown().await {
            debug!(peer = %peer_addr, error = %e, "failed to close upstream connection");
        }
    }

    if let Err(e) = client.lock().await.shutdown().await {
        debug!(peer = %peer_addr, error = %e, "failed to close client connection");
    }
}

//! Response relay: upstream → client.
//!
//! A relay is detached from the handler that spawned it. Its errors are
//! logged here and go no further.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Write side of a client connection, shared by every relay on it.
///
/// Each relay holds the lock for one whole chunk, so concurrent relays
/// interleave at chunk boundaries but never inside a chunk.
pub(crate) type ClientWriter = Arc<Mutex<OwnedWriteHalf>>;

/// Relays one upstream connection to the client until upstream closes.
pub(crate) async fn relay_response(
    mut upstream: OwnedReadHalf,
    client: ClientWriter,
    peer: SocketAddr,
    origin: SocketAddr,
    buf_size: usize,
) {
    match copy_to_client(&mut upstream, &client, buf_size).await {
        Ok(bytes) => debug!(peer = %peer, upstream = %origin, bytes, "upstream closed, response relayed"),
        Err(e) => warn!(peer = %peer, upstream = %origin, error = %e, "response relay aborted"),
    }
}

/// Copies `upstream` into `client` chunk by chunk, then shuts the client
/// write side down. Returns the number of bytes relayed.
async fn copy_to_client<U, C>(upstream: &mut U, client: &Mutex<C>, buf_size: usize) -> io::Result<u64>
where
    U: AsyncRead + Unpin,
    C: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(buf_size);
    let mut total = 0u64;

    loop {
        buf.clear();
        let n = upstream.read_buf(&mut buf).await?;
        if n == 0 {
            break;
        }

        let mut client = client.lock().await;
        client.write_all(&buf).await?;
        client.flush().await?;
        total += n as u64;
    }

    client.lock().await.shutdown().await?;
    Ok(total)
}

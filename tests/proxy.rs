//! End-to-end scenarios over loopback TCP.
//!
//! A stub resolver maps every test hostname to 127.0.0.1 and the proxy's
//! upstream port points at a local origin that records what it receives.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

use fwdproxy::{Proxy, ProxyConfig, Resolve};

const WAIT: Duration = Duration::from_secs(5);

/// Resolves the listed hosts to loopback and counts lookups.
#[derive(Clone)]
struct LoopbackResolver {
    known: Vec<&'static str>,
    calls: Arc<Mutex<HashMap<String, usize>>>,
}

impl LoopbackResolver {
    fn new(known: &[&'static str]) -> Self {
        Self {
            known: known.to_vec(),
            calls: Arc::default(),
        }
    }

    fn calls(&self, host: &str) -> usize {
        self.calls.lock().unwrap().get(host).copied().unwrap_or(0)
    }
}

impl Resolve for LoopbackResolver {
    async fn resolve(&self, host: &str) -> io::Result<IpAddr> {
        *self.calls.lock().unwrap().entry(host.to_owned()).or_default() += 1;
        if self.known.iter().any(|known| *known == host) {
            Ok(IpAddr::V4(Ipv4Addr::LOCALHOST))
        } else {
            Err(io::Error::new(io::ErrorKind::NotFound, "unknown host"))
        }
    }
}

/// Origin server: each accepted connection reads one request head, reports
/// it on the channel, writes `response` and closes.
async fn spawn_origin(response: &'static [u8]) -> (u16, mpsc::UnboundedReceiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let (mut conn, _) = listener.accept().await.unwrap();
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut received = Vec::new();
                let mut chunk = [0u8; 1024];
                while !received.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = conn.read(&mut chunk).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    received.extend_from_slice(&chunk[..n]);
                }
                let _ = tx.send(received);
                conn.write_all(response).await.unwrap();
                conn.shutdown().await.unwrap();
            });
        }
    });

    (port, rx)
}

async fn start_proxy(resolver: LoopbackResolver, upstream_port: u16) -> SocketAddr {
    let config = ProxyConfig::default().with_upstream_port(upstream_port);
    let proxy = Proxy::bind("127.0.0.1:0", config, resolver).await.unwrap();
    let addr = proxy.local_addr();
    tokio::spawn(proxy.run());
    addr
}

#[tokio::test]
async fn forwards_request_and_relays_response() {
    const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";
    let (origin_port, mut origin_rx) = spawn_origin(RESPONSE).await;
    let resolver = LoopbackResolver::new(&["example.com"]);
    let proxy_addr = start_proxy(resolver.clone(), origin_port).await;

    let request = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";
    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    client.write_all(request).await.unwrap();

    let forwarded = timeout(WAIT, origin_rx.recv()).await.unwrap().unwrap();
    assert_eq!(forwarded, request);

    let mut response = Vec::new();
    timeout(WAIT, client.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response, RESPONSE);
    assert_eq!(resolver.calls("example.com"), 1);
}

#[tokio::test]
async fn missing_host_reuses_previous_host() {
    let (origin_port, mut origin_rx) = spawn_origin(b"HTTP/1.1 204 No Content\r\n\r\n").await;
    let resolver = LoopbackResolver::new(&["example.com"]);
    let proxy_addr = start_proxy(resolver.clone(), origin_port).await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();

    let first = b"GET /a HTTP/1.1\r\nHost: example.com\r\n\r\n";
    client.write_all(first).await.unwrap();
    let got = timeout(WAIT, origin_rx.recv()).await.unwrap().unwrap();
    assert_eq!(got, first);

    // Wait for the first response so the next write is a separate chunk.
    let mut response = Vec::new();
    timeout(WAIT, client.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    assert!(response.starts_with(b"HTTP/1.1 204"));

    let malformed = b"GET /b HTTP/1.1\r\nX-No-Destination: here\r\n\r\n";
    client.write_all(malformed).await.unwrap();
    let got = timeout(WAIT, origin_rx.recv()).await.unwrap().unwrap();
    assert_eq!(got, malformed);

    // Second chunk was answered from the cache.
    assert_eq!(resolver.calls("example.com"), 1);
}

#[tokio::test]
async fn unknown_host_closes_client_without_response() {
    let (origin_port, mut origin_rx) = spawn_origin(b"unused").await;
    let resolver = LoopbackResolver::new(&[]);
    let proxy_addr = start_proxy(resolver.clone(), origin_port).await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    client
        .write_all(b"GET / HTTP/1.1\r\nHost: nowhere.test\r\n\r\n")
        .await
        .unwrap();

    let mut response = Vec::new();
    timeout(WAIT, client.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    assert!(response.is_empty());
    assert_eq!(resolver.calls("nowhere.test"), 1);
    assert!(origin_rx.try_recv().is_err());
}

#[tokio::test]
async fn first_chunk_without_host_closes_client() {
    let (origin_port, _origin_rx) = spawn_origin(b"unused").await;
    let proxy_addr = start_proxy(LoopbackResolver::new(&["example.com"]), origin_port).await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    client.write_all(b"hello\r\n\r\n").await.unwrap();

    let mut response = Vec::new();
    timeout(WAIT, client.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    assert!(response.is_empty());
}

#[tokio::test]
async fn separate_connections_share_the_cache() {
    let (origin_port, mut origin_rx) = spawn_origin(b"HTTP/1.1 204 No Content\r\n\r\n").await;
    let resolver = LoopbackResolver::new(&["example.com"]);
    let proxy_addr = start_proxy(resolver.clone(), origin_port).await;

    for _ in 0..3 {
        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        client
            .write_all(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n")
            .await
            .unwrap();
        timeout(WAIT, origin_rx.recv()).await.unwrap().unwrap();
        let mut response = Vec::new();
        timeout(WAIT, client.read_to_end(&mut response))
            .await
            .unwrap()
            .unwrap();
    }

    assert_eq!(resolver.calls("example.com"), 1);
}

#[tokio::test]
async fn upstream_connect_failure_closes_client_without_response() {
    // Bind and drop to find a port nobody listens on.
    let closed_port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let resolver = LoopbackResolver::new(&["example.com"]);
    let proxy_addr = start_proxy(resolver.clone(), closed_port).await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    client
        .write_all(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n")
        .await
        .unwrap();

    let mut response = Vec::new();
    timeout(WAIT, client.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    assert!(response.is_empty());
    assert_eq!(resolver.calls("example.com"), 1);
}

#[tokio::test]
async fn client_close_closes_upstream() {
    let origin = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let origin_port = origin.local_addr().unwrap().port();
    let proxy_addr = start_proxy(LoopbackResolver::new(&["example.com"]), origin_port).await;

    let request = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";
    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    client.write_all(request).await.unwrap();

    let (mut upstream, _) = timeout(WAIT, origin.accept()).await.unwrap().unwrap();
    let mut forwarded = vec![0u8; request.len()];
    timeout(WAIT, upstream.read_exact(&mut forwarded))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(forwarded, request);

    drop(client);

    let mut rest = Vec::new();
    let n = timeout(WAIT, upstream.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);
}

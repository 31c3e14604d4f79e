//! Best-effort destination lookup in raw HTTP/1.x request bytes.
//!
//! This is deliberately not a header parser: the proxy forwards bytes
//! untouched and only needs to know where to send them. The request chunk is
//! scanned line by line for the first line containing `Host:` and the token
//! after the marker on that same line is used.

use tracing::warn;

/// Marker searched for in each request line.
const HOST_MARKER: &str = "Host:";

/// Extracts the destination hostname from a raw request chunk.
///
/// Any `:port` suffix is dropped since upstream connections always use the
/// configured port. Returns `None` when no line carries a non-empty host.
///
/// # Examples
///
/// ```
/// use fwdproxy::http::extract_host;
///
/// let raw = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";
/// assert_eq!(extract_host(raw).as_deref(), Some("example.com"));
/// assert_eq!(extract_host(b"garbage\r\n\r\n"), None);
/// ```
pub fn extract_host(request: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(request);

    let line = text.split('\n').find(|line| line.contains(HOST_MARKER))?;
    let (_, rest) = line.split_once(HOST_MARKER)?;
    let token = rest.split_whitespace().next()?;

    let host = strip_port(token);
    if host.is_empty() {
        None
    } else {
        Some(host.to_owned())
    }
}

/// `example.com:8080` → `example.com`, `[::1]:80` → `::1`.
///
/// A bare IPv6 literal has several colons and is returned unchanged.
fn strip_port(authority: &str) -> &str {
    if let Some(rest) = authority.strip_prefix('[') {
        return rest.split_once(']').map_or(rest, |(ip, _)| ip);
    }
    match authority.split_once(':') {
        Some((host, port)) if !port.contains(':') => host,
        _ => authority,
    }
}

/// Remembers the last hostname seen on one client connection.
///
/// A chunk without a usable `Host:` line (a continuation of a large body, or
/// a malformed request) is sent to the previously seen host instead of
/// failing the connection.
#[derive(Debug, Default, Clone)]
pub struct HostTracker {
    last: Option<String>,
}

impl HostTracker {
    /// Creates a tracker that has not seen any host yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the host for `request`, falling back to the last known one.
    ///
    /// `None` means neither this chunk nor any earlier one named a host.
    pub fn host_for(&mut self, request: &[u8]) -> Option<&str> {
        match extract_host(request) {
            Some(host) => self.last = Some(host),
            None => match &self.last {
                Some(previous) => {
                    warn!(host = %previous, "request is missing its Host line, reusing previous host");
                }
                None => warn!("request is missing its Host line"),
            },
        }
        self.last.as_deref()
    }
}

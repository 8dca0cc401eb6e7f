//! TCP transport to the test instrument.
//!
//! Two exchange shapes are supported:
//!
//! - [`client::TransportClient`]: connect with retry, one write, one bounded
//!   read. Used for tests that produce a single terminal answer.
//! - [`stream::spawn`]: a worker thread that reads newline-delimited records
//!   until idle, EOF or cancellation, reporting [`stream::StreamEvent`]s
//!   over a channel.
//!
//! [`listener::await_response`] covers the reverse direction, where the
//! instrument connects back to report a result.

pub mod client;
pub mod listener;
pub mod stream;

use crate::error::{Error, Result};
use crate::model::ProtocolFamily;
use log::trace;
use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub use client::{ClientConfig, TransportClient, TransportResult};
pub use listener::await_response;
pub use stream::{
    CANCELLED_REASON, LineAssembler, StreamConfig, StreamEvent, StreamSubscription, WorkerState,
};

/// Default instrument host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// A host and TCP port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Endpoint {
    /// Host name or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Endpoint on [`DEFAULT_HOST`].
    pub fn localhost(port: u16) -> Self {
        Self::new(DEFAULT_HOST, port)
    }

    /// Resolve to socket addresses.
    pub fn resolve(&self) -> Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port).to_socket_addrs()?.collect();
        if addrs.is_empty() {
            return Err(Error::Config(format!("{self} did not resolve to any address")));
        }
        Ok(addrs)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Send and receive endpoints of one protocol family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamilyEndpoints {
    /// Where configuration messages are sent.
    pub send: Endpoint,
    /// Where the instrument connects back with results.
    pub receive: Endpoint,
}

impl FamilyEndpoints {
    /// Default ports used by the instrument for `family`.
    pub fn defaults(family: ProtocolFamily) -> Self {
        let (send, receive) = match family {
            ProtocolFamily::Uart => (12345, 12346),
            ProtocolFamily::I2c => (9561, 9562),
        };
        Self {
            send: Endpoint::localhost(send),
            receive: Endpoint::localhost(receive),
        }
    }

    /// Replace the host of both endpoints.
    #[must_use]
    pub fn with_host(mut self, host: &str) -> Self {
        self.send.host = host.to_string();
        self.receive.host = host.to_string();
        self
    }
}

/// Shared cancellation flag for one request.
///
/// Clones observe the same flag. Once cancelled a token stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Connect to the first reachable address of `endpoint`.
pub(crate) fn connect(endpoint: &Endpoint, timeout: Duration) -> io::Result<TcpStream> {
    let addrs = endpoint
        .resolve()
        .map_err(|e| io::Error::new(io::ErrorKind::AddrNotAvailable, e.to_string()))?;

    let mut last_err = None;
    for addr in addrs {
        trace!("Connecting to {addr} (timeout {timeout:?})");
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| io::Error::from(io::ErrorKind::AddrNotAvailable)))
}

/// Whether a read error means "no data yet" rather than a broken socket.
pub(crate) fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Keep printable characters and whitespace, drop a leading BOM, trim.
pub fn sanitize_response(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| *c != '\u{feff}' && (!c.is_control() || c.is_whitespace()))
        .collect();
    cleaned.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_default_ports() {
        let uart = FamilyEndpoints::defaults(ProtocolFamily::Uart);
        assert_eq!(uart.send, Endpoint::localhost(12345));
        assert_eq!(uart.receive.port, 12346);

        let i2c = FamilyEndpoints::defaults(ProtocolFamily::I2c).with_host("10.0.0.2");
        assert_eq!(i2c.send.to_string(), "10.0.0.2:9561");
        assert_eq!(i2c.receive.to_string(), "10.0.0.2:9562");
    }

    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_sanitize_response() {
        assert_eq!(sanitize_response("\u{feff}  ACK\r\n"), "ACK");
        assert_eq!(sanitize_response("a\u{0}b\u{7}c\td"), "abc\td");
        assert_eq!(sanitize_response("\u{1}\u{2}"), "");
    }

    #[test]
    fn test_endpoint_resolve() {
        let addrs = Endpoint::localhost(4000).resolve().unwrap();
        assert!(addrs.iter().all(|a| a.port() == 4000));
    }
}

//! Request/response transport client.

use crate::error::{Error, Result};
use crate::protocol::message::WireMessage;
use crate::transport::{Endpoint, connect, is_timeout, sanitize_response};
use log::{debug, info, trace, warn};
use std::fmt;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

/// Sentinel returned in place of text when the instrument stayed silent.
pub const NO_RESPONSE: &str = "No Response";

/// Prefix of the sentinel returned in place of text on transport errors.
pub const ERROR_PREFIX: &str = "Error:";

/// Smallest timeout handed to the socket; the OS rejects zero.
const MIN_SOCKET_TIMEOUT: Duration = Duration::from_millis(1);

/// Transport client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Timeout of a single connect attempt.
    pub connect_timeout: Duration,
    /// How long to wait for the response after sending.
    pub response_timeout: Duration,
    /// Number of connect attempts (at least one is always made).
    pub max_retries: usize,
    /// Delay between connect attempts.
    pub retry_delay: Duration,
    /// Pause between the write and the read.
    pub settle_delay: Duration,
    /// Pause before the first connect attempt, giving the instrument time
    /// to start listening.
    pub warmup_delay: Duration,
    /// Maximum number of bytes read as the response.
    pub read_buffer_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            response_timeout: Duration::from_secs(50),
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            settle_delay: Duration::from_secs(1),
            warmup_delay: Duration::from_secs(2),
            read_buffer_size: 4096,
        }
    }
}

impl ClientConfig {
    /// Set the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the response timeout.
    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set the number of connect attempts.
    #[must_use]
    pub fn with_max_retries(mut self, retries: usize) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the delay between connect attempts.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the pause between write and read.
    #[must_use]
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Set the pause before the first connect attempt.
    #[must_use]
    pub fn with_warmup_delay(mut self, delay: Duration) -> Self {
        self.warmup_delay = delay;
        self
    }

    /// Set the response buffer size.
    #[must_use]
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }
}

/// Outcome of one request/response exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportResult {
    /// Sanitized response text, never empty.
    Ok(String),
    /// Connected, but no bytes arrived before the deadline.
    Timeout,
    /// The instrument was unreachable or the socket failed.
    ConnectionFailed(String),
    /// Bytes arrived but none of them were usable text.
    ProtocolError(String),
}

impl TransportResult {
    /// Whether a response was received.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// Response text, if any.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Ok(text) => Some(text),
            _ => None,
        }
    }

    /// Text handed to the classifier: the response itself, or the
    /// `No Response` / `Error: ...` sentinel.
    pub fn as_response_text(&self) -> String {
        match self {
            Self::Ok(text) => text.clone(),
            Self::Timeout => NO_RESPONSE.to_string(),
            Self::ConnectionFailed(reason) | Self::ProtocolError(reason) => {
                format!("{ERROR_PREFIX} {reason}")
            },
        }
    }

    /// Convert into a `Result`, mapping failures to typed errors.
    pub fn into_result(self) -> Result<String> {
        match self {
            Self::Ok(text) => Ok(text),
            Self::Timeout => Err(Error::Timeout("no response from instrument".into())),
            Self::ConnectionFailed(reason) => Err(Error::ConnectionFailed(reason)),
            Self::ProtocolError(reason) => Err(Error::Protocol(reason)),
        }
    }
}

impl fmt::Display for TransportResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok(text) => write!(f, "Response received ({} bytes)", text.len()),
            Self::Timeout => write!(f, "Timed out waiting for instrument response"),
            Self::ConnectionFailed(reason) => write!(f, "Connection failed: {reason}"),
            Self::ProtocolError(reason) => write!(f, "Protocol error: {reason}"),
        }
    }
}

/// Sends one message per connection and reads one response block.
#[derive(Debug, Clone, Default)]
pub struct TransportClient {
    config: ClientConfig,
}

impl TransportClient {
    /// Create a client.
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send `message` to `endpoint` and wait for one response.
    ///
    /// The connection is opened for this exchange only and is closed on
    /// every path out of this function.
    pub fn send(&self, message: &WireMessage, endpoint: &Endpoint) -> TransportResult {
        if !self.config.warmup_delay.is_zero() {
            debug!("Waiting {:?} before connecting", self.config.warmup_delay);
            thread::sleep(self.config.warmup_delay);
        }

        let mut stream = match self.connect_with_retry(endpoint) {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Could not reach instrument at {endpoint}: {e}");
                return TransportResult::ConnectionFailed(e.to_string());
            },
        };

        let result = self.exchange(&mut stream, message);
        match &result {
            TransportResult::Ok(text) => debug!("Response from {endpoint}: {text}"),
            other => warn!("{endpoint}: {other}"),
        }
        result
    }

    fn connect_with_retry(&self, endpoint: &Endpoint) -> io::Result<TcpStream> {
        let attempts = self.config.max_retries.max(1);
        let timeout = self.config.connect_timeout.max(MIN_SOCKET_TIMEOUT);
        info!("Connecting to instrument at {endpoint}");

        let mut last_err = None;
        for attempt in 1..=attempts {
            match connect(endpoint, timeout) {
                Ok(stream) => {
                    debug!("Connected to {endpoint} (attempt {attempt}/{attempts})");
                    return Ok(stream);
                },
                Err(e) => {
                    if attempt < attempts {
                        warn!("Connection failed (attempt {attempt}/{attempts}): {e}");
                        thread::sleep(self.config.retry_delay);
                    }
                    last_err = Some(e);
                },
            }
        }

        Err(last_err.unwrap_or_else(|| io::Error::from(io::ErrorKind::NotConnected)))
    }

    fn exchange(&self, stream: &mut TcpStream, message: &WireMessage) -> TransportResult {
        let timeout = Some(self.config.response_timeout.max(MIN_SOCKET_TIMEOUT));
        let bytes = message.to_wire_bytes();
        trace!("Sending {} bytes:\n{message}", bytes.len());

        let written = stream
            .set_write_timeout(timeout)
            .and_then(|()| stream.write_all(&bytes))
            .and_then(|()| stream.flush());
        if let Err(e) = written {
            return TransportResult::ConnectionFailed(e.to_string());
        }

        if !self.config.settle_delay.is_zero() {
            thread::sleep(self.config.settle_delay);
        }

        if let Err(e) = stream.set_read_timeout(timeout) {
            return TransportResult::ConnectionFailed(e.to_string());
        }

        let mut buf = vec![0u8; self.config.read_buffer_size.max(1)];
        match stream.read(&mut buf) {
            Ok(0) => {
                debug!("Instrument closed the connection without responding");
                TransportResult::Timeout
            },
            Ok(n) => {
                trace!("Raw response bytes: {:?}", &buf[..n]);
                let decoded = String::from_utf8_lossy(&buf[..n]).replace('\u{fffd}', "");
                let text = sanitize_response(&decoded);
                if text.is_empty() {
                    TransportResult::ProtocolError(format!(
                        "{n} bytes received but no printable text"
                    ))
                } else {
                    TransportResult::Ok(text)
                }
            },
            Err(e) if is_timeout(&e) => TransportResult::Timeout,
            Err(e) => TransportResult::ConnectionFailed(e.to_string()),
        }
    }
}

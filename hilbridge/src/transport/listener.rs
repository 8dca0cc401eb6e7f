//! Reverse-direction listener.
//!
//! Some instrument setups report results by connecting back to the host on
//! a separate receive port instead of answering on the request socket.

use crate::transport::client::TransportResult;
use crate::transport::{Endpoint, is_timeout, sanitize_response};
use log::{debug, info, warn};
use std::io::{self, Read};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

/// Default time to wait for the instrument to connect back.
pub const DEFAULT_LISTEN_TIMEOUT: Duration = Duration::from_secs(30);

/// Size of the single read taken from the instrument.
pub const RESPONSE_BLOCK_SIZE: usize = 1024;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Bind `endpoint` and wait up to `timeout` for one connection carrying a
/// response block.
pub fn await_response(endpoint: &Endpoint, timeout: Duration) -> TransportResult {
    let listener = match bind(endpoint) {
        Ok(listener) => listener,
        Err(e) => {
            warn!("Cannot listen on {endpoint}: {e}");
            return TransportResult::ConnectionFailed(e.to_string());
        },
    };
    info!("Listening for instrument response on {endpoint}");
    accept_one(&listener, timeout)
}

fn bind(endpoint: &Endpoint) -> io::Result<TcpListener> {
    let listener = TcpListener::bind((endpoint.host.as_str(), endpoint.port))?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}

/// Wait for one connection on an already bound, non-blocking listener.
pub(crate) fn accept_one(listener: &TcpListener, timeout: Duration) -> TransportResult {
    let deadline = Instant::now() + timeout;

    let stream = loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!("Instrument connected from {peer}");
                break stream;
            },
            Err(e) if is_timeout(&e) => {
                if Instant::now() >= deadline {
                    warn!("No instrument connection within {timeout:?}");
                    return TransportResult::Timeout;
                }
                thread::sleep(ACCEPT_POLL_INTERVAL);
            },
            Err(e) => return TransportResult::ConnectionFailed(e.to_string()),
        }
    };

    let remaining = deadline.saturating_duration_since(Instant::now());
    read_block(stream, remaining.max(Duration::from_millis(1)))
}

fn read_block(mut stream: TcpStream, timeout: Duration) -> TransportResult {
    if let Err(e) = stream
        .set_nonblocking(false)
        .and_then(|()| stream.set_read_timeout(Some(timeout)))
    {
        return TransportResult::ConnectionFailed(e.to_string());
    }

    let mut buf = [0u8; RESPONSE_BLOCK_SIZE];
    match stream.read(&mut buf) {
        Ok(0) => TransportResult::Timeout,
        Ok(n) => {
            let text = sanitize_response(&String::from_utf8_lossy(&buf[..n]));
            if text.is_empty() {
                TransportResult::ProtocolError(format!("{n} bytes received but no printable text"))
            } else {
                info!("Received response data: {text}");
                TransportResult::Ok(text)
            }
        },
        Err(e) if is_timeout(&e) => TransportResult::Timeout,
        Err(e) => TransportResult::ConnectionFailed(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn bound() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[test]
    fn test_accept_one_reads_block() {
        let (listener, port) = bound();
        thread::spawn(move || {
            let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
            stream.write_all(b"PASS\r\n").unwrap();
        });
        let result = accept_one(&listener, Duration::from_secs(2));
        assert_eq!(result, TransportResult::Ok("PASS".into()));
    }

    #[test]
    fn test_accept_one_times_out_without_peer() {
        let (listener, _) = bound();
        let result = accept_one(&listener, Duration::from_millis(100));
        assert_eq!(result, TransportResult::Timeout);
    }

    #[test]
    fn test_accept_one_peer_sends_nothing() {
        let (listener, port) = bound();
        thread::spawn(move || {
            let _stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        });
        let result = accept_one(&listener, Duration::from_secs(2));
        assert_eq!(result, TransportResult::Timeout);
    }

    #[test]
    fn test_await_response_bind_conflict() {
        let (_listener, port) = bound();
        let result = await_response(&Endpoint::localhost(port), Duration::from_millis(50));
        assert!(matches!(result, TransportResult::ConnectionFailed(_)));
    }
}

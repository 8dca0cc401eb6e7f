//! # hilbridge
//!
//! Instrument communication for hardware-in-the-loop UART and I2C tests.
//!
//! The test instrument listens on TCP and is driven with small INI-style
//! configuration messages. This crate provides:
//!
//! - Hex token and register address normalization
//! - Wire message encoding for UART and I2C test configurations
//! - A request/response transport client with connect retries and timeouts
//! - A streaming worker for tests that answer line by line
//! - Per-channel sessions with supersession of running streams
//! - Classification of responses into typed results
//!
//! ## Features
//!
//! - `serde`: Serialization support for configuration and result types
//!
//! ## Example
//!
//! ```rust,no_run
//! use hilbridge::{
//!     BaseConfig, Channel, Dispatch, FamilyEndpoints, PayloadConfig, ProtocolFamily,
//!     TestSession, UartBaseConfig, UartPayloadConfig, UartTest,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let endpoints = FamilyEndpoints::defaults(ProtocolFamily::Uart);
//!     let mut session = TestSession::new(ProtocolFamily::Uart, Channel::new(endpoints.send));
//!
//!     session.submit_configuration(BaseConfig::Uart(UartBaseConfig {
//!         test_name: UartTest::Loopback,
//!         baud_rate: 9600,
//!         ..UartBaseConfig::default()
//!     }))?;
//!
//!     let payload = PayloadConfig::Uart(UartPayloadConfig::new("hello"));
//!     if let Dispatch::Single { classified, .. } = session.dispatch(&payload)? {
//!         println!("{classified}");
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod classify;
pub mod error;
pub mod model;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use {
    classify::{
        AutoBaudResult, AutoBaudStatus, BaudScanResult, GenericResult, StreamRecord, Verdict,
        classify_auto_baud_line, classify_baud_line, classify_generic, classify_stream_line,
        classify_transport,
    },
    error::{Error, Result},
    model::{
        BaseConfig, I2cBaseConfig, I2cPayloadConfig, I2cTest, PayloadConfig, ProtocolFamily,
        RegisterSize, ResponseMode, TestCaseKind, UartBaseConfig, UartPayloadConfig, UartTest,
    },
    protocol::{ByteWidth, WireMessage, encode},
    session::{Channel, Dispatch, TestSession},
    transport::{
        CANCELLED_REASON, CancelToken, ClientConfig, Endpoint, FamilyEndpoints, StreamConfig,
        StreamEvent, StreamSubscription, TransportClient, TransportResult, WorkerState,
        await_response,
    },
};

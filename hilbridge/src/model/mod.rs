//! Test configuration model.
//!
//! A test run is described by two values: a [`BaseConfig`] holding the
//! protocol-wide settings, submitted once per "add configuration", and a
//! [`PayloadConfig`] holding the per-send data. Both are plain values owned
//! by the caller; the encoder only borrows them.

pub mod i2c;
pub mod uart;

use crate::error::{Error, Result};
use std::fmt;

pub use i2c::{I2cBaseConfig, I2cPayloadConfig, I2cTest, RegisterSize};
pub use uart::{BitOrder, Handshake, Parity, StopBits, UartBaseConfig, UartPayloadConfig, UartTest};

/// Protocol family served by the instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum ProtocolFamily {
    /// UART tests.
    Uart,
    /// I2C tests.
    I2c,
}

impl ProtocolFamily {
    /// Section header that opens every wire message of this family.
    pub fn section_header(self) -> &'static str {
        match self {
            Self::Uart => "[SerialPort]",
            Self::I2c => "[I2CConfig]",
        }
    }

    /// Get the protocol family from a string name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "uart" | "serial" => Some(Self::Uart),
            "i2c" | "iic" => Some(Self::I2c),
            _ => None,
        }
    }
}

impl fmt::Display for ProtocolFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uart => write!(f, "UART"),
            Self::I2c => write!(f, "I2C"),
        }
    }
}

/// How the instrument's reply to a test case is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestCaseKind {
    /// Response must echo the transmitted data.
    Loopback,
    /// Response carries numeric register data.
    Read,
    /// Response reports what the instrument received.
    Reception,
    /// Stream of `min_baud,min_err,max_baud,max_err` lines.
    BaudScan,
    /// Stream of `scalar_baud,max_baud` lines.
    AutoBaud,
    /// Any other test; ACK detection only.
    Other,
}

impl TestCaseKind {
    /// Whether the instrument replies with one block or a stream of lines.
    pub fn response_mode(self) -> ResponseMode {
        match self {
            Self::BaudScan | Self::AutoBaud => ResponseMode::Streaming,
            _ => ResponseMode::Single,
        }
    }
}

/// Shape of the instrument's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// One terminal answer, read by the transport client.
    Single,
    /// Newline-delimited records, read by the streaming worker.
    Streaming,
}

/// Protocol-wide settings for one test family.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(untagged))]
pub enum BaseConfig {
    /// UART settings.
    Uart(UartBaseConfig),
    /// I2C settings.
    I2c(I2cBaseConfig),
}

impl BaseConfig {
    /// Protocol family of this configuration.
    pub fn family(&self) -> ProtocolFamily {
        match self {
            Self::Uart(_) => ProtocolFamily::Uart,
            Self::I2c(_) => ProtocolFamily::I2c,
        }
    }

    /// Classification kind of the selected test case.
    pub fn test_kind(&self) -> TestCaseKind {
        match self {
            Self::Uart(c) => c.test_name.kind(),
            Self::I2c(c) => c.test_name.kind(),
        }
    }

    /// Wire name of the selected test case.
    pub fn test_name(&self) -> &'static str {
        match self {
            Self::Uart(c) => c.test_name.wire_name(),
            Self::I2c(c) => c.test_name.wire_name(),
        }
    }

    /// Check field ranges and address syntax.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Uart(c) => c.validate(),
            Self::I2c(c) => c.validate(),
        }
    }
}

impl From<UartBaseConfig> for BaseConfig {
    fn from(config: UartBaseConfig) -> Self {
        Self::Uart(config)
    }
}

impl From<I2cBaseConfig> for BaseConfig {
    fn from(config: I2cBaseConfig) -> Self {
        Self::I2c(config)
    }
}

/// Per-send data for one test family.
///
/// I2C is listed first so untagged deserialization tries the richer shape
/// before falling back to UART.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(untagged))]
pub enum PayloadConfig {
    /// I2C payload.
    I2c(I2cPayloadConfig),
    /// UART payload.
    Uart(UartPayloadConfig),
}

impl PayloadConfig {
    /// Protocol family of this payload.
    pub fn family(&self) -> ProtocolFamily {
        match self {
            Self::Uart(_) => ProtocolFamily::Uart,
            Self::I2c(_) => ProtocolFamily::I2c,
        }
    }

    /// The data as it was transmitted, used for loopback comparison.
    pub fn message_data(&self) -> &str {
        match self {
            Self::Uart(p) => &p.message_data,
            Self::I2c(p) => &p.message_data,
        }
    }

    /// Declared length in bytes.
    pub fn data_length(&self) -> usize {
        match self {
            Self::Uart(p) => p.data_length,
            Self::I2c(p) => p.data_length,
        }
    }

    /// Check the payload before it is encoded. UART data is free text.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Uart(_) => Ok(()),
            Self::I2c(p) => p.validate(),
        }
    }
}

impl From<UartPayloadConfig> for PayloadConfig {
    fn from(payload: UartPayloadConfig) -> Self {
        Self::Uart(payload)
    }
}

impl From<I2cPayloadConfig> for PayloadConfig {
    fn from(payload: I2cPayloadConfig) -> Self {
        Self::I2c(payload)
    }
}

/// Fail unless `base` and `payload` belong to the same protocol family.
pub fn ensure_same_family(base: &BaseConfig, payload: &PayloadConfig) -> Result<()> {
    if base.family() == payload.family() {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "{} payload cannot be sent with a {} base configuration",
            payload.family(),
            base.family()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_from_name() {
        assert_eq!(ProtocolFamily::from_name("UART"), Some(ProtocolFamily::Uart));
        assert_eq!(ProtocolFamily::from_name("i2c"), Some(ProtocolFamily::I2c));
        assert_eq!(ProtocolFamily::from_name("spi"), None);
    }

    #[test]
    fn test_section_headers() {
        assert_eq!(ProtocolFamily::Uart.section_header(), "[SerialPort]");
        assert_eq!(ProtocolFamily::I2c.section_header(), "[I2CConfig]");
    }

    #[test]
    fn test_ensure_same_family() {
        let base = BaseConfig::from(UartBaseConfig::default());
        let uart = PayloadConfig::from(UartPayloadConfig::new("hello"));
        let i2c = PayloadConfig::from(I2cPayloadConfig::default());
        assert!(ensure_same_family(&base, &uart).is_ok());
        assert!(matches!(
            ensure_same_family(&base, &i2c),
            Err(Error::Config(_))
        ));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_untagged_json_picks_family() {
        let base: BaseConfig = serde_json::from_str(
            r#"{"test_name":"read test","device_address":"0x50","clock_speed":"Fast (400 kHz)",
                "addressing_mode":"7-bit","bus_mode":"MSB First"}"#,
        )
        .unwrap();
        assert_eq!(base.family(), ProtocolFamily::I2c);
        assert_eq!(base.test_name(), "READ TEST");

        let payload: PayloadConfig =
            serde_json::from_str(r#"{"message_data":"hello","data_length":5}"#).unwrap();
        assert_eq!(payload.family(), ProtocolFamily::Uart);

        let bad: std::result::Result<PayloadConfig, _> = serde_json::from_str(
            r#"{"message_data":"0x01","data_length":1,"register_size":12}"#,
        );
        assert!(bad.is_err());
    }
}

//! UART test configuration.

use crate::error::{Error, Result};
use crate::model::{ResponseMode, TestCaseKind};
use std::fmt;

/// UART test cases understood by the instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "String", into = "String")
)]
pub enum UartTest {
    /// Instrument receives data from the device under test.
    #[default]
    Reception,
    /// Instrument transmits data to the device under test.
    Transmission,
    /// Data is echoed back and compared.
    Loopback,
    /// Scan of the tolerated baud-rate window.
    BaudRate,
    /// RTS/CTS hardware flow control.
    HardwareFlow,
    /// Parity error detection.
    ParityDetection,
    /// Receiver overrun detection.
    OverrunDetection,
    /// Break character configuration.
    BreakCharacter,
    /// Automatic baud-rate detection.
    AutoBaud,
}

impl UartTest {
    /// All UART test cases in menu order.
    pub const ALL: [Self; 9] = [
        Self::Reception,
        Self::Transmission,
        Self::Loopback,
        Self::BaudRate,
        Self::HardwareFlow,
        Self::ParityDetection,
        Self::OverrunDetection,
        Self::BreakCharacter,
        Self::AutoBaud,
    ];

    /// Name sent on the wire as `test_name`.
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Reception => "RECEPTION TEST",
            Self::Transmission => "TRANSMISSION TEST",
            Self::Loopback => "LOOPBACK TEST",
            Self::BaudRate => "BAUD RATE TESTING",
            Self::HardwareFlow => "RTS/CTS HARDWARE FLOW TEST",
            Self::ParityDetection => "PARITY DETECTION",
            Self::OverrunDetection => "OVERRUN DETECTION",
            Self::BreakCharacter => "BREAK CHARACTER CONFIGURATION",
            Self::AutoBaud => "AUTO BAUD RATE DETECTION",
        }
    }

    /// Parse a test name, ignoring case and surrounding whitespace.
    pub fn from_name(name: &str) -> Option<Self> {
        let wanted = name.trim().to_uppercase();
        Self::ALL
            .into_iter()
            .find(|t| t.wire_name() == wanted)
    }

    /// How responses to this test are classified.
    pub fn kind(self) -> TestCaseKind {
        match self {
            Self::Loopback => TestCaseKind::Loopback,
            Self::Reception => TestCaseKind::Reception,
            Self::BaudRate => TestCaseKind::BaudScan,
            Self::AutoBaud => TestCaseKind::AutoBaud,
            _ => TestCaseKind::Other,
        }
    }

    /// Whether the instrument replies with one block or a stream of lines.
    pub fn response_mode(self) -> ResponseMode {
        self.kind().response_mode()
    }
}

impl fmt::Display for UartTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl TryFrom<String> for UartTest {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::from_name(&value)
            .ok_or_else(|| Error::Validation(format!("unknown UART test case: {value}")))
    }
}

impl From<UartTest> for String {
    fn from(test: UartTest) -> Self {
        test.wire_name().to_string()
    }
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Parity {
    /// No parity.
    #[default]
    None,
    /// Even parity.
    Even,
    /// Odd parity.
    Odd,
}

impl Parity {
    /// Numeric code expected by the instrument.
    pub fn instrument_code(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Even => 10,
            Self::Odd => 20,
        }
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "f64", into = "f64")
)]
pub enum StopBits {
    /// 0.5 stop bits.
    Half,
    /// 1 stop bit.
    #[default]
    One,
    /// 1.5 stop bits.
    OneAndHalf,
    /// 2 stop bits.
    Two,
}

impl StopBits {
    /// Stop bits as a number.
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Half => 0.5,
            Self::One => 1.0,
            Self::OneAndHalf => 1.5,
            Self::Two => 2.0,
        }
    }

    /// Numeric code expected by the instrument (tenths of a stop bit).
    pub fn instrument_code(self) -> u8 {
        match self {
            Self::Half => 5,
            Self::One => 10,
            Self::OneAndHalf => 15,
            Self::Two => 20,
        }
    }
}

impl TryFrom<f64> for StopBits {
    type Error = Error;

    fn try_from(value: f64) -> Result<Self> {
        [Self::Half, Self::One, Self::OneAndHalf, Self::Two]
            .into_iter()
            .find(|s| (s.as_f64() - value).abs() < f64::EPSILON)
            .ok_or_else(|| Error::Validation(format!("unsupported stop bits: {value}")))
    }
}

impl From<StopBits> for f64 {
    fn from(stop_bits: StopBits) -> Self {
        stop_bits.as_f64()
    }
}

/// Bit order on the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BitOrder {
    /// Most significant bit first.
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "MSB First"))]
    MsbFirst,
    /// Least significant bit first.
    #[cfg_attr(feature = "serde", serde(rename = "LSB First"))]
    LsbFirst,
}

impl fmt::Display for BitOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MsbFirst => write!(f, "MSB First"),
            Self::LsbFirst => write!(f, "LSB First"),
        }
    }
}

/// Flow control handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Handshake {
    /// No flow control.
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "OFF"))]
    Off,
    /// Hardware flow control.
    #[cfg_attr(feature = "serde", serde(rename = "RTS/CTS"))]
    RtsCts,
    /// Software flow control.
    #[cfg_attr(feature = "serde", serde(rename = "Xon/Xoff"))]
    XonXoff,
}

impl fmt::Display for Handshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => write!(f, "OFF"),
            Self::RtsCts => write!(f, "RTS/CTS"),
            Self::XonXoff => write!(f, "Xon/Xoff"),
        }
    }
}

/// Protocol-wide UART settings.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(deny_unknown_fields)
)]
pub struct UartBaseConfig {
    /// Selected test case.
    pub test_name: UartTest,
    /// Free-form identifier of the device under test.
    pub device_id: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Data bits per character (5-9).
    pub data_bits: u8,
    /// Parity mode.
    pub parity: Parity,
    /// Stop bits.
    pub stop_bits: StopBits,
    /// Bit order.
    pub data_shift: BitOrder,
    /// Flow control.
    pub handshake: Handshake,
}

impl Default for UartBaseConfig {
    fn default() -> Self {
        Self {
            test_name: UartTest::default(),
            device_id: String::new(),
            baud_rate: 115200,
            data_bits: 8,
            parity: Parity::default(),
            stop_bits: StopBits::default(),
            data_shift: BitOrder::default(),
            handshake: Handshake::default(),
        }
    }
}

impl UartBaseConfig {
    /// Check field ranges.
    pub fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(Error::Validation("baud rate must be non-zero".into()));
        }
        if !(5..=9).contains(&self.data_bits) {
            return Err(Error::Validation(format!(
                "data bits must be between 5 and 9, got {}",
                self.data_bits
            )));
        }
        Ok(())
    }
}

/// Per-send UART data.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(deny_unknown_fields)
)]
pub struct UartPayloadConfig {
    /// Free-text message.
    pub message_data: String,
    /// Declared length in bytes.
    pub data_length: usize,
}

impl UartPayloadConfig {
    /// Create a payload whose declared length is the message length.
    pub fn new(message_data: impl Into<String>) -> Self {
        let message_data = message_data.into();
        let data_length = message_data.len();
        Self {
            message_data,
            data_length,
        }
    }

    /// Payload sent when a streaming test is started without user data.
    pub fn default_for(test: UartTest) -> Option<Self> {
        match test {
            UartTest::BaudRate => Some(Self {
                message_data: "a".into(),
                data_length: 1,
            }),
            UartTest::AutoBaud => Some(Self {
                message_data: "AUTO_BAUD_RATE_DETECTION".into(),
                data_length: 0,
            }),
            _ => None,
        }
    }
}

//! I2C test configuration.

use crate::error::{Error, Result};
use crate::model::{ResponseMode, TestCaseKind};
use crate::protocol::hex::{self, ByteWidth};
use std::fmt;

/// I2C test cases understood by the instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "String", into = "String")
)]
pub enum I2cTest {
    /// Register read.
    #[default]
    Read,
    /// Register write.
    Write,
    /// Repeated start condition.
    RepeatedStart,
    /// Addressing modes.
    Addressing,
    /// Clock stretching by the target.
    ClockStretching,
    /// ACK/NACK detection.
    AckNackDetection,
    /// Multi-controller bus arbitration.
    BusArbitration,
    /// General call address.
    GeneralCall,
    /// Device ID read.
    DeviceId,
    /// Bus timeout detection.
    TimeoutDetection,
    /// Noise rejection.
    NoiseDetection,
}

impl I2cTest {
    /// All I2C test cases in menu order.
    pub const ALL: [Self; 11] = [
        Self::Read,
        Self::Write,
        Self::RepeatedStart,
        Self::Addressing,
        Self::ClockStretching,
        Self::AckNackDetection,
        Self::BusArbitration,
        Self::GeneralCall,
        Self::DeviceId,
        Self::TimeoutDetection,
        Self::NoiseDetection,
    ];

    /// Name sent on the wire as `test_name`.
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Read => "READ TEST",
            Self::Write => "WRITE TEST",
            Self::RepeatedStart => "REPEATED START TEST",
            Self::Addressing => "ADDRESSING TEST",
            Self::ClockStretching => "CLOCK STRETCHING TEST",
            Self::AckNackDetection => "ACK/NACK DETECTION TEST",
            Self::BusArbitration => "BUS ARBITRATION TEST",
            Self::GeneralCall => "GENERAL CALL TEST",
            Self::DeviceId => "DEVICE ID TEST",
            Self::TimeoutDetection => "TIMEOUT DETECTION TEST",
            Self::NoiseDetection => "NOISE DETECTION TEST",
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
            Self::Read => TestCaseKind::Read,
            _ => TestCaseKind::Other,
        }
    }

    /// Whether the instrument replies with one block or a stream of lines.
    pub fn response_mode(self) -> ResponseMode {
        self.kind().response_mode()
    }
}

impl fmt::Display for I2cTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl TryFrom<String> for I2cTest {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::from_name(&value)
            .ok_or_else(|| Error::Validation(format!("unknown I2C test case: {value}")))
    }
}

impl From<I2cTest> for String {
    fn from(test: I2cTest) -> Self {
        test.wire_name().to_string()
    }
}

/// Width of a register address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "u32", into = "u32")
)]
pub enum RegisterSize {
    /// 8-bit register address.
    #[default]
    Bits8,
    /// 16-bit register address, sent as high and low byte.
    Bits16,
}

impl RegisterSize {
    /// Size in bits.
    pub fn bits(self) -> u32 {
        match self {
            Self::Bits8 => 8,
            Self::Bits16 => 16,
        }
    }

    /// Number of hex digits in one address.
    pub fn hex_digits(self) -> usize {
        match self {
            Self::Bits8 => 2,
            Self::Bits16 => 4,
        }
    }
}

impl TryFrom<u32> for RegisterSize {
    type Error = Error;

    fn try_from(bits: u32) -> Result<Self> {
        match bits {
            8 => Ok(Self::Bits8),
            16 => Ok(Self::Bits16),
            _ => Err(Error::Validation(format!(
                "register size must be 8 or 16 bits, got {bits}"
            ))),
        }
    }
}

impl From<RegisterSize> for u32 {
    fn from(size: RegisterSize) -> Self {
        size.bits()
    }
}

impl fmt::Display for RegisterSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

/// Protocol-wide I2C settings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct I2cBaseConfig {
    /// Selected test case.
    pub test_name: I2cTest,
    /// Target device address, e.g. `0x50`.
    pub device_address: String,
    /// Bus speed label, e.g. `Standard (100 kHz)`.
    pub clock_speed: String,
    /// `7-bit` or `10-bit`.
    pub addressing_mode: String,
    /// Register address used by tests other than read/write.
    #[cfg_attr(feature = "serde", serde(default))]
    pub register_address: String,
    /// Register address used by the read test.
    #[cfg_attr(feature = "serde", serde(default))]
    pub read_address: String,
    /// Register address used by the write test.
    #[cfg_attr(feature = "serde", serde(default))]
    pub write_address: String,
    /// Frame format label, e.g. `MSB First`.
    pub bus_mode: String,
}

impl Default for I2cBaseConfig {
    fn default() -> Self {
        Self {
            test_name: I2cTest::default(),
            device_address: String::new(),
            clock_speed: "Standard (100 kHz)".into(),
            addressing_mode: "7-bit".into(),
            register_address: String::new(),
            read_address: String::new(),
            write_address: String::new(),
            bus_mode: "MSB First".into(),
        }
    }
}

impl I2cBaseConfig {
    /// Register address the instrument should use for this test case.
    pub fn test_register_address(&self) -> &str {
        match self.test_name {
            I2cTest::Read => &self.read_address,
            I2cTest::Write => &self.write_address,
            _ => &self.register_address,
        }
    }

    /// Check that addresses are well-formed hex.
    pub fn validate(&self) -> Result<()> {
        if self.device_address.trim().is_empty() {
            return Err(Error::Validation("device address is required".into()));
        }
        let address = hex::parse_value(&self.device_address)?;
        let limit = if self.addressing_mode.trim().starts_with("10") {
            0x3FF
        } else {
            0xFF
        };
        if address > limit {
            return Err(Error::Validation(format!(
                "device address {} exceeds {} addressing",
                self.device_address, self.addressing_mode
            )));
        }
        for address in [&self.register_address, &self.read_address, &self.write_address] {
            if !address.trim().is_empty() {
                hex::split_register_address(address, RegisterSize::Bits8)?;
            }
        }
        Ok(())
    }
}

/// Per-send I2C data.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct I2cPayloadConfig {
    /// Normalized, space-separated hex bytes (empty for reads).
    pub message_data: String,
    /// Declared length in bytes.
    pub data_length: usize,
    /// Register address width.
    pub register_size: RegisterSize,
    /// Target register, if any.
    #[cfg_attr(feature = "serde", serde(default))]
    pub register_address: Option<String>,
}

impl I2cPayloadConfig {
    /// Build a write payload from user-entered hex tokens.
    ///
    /// Tokens are normalized to `width`; the declared length is the token
    /// count.
    pub fn write(
        raw_data: &str,
        width: ByteWidth,
        register_size: RegisterSize,
        register_address: Option<&str>,
    ) -> Result<Self> {
        let data = hex::normalize_data(raw_data, width)?;
        Ok(Self {
            message_data: data.text,
            data_length: data.len,
            register_size,
            register_address: normalize_register(register_address, register_size)?,
        })
    }

    /// Build a read request for `read_length` bytes.
    pub fn read(
        read_length: usize,
        register_size: RegisterSize,
        register_address: &str,
    ) -> Result<Self> {
        if register_address.trim().is_empty() {
            return Err(Error::Validation(
                "register address is required for a read test".into(),
            ));
        }
        Ok(Self {
            message_data: String::new(),
            data_length: read_length,
            register_size,
            register_address: normalize_register(Some(register_address), register_size)?,
        })
    }

    /// Check a payload built outside [`write`](Self::write) and
    /// [`read`](Self::read), e.g. one loaded from a file.
    ///
    /// Data tokens must be one- or two-byte hex values and their count
    /// must match `data_length`. Read payloads carry no data.
    pub fn validate(&self) -> Result<()> {
        if let Some(address) = &self.register_address {
            hex::split_register_address(address, self.register_size)?;
        }
        if self.message_data.trim().is_empty() {
            return Ok(());
        }
        let data = hex::normalize_data(&self.message_data, ByteWidth::One)
            .or_else(|_| hex::normalize_data(&self.message_data, ByteWidth::Two))?;
        if data.len != self.data_length {
            return Err(Error::Validation(format!(
                "data length {} does not match {} data values",
                self.data_length, data.len
            )));
        }
        Ok(())
    }
}

fn normalize_register(address: Option<&str>, size: RegisterSize) -> Result<Option<String>> {
    match address.map(str::trim) {
        None | Some("") => Ok(None),
        Some(address) => {
            // Reject early so a bad address never reaches the encoder.
            hex::split_register_address(address, size)?;
            Ok(Some(address.to_lowercase()))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_size_try_from() {
        assert_eq!(RegisterSize::try_from(8).ok(), Some(RegisterSize::Bits8));
        assert_eq!(RegisterSize::try_from(16).ok(), Some(RegisterSize::Bits16));
        assert!(matches!(
            RegisterSize::try_from(12),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_i2c_test_from_name() {
        assert_eq!(I2cTest::from_name("Read Test"), Some(I2cTest::Read));
        assert_eq!(
            I2cTest::from_name("ACK/NACK Detection Test"),
            Some(I2cTest::AckNackDetection)
        );
        assert_eq!(I2cTest::from_name("LOOPBACK TEST"), None);
    }

    #[test]
    fn test_register_address_selection() {
        let mut base = I2cBaseConfig {
            register_address: "0x10".into(),
            read_address: "0x20".into(),
            write_address: "0x30".into(),
            ..I2cBaseConfig::default()
        };
        base.test_name = I2cTest::Read;
        assert_eq!(base.test_register_address(), "0x20");
        base.test_name = I2cTest::Write;
        assert_eq!(base.test_register_address(), "0x30");
        base.test_name = I2cTest::GeneralCall;
        assert_eq!(base.test_register_address(), "0x10");
    }

    #[test]
    fn test_validate_requires_device_address() {
        let base = I2cBaseConfig::default();
        assert!(matches!(base.validate(), Err(Error::Validation(_))));

        let base = I2cBaseConfig {
            device_address: "0x50".into(),
            ..I2cBaseConfig::default()
        };
        assert!(base.validate().is_ok());

        let base = I2cBaseConfig {
            device_address: "0x2A0".into(),
            ..I2cBaseConfig::default()
        };
        assert!(base.validate().is_err());
        let base = I2cBaseConfig {
            addressing_mode: "10-bit".into(),
            ..base
        };
        assert!(base.validate().is_ok());
    }

    #[test]
    fn test_write_payload_normalizes_tokens() {
        let payload =
            I2cPayloadConfig::write("AB 3 0x0f", ByteWidth::One, RegisterSize::Bits8, Some("0x1A"))
                .unwrap();
        assert_eq!(payload.message_data, "0xab 0x03 0x0f");
        assert_eq!(payload.data_length, 3);
        assert_eq!(payload.register_address.as_deref(), Some("0x1a"));
    }

    #[test]
    fn test_write_payload_rejects_bad_token() {
        let result = I2cPayloadConfig::write("0xZZ", ByteWidth::One, RegisterSize::Bits8, None);
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_validate_loaded_payload() {
        let mut payload = I2cPayloadConfig {
            message_data: "0xZZ hello 3".into(),
            data_length: 99,
            register_size: RegisterSize::Bits8,
            register_address: None,
        };
        assert!(matches!(payload.validate(), Err(Error::Validation(_))));

        payload.message_data = "0xab 0xcd".into();
        assert!(matches!(payload.validate(), Err(Error::Validation(_))));

        payload.data_length = 2;
        assert!(payload.validate().is_ok());

        payload.message_data = "0x1234".into();
        payload.data_length = 1;
        assert!(payload.validate().is_ok());

        payload.register_address = Some("0x1FF".into());
        assert!(payload.validate().is_err());
    }

    #[test]
    fn test_validate_read_payload_without_data() {
        let payload = I2cPayloadConfig::read(4, RegisterSize::Bits8, "0x10").unwrap();
        assert!(payload.validate().is_ok());
    }

    #[test]
    fn test_read_payload_requires_register() {
        assert!(I2cPayloadConfig::read(4, RegisterSize::Bits8, "  ").is_err());
        let payload = I2cPayloadConfig::read(4, RegisterSize::Bits16, "0x1A3").unwrap();
        assert!(payload.message_data.is_empty());
        assert_eq!(payload.data_length, 4);
    }
}

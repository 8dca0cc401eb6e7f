//! Wire message encoder.
//!
//! The instrument reads a small INI-style block: one section header followed
//! by `key = value` lines, terminated by a newline.
//!
//! ```text
//! [I2CConfig]
//! test_name = READ TEST
//! device_address = '0x50'
//! clock_speed = Standard (100 kHz)
//! addressing_mode = 7-bit
//! bus_mode = MSB First
//! read_address = '0x10'
//! write_data = ''
//! write_length = 4
//! register_size = 16
//! register_address = 0x01, 0xa3
//! ```
//!
//! Values that may contain protocol-significant characters (addresses and
//! data) are single-quoted; numbers are bare decimal.

use crate::error::{Error, Result};
use crate::model::{
    BaseConfig, I2cBaseConfig, I2cPayloadConfig, PayloadConfig, ProtocolFamily, RegisterSize,
    UartBaseConfig, UartPayloadConfig, ensure_same_family,
};
use crate::protocol::hex::split_register_address;
use log::trace;
use std::fmt;

/// Line terminator appended before transmission.
pub const LINE_TERMINATOR: char = '\n';

/// Separator between register address tokens.
pub const TOKEN_SEPARATOR: &str = ", ";

/// An encoded configuration message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WireMessage {
    text: String,
}

impl WireMessage {
    /// Wrap already-encoded text.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Message text without the trailing terminator.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Bytes to put on the socket, terminator included.
    pub fn to_wire_bytes(&self) -> Vec<u8> {
        let mut bytes = self.text.clone().into_bytes();
        if !self.text.ends_with(LINE_TERMINATOR) {
            bytes.push(LINE_TERMINATOR as u8);
        }
        bytes
    }

    /// Iterate over `(key, value)` pairs, skipping the section header.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.text
            .lines()
            .filter_map(|line| line.split_once(" = "))
    }

    /// Look up the value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }
}

impl fmt::Display for WireMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Accumulates `key = value` lines under one section header.
struct MessageBuilder {
    lines: Vec<String>,
}

impl MessageBuilder {
    fn new(family: ProtocolFamily) -> Self {
        Self {
            lines: vec![family.section_header().to_string()],
        }
    }

    fn field(&mut self, key: &str, value: impl fmt::Display) -> &mut Self {
        self.lines.push(format!("{key} = {value}"));
        self
    }

    fn quoted(&mut self, key: &str, value: &str) -> &mut Self {
        self.lines.push(format!("{key} = '{value}'"));
        self
    }

    fn build(self) -> WireMessage {
        WireMessage {
            text: self.lines.join("\n"),
        }
    }
}

/// Encode a base configuration and payload into one wire message.
///
/// The output depends only on the inputs; encoding the same pair twice
/// yields byte-identical messages.
pub fn encode(base: &BaseConfig, payload: &PayloadConfig) -> Result<WireMessage> {
    ensure_same_family(base, payload)?;
    payload.validate()?;

    let message = match (base, payload) {
        (BaseConfig::Uart(base), PayloadConfig::Uart(payload)) => encode_uart(base, payload),
        (BaseConfig::I2c(base), PayloadConfig::I2c(payload)) => encode_i2c(base, payload)?,
        _ => return Err(Error::Config("mismatched protocol families".into())),
    };

    trace!("Encoded {} message:\n{message}", base.family());
    Ok(message)
}

fn encode_uart(base: &UartBaseConfig, payload: &UartPayloadConfig) -> WireMessage {
    let mut msg = MessageBuilder::new(ProtocolFamily::Uart);
    msg.field("test_name", base.test_name)
        .field("device_id", &base.device_id)
        .field("baud_rate", base.baud_rate)
        .field("databits", base.data_bits)
        .field("parity", base.parity.instrument_code())
        .field("stop_bits", base.stop_bits.instrument_code())
        .field("data_shift", base.data_shift)
        .field("handshake", base.handshake)
        .quoted("tx_data", &payload.message_data)
        .field("tx_length", payload.data_length);
    msg.build()
}

fn encode_i2c(base: &I2cBaseConfig, payload: &I2cPayloadConfig) -> Result<WireMessage> {
    let mut msg = MessageBuilder::new(ProtocolFamily::I2c);
    msg.field("test_name", base.test_name)
        .quoted("device_address", base.device_address.trim())
        .field("clock_speed", &base.clock_speed)
        .field("addressing_mode", &base.addressing_mode)
        .field("bus_mode", &base.bus_mode);

    if !base.read_address.trim().is_empty() {
        msg.quoted("read_address", base.read_address.trim());
    }
    if !base.write_address.trim().is_empty() {
        msg.quoted("write_address", base.write_address.trim());
    }

    msg.quoted("write_data", &payload.message_data)
        .field("write_length", payload.data_length)
        .field("register_size", payload.register_size);

    let tokens = match payload.register_address.as_deref().map(str::trim) {
        Some(address) if !address.is_empty() => {
            split_register_address(address, payload.register_size)?
        },
        _ => split_register_address(base.test_register_address(), RegisterSize::Bits8)?,
    };
    if !tokens.is_empty() {
        msg.field("register_address", tokens.join(TOKEN_SEPARATOR));
    }

    Ok(msg.build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{I2cTest, Parity, StopBits, UartTest};

    fn uart_base() -> BaseConfig {
        BaseConfig::Uart(UartBaseConfig {
            test_name: UartTest::Loopback,
            device_id: "DUT-1".into(),
            baud_rate: 9600,
            data_bits: 8,
            parity: Parity::Even,
            stop_bits: StopBits::Two,
            ..UartBaseConfig::default()
        })
    }

    fn i2c_base(test: I2cTest) -> BaseConfig {
        BaseConfig::I2c(I2cBaseConfig {
            test_name: test,
            device_address: "0x50".into(),
            register_address: "0x10".into(),
            read_address: "0x20".into(),
            write_address: "0x30".into(),
            ..I2cBaseConfig::default()
        })
    }

    #[test]
    fn test_encode_uart_layout() {
        let payload = PayloadConfig::Uart(UartPayloadConfig::new("hello"));
        let msg = encode(&uart_base(), &payload).unwrap();
        let expected = "[SerialPort]\n\
                        test_name = LOOPBACK TEST\n\
                        device_id = DUT-1\n\
                        baud_rate = 9600\n\
                        databits = 8\n\
                        parity = 10\n\
                        stop_bits = 20\n\
                        data_shift = MSB First\n\
                        handshake = OFF\n\
                        tx_data = 'hello'\n\
                        tx_length = 5";
        assert_eq!(msg.as_str(), expected);
    }

    #[test]
    fn test_encode_is_deterministic() {
        let payload = PayloadConfig::I2c(I2cPayloadConfig {
            message_data: "0xab 0xcd".into(),
            data_length: 2,
            register_size: RegisterSize::Bits16,
            register_address: Some("0x1a3".into()),
        });
        let base = i2c_base(I2cTest::Write);
        let first = encode(&base, &payload).unwrap();
        let second = encode(&base, &payload).unwrap();
        assert_eq!(first.to_wire_bytes(), second.to_wire_bytes());
    }

    #[test]
    fn test_encode_i2c_payload_register_wins() {
        let payload = PayloadConfig::I2c(I2cPayloadConfig {
            message_data: "0xab 0xcd".into(),
            data_length: 2,
            register_size: RegisterSize::Bits16,
            register_address: Some("0x1a3".into()),
        });
        let msg = encode(&i2c_base(I2cTest::Write), &payload).unwrap();
        assert!(msg.as_str().starts_with("[I2CConfig]\ntest_name = WRITE TEST\n"));
        assert_eq!(msg.get("device_address"), Some("'0x50'"));
        assert_eq!(msg.get("write_data"), Some("'0xab 0xcd'"));
        assert_eq!(msg.get("write_length"), Some("2"));
        assert_eq!(msg.get("register_size"), Some("16"));
        assert_eq!(msg.get("register_address"), Some("0x01, 0xa3"));
    }

    #[test]
    fn test_encode_i2c_falls_back_to_base_register() {
        let payload = PayloadConfig::I2c(I2cPayloadConfig {
            message_data: String::new(),
            data_length: 1,
            register_size: RegisterSize::Bits8,
            register_address: None,
        });

        let read = encode(&i2c_base(I2cTest::Read), &payload).unwrap();
        assert_eq!(read.get("register_address"), Some("0x20"));

        let write = encode(&i2c_base(I2cTest::Write), &payload).unwrap();
        assert_eq!(write.get("register_address"), Some("0x30"));

        let other = encode(&i2c_base(I2cTest::DeviceId), &payload).unwrap();
        assert_eq!(other.get("register_address"), Some("0x10"));
    }

    #[test]
    fn test_encode_i2c_omits_empty_addresses() {
        let base = BaseConfig::I2c(I2cBaseConfig {
            device_address: "0x50".into(),
            ..I2cBaseConfig::default()
        });
        let payload = PayloadConfig::I2c(I2cPayloadConfig::default());
        let msg = encode(&base, &payload).unwrap();
        assert!(msg.get("read_address").is_none());
        assert!(msg.get("write_address").is_none());
        assert!(msg.get("register_address").is_none());
    }

    #[test]
    fn test_encode_rejects_mixed_families() {
        let payload = PayloadConfig::I2c(I2cPayloadConfig::default());
        assert!(encode(&uart_base(), &payload).is_err());
    }

    #[test]
    fn test_wire_bytes_terminated_once() {
        assert_eq!(WireMessage::from_text("a = 1").to_wire_bytes(), b"a = 1\n");
        assert_eq!(WireMessage::from_text("a = 1\n").to_wire_bytes(), b"a = 1\n");
    }
}

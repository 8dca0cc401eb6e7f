//! Session files.
//!
//! A session file is a JSON document holding one base configuration and,
//! optionally, one payload:
//!
//! ```json
//! {
//!   "base_config": { "test_name": "LOOPBACK TEST", "baud_rate": 9600, ... },
//!   "payload_config": { "message_data": "hello", "data_length": 5 }
//! }
//! ```
//!
//! Streaming tests may omit `payload_config`; their default payload is used.

use anyhow::{Context, Result};
use hilbridge::{
    BaseConfig, I2cBaseConfig, I2cPayloadConfig, I2cTest, PayloadConfig, ProtocolFamily,
    RegisterSize, UartBaseConfig, UartPayloadConfig, UartTest,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::CliError;

/// Contents of a session file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct SessionFile {
    /// Protocol-wide settings.
    pub base_config: BaseConfig,
    /// Per-send data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_config: Option<PayloadConfig>,
}

impl SessionFile {
    /// Read and parse a session file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read session file {}", path.display()))?;
        let session: Self = serde_json::from_str(&content).map_err(|e| {
            CliError::Config(format!("Invalid session file {}: {e}", path.display()))
        })?;
        Ok(session)
    }

    /// Write the session as pretty JSON. Refuses to overwrite unless `force`.
    pub fn save(&self, path: &Path, force: bool) -> Result<()> {
        if path.exists() && !force {
            return Err(CliError::Config(format!(
                "{} already exists (use --force to overwrite)",
                path.display()
            ))
            .into());
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content + "\n")
            .with_context(|| format!("Failed to write session file {}", path.display()))?;
        Ok(())
    }

    /// Payload to send: the file's own, or the test case's default.
    pub fn payload(&self) -> Result<PayloadConfig> {
        if let Some(payload) = &self.payload_config {
            return Ok(payload.clone());
        }
        let default = match &self.base_config {
            BaseConfig::Uart(base) => UartPayloadConfig::default_for(base.test_name),
            BaseConfig::I2c(_) => None,
        };
        default.map(Into::into).ok_or_else(|| {
            CliError::Config(format!(
                "{} needs a payload_config in the session file",
                self.base_config.test_name()
            ))
            .into()
        })
    }

    /// Template session for `family`, optionally preselecting a test case.
    pub fn template(family: ProtocolFamily, test: Option<&str>) -> Result<Self> {
        match family {
            ProtocolFamily::Uart => {
                let test_name = match test {
                    Some(name) => UartTest::from_name(name).ok_or_else(|| {
                        CliError::Config(format!("Unknown UART test case: {name}"))
                    })?,
                    None => UartTest::Loopback,
                };
                let payload = UartPayloadConfig::default_for(test_name)
                    .unwrap_or_else(|| UartPayloadConfig::new("hello"));
                Ok(Self {
                    base_config: BaseConfig::Uart(UartBaseConfig {
                        test_name,
                        device_id: "DUT-1".into(),
                        ..UartBaseConfig::default()
                    }),
                    payload_config: Some(payload.into()),
                })
            },
            ProtocolFamily::I2c => {
                let test_name = match test {
                    Some(name) => I2cTest::from_name(name).ok_or_else(|| {
                        CliError::Config(format!("Unknown I2C test case: {name}"))
                    })?,
                    None => I2cTest::Read,
                };
                let payload = match test_name {
                    I2cTest::Read => I2cPayloadConfig::read(1, RegisterSize::Bits8, "0x00")?,
                    _ => I2cPayloadConfig::write(
                        "0x00",
                        hilbridge::ByteWidth::One,
                        RegisterSize::Bits8,
                        Some("0x00"),
                    )?,
                };
                Ok(Self {
                    base_config: BaseConfig::I2c(I2cBaseConfig {
                        test_name,
                        device_address: "0x50".into(),
                        register_address: "0x00".into(),
                        read_address: "0x00".into(),
                        write_address: "0x00".into(),
                        ..I2cBaseConfig::default()
                    }),
                    payload_config: Some(payload.into()),
                })
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uart_template_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uart.json");
        let session = SessionFile::template(ProtocolFamily::Uart, Some("loopback test")).unwrap();
        session.save(&path, false).unwrap();

        let loaded = SessionFile::load(&path).unwrap();
        assert_eq!(loaded, session);
        assert_eq!(loaded.base_config.family(), ProtocolFamily::Uart);
    }

    #[test]
    fn test_i2c_template_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("i2c.json");
        let session = SessionFile::template(ProtocolFamily::I2c, Some("WRITE TEST")).unwrap();
        session.save(&path, false).unwrap();

        let loaded = SessionFile::load(&path).unwrap();
        assert_eq!(loaded, session);
        assert!(matches!(loaded.payload_config, Some(PayloadConfig::I2c(_))));
    }

    #[test]
    fn test_streaming_template_uses_default_payload() {
        let session = SessionFile::template(ProtocolFamily::Uart, Some("BAUD RATE TESTING")).unwrap();
        assert_eq!(
            session.payload_config.map(|p| p.message_data().to_string()),
            Some("a".into())
        );
    }

    #[test]
    fn test_payload_falls_back_to_default() {
        let mut session = SessionFile::template(ProtocolFamily::Uart, Some("AUTO BAUD RATE DETECTION")).unwrap();
        session.payload_config = None;
        assert_eq!(
            session.payload().unwrap().message_data(),
            "AUTO_BAUD_RATE_DETECTION"
        );

        let mut session = SessionFile::template(ProtocolFamily::I2c, None).unwrap();
        session.payload_config = None;
        assert!(session.payload().is_err());
    }

    #[test]
    fn test_save_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        fs::write(&path, "{}").unwrap();
        let session = SessionFile::template(ProtocolFamily::I2c, None).unwrap();
        assert!(session.save(&path, false).is_err());
        assert!(session.save(&path, true).is_ok());
    }

    #[test]
    fn test_unknown_test_case() {
        assert!(SessionFile::template(ProtocolFamily::Uart, Some("READ TEST")).is_err());
    }

    #[test]
    fn test_load_rejects_bad_register_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(
            &path,
            r#"{"base_config":{"test_name":"READ TEST","device_address":"0x50",
                "clock_speed":"Standard (100 kHz)","addressing_mode":"7-bit","bus_mode":"MSB First"},
                "payload_config":{"message_data":"","data_length":1,"register_size":12}}"#,
        )
        .unwrap();
        let err = SessionFile::load(&path).unwrap_err();
        assert!(err.downcast_ref::<CliError>().is_some());
    }
}

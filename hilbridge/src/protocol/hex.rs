//! Hex token and register address codec.
//!
//! User input arrives as loosely formatted hex (`3`, `AB`, `0x0f`). Before a
//! value is put on the wire it is normalized to lower case, `0x`-prefixed
//! and zero-padded to a fixed width:
//!
//! ```text
//! "3"     -> "0x03"          (ByteWidth::One)
//! "AB"    -> "0xab"
//! "0x1A3" -> "0x01", "0xa3"  (16-bit register address split)
//! ```
//!
//! Data tokens and register addresses have independent widths: data width
//! is a [`ByteWidth`], address width is a
//! [`RegisterSize`](crate::model::RegisterSize).

use crate::error::{Error, Result};
use crate::model::RegisterSize;

/// Hex prefix used on the wire.
pub const HEX_PREFIX: &str = "0x";

/// Width of a single data token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteWidth {
    /// One byte, two hex digits.
    #[default]
    One,
    /// Two bytes, four hex digits.
    Two,
}

impl ByteWidth {
    /// Number of hex digits in a token of this width.
    pub fn digits(self) -> usize {
        match self {
            Self::One => 2,
            Self::Two => 4,
        }
    }
}

/// Normalize a single-byte data token.
///
/// See [`normalize_token_width`].
pub fn normalize_token(raw: &str) -> Result<String> {
    normalize_token_width(raw, ByteWidth::One)
}

/// Normalize a data token to `width`.
///
/// The token is lower-cased and stripped of whitespace. A token without a
/// `0x` prefix is zero-padded and prefixed; a token that already carries the
/// prefix must have exactly the expected digit count.
pub fn normalize_token_width(raw: &str, width: ByteWidth) -> Result<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase();

    if cleaned.is_empty() {
        return Err(Error::Validation("empty hex value".into()));
    }

    let token = if cleaned.starts_with(HEX_PREFIX) {
        cleaned
    } else {
        format!("{HEX_PREFIX}{cleaned:0>digits$}", digits = width.digits())
    };

    let digits = &token[HEX_PREFIX.len()..];
    if digits.len() != width.digits() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::Validation(format!(
            "invalid value: {raw} (expected 0x followed by {} hex digits)",
            width.digits()
        )));
    }

    Ok(token)
}

/// A whitespace-separated token list after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedData {
    /// Normalized tokens in input order.
    pub tokens: Vec<String>,
    /// Tokens joined by single spaces.
    pub text: String,
    /// Number of tokens.
    pub len: usize,
}

/// Normalize every whitespace-separated token in `raw`.
pub fn normalize_data(raw: &str, width: ByteWidth) -> Result<NormalizedData> {
    let tokens = raw
        .split_whitespace()
        .map(|t| normalize_token_width(t, width))
        .collect::<Result<Vec<_>>>()?;

    if tokens.is_empty() {
        return Err(Error::Validation("no data values provided".into()));
    }

    Ok(NormalizedData {
        text: tokens.join(" "),
        len: tokens.len(),
        tokens,
    })
}

/// Parse a hex value with or without `0x` prefix.
pub fn parse_value(raw: &str) -> Result<u32> {
    let digits = bare_digits(raw)?;
    u32::from_str_radix(&digits, 16)
        .map_err(|e| Error::Validation(format!("invalid hex value {raw}: {e}")))
}

/// Split register addresses into byte-sized wire tokens.
///
/// Each whitespace-separated address is zero-padded to the register width.
/// An 8-bit address yields one token; a 16-bit address yields its high byte
/// then its low byte. Blank input yields no tokens.
pub fn split_register_address(address: &str, size: RegisterSize) -> Result<Vec<String>> {
    let mut tokens = Vec::new();

    for part in address.split_whitespace() {
        let digits = bare_digits(part)?;
        let significant = digits.trim_start_matches('0');
        if significant.len() > size.hex_digits() {
            return Err(Error::Validation(format!(
                "register address {part} does not fit in {size} bits"
            )));
        }
        let padded = format!("{significant:0>width$}", width = size.hex_digits());

        match size {
            RegisterSize::Bits8 => tokens.push(format!("{HEX_PREFIX}{padded}")),
            RegisterSize::Bits16 => {
                let (high, low) = padded.split_at(2);
                tokens.push(format!("{HEX_PREFIX}{high}"));
                tokens.push(format!("{HEX_PREFIX}{low}"));
            },
        }
    }

    Ok(tokens)
}

/// Lower-case `raw`, drop an optional `0x` prefix and check the remaining
/// characters are hex digits.
fn bare_digits(raw: &str) -> Result<String> {
    let lower = raw.trim().to_lowercase();
    let digits = lower.strip_prefix(HEX_PREFIX).unwrap_or(&lower);

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::Validation(format!("invalid hex value: {raw}")));
    }

    Ok(digits.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_token_pads_and_prefixes() {
        assert_eq!(normalize_token("3").unwrap(), "0x03");
        assert_eq!(normalize_token("AB").unwrap(), "0xab");
        assert_eq!(normalize_token(" 0xFF ").unwrap(), "0xff");
    }

    #[test]
    fn test_normalize_token_rejects_invalid() {
        assert!(matches!(normalize_token("0xZZ"), Err(Error::Validation(_))));
        assert!(normalize_token("123").is_err());
        assert!(normalize_token("0x5").is_err());
        assert!(normalize_token("").is_err());
        assert!(normalize_token("g1").is_err());
    }

    #[test]
    fn test_normalize_token_two_byte_width() {
        assert_eq!(normalize_token_width("1a3", ByteWidth::Two).unwrap(), "0x01a3");
        assert!(normalize_token_width("0x1a", ByteWidth::Two).is_err());
    }

    #[test]
    fn test_normalize_data() {
        let data = normalize_data("ab  CD 7", ByteWidth::One).unwrap();
        assert_eq!(data.tokens, vec!["0xab", "0xcd", "0x07"]);
        assert_eq!(data.text, "0xab 0xcd 0x07");
        assert_eq!(data.len, 3);
    }

    #[test]
    fn test_normalize_data_empty_is_error() {
        assert!(matches!(
            normalize_data("   ", ByteWidth::One),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_split_register_address_16bit() {
        let tokens = split_register_address("0x1A3", RegisterSize::Bits16).unwrap();
        assert_eq!(tokens, vec!["0x01", "0xa3"]);
    }

    #[test]
    fn test_split_register_address_8bit() {
        let tokens = split_register_address("0x5", RegisterSize::Bits8).unwrap();
        assert_eq!(tokens, vec!["0x05"]);
    }

    #[test]
    fn test_split_register_address_empty() {
        assert!(split_register_address("", RegisterSize::Bits16).unwrap().is_empty());
        assert!(split_register_address("   ", RegisterSize::Bits8).unwrap().is_empty());
    }

    #[test]
    fn test_split_register_address_multiple() {
        let tokens = split_register_address("fa 0xFB", RegisterSize::Bits8).unwrap();
        assert_eq!(tokens, vec!["0xfa", "0xfb"]);
    }

    #[test]
    fn test_split_register_address_too_wide() {
        assert!(split_register_address("0x1A3", RegisterSize::Bits8).is_err());
        assert!(split_register_address("0x12345", RegisterSize::Bits16).is_err());
        assert_eq!(
            split_register_address("0x0005", RegisterSize::Bits8).unwrap(),
            vec!["0x05"]
        );
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("0x50").unwrap(), 0x50);
        assert_eq!(parse_value("3FF").unwrap(), 0x3FF);
        assert!(parse_value("0x").is_err());
        assert!(parse_value("xyz").is_err());
    }
}

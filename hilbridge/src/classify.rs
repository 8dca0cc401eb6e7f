//! Response classification.
//!
//! Turns raw instrument text into typed results. Everything here is pure:
//! no I/O, no shared state.
//!
//! Streaming tests produce one record per line:
//!
//! ```text
//! BAUD RATE TESTING         110924.33,3.85,110924.33,-3.71
//!                           min_baud,min_err%,max_baud,max_err%
//! AUTO BAUD RATE DETECTION  115200,115200
//!                           scalar_baud,max_baud
//! ```
//!
//! Single-response tests are classified by [`classify_generic`].

use crate::error::{Error, Result};
use crate::model::TestCaseKind;
use crate::transport::client::{ERROR_PREFIX, NO_RESPONSE, TransportResult};
use log::warn;
use std::fmt;

/// Overall verdict of a single-response test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Verdict {
    /// Test passed.
    Pass,
    /// Test failed.
    Fail,
    /// Data came back; no pass criterion applies.
    DataReceived,
    /// The instrument did not answer.
    NoResponse,
    /// The exchange itself failed.
    TransportError,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "Pass"),
            Self::Fail => write!(f, "FAIL"),
            Self::DataReceived => write!(f, "Data Received"),
            Self::NoResponse => write!(f, "No Response"),
            Self::TransportError => write!(f, "Error"),
        }
    }
}

/// Classification of a single response.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct GenericResult {
    /// Whether the instrument acknowledged.
    pub ack: bool,
    /// Verdict.
    pub verdict: Verdict,
    /// Numeric values extracted from a read response, formatted to three
    /// decimals.
    pub values: Vec<String>,
    /// Text to show as the received data.
    pub display: String,
}

impl GenericResult {
    /// `ACK` or `NACK`.
    pub fn ack_label(&self) -> &'static str {
        if self.ack { "ACK" } else { "NACK" }
    }

    fn failed(verdict: Verdict) -> Self {
        Self {
            ack: false,
            verdict,
            values: Vec::new(),
            display: String::new(),
        }
    }
}

impl fmt::Display for GenericResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.verdict, self.ack_label())?;
        if !self.display.is_empty() {
            write!(f, " {}", self.display)?;
        }
        Ok(())
    }
}

/// One baud-rate scan record.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BaudScanResult {
    /// Lowest baud rate that still worked.
    pub min_baud: u32,
    /// Error at the lowest baud rate, percent.
    pub min_error_pct: f64,
    /// Highest baud rate that still worked.
    pub max_baud: u32,
    /// Error at the highest baud rate, percent.
    pub max_error_pct: f64,
}

impl fmt::Display for BaudScanResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "min {} baud ({:.2}%)  max {} baud ({:.2}%)",
            self.min_baud, self.min_error_pct, self.max_baud, self.max_error_pct
        )
    }
}

/// Auto-baud detection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum AutoBaudStatus {
    /// The instrument locked on to a baud rate.
    Detected,
}

impl fmt::Display for AutoBaudStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Detected => write!(f, "Detected"),
        }
    }
}

/// One auto-baud detection record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct AutoBaudResult {
    /// Baud rate measured from a single character.
    pub scalar_baud: u32,
    /// Highest baud rate observed.
    pub max_baud: u32,
    /// Detection status.
    pub status: AutoBaudStatus,
}

impl fmt::Display for AutoBaudResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scalar {} baud  max {} baud  {}",
            self.scalar_baud, self.max_baud, self.status
        )
    }
}

/// A classified streaming line.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize), serde(untagged))]
pub enum StreamRecord {
    /// Baud-rate scan record.
    BaudScan(BaudScanResult),
    /// Auto-baud record.
    AutoBaud(AutoBaudResult),
}

impl fmt::Display for StreamRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BaudScan(r) => r.fmt(f),
            Self::AutoBaud(r) => r.fmt(f),
        }
    }
}

/// Parse a `min_baud,min_err,max_baud,max_err` line.
pub fn classify_baud_line(line: &str) -> Result<BaudScanResult> {
    let [min_baud, min_err, max_baud, max_err] = parse_fields::<4>(line)?;
    Ok(BaudScanResult {
        min_baud: to_baud(min_baud, line)?,
        min_error_pct: round2(min_err),
        max_baud: to_baud(max_baud, line)?,
        max_error_pct: round2(max_err),
    })
}

/// Parse a `scalar_baud,max_baud` line.
pub fn classify_auto_baud_line(line: &str) -> Result<AutoBaudResult> {
    let [scalar, max] = parse_fields::<2>(line)?;
    Ok(AutoBaudResult {
        scalar_baud: to_baud(scalar, line)?,
        max_baud: to_baud(max, line)?,
        status: AutoBaudStatus::Detected,
    })
}

/// Classify one streaming line for a test of `kind`.
///
/// Lines that do not parse are logged and dropped so one bad record does
/// not end a scan. Kinds without a streaming format yield `None`.
pub fn classify_stream_line(kind: TestCaseKind, line: &str) -> Option<StreamRecord> {
    let parsed = match kind {
        TestCaseKind::BaudScan => classify_baud_line(line).map(StreamRecord::BaudScan),
        TestCaseKind::AutoBaud => classify_auto_baud_line(line).map(StreamRecord::AutoBaud),
        _ => return None,
    };
    match parsed {
        Ok(record) => Some(record),
        Err(e) => {
            warn!("Bad {kind:?} line '{line}': {e}");
            None
        },
    }
}

/// Classify a single response.
///
/// `response` may be a transport sentinel (`Error: ...` or `No Response`),
/// which takes precedence over any other interpretation. `sent` is the
/// data that was transmitted.
pub fn classify_generic(response: &str, sent: &str, kind: TestCaseKind) -> GenericResult {
    if response.starts_with(ERROR_PREFIX) {
        return GenericResult::failed(Verdict::TransportError);
    }
    if response == NO_RESPONSE {
        return GenericResult::failed(Verdict::NoResponse);
    }

    let ack = response.contains("ACK");
    let trimmed = response.trim();

    match kind {
        TestCaseKind::Loopback => GenericResult {
            ack,
            verdict: if trimmed == sent.trim() {
                Verdict::Pass
            } else {
                Verdict::Fail
            },
            values: Vec::new(),
            display: trimmed.to_string(),
        },
        TestCaseKind::Read => {
            let values = read_values(response);
            let (verdict, display) = if values.is_empty() {
                (Verdict::Fail, "No valid data".to_string())
            } else {
                (Verdict::DataReceived, values.join(", "))
            };
            GenericResult {
                ack,
                verdict,
                values,
                display,
            }
        },
        TestCaseKind::Reception => {
            let lower = trimmed.to_lowercase();
            let verdict = if lower.contains("success") || lower.contains("received") {
                Verdict::Pass
            } else {
                Verdict::DataReceived
            };
            GenericResult {
                ack,
                verdict,
                values: Vec::new(),
                display: trimmed.to_string(),
            }
        },
        _ => GenericResult {
            ack,
            verdict: Verdict::Pass,
            values: Vec::new(),
            display: trimmed.to_string(),
        },
    }
}

/// Classify the outcome of a transport exchange.
pub fn classify_transport(result: &TransportResult, sent: &str, kind: TestCaseKind) -> GenericResult {
    classify_generic(&result.as_response_text(), sent, kind)
}

/// Numbers in a read response, one per line, formatted to three decimals.
fn read_values(response: &str) -> Vec<String> {
    response
        .replace('\r', "")
        .lines()
        .filter_map(|line| line.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .map(|v| format!("{v:.3}"))
        .collect()
}

fn parse_fields<const N: usize>(line: &str) -> Result<[f64; N]> {
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() != N {
        return Err(Error::Parse(format!(
            "expected {N} comma-separated fields, got {}: {line}",
            parts.len()
        )));
    }

    let mut fields = [0.0; N];
    for (slot, part) in fields.iter_mut().zip(&parts) {
        *slot = part
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| Error::Parse(format!("not a number: '{part}' in {line}")))?;
    }
    Ok(fields)
}

#[allow(clippy::cast_sign_loss)]
fn to_baud(value: f64, line: &str) -> Result<u32> {
    let rounded = value.round();
    if !(0.0..=f64::from(u32::MAX)).contains(&rounded) {
        return Err(Error::Parse(format!("baud rate out of range: {value} in {line}")));
    }
    Ok(rounded as u32)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

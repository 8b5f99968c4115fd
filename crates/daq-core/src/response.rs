//! Response decoding and parsing for ASCII terminal protocols.
//!
//! Devices such as the iBeam Smart answer every command with a text burst that
//! ends in a fixed-width prompt (`CMD> `). Values are reported as
//! `key = value unit`, e.g. `PIC  = 001234 uW`.
//!
//! Nothing in this module fails on malformed input. Missing values surface as
//! [`Reading::NotAvailable`], which callers must check explicitly.

use serde::{Deserialize, Serialize};

/// Numeric sentinel used where a plain `f64` must stand in for "not available".
pub const NOT_AVAILABLE_SENTINEL: f64 = -1.0;

/// A value that may be unavailable.
///
/// Returned by the parser when a response carries no value, and by capability
/// methods for operations the connected model does not support.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Reading<T> {
    /// A value was obtained.
    Value(T),
    /// No value: the response had none, or the model does not support the query.
    NotAvailable,
}

impl<T> Reading<T> {
    /// Converts into an `Option`, dropping the distinction.
    pub fn value(self) -> Option<T> {
        match self {
            Reading::Value(v) => Some(v),
            Reading::NotAvailable => None,
        }
    }

    /// True when a value is present.
    pub fn is_available(&self) -> bool {
        matches!(self, Reading::Value(_))
    }

    /// Maps the contained value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Reading<U> {
        match self {
            Reading::Value(v) => Reading::Value(f(v)),
            Reading::NotAvailable => Reading::NotAvailable,
        }
    }
}

impl Reading<f64> {
    /// Returns the value, or [`NOT_AVAILABLE_SENTINEL`].
    pub fn or_sentinel(self) -> f64 {
        match self {
            Reading::Value(v) => v,
            Reading::NotAvailable => NOT_AVAILABLE_SENTINEL,
        }
    }
}

impl<T> From<Option<T>> for Reading<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Reading::Value(v),
            None => Reading::NotAvailable,
        }
    }
}

// =============================================================================
// Decoding
// =============================================================================

/// Decodes a raw response burst and strips the trailing prompt.
///
/// Invalid UTF-8 is replaced rather than rejected. The last `suffix_len`
/// characters are removed; a response shorter than that decodes to an empty string.
pub fn decode_response(raw: &[u8], suffix_len: usize) -> String {
    let text = String::from_utf8_lossy(raw);
    let keep = text.chars().count().saturating_sub(suffix_len);
    text.chars().take(keep).collect()
}

// =============================================================================
// Value extraction
// =============================================================================

/// Returns the value token of a `key = value unit` response.
///
/// The token starts after `=` (skipping blanks) and ends at the next whitespace
/// or at the end of the text.
pub fn value_token(text: &str) -> Option<&str> {
    let eq = text.find('=')?;
    text[eq + 1..].split_whitespace().next()
}

/// Parses the numeric value of a `key = value unit` response.
///
/// ```rust
/// use daq_core::response::{parse_value, Reading};
///
/// assert_eq!(parse_value("PIC  = 001234 uW"), Reading::Value(1234.0));
/// assert_eq!(parse_value("ch1 = 25.5"), Reading::Value(25.5));
/// assert_eq!(parse_value("laser is ON"), Reading::NotAvailable);
/// ```
pub fn parse_value(text: &str) -> Reading<f64> {
    value_token(text)
        .and_then(|token| token.parse::<f64>().ok())
        .into()
}

// =============================================================================
// Status classification
// =============================================================================

/// Status keyword found in a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusToken {
    /// `ON`
    On,
    /// `OFF`
    Off,
    /// `LOCKED`
    Locked,
    /// `ERROR`
    Error,
    /// No recognised keyword.
    Unknown,
}

/// Classifies a status response by its highest-priority keyword.
///
/// Priority is `ON`, then `OFF`, then `LOCKED`, then `ERROR`, wherever each appears in
/// the text. Keywords are matched as whole upper-case words, so `ONLINE` is not `ON`
/// and an echoed lower-case command (`la on`) is ignored.
pub fn classify_status(text: &str) -> StatusToken {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter_map(|word| match word {
            "ON" => Some((0, StatusToken::On)),
            "OFF" => Some((1, StatusToken::Off)),
            "LOCKED" => Some((2, StatusToken::Locked)),
            "ERROR" => Some((3, StatusToken::Error)),
            _ => None,
        })
        .min_by_key(|(rank, _)| *rank)
        .map(|(_, token)| token)
        .unwrap_or(StatusToken::Unknown)
}

/// Formats a number for a command line in its shortest round-trip decimal form.
///
/// `0.5` stays `0.5`, `1500.0` becomes `1500`.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

//! Deterministic decimal string -> integer normalization.
//!
//! Converts a textual decimal amount into `value * 10^precision` as a machine
//! integer, using an arbitrary-precision intermediate so the conversion agrees
//! bit-for-bit with any other conforming implementation up to the safe-integer
//! bound (`+/- (2^53 - 1)`), per the design note on fixed-width arithmetic being
//! unsound at the top of that range.

use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};
use serde::{Deserialize, Serialize};

/// The largest (and smallest, negated) integer a float64 can represent exactly.
pub const SAFE_INTEGER_BOUND: i64 = (1i64 << 53) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingMode {
    /// Reject any input whose fraction is longer than the target precision.
    Strict,
    /// Round half-away-from-zero to the target precision.
    Round,
    /// Drop extra fractional digits.
    Truncate,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum NormalizeError {
    #[error("invalid_numeric: {0}")]
    InvalidNumeric(String),
    #[error("precision_exceeded")]
    PrecisionExceeded,
    #[error("overflow")]
    Overflow,
}

struct ParsedDecimal {
    negative: bool,
    integer_digits: String,
    fraction_digits: String,
}

fn parse(input: &str) -> Result<ParsedDecimal, NormalizeError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(NormalizeError::InvalidNumeric(
            "empty decimal string".to_string(),
        ));
    }

    let (negative, rest) = match trimmed.as_bytes()[0] {
        b'+' => (false, &trimmed[1..]),
        b'-' => (true, &trimmed[1..]),
        _ => (false, trimmed),
    };

    if rest.is_empty() {
        return Err(NormalizeError::InvalidNumeric(
            "sign with no digits".to_string(),
        ));
    }

    let mut parts = rest.splitn(2, '.');
    let integer_digits = parts.next().unwrap_or_default();
    let fraction_digits = parts.next().unwrap_or_default();

    if integer_digits.is_empty() || !integer_digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(NormalizeError::InvalidNumeric(format!(
            "invalid integer part: {input}"
        )));
    }
    if rest.contains('.') && (fraction_digits.is_empty() || fraction_digits.bytes().any(|b| !b.is_ascii_digit()))
    {
        return Err(NormalizeError::InvalidNumeric(format!(
            "invalid fractional part: {input}"
        )));
    }
    if !fraction_digits.is_empty() && !fraction_digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(NormalizeError::InvalidNumeric(format!(
            "invalid fractional part: {input}"
        )));
    }

    Ok(ParsedDecimal {
        negative,
        integer_digits: integer_digits.to_string(),
        fraction_digits: fraction_digits.to_string(),
    })
}

/// Normalize `input` to an integer equal to `value * 10^precision`.
pub fn normalize(input: &str, precision: u32, mode: RoundingMode) -> Result<i64, NormalizeError> {
    let parsed = parse(input)?;
    let mut fraction = parsed.fraction_digits;
    let precision = precision as usize;

    let mut round_up = false;
    if fraction.len() > precision {
        match mode {
            RoundingMode::Strict => return Err(NormalizeError::PrecisionExceeded),
            RoundingMode::Truncate => {
                fraction.truncate(precision);
            }
            RoundingMode::Round => {
                let next_digit = fraction.as_bytes()[precision] - b'0';
                round_up = next_digit >= 5;
                fraction.truncate(precision);
            }
        }
    } else {
        while fraction.len() < precision {
            fraction.push('0');
        }
    }

    let combined = format!("{}{}", parsed.integer_digits, fraction);
    let mut magnitude = combined.parse::<BigInt>().map_err(|_| {
        NormalizeError::InvalidNumeric(format!("digits overflowed parser: {combined}"))
    })?;

    if round_up {
        magnitude += BigInt::from(1);
    }

    let bound = BigInt::from(SAFE_INTEGER_BOUND);
    if magnitude > bound {
        return Err(NormalizeError::Overflow);
    }

    let signed = if parsed.negative && !magnitude.is_zero() {
        -magnitude
    } else {
        magnitude
    };

    signed.to_i64().ok_or(NormalizeError::Overflow)
}

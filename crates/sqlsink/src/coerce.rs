//! Text to SQL value conversion
//!
//! Every field of an event arrives as text; the target column's
//! [`SemanticType`] decides how it is converted. An empty string is NULL for
//! every type except `String`.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use sqlsink_rdbc::types::{SemanticType, Value};
use std::str::FromStr;
use thiserror::Error;

/// A field could not be converted to its column type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot convert '{raw}' to {target}: {reason}")]
pub struct CoercionError {
    /// Offending text
    pub raw: String,
    /// Requested type
    pub target: SemanticType,
    /// What went wrong
    pub reason: String,
}

impl CoercionError {
    fn new(raw: &str, target: SemanticType, reason: impl ToString) -> Self {
        Self {
            raw: raw.to_string(),
            target,
            reason: reason.to_string(),
        }
    }
}

/// Convert `raw` to a value of `target` type
pub fn coerce(raw: &str, target: SemanticType) -> Result<Value, CoercionError> {
    if target == SemanticType::String {
        return Ok(Value::String(raw.to_string()));
    }
    if raw.is_empty() {
        return Ok(Value::Null);
    }

    let fail = |reason: String| CoercionError::new(raw, target, reason);
    let text = raw.trim();

    match target {
        SemanticType::Bool => {
            parse_bool(text).ok_or_else(|| fail("expected true, false, 1 or 0".into()))
        }
        SemanticType::Int16 => text
            .parse::<i16>()
            .map(Value::Int16)
            .map_err(|e| fail(e.to_string())),
        SemanticType::Int32 => text
            .parse::<i32>()
            .map(Value::Int32)
            .map_err(|e| fail(e.to_string())),
        SemanticType::Int64 => text
            .parse::<i64>()
            .map(Value::Int64)
            .map_err(|e| fail(e.to_string())),
        SemanticType::Float32 => text
            .parse::<f32>()
            .map(Value::Float32)
            .map_err(|e| fail(e.to_string())),
        SemanticType::Float64 => text
            .parse::<f64>()
            .map(Value::Float64)
            .map_err(|e| fail(e.to_string())),
        SemanticType::Decimal => Decimal::from_str(text)
            .or_else(|_| Decimal::from_scientific(text))
            .map(Value::Decimal)
            .map_err(|e| fail(e.to_string())),
        SemanticType::Date => parse_date(text)
            .map(Value::Date)
            .ok_or_else(|| fail("expected yyyy-MM-dd or yyyyMMdd".into())),
        SemanticType::Time => parse_time(text)
            .map(Value::Time)
            .ok_or_else(|| fail("expected HH:mm:ss[.SSS]".into())),
        SemanticType::Timestamp => coerce_timestamp(raw),
        SemanticType::Blob => Ok(Value::Bytes(raw.as_bytes().to_vec())),
        SemanticType::String => Ok(Value::String(raw.to_string())),
    }
}

fn parse_bool(text: &str) -> Option<Value> {
    if text.eq_ignore_ascii_case("true") || text == "1" {
        Some(Value::Bool(true))
    } else if text.eq_ignore_ascii_case("false") || text == "0" {
        Some(Value::Bool(false))
    } else {
        None
    }
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    if text.len() == 8 && text.bytes().all(|b| b.is_ascii_digit()) {
        return compact_date(text);
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()
}

/// `yyyyMMdd` prefix of an all-digit string
fn compact_date(digits: &str) -> Option<NaiveDate> {
    let year = digits.get(0..4)?.parse::<i32>().ok()?;
    let month = digits.get(4..6)?.parse::<u32>().ok()?;
    let day = digits.get(6..8)?.parse::<u32>().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn parse_time(text: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(text, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M"))
        .ok()
}

/// Fixed-width timestamps: `yyyyMMddHHmmssSSS` (17) or `yyyyMMddHHmmss` (14).
/// Any other length is NULL.
fn coerce_timestamp(raw: &str) -> Result<Value, CoercionError> {
    if raw.len() != 17 && raw.len() != 14 {
        return Ok(Value::Null);
    }
    parse_compact_timestamp(raw)
        .map(Value::DateTime)
        .ok_or_else(|| {
            CoercionError::new(raw, SemanticType::Timestamp, "not a valid timestamp")
        })
}

fn parse_compact_timestamp(raw: &str) -> Option<NaiveDateTime> {
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let field = |range: std::ops::Range<usize>| raw.get(range)?.parse::<u32>().ok();

    let date = compact_date(raw)?;
    let millis = if raw.len() == 17 { field(14..17)? } else { 0 };
    date.and_hms_milli_opt(field(8..10)?, field(10..12)?, field(12..14)?, millis)
}

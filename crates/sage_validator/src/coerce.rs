//! Cell text to typed [`Value`] coercion.

use chrono::{NaiveDate, NaiveDateTime};
use sage_schema::{FieldType, Value};

/// Date layouts accepted for `date` fields, ISO first then day-first.
pub const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y"];

/// Datetime layouts whose date part is kept for `date` fields.
pub const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

const TRUE_WORDS: &[&str] = &["true", "t", "1", "yes", "y", "si", "sí", "s"];
const FALSE_WORDS: &[&str] = &["false", "f", "0", "no", "n"];

/// Coerce a raw cell to the declared type. Blank cells are null.
///
/// The error is a human-readable reason suitable for a violation message.
pub fn coerce(raw: &str, field_type: FieldType) -> Result<Value, String> {
    let text = raw.trim();
    if text.is_empty() {
        return Ok(Value::Null);
    }

    match field_type {
        FieldType::Text => Ok(Value::Text(raw.to_string())),
        FieldType::Integer => text
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| format!("'{}' is not a valid integer", raw)),
        FieldType::Decimal => parse_decimal(text)
            .map(Value::Decimal)
            .ok_or_else(|| format!("'{}' is not a valid decimal", raw)),
        FieldType::Date => parse_date(text)
            .map(Value::Date)
            .ok_or_else(|| format!("'{}' is not a valid date", raw)),
        FieldType::Boolean => {
            let lower = text.to_lowercase();
            if TRUE_WORDS.contains(&lower.as_str()) {
                Ok(Value::Bool(true))
            } else if FALSE_WORDS.contains(&lower.as_str()) {
                Ok(Value::Bool(false))
            } else {
                Err(format!("'{}' is not a valid boolean", raw))
            }
        }
    }
}

/// Accepts `1234.5` and, when no dot is present, a single decimal comma (`1234,5`).
fn parse_decimal(text: &str) -> Option<f64> {
    let normalized = if !text.contains('.') && text.matches(',').count() == 1 {
        text.replace(',', ".")
    } else {
        text.to_string()
    };
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
                .map(|dt| dt.date())
        })
}

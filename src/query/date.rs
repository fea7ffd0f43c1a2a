//! Date formatting and parsing used by date predicates.

use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};

use crate::query::value::Value;

/// Formats and parses date values for the translators.
///
/// Implementations must be safe to share between threads; both translators
/// only ever call them through a shared reference.
pub trait DateService: Send + Sync {
    /// Renders an instant. `date_only` selects the calendar-date form.
    fn format(&self, value: OffsetDateTime, date_only: bool) -> String;
    /// Interprets a value as an instant, returning `None` when it is not one.
    fn parse(&self, value: &Value) -> Option<OffsetDateTime>;
}

/// RFC 3339 date service. Strings are accepted either as full RFC 3339
/// instants or as `YYYY-MM-DD` (midnight UTC); integers are Unix milliseconds.
#[derive(Clone, Copy, Debug, Default)]
pub struct Rfc3339Dates;

impl DateService for Rfc3339Dates {
    fn format(&self, value: OffsetDateTime, date_only: bool) -> String {
        if date_only {
            let rendered = value.date().format(format_description!("[year]-[month]-[day]"));
            return rendered.unwrap_or_else(|_| value.date().to_string());
        }
        value
            .format(&Rfc3339)
            .unwrap_or_else(|_| value.to_string())
    }

    fn parse(&self, value: &Value) -> Option<OffsetDateTime> {
        match value {
            Value::DateTime(v) => Some(*v),
            Value::String(s) => parse_str(s),
            Value::Int(ms) => {
                OffsetDateTime::from_unix_timestamp_nanos(i128::from(*ms) * 1_000_000).ok()
            }
            _ => None,
        }
    }
}

fn parse_str(raw: &str) -> Option<OffsetDateTime> {
    let raw = raw.trim();
    if let Ok(instant) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(instant);
    }
    Date::parse(raw, format_description!("[year]-[month]-[day]"))
        .ok()
        .map(|date| PrimitiveDateTime::new(date, Time::MIDNIGHT).assume_utc())
}

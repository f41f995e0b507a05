// Raw value coercion toward a declared field type

use crate::schema::FieldType;
use chrono::{DateTime, NaiveDate, SecondsFormat, TimeZone, Utc};
use serde_json::{Number, Value};

/// Canonical string form of a timestamp as stored in documents
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a date value as accepted by `date` fields: RFC 3339 or `YYYY-MM-DD`.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
    let midnight = date.and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&midnight))
}

/// Coerce a value toward `field_type`. Values that cannot be converted are
/// returned unchanged so that validation reports them.
pub fn coerce(value: Value, field_type: FieldType) -> Value {
    match (field_type, value) {
        (_, Value::Null) => Value::Null,

        (FieldType::Number, Value::String(s)) => match parse_number(&s) {
            Some(n) => Value::Number(n),
            None => Value::String(s),
        },

        (FieldType::Integer, Value::String(s)) => match s.trim().parse::<i64>() {
            Ok(i) => Value::from(i),
            Err(_) => Value::String(s),
        },
        (FieldType::Integer, Value::Number(n)) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                Value::from(f as i64)
            }
            _ => Value::Number(n),
        },

        (FieldType::String, Value::Number(n)) => Value::String(n.to_string()),
        (FieldType::String, Value::Bool(b)) => Value::String(b.to_string()),

        (FieldType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(s),
        },

        (FieldType::Date, Value::String(s)) => match parse_timestamp(&s) {
            Some(ts) => Value::String(format_timestamp(ts)),
            None => Value::String(s),
        },
        // Numbers on date fields are epoch milliseconds
        (FieldType::Date, Value::Number(n)) => match n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()) {
            Some(ts) => Value::String(format_timestamp(ts)),
            None => Value::Number(n),
        },

        (FieldType::List, Value::Array(items)) => Value::Array(items),
        (FieldType::List, Value::Object(map)) => Value::Object(map),
        (FieldType::List, scalar) => Value::Array(vec![scalar]),

        (_, other) => other,
    }
}

fn parse_number(s: &str) -> Option<Number> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(i) = s.parse::<i64>() {
        return Some(Number::from(i));
    }
    s.parse::<f64>().ok().and_then(Number::from_f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_string_to_number() {
        assert_eq!(coerce(json!("5"), FieldType::Number), json!(5));
        assert_eq!(coerce(json!(" 2.5 "), FieldType::Number), json!(2.5));
        assert_eq!(coerce(json!("abc"), FieldType::Number), json!("abc"));
        assert_eq!(coerce(json!(""), FieldType::Number), json!(""));
    }

    #[test]
    fn test_integer_coercion() {
        assert_eq!(coerce(json!("42"), FieldType::Integer), json!(42));
        assert_eq!(coerce(json!(3.0), FieldType::Integer), json!(3));
        assert_eq!(coerce(json!(3.5), FieldType::Integer), json!(3.5));
        assert_eq!(coerce(json!("4.2"), FieldType::Integer), json!("4.2"));
    }

    #[test]
    fn test_scalars_to_string() {
        assert_eq!(coerce(json!(12), FieldType::String), json!("12"));
        assert_eq!(coerce(json!(true), FieldType::String), json!("true"));
    }

    #[test]
    fn test_string_to_boolean() {
        assert_eq!(coerce(json!("TRUE"), FieldType::Boolean), json!(true));
        assert_eq!(coerce(json!("false"), FieldType::Boolean), json!(false));
        assert_eq!(coerce(json!("yes"), FieldType::Boolean), json!("yes"));
    }

    #[test]
    fn test_date_normalization() {
        assert_eq!(
            coerce(json!("2026-01-02"), FieldType::Date),
            json!("2026-01-02T00:00:00.000Z")
        );
        assert_eq!(
            coerce(json!("2026-01-02T10:30:00+02:00"), FieldType::Date),
            json!("2026-01-02T08:30:00.000Z")
        );
        assert_eq!(coerce(json!(0), FieldType::Date), json!("1970-01-01T00:00:00.000Z"));
        assert_eq!(coerce(json!("soon"), FieldType::Date), json!("soon"));
    }

    #[test]
    fn test_scalar_wrapped_into_list() {
        assert_eq!(coerce(json!("a"), FieldType::List), json!(["a"]));
        assert_eq!(coerce(json!(["a"]), FieldType::List), json!(["a"]));
    }

    #[test]
    fn test_null_untouched() {
        assert_eq!(coerce(Value::Null, FieldType::Number), Value::Null);
        assert_eq!(coerce(Value::Null, FieldType::List), Value::Null);
    }
}

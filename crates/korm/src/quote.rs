//! Literal quoting for display and for the rare statement that cannot bind.
//!
//! Builder-generated SQL never inlines values; this is used by the query log,
//! by [`Connection::quote`](crate::Connection::quote) and by callers writing
//! raw fragments.

use crate::value::{TIMESTAMP_FORMAT, Value};
use std::fmt::Write;

/// Render `value` as an SQL literal.
///
/// Text that survives an `i64` parse/format round trip (`"42"`, `"-7"`, but
/// not `"042"` or `"4.0"`) is emitted as a bare integer.
pub fn quote(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::Int(n) => n.to_string(),
        Value::Float(x) if x.is_finite() => x.to_string(),
        Value::Float(_) => "NULL".to_string(),
        Value::Text(s) => match integer_literal(s) {
            Some(n) => n.to_string(),
            None => quote_str(s),
        },
        Value::Timestamp(ts) => quote_str(&ts.format(TIMESTAMP_FORMAT).to_string()),
        Value::Bytes(bytes) => {
            let mut out = String::with_capacity(bytes.len() * 2 + 3);
            out.push_str("X'");
            for b in bytes {
                let _ = write!(out, "{b:02X}");
            }
            out.push('\'');
            out
        }
        Value::List(items) => items.iter().map(quote).collect::<Vec<_>>().join(", "),
    }
}

/// Single-quote a string, doubling embedded quotes.
pub fn quote_str(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn integer_literal(s: &str) -> Option<i64> {
    s.parse::<i64>().ok().filter(|n| n.to_string() == s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn integer_looking_text_is_bare() {
        assert_eq!(quote(&Value::Text("42".into())), "42");
        assert_eq!(quote(&Value::Text("-7".into())), "-7");
    }

    #[test]
    fn non_canonical_numbers_stay_strings() {
        assert_eq!(quote(&Value::Text("042".into())), "'042'");
        assert_eq!(quote(&Value::Text("4.0".into())), "'4.0'");
        assert_eq!(quote(&Value::Text(" 1".into())), "' 1'");
        assert_eq!(quote(&Value::Text("99999999999999999999".into())), "'99999999999999999999'");
    }

    #[test]
    fn strings_are_escaped() {
        assert_eq!(quote(&Value::Text("it's".into())), "'it''s'");
        assert_eq!(quote(&Value::Text(String::new())), "''");
    }

    #[test]
    fn null_bool_and_numbers() {
        assert_eq!(quote(&Value::Null), "NULL");
        assert_eq!(quote(&Value::Bool(true)), "1");
        assert_eq!(quote(&Value::Int(5)), "5");
        assert_eq!(quote(&Value::Float(2.5)), "2.5");
    }

    #[test]
    fn lists_are_recursive() {
        let list = Value::List(vec![
            Value::Int(1),
            Value::Text("a".into()),
            Value::Null,
            Value::List(vec![Value::Text("2".into())]),
        ]);
        assert_eq!(quote(&list), "1, 'a', NULL, 2");
    }

    #[test]
    fn timestamps_and_bytes() {
        let ts = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        assert_eq!(quote(&Value::Timestamp(ts)), "'2024-01-02 03:04:05'");
        assert_eq!(quote(&Value::Bytes(vec![0xde, 0xad])), "X'DEAD'");
    }
}

//! Column classification and SQL literal encoding

use crate::database::{ColumnInfo, SqlValue};
use crate::utils::sql::hex_to_bits;
use regex::Regex;
use std::sync::OnceLock;

/// How a column's values are written in INSERT statements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnClass {
    /// Bare numeric literal
    Integer,
    /// `0x` hex literal
    Binary,
    /// `b'...'` bit literal, zero-padded to the declared width
    Bit(usize),
    /// Quoted, escaped string
    Text,
}

fn integer_type() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(tiny|small|medium|big)?int").expect("valid regex"))
}

fn binary_type() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(binary|varbinary|tinyblob|mediumblob|blob|longblob)").expect("valid regex")
    })
}

fn bit_type() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^bit(?:\(([0-9]+)\))?$").expect("valid regex"))
}

fn keyset_type() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(small|medium|big)?int(\(| |$)").expect("valid regex"))
}

pub fn classify(data_type: &str) -> ColumnClass {
    let data_type = data_type.trim();
    if integer_type().is_match(data_type) {
        ColumnClass::Integer
    } else if binary_type().is_match(data_type) {
        ColumnClass::Binary
    } else if let Some(caps) = bit_type().captures(data_type) {
        let width = caps
            .get(1)
            .and_then(|m| m.as_str().parse::<usize>().ok())
            .unwrap_or(1)
            .max(1);
        ColumnClass::Bit(width)
    } else {
        ColumnClass::Text
    }
}

/// The single integer primary key usable for keyset pagination, if any
///
/// Composite keys and `tinyint` keys fall back to offset paging.
pub fn keyset_column(columns: &[ColumnInfo]) -> Option<&ColumnInfo> {
    let mut primary = columns.iter().filter(|c| c.is_primary());
    let key = primary.next()?;
    if primary.next().is_some() {
        return None;
    }
    keyset_type().is_match(key.data_type.trim()).then_some(key)
}

/// Escape a string for a single-quoted MySQL literal
pub fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x1a' => out.push_str("\\Z"),
            other => out.push(other),
        }
    }
    out
}

/// Render one cell as a SQL literal
pub fn encode_value(class: ColumnClass, value: &SqlValue) -> String {
    match (class, value) {
        (_, SqlValue::Null) => "NULL".to_string(),
        (ColumnClass::Integer, SqlValue::Text(s)) if s.is_empty() => "NULL".to_string(),
        (ColumnClass::Integer, SqlValue::Text(s)) => s.clone(),
        (ColumnClass::Integer, SqlValue::Bytes(b)) if b.is_empty() => "NULL".to_string(),
        (ColumnClass::Integer, SqlValue::Bytes(b)) => String::from_utf8_lossy(b).into_owned(),
        (ColumnClass::Binary, SqlValue::Text(s)) if s.is_empty() => "''".to_string(),
        (ColumnClass::Binary, SqlValue::Bytes(b)) if b.is_empty() => "''".to_string(),
        (ColumnClass::Binary, SqlValue::Text(s)) => format!("0x{}", hex::encode(s.as_bytes())),
        (ColumnClass::Binary, SqlValue::Bytes(b)) => format!("0x{}", hex::encode(b)),
        (ColumnClass::Bit(width), SqlValue::Text(s)) => encode_bits(s.as_bytes(), width),
        (ColumnClass::Bit(width), SqlValue::Bytes(b)) => encode_bits(b, width),
        (ColumnClass::Text, SqlValue::Text(s)) => format!("'{}'", escape_text(s)),
        (ColumnClass::Text, SqlValue::Bytes(b)) => {
            format!("'{}'", escape_text(&String::from_utf8_lossy(b)))
        }
    }
}

fn encode_bits(bytes: &[u8], width: usize) -> String {
    let bits = hex_to_bits(&hex::encode_upper(bytes));
    format!("b'{bits:0>width$}'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("bigint(20) unsigned", ColumnClass::Integer)]
    #[case("tinyint(1)", ColumnClass::Integer)]
    #[case("INT", ColumnClass::Integer)]
    #[case("varbinary(255)", ColumnClass::Binary)]
    #[case("longblob", ColumnClass::Binary)]
    #[case("bit(3)", ColumnClass::Bit(3))]
    #[case("bit", ColumnClass::Bit(1))]
    #[case("bit(0)", ColumnClass::Bit(1))]
    #[case("longtext", ColumnClass::Text)]
    #[case("datetime", ColumnClass::Text)]
    #[case("point", ColumnClass::Text)]
    fn test_classify(#[case] data_type: &str, #[case] expected: ColumnClass) {
        assert_eq!(classify(data_type), expected);
    }

    #[rstest]
    #[case(vec![ColumnInfo::new("ID", "bigint(20) unsigned", "PRI")], Some("ID"))]
    #[case(vec![ColumnInfo::new("id", "int", "PRI")], Some("id"))]
    #[case(vec![ColumnInfo::new("id", "mediumint(9) ", "PRI")], Some("id"))]
    #[case(vec![ColumnInfo::new("id", "tinyint(4)", "PRI")], None)]
    #[case(vec![ColumnInfo::new("slug", "varchar(20)", "PRI")], None)]
    #[case(vec![ColumnInfo::new("a", "int", "PRI"), ColumnInfo::new("b", "int", "PRI")], None)]
    #[case(vec![ColumnInfo::new("id", "integer", "PRI")], None)]
    #[case(vec![ColumnInfo::new("meta_id", "bigint", "MUL")], None)]
    fn test_keyset_column(#[case] columns: Vec<ColumnInfo>, #[case] expected: Option<&str>) {
        assert_eq!(keyset_column(&columns).map(|c| c.name.as_str()), expected);
    }

    #[test]
    fn test_escape_text() {
        assert_eq!(escape_text("it's"), "it\\'s");
        assert_eq!(escape_text("a\\b"), "a\\\\b");
        assert_eq!(escape_text("l1\nl2\r\0\x1a"), "l1\\nl2\\r\\0\\Z");
    }

    #[test]
    fn test_encode_integers() {
        assert_eq!(encode_value(ColumnClass::Integer, &SqlValue::text("42")), "42");
        assert_eq!(encode_value(ColumnClass::Integer, &SqlValue::text("")), "NULL");
        assert_eq!(encode_value(ColumnClass::Integer, &SqlValue::Null), "NULL");
    }

    #[test]
    fn test_encode_binary() {
        assert_eq!(
            encode_value(ColumnClass::Binary, &SqlValue::Bytes(vec![0xde, 0xad, 0x01])),
            "0xdead01"
        );
        assert_eq!(encode_value(ColumnClass::Binary, &SqlValue::Bytes(vec![])), "''");
        assert_eq!(encode_value(ColumnClass::Binary, &SqlValue::Null), "NULL");
    }

    #[test]
    fn test_encode_bits_pads_to_width() {
        assert_eq!(encode_value(ColumnClass::Bit(1), &SqlValue::Bytes(vec![1])), "b'00000001'");
        assert_eq!(
            encode_value(ColumnClass::Bit(12), &SqlValue::Bytes(vec![0x05])),
            "b'000000000101'"
        );
        assert_eq!(encode_value(ColumnClass::Bit(3), &SqlValue::Null), "NULL");
    }

    #[test]
    fn test_encode_text() {
        assert_eq!(
            encode_value(ColumnClass::Text, &SqlValue::text("O'Brien\n")),
            "'O\\'Brien\\n'"
        );
        assert_eq!(encode_value(ColumnClass::Text, &SqlValue::text("")), "''");
    }
}

//! SQL text helpers shared by the catalog, dump writer and source adapter

use std::cmp::Ordering;

/// Quote an identifier with backticks
pub fn backquote(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Replace the last occurrence of `needle`
pub fn replace_last(haystack: &str, needle: &str, replacement: &str) -> String {
    match haystack.rfind(needle) {
        Some(pos) if !needle.is_empty() => {
            let mut out = String::with_capacity(haystack.len() + replacement.len());
            out.push_str(&haystack[..pos]);
            out.push_str(replacement);
            out.push_str(&haystack[pos + needle.len()..]);
            out
        }
        _ => haystack.to_string(),
    }
}

/// Replace the first occurrence of `needle`
pub fn replace_once(haystack: &str, needle: &str, replacement: &str) -> String {
    if needle.is_empty() {
        return haystack.to_string();
    }
    haystack.replacen(needle, replacement, 1)
}

/// Compare dotted version strings numerically (`8.0.36-log` vs `5.1`)
pub fn compare_versions(left: &str, right: &str) -> Ordering {
    let parse = |v: &str| -> Vec<u64> {
        v.split(['.', '-', '+', '_'])
            .map_while(|part| {
                let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
                digits.parse::<u64>().ok()
            })
            .collect()
    };
    let (l, r) = (parse(left), parse(right));
    let len = l.len().max(r.len());
    for i in 0..len {
        let a = l.get(i).copied().unwrap_or(0);
        let b = r.get(i).copied().unwrap_or(0);
        match a.cmp(&b) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

pub fn version_at_least(version: &str, minimum: &str) -> bool {
    compare_versions(version, minimum) != Ordering::Less
}

/// Expand hex digits into their bit string (`"0A"` -> `"00001010"`)
pub fn hex_to_bits(hex: &str) -> String {
    hex.chars()
        .filter_map(|c| c.to_digit(16))
        .map(|nibble| format!("{nibble:04b}"))
        .collect()
}

/// Session modes that make dumps of legacy data fail
pub const INCOMPATIBLE_SQL_MODES: &[&str] = &[
    "NO_ZERO_DATE",
    "NO_ZERO_IN_DATE",
    "STRICT_TRANS_TABLES",
    "STRICT_ALL_TABLES",
    "TRADITIONAL",
    "ONLY_FULL_GROUP_BY",
    "ANSI_QUOTES",
];

/// Drop incompatible modes from a `@@SESSION.sql_mode` value
pub fn relaxed_sql_mode(current: &str) -> String {
    current
        .split(',')
        .map(str::trim)
        .filter(|mode| !mode.is_empty())
        .filter(|mode| !INCOMPATIBLE_SQL_MODES.contains(&mode.to_ascii_uppercase().as_str()))
        .collect::<Vec<_>>()
        .join(",")
}

/// Escape a string for use inside single quotes
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

//! Rewriting of native create statements for portable dumps

use crate::utils::sql::{replace_last, replace_once};
use regex::Regex;
use std::sync::OnceLock;

fn engine_option() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"ENGINE=([^\s;]+)").expect("valid regex"))
}

fn page_checksum_option() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"PAGE_CHECKSUM=\d\s?").expect("valid regex"))
}

/// Normalize a `SHOW CREATE TABLE` result
///
/// The legacy `TYPE=` option becomes `ENGINE=`, MyISAM tables lose the
/// MariaDB-only `PAGE_CHECKSUM` option, and the first mention of `table` is
/// renamed to `dump_as` when they differ.
pub fn rewrite_create_statement(create: &str, table: &str, dump_as: &str) -> String {
    let mut statement = replace_last(create, "TYPE=", "ENGINE=");

    let is_myisam = engine_option()
        .captures(&statement)
        .and_then(|caps| caps.get(1))
        .is_some_and(|engine| engine.as_str().eq_ignore_ascii_case("myisam"));
    if is_myisam {
        statement = page_checksum_option().replacen(&statement, 1, "").into_owned();
    }

    if dump_as != table {
        statement = replace_once(&statement, table, dump_as);
    }
    statement
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_becomes_engine() {
        let out = rewrite_create_statement("CREATE TABLE `t` (id int) TYPE=InnoDB", "t", "t");
        assert_eq!(out, "CREATE TABLE `t` (id int) ENGINE=InnoDB");
    }

    #[test]
    fn test_myisam_page_checksum_removed_once() {
        let out = rewrite_create_statement(
            "CREATE TABLE `t` (id int) ENGINE=MyISAM PAGE_CHECKSUM=1 PAGE_CHECKSUM=1",
            "t",
            "t",
        );
        assert_eq!(out, "CREATE TABLE `t` (id int) ENGINE=MyISAM PAGE_CHECKSUM=1");
    }

    #[test]
    fn test_page_checksum_kept_for_other_engines() {
        let create = "CREATE TABLE `t` (id int) ENGINE=Aria PAGE_CHECKSUM=1";
        assert_eq!(rewrite_create_statement(create, "t", "t"), create);
    }

    #[test]
    fn test_dump_as_renames_first_mention() {
        let out = rewrite_create_statement(
            "CREATE TABLE `WP_posts` (KEY `WP_posts_idx` (id)) ENGINE=InnoDB",
            "WP_posts",
            "wp_posts",
        );
        assert_eq!(
            out,
            "CREATE TABLE `wp_posts` (KEY `WP_posts_idx` (id)) ENGINE=InnoDB"
        );
    }
}

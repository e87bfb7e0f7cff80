//! Table catalog ordering, prefix filtering and dump-as naming
//!
//! Tables are dumped before views (views may depend on them). Within each
//! kind, a short list of priority tables comes first, then the core tables
//! of the prefixed schema, then everything else by byte-wise name.

use crate::config::CatalogConfig;
use crate::models::TableEntry;
use crate::utils::sql::replace_once;
use std::collections::HashSet;

/// Ordering rules for one schema prefix
#[derive(Debug, Clone)]
pub struct CatalogRules {
    prefix: String,
    priority: Vec<String>,
    core: HashSet<String>,
}

impl CatalogRules {
    pub fn new<S: Into<String>>(prefix: S, priority: &[String], core: &[String]) -> Self {
        let prefix = prefix.into();
        Self {
            priority: priority.iter().map(|t| format!("{prefix}{t}")).collect(),
            core: core.iter().cloned().collect(),
            prefix,
        }
    }

    pub fn from_config<S: Into<String>>(prefix: S, config: &CatalogConfig) -> Self {
        Self::new(prefix, &config.priority_tables, &config.core_tables)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn sort_key(&self, entry: &TableEntry) -> (bool, usize, bool, Vec<u8>) {
        let priority_rank = self
            .priority
            .iter()
            .position(|p| *p == entry.name)
            .unwrap_or(usize::MAX);
        let non_core = if self.prefix.is_empty() {
            false
        } else {
            !self
                .core
                .contains(&replace_once(&entry.name, &self.prefix, ""))
        };
        (
            entry.is_view(),
            priority_rank,
            non_core,
            entry.name.as_bytes().to_vec(),
        )
    }

    /// Sort entries into dump order
    pub fn order(&self, mut tables: Vec<TableEntry>) -> Vec<TableEntry> {
        tables.sort_by_cached_key(|entry| self.sort_key(entry));
        tables
    }
}

/// True when two catalog names differ only by letter case
pub fn has_case_collision(tables: &[TableEntry]) -> bool {
    let names: HashSet<&str> = tables.iter().map(|t| t.name.as_str()).collect();
    tables.iter().any(|t| {
        let lower = t.name.to_lowercase();
        lower != t.name && names.contains(lower.as_str())
    })
}

/// Whether `name` belongs to the schema with `prefix`
///
/// Matching is case-insensitive unless case collisions exist, in which case
/// only the exact spelling matches. An empty prefix matches everything.
pub fn matches_prefix(name: &str, prefix: &str, exact_case: bool) -> bool {
    if prefix.is_empty() {
        return true;
    }
    if exact_case {
        name.starts_with(prefix)
    } else {
        name.len() >= prefix.len()
            && name.is_char_boundary(prefix.len())
            && name[..prefix.len()].eq_ignore_ascii_case(prefix)
    }
}

/// Name used in emitted statements for `name`
///
/// A table whose prefix differs from the canonical prefix only by case is
/// written with the canonical spelling, unless case collisions make that
/// ambiguous.
pub fn dump_as_name(name: &str, prefix: &str, duplicates_exist: bool) -> String {
    if duplicates_exist || prefix.is_empty() || name.starts_with(prefix) {
        return name.to_string();
    }
    if matches_prefix(name, prefix, false) {
        format!("{prefix}{}", &name[prefix.len()..])
    } else {
        name.to_string()
    }
}

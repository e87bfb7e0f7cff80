//! In-memory dump source
//!
//! Serves canned tables with the same paging semantics as the MySQL
//! adapter. A [`ManualClock`] can be attached so each page fetch advances
//! simulated time, which is how budget and yield behaviour is exercised
//! without a server.

use super::{ColumnInfo, DumpSource, NamedDefinition, PageRequest, RoutineKind, SourceOrigin, SqlValue};
use crate::errors::{SourceError, SourceResult};
use crate::models::{TableEntry, TableKind};
use crate::utils::ManualClock;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One canned table or view
#[derive(Debug, Clone)]
pub struct FixtureTable {
    pub entry: TableEntry,
    pub columns: Vec<ColumnInfo>,
    pub create_statement: String,
    pub rows: Vec<Vec<SqlValue>>,
    /// Simulated time spent per fetched page
    pub page_delay: Duration,
}

impl FixtureTable {
    pub fn table<S: Into<String>>(name: S) -> Self {
        Self::with_entry(TableEntry::table(name))
    }

    pub fn view<S: Into<String>>(name: S) -> Self {
        Self::with_entry(TableEntry::view(name))
    }

    fn with_entry(entry: TableEntry) -> Self {
        let create_statement = match entry.kind {
            TableKind::Table => format!(
                "CREATE TABLE `{}` (\n  `id` bigint(20) unsigned NOT NULL\n) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
                entry.name
            ),
            TableKind::View => format!(
                "CREATE ALGORITHM=UNDEFINED VIEW `{}` AS select 1 AS `one`",
                entry.name
            ),
        };
        Self {
            entry,
            columns: Vec::new(),
            create_statement,
            rows: Vec::new(),
            page_delay: Duration::ZERO,
        }
    }

    pub fn column<N: Into<String>, T: Into<String>, K: Into<String>>(mut self, name: N, data_type: T, key: K) -> Self {
        self.columns.push(ColumnInfo::new(name, data_type, key));
        self
    }

    pub fn create_statement<S: Into<String>>(mut self, create: S) -> Self {
        self.create_statement = create.into();
        self
    }

    pub fn row(mut self, cells: Vec<SqlValue>) -> Self {
        self.rows.push(cells);
        self
    }

    pub fn rows<I: IntoIterator<Item = Vec<SqlValue>>>(mut self, rows: I) -> Self {
        self.rows.extend(rows);
        self
    }

    pub fn page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    fn key_index(&self, key: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == key)
    }
}

/// Dump source over [`FixtureTable`]s
#[derive(Debug)]
pub struct FixtureSource {
    origin: SourceOrigin,
    version: String,
    tables: Vec<FixtureTable>,
    triggers: Vec<NamedDefinition>,
    procedures: Vec<NamedDefinition>,
    functions: Vec<NamedDefinition>,
    clock: Option<Arc<ManualClock>>,
    failing_fetches: Mutex<HashSet<String>>,
    failing_schemas: Mutex<HashSet<String>>,
    fetch_counts: Mutex<HashMap<String, usize>>,
}

impl FixtureSource {
    pub fn new(tables: Vec<FixtureTable>) -> Self {
        Self {
            origin: SourceOrigin {
                host: "fixture".to_string(),
                port: None,
                socket: None,
                database: "fixture_db".to_string(),
                user: "fixture".to_string(),
                password: None,
            },
            version: "8.0.36".to_string(),
            tables,
            triggers: Vec::new(),
            procedures: Vec::new(),
            functions: Vec::new(),
            clock: None,
            failing_fetches: Mutex::new(HashSet::new()),
            failing_schemas: Mutex::new(HashSet::new()),
            fetch_counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<ManualClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_version<S: Into<String>>(mut self, version: S) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_origin(mut self, origin: SourceOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_trigger(mut self, definition: NamedDefinition) -> Self {
        self.triggers.push(definition);
        self
    }

    pub fn with_routine(mut self, kind: RoutineKind, definition: NamedDefinition) -> Self {
        match kind {
            RoutineKind::Procedure => self.procedures.push(definition),
            RoutineKind::Function => self.functions.push(definition),
        }
        self
    }

    /// Make row fetches for `table` fail
    pub fn fail_fetches_for<S: Into<String>>(&self, table: S) {
        self.failing_fetches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(table.into());
    }

    /// Make `SHOW CREATE` for `table` fail
    pub fn fail_schema_for<S: Into<String>>(&self, table: S) {
        self.failing_schemas
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(table.into());
    }

    /// Number of page fetches issued for `table`
    pub fn fetch_count(&self, table: &str) -> usize {
        self.fetch_counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(table)
            .copied()
            .unwrap_or(0)
    }

    fn find(&self, table: &str) -> SourceResult<&FixtureTable> {
        self.tables
            .iter()
            .find(|t| t.entry.name == table)
            .ok_or_else(|| SourceError::TableNotFound {
                table: table.to_string(),
            })
    }
}

#[async_trait]
impl DumpSource for FixtureSource {
    fn origin(&self) -> &SourceOrigin {
        &self.origin
    }

    async fn server_version(&self) -> SourceResult<String> {
        Ok(self.version.clone())
    }

    async fn relax_sql_mode(&self) -> SourceResult<()> {
        Ok(())
    }

    async fn list_tables(&self) -> SourceResult<Vec<TableEntry>> {
        Ok(self.tables.iter().map(|t| t.entry.clone()).collect())
    }

    async fn describe_table(&self, table: &str) -> SourceResult<Vec<ColumnInfo>> {
        Ok(self.find(table)?.columns.clone())
    }

    async fn show_create(&self, table: &str, _kind: TableKind) -> SourceResult<String> {
        if self
            .failing_schemas
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(table)
        {
            return Err(SourceError::query_failed(
                format!("SHOW CREATE TABLE `{table}`"),
                "simulated failure",
            ));
        }
        Ok(self.find(table)?.create_statement.clone())
    }

    async fn fetch_rows(
        &self,
        table: &str,
        columns: &[ColumnInfo],
        page: &PageRequest,
    ) -> SourceResult<Vec<Vec<SqlValue>>> {
        *self
            .fetch_counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(table.to_string())
            .or_default() += 1;

        if self
            .failing_fetches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(table)
        {
            return Err(SourceError::query_failed(
                format!("SELECT * FROM `{table}`"),
                "simulated failure",
            ));
        }

        let fixture = self.find(table)?;
        if let Some(clock) = &self.clock {
            clock.advance(fixture.page_delay);
        }

        let project = |row: &Vec<SqlValue>| -> Vec<SqlValue> {
            columns
                .iter()
                .map(|c| {
                    fixture
                        .key_index(&c.name)
                        .and_then(|i| row.get(i).cloned())
                        .unwrap_or(SqlValue::Null)
                })
                .collect()
        };

        let rows = match page {
            PageRequest::Keyset { key, after, limit } => {
                let index = fixture
                    .key_index(key)
                    .ok_or_else(|| SourceError::query_failed(format!("ORDER BY `{key}`"), "unknown column"))?;
                let mut keyed: Vec<(i128, &Vec<SqlValue>)> = fixture
                    .rows
                    .iter()
                    .filter_map(|row| row.get(index).and_then(SqlValue::as_i128).map(|k| (k, row)))
                    .filter(|(k, _)| match after {
                        None => *k >= 0,
                        Some(last) => k > last,
                    })
                    .collect();
                keyed.sort_by_key(|(k, _)| *k);
                keyed.into_iter().take(*limit).map(|(_, row)| project(row)).collect()
            }
            PageRequest::Offset { offset, limit } => fixture
                .rows
                .iter()
                .skip(usize::try_from(*offset).unwrap_or(usize::MAX))
                .take(*limit)
                .map(project)
                .collect(),
        };
        Ok(rows)
    }

    async fn triggers(&self) -> SourceResult<Vec<NamedDefinition>> {
        Ok(self.triggers.clone())
    }

    async fn routines(&self, kind: RoutineKind) -> SourceResult<Vec<NamedDefinition>> {
        Ok(match kind {
            RoutineKind::Procedure => self.procedures.clone(),
            RoutineKind::Function => self.functions.clone(),
        })
    }
}

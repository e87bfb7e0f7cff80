//! Access to the database being dumped
//!
//! The engine talks to the dumped database only through [`DumpSource`]:
//! catalog enumeration, column metadata, create statements, paged row
//! fetches and stored program definitions. [`mysql::MySqlSource`] is the
//! SeaORM-backed implementation; [`fixture::FixtureSource`] serves canned
//! data for tests and demos.

use crate::errors::SourceResult;
use crate::models::{TableEntry, TableKind};
use async_trait::async_trait;
use strum::Display;

pub mod fixture;
pub mod mysql;

pub use fixture::{FixtureSource, FixtureTable};
pub use mysql::MySqlSource;

/// One row of `DESCRIBE <table>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    /// Declared type, e.g. `bigint(20) unsigned`
    pub data_type: String,
    /// Key marker: `PRI`, `UNI`, `MUL` or empty
    pub key: String,
}

impl ColumnInfo {
    pub fn new<N: Into<String>, T: Into<String>, K: Into<String>>(name: N, data_type: T, key: K) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            key: key.into(),
        }
    }

    pub fn is_primary(&self) -> bool {
        self.key == "PRI" && !self.name.is_empty()
    }
}

/// A fetched cell
///
/// Binary and bit columns arrive as raw bytes, everything else as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Null,
    Text(String),
    Bytes(Vec<u8>),
}

impl SqlValue {
    pub fn text<S: Into<String>>(value: S) -> Self {
        SqlValue::Text(value.into())
    }

    /// Integer reading of the value, used for keyset pagination
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            SqlValue::Text(s) => s.trim().parse().ok(),
            SqlValue::Bytes(b) => std::str::from_utf8(b).ok()?.trim().parse().ok(),
            SqlValue::Null => None,
        }
    }
}

/// Which slice of a table to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageRequest {
    /// Rows with `key >= 0` (first page) or `key > after`, ascending by key
    Keyset {
        key: String,
        after: Option<i128>,
        limit: usize,
    },
    /// `LIMIT offset, limit` without ordering guarantees
    Offset { offset: u64, limit: usize },
}

impl PageRequest {
    pub fn limit(&self) -> usize {
        match self {
            PageRequest::Keyset { limit, .. } | PageRequest::Offset { limit, .. } => *limit,
        }
    }
}

/// Stored program categories emitted after the table data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum RoutineKind {
    #[strum(serialize = "PROCEDURE")]
    Procedure,
    #[strum(serialize = "FUNCTION")]
    Function,
}

/// Name and `SHOW CREATE ...` text of a trigger or routine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedDefinition {
    pub name: String,
    pub create_statement: String,
}

impl NamedDefinition {
    pub fn new<N: Into<String>, S: Into<String>>(name: N, create_statement: S) -> Self {
        Self {
            name: name.into(),
            create_statement: create_statement.into(),
        }
    }
}

/// Connection details needed outside the pool (header, external dump binary)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceOrigin {
    pub host: String,
    pub port: Option<u16>,
    pub socket: Option<String>,
    pub database: String,
    pub user: String,
    pub password: Option<String>,
}

/// Read-only view of the database being dumped
#[async_trait]
pub trait DumpSource: Send + Sync {
    /// Connection details of this source
    fn origin(&self) -> &SourceOrigin;

    /// `SELECT VERSION()`
    async fn server_version(&self) -> SourceResult<String>;

    /// Remove session SQL modes that reject legacy values
    async fn relax_sql_mode(&self) -> SourceResult<()>;

    /// All tables and views, unordered
    async fn list_tables(&self) -> SourceResult<Vec<TableEntry>>;

    async fn describe_table(&self, table: &str) -> SourceResult<Vec<ColumnInfo>>;

    /// Native create statement of a table or view
    async fn show_create(&self, table: &str, kind: TableKind) -> SourceResult<String>;

    /// One page of rows, cells in `columns` order
    async fn fetch_rows(
        &self,
        table: &str,
        columns: &[ColumnInfo],
        page: &PageRequest,
    ) -> SourceResult<Vec<Vec<SqlValue>>>;

    async fn triggers(&self) -> SourceResult<Vec<NamedDefinition>>;

    async fn routines(&self, kind: RoutineKind) -> SourceResult<Vec<NamedDefinition>>;
}

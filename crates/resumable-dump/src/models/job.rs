//! Persisted dump job state and partial updates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use strum::{Display, EnumString};
use tracing::warn;

/// Lifecycle status of a dump job
///
/// `Complete` and `Failed` are terminal; the store never moves a job out of
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
    Running,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }
}

/// Catalog kind of a dumped relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum TableKind {
    #[serde(rename = "BASE TABLE")]
    #[strum(serialize = "BASE TABLE")]
    Table,
    #[serde(rename = "VIEW")]
    #[strum(serialize = "VIEW")]
    View,
}

impl TableKind {
    /// Map the `Table_type` column of `SHOW FULL TABLES`
    pub fn from_catalog(table_type: &str) -> Self {
        if table_type.trim().eq_ignore_ascii_case("VIEW") {
            TableKind::View
        } else {
            TableKind::Table
        }
    }

    /// Word used in the dump's section comments
    pub fn description(&self) -> &'static str {
        match self {
            TableKind::Table => "table",
            TableKind::View => "view",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableEntry {
    pub name: String,
    pub kind: TableKind,
}

impl TableEntry {
    pub fn table<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            kind: TableKind::Table,
        }
    }

    pub fn view<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            kind: TableKind::View,
        }
    }

    pub fn is_view(&self) -> bool {
        self.kind == TableKind::View
    }
}

/// Full state of one dump job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    /// Fixed once at creation, in dump order
    #[serde(default)]
    pub tables: Vec<TableEntry>,
    /// Index of the next table to process
    #[serde(default)]
    pub cursor: usize,
    #[serde(default)]
    pub current_table: Option<String>,
    #[serde(default)]
    pub header_written: bool,
    #[serde(default)]
    pub footer_written: bool,
    pub output_path: PathBuf,
    #[serde(default)]
    pub compressed: bool,
    #[serde(default)]
    pub bytes_written: u64,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default = "default_fetch_batch_size")]
    pub fetch_batch_size: usize,
    #[serde(default)]
    pub resume_interval_secs: Option<u64>,
    /// Resumption number to observed duration in seconds
    #[serde(default)]
    pub run_timings: BTreeMap<u32, f64>,
    /// Resumption number to unix start time in seconds
    #[serde(default)]
    pub run_start_times: BTreeMap<u32, f64>,
    #[serde(default)]
    pub useful_checkins: BTreeSet<u32>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub resumption: u32,
    #[serde(default)]
    pub dump_binary: Option<PathBuf>,
    #[serde(default)]
    pub duplicate_tables_exist: bool,
    #[serde(default)]
    pub activity_detected: Option<String>,
}

fn default_fetch_batch_size() -> usize {
    crate::config::defaults::DEFAULT_FETCH_BATCH_SIZE
}

impl Job {
    pub fn total_tables(&self) -> usize {
        self.tables.len()
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Field-level partial update of a [`Job`]
///
/// Stores merge patches per top-level field. The merge keeps the job's
/// invariants regardless of delivery order: a terminal status is never
/// replaced by `running`, `cursor` never decreases, and the header/footer
/// flags never go back to false.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    fields: Map<String, Value>,
}

impl JobPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// A patch carrying every field of `job`
    pub fn full(job: &Job) -> Result<Self, serde_json::Error> {
        match serde_json::to_value(job)? {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(serde::ser::Error::custom(format!(
                "job serialized to non-object value: {other}"
            ))),
        }
    }

    fn set<T: Serialize>(mut self, key: &str, value: T) -> Self {
        match serde_json::to_value(value) {
            Ok(v) => {
                self.fields.insert(key.to_string(), v);
            }
            Err(e) => warn!("Dropping job field {} from patch: {}", key, e),
        }
        self
    }

    pub fn status(self, status: JobStatus) -> Self {
        self.set("status", status)
    }

    pub fn cursor(self, cursor: usize) -> Self {
        self.set("cursor", cursor)
    }

    pub fn current_table(self, table: &str) -> Self {
        self.set("current_table", table)
    }

    pub fn header_written(self) -> Self {
        self.set("header_written", true)
    }

    pub fn footer_written(self) -> Self {
        self.set("footer_written", true)
    }

    pub fn bytes_written(self, bytes: u64) -> Self {
        self.set("bytes_written", bytes)
    }

    pub fn updated_at(self, at: DateTime<Utc>) -> Self {
        self.set("updated_at", at)
    }

    pub fn resume_interval(self, seconds: u64) -> Self {
        self.set("resume_interval_secs", seconds)
    }

    pub fn run_timings(self, timings: &BTreeMap<u32, f64>) -> Self {
        self.set("run_timings", timings)
    }

    pub fn run_start_times(self, starts: &BTreeMap<u32, f64>) -> Self {
        self.set("run_start_times", starts)
    }

    pub fn useful_checkins(self, checkins: &BTreeSet<u32>) -> Self {
        self.set("useful_checkins", checkins)
    }

    pub fn error<S: Into<String>>(self, message: S) -> Self {
        self.set("error", message.into())
    }

    pub fn resumption(self, resumption: u32) -> Self {
        self.set("resumption", resumption)
    }

    pub fn activity_detected<S: Into<String>>(self, note: S) -> Self {
        self.set("activity_detected", note.into())
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// True when the patch describes a whole job rather than a few fields
    pub fn is_full(&self) -> bool {
        self.fields.contains_key("id") && self.fields.contains_key("output_path")
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Merge into a stored document
    pub fn merge_into(&self, doc: &mut Map<String, Value>) {
        let terminal = doc
            .get("status")
            .and_then(|v| serde_json::from_value::<JobStatus>(v.clone()).ok())
            .is_some_and(|s| s.is_terminal());

        for (key, value) in &self.fields {
            match key.as_str() {
                "status" if terminal => {
                    if doc.get("status") != Some(value) {
                        warn!("Ignoring status change to {} on a finished job", value);
                    }
                    continue;
                }
                "cursor" => {
                    let current = doc.get("cursor").and_then(Value::as_u64).unwrap_or(0);
                    if value.as_u64().is_some_and(|new| new < current) {
                        continue;
                    }
                }
                "header_written" | "footer_written" => {
                    if doc.get(key).and_then(Value::as_bool).unwrap_or(false) {
                        continue;
                    }
                }
                _ => {}
            }
            doc.insert(key.clone(), value.clone());
        }
    }
}

//! SQL text emission: header, per-table blocks, stored programs, footer

use super::encode::{ColumnClass, classify, encode_value, keyset_column};
use super::output::DumpOutput;
use super::schema::rewrite_create_statement;
use crate::database::{DumpSource, NamedDefinition, PageRequest};
use crate::errors::DumpResult;
use crate::models::{TableEntry, TableKind};
use crate::utils::sql::backquote;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// Facts printed at the top of every dump
#[derive(Debug, Clone)]
pub struct HeaderInfo {
    pub server_version: String,
    pub generated_at: DateTime<Utc>,
    pub host: String,
    pub database: String,
    pub table_prefix: String,
}

pub fn write_header(out: &mut DumpOutput, info: &HeaderInfo) -> DumpResult<()> {
    let mut header = String::new();
    header.push_str("# MySQL database dump\n");
    header.push_str(&format!(
        "# Created by resumable-dump {}\n",
        env!("CARGO_PKG_VERSION")
    ));
    header.push_str(&format!("# Server version: MySQL {}\n", info.server_version));
    header.push_str(&format!("# Table prefix: {}\n", info.table_prefix));
    header.push_str(&format!(
        "\n# Generated: {}\n",
        info.generated_at.format("%A %-d. %B %Y %H:%M UTC")
    ));
    header.push_str(&format!("# Hostname: {}\n", info.host));
    header.push_str(&format!("# Database: {}\n", backquote(&info.database)));
    header.push_str("# --------------------------------------------------------\n\n");
    header.push_str("/*!40101 SET @OLD_CHARACTER_SET_CLIENT=@@CHARACTER_SET_CLIENT */;\n");
    header.push_str("/*!40101 SET @OLD_CHARACTER_SET_RESULTS=@@CHARACTER_SET_RESULTS */;\n");
    header.push_str("/*!40101 SET @OLD_COLLATION_CONNECTION=@@COLLATION_CONNECTION */;\n");
    header.push_str("/*!40101 SET @OLD_SQL_MODE=@@SQL_MODE, SQL_MODE='NO_AUTO_VALUE_ON_ZERO' */;\n");
    header.push_str("/*!40101 SET NAMES utf8mb4 */;\n");
    header.push_str("/*!40101 SET foreign_key_checks = 0 */;\n\n");
    out.write_str(&header)
}

pub fn write_footer(out: &mut DumpOutput) -> DumpResult<()> {
    out.write_str(concat!(
        "\n/*!40101 SET SQL_MODE=@OLD_SQL_MODE */;\n",
        "/*!40101 SET CHARACTER_SET_CLIENT=@OLD_CHARACTER_SET_CLIENT */;\n",
        "/*!40101 SET CHARACTER_SET_RESULTS=@OLD_CHARACTER_SET_RESULTS */;\n",
        "/*!40101 SET COLLATION_CONNECTION=@OLD_COLLATION_CONNECTION */;\n",
    ))
}

/// Drop statements, create statement and the data section heading
pub fn write_table_start(
    out: &mut DumpOutput,
    table: &TableEntry,
    dump_as: &str,
    create_statement: &str,
) -> DumpResult<()> {
    let quoted = backquote(&table.name);
    let quoted_as = backquote(dump_as);
    let description = table.kind.description();

    let mut block = format!(
        "\n# Delete any existing table {quoted}\n\nDROP TABLE IF EXISTS {quoted_as};\n"
    );
    if table.kind == TableKind::View {
        block.push_str(&format!("DROP VIEW IF EXISTS {quoted_as};\n"));
    }
    block.push_str(&format!("\n# Table structure of {description} {quoted}\n\n"));
    block.push_str(&rewrite_create_statement(create_statement, &table.name, dump_as));
    block.push_str(" ;");
    block.push_str(&format!("\n\n# Data contents of {description} {quoted}\n\n"));
    out.write_str(&block)
}

pub fn write_table_end(out: &mut DumpOutput, table: &str) -> DumpResult<()> {
    out.write_str(&format!(
        "\n# End of data contents of table {}\n\n",
        backquote(table)
    ))
}

/// Triggers as drop/create pairs inside a `;;` delimiter block
pub fn write_triggers(out: &mut DumpOutput, triggers: &[NamedDefinition]) -> DumpResult<()> {
    write_program_block(out, "Triggers", "TRIGGER", triggers)
}

pub fn write_procedures(out: &mut DumpOutput, procedures: &[NamedDefinition]) -> DumpResult<()> {
    write_program_block(out, "Stored Procedures", "PROCEDURE", procedures)
}

pub fn write_functions(out: &mut DumpOutput, functions: &[NamedDefinition]) -> DumpResult<()> {
    write_program_block(out, "Stored Functions", "FUNCTION", functions)
}

fn write_program_block(
    out: &mut DumpOutput,
    heading: &str,
    kind: &str,
    definitions: &[NamedDefinition],
) -> DumpResult<()> {
    if definitions.is_empty() {
        return Ok(());
    }
    let mut block = format!("\n# {heading}\n\nDELIMITER ;;\n\n");
    for definition in definitions {
        block.push_str(&format!(
            "DROP {kind} IF EXISTS {};;\n",
            backquote(&definition.name)
        ));
        block.push_str(&definition.create_statement);
        block.push_str(";;\n\n");
    }
    block.push_str("DELIMITER ;\n\n");
    out.write_str(&block)
}

/// Writes table blocks by querying the source directly
pub struct TableDumper<'a> {
    source: &'a dyn DumpSource,
    fetch_batch_size: usize,
    max_statement_bytes: usize,
}

impl<'a> TableDumper<'a> {
    pub fn new(source: &'a dyn DumpSource, fetch_batch_size: usize, max_statement_bytes: usize) -> Self {
        Self {
            source,
            fetch_batch_size: fetch_batch_size.max(1),
            max_statement_bytes,
        }
    }

    /// Dump schema and (for base tables) data of one table
    ///
    /// Schema lookup failures are returned. A failure while fetching rows is
    /// written into the dump as a comment and the table is closed normally.
    pub async fn dump(&self, out: &mut DumpOutput, table: &TableEntry, dump_as: &str) -> DumpResult<u64> {
        let columns = self.source.describe_table(&table.name).await?;
        if columns.is_empty() {
            warn!("Table {} has no columns, skipping", table.name);
            return Ok(0);
        }

        let create = self.source.show_create(&table.name, table.kind).await?;
        write_table_start(out, table, dump_as, &create)?;

        if table.is_view() {
            write_table_end(out, &table.name)?;
            return Ok(0);
        }

        let classes: Vec<ColumnClass> = columns.iter().map(|c| classify(&c.data_type)).collect();
        let key = keyset_column(&columns).map(|c| c.name.clone());
        let key_index = key
            .as_ref()
            .and_then(|k| columns.iter().position(|c| &c.name == k));
        let insert_prefix = format!("INSERT INTO {} VALUES ", backquote(dump_as));

        let mut after: Option<i128> = None;
        let mut offset: u64 = 0;
        let mut rows_written: u64 = 0;

        loop {
            let page = match &key {
                Some(key) => PageRequest::Keyset {
                    key: key.clone(),
                    after,
                    limit: self.fetch_batch_size,
                },
                None => PageRequest::Offset {
                    offset,
                    limit: self.fetch_batch_size,
                },
            };

            let rows = match self.source.fetch_rows(&table.name, &columns, &page).await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!("Fetching rows from {} failed: {}", table.name, e);
                    out.write_str(&format!(
                        "\n# Error fetching data from table {}: {}\n",
                        backquote(&table.name),
                        single_line(&e.to_string())
                    ))?;
                    break;
                }
            };
            if rows.is_empty() {
                break;
            }

            let mut entry = String::new();
            for row in &rows {
                if !entry.is_empty() {
                    entry.push_str(",\n ");
                }
                entry.push('(');
                for (i, (class, value)) in classes.iter().zip(row.iter()).enumerate() {
                    if i > 0 {
                        entry.push_str(", ");
                    }
                    entry.push_str(&encode_value(*class, value));
                }
                entry.push(')');

                if let Some(index) = key_index {
                    if let Some(value) = row.get(index).and_then(|v| v.as_i128()) {
                        if after.is_none_or(|last| value > last) {
                            after = Some(value);
                        }
                    }
                }

                if entry.len() > self.max_statement_bytes {
                    flush_insert(out, &insert_prefix, &mut entry)?;
                }
            }
            flush_insert(out, &insert_prefix, &mut entry)?;
            rows_written += rows.len() as u64;

            match &page {
                PageRequest::Keyset { after: requested, .. } => {
                    if *requested == after {
                        warn!(
                            "Key column of {} did not advance, stopping pagination",
                            table.name
                        );
                        break;
                    }
                }
                PageRequest::Offset { .. } => offset += self.fetch_batch_size as u64,
            }
        }

        write_table_end(out, &table.name)?;
        debug!("Dumped {} rows from {}", rows_written, table.name);
        Ok(rows_written)
    }
}

fn flush_insert(out: &mut DumpOutput, prefix: &str, entry: &mut String) -> DumpResult<()> {
    if entry.is_empty() {
        return Ok(());
    }
    out.write_str(" \n")?;
    out.write_str(prefix)?;
    entry.push(';');
    out.write_str(entry)?;
    entry.clear();
    Ok(())
}

fn single_line(message: &str) -> String {
    message.replace(['\n', '\r'], " ")
}

//! Producing the SQL dump artifact
//!
//! [`output::DumpOutput`] is the append-or-create stream a resumption writes
//! into. Tables are exported either by an external `mysqldump`
//! ([`bindump::BinaryDumper`], located by [`locator::DumpBinaryLocator`]) or
//! in-process by [`writer::TableDumper`]. The writer module also owns the
//! header, footer and stored program blocks.

pub mod bindump;
pub mod encode;
pub mod locator;
pub mod output;
pub mod schema;
pub mod writer;

pub use bindump::BinaryDumper;
pub use locator::DumpBinaryLocator;
pub use output::DumpOutput;
pub use writer::{HeaderInfo, TableDumper};

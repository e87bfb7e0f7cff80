pub mod job;

pub use job::{Job, JobPatch, JobStatus, TableEntry, TableKind};

//! Resumable, time-boxed MySQL dump engine
//!
//! A dump job is split into resumptions, each bounded by a wall-clock
//! budget. State is persisted between resumptions and follow-ups are driven
//! by a tick queue, so a dump of any size completes in short slices.

pub mod catalog;
pub mod config;
pub mod database;
pub mod dump;
pub mod engine;
pub mod errors;
pub mod job_scheduling;
pub mod lock;
pub mod models;
pub mod service;
pub mod store;
pub mod utils;

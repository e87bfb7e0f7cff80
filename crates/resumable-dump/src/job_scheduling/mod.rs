//! Resumption scheduling for dump jobs
//!
//! - `TickQueue`: deduplicated delayed-resumption queue (the tick source)
//! - `ReschedulePolicy`: adaptive interval, overlap detection, escalation
//! - `TickRunner`: executes due resumptions through the engine

pub mod policy;
pub mod runner;
pub mod tick_queue;
pub mod types;

pub use policy::{Overlap, PolicySettings, ReschedulePolicy, ResumeContext};
pub use runner::TickRunner;
pub use tick_queue::{TickQueue, TickSource};
pub use types::*;

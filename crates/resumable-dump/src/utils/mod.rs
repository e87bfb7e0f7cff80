//! Utility modules

pub mod clock;
pub mod sql;

pub use clock::{Clock, ManualClock, SystemClock};

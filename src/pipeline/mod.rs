//! Evaluation pipeline.
//!
//! Flow per dataset and method:
//! Records + Ledgers → BatchPlan → Method → Validation → Records + Ledgers → Progress

mod planner;
mod progress;
mod runner;
mod validate;

pub use planner::*;
pub use progress::*;
pub use runner::*;
pub use validate::*;

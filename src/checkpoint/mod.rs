//! Checkpoint module for resumable benches.
//!
//! Provides:
//! - `Workspace`: Bench directory provisioning and idempotent seeding
//! - `store`: Record file persistence with corruption recovery
//! - `Ledgers`: Success/failure ledgers keyed by record and method

mod ledger;
mod store;
mod workspace;

pub use ledger::*;
pub use store::*;
pub use workspace::*;

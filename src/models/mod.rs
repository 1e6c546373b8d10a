//! Core data models for parabench.
//!
//! Epistemic mapping:
//! - K_i (Knowledge): Concrete types with compile-time guarantees
//! - B_i (Beliefs): Wrapped in Result/Option
//! - I^R (Resolvable): Config parameters

mod config;
mod error;
mod record;

pub use config::*;
pub use error::*;
pub use record::*;

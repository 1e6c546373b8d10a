//! parabench - Resumable batch evaluation of paraphrase prediction methods.
//!
//! ## Architecture
//!
//! A bench is one directory under `benches/<id>/` holding, per dataset:
//! - **Records** (`<name>.json`): the dataset, accumulating one boolean verdict per method
//! - **Success ledger** (`succ_<name>.json`): attempts whose verdicts were merged
//! - **Failure ledger** (`faults_<name>.json`): attempts that were rejected
//!
//! ## Flow
//!
//! - **Workspace**: Copy pristine datasets into the bench, never overwriting
//! - **Planner**: Pending keys per method → ordered, fixed-size batches
//! - **Runner**: Invoke → validate → retry or merge → ledger → progress
//! - **Report**: Ledger rates and per-group error rates from the produced files
//!
//! ## Epistemic Design
//!
//! - K_i (Knowledge): Compile-time enforced invariants (types, enums)
//! - B_i (Beliefs): Runtime fallible operations (Result, Option)
//! - I^R (Resolvable): User-configurable parameters
//! - I^B (Bounded): Method and network uncertainties (validation, retry, backoff)

pub mod checkpoint;
pub mod client;
pub mod methods;
pub mod models;
pub mod pipeline;
pub mod report;

// Re-exports for convenience
pub use checkpoint::{Ledgers, Workspace};
pub use client::{EndpointRegistry, LLMClient};
pub use methods::{FnMethod, MethodRegistry, PredictionMethod};
pub use models::{BenchError, BenchStats, Config, Dataset, Record, Result, SentencePair};
pub use pipeline::{BenchRunner, RunOptions};

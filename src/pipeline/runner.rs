//! Bench runner: every dataset, every method, every pending batch.
//!
//! Epistemic foundation:
//! - K_i: Strictly sequential; one dataset, one method, one batch at a time
//! - K_i: A batch's verdicts reach the record file only after they validate
//! - K_i: Every attempt is ledgered before the next attempt or batch starts
//! - B_i: A method may return garbage or fail → contained, retried, ledgered
//! - I^B: Record files may be damaged between runs → reseeded per dataset

use crate::checkpoint::{
    AttemptOutcome, BatchMarker, DatasetPaths, Ledgers, Workspace, load_or_reseed, write_records,
};
use crate::methods::{MethodRegistry, PredictionMethod};
use crate::models::{
    BenchConfig, BenchError, BenchStats, Dataset, FailurePolicy, Record, Result, SentencePair,
    purge_method,
};
use crate::pipeline::{
    AttemptBudget, BatchOutcome, BatchPlan, ProgressReporter, Violation, check_invocation,
};
use chrono::Utc;
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Knobs of one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub batch_size: usize,
    pub max_attempts: u32,
    pub purge: bool,
    pub failure_policy: FailurePolicy,
    /// Dataset base names; empty means every dataset in the source directory
    pub datasets: Vec<String>,
    /// Draw a progress bar (off in tests and non-interactive use)
    pub show_progress: bool,
}

impl From<&BenchConfig> for RunOptions {
    fn from(bench: &BenchConfig) -> Self {
        Self {
            batch_size: bench.batch_size,
            max_attempts: bench.max_attempts,
            purge: bench.purge,
            failure_policy: bench.failed_batches,
            datasets: bench.datasets.clone(),
            show_progress: true,
        }
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from(&BenchConfig::default())
    }
}

/// In-memory state of the dataset being processed.
///
/// Owns the record mapping and both ledgers, and is the only writer of the
/// three backing files while it lives.
pub struct DatasetContext {
    pub name: String,
    pub paths: DatasetPaths,
    pub dataset: Dataset,
    pub ledgers: Ledgers,
}

impl DatasetContext {
    /// Load records (reseeding unreadable files) and ledgers of `name`.
    ///
    /// `Ok(None)` means the dataset has to be skipped.
    pub fn open(workspace: &Workspace, name: &str) -> Result<Option<Self>> {
        let Some(loaded) = load_or_reseed(workspace, name)? else {
            return Ok(None);
        };
        let paths = workspace.paths(name);
        let ledgers = Ledgers::load(&paths);

        let ctx = Self {
            name: name.to_string(),
            paths,
            dataset: loaded.dataset,
            ledgers,
        };
        if loaded.reseeded {
            let stranded = ctx.stranded();
            if stranded > 0 {
                warn!(
                    dataset = %name,
                    stranded,
                    "Reseeded records still in the success ledger will not be evaluated again; \
                     rerun with --purge to redo them"
                );
            }
        }
        Ok(Some(ctx))
    }

    /// Records the success ledger concludes for some method that has no
    /// result field for it, e.g. after a reseed.
    pub fn stranded(&self) -> usize {
        self.dataset
            .iter()
            .filter(|(key, record)| {
                self.ledgers
                    .successes
                    .methods_of(key)
                    .any(|method| !record.has_result(method))
            })
            .count()
    }

    /// Strip every verdict and ledger entry of `methods`, then persist.
    pub fn purge(&mut self, methods: &[&str]) -> Result<()> {
        for method in methods {
            let removed = purge_method(&mut self.dataset, method);
            let forgotten = self.ledgers.forget_method(method)?;
            info!(
                dataset = %self.name,
                method = %method,
                removed,
                ledger_entries = forgotten,
                "Purged results"
            );
        }
        write_records(&self.paths.records, &self.dataset)
    }

    pub fn plan(&self, method: &str, batch_size: usize, policy: FailurePolicy) -> BatchPlan {
        BatchPlan::new(&self.dataset, &self.ledgers, method, batch_size, policy)
    }

    /// Sentence pairs of `keys`, in key order.
    pub fn pairs(&self, keys: &[String]) -> Vec<SentencePair> {
        keys.iter()
            .filter_map(|key| self.dataset.get(key).map(Record::pair))
            .collect()
    }

    /// Write `verdicts` into the records of `keys` and persist the whole file.
    pub fn merge(&mut self, keys: &[String], method: &str, verdicts: &[bool]) -> Result<()> {
        for (key, verdict) in keys.iter().zip(verdicts) {
            if let Some(record) = self.dataset.get_mut(key) {
                record.set_verdict(method, *verdict);
            }
        }
        write_records(&self.paths.records, &self.dataset)
    }

    /// Ledger one attempt for every key of the batch.
    pub fn note(
        &mut self,
        keys: &[String],
        method: &str,
        attempt: u32,
        violation: Option<&Violation>,
        pairs: &[SentencePair],
    ) -> Result<()> {
        let marker = BatchMarker {
            attempt,
            outcome: match violation {
                None => AttemptOutcome::Success,
                Some(_) => AttemptOutcome::Failure,
            },
            violation: violation.map(ToString::to_string),
            at: Utc::now(),
            pairs: pairs.to_vec(),
        };
        self.ledgers.record(keys, method, &marker)
    }
}

/// Call `method`, turning a panic into an ordinary prediction error.
async fn invoke(
    method: &dyn PredictionMethod,
    pairs: &[SentencePair],
) -> Result<serde_json::Value> {
    AssertUnwindSafe(method.predict(pairs))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            Err(BenchError::Prediction(format!(
                "method panicked: {}",
                panic_message(panic.as_ref())
            )))
        })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// Drives the registered methods over the datasets of one workspace.
pub struct BenchRunner<'a> {
    workspace: &'a Workspace,
    methods: &'a MethodRegistry,
    options: RunOptions,
}

impl<'a> BenchRunner<'a> {
    pub fn new(workspace: &'a Workspace, methods: &'a MethodRegistry, options: RunOptions) -> Self {
        Self {
            workspace,
            methods,
            options,
        }
    }

    /// Run every method over every dataset.
    ///
    /// Only persistence failures are returned; anything a method does wrong
    /// is ledgered and logged.
    pub async fn run(&self) -> Result<BenchStats> {
        let start = Instant::now();
        let mut stats = BenchStats {
            methods: self.methods.len(),
            ..Default::default()
        };

        let datasets = self.workspace.dataset_names(&self.options.datasets)?;
        info!(
            bench_id = %self.workspace.bench_id(),
            datasets = datasets.len(),
            methods = self.methods.len(),
            batch_size = self.options.batch_size,
            max_attempts = self.options.max_attempts,
            failed_batches = ?self.options.failure_policy,
            "Starting bench"
        );

        for name in &datasets {
            self.run_dataset(name, &mut stats).await?;
        }

        stats.runtime_secs = start.elapsed().as_secs_f64();
        stats.finalize();

        info!(
            datasets = stats.datasets_processed,
            skipped = stats.datasets_skipped,
            merged = stats.batches_merged,
            abandoned = stats.batches_abandoned,
            predictions = stats.predictions_written,
            runtime_secs = %format!("{:.1}", stats.runtime_secs),
            "Bench complete"
        );

        Ok(stats)
    }

    async fn run_dataset(&self, name: &str, stats: &mut BenchStats) -> Result<()> {
        let Some(mut ctx) = DatasetContext::open(self.workspace, name)? else {
            error!(dataset = %name, "Could not read records, skipping dataset");
            stats.datasets_skipped += 1;
            return Ok(());
        };

        info!(dataset = %name, records = ctx.dataset.len(), "Processing dataset");

        if self.options.purge {
            ctx.purge(&self.methods.names())?;
        }

        for (method_name, method) in self.methods.iter() {
            self.run_method(&mut ctx, method_name, method, stats).await?;
        }

        stats.datasets_processed += 1;
        Ok(())
    }

    async fn run_method(
        &self,
        ctx: &mut DatasetContext,
        method_name: &str,
        method: &dyn PredictionMethod,
        stats: &mut BenchStats,
    ) -> Result<()> {
        let plan = ctx.plan(
            method_name,
            self.options.batch_size,
            self.options.failure_policy,
        );
        if plan.is_empty() {
            info!(dataset = %ctx.name, method = %method_name, "Nothing pending");
            return Ok(());
        }

        info!(
            dataset = %ctx.name,
            method = %method_name,
            pending = plan.total(),
            batches = plan.batches.len(),
            "Evaluating"
        );

        let mut progress = if self.options.show_progress {
            ProgressReporter::new(method_name, plan.total())
        } else {
            ProgressReporter::hidden(method_name, plan.total())
        };

        for keys in &plan.batches {
            match self.run_batch(ctx, method_name, method, keys, stats).await? {
                BatchOutcome::Merged { attempts, verdicts } => {
                    stats.batches_merged += 1;
                    stats.predictions_written += verdicts.len();
                    let line = progress.advance(keys.len());
                    debug!(dataset = %ctx.name, attempts, "{line}");
                }
                BatchOutcome::Abandoned { attempts, last } => {
                    stats.batches_abandoned += 1;
                    error!(
                        dataset = %ctx.name,
                        method = %method_name,
                        keys = ?keys,
                        attempts,
                        violation = %last.kind(),
                        "Batch abandoned"
                    );
                }
            }
        }

        progress.finish();
        info!(
            dataset = %ctx.name,
            method = %method_name,
            merged = progress.processed(),
            pending = plan.total(),
            "Method finished"
        );
        Ok(())
    }

    /// Drive one batch to a terminal state.
    ///
    /// Each attempt consumes one unit of budget and lands in exactly one
    /// ledger. On success the records are written before the success ledger.
    async fn run_batch(
        &self,
        ctx: &mut DatasetContext,
        method_name: &str,
        method: &dyn PredictionMethod,
        keys: &[String],
        stats: &mut BenchStats,
    ) -> Result<BatchOutcome> {
        let pairs = ctx.pairs(keys);
        let mut budget = AttemptBudget::new(self.options.max_attempts);
        let mut last = None;

        while let Some(attempt) = budget.begin() {
            let result = invoke(method, &pairs).await;

            match check_invocation(result, pairs.len()) {
                Ok(verdicts) => {
                    ctx.merge(keys, method_name, &verdicts)?;
                    ctx.note(keys, method_name, attempt, None, &pairs)?;
                    return Ok(BatchOutcome::Merged {
                        attempts: attempt,
                        verdicts,
                    });
                }
                Err(violation) => {
                    stats.failed_attempts += 1;
                    warn!(
                        dataset = %ctx.name,
                        method = %method_name,
                        keys = ?keys,
                        attempt,
                        remaining = budget.remaining(),
                        kind = violation.kind(),
                        violation = %violation,
                        "Batch attempt rejected"
                    );
                    ctx.note(keys, method_name, attempt, Some(&violation), &pairs)?;
                    last = Some(violation);
                }
            }
        }

        Ok(BatchOutcome::Abandoned {
            attempts: budget.used(),
            last: last.unwrap_or_else(|| Violation::Exception("no attempts allowed".to_string())),
        })
    }
}

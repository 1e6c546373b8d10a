//! Record and dataset types for parabench.
//!
//! K_i: These types represent the file-resident data flow through a bench.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field holding the first text of a pair.
pub const SENTENCE1: &str = "sentence1";
/// Field holding the second text of a pair.
pub const SENTENCE2: &str = "sentence2";

/// The ordered pair of texts a prediction method judges.
pub type SentencePair = (String, String);

/// One evaluation sample.
///
/// K_i: The two text fields are required and never rewritten.
/// Every other field (labels, scores, verdicts keyed by method name) is kept
/// as-is, in file order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub sentence1: Value,

    pub sentence2: Value,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// A dataset: record key → record, in dataset-file order.
pub type Dataset = IndexMap<String, Record>;

impl Record {
    /// Build a record with no extra fields.
    pub fn new(sentence1: impl Into<String>, sentence2: impl Into<String>) -> Self {
        Self {
            sentence1: Value::String(sentence1.into()),
            sentence2: Value::String(sentence2.into()),
            fields: Map::new(),
        }
    }

    /// The texts as handed to prediction methods.
    ///
    /// Non-string scalars are stringified rather than rejected.
    pub fn pair(&self) -> SentencePair {
        (text_of(&self.sentence1), text_of(&self.sentence2))
    }

    /// Whether a result field exists for `method`, whatever its value.
    pub fn has_result(&self, method: &str) -> bool {
        self.fields.contains_key(method)
    }

    /// The boolean verdict for `method`, if one is stored.
    pub fn verdict(&self, method: &str) -> Option<bool> {
        self.fields.get(method).and_then(Value::as_bool)
    }

    pub fn set_verdict(&mut self, method: &str, verdict: bool) {
        self.fields.insert(method.to_string(), Value::Bool(verdict));
    }

    /// Remove the result field for `method`. Returns whether one existed.
    pub fn remove_verdict(&mut self, method: &str) -> bool {
        self.fields.shift_remove(method).is_some()
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Strip every result field of `method` from `dataset`.
///
/// Returns the number of records that had one.
pub fn purge_method(dataset: &mut Dataset, method: &str) -> usize {
    dataset
        .values_mut()
        .map(|record| record.remove_verdict(method))
        .filter(|removed| *removed)
        .count()
}

/// Statistics for a bench run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BenchStats {
    /// Datasets whose records were read and evaluated
    pub datasets_processed: usize,

    /// Datasets skipped because their record file could not be read
    pub datasets_skipped: usize,

    /// Methods configured for the run
    pub methods: usize,

    /// Batches validated and written to the record files
    pub batches_merged: usize,

    /// Batches given up after exhausting their attempts
    pub batches_abandoned: usize,

    /// Invocations that raised or returned an invalid result
    pub failed_attempts: usize,

    /// Verdicts written to record files
    pub predictions_written: usize,

    /// Total runtime in seconds
    pub runtime_secs: f64,

    /// Verdicts per second over the whole run
    pub throughput_per_sec: f64,
}

impl BenchStats {
    /// Calculate derived stats.
    pub fn finalize(&mut self) {
        if self.runtime_secs > 0.0 {
            self.throughput_per_sec = self.predictions_written as f64 / self.runtime_secs;
        }
    }
}

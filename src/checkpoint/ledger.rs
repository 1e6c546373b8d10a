//! Success and failure ledgers.
//!
//! Epistemic foundation:
//! - K_i: Every batch attempt lands in exactly one ledger
//! - K_i: A ledger is rewritten in full after every attempt, before the next
//!   batch starts
//! - K_i: Presence of a key/method pair is what planning reads; the markers
//!   themselves are for audit
//! - B_i: A ledger file may be missing or unreadable → treated as empty

use crate::checkpoint::{DatasetPaths, write_json_atomic};
use crate::models::{FailurePolicy, Result, SentencePair};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Outcome a marker records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Success,
    Failure,
}

/// Audit entry appended for every key of an attempted batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchMarker {
    /// 1-based attempt number within the batch
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violation: Option<String>,
    pub at: DateTime<Utc>,
    /// The batch as handed to the method
    pub pairs: Vec<SentencePair>,
}

/// record key → method → markers
type Entries = IndexMap<String, IndexMap<String, Vec<Value>>>;

/// One ledger file.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    entries: Entries,
}

impl Ledger {
    /// Load a ledger, starting empty if the file is missing or unreadable.
    pub fn load(path: &Path) -> Self {
        let entries = match File::open(path) {
            Ok(file) => serde_json::from_reader(BufReader::new(file)).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Unreadable ledger, starting empty");
                Entries::new()
            }),
            Err(_) => Entries::new(),
        };

        Self {
            path: path.to_path_buf(),
            entries,
        }
    }

    /// Whether `key` has any marker under `method`.
    pub fn contains(&self, key: &str, method: &str) -> bool {
        self.entries
            .get(key)
            .is_some_and(|methods| methods.contains_key(method))
    }

    /// Methods mentioned for `key`.
    pub fn methods_of(&self, key: &str) -> impl Iterator<Item = &str> {
        self.entries
            .get(key)
            .into_iter()
            .flat_map(|methods| methods.keys().map(String::as_str))
    }

    /// Append `marker` under `method` for every key, then rewrite the file.
    pub fn append(&mut self, keys: &[String], method: &str, marker: &BatchMarker) -> Result<()> {
        let value = serde_json::to_value(marker)
            .map_err(|e| crate::models::BenchError::json("serializing ledger marker", e))?;
        for key in keys {
            self.entries
                .entry(key.clone())
                .or_default()
                .entry(method.to_string())
                .or_default()
                .push(value.clone());
        }
        self.save()
    }

    /// Drop every marker filed under `method`. Returns the number of keys affected.
    ///
    /// Keys left without any method are removed. Not persisted until [`Ledger::save`].
    pub fn remove_method(&mut self, method: &str) -> usize {
        let mut removed = 0;
        for methods in self.entries.values_mut() {
            if methods.shift_remove(method).is_some() {
                removed += 1;
            }
        }
        self.entries.retain(|_, methods| !methods.is_empty());
        removed
    }

    pub fn save(&self) -> Result<()> {
        write_json_atomic(&self.path, &self.entries)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The success and failure ledgers of one dataset.
#[derive(Debug)]
pub struct Ledgers {
    pub successes: Ledger,
    pub failures: Ledger,
}

impl Ledgers {
    pub fn load(paths: &DatasetPaths) -> Self {
        Self {
            successes: Ledger::load(&paths.successes),
            failures: Ledger::load(&paths.failures),
        }
    }

    /// Whether an earlier attempt already concluded `key` for `method`.
    ///
    /// A success always concludes. A failure concludes only under
    /// [`FailurePolicy::Skip`].
    pub fn concluded(&self, key: &str, method: &str, policy: FailurePolicy) -> bool {
        self.successes.contains(key, method)
            || (policy == FailurePolicy::Skip && self.failures.contains(key, method))
    }

    /// Forget `method` in both ledgers and rewrite them if anything changed.
    pub fn forget_method(&mut self, method: &str) -> Result<usize> {
        let succ = self.successes.remove_method(method);
        let faults = self.failures.remove_method(method);
        if succ > 0 {
            self.successes.save()?;
        }
        if faults > 0 {
            self.failures.save()?;
        }
        Ok(succ + faults)
    }

    /// Append `marker` to the ledger matching its outcome.
    pub fn record(&mut self, keys: &[String], method: &str, marker: &BatchMarker) -> Result<()> {
        match marker.outcome {
            AttemptOutcome::Success => self.successes.append(keys, method, marker),
            AttemptOutcome::Failure => self.failures.append(keys, method, marker),
        }
    }
}

//! Prediction result contract and per-batch attempt accounting.
//!
//! Checks run in order and stop at the first violation:
//! 1. the result is a JSON array
//! 2. every element is a JSON boolean
//! 3. the array is exactly as long as the batch
//!
//! An error raised by the method itself is its own violation kind.

use crate::models::Result;
use serde_json::Value;
use std::fmt;

/// Longest rendering of an offending value kept in logs and ledgers.
const MAX_VALUE_CHARS: usize = 200;

/// Why an attempt's result was rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    /// The method returned something other than an array
    NotAList { value: String },
    /// Elements at `indices` are not booleans
    NonBoolean { indices: Vec<usize>, values: Vec<Value> },
    /// Array length differs from the batch length
    LengthMismatch { expected: usize, actual: usize },
    /// The method failed instead of returning
    Exception(String),
}

impl Violation {
    /// Short, stable name of the violation kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotAList { .. } => "not a list",
            Self::NonBoolean { .. } => "non-boolean values",
            Self::LengthMismatch { .. } => "length mismatch",
            Self::Exception(_) => "exception",
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAList { value } => write!(f, "not a list: {value}"),
            Self::NonBoolean { indices, values } => {
                write!(f, "non-boolean values at {indices:?}: ")?;
                let rendered: Vec<String> = values.iter().map(Value::to_string).collect();
                write!(f, "[{}]", truncate(&rendered.join(", ")))
            }
            Self::LengthMismatch { expected, actual } => write!(
                f,
                "length mismatch: method was given {expected} pairs but returned {actual} predictions"
            ),
            Self::Exception(message) => write!(f, "exception: {}", truncate(message)),
        }
    }
}

fn truncate(s: &str) -> String {
    if s.chars().count() <= MAX_VALUE_CHARS {
        return s.to_string();
    }
    let head: String = s.chars().take(MAX_VALUE_CHARS).collect();
    format!("{head}...")
}

/// Check a returned value against the contract for a batch of `expected_len`.
pub fn validate_predictions(
    result: &Value,
    expected_len: usize,
) -> std::result::Result<Vec<bool>, Violation> {
    let items = result.as_array().ok_or_else(|| Violation::NotAList {
        value: truncate(&result.to_string()),
    })?;

    let (indices, values): (Vec<usize>, Vec<Value>) = items
        .iter()
        .enumerate()
        .filter(|(_, item)| !item.is_boolean())
        .map(|(i, item)| (i, item.clone()))
        .unzip();
    if !indices.is_empty() {
        return Err(Violation::NonBoolean { indices, values });
    }

    if items.len() != expected_len {
        return Err(Violation::LengthMismatch {
            expected: expected_len,
            actual: items.len(),
        });
    }

    Ok(items.iter().filter_map(Value::as_bool).collect())
}

/// Fold an invocation outcome (including a raised error) into the contract.
pub fn check_invocation(
    result: Result<Value>,
    expected_len: usize,
) -> std::result::Result<Vec<bool>, Violation> {
    match result {
        Ok(value) => validate_predictions(&value, expected_len),
        Err(e) => Err(Violation::Exception(e.to_string())),
    }
}

/// Attempts left for one batch.
///
/// `begin` hands out attempt numbers 1..=max; every handed-out attempt has
/// consumed exactly one unit of budget whatever its outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptBudget {
    max: u32,
    used: u32,
}

impl AttemptBudget {
    pub fn new(max: u32) -> Self {
        Self { max, used: 0 }
    }

    /// Start another attempt, if budget remains. Returns its 1-based number.
    pub fn begin(&mut self) -> Option<u32> {
        if self.used >= self.max {
            return None;
        }
        self.used += 1;
        Some(self.used)
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn remaining(&self) -> u32 {
        self.max - self.used
    }
}

/// Terminal state of a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    /// Validated and written to the record file
    Merged { attempts: u32, verdicts: Vec<bool> },
    /// Budget exhausted; nothing written to the record file
    Abandoned { attempts: u32, last: Violation },
}

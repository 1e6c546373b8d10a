//! Success and failure rates read back from the ledgers.

use crate::checkpoint::{DatasetPaths, Ledger, read_records};
use crate::models::Result;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::warn;

/// Ledger counts of one method on one dataset.
///
/// A record that failed before it succeeded counts in both `succ` and
/// `fail`, but only once in `total`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateCounts {
    pub succ: usize,
    pub fail: usize,
    pub total: usize,
}

/// Mean rates of one method over datasets, as percentages with two decimals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateAverages {
    pub succ: String,
    pub fail: String,
}

/// Content of `rates.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RatesReport {
    /// dataset → method → counts
    pub datasets: IndexMap<String, IndexMap<String, RateCounts>>,
    /// method → averages over the datasets it appears in
    pub averages: IndexMap<String, RateAverages>,
}

/// Count ledgered records per method for one dataset of the bench.
///
/// Only keys present in the record file are counted.
pub fn dataset_rates(bench_dir: &Path, name: &str) -> Result<IndexMap<String, RateCounts>> {
    let paths = DatasetPaths::new(bench_dir, name);
    let records = read_records(&paths.records)?;
    let successes = Ledger::load(&paths.successes);
    let failures = Ledger::load(&paths.failures);

    let mut by_method: IndexMap<String, RateCounts> = IndexMap::new();
    for key in records.keys() {
        let mut seen = BTreeSet::new();
        for method in successes.methods_of(key) {
            by_method.entry(method.to_string()).or_default().succ += 1;
            seen.insert(method);
        }
        for method in failures.methods_of(key) {
            by_method.entry(method.to_string()).or_default().fail += 1;
            seen.insert(method);
        }
        for method in seen {
            by_method.entry(method.to_string()).or_default().total += 1;
        }
    }

    Ok(by_method)
}

/// Rates over `datasets`; unreadable datasets are warned about and left out.
pub fn compute_rates(bench_dir: &Path, datasets: &[String]) -> RatesReport {
    let mut report = RatesReport::default();

    for name in datasets {
        match dataset_rates(bench_dir, name) {
            Ok(by_method) => {
                report.datasets.insert(name.clone(), by_method);
            }
            Err(e) => warn!(dataset = %name, error = %e, "Skipping dataset in rates"),
        }
    }

    let mut ratios: IndexMap<&str, (Vec<f64>, Vec<f64>)> = IndexMap::new();
    for by_method in report.datasets.values() {
        for (method, counts) in by_method {
            if counts.total == 0 {
                continue;
            }
            let entry = ratios.entry(method.as_str()).or_default();
            entry.0.push(counts.succ as f64 / counts.total as f64);
            entry.1.push(counts.fail as f64 / counts.total as f64);
        }
    }

    report.averages = ratios
        .into_iter()
        .map(|(method, (succ, fail))| {
            let averages = RateAverages {
                succ: format!("{:.2}%", mean(&succ) * 100.0),
                fail: format!("{:.2}%", mean(&fail) * 100.0),
            };
            (method.to_string(), averages)
        })
        .collect();

    report
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, body: &str) {
        fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn test_counts_and_averages() {
        let dir = TempDir::new().unwrap();
        let p = dir.path();
        write(
            p,
            "d1.json",
            r#"{"a":{"sentence1":"x","sentence2":"y"},"b":{"sentence1":"x","sentence2":"y"},
                "c":{"sentence1":"x","sentence2":"y"},"d":{"sentence1":"x","sentence2":"y"}}"#,
        );
        write(p, "succ_d1.json", r#"{"a":{"m":[1]},"b":{"m":[1]},"c":{"m":[1]},"gone":{"m":[1]}}"#);
        // b failed once before succeeding; d never made it.
        write(p, "faults_d1.json", r#"{"b":{"m":[1]},"d":{"m":[1,2,3]}}"#);

        write(
            p,
            "d2.json",
            r#"{"a":{"sentence1":"x","sentence2":"y"},"b":{"sentence1":"x","sentence2":"y"}}"#,
        );
        write(p, "succ_d2.json", r#"{"a":{"m":[1]},"b":{"m":[1]}}"#);

        let report = compute_rates(p, &["d1".to_string(), "d2".to_string(), "missing".to_string()]);

        assert_eq!(
            report.datasets["d1"]["m"],
            RateCounts {
                succ: 3,
                fail: 2,
                total: 4
            }
        );
        assert_eq!(
            report.datasets["d2"]["m"],
            RateCounts {
                succ: 2,
                fail: 0,
                total: 2
            }
        );
        assert!(!report.datasets.contains_key("missing"));

        // succ: (0.75 + 1.0) / 2, fail: (0.5 + 0.0) / 2
        assert_eq!(report.averages["m"].succ, "87.50%");
        assert_eq!(report.averages["m"].fail, "25.00%");
    }

    #[test]
    fn test_dataset_without_ledgers_has_no_methods() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "d.json", r#"{"a":{"sentence1":"x","sentence2":"y"}}"#);
        let by_method = dataset_rates(dir.path(), "d").unwrap();
        assert!(by_method.is_empty());
    }
}

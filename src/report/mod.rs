//! Reports computed from the files a bench leaves behind.
//!
//! Provides:
//! - `rates`: How often each method got through its batches, from the ledgers
//! - `errors`: How often each method's verdicts were wrong, per report group

mod errors;
mod rates;

pub use errors::*;
pub use rates::*;

use crate::checkpoint::{FAILURE_PREFIX, SUCCESS_PREFIX, write_json_atomic};
use crate::models::{BenchError, Result};
use std::path::{Path, PathBuf};
use tracing::info;

pub const RATES_FILE: &str = "rates.json";
pub const RESULTS_FILE: &str = "results.json";

/// Where the reports of one bench were written.
#[derive(Debug, Clone)]
pub struct ReportPaths {
    pub rates: PathBuf,
    pub results: PathBuf,
}

/// Record-file base names inside a bench directory, sorted.
pub fn bench_datasets(bench_dir: &Path) -> Result<Vec<String>> {
    let pattern = bench_dir.join("*.json");
    let mut names: Vec<String> = glob::glob(&pattern.to_string_lossy())
        .map_err(|e| BenchError::Internal(format!("Invalid glob pattern: {e}")))?
        .filter_map(|r| r.ok())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.file_name()
                .is_some_and(|n| n != RATES_FILE && n != RESULTS_FILE)
        })
        .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .filter(|name| !name.starts_with(SUCCESS_PREFIX) && !name.starts_with(FAILURE_PREFIX))
        .collect();
    names.sort();
    Ok(names)
}

/// Compute both reports for the bench in `bench_dir` and write them next to
/// its record files.
pub fn write_reports(
    bench_dir: &Path,
    groups: &[crate::models::ReportGroup],
    methods: &[&str],
) -> Result<(RatesReport, ErrorReport, ReportPaths)> {
    if !bench_dir.is_dir() {
        return Err(BenchError::io(
            format!("opening bench {}", bench_dir.display()),
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such bench directory"),
        ));
    }

    let datasets = bench_datasets(bench_dir)?;
    let rates = compute_rates(bench_dir, &datasets);
    let errors = compute_error_rates(bench_dir, groups, methods);

    let paths = ReportPaths {
        rates: bench_dir.join(RATES_FILE),
        results: bench_dir.join(RESULTS_FILE),
    };
    write_json_atomic(&paths.rates, &rates)?;
    write_json_atomic(&paths.results, &errors)?;

    info!(
        datasets = datasets.len(),
        groups = groups.len(),
        rates = %paths.rates.display(),
        results = %paths.results.display(),
        "Reports written"
    );

    Ok((rates, errors, paths))
}

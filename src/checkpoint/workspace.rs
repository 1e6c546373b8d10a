//! Bench workspace provisioning.
//!
//! Epistemic foundation:
//! - K_i: A bench id maps to exactly one directory under the benches root
//! - K_i: Seeding never overwrites a file already present (idempotent)
//! - B_i: The source directory exists and is readable → Result
//! - I^B: Two ids generated in the same minute collide; pass an explicit id
//!   when that matters

use crate::models::{BenchError, Result};
use chrono::{Datelike, Local, Timelike};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Prefix of a dataset's success ledger file.
pub const SUCCESS_PREFIX: &str = "succ_";
/// Prefix of a dataset's failure ledger file.
pub const FAILURE_PREFIX: &str = "faults_";

/// Generate a bench id of the form `r_DD_MM_mm` (day, month, minute).
pub fn generate_bench_id() -> String {
    bench_id_at(&Local::now())
}

fn bench_id_at<T: Datelike + Timelike>(now: &T) -> String {
    format!("r_{:02}_{:02}_{:02}", now.day(), now.month(), now.minute())
}

/// Files backing one dataset inside a bench directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetPaths {
    /// `<base>.json`
    pub records: PathBuf,
    /// `succ_<base>.json`
    pub successes: PathBuf,
    /// `faults_<base>.json`
    pub failures: PathBuf,
}

impl DatasetPaths {
    pub fn new(bench_dir: &Path, base_name: &str) -> Self {
        let file_name = format!("{base_name}.json");
        Self {
            records: bench_dir.join(&file_name),
            successes: bench_dir.join(format!("{SUCCESS_PREFIX}{file_name}")),
            failures: bench_dir.join(format!("{FAILURE_PREFIX}{file_name}")),
        }
    }
}

/// Outcome of a seeding pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    /// Files copied into the destination
    pub copied: Vec<String>,
    /// Files left alone because the destination already had them
    pub skipped: Vec<String>,
}

/// Copy every file of `src` that `dst` does not have yet.
///
/// With `only`, just those file names are considered. Directories are
/// ignored (non-recursive). `dst` is created if absent.
pub fn seed_directory(src: &Path, dst: &Path, only: Option<&[String]>) -> Result<SeedReport> {
    fs::create_dir_all(dst).map_err(|e| BenchError::io("creating bench dir", e))?;

    let mut entries: Vec<_> = fs::read_dir(src)
        .map_err(|e| BenchError::io(format!("reading source dir {}", src.display()), e))?
        .collect::<std::io::Result<_>>()
        .map_err(|e| BenchError::io("listing source dir", e))?;
    entries.sort_by_key(|entry| entry.file_name());

    let mut report = SeedReport::default();
    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        if only.is_some_and(|wanted| !wanted.contains(&name)) {
            continue;
        }
        let src_path = entry.path();
        if src_path.is_dir() {
            continue;
        }

        let dst_path = dst.join(&name);
        if dst_path.exists() {
            info!(file = %name, dir = %dst.display(), "not copying, already exists");
            report.skipped.push(name);
            continue;
        }

        fs::copy(&src_path, &dst_path)
            .map_err(|e| BenchError::io(format!("copying {name}"), e))?;
        report.copied.push(name);
    }

    if !report.copied.is_empty() {
        info!(count = report.copied.len(), dir = %dst.display(), "Copied datasets");
    }
    Ok(report)
}

/// The directory of one bench, seeded from the pristine datasets.
#[derive(Debug, Clone)]
pub struct Workspace {
    bench_id: String,
    dir: PathBuf,
    source_dir: PathBuf,
}

impl Workspace {
    /// Open the bench directory for `bench_id` (generating an id when
    /// `None`), creating it if needed.
    ///
    /// Nothing is copied yet; see [`Workspace::seed`].
    pub fn open(benches_dir: &Path, bench_id: Option<&str>, source_dir: &Path) -> Result<Self> {
        let bench_id = bench_id.map(str::to_string).unwrap_or_else(generate_bench_id);
        let dir = benches_dir.join(&bench_id);
        fs::create_dir_all(&dir).map_err(|e| BenchError::io("creating bench dir", e))?;

        Ok(Self {
            bench_id,
            dir,
            source_dir: source_dir.to_path_buf(),
        })
    }

    /// Open the bench directory and seed it with every source dataset.
    pub fn provision(
        benches_dir: &Path,
        bench_id: Option<&str>,
        source_dir: &Path,
    ) -> Result<Self> {
        let workspace = Self::open(benches_dir, bench_id, source_dir)?;
        workspace.seed(None)?;
        info!(bench_id = %workspace.bench_id, dir = %workspace.dir.display(), "Bench ready");
        Ok(workspace)
    }

    /// Copy missing dataset files from the source directory.
    pub fn seed(&self, only: Option<&[String]>) -> Result<SeedReport> {
        seed_directory(&self.source_dir, &self.dir, only)
    }

    /// Copy a fresh, result-free record file for `base_name`.
    pub fn reseed(&self, base_name: &str) -> Result<SeedReport> {
        self.seed(Some(&[format!("{base_name}.json")]))
    }

    /// Dataset base names to evaluate.
    ///
    /// `configured` wins when non-empty; otherwise every `*.json` in the
    /// source directory, sorted by name.
    pub fn dataset_names(&self, configured: &[String]) -> Result<Vec<String>> {
        if !configured.is_empty() {
            return Ok(configured.to_vec());
        }

        let pattern = self.source_dir.join("*.json");
        let mut names: Vec<String> = glob::glob(&pattern.to_string_lossy())
            .map_err(|e| BenchError::Internal(format!("Invalid glob pattern: {e}")))?
            .filter_map(|r| r.ok())
            .filter(|p| p.is_file())
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .filter(|name| !name.starts_with(SUCCESS_PREFIX) && !name.starts_with(FAILURE_PREFIX))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Files of `base_name` inside this bench.
    pub fn paths(&self, base_name: &str) -> DatasetPaths {
        DatasetPaths::new(&self.dir, base_name)
    }

    pub fn bench_id(&self) -> &str {
        &self.bench_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }
}

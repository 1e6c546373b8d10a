//! Record file persistence.
//!
//! Epistemic foundation:
//! - K_i: A record file is rewritten in full, never appended to
//! - K_i: Writes go through a temp file and a rename, so a reader sees either
//!   the previous or the next complete file
//! - B_i: The file parses → otherwise it is replaced by a pristine copy and
//!   that dataset's progress is lost (other datasets are untouched)

use crate::checkpoint::Workspace;
use crate::models::{BenchError, Dataset, Result};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{debug, error, warn};

/// Reads before a dataset is given up.
const MAX_READS: u32 = 3;

/// Serialize `value` as pretty JSON to `path` via write-then-rename.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("state.json");
    let temp_path = path.with_file_name(format!(".{name}.tmp"));

    {
        let file = File::create(&temp_path)
            .map_err(|e| BenchError::io(format!("creating {}", temp_path.display()), e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value)
            .map_err(|e| BenchError::json(format!("serializing {name}"), e))?;
        writer
            .flush()
            .map_err(|e| BenchError::io(format!("flushing {name}"), e))?;
    }

    fs::rename(&temp_path, path)
        .map_err(|e| BenchError::io(format!("replacing {}", path.display()), e))?;

    debug!(file = %name, "Saved");
    Ok(())
}

/// Read a record file.
pub fn read_records(path: &Path) -> Result<Dataset> {
    let file = File::open(path)
        .map_err(|e| BenchError::io(format!("opening {}", path.display()), e))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| BenchError::json(format!("parsing {}", path.display()), e))
}

/// Persist a whole dataset.
pub fn write_records(path: &Path, dataset: &Dataset) -> Result<()> {
    write_json_atomic(path, dataset)
}

/// Records read from a bench, and whether a fresh copy had to be seeded.
#[derive(Debug)]
pub struct LoadedRecords {
    pub dataset: Dataset,
    /// The bench copy was unreadable and got replaced; verdicts merged
    /// before are gone while the ledgers still remember them
    pub reseeded: bool,
}

/// Load the bench copy of `base_name`, recovering from unreadable files.
///
/// An unreadable record file is deleted and replaced by a fresh copy from
/// the source directory. Returns `Ok(None)` when no readable copy could be
/// obtained, in which case the caller skips the dataset. Failing to delete
/// the broken file is fatal.
pub fn load_or_reseed(workspace: &Workspace, base_name: &str) -> Result<Option<LoadedRecords>> {
    let path = workspace.paths(base_name).records;

    for attempt in 1..=MAX_READS {
        match read_records(&path) {
            Ok(dataset) => {
                return Ok(Some(LoadedRecords {
                    dataset,
                    reseeded: attempt > 1,
                }));
            }
            Err(e) => {
                error!(
                    dataset = %base_name,
                    attempt,
                    error = %e,
                    "Record file unreadable, replacing it with a fresh copy"
                );
                if path.exists() {
                    fs::remove_file(&path)
                        .map_err(|e| BenchError::io(format!("deleting {}", path.display()), e))?;
                }
                let report = workspace.reseed(base_name)?;
                if report.copied.is_empty() {
                    warn!(dataset = %base_name, "No source copy to reseed from");
                    return Ok(None);
                }
            }
        }
    }

    Ok(None)
}

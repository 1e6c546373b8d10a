//! Batch planning.
//!
//! A key is pending for a method when its record has no result field for
//! the method and neither ledger has concluded it. Pending keys keep their
//! dataset-file order and are cut into batches of at most `batch_size`.

use crate::checkpoint::Ledgers;
use crate::models::{Dataset, FailurePolicy};

/// The batches one method still has to go through on one dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPlan {
    pub batches: Vec<Vec<String>>,
}

impl BatchPlan {
    /// Build the plan for `method` from the current records and ledgers.
    pub fn new(
        dataset: &Dataset,
        ledgers: &Ledgers,
        method: &str,
        batch_size: usize,
        policy: FailurePolicy,
    ) -> Self {
        let pending = pending_keys(dataset, ledgers, method, policy);
        Self {
            batches: partition(pending, batch_size),
        }
    }

    /// Number of keys across all batches.
    pub fn total(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

/// Keys of `dataset` still needing a verdict from `method`, in file order.
pub fn pending_keys(
    dataset: &Dataset,
    ledgers: &Ledgers,
    method: &str,
    policy: FailurePolicy,
) -> Vec<String> {
    dataset
        .iter()
        .filter(|(key, record)| {
            !record.has_result(method) && !ledgers.concluded(key, method, policy)
        })
        .map(|(key, _)| key.clone())
        .collect()
}

/// Split `keys` into order-preserving batches of at most `batch_size`.
pub fn partition(keys: Vec<String>, batch_size: usize) -> Vec<Vec<String>> {
    keys.chunks(batch_size.max(1)).map(<[String]>::to_vec).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{AttemptOutcome, BatchMarker, DatasetPaths};
    use crate::models::Record;
    use chrono::Utc;
    use tempfile::TempDir;

    fn dataset(keys: &[&str]) -> Dataset {
        keys.iter()
            .map(|k| (k.to_string(), Record::new(*k, *k)))
            .collect()
    }

    fn strings(ks: &[&str]) -> Vec<String> {
        ks.iter().map(|k| k.to_string()).collect()
    }

    fn marker(outcome: AttemptOutcome) -> BatchMarker {
        BatchMarker {
            attempt: 1,
            outcome,
            violation: None,
            at: Utc::now(),
            pairs: Vec::new(),
        }
    }

    #[test]
    fn test_partition_shapes() {
        let keys: Vec<String> = (0..7).map(|i| i.to_string()).collect();
        let batches = partition(keys.clone(), 3);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 3);
        assert_eq!(batches[1].len(), 3);
        assert_eq!(batches[2].len(), 1);
        assert_eq!(batches.concat(), keys);

        let exact = partition(keys.clone(), 7);
        assert_eq!(exact, vec![keys.clone()]);
        assert!(partition(Vec::new(), 3).is_empty());
    }

    #[test]
    fn test_partition_batch_size_sweep() {
        let keys: Vec<String> = (0..23).map(|i| format!("k{i}")).collect();
        for size in 1..=25 {
            let batches = partition(keys.clone(), size);
            let (last, full) = batches.split_last().unwrap();
            assert!(full.iter().all(|b| b.len() == size));
            assert!((1..=size).contains(&last.len()));
            assert_eq!(batches.concat(), keys, "size {size}");
        }
    }

    #[test]
    fn test_pending_excludes_results_and_ledgers() {
        let dir = TempDir::new().unwrap();
        let mut ledgers = Ledgers::load(&DatasetPaths::new(dir.path(), "d"));
        let mut data = dataset(&["a", "b", "c", "d", "e"]);
        data["a"].set_verdict("m", false);
        ledgers
            .record(&strings(&["b"]), "m", &marker(AttemptOutcome::Success))
            .unwrap();
        ledgers
            .record(&strings(&["c"]), "m", &marker(AttemptOutcome::Failure))
            .unwrap();
        ledgers
            .record(&strings(&["d"]), "other", &marker(AttemptOutcome::Success))
            .unwrap();

        assert_eq!(
            pending_keys(&data, &ledgers, "m", FailurePolicy::Skip),
            ["d", "e"]
        );
        assert_eq!(
            pending_keys(&data, &ledgers, "m", FailurePolicy::Retry),
            ["c", "d", "e"]
        );
        assert_eq!(
            pending_keys(&data, &ledgers, "other", FailurePolicy::Skip),
            ["a", "b", "c", "e"]
        );
    }

    #[test]
    fn test_plan_empty_when_everything_concluded() {
        let dir = TempDir::new().unwrap();
        let ledgers = Ledgers::load(&DatasetPaths::new(dir.path(), "d"));
        let mut data = dataset(&["a", "b"]);
        data["a"].set_verdict("m", true);
        data["b"].set_verdict("m", false);

        let plan = BatchPlan::new(&data, &ledgers, "m", 2, FailurePolicy::Skip);
        assert!(plan.is_empty());
        assert_eq!(plan.total(), 0);

        let plan = BatchPlan::new(&data, &ledgers, "n", 1, FailurePolicy::Skip);
        assert_eq!(plan.batches, vec![strings(&["a"]), strings(&["b"])]);
        assert_eq!(plan.total(), 2);
    }
}

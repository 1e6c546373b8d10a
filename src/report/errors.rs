//! Error rates per report group and method.
//!
//! A verdict is wrong when it differs from the group's expected verdict,
//! which is either fixed for the group or read from a label field.

use crate::checkpoint::read_records;
use crate::models::{Expected, Record, ReportGroup};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::warn;

/// Category used for groups that do not name one.
pub const DEFAULT_CATEGORY: &str = "All";

/// Key of the per-method averages in `results.json`.
pub const AVERAGES_KEY: &str = "Averages";

/// Key of the overall average inside each method's averages.
pub const OVERALL_KEY: &str = "Overall Average";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorCounts {
    pub wrong: usize,
    pub total: usize,
}

impl ErrorCounts {
    /// Percentage of wrong verdicts; `None` when nothing was counted.
    pub fn rate(&self) -> Option<f64> {
        (self.total > 0).then(|| self.wrong as f64 * 100.0 / self.total as f64)
    }
}

/// Content of `results.json`: category → group → method → "12.5%",
/// plus method → category → average under [`AVERAGES_KEY`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    #[serde(flatten)]
    pub categories: IndexMap<String, IndexMap<String, IndexMap<String, String>>>,
    #[serde(rename = "Averages")]
    pub averages: IndexMap<String, IndexMap<String, String>>,
}

/// Interpret a label field: booleans as-is, numbers as `== 1`, and the
/// strings "1"/"true"/"0"/"false". Anything else is unlabelled.
pub fn label_of(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f == 1.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" => Some(true),
            "0" | "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn expected_for(group: &ReportGroup, record: &Record) -> Option<bool> {
    match &group.expected {
        Expected::Constant(value) => Some(*value),
        Expected::Field(field) => record.fields.get(field).and_then(label_of),
    }
}

fn admitted(group: &ReportGroup, record: &Record) -> bool {
    match &group.score {
        None => true,
        Some(filter) => record
            .fields
            .get(&filter.field)
            .and_then(Value::as_f64)
            .is_some_and(|score| filter.admits(score)),
    }
}

/// Wrong/total counts of every method over the datasets of `group`.
///
/// Records outside the score filter, without a label, or without a verdict
/// for a method are not counted for it. Missing or unreadable dataset files
/// are warned about and skipped.
pub fn group_counts(
    bench_dir: &Path,
    group: &ReportGroup,
    methods: &[&str],
) -> IndexMap<String, ErrorCounts> {
    let mut counts: IndexMap<String, ErrorCounts> = IndexMap::new();

    for name in &group.datasets {
        let records = match read_records(&bench_dir.join(format!("{name}.json"))) {
            Ok(records) => records,
            Err(e) => {
                warn!(
                    group = %group.name,
                    dataset = %name,
                    error = %e,
                    "Skipping dataset in error rates"
                );
                continue;
            }
        };

        for record in records.values() {
            if !admitted(group, record) {
                continue;
            }
            let Some(expected) = expected_for(group, record) else {
                continue;
            };
            for method in methods {
                if let Some(verdict) = record.verdict(method) {
                    let entry = counts.entry(method.to_string()).or_default();
                    entry.total += 1;
                    if verdict != expected {
                        entry.wrong += 1;
                    }
                }
            }
        }
    }

    counts
}

/// Error rates of `methods` over every group, with per-category and overall averages.
pub fn compute_error_rates(
    bench_dir: &Path,
    groups: &[ReportGroup],
    methods: &[&str],
) -> ErrorReport {
    let mut report = ErrorReport::default();
    // method → category → per-group rates
    let mut rates: IndexMap<String, IndexMap<String, Vec<f64>>> = IndexMap::new();

    for group in groups {
        let category = group.category.as_deref().unwrap_or(DEFAULT_CATEGORY);
        let mut by_method = IndexMap::new();

        for (method, counts) in group_counts(bench_dir, group, methods) {
            let Some(rate) = counts.rate() else {
                continue;
            };
            by_method.insert(method.clone(), format!("{rate:.1}%"));
            rates
                .entry(method)
                .or_default()
                .entry(category.to_string())
                .or_default()
                .push(rate);
        }

        report
            .categories
            .entry(category.to_string())
            .or_default()
            .insert(group.name.clone(), by_method);
    }

    for (method, by_category) in rates {
        let mut averages = IndexMap::new();
        let mut category_means = Vec::with_capacity(by_category.len());
        for (category, values) in by_category {
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            averages.insert(category, format!("{mean:.1}%"));
            category_means.push(mean);
        }
        let overall = category_means.iter().sum::<f64>() / category_means.len() as f64;
        averages.insert(OVERALL_KEY.to_string(), format!("{overall:.1}%"));
        report.averages.insert(method, averages);
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScoreFilter;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn group(name: &str, datasets: &[&str], expected: Expected) -> ReportGroup {
        ReportGroup {
            name: name.to_string(),
            datasets: datasets.iter().map(|d| d.to_string()).collect(),
            expected,
            category: None,
            score: None,
        }
    }

    fn write(dir: &Path, name: &str, value: Value) {
        fs::write(dir.join(format!("{name}.json")), value.to_string()).unwrap();
    }

    fn rec(extra: Value) -> Value {
        let mut value = json!({"sentence1": "x", "sentence2": "y"});
        for (k, v) in extra.as_object().unwrap() {
            value[k] = v.clone();
        }
        value
    }

    #[test]
    fn test_label_of() {
        assert_eq!(label_of(&json!(true)), Some(true));
        assert_eq!(label_of(&json!(1)), Some(true));
        assert_eq!(label_of(&json!(0)), Some(false));
        assert_eq!(label_of(&json!(2)), Some(false));
        assert_eq!(label_of(&json!("1")), Some(true));
        assert_eq!(label_of(&json!("False")), Some(false));
        assert_eq!(label_of(&json!("maybe")), None);
        assert_eq!(label_of(&json!(null)), None);
    }

    #[test]
    fn test_constant_expectation() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "snli",
            json!({
                "a": rec(json!({"m": false, "n": true})),
                "b": rec(json!({"m": true, "n": true})),
                "c": rec(json!({"m": false})),
                "d": rec(json!({"m": false})),
            }),
        );
        let g = group("SNLI", &["snli"], Expected::Constant(false));
        let counts = group_counts(dir.path(), &g, &["m", "n", "absent"]);
        assert_eq!(counts["m"], ErrorCounts { wrong: 1, total: 4 });
        assert_eq!(counts["n"], ErrorCounts { wrong: 2, total: 2 });
        assert!(!counts.contains_key("absent"));
    }

    #[test]
    fn test_label_field_and_score_filter() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "sts",
            json!({
                "a": rec(json!({"label": 1, "score": 4.5, "m": true})),
                "b": rec(json!({"label": 0, "score": 1.0, "m": true})),
                "c": rec(json!({"score": 2.0, "m": true})),
                "d": rec(json!({"label": 0, "m": false})),
            }),
        );

        let by_label = group("STS-H", &["sts"], Expected::Field("label".into()));
        let counts = group_counts(dir.path(), &by_label, &["m"]);
        // c has no label
        assert_eq!(counts["m"], ErrorCounts { wrong: 1, total: 3 });

        let mut low_scores = group("STS", &["sts"], Expected::Constant(false));
        low_scores.score = Some(ScoreFilter {
            field: "score".into(),
            min: Some(0.0),
            max: Some(3.0),
        });
        let counts = group_counts(dir.path(), &low_scores, &["m"]);
        // only b and c are in [0, 3); d has no score
        assert_eq!(counts["m"], ErrorCounts { wrong: 2, total: 2 });
    }

    #[test]
    fn test_report_averages_by_category() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "neg",
            json!({
                "a": rec(json!({"m": false})),
                "b": rec(json!({"m": true})),
            }),
        );
        write(
            dir.path(),
            "neg2",
            json!({
                "a": rec(json!({"m": false})),
            }),
        );
        write(
            dir.path(),
            "pos",
            json!({
                "a": rec(json!({"m": false})),
                "b": rec(json!({"m": false})),
                "c": rec(json!({"m": false})),
                "d": rec(json!({"m": true})),
            }),
        );

        let mut g1 = group("N1", &["neg"], Expected::Constant(false));
        g1.category = Some("Minimize".into());
        let mut g2 = group("N2", &["neg2", "missing"], Expected::Constant(false));
        g2.category = Some("Minimize".into());
        let mut g3 = group("P", &["pos"], Expected::Constant(true));
        g3.category = Some("Maximize".into());

        let report = compute_error_rates(dir.path(), &[g1, g2, g3], &["m"]);

        assert_eq!(report.categories["Minimize"]["N1"]["m"], "50.0%");
        assert_eq!(report.categories["Minimize"]["N2"]["m"], "0.0%");
        assert_eq!(report.categories["Maximize"]["P"]["m"], "75.0%");
        assert_eq!(report.averages["m"]["Minimize"], "25.0%");
        assert_eq!(report.averages["m"]["Maximize"], "75.0%");
        assert_eq!(report.averages["m"][OVERALL_KEY], "50.0%");

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["Minimize"]["N1"]["m"], "50.0%");
        assert_eq!(json[AVERAGES_KEY]["m"][OVERALL_KEY], "50.0%");
    }

    #[test]
    fn test_groups_without_verdicts_stay_empty() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "d", json!({"a": rec(json!({}))}));
        let report = compute_error_rates(
            dir.path(),
            &[group("G", &["d"], Expected::Constant(true))],
            &["m"],
        );
        assert!(report.categories[DEFAULT_CATEGORY]["G"].is_empty());
        assert!(report.averages.is_empty());
    }
}

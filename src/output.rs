//! CSV artifacts of an evaluation run.
//!
//! Two files per run: the joined per-candidate results and the per-query
//! metrics table. The metrics table ends with a `mean` row averaged over
//! successfully answered queries.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::OutputConfig;
use crate::error::Result;
use crate::eval::{BenchmarkReport, MetricsRow, MetricsSummary, ResultRow};

/// Fixed leading columns of the results table.
pub const RESULT_COLUMNS: [&str; 6] = [
    "queried_on_query_id",
    "queried_on_query",
    "rank",
    "candidate_id",
    "score",
    "relevance",
];

/// Fixed leading columns of the metrics table.
pub const METRIC_COLUMNS: [&str; 14] = [
    "query_id",
    "query",
    "total_results",
    "correctly_returned",
    "incorrectly_returned",
    "relevant_results",
    "non_relevant_results",
    "relevant_in_dataset",
    "accuracy",
    "precision",
    "recall",
    "NDCG",
    "secondary_NDCG",
    "error",
];

/// Paths of the written artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifacts {
    pub results: PathBuf,
    pub metrics: PathBuf,
}

impl Artifacts {
    pub fn paths(&self) -> [&Path; 2] {
        [&self.results, &self.metrics]
    }
}

/// Write both tables into `config.results_dir`, creating it if needed.
pub fn write_report(report: &BenchmarkReport, config: &OutputConfig) -> Result<Artifacts> {
    std::fs::create_dir_all(&config.results_dir)?;
    let artifacts = Artifacts {
        results: config.results_dir.join(&config.image_results_file),
        metrics: config.results_dir.join(&config.query_eval_metrics_file),
    };

    write_results(&artifacts.results, &report.results)?;
    write_metrics(
        &artifacts.metrics,
        &report.metrics,
        &report.summary,
        &report.metadata_columns,
    )?;

    info!(
        results = %artifacts.results.display(),
        metrics = %artifacts.metrics.display(),
        "wrote evaluation artifacts"
    );
    Ok(artifacts)
}

/// Candidate attribute keys, sorted, across all rows.
fn attribute_columns(rows: &[ResultRow]) -> Vec<String> {
    rows.iter()
        .flat_map(|r| r.candidate.attributes.keys().cloned())
        .filter(|k| !RESULT_COLUMNS.contains(&k.as_str()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn write_results(path: &Path, rows: &[ResultRow]) -> Result<()> {
    let extra = attribute_columns(rows);
    let mut wtr = csv::Writer::from_path(path)?;

    let mut header: Vec<&str> = RESULT_COLUMNS.to_vec();
    header.extend(extra.iter().map(String::as_str));
    wtr.write_record(&header)?;

    for row in rows {
        let mut record = vec![
            row.query_id.clone(),
            row.query.clone(),
            row.rank.to_string(),
            row.candidate.id.clone(),
            row.candidate.score.to_string(),
            row.relevance.to_string(),
        ];
        record.extend(extra.iter().map(|k| {
            row.candidate
                .attributes
                .get(k)
                .map(|v| v.as_key())
                .unwrap_or_default()
        }));
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

fn number(value: f64) -> String {
    if value.is_nan() {
        String::new()
    } else {
        value.to_string()
    }
}

pub fn write_metrics(
    path: &Path,
    rows: &[MetricsRow],
    summary: &MetricsSummary,
    metadata_columns: &[String],
) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;

    let mut header: Vec<&str> = METRIC_COLUMNS.to_vec();
    header.extend(metadata_columns.iter().map(String::as_str));
    wtr.write_record(&header)?;

    for row in rows {
        let mut record = vec![
            row.query_id.clone(),
            row.query.clone(),
            row.total_results.to_string(),
            row.correctly_returned.to_string(),
            row.incorrectly_returned.to_string(),
            row.relevant_results.to_string(),
            row.non_relevant_results.to_string(),
            row.relevant_in_dataset.to_string(),
            number(row.accuracy),
            number(row.precision),
            number(row.recall),
            number(row.ndcg),
            number(row.secondary_ndcg),
            row.error.clone().unwrap_or_default(),
        ];
        record.extend(
            metadata_columns
                .iter()
                .map(|c| row.metadata.get(c).cloned().unwrap_or_default()),
        );
        wtr.write_record(&record)?;
    }

    let ok: Vec<&MetricsRow> = rows.iter().filter(|r| !r.is_error()).collect();
    let mut mean = vec![
        "mean".to_string(),
        String::new(),
        mean_count(&ok, |r| r.total_results),
        mean_count(&ok, |r| r.correctly_returned),
        mean_count(&ok, |r| r.incorrectly_returned),
        mean_count(&ok, |r| r.relevant_results),
        mean_count(&ok, |r| r.non_relevant_results),
        mean_count(&ok, |r| r.relevant_in_dataset),
        number(summary.accuracy),
        number(summary.precision),
        number(summary.recall),
        number(summary.ndcg),
        number(summary.secondary_ndcg),
        if summary.failed > 0 {
            format!("{} of {} queries failed", summary.failed, summary.queries)
        } else {
            String::new()
        },
    ];
    mean.extend(metadata_columns.iter().map(|_| String::new()));
    wtr.write_record(&mean)?;

    wtr.flush()?;
    Ok(())
}

fn mean_count(rows: &[&MetricsRow], field: fn(&MetricsRow) -> usize) -> String {
    if rows.is_empty() {
        return String::new();
    }
    let total: usize = rows.iter().map(|r| field(r)).sum();
    number(total as f64 / rows.len() as f64)
}

//! Per-run reports under `reports/<run_id>/` and the `runs.jsonl` index.
//!
//! Every run snapshots its resolved quotes to `quotes.parquet`. The next run
//! reads the previous snapshot back so each offering's GMP can be reported
//! alongside how far it moved since then.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{Array, Float64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use chrono::{DateTime, NaiveDate, Utc};
use gmp_core::{listing_gain_percent, LifecycleStatus, Source};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;
use uuid::Uuid;

use crate::merge::MergeOutcome;
use crate::pipeline::SyncRunSummary;

pub const RUN_INDEX_FILE: &str = "runs.jsonl";
pub const QUOTES_FILE: &str = "quotes.parquet";
const TOP_MOVERS: usize = 5;

/// One line of `runs.jsonl`, appended when a run's reports are complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunIndexEntry {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub today: NaiveDate,
    pub offerings: usize,
    pub persisted: usize,
    pub failed_groups: usize,
    pub failed_sources: Vec<Source>,
}

impl RunIndexEntry {
    fn from_summary(summary: &SyncRunSummary) -> Self {
        Self {
            run_id: summary.run_id,
            started_at: summary.started_at,
            finished_at: summary.finished_at,
            today: summary.today,
            offerings: summary.groups,
            persisted: summary.persisted,
            failed_groups: summary.failed_groups.len(),
            failed_sources: summary
                .sources
                .iter()
                .filter(|s| s.error.is_some())
                .map(|s| s.source)
                .collect(),
        }
    }
}

/// An offering's resolved GMP next to the value the previous run recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteMove {
    pub identity_key: String,
    pub name: String,
    pub status: LifecycleStatus,
    pub price_band: Option<String>,
    pub quote: f64,
    pub quote_source: Option<Source>,
    /// `None` when the offering was not in the previous run.
    pub previous_quote: Option<f64>,
    pub change: Option<f64>,
    pub listing_gain_percent: Option<f64>,
}

pub fn quote_moves(outcomes: &[MergeOutcome], previous: &HashMap<String, f64>) -> Vec<QuoteMove> {
    outcomes
        .iter()
        .map(|outcome| {
            let record = &outcome.record;
            let previous_quote = previous.get(&record.identity_key).copied();
            QuoteMove {
                identity_key: record.identity_key.clone(),
                name: record.name.clone(),
                status: record.status,
                price_band: record.price_band.clone(),
                quote: outcome.quote,
                quote_source: outcome.quote_source,
                previous_quote,
                change: previous_quote.map(|prev| outcome.quote - prev),
                listing_gain_percent: listing_gain_percent(
                    outcome.quote,
                    record.price_band.as_deref(),
                ),
            }
        })
        .collect()
}

/// Largest absolute changes first; unchanged and new offerings are left out.
fn top_movers(moves: &[QuoteMove], limit: usize) -> Vec<&QuoteMove> {
    let mut movers: Vec<&QuoteMove> = moves
        .iter()
        .filter(|m| m.change.is_some_and(|c| c != 0.0))
        .collect();
    movers.sort_by(|a, b| {
        let a = a.change.unwrap_or_default().abs();
        let b = b.change.unwrap_or_default().abs();
        b.total_cmp(&a)
    });
    movers.truncate(limit);
    movers
}

pub fn read_run_index(reports_root: &Path) -> Result<Vec<RunIndexEntry>> {
    let path = reports_root.join(RUN_INDEX_FILE);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(idx, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("parsing {} line {}", path.display(), idx + 1))
        })
        .collect()
}

async fn append_run_index(reports_root: &Path, entry: &RunIndexEntry) -> Result<()> {
    let path = reports_root.join(RUN_INDEX_FILE);
    let mut line = serde_json::to_string(entry).context("serializing run index entry")?;
    line.push('\n');
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    file.write_all(line.as_bytes())
        .await
        .with_context(|| format!("appending {}", path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("flushing {}", path.display()))?;
    Ok(())
}

/// Quotes recorded by the most recent indexed run. A missing snapshot only
/// means there is nothing to compare against.
pub fn previous_quotes(reports_root: &Path) -> Result<HashMap<String, f64>> {
    let Some(last) = read_run_index(reports_root)?.pop() else {
        return Ok(HashMap::new());
    };
    let path = run_dir(reports_root, last.run_id).join(QUOTES_FILE);
    if !path.exists() {
        warn!(run_id = %last.run_id, path = %path.display(), "previous quote snapshot missing");
        return Ok(HashMap::new());
    }
    read_quotes_parquet(&path)
}

pub fn run_dir(reports_root: &Path, run_id: Uuid) -> PathBuf {
    reports_root.join(run_id.to_string())
}

/// Write `quotes.parquet`, `reconciliation.json` and `run_summary.md`, then
/// index the run.
pub(crate) async fn write_reports(
    reports_root: &Path,
    summary: &SyncRunSummary,
    moves: &[QuoteMove],
) -> Result<()> {
    let run_dir = run_dir(reports_root, summary.run_id);
    fs::create_dir_all(&run_dir)
        .await
        .with_context(|| format!("creating {}", run_dir.display()))?;

    write_quotes_parquet(&run_dir.join(QUOTES_FILE), moves)?;

    let json = serde_json::to_vec_pretty(&serde_json::json!({
        "run": summary,
        "offerings": moves,
    }))
    .context("serializing reconciliation report")?;
    fs::write(run_dir.join("reconciliation.json"), json)
        .await
        .context("writing reconciliation.json")?;

    fs::write(run_dir.join("run_summary.md"), run_summary_markdown(summary, moves))
        .await
        .context("writing run_summary.md")?;

    append_run_index(reports_root, &RunIndexEntry::from_summary(summary)).await
}

fn signed(value: f64) -> String {
    if value > 0.0 {
        format!("+{value}")
    } else {
        value.to_string()
    }
}

fn run_summary_markdown(summary: &SyncRunSummary, moves: &[QuoteMove]) -> String {
    let mut lines = vec![
        "# GMP Run Summary".to_string(),
        String::new(),
        format!("- Run ID: `{}`", summary.run_id),
        format!("- Started: {}", summary.started_at),
        format!("- Finished: {}", summary.finished_at),
        format!("- Status date: {}", summary.today),
        format!("- Candidates: {}", summary.collected_candidates),
        format!("- Offerings: {}", summary.groups),
        format!("- Persisted: {}", summary.persisted),
        String::new(),
        "## Sources".to_string(),
    ];
    for outcome in &summary.sources {
        lines.push(match &outcome.error {
            None => format!("- {}: {} candidates", outcome.source, outcome.candidates),
            Some(err) => format!("- {}: failed ({err})", outcome.source),
        });
    }

    lines.push(String::new());
    lines.push("## Offerings".to_string());
    lines.push(String::new());
    lines.push("| Offering | Status | Price band | GMP | Change | Gain % | Quote source |".to_string());
    lines.push("|---|---|---|---|---|---|---|".to_string());
    for m in moves {
        lines.push(format!(
            "| {} | {} | {} | {} | {} | {} | {} |",
            m.name,
            m.status,
            m.price_band.as_deref().unwrap_or("-"),
            m.quote,
            m.change.map(signed).unwrap_or_else(|| "new".to_string()),
            m.listing_gain_percent
                .map(|g| format!("{g:.2}"))
                .unwrap_or_else(|| "-".to_string()),
            m.quote_source.map(|s| s.as_str()).unwrap_or("-"),
        ));
    }

    let movers = top_movers(moves, TOP_MOVERS);
    if !movers.is_empty() {
        lines.push(String::new());
        lines.push("## Movers".to_string());
        for m in movers {
            lines.push(format!(
                "- {}: {} -> {} ({})",
                m.name,
                m.previous_quote.unwrap_or_default(),
                m.quote,
                m.change.map(signed).unwrap_or_default()
            ));
        }
    }

    if !summary.failed_groups.is_empty() {
        lines.push(String::new());
        lines.push("## Persistence failures".to_string());
        for failure in &summary.failed_groups {
            lines.push(format!("- `{}`: {}", failure.identity_key, failure.error));
        }
    }
    lines.push(String::new());
    lines.join("\n")
}

fn quotes_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        ArrowField::new("identity_key", DataType::Utf8, false),
        ArrowField::new("name", DataType::Utf8, false),
        ArrowField::new("status", DataType::Utf8, false),
        ArrowField::new("quote", DataType::Float64, false),
        ArrowField::new("quote_source", DataType::Utf8, true),
        ArrowField::new("previous_quote", DataType::Float64, true),
        ArrowField::new("change", DataType::Float64, true),
        ArrowField::new("listing_gain_percent", DataType::Float64, true),
    ]))
}

fn write_quotes_parquet(path: &Path, moves: &[QuoteMove]) -> Result<()> {
    let strings = |pick: fn(&QuoteMove) -> Option<&str>| {
        StringArray::from(moves.iter().map(pick).collect::<Vec<_>>())
    };
    let floats = |pick: fn(&QuoteMove) -> Option<f64>| {
        Float64Array::from(moves.iter().map(pick).collect::<Vec<_>>())
    };

    let batch = RecordBatch::try_new(
        quotes_schema(),
        vec![
            Arc::new(strings(|m| Some(m.identity_key.as_str()))),
            Arc::new(strings(|m| Some(m.name.as_str()))),
            Arc::new(strings(|m| Some(m.status.as_str()))),
            Arc::new(floats(|m| Some(m.quote))),
            Arc::new(strings(|m| m.quote_source.map(|s| s.as_str()))),
            Arc::new(floats(|m| m.previous_quote)),
            Arc::new(floats(|m| m.change)),
            Arc::new(floats(|m| m.listing_gain_percent)),
        ],
    )
    .context("building quote snapshot batch")?;

    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening quote snapshot {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing quote snapshot {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing quote snapshot {}", path.display()))?;
    Ok(())
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|col| col.as_any().downcast_ref::<T>())
        .with_context(|| format!("quote snapshot has no usable `{name}` column"))
}

/// `identity_key -> quote` from a snapshot written by an earlier run.
pub fn read_quotes_parquet(path: &Path) -> Result<HashMap<String, f64>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .and_then(|builder| builder.build())
        .with_context(|| format!("reading {}", path.display()))?;

    let mut quotes = HashMap::new();
    for batch in reader {
        let batch = batch.with_context(|| format!("decoding {}", path.display()))?;
        let keys: &StringArray = column(&batch, "identity_key")?;
        let values: &Float64Array = column(&batch, "quote")?;
        for row in 0..batch.num_rows() {
            if !values.is_null(row) {
                quotes.insert(keys.value(row).to_string(), values.value(row));
            }
        }
    }
    Ok(quotes)
}

#[derive(Debug, Deserialize)]
struct StoredReport {
    offerings: Vec<QuoteMove>,
}

/// Markdown digest of the `runs` most recent indexed runs, newest first.
pub fn report_recent_runs(runs: usize, reports_root: &Path) -> Result<String> {
    let index = read_run_index(reports_root)?;
    let mut lines = vec!["# GMP Recent Runs".to_string(), String::new()];
    if index.is_empty() {
        lines.push(format!("No runs recorded under `{}`.", reports_root.display()));
        lines.push(String::new());
        return Ok(lines.join("\n"));
    }

    for entry in index.iter().rev().take(runs.max(1)) {
        let report_path = run_dir(reports_root, entry.run_id).join("reconciliation.json");
        let report: StoredReport = serde_json::from_str(
            &std::fs::read_to_string(&report_path)
                .with_context(|| format!("reading {}", report_path.display()))?,
        )
        .with_context(|| format!("parsing {}", report_path.display()))?;

        lines.push(format!("## Run `{}`", entry.run_id));
        lines.push(format!("- finished: {}", entry.finished_at));
        lines.push(format!("- status date: {}", entry.today));
        lines.push(format!("- offerings: {}", entry.offerings));
        lines.push(format!("- persistence failures: {}", entry.failed_groups));
        if !entry.failed_sources.is_empty() {
            let failed: Vec<&str> = entry.failed_sources.iter().map(|s| s.as_str()).collect();
            lines.push(format!("- unavailable sources: {}", failed.join(", ")));
        }
        let new = report.offerings.iter().filter(|m| m.previous_quote.is_none()).count();
        lines.push(format!("- new offerings: {new}"));
        for m in top_movers(&report.offerings, TOP_MOVERS) {
            lines.push(format!(
                "- moved: {} {} -> {}",
                m.name,
                m.previous_quote.unwrap_or_default(),
                m.quote
            ));
        }
        lines.push(String::new());
    }

    Ok(lines.join("\n"))
}

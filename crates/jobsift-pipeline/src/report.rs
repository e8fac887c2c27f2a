//! Run report artifacts: `run_report.json`, `summary.md` and a Parquet snapshot with its manifest.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{Float64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use chrono::{DateTime, Utc};
use jobsift_core::{Extraction, PipelineStats, Recommendation, RunStatus, ScoredJob};
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use uuid::Uuid;

const TOP_RECORDS: usize = 10;

/// Terminal record set plus counters for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub stats: PipelineStats,
    pub records: Vec<ScoredJob>,
    /// Records the basic filter turned away, with their reasons.
    #[serde(default)]
    pub rejected: Vec<ScoredJob>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_dir: Option<PathBuf>,
}

impl RunReport {
    pub fn new(stats: PipelineStats, records: Vec<ScoredJob>) -> Self {
        Self {
            status: stats.status(),
            stats,
            records,
            rejected: Vec::new(),
            report_dir: None,
        }
    }

    pub fn one_line_summary(&self) -> String {
        format!(
            "run {} {}: processed={} uniques={} passed={} scored={} written={} failed_writes={}",
            self.stats.run_id,
            self.status,
            self.stats.total_processed,
            self.stats.dedup.uniques,
            self.stats.basic_passed,
            self.stats.scored,
            self.stats.written,
            self.stats.write_failed,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub schema_version: u32,
    pub run_id: Uuid,
    pub files: Vec<SnapshotManifestFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

fn percent(rate: f64) -> String {
    format!("{:.1}%", rate * 100.0)
}

pub fn render_summary(report: &RunReport) -> String {
    let stats = &report.stats;
    let mut lines = vec![
        "# Jobsift Run Summary".to_string(),
        String::new(),
        format!("- Run ID: `{}`", stats.run_id),
        format!("- Status: {}", report.status),
        format!("- Started: {}", stats.started_at),
        format!(
            "- Finished: {}",
            stats
                .finished_at
                .map(|t| t.to_string())
                .unwrap_or_else(|| "-".into())
        ),
    ];
    if let Some(err) = &stats.fatal_error {
        lines.push(format!("- Fatal error: {err}"));
    }

    lines.push(String::new());
    lines.push("## Counters".into());
    lines.push(format!("- Sources ok / failed: {} / {}", stats.sources_ok, stats.sources_failed));
    lines.push(format!("- Processed: {}", stats.total_processed));
    lines.push(format!(
        "- Duplicates: url {} / content {} / semantic {} (prior {})",
        stats.dedup.url_duplicates,
        stats.dedup.content_duplicates,
        stats.dedup.semantic_duplicates,
        stats.dedup.prior_duplicates
    ));
    lines.push(format!("- Uniques: {}", stats.dedup.uniques));
    lines.push(format!(
        "- Extracted: {} (incomplete {})",
        stats.extracted, stats.extraction_incomplete
    ));
    lines.push(format!(
        "- Basic filter passed / rejected: {} / {}",
        stats.basic_passed, stats.basic_rejected
    ));
    lines.push(format!("- Scored: {} (below store threshold {})", stats.scored, stats.advanced_filtered));
    lines.push(format!("- Written: {} (failed {})", stats.written, stats.write_failed));

    lines.push(String::new());
    lines.push("## Rates".into());
    lines.push(format!("- Dedup rate: {}", percent(stats.dedup_rate())));
    lines.push(format!("- Basic pass rate: {}", percent(stats.basic_pass_rate())));
    lines.push(format!("- Write success rate: {}", percent(stats.write_success_rate())));
    lines.push(format!("- Overall pass rate: {}", percent(stats.overall_pass_rate())));

    lines.push(String::new());
    lines.push("## Stages".into());
    for stage in &stats.stages {
        lines.push(format!(
            "- {}: {:?} ({} -> {}, {} ms)",
            stage.stage, stage.status, stage.input, stage.output, stage.elapsed_ms
        ));
    }

    if !stats.reject_reasons.is_empty() {
        lines.push(String::new());
        lines.push("## Reject Reasons".into());
        for (reason, count) in &stats.reject_reasons {
            lines.push(format!("- {reason}: {count}"));
        }
    }

    lines.push(String::new());
    lines.push("## Recommendations".into());
    for tier in [
        Recommendation::HighlyRecommended,
        Recommendation::Recommended,
        Recommendation::Average,
        Recommendation::NotRecommended,
    ] {
        let count = stats.recommendations.get(&tier).copied().unwrap_or(0);
        lines.push(format!("- {}: {count}", tier.as_str()));
    }

    let top: Vec<_> = report
        .records
        .iter()
        .filter(|r| r.result.basic_passed())
        .take(TOP_RECORDS)
        .collect();
    if !top.is_empty() {
        lines.push(String::new());
        lines.push("## Top Records".into());
        for (rank, scored) in top.iter().enumerate() {
            lines.push(format!(
                "{}. {:.1} {} @ {} ({})",
                rank + 1,
                scored.result.score(),
                scored.job.display_title(),
                scored.job.company.as_deref().unwrap_or("-"),
                scored.job.source_url
            ));
        }
    }
    lines.push(String::new());
    lines.join("\n")
}

/// Writes every artifact for `report` under `<reports_root>/<run_id>/` and returns that directory.
pub async fn write_run_artifacts(reports_root: &Path, report: &RunReport) -> Result<PathBuf> {
    let run_dir = reports_root.join(report.stats.run_id.to_string());
    let snapshot_dir = run_dir.join("snapshots");
    fs::create_dir_all(&snapshot_dir)
        .await
        .with_context(|| format!("creating {}", snapshot_dir.display()))?;

    let json = serde_json::to_vec_pretty(report).context("serializing run report")?;
    fs::write(run_dir.join("run_report.json"), json)
        .await
        .context("writing run_report.json")?;
    fs::write(run_dir.join("summary.md"), render_summary(report))
        .await
        .context("writing summary.md")?;

    let parquet_path = snapshot_dir.join("jobs.parquet");
    write_jobs_parquet(&parquet_path, &report.records)?;
    let manifest = SnapshotManifest {
        schema_version: 1,
        run_id: report.stats.run_id,
        files: vec![manifest_entry("jobs", &run_dir, &parquet_path)?],
    };
    let manifest_path = snapshot_dir.join("manifest.json");
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing parquet manifest")?;
    fs::write(&manifest_path, bytes)
        .await
        .with_context(|| format!("writing {}", manifest_path.display()))?;
    Ok(run_dir)
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn text_column<'a>(records: &'a [ScoredJob], f: impl Fn(&'a ScoredJob) -> Option<&'a str>) -> StringArray {
    StringArray::from(records.iter().map(f).collect::<Vec<_>>())
}

pub fn write_jobs_parquet(path: &Path, records: &[ScoredJob]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("source_url", DataType::Utf8, false),
        ArrowField::new("source_platform", DataType::Utf8, false),
        ArrowField::new("title", DataType::Utf8, true),
        ArrowField::new("company", DataType::Utf8, true),
        ArrowField::new("location", DataType::Utf8, true),
        ArrowField::new("salary_min", DataType::Float64, true),
        ArrowField::new("salary_max", DataType::Float64, true),
        ArrowField::new("score", DataType::Float64, false),
        ArrowField::new("recommendation", DataType::Utf8, false),
        ArrowField::new("extraction", DataType::Utf8, false),
        ArrowField::new("collected_at", DataType::Utf8, false),
    ]));

    let salaries: Vec<_> = records.iter().map(|r| r.job.effective_salary()).collect();
    let extraction = StringArray::from(
        records
            .iter()
            .map(|r| {
                Some(match r.job.extraction {
                    Extraction::Pending => "pending",
                    Extraction::Complete { .. } => "complete",
                    Extraction::Incomplete { .. } => "incomplete",
                })
            })
            .collect::<Vec<_>>(),
    );
    let collected_at = StringArray::from(
        records
            .iter()
            .map(|r| Some(r.job.collected_at.to_rfc3339()))
            .collect::<Vec<_>>(),
    );

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(text_column(records, |r| Some(r.job.source_url.as_str()))),
            Arc::new(text_column(records, |r| Some(r.job.source_platform.as_str()))),
            Arc::new(text_column(records, |r| r.job.title.as_deref())),
            Arc::new(text_column(records, |r| r.job.company.as_deref())),
            Arc::new(text_column(records, |r| r.job.location.as_deref())),
            Arc::new(Float64Array::from(
                salaries.iter().map(|s| s.and_then(|s| s.min)).collect::<Vec<_>>(),
            )),
            Arc::new(Float64Array::from(
                salaries.iter().map(|s| s.and_then(|s| s.max)).collect::<Vec<_>>(),
            )),
            Arc::new(Float64Array::from(
                records.iter().map(|r| r.result.score()).collect::<Vec<_>>(),
            )),
            Arc::new(text_column(records, |r| Some(r.result.recommendation().as_str()))),
            Arc::new(extraction),
            Arc::new(collected_at),
        ],
    )
    .context("building jobs record batch")?;
    write_parquet(path, batch)
}

fn manifest_entry(name: &str, run_dir: &Path, path: &Path) -> Result<SnapshotManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let sha256 = hex::encode(hasher.finalize());
    let rel = path.strip_prefix(run_dir).unwrap_or(path).display().to_string();
    Ok(SnapshotManifestFile {
        name: name.to_string(),
        path: rel,
        sha256,
        bytes: bytes.len() as u64,
    })
}

#[derive(Debug, Deserialize)]
struct ReportHeader {
    status: RunStatus,
    stats: PipelineStats,
    #[serde(default)]
    records: Vec<serde::de::IgnoredAny>,
}

/// Markdown overview of the `runs` most recent reports under `reports_root`, newest first.
pub fn summarize_recent_runs(reports_root: &Path, runs: usize) -> Result<String> {
    let mut headers: Vec<(DateTime<Utc>, PathBuf, ReportHeader)> = Vec::new();
    let entries =
        std::fs::read_dir(reports_root).with_context(|| format!("reading {}", reports_root.display()))?;
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path().join("run_report.json");
        if !path.is_file() {
            continue;
        }
        let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        let header: ReportHeader =
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        headers.push((header.stats.started_at, entry.path(), header));
    }
    headers.sort_by(|a, b| b.0.cmp(&a.0));

    let mut lines = vec!["# Jobsift Recent Runs".to_string(), String::new()];
    if headers.is_empty() {
        lines.push("No runs recorded yet.".into());
    }
    for (_, dir, header) in headers.into_iter().take(runs.max(1)) {
        let stats = &header.stats;
        lines.push(format!("## Run `{}`", stats.run_id));
        lines.push(format!("- status: {}", header.status));
        lines.push(format!("- started: {}", stats.started_at));
        lines.push(format!(
            "- processed: {} / uniques: {} / passed: {} / written: {}",
            stats.total_processed, stats.dedup.uniques, stats.basic_passed, stats.written
        ));
        lines.push(format!("- records in report: {}", header.records.len()));
        let summary = dir.join("summary.md");
        if summary.exists() {
            lines.push(format!("- summary: `{}`", summary.display()));
        }
        let manifest = dir.join("snapshots").join("manifest.json");
        if manifest.exists() {
            lines.push(format!("- parquet manifest: `{}`", manifest.display()));
        }
        lines.push(String::new());
    }
    Ok(lines.join("\n"))
}

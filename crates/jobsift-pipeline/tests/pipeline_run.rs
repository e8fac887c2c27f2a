use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jobsift_adapters::{CollectContext, Collector, CollectorError, CollectorRegistry, SourceConfig, SourceRegistry};
use jobsift_core::{JobRecord, RunStatus, ScoredJob, Stage, StageStatus};
use jobsift_pipeline::{LlmExtractor, Pipeline, PipelineConfig, StorageBackend};
use jobsift_storage::{StorageError, StorageWriter, WriteOutcome, WriteStatus};

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .expect("workspace root")
}

/// Repository sources and config, with every output redirected into `out`.
fn mk_config(out: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::load(workspace_root().join("jobsift.yaml")).expect("jobsift.yaml");
    config.workspace_root = workspace_root();
    config.reports_dir = out.join("reports");
    config.snapshots_dir = out.join("snapshots");
    config.storage.jsonl_path = out.join("data/jobs.jsonl");
    config
}

#[derive(Default)]
struct MemoryWriter {
    stored: Mutex<Vec<ScoredJob>>,
}

impl MemoryWriter {
    fn stored_urls(&self) -> Vec<String> {
        self.stored
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.job.source_url.clone())
            .collect()
    }
}

#[async_trait]
impl StorageWriter for MemoryWriter {
    fn name(&self) -> &str {
        "memory"
    }

    async fn write_batch(&self, batch: &[ScoredJob]) -> Result<Vec<WriteOutcome>, StorageError> {
        self.stored.lock().unwrap().extend_from_slice(batch);
        Ok(batch
            .iter()
            .map(|s| WriteOutcome {
                source_url: s.job.source_url.clone(),
                status: WriteStatus::Inserted,
            })
            .collect())
    }

    async fn load_existing(&self) -> Result<Vec<JobRecord>, StorageError> {
        Ok(self.stored.lock().unwrap().iter().map(|s| s.job.clone()).collect())
    }
}

struct DownWriter;

#[async_trait]
impl StorageWriter for DownWriter {
    fn name(&self) -> &str {
        "down"
    }

    async fn write_batch(&self, _batch: &[ScoredJob]) -> Result<Vec<WriteOutcome>, StorageError> {
        Err(StorageError::Unavailable("connection refused".into()))
    }

    async fn load_existing(&self) -> Result<Vec<JobRecord>, StorageError> {
        Err(StorageError::Unavailable("connection refused".into()))
    }
}

#[test]
fn repository_config_is_valid() {
    let config = PipelineConfig::load(workspace_root().join("jobsift.yaml")).expect("jobsift.yaml");
    config.validate().expect("valid config");
    let sources = SourceRegistry::load(workspace_root().join("sources.yaml")).expect("sources.yaml");
    assert_eq!(sources.enabled().count(), 3);
}

#[tokio::test]
async fn fixture_sources_flow_through_every_stage() {
    let out = tempfile::tempdir().unwrap();
    let writer = Arc::new(MemoryWriter::default());
    let pipeline = Pipeline::from_config(mk_config(out.path()))
        .await
        .expect("pipeline")
        .with_writer(writer.clone());

    let report = pipeline.run().await.expect("run");
    let stats = &report.stats;
    assert_eq!(report.status, RunStatus::Success, "{:?}", stats.stages);
    assert_eq!(stats.sources_ok, 3);
    assert_eq!(stats.total_processed, 9);
    assert_eq!(stats.dedup.url_duplicates, 1);
    assert_eq!(stats.dedup.content_duplicates, 1);
    assert_eq!(stats.dedup.semantic_duplicates, 0);
    assert_eq!(stats.dedup.uniques, 7);
    assert_eq!(stats.extracted, 7);
    assert_eq!(stats.basic_passed, 5);
    assert_eq!(stats.basic_rejected, 2);
    assert_eq!(stats.reject_reasons.get("location_not_matched"), Some(&1));
    assert_eq!(stats.reject_reasons.get("salary_below_minimum"), Some(&1));
    assert_eq!(stats.reject_reasons.get("experience_above_ceiling"), Some(&1));
    assert_eq!(stats.reject_reasons.get("deadline_passed"), Some(&1));
    assert_eq!(stats.scored, 5);
    assert_eq!(stats.recommendations.values().sum::<usize>(), 5);
    assert_eq!(stats.written, 5);
    assert_eq!(stats.stages.len(), 5);

    let scores: Vec<f64> = report.records.iter().map(|r| r.result.score()).collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]), "{scores:?}");
    assert_eq!(report.rejected.len(), 2);
    let mut stored = writer.stored_urls();
    stored.sort();
    assert_eq!(
        stored,
        vec![
            "https://board.example/jobs/A100",
            "https://board.example/jobs/A101",
            "https://feed.example/jobs/F1",
            "https://feed.example/jobs/F2",
            "https://referrals.example/hooli/ai-platform",
        ]
    );

    let dir = report.report_dir.as_ref().expect("report dir");
    assert!(dir.join("run_report.json").exists());
    assert!(dir.join("summary.md").exists());
    assert!(dir.join("snapshots/jobs.parquet").exists());
}

#[tokio::test]
async fn second_run_drops_what_the_store_already_holds() {
    let out = tempfile::tempdir().unwrap();
    let writer = Arc::new(MemoryWriter::default());
    let pipeline = Pipeline::from_config(mk_config(out.path()))
        .await
        .unwrap()
        .with_writer(writer.clone());

    pipeline.run().await.unwrap();
    let second = pipeline.run().await.unwrap();

    assert_eq!(second.status, RunStatus::Success);
    assert_eq!(second.stats.dedup.uniques, 2);
    assert!(second.stats.dedup.prior_duplicates >= 5);
    assert_eq!(second.stats.basic_passed, 0);
    assert_eq!(second.stats.written, 0);
    assert!(matches!(
        second.stats.stage(Stage::Store).map(|s| &s.status),
        Some(StageStatus::Skipped { reason }) if reason == "no input"
    ));
    assert_eq!(writer.stored_urls().len(), 5);
}

#[tokio::test]
async fn skipped_collect_resumes_from_latest_snapshot_in_dry_run() {
    let out = tempfile::tempdir().unwrap();
    let first = Pipeline::from_config(mk_config(out.path()))
        .await
        .unwrap()
        .with_writer(Arc::new(MemoryWriter::default()));
    first.run().await.unwrap();

    let mut config = mk_config(out.path());
    config.stages.collect = false;
    config.stages.store = false;
    let writer = Arc::new(MemoryWriter::default());
    let resumed = Pipeline::from_config(config).await.unwrap().with_writer(writer.clone());
    let report = resumed.run().await.unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.stats.total_processed, 9);
    assert_eq!(report.stats.dedup.uniques, 7);
    assert_eq!(report.records.len(), 5);
    assert!(matches!(
        report.stats.stage(Stage::Collect).map(|s| &s.status),
        Some(StageStatus::Skipped { reason }) if reason.starts_with("resumed from")
    ));
    assert!(matches!(
        report.stats.stage(Stage::Store).map(|s| &s.status),
        Some(StageStatus::Skipped { reason }) if reason == "dry run"
    ));
    assert!(writer.stored_urls().is_empty());
}

#[tokio::test]
async fn explicit_resume_snapshot_must_exist() {
    let out = tempfile::tempdir().unwrap();
    let mut config = mk_config(out.path());
    config.stages.collect = false;
    config.resume_snapshot = Some(out.path().join("missing.json"));
    let pipeline = Pipeline::from_config(config).await.unwrap();
    let err = pipeline.run().await.err().expect("configuration error");
    assert!(err.to_string().contains("resume_snapshot"), "{err}");
}

#[tokio::test]
async fn unavailable_store_fails_the_run_but_still_reports() {
    let out = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::from_config(mk_config(out.path()))
        .await
        .unwrap()
        .with_writer(Arc::new(DownWriter));
    let report = pipeline.run().await.unwrap();
    assert_eq!(report.status, RunStatus::Failure);
    assert!(report.stats.fatal_error.as_deref().unwrap().contains("connection refused"));
    assert!(matches!(
        report.stats.stage(Stage::Dedup).map(|s| &s.status),
        Some(StageStatus::Failed { .. })
    ));
    assert!(report.stats.stage(Stage::Extract).is_none());
    assert!(report.report_dir.unwrap().join("run_report.json").exists());

    let mut config = mk_config(out.path());
    config.dedup.against_prior = false;
    let pipeline = Pipeline::from_config(config).await.unwrap().with_writer(Arc::new(DownWriter));
    let report = pipeline.run().await.unwrap();
    assert_eq!(report.status, RunStatus::Failure);
    assert_eq!(report.stats.write_failed, 5);
    assert!(matches!(
        report.stats.stage(Stage::Store).map(|s| &s.status),
        Some(StageStatus::Failed { .. })
    ));
}

#[tokio::test]
async fn broken_source_and_failed_extraction_are_partial_not_fatal() {
    let out = tempfile::tempdir().unwrap();
    let mut sources = SourceRegistry::load(workspace_root().join("sources.yaml")).unwrap();
    let mut broken = sources.sources[0].clone();
    broken.source_id = "broken".into();
    broken.fixture_path = Some("fixtures/board/missing.html".into());
    sources.sources.push(broken);

    let writer = Arc::new(MemoryWriter::default());
    let pipeline = Pipeline::new(mk_config(out.path()), sources)
        .unwrap()
        .with_extractor(Arc::new(LlmExtractor::default()))
        .with_writer(writer.clone());
    let report = pipeline.run().await.unwrap();

    assert_eq!(report.status, RunStatus::PartialFailure);
    assert_eq!(report.stats.sources_ok, 3);
    assert_eq!(report.stats.sources_failed, 1);
    assert_eq!(
        report.stats.stage(Stage::Collect).map(|s| &s.status),
        Some(&StageStatus::Partial { failed: 1 })
    );
    assert_eq!(report.stats.extracted, 0);
    assert_eq!(report.stats.extraction_incomplete, 7);
    assert_eq!(report.stats.basic_passed, 5);
    assert_eq!(writer.stored_urls().len(), 5);
}

#[tokio::test]
async fn semantic_tier_without_comparator_is_reported_unavailable() {
    let out = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::from_config(mk_config(out.path()))
        .await
        .unwrap()
        .with_comparator(None)
        .with_writer(Arc::new(MemoryWriter::default()));
    let report = pipeline.run().await.unwrap();
    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.stats.dedup.semantic_status, jobsift_core::SemanticStatus::Unavailable);
    assert_eq!(report.stats.dedup.uniques, 7);
}

struct StalledCollector;

#[async_trait]
impl Collector for StalledCollector {
    fn name(&self) -> &'static str {
        "stalled"
    }

    async fn collect(&self, _ctx: &CollectContext, _source: &SourceConfig) -> Result<Vec<JobRecord>, CollectorError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn run_timeout_cuts_off_a_stalled_source() {
    let out = tempfile::tempdir().unwrap();
    let mut sources = SourceRegistry::load(workspace_root().join("sources.yaml")).unwrap();
    let mut stalled = sources.sources[0].clone();
    stalled.source_id = "stalled".into();
    stalled.collector = "stalled".into();
    sources.sources.push(stalled);
    let mut collectors = CollectorRegistry::with_defaults();
    collectors.register("stalled", Arc::new(StalledCollector));

    let mut config = mk_config(out.path());
    config.run_timeout_secs = Some(1);
    let pipeline = Pipeline::new(config, sources)
        .unwrap()
        .with_collectors(collectors)
        .with_writer(Arc::new(MemoryWriter::default()));

    let started = Instant::now();
    let report = pipeline.run().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(report.status, RunStatus::PartialFailure);
    assert_eq!(report.stats.sources_ok, 3);
    assert_eq!(report.stats.sources_failed, 1);
    assert_eq!(
        report.stats.stage(Stage::Collect).map(|s| &s.status),
        Some(&StageStatus::Partial { failed: 1 })
    );
    assert_eq!(report.stats.total_processed, 9);
}

#[tokio::test]
async fn postgres_without_url_falls_back_to_jsonl_only_for_dry_runs() {
    let out = tempfile::tempdir().unwrap();
    let mut config = mk_config(out.path());
    config.storage.backend = StorageBackend::Postgres;
    config.storage.database_url = None;
    let err = Pipeline::from_config(config.clone()).await.err().expect("configuration error");
    assert!(err.to_string().contains("DATABASE_URL"), "{err}");

    config.stages.store = false;
    let pipeline = Pipeline::from_config(config).await.unwrap();
    assert_eq!(pipeline.writer_name(), "jsonl");
}

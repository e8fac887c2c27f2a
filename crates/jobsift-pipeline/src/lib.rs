//! Staged pipeline orchestration: Collect → Dedup → Extract → Filter → Store.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use jobsift_adapters::{CollectContext, CollectorRegistry, SourceConfig, SourceRegistry};
use jobsift_core::{
    ConfigError, FilterResult, JobRecord, PipelineError, PipelineStats, ScoredJob, Stage, StageReport, StageStatus,
};
use jobsift_dedup::{DedupEngine, LexicalComparator, PriorKnown, SemanticComparator};
use jobsift_filter::{rank_by_score, FilterGate, ScoringEngine};
use jobsift_storage::{HttpFetcher, JsonlJobWriter, PgJobWriter, SnapshotStore, StorageError, StorageWriter};
use tokio::time::{timeout_at, Instant};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub mod config;
pub mod extract;
pub mod llm;
pub mod report;
pub mod scheduler;

pub use config::{
    CollectConfig, ComparatorKind, ExtractConfig, ExtractorKind, LlmConfig, PipelineConfig, SchedulerConfig,
    SemanticConfig, StageToggles, StorageBackend, StorageConfig,
};
pub use extract::{extract_all, AttributeExtractor, ExtractionOutcome, LlmExtractor, RuleExtractor};
pub use llm::{LlmClient, LlmError, LlmSemanticComparator};
pub use report::{render_summary, summarize_recent_runs, write_run_artifacts, RunReport};

pub const CRATE_NAME: &str = "jobsift-pipeline";

pub const COLLECTED_SNAPSHOT: &str = "collected";
pub const FINAL_SNAPSHOT: &str = "final";

pub struct Pipeline {
    config: PipelineConfig,
    sources: SourceRegistry,
    collectors: CollectorRegistry,
    http: Arc<HttpFetcher>,
    comparator: Option<Arc<dyn SemanticComparator>>,
    extractor: Arc<dyn AttributeExtractor>,
    writer: Arc<dyn StorageWriter>,
    snapshots: SnapshotStore,
}

impl Pipeline {
    /// Validates `config` and wires the default collaborators. Storage defaults to the JSON-lines writer.
    pub fn new(config: PipelineConfig, sources: SourceRegistry) -> Result<Self, PipelineError> {
        config.validate()?;
        let http = HttpFetcher::new(config.collect.http_client_config()).context("building http client")?;
        let llm = LlmClient::from_config(&config.llm)
            .map_err(|e| ConfigError::new("llm", e.to_string()))?
            .map(Arc::new);

        let comparator: Arc<dyn SemanticComparator> = match config.semantic.comparator {
            ComparatorKind::Lexical => Arc::new(LexicalComparator {
                duplicate_threshold: config.semantic.lexical_threshold,
            }),
            ComparatorKind::Llm => Arc::new(LlmSemanticComparator::new(llm.clone())),
        };
        let extractor: Arc<dyn AttributeExtractor> = match config.extract.backend {
            ExtractorKind::Rules => Arc::new(RuleExtractor::new(
                config.filter.graduation_class,
                config.scoring.required_keywords.clone(),
            )),
            ExtractorKind::Llm => Arc::new(LlmExtractor::new(llm, config.filter.graduation_class)),
        };
        let writer = Arc::new(JsonlJobWriter::new(config.resolve(&config.storage.jsonl_path)));
        let snapshots = SnapshotStore::new(config.snapshots_root());

        Ok(Self {
            config,
            sources,
            collectors: CollectorRegistry::with_defaults(),
            http: Arc::new(http),
            comparator: Some(comparator),
            extractor,
            writer,
            snapshots,
        })
    }

    /// Loads the source registry named by `config` and connects the configured storage backend.
    pub async fn from_config(config: PipelineConfig) -> Result<Self, PipelineError> {
        let sources_file = config.sources_file();
        let sources = SourceRegistry::load(&sources_file)
            .map_err(|e| ConfigError::new("sources_path", format!("{e:#}")))?;
        let writer: Option<Arc<dyn StorageWriter>> = match (config.storage.backend, &config.storage.database_url) {
            (StorageBackend::Postgres, Some(url)) => Some(Arc::new(
                PgJobWriter::connect_lazy(url).map_err(|e| ConfigError::new("storage.database_url", e.to_string()))?,
            )),
            (StorageBackend::Postgres, None) => {
                // with store enabled, validation rejects this combination
                if !config.stages.store {
                    warn!("postgres backend selected without DATABASE_URL; using the JSON-lines store");
                }
                None
            }
            (StorageBackend::Jsonl, _) => None,
        };
        let pipeline = Self::new(config, sources)?;
        Ok(match writer {
            Some(writer) => pipeline.with_writer(writer),
            None => pipeline,
        })
    }

    pub fn with_collectors(mut self, collectors: CollectorRegistry) -> Self {
        self.collectors = collectors;
        self
    }

    /// `None` leaves the semantic tier without a comparator, which it reports as unavailable.
    pub fn with_comparator(mut self, comparator: Option<Arc<dyn SemanticComparator>>) -> Self {
        self.comparator = comparator;
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn AttributeExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_writer(mut self, writer: Arc<dyn StorageWriter>) -> Self {
        self.writer = writer;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    pub fn writer_name(&self) -> &str {
        self.writer.name()
    }

    /// Runs every enabled stage once. Only configuration problems are returned as `Err`;
    /// everything else is reflected in the report's status and stats.
    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        self.run_stages(run_id, started_at)
            .instrument(info_span!("pipeline_run", %run_id))
            .await
    }

    async fn run_stages(&self, run_id: Uuid, started_at: DateTime<Utc>) -> Result<RunReport, PipelineError> {
        let toggles = self.config.stages;
        let resumed = if toggles.collect {
            None
        } else {
            Some(self.load_resume_batch().await?)
        };
        let deadline = self.config.run_timeout().map(|t| Instant::now() + t);
        let mut stats = PipelineStats::new(run_id, started_at);
        info!(
            sources = self.sources.enabled().count(),
            writer = self.writer_name(),
            extractor = self.extractor.name(),
            "pipeline run started"
        );

        // Collect
        let batch = match resumed {
            Some((batch, path)) => {
                let reason = format!("resumed from {}", path.display());
                skip_stage(&mut stats, Stage::Collect, reason, batch.len());
                batch
            }
            None => self.collect_stage(run_id, started_at, deadline, &mut stats).await,
        };
        stats.total_processed = batch.len();

        // Dedup
        let uniques = if !toggles.dedup {
            stats.dedup.input = batch.len();
            stats.dedup.uniques = batch.len();
            skip_stage(&mut stats, Stage::Dedup, "disabled", batch.len());
            batch
        } else if batch.is_empty() {
            skip_stage(&mut stats, Stage::Dedup, "no input", 0);
            batch
        } else {
            match self.dedup_stage(batch, deadline, &mut stats).await {
                Ok(uniques) => uniques,
                Err(unscored) => return Ok(self.finish(stats, unscored, Vec::new()).await),
            }
        };

        // Extract
        let extracted = if !toggles.extract {
            skip_stage(&mut stats, Stage::Extract, "disabled", uniques.len());
            uniques
        } else if uniques.is_empty() {
            skip_stage(&mut stats, Stage::Extract, "no input", 0);
            uniques
        } else {
            self.extract_stage(uniques, deadline, &mut stats).await
        };

        // Filter
        let (ranked, rejected) = if !toggles.filter {
            skip_stage(&mut stats, Stage::Filter, "disabled", extracted.len());
            let unscored = extracted
                .into_iter()
                .map(|job| ScoredJob {
                    job,
                    result: FilterResult::unscored(),
                })
                .collect();
            (unscored, Vec::new())
        } else if extracted.is_empty() {
            skip_stage(&mut stats, Stage::Filter, "no input", 0);
            (Vec::new(), Vec::new())
        } else {
            self.filter_stage(extracted, &mut stats)
        };

        // Store
        if !toggles.store {
            skip_stage(&mut stats, Stage::Store, "dry run", ranked.len());
        } else if ranked.is_empty() {
            skip_stage(&mut stats, Stage::Store, "no input", 0);
        } else {
            self.store_stage(&ranked, &mut stats).await;
        }

        Ok(self.finish(stats, ranked, rejected).await)
    }

    async fn load_resume_batch(&self) -> Result<(Vec<JobRecord>, PathBuf), PipelineError> {
        let path = match &self.config.resume_snapshot {
            Some(path) => self.config.resolve(path),
            None => self
                .snapshots
                .latest(COLLECTED_SNAPSHOT)
                .await
                .map_err(|e| ConfigError::new("resume_snapshot", e.to_string()))?
                .ok_or_else(|| {
                    ConfigError::new("resume_snapshot", "collect is disabled and no collected snapshot exists")
                })?,
        };
        let batch = SnapshotStore::load_json::<Vec<JobRecord>>(&path)
            .await
            .map_err(|e| ConfigError::new("resume_snapshot", format!("loading {}: {e}", path.display())))?;
        info!(path = %path.display(), records = batch.len(), "resuming from collected snapshot");
        Ok((batch, path))
    }

    async fn collect_stage(
        &self,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        deadline: Option<Instant>,
        stats: &mut PipelineStats,
    ) -> Vec<JobRecord> {
        let clock = Instant::now();
        let sources: Vec<&SourceConfig> = self.sources.enabled().collect();
        if sources.is_empty() {
            skip_stage(stats, Stage::Collect, "no input", 0);
            return Vec::new();
        }
        stage_started(Stage::Collect, sources.len());

        let ctx = CollectContext {
            run_id,
            collected_at: started_at,
            http: Arc::clone(&self.http),
            workspace_root: self.config.workspace_root.clone(),
        };
        let ctx = &ctx;
        let collects: Vec<_> = sources
            .iter()
            .copied()
            .enumerate()
            .map(|(index, source)| async move {
                let collect = self.collectors.collect(ctx, source);
                // `None` means the run deadline cut the source off
                let result = match deadline {
                    Some(deadline) => timeout_at(deadline, collect).await.ok(),
                    None => Some(collect.await),
                };
                (index, source, result)
            })
            .collect();
        let mut results = stream::iter(collects)
            .buffer_unordered(self.config.collect.concurrency.max(1))
            .collect::<Vec<_>>()
            .await;
        results.sort_by_key(|(index, _, _)| *index);

        let mut batch = Vec::new();
        for (_, source, result) in results {
            match result {
                Some(Ok(records)) => {
                    stats.sources_ok += 1;
                    batch.extend(records);
                }
                Some(Err(err)) => {
                    stats.sources_failed += 1;
                    warn!(source_id = %source.source_id, error = %err, "source collection failed");
                }
                None => {
                    stats.sources_failed += 1;
                    warn!(source_id = %source.source_id, "run deadline reached before source finished");
                }
            }
        }

        if !batch.is_empty() {
            match self.snapshots.store_json(started_at, COLLECTED_SNAPSHOT, &batch).await {
                Ok(snapshot) => info!(path = %snapshot.absolute_path.display(), "collected batch snapshotted"),
                Err(err) => warn!(error = %err, "snapshotting collected batch failed"),
            }
        }

        let status = match stats.sources_failed {
            0 => StageStatus::Completed,
            failed => StageStatus::Partial { failed },
        };
        finish_stage(stats, Stage::Collect, status, sources.len(), batch.len(), clock);
        batch
    }

    /// `Err` carries the batch back when storage is totally unavailable and the run must stop.
    async fn dedup_stage(
        &self,
        batch: Vec<JobRecord>,
        deadline: Option<Instant>,
        stats: &mut PipelineStats,
    ) -> Result<Vec<JobRecord>, Vec<ScoredJob>> {
        let clock = Instant::now();
        let input = batch.len();
        stage_started(Stage::Dedup, input);

        let prior = if self.config.dedup.against_prior {
            match self.writer.load_existing().await {
                Ok(records) => {
                    info!(prior_records = records.len(), "loaded prior records");
                    Some(PriorKnown::from_records(records))
                }
                Err(StorageError::Unavailable(message)) if self.config.stages.store => {
                    let error = format!("storage unavailable: {message}");
                    stats.fatal_error = Some(error.clone());
                    finish_stage(stats, Stage::Dedup, StageStatus::Failed { error }, input, 0, clock);
                    return Err(batch.into_iter().map(unscored).collect());
                }
                Err(err) => {
                    warn!(error = %err, "loading prior records failed; deduplicating within the batch only");
                    None
                }
            }
        } else {
            None
        };

        let mut engine = DedupEngine::new(self.config.dedup.clone());
        if let Some(comparator) = &self.comparator {
            engine = engine.with_comparator(Arc::clone(comparator));
        }
        let outcome = engine.deduplicate_until(batch, prior.as_ref(), deadline).await;
        let status = match outcome.stats.semantic_failures {
            0 => StageStatus::Completed,
            failed => StageStatus::Partial { failed },
        };
        stats.dedup = outcome.stats;
        finish_stage(stats, Stage::Dedup, status, input, outcome.uniques.len(), clock);
        Ok(outcome.uniques)
    }

    async fn extract_stage(
        &self,
        records: Vec<JobRecord>,
        deadline: Option<Instant>,
        stats: &mut PipelineStats,
    ) -> Vec<JobRecord> {
        let clock = Instant::now();
        let input = records.len();
        stage_started(Stage::Extract, input);
        let outcome = extract_all(
            self.extractor.as_ref(),
            records,
            self.config.extract.concurrency,
            Duration::from_secs(self.config.extract.call_timeout_secs.max(1)),
            deadline,
        )
        .await;
        stats.extracted = outcome.completed;
        stats.extraction_incomplete = outcome.incomplete;
        let status = match outcome.incomplete {
            0 => StageStatus::Completed,
            failed => StageStatus::Partial { failed },
        };
        finish_stage(stats, Stage::Extract, status, input, outcome.records.len(), clock);
        outcome.records
    }

    fn filter_stage(&self, records: Vec<JobRecord>, stats: &mut PipelineStats) -> (Vec<ScoredJob>, Vec<ScoredJob>) {
        let clock = Instant::now();
        let input = records.len();
        stage_started(Stage::Filter, input);

        let gate = FilterGate::new(self.config.filter.clone());
        let outcome = gate.apply_basic_filters(records, Utc::now().date_naive());
        stats.basic_passed = outcome.passed.len();
        stats.basic_rejected = outcome.rejected.len();
        let rejected: Vec<ScoredJob> = outcome
            .rejected
            .into_iter()
            .map(|r| {
                let reasons: Vec<String> = r.reasons.iter().map(|reason| reason.as_str().to_string()).collect();
                for reason in &reasons {
                    *stats.reject_reasons.entry(reason.clone()).or_default() += 1;
                }
                ScoredJob {
                    job: r.job,
                    result: FilterResult::rejected(reasons),
                }
            })
            .collect();

        let engine = ScoringEngine::new(self.config.scoring.clone());
        let scored: Vec<ScoredJob> = outcome.passed.into_iter().map(|job| engine.evaluate(job)).collect();
        stats.scored = scored.len();
        for s in &scored {
            *stats.recommendations.entry(s.result.recommendation()).or_default() += 1;
        }
        let (ranked, below_threshold) = rank_by_score(scored, self.config.scoring.min_score_to_store);
        stats.advanced_filtered = below_threshold;

        finish_stage(stats, Stage::Filter, StageStatus::Completed, input, ranked.len(), clock);
        (ranked, rejected)
    }

    async fn store_stage(&self, ranked: &[ScoredJob], stats: &mut PipelineStats) {
        let clock = Instant::now();
        stage_started(Stage::Store, ranked.len());
        let status = match self.writer.write_batch(ranked).await {
            Ok(outcomes) => {
                stats.written = outcomes.iter().filter(|o| o.is_success()).count();
                stats.write_failed = outcomes.len() - stats.written;
                for failed in outcomes.iter().filter(|o| !o.is_success()) {
                    warn!(url = %failed.source_url, status = ?failed.status, "record not stored");
                }
                match stats.write_failed {
                    0 => StageStatus::Completed,
                    failed => StageStatus::Partial { failed },
                }
            }
            Err(err) => {
                let error = err.to_string();
                stats.write_failed = ranked.len();
                stats.fatal_error = Some(error.clone());
                StageStatus::Failed { error }
            }
        };
        let written = stats.written;
        finish_stage(stats, Stage::Store, status, ranked.len(), written, clock);
    }

    async fn finish(&self, mut stats: PipelineStats, records: Vec<ScoredJob>, rejected: Vec<ScoredJob>) -> RunReport {
        stats.finished_at = Some(Utc::now());
        if !records.is_empty() {
            if let Err(err) = self.snapshots.store_json(stats.started_at, FINAL_SNAPSHOT, &records).await {
                warn!(error = %err, "snapshotting final records failed");
            }
        }
        let mut report = RunReport::new(stats, records);
        report.rejected = rejected;
        match write_run_artifacts(&self.config.reports_root(), &report).await {
            Ok(dir) => report.report_dir = Some(dir),
            Err(err) => warn!(error = %format!("{err:#}"), "writing run report failed"),
        }
        info!(
            status = %report.status,
            processed = report.stats.total_processed,
            uniques = report.stats.dedup.uniques,
            written = report.stats.written,
            "pipeline run finished"
        );
        report
    }
}

fn unscored(job: JobRecord) -> ScoredJob {
    ScoredJob {
        job,
        result: FilterResult::unscored(),
    }
}

fn stage_started(stage: Stage, input: usize) {
    info!(stage = stage.as_str(), input, "stage started");
}

fn finish_stage(
    stats: &mut PipelineStats,
    stage: Stage,
    status: StageStatus,
    input: usize,
    output: usize,
    clock: Instant,
) {
    let elapsed_ms = clock.elapsed().as_millis() as u64;
    info!(stage = stage.as_str(), input, output, elapsed_ms, status = ?status, "stage finished");
    stats.record_stage(StageReport {
        stage,
        status,
        input,
        output,
        elapsed_ms,
    });
}

fn skip_stage(stats: &mut PipelineStats, stage: Stage, reason: impl Into<String>, passed_through: usize) {
    let status = StageStatus::skipped(reason);
    info!(stage = stage.as_str(), status = ?status, "stage skipped");
    stats.record_stage(StageReport {
        stage,
        status,
        input: passed_through,
        output: passed_through,
        elapsed_ms: 0,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_config(root: &std::path::Path) -> PipelineConfig {
        PipelineConfig {
            workspace_root: root.to_path_buf(),
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn invalid_config_is_rejected_before_any_stage() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = mk_config(dir.path());
        config.extract.concurrency = 0;
        let err = Pipeline::new(config, SourceRegistry::default()).err().expect("config error");
        assert!(matches!(err, PipelineError::Configuration(ref e) if e.field == "extract.concurrency"));
    }

    #[tokio::test]
    async fn empty_registry_skips_every_stage_and_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(mk_config(dir.path()), SourceRegistry::default()).unwrap();
        let report = pipeline.run().await.unwrap();
        assert_eq!(report.status, jobsift_core::RunStatus::Success);
        assert_eq!(report.stats.stages.len(), 5);
        assert!(report
            .stats
            .stages
            .iter()
            .all(|s| matches!(&s.status, StageStatus::Skipped { reason } if reason == "no input")));
        assert!(report.report_dir.expect("report dir").join("run_report.json").exists());
    }

    #[tokio::test]
    async fn missing_resume_snapshot_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = mk_config(dir.path());
        config.stages.collect = false;
        let pipeline = Pipeline::new(config, SourceRegistry::default()).unwrap();
        match pipeline.run().await {
            Err(PipelineError::Configuration(e)) => assert_eq!(e.field, "resume_snapshot"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!dir.path().join("reports").exists());
    }
}

//! Run configuration: one YAML document plus environment overrides, validated once before a run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use jobsift_core::ConfigError;
use jobsift_dedup::DedupConfig;
use jobsift_filter::{FilterConfig, ScoringConfig};
use jobsift_storage::HttpClientConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::scheduler::is_valid_cron;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageToggles {
    pub collect: bool,
    pub dedup: bool,
    pub extract: bool,
    pub filter: bool,
    pub store: bool,
}

impl Default for StageToggles {
    fn default() -> Self {
        Self {
            collect: true,
            dedup: true,
            extract: true,
            filter: true,
            store: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectConfig {
    /// Sources collected at once; also the global HTTP concurrency cap.
    pub concurrency: usize,
    pub request_delay_ms: u64,
    pub max_retries: usize,
    pub timeout_secs: u64,
    pub user_agent: Option<String>,
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            request_delay_ms: 1000,
            max_retries: 3,
            timeout_secs: 20,
            user_agent: None,
        }
    }
}

impl CollectConfig {
    pub fn http_client_config(&self) -> HttpClientConfig {
        let mut config = HttpClientConfig::polite(
            self.concurrency,
            Duration::from_millis(self.request_delay_ms),
            self.max_retries,
        );
        config.timeout = Duration::from_secs(self.timeout_secs.max(1));
        if let Some(user_agent) = &self.user_agent {
            config.user_agent = Some(user_agent.clone());
        }
        config
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparatorKind {
    #[default]
    Lexical,
    Llm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticConfig {
    pub comparator: ComparatorKind,
    pub lexical_threshold: f64,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            comparator: ComparatorKind::Lexical,
            lexical_threshold: 0.92,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractorKind {
    #[default]
    Rules,
    Llm,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    pub backend: ExtractorKind,
    pub concurrency: usize,
    pub call_timeout_secs: u64,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            backend: ExtractorKind::Rules,
            concurrency: 4,
            call_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Jsonl,
    Postgres,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub jsonl_path: PathBuf,
    #[serde(skip_serializing)]
    pub database_url: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Jsonl,
            jsonl_path: PathBuf::from("data/jobs.jsonl"),
            database_url: None,
        }
    }
}

/// OpenAI-compatible chat completion endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// Only ever read from `JOBSIFT_LLM_API_KEY`.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-4o-mini".into(),
            temperature: 0.0,
            max_tokens: 1000,
            timeout_secs: 60,
            max_retries: 3,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Six-field cron expressions (seconds first).
    pub crons: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            crons: vec!["0 0 9 * * *".into(), "0 0 18 * * *".into()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub workspace_root: PathBuf,
    pub sources_path: PathBuf,
    pub reports_dir: PathBuf,
    pub snapshots_dir: PathBuf,
    pub stages: StageToggles,
    pub collect: CollectConfig,
    pub dedup: DedupConfig,
    pub semantic: SemanticConfig,
    pub extract: ExtractConfig,
    pub filter: FilterConfig,
    pub scoring: ScoringConfig,
    pub storage: StorageConfig,
    pub llm: LlmConfig,
    pub scheduler: SchedulerConfig,
    /// Wall-clock budget for a whole run; outstanding collector, comparator and extraction calls are abandoned when it expires.
    pub run_timeout_secs: Option<u64>,
    /// Collected snapshot to resume from when the collect stage is disabled.
    pub resume_snapshot: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("."),
            sources_path: PathBuf::from("sources.yaml"),
            reports_dir: PathBuf::from("reports"),
            snapshots_dir: PathBuf::from("snapshots"),
            stages: StageToggles::default(),
            collect: CollectConfig::default(),
            dedup: DedupConfig::default(),
            semantic: SemanticConfig::default(),
            extract: ExtractConfig::default(),
            filter: FilterConfig::default(),
            scoring: ScoringConfig::default(),
            storage: StorageConfig::default(),
            llm: LlmConfig::default(),
            scheduler: SchedulerConfig::default(),
            run_timeout_secs: None,
            resume_snapshot: None,
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::new(key, format!("cannot parse {value:?}")))
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "TRUE" | "True" | "yes")
}

impl PipelineConfig {
    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "config file not found; using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).context("parsing pipeline config")
    }

    /// Loads the file, then applies process environment overrides.
    pub fn from_file_and_env(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(url) = lookup("DATABASE_URL") {
            self.storage.database_url = Some(url);
        }
        if let Some(dir) = lookup("JOBSIFT_WORKSPACE") {
            self.workspace_root = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("JOBSIFT_REPORTS_DIR") {
            self.reports_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("JOBSIFT_SNAPSHOTS_DIR") {
            self.snapshots_dir = PathBuf::from(dir);
        }
        if let Some(key) = lookup("JOBSIFT_LLM_API_KEY").filter(|k| !k.trim().is_empty()) {
            self.llm.api_key = Some(key.trim().to_string());
        }
        if let Some(v) = lookup("JOBSIFT_USER_EXPERIENCE_YEARS") {
            self.scoring.user_experience_years = parse_env("JOBSIFT_USER_EXPERIENCE_YEARS", &v)?;
        }
        if let Some(v) = lookup("JOBSIFT_MIN_SALARY") {
            let min_salary: f64 = parse_env("JOBSIFT_MIN_SALARY", &v)?;
            self.filter.min_salary = min_salary;
            self.scoring.min_salary = min_salary;
        }
        if let Some(v) = lookup("JOBSIFT_GRADUATION_CLASS") {
            self.filter.graduation_class = Some(parse_env("JOBSIFT_GRADUATION_CLASS", &v)?);
        }
        if let Some(v) = lookup("JOBSIFT_SCHEDULER_ENABLED") {
            self.scheduler.enabled = parse_flag(&v);
        }
        Ok(())
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        self.workspace_root.join(path)
    }

    pub fn sources_file(&self) -> PathBuf {
        self.resolve(&self.sources_path)
    }

    pub fn reports_root(&self) -> PathBuf {
        self.resolve(&self.reports_dir)
    }

    pub fn snapshots_root(&self) -> PathBuf {
        self.resolve(&self.snapshots_dir)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    /// Checks every cross-field constraint. Runs once, before any stage.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scoring.weights.validate()?;

        let threshold = self.dedup.semantic_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::new(
                "dedup.semantic_threshold",
                format!("must be within [0, 1], got {threshold}"),
            ));
        }
        if !(0.0..=1.0).contains(&self.semantic.lexical_threshold) {
            return Err(ConfigError::new("semantic.lexical_threshold", "must be within [0, 1]"));
        }

        for (field, value) in [
            ("collect.concurrency", self.collect.concurrency),
            ("dedup.concurrency", self.dedup.concurrency),
            ("extract.concurrency", self.extract.concurrency),
        ] {
            if value == 0 {
                return Err(ConfigError::new(field, "concurrency limit must be at least 1"));
            }
        }

        for (field, value) in [
            ("filter.min_salary", self.filter.min_salary),
            ("filter.max_experience_years", self.filter.max_experience_years),
            ("scoring.min_salary", self.scoring.min_salary),
            ("scoring.user_experience_years", self.scoring.user_experience_years),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::new(field, format!("must be a non-negative number, got {value}")));
            }
        }
        if !self.scoring.salary_excellent_multiple.is_finite() || self.scoring.salary_excellent_multiple <= 0.5 {
            return Err(ConfigError::new(
                "scoring.salary_excellent_multiple",
                "must be greater than 0.5",
            ));
        }
        if !self.scoring.min_score_to_store.is_finite() {
            return Err(ConfigError::new("scoring.min_score_to_store", "must be a finite number"));
        }

        if self.storage.backend == StorageBackend::Postgres
            && self.stages.store
            && self.storage.database_url.as_deref().map_or(true, |u| u.trim().is_empty())
        {
            return Err(ConfigError::new(
                "storage.database_url",
                "the postgres backend needs DATABASE_URL",
            ));
        }

        if self.scheduler.enabled {
            if self.scheduler.crons.is_empty() {
                return Err(ConfigError::new("scheduler.crons", "no cron expressions configured"));
            }
            if let Some(bad) = self.scheduler.crons.iter().find(|c| !is_valid_cron(c)) {
                return Err(ConfigError::new("scheduler.crons", format!("malformed cron expression {bad:?}")));
            }
        }
        Ok(())
    }
}

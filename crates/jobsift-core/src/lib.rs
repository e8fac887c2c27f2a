//! Core domain model for jobsift: job records, fingerprints, filter results and run statistics.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod text;

pub const CRATE_NAME: &str = "jobsift-core";

/// Monthly salary range in the posting's currency units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct SalaryRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl SalaryRange {
    pub fn new(min: f64, max: f64) -> Self {
        let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
        Self {
            min: Some(lo),
            max: Some(hi),
        }
    }

    pub fn single(value: f64) -> Self {
        Self {
            min: Some(value),
            max: Some(value),
        }
    }

    /// Upper bound when known, otherwise the lower bound.
    pub fn upper(&self) -> Option<f64> {
        self.max.or(self.min)
    }

    pub fn midpoint(&self) -> Option<f64> {
        match (self.min, self.max) {
            (Some(lo), Some(hi)) => Some((lo + hi) / 2.0),
            (Some(v), None) | (None, Some(v)) => Some(v),
            (None, None) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Seniority {
    Intern,
    Junior,
    Mid,
    Senior,
    Lead,
    Principal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompanySize {
    Startup,
    Small,
    Medium,
    Large,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GraduationMatch {
    Eligible,
    Ineligible,
    #[default]
    Unknown,
}

/// Attributes produced by the extraction collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExtractedAttributes {
    #[serde(default)]
    pub graduation_match: GraduationMatch,
    #[serde(default)]
    pub key_requirements: Vec<String>,
    #[serde(default)]
    pub seniority: Option<Seniority>,
    #[serde(default)]
    pub min_experience_years: Option<f64>,
    #[serde(default)]
    pub max_experience_years: Option<f64>,
    #[serde(default)]
    pub company_size: Option<CompanySize>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub extractor: String,
}

/// Extraction state of a record. Absence of LLM-derived data is a variant, not a null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Extraction {
    #[default]
    Pending,
    Complete { attributes: ExtractedAttributes },
    Incomplete { reason: String },
}

impl Extraction {
    pub fn attributes(&self) -> Option<&ExtractedAttributes> {
        match self {
            Extraction::Complete { attributes } => Some(attributes),
            _ => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Extraction::Complete { .. })
    }
}

/// A job posting as collected from a source, enriched in place by dedup merges and extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub source_url: String,
    pub source_platform: String,
    #[serde(default)]
    pub platform_job_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub salary: Option<SalaryRange>,
    #[serde(default)]
    pub salary_text: Option<String>,
    #[serde(default)]
    pub experience_text: Option<String>,
    #[serde(default)]
    pub education: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub posted_at: Option<NaiveDate>,
    #[serde(default)]
    pub deadline: Option<NaiveDate>,
    #[serde(default)]
    pub graduation_requirement: Option<String>,
    pub collected_at: DateTime<Utc>,
    /// Source URLs of duplicates merged into this record.
    #[serde(default)]
    pub merged_from: Vec<String>,
    #[serde(default)]
    pub extraction: Extraction,
}

impl JobRecord {
    pub fn new(
        source_url: impl Into<String>,
        source_platform: impl Into<String>,
        collected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source_url: source_url.into(),
            source_platform: source_platform.into(),
            platform_job_id: None,
            title: None,
            company: None,
            location: None,
            salary: None,
            salary_text: None,
            experience_text: None,
            education: None,
            description: None,
            posted_at: None,
            deadline: None,
            graduation_requirement: None,
            collected_at,
            merged_from: Vec::new(),
            extraction: Extraction::Pending,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = Some(company.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_salary(mut self, salary: SalaryRange) -> Self {
        self.salary = Some(salary);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_experience(mut self, experience_text: impl Into<String>) -> Self {
        self.experience_text = Some(experience_text.into());
        self
    }

    pub fn with_deadline(mut self, deadline: NaiveDate) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn attributes(&self) -> Option<&ExtractedAttributes> {
        self.extraction.attributes()
    }

    /// Structured salary, falling back to parsing the free-text salary.
    pub fn effective_salary(&self) -> Option<SalaryRange> {
        self.salary
            .filter(|s| !s.is_empty())
            .or_else(|| self.salary_text.as_deref().and_then(text::parse_salary_text))
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("untitled")
    }

    /// Number of populated descriptive fields; drives canonical selection in duplicate groups.
    pub fn populated_field_count(&self) -> usize {
        let text_fields = [
            &self.title,
            &self.company,
            &self.location,
            &self.salary_text,
            &self.experience_text,
            &self.education,
            &self.description,
            &self.graduation_requirement,
            &self.platform_job_id,
        ];
        let mut count = text_fields
            .iter()
            .filter(|f| f.as_deref().is_some_and(|v| !v.trim().is_empty()))
            .count();
        if self.salary.is_some_and(|s| !s.is_empty()) {
            count += 1;
        }
        if self.posted_at.is_some() {
            count += 1;
        }
        if self.deadline.is_some() {
            count += 1;
        }
        if self.extraction.is_complete() {
            count += 1;
        }
        count
    }

    /// Fill every empty field from `other`; populated fields are never overwritten.
    pub fn absorb(&mut self, other: &JobRecord) {
        fill_text(&mut self.platform_job_id, &other.platform_job_id);
        fill_text(&mut self.title, &other.title);
        fill_text(&mut self.company, &other.company);
        fill_text(&mut self.location, &other.location);
        fill_text(&mut self.salary_text, &other.salary_text);
        fill_text(&mut self.experience_text, &other.experience_text);
        fill_text(&mut self.education, &other.education);
        fill_text(&mut self.description, &other.description);
        fill_text(&mut self.graduation_requirement, &other.graduation_requirement);
        if self.salary.map_or(true, |s| s.is_empty()) {
            if let Some(salary) = other.salary.filter(|s| !s.is_empty()) {
                self.salary = Some(salary);
            }
        }
        if self.posted_at.is_none() {
            self.posted_at = other.posted_at;
        }
        if self.deadline.is_none() {
            self.deadline = other.deadline;
        }
        if !self.extraction.is_complete() && other.extraction.is_complete() {
            self.extraction = other.extraction.clone();
        }
        for url in std::iter::once(&other.source_url).chain(other.merged_from.iter()) {
            if url != &self.source_url && !self.merged_from.contains(url) {
                self.merged_from.push(url.clone());
            }
        }
    }
}

fn fill_text(target: &mut Option<String>, source: &Option<String>) {
    let empty = target.as_deref().map_or(true, |v| v.trim().is_empty());
    if empty {
        if let Some(value) = source.as_deref().filter(|v| !v.trim().is_empty()) {
            *target = Some(value.to_string());
        }
    }
}

/// Normalized (company, title, location) signature plus a content hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint {
    pub company: String,
    pub title: String,
    pub location: String,
    pub content_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    HighlyRecommended,
    Recommended,
    Average,
    NotRecommended,
}

impl Recommendation {
    pub const HIGHLY_RECOMMENDED_MIN: f64 = 85.0;
    pub const RECOMMENDED_MIN: f64 = 70.0;
    pub const AVERAGE_MIN: f64 = 60.0;

    /// Boundary values belong to the higher tier.
    pub fn from_score(score: f64) -> Self {
        if score >= Self::HIGHLY_RECOMMENDED_MIN {
            Recommendation::HighlyRecommended
        } else if score >= Self::RECOMMENDED_MIN {
            Recommendation::Recommended
        } else if score >= Self::AVERAGE_MIN {
            Recommendation::Average
        } else {
            Recommendation::NotRecommended
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::HighlyRecommended => "highly_recommended",
            Recommendation::Recommended => "recommended",
            Recommendation::Average => "average",
            Recommendation::NotRecommended => "not_recommended",
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    ExperienceMatch,
    SalaryCompetitiveness,
    CompanySize,
    KeywordRelevance,
}

impl Dimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::ExperienceMatch => "experience_match",
            Dimension::SalaryCompetitiveness => "salary_competitiveness",
            Dimension::CompanySize => "company_size",
            Dimension::KeywordRelevance => "keyword_relevance",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    pub dimension: Dimension,
    /// Sub-score in [0, 100] before weighting.
    pub raw: f64,
    pub weight: f64,
    pub contribution: f64,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ScoreBreakdown {
    pub dimensions: Vec<DimensionScore>,
}

impl ScoreBreakdown {
    pub fn weighted_sum(&self) -> f64 {
        self.dimensions.iter().map(|d| d.contribution).sum()
    }

    pub fn get(&self, dimension: Dimension) -> Option<&DimensionScore> {
        self.dimensions.iter().find(|d| d.dimension == dimension)
    }
}

/// Per-record outcome of the filter gate and scoring engine. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterResult {
    basic_passed: bool,
    score: f64,
    recommendation: Recommendation,
    reasons: Vec<String>,
    #[serde(default)]
    breakdown: Option<ScoreBreakdown>,
}

impl FilterResult {
    pub fn rejected(reasons: Vec<String>) -> Self {
        Self {
            basic_passed: false,
            score: 0.0,
            recommendation: Recommendation::NotRecommended,
            reasons,
            breakdown: None,
        }
    }

    /// Builds a passed result; the score is clamped to [0, 100] and NaN becomes 0.
    pub fn scored(score: f64, breakdown: ScoreBreakdown, reasons: Vec<String>) -> Self {
        let score = clamp_score(score);
        Self {
            basic_passed: true,
            score,
            recommendation: Recommendation::from_score(score),
            reasons,
            breakdown: Some(breakdown),
        }
    }

    /// Result attached when the filter stage is skipped.
    pub fn unscored() -> Self {
        Self {
            basic_passed: true,
            score: 0.0,
            recommendation: Recommendation::NotRecommended,
            reasons: vec!["unscored".to_string()],
            breakdown: None,
        }
    }

    pub fn basic_passed(&self) -> bool {
        self.basic_passed
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn recommendation(&self) -> Recommendation {
        self.recommendation
    }

    pub fn reasons(&self) -> &[String] {
        &self.reasons
    }

    pub fn breakdown(&self) -> Option<&ScoreBreakdown> {
        self.breakdown.as_ref()
    }
}

pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 100.0)
    }
}

/// A record paired with its filter outcome; the unit handed to storage writers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredJob {
    pub job: JobRecord,
    pub result: FilterResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SemanticStatus {
    #[default]
    Disabled,
    Unavailable,
    Completed,
}

/// Tier breakdown reported by the deduplication engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DedupStats {
    pub input: usize,
    pub url_duplicates: usize,
    pub content_duplicates: usize,
    pub semantic_duplicates: usize,
    /// Records dropped because an earlier run already persisted them (subset of the tier counters).
    pub prior_duplicates: usize,
    pub semantic_comparisons: usize,
    pub semantic_failures: usize,
    pub semantic_status: SemanticStatus,
    pub uniques: usize,
}

impl DedupStats {
    pub fn removed(&self) -> usize {
        self.url_duplicates + self.content_duplicates + self.semantic_duplicates
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Collect,
    Dedup,
    Extract,
    Filter,
    Store,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Collect,
        Stage::Dedup,
        Stage::Extract,
        Stage::Filter,
        Stage::Store,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Collect => "collect",
            Stage::Dedup => "dedup",
            Stage::Extract => "extract",
            Stage::Filter => "filter",
            Stage::Store => "store",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Partial { failed: usize },
    Skipped { reason: String },
    Failed { error: String },
}

impl StageStatus {
    pub fn skipped(reason: impl Into<String>) -> Self {
        StageStatus::Skipped {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Skipped { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: Stage,
    #[serde(flatten)]
    pub status: StageStatus,
    pub input: usize,
    pub output: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    PartialFailure,
    Failure,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunStatus::Success => "success",
            RunStatus::PartialFailure => "partial_failure",
            RunStatus::Failure => "failure",
        })
    }
}

/// Counters for one pipeline run. Owned by the orchestrator and reset per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_processed: usize,
    pub sources_ok: usize,
    pub sources_failed: usize,
    pub dedup: DedupStats,
    pub extracted: usize,
    pub extraction_incomplete: usize,
    pub basic_passed: usize,
    pub basic_rejected: usize,
    pub reject_reasons: BTreeMap<String, usize>,
    pub scored: usize,
    pub advanced_filtered: usize,
    pub recommendations: BTreeMap<Recommendation, usize>,
    pub written: usize,
    pub write_failed: usize,
    pub stages: Vec<StageReport>,
    pub fatal_error: Option<String>,
}

impl PipelineStats {
    pub fn new(run_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: None,
            total_processed: 0,
            sources_ok: 0,
            sources_failed: 0,
            dedup: DedupStats::default(),
            extracted: 0,
            extraction_incomplete: 0,
            basic_passed: 0,
            basic_rejected: 0,
            reject_reasons: BTreeMap::new(),
            scored: 0,
            advanced_filtered: 0,
            recommendations: BTreeMap::new(),
            written: 0,
            write_failed: 0,
            stages: Vec::new(),
            fatal_error: None,
        }
    }

    pub fn record_stage(&mut self, report: StageReport) {
        self.stages.push(report);
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|r| r.stage == stage)
    }

    pub fn dedup_rate(&self) -> f64 {
        ratio(self.dedup.removed(), self.dedup.input)
    }

    pub fn basic_pass_rate(&self) -> f64 {
        ratio(self.basic_passed, self.basic_passed + self.basic_rejected)
    }

    pub fn write_success_rate(&self) -> f64 {
        ratio(self.written, self.written + self.write_failed)
    }

    /// Share of processed records that reached the store.
    pub fn overall_pass_rate(&self) -> f64 {
        ratio(self.written, self.total_processed)
    }

    pub fn status(&self) -> RunStatus {
        if self.fatal_error.is_some() {
            RunStatus::Failure
        } else if self.stages.iter().all(|s| s.status.is_success()) {
            RunStatus::Success
        } else {
            RunStatus::PartialFailure
        }
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid configuration `{field}`: {message}")]
pub struct ConfigError {
    pub field: String,
    pub message: String,
}

impl ConfigError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Per-call failure of an external collaborator (LLM, prior-record lookup, extraction).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
    #[error("collaborator call timed out")]
    Timeout,
    #[error("collaborator call failed: {0}")]
    Failed(String),
    #[error("collaborator returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// Errors that stop a run before it produces a report.
///
/// Per-call collaborator failures travel as [`CollaboratorError`], records failing a
/// constraint as reject reasons, and isolated per-item failures as
/// [`StageStatus::Partial`]; none of them halt the run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    #[error(transparent)]
    Infrastructure(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).single().unwrap()
    }

    #[test]
    fn recommendation_boundaries_belong_to_higher_tier() {
        assert_eq!(Recommendation::from_score(85.0), Recommendation::HighlyRecommended);
        assert_eq!(Recommendation::from_score(84.999), Recommendation::Recommended);
        assert_eq!(Recommendation::from_score(70.0), Recommendation::Recommended);
        assert_eq!(Recommendation::from_score(69.99), Recommendation::Average);
        assert_eq!(Recommendation::from_score(60.0), Recommendation::Average);
        assert_eq!(Recommendation::from_score(59.9), Recommendation::NotRecommended);
        assert_eq!(Recommendation::from_score(f64::NAN), Recommendation::NotRecommended);
    }

    #[test]
    fn scored_result_is_clamped() {
        let high = FilterResult::scored(140.0, ScoreBreakdown::default(), vec![]);
        assert_eq!(high.score(), 100.0);
        assert_eq!(high.recommendation(), Recommendation::HighlyRecommended);
        let nan = FilterResult::scored(f64::NAN, ScoreBreakdown::default(), vec![]);
        assert_eq!(nan.score(), 0.0);
        assert!(nan.basic_passed());
    }

    #[test]
    fn absorb_fills_only_missing_fields() {
        let mut canonical = JobRecord::new("https://a/1", "board", ts(1))
            .with_title("Backend Engineer")
            .with_company("Acme");
        let other = JobRecord::new("https://a/2", "board", ts(2))
            .with_title("Backend Eng.")
            .with_location("Berlin")
            .with_salary(SalaryRange::new(30000.0, 40000.0));

        canonical.absorb(&other);
        assert_eq!(canonical.title.as_deref(), Some("Backend Engineer"));
        assert_eq!(canonical.location.as_deref(), Some("Berlin"));
        assert_eq!(canonical.salary, Some(SalaryRange::new(30000.0, 40000.0)));
        assert_eq!(canonical.merged_from, vec!["https://a/2".to_string()]);
    }

    #[test]
    fn populated_count_tracks_optional_fields() {
        let bare = JobRecord::new("u", "p", ts(1));
        assert_eq!(bare.populated_field_count(), 0);
        let rich = bare
            .clone()
            .with_title("t")
            .with_company("c")
            .with_salary(SalaryRange::single(1.0));
        assert_eq!(rich.populated_field_count(), 3);
    }

    #[test]
    fn status_distinguishes_partial_from_fatal() {
        let mut stats = PipelineStats::new(Uuid::nil(), ts(0));
        stats.record_stage(StageReport {
            stage: Stage::Collect,
            status: StageStatus::Completed,
            input: 0,
            output: 3,
            elapsed_ms: 1,
        });
        assert_eq!(stats.status(), RunStatus::Success);
        stats.record_stage(StageReport {
            stage: Stage::Extract,
            status: StageStatus::Partial { failed: 1 },
            input: 3,
            output: 3,
            elapsed_ms: 1,
        });
        assert_eq!(stats.status(), RunStatus::PartialFailure);
        stats.fatal_error = Some("storage unavailable".into());
        assert_eq!(stats.status(), RunStatus::Failure);
    }

    #[test]
    fn extraction_serializes_with_status_tag() {
        let value = serde_json::to_value(Extraction::Incomplete {
            reason: "timeout".into(),
        })
        .unwrap();
        assert_eq!(value["status"], "incomplete");
        let back: Extraction = serde_json::from_value(value).unwrap();
        assert!(!back.is_complete());
    }
}

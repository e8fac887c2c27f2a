//! Hard-constraint filter gate and weighted scoring engine.

use std::fmt;

use chrono::NaiveDate;
use jobsift_core::text::{extract_numbers, extract_years};
use jobsift_core::{GraduationMatch, JobRecord};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub mod scoring;

pub use scoring::{rank_by_score, CompanyTiers, ScoringConfig, ScoringEngine, ScoringWeights};

pub const CRATE_NAME: &str = "jobsift-filter";

/// Location fragments that satisfy any location constraint.
pub const REMOTE_KEYWORDS: &[&str] = &["remote", "远程", "work from home"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub location_keywords: Vec<String>,
    pub min_salary: f64,
    pub max_experience_years: f64,
    pub graduation_class: Option<i32>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            location_keywords: ["北京", "上海", "深圳", "杭州", "远程"]
                .into_iter()
                .map(String::from)
                .collect(),
            min_salary: 25_000.0,
            max_experience_years: 8.0,
            graduation_class: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    LocationMissing,
    LocationNotMatched,
    SalaryMissing,
    SalaryBelowMinimum,
    ExperienceUnparseable,
    ExperienceAboveCeiling,
    GraduationMismatch,
    DeadlinePassed,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::LocationMissing => "location_missing",
            RejectReason::LocationNotMatched => "location_not_matched",
            RejectReason::SalaryMissing => "salary_missing",
            RejectReason::SalaryBelowMinimum => "salary_below_minimum",
            RejectReason::ExperienceUnparseable => "experience_unparseable",
            RejectReason::ExperienceAboveCeiling => "experience_above_ceiling",
            RejectReason::GraduationMismatch => "graduation_mismatch",
            RejectReason::DeadlinePassed => "deadline_passed",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RejectedJob {
    pub job: JobRecord,
    pub reasons: Vec<RejectReason>,
}

#[derive(Debug, Clone, Default)]
pub struct BasicFilterOutcome {
    pub passed: Vec<JobRecord>,
    pub rejected: Vec<RejectedJob>,
}

/// Years of experience a posting asks for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExperienceRequirement {
    FreshGraduate,
    Unlimited,
    AtLeast(f64),
    Range { min: f64, max: f64 },
}

impl ExperienceRequirement {
    pub fn min_years(&self) -> f64 {
        match self {
            ExperienceRequirement::FreshGraduate | ExperienceRequirement::Unlimited => 0.0,
            ExperienceRequirement::AtLeast(min) => *min,
            ExperienceRequirement::Range { min, .. } => *min,
        }
    }
}

const FRESH_GRADUATE_MARKERS: &[&str] = &[
    "应届",
    "实习",
    "校招",
    "毕业生",
    "fresh graduate",
    "new grad",
    "entry level",
    "entry-level",
    "internship",
];
const UNLIMITED_MARKERS: &[&str] = &["不限", "无要求", "no experience required", "any experience"];
const AT_LEAST_MARKERS: &[&str] = &["+", "以上", "at least", "minimum", "or more"];
const AT_MOST_MARKERS: &[&str] = &["以下", "以内", "up to", "less than", "under"];

/// Parses free-text experience requirements (`3-5年`, `5年以上`, `3+ years`, `经验不限`).
/// A bare figure such as `3年` is read as `2.5..=3.5` years.
pub fn parse_experience(text: &str) -> Option<ExperienceRequirement> {
    let lower = text.to_lowercase();
    if FRESH_GRADUATE_MARKERS.iter().any(|m| lower.contains(m)) {
        return Some(ExperienceRequirement::FreshGraduate);
    }
    if UNLIMITED_MARKERS.iter().any(|m| lower.contains(m)) {
        return Some(ExperienceRequirement::Unlimited);
    }
    let numbers = extract_numbers(&lower);
    match numbers[..] {
        [] => None,
        [a, b, ..] => Some(ExperienceRequirement::Range {
            min: a.min(b),
            max: a.max(b),
        }),
        [n] if AT_LEAST_MARKERS.iter().any(|m| lower.contains(m)) => Some(ExperienceRequirement::AtLeast(n)),
        [n] if AT_MOST_MARKERS.iter().any(|m| lower.contains(m)) => {
            Some(ExperienceRequirement::Range { min: 0.0, max: n })
        }
        [n] => Some(ExperienceRequirement::Range {
            min: (n - 0.5).max(0.0),
            max: n + 0.5,
        }),
    }
}

/// Experience requirement of a posting, as far as it can be determined.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExperienceLookup {
    NotStated,
    Unparseable,
    Stated(ExperienceRequirement),
}

/// Requirement from extracted attributes when present, otherwise parsed from the posting text.
pub fn experience_requirement(job: &JobRecord) -> ExperienceLookup {
    if let Some(attrs) = job.attributes() {
        let stated = match (attrs.min_experience_years, attrs.max_experience_years) {
            (Some(min), Some(max)) if min <= 0.0 && max <= 1.0 => Some(ExperienceRequirement::FreshGraduate),
            (Some(min), Some(max)) => Some(ExperienceRequirement::Range {
                min: min.min(max),
                max: min.max(max),
            }),
            (Some(min), None) => Some(ExperienceRequirement::AtLeast(min)),
            (None, Some(max)) => Some(ExperienceRequirement::Range { min: 0.0, max }),
            (None, None) => None,
        };
        if let Some(req) = stated {
            return ExperienceLookup::Stated(req);
        }
    }
    match job.experience_text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        None => ExperienceLookup::NotStated,
        Some(text) => parse_experience(text).map_or(ExperienceLookup::Unparseable, ExperienceLookup::Stated),
    }
}

#[derive(Debug, Clone)]
pub struct FilterGate {
    config: FilterConfig,
}

impl FilterGate {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Every constraint is checked; the verdict is the AND of all of them.
    pub fn apply_basic_filters(&self, jobs: Vec<JobRecord>, as_of: NaiveDate) -> BasicFilterOutcome {
        let mut outcome = BasicFilterOutcome::default();
        for job in jobs {
            let reasons = self.evaluate(&job, as_of);
            if reasons.is_empty() {
                outcome.passed.push(job);
            } else {
                debug!(url = %job.source_url, ?reasons, "basic filter rejected record");
                outcome.rejected.push(RejectedJob { job, reasons });
            }
        }
        outcome
    }

    /// Failing constraints for `job`, in a fixed order. Empty means the record passes.
    pub fn evaluate(&self, job: &JobRecord, as_of: NaiveDate) -> Vec<RejectReason> {
        let mut reasons = Vec::new();
        if let Some(reason) = self.check_location(job) {
            reasons.push(reason);
        }
        if let Some(reason) = self.check_salary(job) {
            reasons.push(reason);
        }
        if let Some(reason) = self.check_experience(job) {
            reasons.push(reason);
        }
        if self.graduation_mismatch(job) {
            reasons.push(RejectReason::GraduationMismatch);
        }
        if job.deadline.is_some_and(|deadline| deadline < as_of) {
            reasons.push(RejectReason::DeadlinePassed);
        }
        reasons
    }

    fn check_location(&self, job: &JobRecord) -> Option<RejectReason> {
        if self.config.location_keywords.is_empty() {
            return None;
        }
        let Some(location) = job.location.as_deref().map(str::trim).filter(|l| !l.is_empty()) else {
            return Some(RejectReason::LocationMissing);
        };
        let location = location.to_lowercase();
        let matched = REMOTE_KEYWORDS.iter().any(|k| location.contains(k))
            || self
                .config
                .location_keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .any(|k| !k.is_empty() && location.contains(&k));
        (!matched).then_some(RejectReason::LocationNotMatched)
    }

    fn check_salary(&self, job: &JobRecord) -> Option<RejectReason> {
        if self.config.min_salary <= 0.0 {
            return None;
        }
        match job.effective_salary().and_then(|s| s.upper()) {
            None => Some(RejectReason::SalaryMissing),
            Some(upper) if upper < self.config.min_salary => Some(RejectReason::SalaryBelowMinimum),
            Some(_) => None,
        }
    }

    fn check_experience(&self, job: &JobRecord) -> Option<RejectReason> {
        match experience_requirement(job) {
            ExperienceLookup::Unparseable => Some(RejectReason::ExperienceUnparseable),
            ExperienceLookup::Stated(req) if req.min_years() > self.config.max_experience_years => {
                Some(RejectReason::ExperienceAboveCeiling)
            }
            _ => None,
        }
    }

    fn graduation_mismatch(&self, job: &JobRecord) -> bool {
        if job
            .attributes()
            .is_some_and(|a| a.graduation_match == GraduationMatch::Ineligible)
        {
            return true;
        }
        let (Some(class), Some(requirement)) = (self.config.graduation_class, job.graduation_requirement.as_deref())
        else {
            return false;
        };
        let years = extract_years(requirement);
        !years.is_empty() && !years.contains(&class)
    }
}

//! Weighted multi-criteria scoring over records that passed the filter gate.

use jobsift_core::{
    clamp_score, CompanySize, ConfigError, Dimension, DimensionScore, FilterResult, JobRecord, ScoreBreakdown,
    ScoredJob,
};
use serde::{Deserialize, Serialize};

use crate::{experience_requirement, ExperienceLookup, ExperienceRequirement};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub experience: f64,
    pub salary: f64,
    pub company: f64,
    pub keywords: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            experience: 0.30,
            salary: 0.25,
            company: 0.20,
            keywords: 0.25,
        }
    }
}

impl ScoringWeights {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let all = [self.experience, self.salary, self.company, self.keywords];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ConfigError::new("scoring.weights", "weights must be finite and non-negative"));
        }
        let sum: f64 = all.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(ConfigError::new(
                "scoring.weights",
                format!("weights must sum to 1.0, got {sum}"),
            ));
        }
        Ok(())
    }
}

/// Company names (case-insensitive substrings) grouped by reputation tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CompanyTiers {
    pub tier1: Vec<String>,
    pub tier2: Vec<String>,
    pub tier3: Vec<String>,
}

const LARGE_ENTITY_MARKERS: &[&str] = &["group", "holdings", "集团", "股份"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: ScoringWeights,
    pub user_experience_years: f64,
    pub min_salary: f64,
    /// Offered/minimum salary ratio that earns a full salary score.
    pub salary_excellent_multiple: f64,
    pub company_tiers: CompanyTiers,
    pub required_keywords: Vec<String>,
    pub min_score_to_store: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            user_experience_years: 3.0,
            min_salary: 25_000.0,
            salary_excellent_multiple: 1.5,
            company_tiers: CompanyTiers::default(),
            required_keywords: ["大模型", "LLM", "机器学习", "深度学习", "AI"]
                .into_iter()
                .map(String::from)
                .collect(),
            min_score_to_store: 0.0,
        }
    }
}

/// Stateless; never mutates the records it scores.
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    config: ScoringConfig,
}

impl ScoringEngine {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Weighted sum of the four sub-scores, clamped to [0, 100].
    pub fn score(&self, job: &JobRecord) -> (f64, ScoreBreakdown) {
        let weights = self.config.weights;
        let (experience, experience_note) = self.experience_score(job);
        let (salary, salary_note) = self.salary_score(job);
        let (company, company_note) = self.company_score(job);
        let (keywords, keywords_note) = self.keyword_score(job);
        let dimensions = vec![
            dimension(Dimension::ExperienceMatch, experience, weights.experience, experience_note),
            dimension(Dimension::SalaryCompetitiveness, salary, weights.salary, salary_note),
            dimension(Dimension::CompanySize, company, weights.company, company_note),
            dimension(Dimension::KeywordRelevance, keywords, weights.keywords, keywords_note),
        ];
        let breakdown = ScoreBreakdown { dimensions };
        (clamp_score(breakdown.weighted_sum()), breakdown)
    }

    /// Scores a record and wraps the result with one explanation line per dimension.
    pub fn evaluate(&self, job: JobRecord) -> ScoredJob {
        let (score, breakdown) = self.score(&job);
        let reasons = breakdown
            .dimensions
            .iter()
            .map(|d| {
                format!(
                    "{}: {:.1} x {:.2} = {:.2}",
                    d.dimension.as_str(),
                    d.raw,
                    d.weight,
                    d.contribution
                )
            })
            .collect();
        ScoredJob {
            job,
            result: FilterResult::scored(score, breakdown, reasons),
        }
    }

    fn experience_score(&self, job: &JobRecord) -> (f64, String) {
        let user = self.config.user_experience_years;
        let requirement = match experience_requirement(job) {
            ExperienceLookup::Stated(req) => req,
            _ => return (70.0, "no stated requirement".to_string()),
        };
        let score = match requirement {
            ExperienceRequirement::FreshGraduate => {
                if user <= 2.0 {
                    90.0
                } else {
                    50.0
                }
            }
            ExperienceRequirement::Unlimited => 80.0,
            ExperienceRequirement::AtLeast(min) => {
                if user >= min && user <= min + 2.0 {
                    100.0
                } else if user > min + 2.0 {
                    80.0
                } else {
                    shortfall_score(min - user)
                }
            }
            ExperienceRequirement::Range { min, max } => {
                if user >= min && user <= max {
                    100.0
                } else if user > max {
                    80.0
                } else {
                    shortfall_score(min - user)
                }
            }
        };
        (score, format!("{requirement:?} vs {user}y"))
    }

    fn salary_score(&self, job: &JobRecord) -> (f64, String) {
        let Some(offered) = job.effective_salary().and_then(|s| s.midpoint()) else {
            return (50.0, "salary not stated".to_string());
        };
        let minimum = self.config.min_salary;
        if minimum <= 0.0 {
            return (100.0, format!("offered {offered:.0}, no minimum"));
        }
        let ratio = offered / minimum;
        let span = (self.config.salary_excellent_multiple - 0.5).max(f64::EPSILON);
        let score = clamp_score(100.0 * (ratio - 0.5) / span);
        (score, format!("offered {offered:.0} = {ratio:.2}x minimum"))
    }

    fn company_score(&self, job: &JobRecord) -> (f64, String) {
        let Some(name) = job.company.as_deref().map(str::trim).filter(|c| !c.is_empty()) else {
            return (30.0, "company unknown".to_string());
        };
        let lower = name.to_lowercase();
        let tiers = &self.config.company_tiers;
        for (list, score, label) in [
            (&tiers.tier1, 100.0, "tier1"),
            (&tiers.tier2, 90.0, "tier2"),
            (&tiers.tier3, 80.0, "tier3"),
        ] {
            if list
                .iter()
                .map(|c| c.trim().to_lowercase())
                .any(|c| !c.is_empty() && lower.contains(&c))
            {
                return (score, label.to_string());
            }
        }
        if let Some(size) = job.attributes().and_then(|a| a.company_size) {
            let score = match size {
                CompanySize::Large => 70.0,
                CompanySize::Medium => 55.0,
                CompanySize::Small => 40.0,
                CompanySize::Startup => 35.0,
            };
            return (score, format!("{size:?}").to_lowercase());
        }
        if LARGE_ENTITY_MARKERS.iter().any(|m| lower.contains(m)) {
            return (50.0, "large entity marker".to_string());
        }
        (30.0, "unrated".to_string())
    }

    fn keyword_score(&self, job: &JobRecord) -> (f64, String) {
        let required: Vec<String> = self
            .config
            .required_keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        if required.is_empty() {
            return (50.0, "no required keywords".to_string());
        }
        let mut haystack = String::new();
        for part in [job.title.as_deref(), job.description.as_deref()].into_iter().flatten() {
            haystack.push_str(part);
            haystack.push('\n');
        }
        if let Some(attrs) = job.attributes() {
            for part in attrs.key_requirements.iter().chain(attrs.keywords.iter()) {
                haystack.push_str(part);
                haystack.push('\n');
            }
        }
        let haystack = haystack.to_lowercase();
        let matched: Vec<&str> = required
            .iter()
            .filter(|k| haystack.contains(k.as_str()))
            .map(String::as_str)
            .collect();
        let score = 100.0 * matched.len() as f64 / required.len() as f64;
        (score, format!("matched {}/{}: {}", matched.len(), required.len(), matched.join(", ")))
    }
}

fn shortfall_score(gap: f64) -> f64 {
    if gap <= 1.0 {
        60.0
    } else {
        20.0
    }
}

fn dimension(dimension: Dimension, raw: f64, weight: f64, note: String) -> DimensionScore {
    let raw = clamp_score(raw);
    DimensionScore {
        dimension,
        raw,
        weight,
        contribution: raw * weight,
        note,
    }
}

/// Drops records below `min_score` and orders the rest by score, highest first.
/// Equal scores keep their incoming order. Returns the survivors and the dropped count.
pub fn rank_by_score(mut scored: Vec<ScoredJob>, min_score: f64) -> (Vec<ScoredJob>, usize) {
    let before = scored.len();
    scored.retain(|s| s.result.score() >= min_score);
    let dropped = before - scored.len();
    scored.sort_by(|a, b| b.result.score().total_cmp(&a.result.score()));
    (scored, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use jobsift_core::{ExtractedAttributes, Extraction, Recommendation, SalaryRange};

    fn epoch() -> DateTime<Utc> {
        Utc.timestamp_opt(0, 0).unwrap()
    }

    fn engine() -> ScoringEngine {
        ScoringEngine::new(ScoringConfig {
            user_experience_years: 3.0,
            min_salary: 20_000.0,
            required_keywords: vec!["rust".into(), "tokio".into()],
            company_tiers: CompanyTiers {
                tier1: vec!["Hooli".into()],
                ..CompanyTiers::default()
            },
            ..ScoringConfig::default()
        })
    }

    fn mk_job() -> JobRecord {
        JobRecord::new("https://jobs.example/9", "board", epoch())
            .with_title("Rust Engineer")
            .with_company("Hooli")
            .with_description("async services on tokio")
            .with_experience("2-4 years")
            .with_salary(SalaryRange::new(25_000.0, 35_000.0))
    }

    #[test]
    fn perfect_match_scores_full_marks() {
        let (score, breakdown) = engine().score(&mk_job());
        assert_eq!(breakdown.get(Dimension::ExperienceMatch).unwrap().raw, 100.0);
        // midpoint 30k is 1.5x the 20k minimum
        assert_eq!(breakdown.get(Dimension::SalaryCompetitiveness).unwrap().raw, 100.0);
        assert_eq!(breakdown.get(Dimension::CompanySize).unwrap().raw, 100.0);
        assert_eq!(breakdown.get(Dimension::KeywordRelevance).unwrap().raw, 100.0);
        assert!((score - 100.0).abs() < 1e-9);
    }

    #[test]
    fn missing_data_uses_neutral_defaults() {
        let bare = JobRecord::new("u", "p", epoch());
        let (score, breakdown) = engine().score(&bare);
        assert_eq!(breakdown.get(Dimension::ExperienceMatch).unwrap().raw, 70.0);
        assert_eq!(breakdown.get(Dimension::SalaryCompetitiveness).unwrap().raw, 50.0);
        assert_eq!(breakdown.get(Dimension::CompanySize).unwrap().raw, 30.0);
        assert_eq!(breakdown.get(Dimension::KeywordRelevance).unwrap().raw, 0.0);
        let expected = 70.0 * 0.30 + 50.0 * 0.25 + 30.0 * 0.20;
        assert!((score - expected).abs() < 1e-9);
    }

    #[test]
    fn experience_shortfall_and_overqualification() {
        let e = engine();
        let short = mk_job().with_experience("4年以上");
        assert_eq!(e.score(&short).1.get(Dimension::ExperienceMatch).unwrap().raw, 60.0);
        let far = mk_job().with_experience("8-10年");
        assert_eq!(e.score(&far).1.get(Dimension::ExperienceMatch).unwrap().raw, 20.0);
        let over = mk_job().with_experience("0-1 years");
        assert_eq!(e.score(&over).1.get(Dimension::ExperienceMatch).unwrap().raw, 80.0);
        let grad = mk_job().with_experience("应届生");
        assert_eq!(e.score(&grad).1.get(Dimension::ExperienceMatch).unwrap().raw, 50.0);
    }

    #[test]
    fn company_size_falls_back_to_extraction_then_markers() {
        let e = engine();
        let mut job = mk_job().with_company("Initrode");
        job.extraction = Extraction::Complete {
            attributes: ExtractedAttributes {
                company_size: Some(CompanySize::Medium),
                ..ExtractedAttributes::default()
            },
        };
        assert_eq!(e.score(&job).1.get(Dimension::CompanySize).unwrap().raw, 55.0);
        let group = mk_job().with_company("Globex Group");
        assert_eq!(e.score(&group).1.get(Dimension::CompanySize).unwrap().raw, 50.0);
    }

    #[test]
    fn evaluate_explains_each_dimension() {
        let scored = engine().evaluate(mk_job());
        assert_eq!(scored.result.reasons().len(), 4);
        assert_eq!(scored.result.reasons()[0], "experience_match: 100.0 x 0.30 = 30.00");
        assert_eq!(scored.result.recommendation(), Recommendation::HighlyRecommended);
    }

    #[test]
    fn weights_must_sum_to_one() {
        assert!(ScoringWeights::default().validate().is_ok());
        let bad = ScoringWeights {
            experience: 0.5,
            ..ScoringWeights::default()
        };
        assert!(bad.validate().is_err());
        let negative = ScoringWeights {
            experience: -0.1,
            salary: 0.65,
            ..ScoringWeights::default()
        };
        assert!(negative.validate().is_err());
    }

    #[test]
    fn rank_is_stable_and_drops_low_scores() {
        let e = engine();
        let strong = e.evaluate(mk_job());
        let weak_a = e.evaluate(JobRecord::new("a", "p", epoch()));
        let weak_b = e.evaluate(JobRecord::new("b", "p", epoch()));
        let (ranked, dropped) = rank_by_score(vec![weak_a, strong, weak_b], 0.0);
        assert_eq!(dropped, 0);
        let urls: Vec<&str> = ranked.iter().map(|s| s.job.source_url.as_str()).collect();
        assert_eq!(urls, vec!["https://jobs.example/9", "a", "b"]);

        let (kept, dropped) = rank_by_score(ranked, 60.0);
        assert_eq!(kept.len(), 1);
        assert_eq!(dropped, 2);
    }
}

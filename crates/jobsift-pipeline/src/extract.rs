//! Attribute extraction collaborators and the bounded-concurrency driver for the extract stage.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use jobsift_core::text::{collapse_whitespace, extract_years};
use jobsift_core::{
    CollaboratorError, CompanySize, ExtractedAttributes, Extraction, GraduationMatch, JobRecord, Seniority,
};
use jobsift_filter::{parse_experience, ExperienceRequirement};
use serde::Deserialize;
use tokio::time::Instant;
use tracing::warn;

use crate::llm::{describe_job, parse_json_reply, LlmClient, LlmError};

const MAX_KEY_REQUIREMENTS: usize = 5;

#[async_trait]
pub trait AttributeExtractor: Send + Sync {
    fn name(&self) -> &str;

    async fn extract(&self, job: &JobRecord) -> Result<ExtractedAttributes, CollaboratorError>;
}

fn contains_token(haystack: &str, token: &str) -> bool {
    haystack
        .split(|c: char| !c.is_alphanumeric())
        .any(|t| t == token)
}

pub fn seniority_from_title(title: &str) -> Option<Seniority> {
    let lower = title.to_lowercase();
    let any = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));
    if any(&["实习", "internship"]) || contains_token(&lower, "intern") {
        Some(Seniority::Intern)
    } else if any(&["principal", "首席"]) {
        Some(Seniority::Principal)
    } else if any(&["lead", "staff", "负责人", "主管", "专家"]) {
        Some(Seniority::Lead)
    } else if any(&["senior", "高级", "资深"]) || contains_token(&lower, "sr") {
        Some(Seniority::Senior)
    } else if any(&["junior", "初级", "助理"]) || contains_token(&lower, "jr") {
        Some(Seniority::Junior)
    } else {
        None
    }
}

fn seniority_from_experience(req: &ExperienceRequirement) -> Option<Seniority> {
    match req {
        ExperienceRequirement::FreshGraduate => Some(Seniority::Junior),
        ExperienceRequirement::Unlimited => None,
        other if other.min_years() >= 5.0 => Some(Seniority::Senior),
        other if other.min_years() < 1.0 => Some(Seniority::Junior),
        _ => Some(Seniority::Mid),
    }
}

fn experience_bounds(req: &ExperienceRequirement) -> (Option<f64>, Option<f64>) {
    match *req {
        ExperienceRequirement::FreshGraduate => (Some(0.0), Some(0.0)),
        ExperienceRequirement::Unlimited => (None, None),
        ExperienceRequirement::AtLeast(min) => (Some(min), None),
        ExperienceRequirement::Range { min, max } => (Some(min), Some(max)),
    }
}

pub fn company_size_hint(text: &str) -> Option<CompanySize> {
    let lower = text.to_lowercase();
    let any = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));
    if any(&["初创", "startup", "start-up", "天使轮"]) {
        Some(CompanySize::Startup)
    } else if any(&["上市", "集团", "500强", "fortune 500", "group", "holdings", "d轮"]) {
        Some(CompanySize::Large)
    } else if any(&["b轮", "c轮", "series b", "series c"]) {
        Some(CompanySize::Medium)
    } else if any(&["a轮", "series a"]) {
        Some(CompanySize::Small)
    } else {
        None
    }
}

const REQUIREMENT_MARKERS: &[&str] = &[
    "要求",
    "熟悉",
    "精通",
    "掌握",
    "具备",
    "经验",
    "experience",
    "proficient",
    "familiar",
    "required",
    "must",
];

pub fn key_requirement_lines(description: &str) -> Vec<String> {
    description
        .split(['。', '；', ';', '\n', '!', '！'])
        .map(collapse_whitespace)
        .filter(|line| {
            let lower = line.to_lowercase();
            !line.is_empty() && REQUIREMENT_MARKERS.iter().any(|m| lower.contains(m))
        })
        .take(MAX_KEY_REQUIREMENTS)
        .collect()
}

pub fn graduation_verdict(requirement: Option<&str>, graduation_class: Option<i32>) -> GraduationMatch {
    let (Some(requirement), Some(class)) = (requirement, graduation_class) else {
        return GraduationMatch::Unknown;
    };
    let years = extract_years(requirement);
    if years.is_empty() {
        GraduationMatch::Unknown
    } else if years.contains(&class) {
        GraduationMatch::Eligible
    } else {
        GraduationMatch::Ineligible
    }
}

/// Deterministic extraction from the posting's own text.
#[derive(Debug, Clone, Default)]
pub struct RuleExtractor {
    graduation_class: Option<i32>,
    keywords: Vec<String>,
}

impl RuleExtractor {
    pub fn new(graduation_class: Option<i32>, keywords: Vec<String>) -> Self {
        Self {
            graduation_class,
            keywords,
        }
    }

    pub fn extract_now(&self, job: &JobRecord) -> ExtractedAttributes {
        let title = job.title.as_deref().unwrap_or_default();
        let description = job.description.as_deref().unwrap_or_default();
        let requirement = job.experience_text.as_deref().and_then(parse_experience);
        let (min_experience_years, max_experience_years) =
            requirement.as_ref().map(experience_bounds).unwrap_or((None, None));

        let haystack = format!("{title} {description}").to_lowercase();
        let keywords = self
            .keywords
            .iter()
            .filter(|k| !k.trim().is_empty() && haystack.contains(&k.trim().to_lowercase()))
            .cloned()
            .collect();

        let size_text = format!("{} {description}", job.company.as_deref().unwrap_or_default());

        ExtractedAttributes {
            graduation_match: graduation_verdict(job.graduation_requirement.as_deref(), self.graduation_class),
            key_requirements: key_requirement_lines(description),
            seniority: seniority_from_title(title).or_else(|| requirement.as_ref().and_then(seniority_from_experience)),
            min_experience_years,
            max_experience_years,
            company_size: company_size_hint(&size_text),
            keywords,
            extractor: "rules".into(),
        }
    }
}

#[async_trait]
impl AttributeExtractor for RuleExtractor {
    fn name(&self) -> &str {
        "rules"
    }

    async fn extract(&self, job: &JobRecord) -> Result<ExtractedAttributes, CollaboratorError> {
        Ok(self.extract_now(job))
    }
}

pub const EXTRACTION_SYSTEM_PROMPT: &str = "You extract structured attributes from a job posting. \
Reply with JSON only, using these keys: seniority (intern|junior|mid|senior|lead|principal|null), \
min_experience_years (number|null), max_experience_years (number|null), \
company_size (startup|small|medium|large|null), key_requirements (array of short strings), \
keywords (array of technology keywords), graduation_years (array of graduation class years, may be empty).";

pub fn extraction_prompt(job: &JobRecord) -> String {
    format!(
        "{}\ngraduation requirement: {}\n\nExtract the attributes.",
        describe_job(job),
        job.graduation_requirement.as_deref().unwrap_or("-")
    )
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LlmAttributes {
    seniority: Option<String>,
    min_experience_years: Option<f64>,
    max_experience_years: Option<f64>,
    company_size: Option<String>,
    key_requirements: Vec<String>,
    keywords: Vec<String>,
    graduation_years: Vec<i32>,
}

fn parse_seniority(value: &str) -> Option<Seniority> {
    match value.trim().to_lowercase().as_str() {
        "intern" => Some(Seniority::Intern),
        "junior" => Some(Seniority::Junior),
        "mid" | "middle" => Some(Seniority::Mid),
        "senior" => Some(Seniority::Senior),
        "lead" | "staff" => Some(Seniority::Lead),
        "principal" => Some(Seniority::Principal),
        _ => None,
    }
}

fn parse_company_size(value: &str) -> Option<CompanySize> {
    match value.trim().to_lowercase().as_str() {
        "startup" => Some(CompanySize::Startup),
        "small" => Some(CompanySize::Small),
        "medium" => Some(CompanySize::Medium),
        "large" => Some(CompanySize::Large),
        _ => None,
    }
}

fn non_negative(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v >= 0.0)
}

pub fn parse_attributes_reply(text: &str, graduation_class: Option<i32>) -> Result<ExtractedAttributes, LlmError> {
    let reply: LlmAttributes = parse_json_reply(text)?;
    let graduation_match = match graduation_class {
        Some(class) if !reply.graduation_years.is_empty() => {
            if reply.graduation_years.contains(&class) {
                GraduationMatch::Eligible
            } else {
                GraduationMatch::Ineligible
            }
        }
        _ => GraduationMatch::Unknown,
    };
    let clean = |items: Vec<String>| -> Vec<String> {
        items
            .into_iter()
            .map(|s| collapse_whitespace(&s))
            .filter(|s| !s.is_empty())
            .collect()
    };
    Ok(ExtractedAttributes {
        graduation_match,
        key_requirements: clean(reply.key_requirements),
        seniority: reply.seniority.as_deref().and_then(parse_seniority),
        min_experience_years: non_negative(reply.min_experience_years),
        max_experience_years: non_negative(reply.max_experience_years),
        company_size: reply.company_size.as_deref().and_then(parse_company_size),
        keywords: clean(reply.keywords),
        extractor: "llm".into(),
    })
}

/// Chat-completion extraction. Unavailable without a client.
#[derive(Debug, Clone, Default)]
pub struct LlmExtractor {
    client: Option<Arc<LlmClient>>,
    graduation_class: Option<i32>,
}

impl LlmExtractor {
    pub fn new(client: Option<Arc<LlmClient>>, graduation_class: Option<i32>) -> Self {
        Self {
            client,
            graduation_class,
        }
    }
}

#[async_trait]
impl AttributeExtractor for LlmExtractor {
    fn name(&self) -> &str {
        "llm"
    }

    async fn extract(&self, job: &JobRecord) -> Result<ExtractedAttributes, CollaboratorError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| CollaboratorError::Unavailable("no llm api key configured".into()))?;
        let reply = client.chat(EXTRACTION_SYSTEM_PROMPT, &extraction_prompt(job)).await?;
        Ok(parse_attributes_reply(&reply, self.graduation_class)?)
    }
}

#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub records: Vec<JobRecord>,
    pub completed: usize,
    pub incomplete: usize,
}

/// Runs `extractor` over every record with at most `concurrency` calls in flight.
/// Failed or timed-out records keep their data and are marked [`Extraction::Incomplete`].
/// Output order equals input order.
pub async fn extract_all(
    extractor: &dyn AttributeExtractor,
    records: Vec<JobRecord>,
    concurrency: usize,
    call_timeout: Duration,
    deadline: Option<Instant>,
) -> ExtractionOutcome {
    let mut results = futures::stream::iter(records.into_iter().enumerate())
        .map(|(index, mut job)| async move {
            let budget = deadline
                .map(|d| call_timeout.min(d.saturating_duration_since(Instant::now())))
                .unwrap_or(call_timeout);
            let result = if budget.is_zero() {
                Err(CollaboratorError::Timeout)
            } else {
                match tokio::time::timeout(budget, extractor.extract(&job)).await {
                    Ok(result) => result,
                    Err(_) => Err(CollaboratorError::Timeout),
                }
            };
            job.extraction = match result {
                Ok(attributes) => Extraction::Complete { attributes },
                Err(err) => {
                    warn!(url = %job.source_url, extractor = extractor.name(), error = %err, "extraction incomplete");
                    Extraction::Incomplete {
                        reason: err.to_string(),
                    }
                }
            };
            (index, job)
        })
        .buffer_unordered(concurrency.max(1))
        .collect::<Vec<_>>()
        .await;
    results.sort_by_key(|(index, _)| *index);

    let records: Vec<JobRecord> = results.into_iter().map(|(_, job)| job).collect();
    let completed = records.iter().filter(|r| r.extraction.is_complete()).count();
    ExtractionOutcome {
        incomplete: records.len() - completed,
        completed,
        records,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn job(title: &str) -> JobRecord {
        JobRecord::new(format!("https://jobs.example/{title}"), "board", Utc.timestamp_opt(0, 0).unwrap())
            .with_title(title)
    }

    #[test]
    fn seniority_markers_follow_precedence() {
        assert_eq!(seniority_from_title("算法实习生"), Some(Seniority::Intern));
        assert_eq!(seniority_from_title("Sr. Data Engineer"), Some(Seniority::Senior));
        assert_eq!(seniority_from_title("Staff ML Engineer"), Some(Seniority::Lead));
        assert_eq!(seniority_from_title("资深算法工程师"), Some(Seniority::Senior));
        assert_eq!(seniority_from_title("Sprint Planner"), None);
    }

    #[test]
    fn rule_extraction_reads_text_fields() {
        let mut posting = job("大模型算法工程师")
            .with_company("星河集团")
            .with_experience("3-5年")
            .with_description("负责LLM训练。要求熟悉PyTorch；有分布式训练经验\n福利好");
        posting.graduation_requirement = Some("2025届、2026届".into());
        let extractor = RuleExtractor::new(Some(2026), vec!["LLM".into(), "大模型".into(), "Rust".into()]);
        let attrs = extractor.extract_now(&posting);

        assert_eq!(attrs.min_experience_years, Some(3.0));
        assert_eq!(attrs.max_experience_years, Some(5.0));
        assert_eq!(attrs.seniority, Some(Seniority::Mid));
        assert_eq!(attrs.company_size, Some(CompanySize::Large));
        assert_eq!(attrs.graduation_match, GraduationMatch::Eligible);
        assert_eq!(attrs.keywords, vec!["LLM".to_string(), "大模型".to_string()]);
        assert_eq!(attrs.key_requirements, vec!["要求熟悉PyTorch".to_string(), "有分布式训练经验".to_string()]);
        assert_eq!(attrs.extractor, "rules");
    }

    #[test]
    fn fresh_graduate_text_maps_to_zero_years() {
        let attrs = RuleExtractor::default().extract_now(&job("Analyst").with_experience("应届生"));
        assert_eq!(attrs.min_experience_years, Some(0.0));
        assert_eq!(attrs.max_experience_years, Some(0.0));
        assert_eq!(attrs.seniority, Some(Seniority::Junior));
        let attrs = RuleExtractor::default().extract_now(&job("Analyst").with_experience("经验不限"));
        assert_eq!(attrs.min_experience_years, None);
    }

    #[test]
    fn graduation_verdict_needs_a_class_and_stated_years() {
        assert_eq!(graduation_verdict(Some("2025届"), Some(2026)), GraduationMatch::Ineligible);
        assert_eq!(graduation_verdict(Some("应届生"), Some(2026)), GraduationMatch::Unknown);
        assert_eq!(graduation_verdict(Some("2026届"), None), GraduationMatch::Unknown);
    }

    #[test]
    fn llm_reply_is_parsed_leniently() {
        let attrs = parse_attributes_reply(
            r#"```json
{"seniority": "Senior", "min_experience_years": 5, "max_experience_years": -1,
 "company_size": "huge", "key_requirements": [" PyTorch ", ""], "keywords": ["LLM"],
 "graduation_years": [2024]}
```"#,
            Some(2026),
        )
        .expect("attributes");
        assert_eq!(attrs.seniority, Some(Seniority::Senior));
        assert_eq!(attrs.min_experience_years, Some(5.0));
        assert_eq!(attrs.max_experience_years, None);
        assert_eq!(attrs.company_size, None);
        assert_eq!(attrs.key_requirements, vec!["PyTorch".to_string()]);
        assert_eq!(attrs.graduation_match, GraduationMatch::Ineligible);
        assert_eq!(attrs.extractor, "llm");
    }

    struct Flaky;

    #[async_trait]
    impl AttributeExtractor for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn extract(&self, job: &JobRecord) -> Result<ExtractedAttributes, CollaboratorError> {
            match job.title.as_deref() {
                Some("slow") => {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(ExtractedAttributes::default())
                }
                Some("broken") => Err(CollaboratorError::Failed("boom".into())),
                _ => {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(ExtractedAttributes::default())
                }
            }
        }
    }

    #[tokio::test]
    async fn failures_and_timeouts_mark_records_incomplete_in_input_order() {
        let records = vec![job("slow"), job("ok"), job("broken"), job("fine")];
        let outcome = extract_all(&Flaky, records, 4, Duration::from_millis(50), None).await;
        let titles: Vec<_> = outcome.records.iter().map(|r| r.display_title().to_string()).collect();
        assert_eq!(titles, vec!["slow", "ok", "broken", "fine"]);
        assert_eq!(outcome.completed, 2);
        assert_eq!(outcome.incomplete, 2);
        assert!(matches!(outcome.records[0].extraction, Extraction::Incomplete { .. }));
        assert!(matches!(outcome.records[2].extraction, Extraction::Incomplete { .. }));
    }

    #[tokio::test]
    async fn expired_deadline_skips_calls() {
        let outcome = extract_all(&Flaky, vec![job("ok")], 1, Duration::from_secs(5), Some(Instant::now())).await;
        assert_eq!(outcome.incomplete, 1);
    }

    #[tokio::test]
    async fn llm_extractor_without_client_fails_soft() {
        let outcome = extract_all(
            &LlmExtractor::default(),
            vec![job("ok")],
            1,
            Duration::from_secs(1),
            None,
        )
        .await;
        match &outcome.records[0].extraction {
            Extraction::Incomplete { reason } => assert!(reason.contains("unavailable")),
            other => panic!("unexpected extraction {other:?}"),
        }
    }
}

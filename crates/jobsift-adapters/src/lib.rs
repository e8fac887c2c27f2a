//! Collector contracts plus the HTML listing and JSON feed collectors.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobsift_core::text::{parse_loose_date, parse_salary_text, text_or_none};
use jobsift_core::{JobRecord, SalaryRange};
use jobsift_storage::{FetchError, HttpFetcher};
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "jobsift-adapters";

pub const HTML_LISTING: &str = "html_listing";
pub const JSON_FEED: &str = "json_feed";

const PAGE_PLACEHOLDER: &str = "{page}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    #[default]
    Live,
    /// Parse a recorded page from disk instead of fetching.
    Fixture,
    /// Operator-captured postings in a JSON file; bypasses the collector.
    Manual,
}

/// CSS selectors locating listing items and their fields. Empty selectors are skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingSelectors {
    pub item: String,
    pub link: String,
    pub title: String,
    pub company: String,
    pub location: String,
    pub salary: String,
    pub experience: String,
    pub education: String,
    pub description: String,
    pub posted_at: String,
    pub deadline: String,
    /// Attribute on the item element carrying the platform job id.
    pub job_id_attr: String,
    pub next_page: String,
}

impl Default for ListingSelectors {
    fn default() -> Self {
        Self {
            item: ".job-card".into(),
            link: "a[href]".into(),
            title: ".job-title".into(),
            company: ".company".into(),
            location: ".location".into(),
            salary: ".salary".into(),
            experience: ".experience".into(),
            education: ".education".into(),
            description: ".description".into(),
            posted_at: ".posted".into(),
            deadline: ".deadline".into(),
            job_id_attr: "data-job-id".into(),
            next_page: "a.next[href]".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub source_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Key into the [`CollectorRegistry`].
    #[serde(default = "default_collector")]
    pub collector: String,
    #[serde(default)]
    pub mode: SourceMode,
    #[serde(default)]
    pub listing_urls: Vec<String>,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default)]
    pub fixture_path: Option<PathBuf>,
    #[serde(default)]
    pub selectors: ListingSelectors,
    /// JSON pointer to the item array of a feed; the document root when absent.
    #[serde(default)]
    pub feed_pointer: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_collector() -> String {
    HTML_LISTING.to_string()
}

fn default_max_pages() -> usize {
    1
}

impl SourceConfig {
    pub fn new(source_id: impl Into<String>, collector: impl Into<String>, mode: SourceMode) -> Self {
        let source_id = source_id.into();
        Self {
            display_name: source_id.clone(),
            source_id,
            enabled: true,
            collector: collector.into(),
            mode,
            listing_urls: Vec::new(),
            max_pages: 1,
            fixture_path: None,
            selectors: ListingSelectors::default(),
            feed_pointer: None,
            notes: None,
        }
    }

    /// Listing URLs with `{page}` expanded to `1..=max_pages`.
    pub fn page_urls(&self) -> Vec<String> {
        let max_pages = self.max_pages.max(1);
        self.listing_urls
            .iter()
            .flat_map(|url| {
                if url.contains(PAGE_PLACEHOLDER) {
                    (1..=max_pages)
                        .map(|page| url.replace(PAGE_PLACEHOLDER, &page.to_string()))
                        .collect::<Vec<_>>()
                } else {
                    vec![url.clone()]
                }
            })
            .collect()
    }

    fn is_templated(&self) -> bool {
        self.listing_urls.iter().any(|u| u.contains(PAGE_PLACEHOLDER))
    }

    fn base_url(&self) -> String {
        self.listing_urls
            .first()
            .map(|u| u.replace(PAGE_PLACEHOLDER, "1"))
            .unwrap_or_else(|| format!("fixture://{}/", self.source_id))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceRegistry {
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl SourceRegistry {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing source registry")
    }

    pub fn enabled(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }
}

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("fetching {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },
    #[error("parsing {context}: {message}")]
    Parse { context: String, message: String },
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Unsupported(String),
}

impl CollectorError {
    fn parse(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Parse {
            context: context.into(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CollectContext {
    pub run_id: Uuid,
    pub collected_at: DateTime<Utc>,
    pub http: Arc<HttpFetcher>,
    /// Relative fixture paths resolve against this directory.
    pub workspace_root: PathBuf,
}

/// One fetched or recorded listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPage {
    pub url: String,
    pub body: String,
}

#[async_trait]
pub trait Collector: Send + Sync {
    fn name(&self) -> &'static str;

    async fn collect(&self, ctx: &CollectContext, source: &SourceConfig) -> Result<Vec<JobRecord>, CollectorError>;
}

async fn read_fixture_page(ctx: &CollectContext, source: &SourceConfig) -> Result<RawPage, CollectorError> {
    let path = fixture_path(ctx, source)?;
    let body = tokio::fs::read_to_string(&path)
        .await
        .map_err(|source| CollectorError::Io { path, source })?;
    Ok(RawPage {
        url: source.base_url(),
        body,
    })
}

fn fixture_path(ctx: &CollectContext, source: &SourceConfig) -> Result<PathBuf, CollectorError> {
    let Some(rel) = &source.fixture_path else {
        return Err(CollectorError::Unsupported(format!(
            "source {} has mode {:?} but no fixture_path",
            source.source_id, source.mode
        )));
    };
    Ok(ctx.workspace_root.join(rel))
}

async fn fetch_page(ctx: &CollectContext, source: &SourceConfig, url: &str) -> Result<RawPage, CollectorError> {
    let body = ctx
        .http
        .fetch_text(ctx.run_id, &source.source_id, url)
        .await
        .map_err(|source| CollectorError::Fetch {
            url: url.to_string(),
            source,
        })?;
    Ok(RawPage {
        url: url.to_string(),
        body,
    })
}

fn resolve_url(base: Option<&Url>, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    match Url::parse(href) {
        Ok(url) => Some(url.to_string()),
        Err(_) => base.and_then(|b| b.join(href).ok()).map(|u| u.to_string()),
    }
}

fn compile(selector: &str) -> Result<Option<Selector>, CollectorError> {
    if selector.trim().is_empty() {
        return Ok(None);
    }
    Selector::parse(selector)
        .map(Some)
        .map_err(|e| CollectorError::parse(format!("selector {selector:?}"), e))
}

struct CompiledSelectors {
    item: Selector,
    link: Option<Selector>,
    title: Option<Selector>,
    company: Option<Selector>,
    location: Option<Selector>,
    salary: Option<Selector>,
    experience: Option<Selector>,
    education: Option<Selector>,
    description: Option<Selector>,
    posted_at: Option<Selector>,
    deadline: Option<Selector>,
    next_page: Option<Selector>,
}

impl CompiledSelectors {
    fn new(selectors: &ListingSelectors) -> Result<Self, CollectorError> {
        let item = compile(&selectors.item)?
            .ok_or_else(|| CollectorError::Unsupported("listing selectors need an item selector".into()))?;
        Ok(Self {
            item,
            link: compile(&selectors.link)?,
            title: compile(&selectors.title)?,
            company: compile(&selectors.company)?,
            location: compile(&selectors.location)?,
            salary: compile(&selectors.salary)?,
            experience: compile(&selectors.experience)?,
            education: compile(&selectors.education)?,
            description: compile(&selectors.description)?,
            posted_at: compile(&selectors.posted_at)?,
            deadline: compile(&selectors.deadline)?,
            next_page: compile(&selectors.next_page)?,
        })
    }
}

fn select_first_text(element: ElementRef<'_>, selector: Option<&Selector>) -> Option<String> {
    element
        .select(selector?)
        .next()
        .and_then(|n| text_or_none(n.text().collect::<String>()))
}

fn select_first_attr(element: ElementRef<'_>, selector: Option<&Selector>, attr: &str) -> Option<String> {
    let node = match selector {
        Some(sel) => element.select(sel).next()?,
        None => element,
    };
    node.value().attr(attr).and_then(text_or_none)
}

/// Extracts the listing items of one HTML page plus the next-page link, if any.
pub fn parse_listing_page(
    page: &RawPage,
    source: &SourceConfig,
    collected_at: DateTime<Utc>,
) -> Result<(Vec<JobRecord>, Option<String>), CollectorError> {
    let selectors = CompiledSelectors::new(&source.selectors)?;
    let base = Url::parse(&page.url).ok();
    let document = Html::parse_document(&page.body);

    let mut records = Vec::new();
    for item in document.select(&selectors.item) {
        let href = match &selectors.link {
            Some(sel) if sel.matches(&item) => item.value().attr("href").and_then(text_or_none),
            sel => select_first_attr(item, sel.as_ref(), "href"),
        };
        let Some(url) = href.as_deref().and_then(|h| resolve_url(base.as_ref(), h)) else {
            debug!(source_id = %source.source_id, page = %page.url, "listing item without link skipped");
            continue;
        };

        let mut record = JobRecord::new(url, &source.source_id, collected_at);
        record.platform_job_id = if source.selectors.job_id_attr.is_empty() {
            None
        } else {
            item.value().attr(&source.selectors.job_id_attr).and_then(text_or_none)
        };
        record.title = select_first_text(item, selectors.title.as_ref());
        record.company = select_first_text(item, selectors.company.as_ref());
        record.location = select_first_text(item, selectors.location.as_ref());
        record.salary_text = select_first_text(item, selectors.salary.as_ref());
        record.salary = record.salary_text.as_deref().and_then(parse_salary_text);
        record.experience_text = select_first_text(item, selectors.experience.as_ref());
        record.education = select_first_text(item, selectors.education.as_ref());
        record.description = select_first_text(item, selectors.description.as_ref());
        record.posted_at = select_first_text(item, selectors.posted_at.as_ref())
            .as_deref()
            .and_then(parse_loose_date);
        record.deadline = select_first_text(item, selectors.deadline.as_ref())
            .as_deref()
            .and_then(parse_loose_date);
        records.push(record);
    }

    let next = selectors.next_page.as_ref().and_then(|sel| {
        document
            .select(sel)
            .next()
            .and_then(|n| n.value().attr("href"))
            .and_then(|h| resolve_url(base.as_ref(), h))
            .filter(|next| next != &page.url)
    });
    Ok((records, next))
}

/// Scrapes job cards out of HTML listing pages using the source's selectors.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlListingCollector;

#[async_trait]
impl Collector for HtmlListingCollector {
    fn name(&self) -> &'static str {
        HTML_LISTING
    }

    async fn collect(&self, ctx: &CollectContext, source: &SourceConfig) -> Result<Vec<JobRecord>, CollectorError> {
        match source.mode {
            SourceMode::Fixture => {
                let page = read_fixture_page(ctx, source).await?;
                let (records, _) = parse_listing_page(&page, source, ctx.collected_at)?;
                Ok(records)
            }
            SourceMode::Live => self.collect_live(ctx, source).await,
            SourceMode::Manual => Err(CollectorError::Unsupported(format!(
                "{} does not read manual sources",
                self.name()
            ))),
        }
    }
}

impl HtmlListingCollector {
    async fn collect_live(&self, ctx: &CollectContext, source: &SourceConfig) -> Result<Vec<JobRecord>, CollectorError> {
        let max_pages = source.max_pages.max(1);
        let follow_next = !source.is_templated();
        let mut out = Vec::new();
        let mut fetched_any = false;

        for start in source.page_urls() {
            let mut next = Some(start);
            let mut pages = 0;
            while let Some(url) = next.take() {
                if pages >= max_pages {
                    break;
                }
                let page = match fetch_page(ctx, source, &url).await {
                    Ok(page) => page,
                    Err(err) if fetched_any => {
                        warn!(source_id = %source.source_id, url = %url, error = %err, "listing page failed; keeping earlier pages");
                        break;
                    }
                    Err(err) => return Err(err),
                };
                fetched_any = true;
                pages += 1;
                let (records, next_url) = parse_listing_page(&page, source, ctx.collected_at)?;
                debug!(source_id = %source.source_id, url = %page.url, items = records.len(), "listing page parsed");
                out.extend(records);
                if follow_next {
                    next = next_url;
                }
            }
        }
        Ok(out)
    }
}

fn json_text(item: &JsonValue, keys: &[&str]) -> Option<String> {
    keys.iter().filter_map(|k| item.get(*k)).find_map(|v| match v {
        JsonValue::String(s) => text_or_none(s),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn json_f64(item: &JsonValue, keys: &[&str]) -> Option<f64> {
    keys.iter().filter_map(|k| item.get(*k)).find_map(|v| match v {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn feed_salary(item: &JsonValue) -> (Option<SalaryRange>, Option<String>) {
    if let Some(obj) = item.get("salary").filter(|v| v.is_object()) {
        let min = json_f64(obj, &["min", "from"]);
        let max = json_f64(obj, &["max", "to"]);
        let range = match (min, max) {
            (Some(lo), Some(hi)) => Some(SalaryRange::new(lo, hi)),
            (Some(v), None) | (None, Some(v)) => Some(SalaryRange::single(v)),
            (None, None) => None,
        };
        return (range, json_text(obj, &["text"]));
    }
    let text = json_text(item, &["salary", "salary_text", "pay"]);
    let range = match (json_f64(item, &["salary_min"]), json_f64(item, &["salary_max"])) {
        (Some(lo), Some(hi)) => Some(SalaryRange::new(lo, hi)),
        (Some(v), None) | (None, Some(v)) => Some(SalaryRange::single(v)),
        (None, None) => text.as_deref().and_then(parse_salary_text),
    };
    (range, text)
}

fn record_from_feed_item(
    item: &JsonValue,
    source: &SourceConfig,
    base: Option<&Url>,
    collected_at: DateTime<Utc>,
) -> Option<JobRecord> {
    let url = json_text(item, &["url", "link", "apply_url"]).and_then(|h| resolve_url(base, &h))?;
    let mut record = JobRecord::new(url, &source.source_id, collected_at);
    record.platform_job_id = json_text(item, &["id", "job_id"]);
    record.title = json_text(item, &["title", "position", "name"]);
    record.company = json_text(item, &["company", "company_name", "employer"]);
    record.location = json_text(item, &["location", "city"]);
    let (salary, salary_text) = feed_salary(item);
    record.salary = salary;
    record.salary_text = salary_text;
    record.experience_text = json_text(item, &["experience", "experience_text"]);
    record.education = json_text(item, &["education", "degree"]);
    record.description = json_text(item, &["description", "summary"]);
    record.graduation_requirement = json_text(item, &["graduation", "graduation_requirement"]);
    record.posted_at = json_text(item, &["posted_at", "published_at"])
        .as_deref()
        .and_then(parse_loose_date);
    record.deadline = json_text(item, &["deadline", "closes_at"])
        .as_deref()
        .and_then(parse_loose_date);
    Some(record)
}

/// Parses a JSON feed page into records. Items without a URL are skipped.
pub fn parse_feed_page(
    page: &RawPage,
    source: &SourceConfig,
    collected_at: DateTime<Utc>,
) -> Result<Vec<JobRecord>, CollectorError> {
    let value: JsonValue = serde_json::from_str(&page.body).map_err(|e| CollectorError::parse(&page.url, e))?;
    let items = match source.feed_pointer.as_deref() {
        Some(pointer) => value.pointer(pointer),
        None => Some(&value),
    }
    .and_then(JsonValue::as_array)
    .ok_or_else(|| CollectorError::parse(&page.url, "feed has no item array"))?;

    let base = Url::parse(&page.url).ok();
    let mut records = Vec::with_capacity(items.len());
    for item in items {
        match record_from_feed_item(item, source, base.as_ref(), collected_at) {
            Some(record) => records.push(record),
            None => debug!(source_id = %source.source_id, "feed item without url skipped"),
        }
    }
    Ok(records)
}

/// Reads JSON job feeds. Paged feeds use a `{page}` placeholder and stop at the first empty page.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFeedCollector;

#[async_trait]
impl Collector for JsonFeedCollector {
    fn name(&self) -> &'static str {
        JSON_FEED
    }

    async fn collect(&self, ctx: &CollectContext, source: &SourceConfig) -> Result<Vec<JobRecord>, CollectorError> {
        match source.mode {
            SourceMode::Fixture => {
                let page = read_fixture_page(ctx, source).await?;
                parse_feed_page(&page, source, ctx.collected_at)
            }
            SourceMode::Live => {
                let mut out = Vec::new();
                for (index, url) in source.page_urls().into_iter().enumerate() {
                    let page = match fetch_page(ctx, source, &url).await {
                        Ok(page) => page,
                        Err(err) if index > 0 => {
                            warn!(source_id = %source.source_id, url = %url, error = %err, "feed page failed; keeping earlier pages");
                            break;
                        }
                        Err(err) => return Err(err),
                    };
                    let records = parse_feed_page(&page, source, ctx.collected_at)?;
                    if records.is_empty() {
                        break;
                    }
                    out.extend(records);
                }
                Ok(out)
            }
            SourceMode::Manual => Err(CollectorError::Unsupported(format!(
                "{} does not read manual sources",
                self.name()
            ))),
        }
    }
}

/// A posting captured by hand for sources that cannot be crawled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualPosting {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub salary_text: Option<String>,
    #[serde(default)]
    pub experience_text: Option<String>,
    #[serde(default)]
    pub education: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub graduation_requirement: Option<String>,
    #[serde(default)]
    pub deadline: Option<String>,
}

impl ManualPosting {
    pub fn into_record(self, platform: &str, collected_at: DateTime<Utc>) -> JobRecord {
        let mut record = JobRecord::new(self.url, platform, collected_at);
        record.salary = self.salary_text.as_deref().and_then(parse_salary_text);
        record.title = self.title.and_then(text_or_none);
        record.company = self.company.and_then(text_or_none);
        record.location = self.location.and_then(text_or_none);
        record.salary_text = self.salary_text.and_then(text_or_none);
        record.experience_text = self.experience_text.and_then(text_or_none);
        record.education = self.education.and_then(text_or_none);
        record.description = self.description.and_then(text_or_none);
        record.graduation_requirement = self.graduation_requirement.and_then(text_or_none);
        record.deadline = self.deadline.as_deref().and_then(parse_loose_date);
        record
    }
}

pub async fn load_manual_postings(path: impl AsRef<Path>) -> Result<Vec<ManualPosting>, CollectorError> {
    let path = path.as_ref();
    let text = tokio::fs::read_to_string(path).await.map_err(|source| CollectorError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|e| CollectorError::parse(path.display().to_string(), e))
}

/// Explicit map from collector key to implementation.
#[derive(Clone, Default)]
pub struct CollectorRegistry {
    collectors: BTreeMap<String, Arc<dyn Collector>>,
}

impl fmt::Debug for CollectorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectorRegistry")
            .field("collectors", &self.collectors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CollectorRegistry {
    pub fn with_defaults() -> Self {
        let mut registry = Self::default();
        registry.register(HTML_LISTING, Arc::new(HtmlListingCollector));
        registry.register(JSON_FEED, Arc::new(JsonFeedCollector));
        registry
    }

    pub fn register(&mut self, key: impl Into<String>, collector: Arc<dyn Collector>) {
        self.collectors.insert(key.into(), collector);
    }

    pub fn get(&self, key: &str) -> Option<&Arc<dyn Collector>> {
        self.collectors.get(key)
    }

    /// Collects one source. Manual sources are loaded directly; others go to their collector.
    pub async fn collect(&self, ctx: &CollectContext, source: &SourceConfig) -> Result<Vec<JobRecord>, CollectorError> {
        let records = if source.mode == SourceMode::Manual {
            let path = fixture_path(ctx, source)?;
            load_manual_postings(&path)
                .await?
                .into_iter()
                .map(|p| p.into_record(&source.source_id, ctx.collected_at))
                .collect::<Vec<_>>()
        } else {
            let collector = self.get(&source.collector).ok_or_else(|| {
                CollectorError::Unsupported(format!(
                    "source {} names unknown collector {}",
                    source.source_id, source.collector
                ))
            })?;
            collector.collect(ctx, source).await?
        };
        info!(
            source_id = %source.source_id,
            collector = %source.collector,
            mode = ?source.mode,
            records = records.len(),
            "source collected"
        );
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use jobsift_storage::HttpClientConfig;

    fn workspace_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .canonicalize()
            .expect("workspace root")
    }

    fn collected_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 6, 9, 0, 0).single().expect("timestamp")
    }

    fn ctx() -> CollectContext {
        CollectContext {
            run_id: Uuid::new_v4(),
            collected_at: collected_at(),
            http: Arc::new(HttpFetcher::new(HttpClientConfig::default()).expect("http client")),
            workspace_root: workspace_root(),
        }
    }

    fn board_source() -> SourceConfig {
        let mut source = SourceConfig::new("board", HTML_LISTING, SourceMode::Fixture);
        source.listing_urls = vec!["https://board.example/jobs".into()];
        source.fixture_path = Some("fixtures/board/listing.html".into());
        source
    }

    #[test]
    fn page_urls_expand_placeholder_up_to_max_pages() {
        let mut source = SourceConfig::new("feed", JSON_FEED, SourceMode::Live);
        source.listing_urls = vec!["https://feed.example/jobs?page={page}".into(), "https://x.example/all".into()];
        source.max_pages = 3;
        assert_eq!(
            source.page_urls(),
            vec![
                "https://feed.example/jobs?page=1",
                "https://feed.example/jobs?page=2",
                "https://feed.example/jobs?page=3",
                "https://x.example/all",
            ]
        );
    }

    #[test]
    fn listing_page_items_resolve_relative_links() {
        let page = RawPage {
            url: "https://board.example/jobs?page=1".into(),
            body: r#"
                <div class="job-card" data-job-id="42">
                  <a href="/jobs/42"><span class="job-title"> ML   Engineer </span></a>
                  <span class="company">Hooli Inc.</span>
                  <span class="salary">30-40K</span>
                  <span class="deadline">2026/02/01</span>
                </div>
                <div class="job-card"><span class="job-title">No link</span></div>
                <a class="next" href="?page=2">next</a>
            "#
            .into(),
        };
        let (records, next) = parse_listing_page(&page, &board_source(), collected_at()).expect("parse");
        assert_eq!(records.len(), 1);
        let job = &records[0];
        assert_eq!(job.source_url, "https://board.example/jobs/42");
        assert_eq!(job.platform_job_id.as_deref(), Some("42"));
        assert_eq!(job.title.as_deref(), Some("ML Engineer"));
        assert_eq!(job.salary, Some(SalaryRange::new(30_000.0, 40_000.0)));
        assert_eq!(job.deadline, NaiveDate::from_ymd_opt(2026, 2, 1));
        assert_eq!(next.as_deref(), Some("https://board.example/jobs?page=2"));
    }

    #[test]
    fn invalid_selector_is_a_parse_error() {
        let mut source = board_source();
        source.selectors.title = "[[".into();
        let page = RawPage {
            url: "https://board.example/".into(),
            body: "<html></html>".into(),
        };
        assert!(matches!(
            parse_listing_page(&page, &source, collected_at()),
            Err(CollectorError::Parse { .. })
        ));
    }

    #[test]
    fn feed_items_accept_field_aliases_and_salary_objects() {
        let mut source = SourceConfig::new("feed", JSON_FEED, SourceMode::Fixture);
        source.feed_pointer = Some("/data/jobs".into());
        let page = RawPage {
            url: "https://feed.example/api".into(),
            body: r#"{"data":{"jobs":[
                {"link":"/jobs/1","position":"Data Scientist","company_name":"Initech","salary":{"min":20000,"max":30000}},
                {"title":"missing url"},
                {"url":"https://feed.example/jobs/2","title":"Analyst","salary_text":"15-20k","posted_at":"2026-01-02"}
            ]}}"#
                .into(),
        };
        let records = parse_feed_page(&page, &source, collected_at()).expect("feed");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].source_url, "https://feed.example/jobs/1");
        assert_eq!(records[0].title.as_deref(), Some("Data Scientist"));
        assert_eq!(records[0].salary, Some(SalaryRange::new(20_000.0, 30_000.0)));
        assert_eq!(records[1].salary, Some(SalaryRange::new(15_000.0, 20_000.0)));
        assert_eq!(records[1].posted_at, NaiveDate::from_ymd_opt(2026, 1, 2));
    }

    #[test]
    fn feed_without_item_array_is_rejected() {
        let source = SourceConfig::new("feed", JSON_FEED, SourceMode::Fixture);
        let page = RawPage {
            url: "https://feed.example/api".into(),
            body: r#"{"jobs": 3}"#.into(),
        };
        assert!(parse_feed_page(&page, &source, collected_at()).is_err());
    }

    #[test]
    fn source_registry_defaults_apply() {
        let registry = SourceRegistry::from_yaml_str(
            r#"
sources:
  - source_id: board
    mode: fixture
    fixture_path: fixtures/board/listing.html
  - source_id: off
    enabled: false
    collector: json_feed
"#,
        )
        .expect("registry");
        let enabled = registry.enabled().collect::<Vec<_>>();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].collector, HTML_LISTING);
        assert_eq!(enabled[0].max_pages, 1);
        assert_eq!(enabled[0].selectors, ListingSelectors::default());
    }

    #[tokio::test]
    async fn fixture_listing_is_collected_from_disk() {
        let records = CollectorRegistry::with_defaults()
            .collect(&ctx(), &board_source())
            .await
            .expect("collect");
        assert_eq!(records.len(), 4);
        assert!(records.iter().all(|r| r.source_platform == "board"));
        assert!(records.iter().all(|r| r.source_url.starts_with("https://board.example/jobs/")));
        assert_eq!(records[0].company.as_deref(), Some("星河科技有限公司"));
    }

    #[tokio::test]
    async fn manual_source_bypasses_collectors() {
        let mut source = SourceConfig::new("referrals", "none", SourceMode::Manual);
        source.fixture_path = Some("fixtures/manual/referrals.json".into());
        let records = CollectorRegistry::with_defaults()
            .collect(&ctx(), &source)
            .await
            .expect("manual");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source_platform, "referrals");
        assert!(records[0].salary.is_some());
    }

    #[tokio::test]
    async fn unknown_collector_and_missing_fixture_are_reported() {
        let registry = CollectorRegistry::with_defaults();
        let unknown = SourceConfig::new("x", "carrier_pigeon", SourceMode::Live);
        assert!(matches!(
            registry.collect(&ctx(), &unknown).await,
            Err(CollectorError::Unsupported(_))
        ));

        let mut missing = board_source();
        missing.fixture_path = Some("fixtures/board/does-not-exist.html".into());
        assert!(matches!(
            registry.collect(&ctx(), &missing).await,
            Err(CollectorError::Io { .. })
        ));
    }
}

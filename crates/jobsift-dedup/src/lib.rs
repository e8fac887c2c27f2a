//! Three-tier duplicate detection: exact source URL, normalized fingerprint, semantic similarity.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use jobsift_core::{CollaboratorError, DedupStats, Fingerprint, JobRecord, SemanticStatus};
use serde::{Deserialize, Serialize};
use strsim::jaro_winkler;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

pub mod fingerprint;

pub use fingerprint::{build_fingerprint, is_groupable, normalize_company, normalize_location, normalize_title};

pub const CRATE_NAME: &str = "jobsift-dedup";

/// Which survivors the semantic tier pairs up for comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SemanticScope {
    /// Same normalized company, or same normalized title.
    #[default]
    Broad,
    /// Same normalized company and same normalized location.
    Narrow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub semantic_enabled: bool,
    pub semantic_threshold: f64,
    pub scope: SemanticScope,
    pub concurrency: usize,
    pub call_timeout_secs: u64,
    pub against_prior: bool,
    pub max_prior_candidates: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            semantic_enabled: true,
            semantic_threshold: 0.8,
            scope: SemanticScope::Broad,
            concurrency: 4,
            call_timeout_secs: 30,
            against_prior: true,
            max_prior_candidates: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityVerdict {
    pub is_duplicate: bool,
    pub confidence: f64,
}

#[async_trait]
pub trait SemanticComparator: Send + Sync {
    fn name(&self) -> &str;

    fn is_available(&self) -> bool {
        true
    }

    async fn compare(&self, a: &JobRecord, b: &JobRecord) -> Result<SimilarityVerdict, CollaboratorError>;
}

/// Probe into previously persisted postings.
#[async_trait]
pub trait PriorRecordLookup: Send + Sync {
    async fn known_similar(&self, probe: &Fingerprint) -> Result<Vec<JobRecord>, CollaboratorError>;
}

/// What earlier runs already persisted, consulted by every tier.
#[derive(Clone, Default)]
pub struct PriorKnown {
    urls: HashSet<String>,
    fingerprints: HashSet<String>,
    lookup: Option<Arc<dyn PriorRecordLookup>>,
}

impl PriorKnown {
    pub fn from_records(records: Vec<JobRecord>) -> Self {
        let mut urls = HashSet::new();
        let mut fingerprints = HashSet::new();
        for record in &records {
            urls.insert(record.source_url.clone());
            urls.extend(record.merged_from.iter().cloned());
            let fp = build_fingerprint(record);
            if is_groupable(&fp) {
                fingerprints.insert(fp.content_hash);
            }
        }
        Self {
            urls,
            fingerprints,
            lookup: Some(Arc::new(InMemoryPriorIndex::new(records))),
        }
    }

    pub fn with_lookup(mut self, lookup: Arc<dyn PriorRecordLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    pub fn contains_url(&self, url: &str) -> bool {
        self.urls.contains(url)
    }

    pub fn contains_fingerprint(&self, fingerprint: &Fingerprint) -> bool {
        self.fingerprints.contains(&fingerprint.content_hash)
    }

    pub fn lookup(&self) -> Option<&Arc<dyn PriorRecordLookup>> {
        self.lookup.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty() && self.fingerprints.is_empty() && self.lookup.is_none()
    }
}

/// Prior records blocked by normalized company and title.
pub struct InMemoryPriorIndex {
    records: Vec<JobRecord>,
    by_company: HashMap<String, Vec<usize>>,
    by_title: HashMap<String, Vec<usize>>,
}

impl InMemoryPriorIndex {
    pub fn new(records: Vec<JobRecord>) -> Self {
        let mut by_company: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_title: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, record) in records.iter().enumerate() {
            let fp = build_fingerprint(record);
            if !fp.company.is_empty() {
                by_company.entry(fp.company).or_default().push(idx);
            }
            if !fp.title.is_empty() {
                by_title.entry(fp.title).or_default().push(idx);
            }
        }
        Self {
            records,
            by_company,
            by_title,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl PriorRecordLookup for InMemoryPriorIndex {
    async fn known_similar(&self, probe: &Fingerprint) -> Result<Vec<JobRecord>, CollaboratorError> {
        let mut hits = BTreeSet::new();
        if let Some(idx) = self.by_company.get(&probe.company) {
            hits.extend(idx.iter().copied());
        }
        if let Some(idx) = self.by_title.get(&probe.title) {
            hits.extend(idx.iter().copied());
        }
        Ok(hits.into_iter().map(|i| self.records[i].clone()).collect())
    }
}

/// Jaro-Winkler over normalized title and company, weighted 0.7 / 0.3.
#[derive(Debug, Clone, Copy)]
pub struct LexicalComparator {
    pub duplicate_threshold: f64,
}

impl Default for LexicalComparator {
    fn default() -> Self {
        Self {
            duplicate_threshold: 0.92,
        }
    }
}

impl LexicalComparator {
    pub fn similarity(a: &JobRecord, b: &JobRecord) -> f64 {
        let title_a = normalize_title(a.title.as_deref().unwrap_or_default());
        let title_b = normalize_title(b.title.as_deref().unwrap_or_default());
        let company_a = normalize_company(a.company.as_deref().unwrap_or_default());
        let company_b = normalize_company(b.company.as_deref().unwrap_or_default());
        (jaro_winkler(&title_a, &title_b) * 0.7) + (jaro_winkler(&company_a, &company_b) * 0.3)
    }
}

#[async_trait]
impl SemanticComparator for LexicalComparator {
    fn name(&self) -> &str {
        "lexical"
    }

    async fn compare(&self, a: &JobRecord, b: &JobRecord) -> Result<SimilarityVerdict, CollaboratorError> {
        let score = Self::similarity(a, b);
        Ok(SimilarityVerdict {
            is_duplicate: score >= self.duplicate_threshold,
            confidence: score,
        })
    }
}

#[derive(Debug, Clone)]
pub struct DedupOutcome {
    pub uniques: Vec<JobRecord>,
    pub stats: DedupStats,
}

pub struct DedupEngine {
    config: DedupConfig,
    comparator: Option<Arc<dyn SemanticComparator>>,
}

impl DedupEngine {
    pub fn new(config: DedupConfig) -> Self {
        Self {
            config,
            comparator: None,
        }
    }

    pub fn with_comparator(mut self, comparator: Arc<dyn SemanticComparator>) -> Self {
        self.comparator = Some(comparator);
        self
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    pub async fn deduplicate(&self, batch: Vec<JobRecord>, prior: Option<&PriorKnown>) -> DedupOutcome {
        self.deduplicate_until(batch, prior, None).await
    }

    /// Same as [`DedupEngine::deduplicate`], abandoning outstanding semantic calls at `deadline`.
    pub async fn deduplicate_until(
        &self,
        batch: Vec<JobRecord>,
        prior: Option<&PriorKnown>,
        deadline: Option<Instant>,
    ) -> DedupOutcome {
        let prior = prior.filter(|_| self.config.against_prior);
        let mut stats = DedupStats {
            input: batch.len(),
            ..DedupStats::default()
        };
        let survivors = exact_key_tier(batch, prior, &mut stats);
        let survivors = fingerprint_tier(survivors, prior, &mut stats);
        let uniques = self.semantic_tier(survivors, prior, deadline, &mut stats).await;
        stats.uniques = uniques.len();
        info!(
            input = stats.input,
            url_duplicates = stats.url_duplicates,
            content_duplicates = stats.content_duplicates,
            semantic_duplicates = stats.semantic_duplicates,
            prior_duplicates = stats.prior_duplicates,
            uniques = stats.uniques,
            "dedup complete"
        );
        DedupOutcome { uniques, stats }
    }

    async fn semantic_tier(
        &self,
        records: Vec<JobRecord>,
        prior: Option<&PriorKnown>,
        deadline: Option<Instant>,
        stats: &mut DedupStats,
    ) -> Vec<JobRecord> {
        if !self.config.semantic_enabled {
            stats.semantic_status = SemanticStatus::Disabled;
            return records;
        }
        let Some(comparator) = self.comparator.as_deref().filter(|c| c.is_available()) else {
            warn!("semantic comparator unavailable, keeping fingerprint-tier output");
            stats.semantic_status = SemanticStatus::Unavailable;
            return records;
        };

        let fingerprints: Vec<Fingerprint> = records.iter().map(build_fingerprint).collect();
        let prior_records = self.prior_candidates(&fingerprints, prior, deadline, stats).await;
        let mut candidates: Vec<Candidate> = candidate_pairs(&fingerprints, self.config.scope)
            .into_iter()
            .map(|(i, j)| Candidate::Batch(i, j))
            .collect();
        for (i, found) in prior_records.iter().enumerate() {
            candidates.extend((0..found.len()).map(|k| Candidate::Prior(i, k)));
        }
        debug!(
            comparator = comparator.name(),
            candidates = candidates.len(),
            "semantic comparisons scheduled"
        );

        let duplicates = self
            .run_comparisons(comparator, &records, &prior_records, candidates, deadline, stats)
            .await;
        stats.semantic_status = SemanticStatus::Completed;

        let n = records.len();
        // prior hits leave before grouping so they never absorb new postings
        let mut absorbed: Vec<bool> = (0..n)
            .map(|i| (0..prior_records[i].len()).any(|k| duplicates.contains(&Candidate::Prior(i, k))))
            .collect();
        let prior_hits = absorbed.iter().filter(|&&hit| hit).count();
        stats.semantic_duplicates += prior_hits;
        stats.prior_duplicates += prior_hits;

        let mut members: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();
        for i in 0..n {
            if absorbed[i] {
                continue;
            }
            for j in (i + 1)..n {
                if !absorbed[j] && duplicates.contains(&Candidate::Batch(i, j)) {
                    absorbed[j] = true;
                    members[i].push(j);
                }
            }
        }

        let mut slots: Vec<Option<JobRecord>> = records.into_iter().map(Some).collect();
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            if absorbed[i] {
                continue;
            }
            let group = &members[i];
            stats.semantic_duplicates += group.len() - 1;
            let taken: Vec<(usize, JobRecord)> = group
                .iter()
                .filter_map(|&m| slots[m].take().map(|r| (m, r)))
                .collect();
            if let Some(merged) = merge_group(taken) {
                out.push(merged);
            }
        }
        out
    }

    async fn prior_candidates(
        &self,
        fingerprints: &[Fingerprint],
        prior: Option<&PriorKnown>,
        deadline: Option<Instant>,
        stats: &mut DedupStats,
    ) -> Vec<Vec<JobRecord>> {
        let mut out = vec![Vec::new(); fingerprints.len()];
        let Some(lookup) = prior.and_then(PriorKnown::lookup) else {
            return out;
        };
        let call_timeout = Duration::from_secs(self.config.call_timeout_secs.max(1));
        for (i, fp) in fingerprints.iter().enumerate() {
            if !is_groupable(fp) {
                continue;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                warn!("run deadline reached during prior lookups");
                break;
            }
            match timeout(call_timeout, lookup.known_similar(fp)).await {
                Ok(Ok(found)) => {
                    out[i] = found.into_iter().take(self.config.max_prior_candidates).collect();
                }
                Ok(Err(err)) => {
                    stats.semantic_failures += 1;
                    warn!(error = %err, "prior record lookup failed");
                }
                Err(_) => {
                    stats.semantic_failures += 1;
                    warn!("prior record lookup timed out");
                }
            }
        }
        out
    }

    async fn run_comparisons(
        &self,
        comparator: &dyn SemanticComparator,
        records: &[JobRecord],
        prior_records: &[Vec<JobRecord>],
        candidates: Vec<Candidate>,
        deadline: Option<Instant>,
        stats: &mut DedupStats,
    ) -> HashSet<Candidate> {
        let call_timeout = Duration::from_secs(self.config.call_timeout_secs.max(1));
        let threshold = self.config.semantic_threshold;
        let total = candidates.len();
        stats.semantic_comparisons += total;

        let mut results = stream::iter(candidates.into_iter().map(|candidate| {
            let (a, b) = match candidate {
                Candidate::Batch(i, j) => (&records[i], &records[j]),
                Candidate::Prior(i, k) => (&records[i], &prior_records[i][k]),
            };
            async move {
                let verdict = match timeout(call_timeout, comparator.compare(a, b)).await {
                    Ok(result) => result,
                    Err(_) => Err(CollaboratorError::Timeout),
                };
                (candidate, verdict)
            }
        }))
        .buffer_unordered(self.config.concurrency.max(1));

        let mut duplicates = HashSet::new();
        let mut finished = 0usize;
        loop {
            let next = match deadline {
                Some(d) => match timeout_at(d, results.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!(outstanding = total - finished, "run deadline reached, abandoning semantic comparisons");
                        break;
                    }
                },
                None => results.next().await,
            };
            let Some((candidate, verdict)) = next else {
                break;
            };
            finished += 1;
            match verdict {
                Ok(v) if v.is_duplicate && v.confidence >= threshold => {
                    duplicates.insert(candidate);
                }
                Ok(_) => {}
                Err(err) => {
                    stats.semantic_failures += 1;
                    warn!(error = %err, "semantic comparison failed, treating pair as distinct");
                }
            }
        }
        stats.semantic_failures += total - finished;
        duplicates
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Candidate {
    Batch(usize, usize),
    Prior(usize, usize),
}

/// Blocked candidate pairs `(i, j)` with `i < j`.
pub fn candidate_pairs(fingerprints: &[Fingerprint], scope: SemanticScope) -> BTreeSet<(usize, usize)> {
    let mut blocks: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, fp) in fingerprints.iter().enumerate() {
        match scope {
            SemanticScope::Broad => {
                if !fp.company.is_empty() {
                    blocks.entry(format!("c\u{1f}{}", fp.company)).or_default().push(i);
                }
                if !fp.title.is_empty() {
                    blocks.entry(format!("t\u{1f}{}", fp.title)).or_default().push(i);
                }
            }
            SemanticScope::Narrow => {
                if !fp.company.is_empty() {
                    blocks
                        .entry(format!("{}\u{1f}{}", fp.company, fp.location))
                        .or_default()
                        .push(i);
                }
            }
        }
    }
    let mut pairs = BTreeSet::new();
    for members in blocks.values() {
        for (a, &i) in members.iter().enumerate() {
            for &j in &members[a + 1..] {
                pairs.insert((i.min(j), i.max(j)));
            }
        }
    }
    pairs
}

/// Keeps the first record per source URL and drops URLs already persisted.
pub fn exact_key_tier(batch: Vec<JobRecord>, prior: Option<&PriorKnown>, stats: &mut DedupStats) -> Vec<JobRecord> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(batch.len());
    for job in batch {
        if prior.is_some_and(|p| p.contains_url(&job.source_url)) {
            stats.url_duplicates += 1;
            stats.prior_duplicates += 1;
            continue;
        }
        if seen.insert(job.source_url.clone()) {
            out.push(job);
        } else {
            stats.url_duplicates += 1;
        }
    }
    out
}

/// Collapses records sharing a fingerprint into one merged canonical record.
pub fn fingerprint_tier(records: Vec<JobRecord>, prior: Option<&PriorKnown>, stats: &mut DedupStats) -> Vec<JobRecord> {
    let mut groups: Vec<(Option<Fingerprint>, Vec<(usize, JobRecord)>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for (pos, job) in records.into_iter().enumerate() {
        let fp = build_fingerprint(&job);
        if !is_groupable(&fp) {
            groups.push((None, vec![(pos, job)]));
            continue;
        }
        match index.get(&fp.content_hash) {
            Some(&g) => groups[g].1.push((pos, job)),
            None => {
                index.insert(fp.content_hash.clone(), groups.len());
                groups.push((Some(fp), vec![(pos, job)]));
            }
        }
    }

    let mut out = Vec::with_capacity(groups.len());
    for (fp, members) in groups {
        let known = match (&fp, prior) {
            (Some(fp), Some(prior)) => prior.contains_fingerprint(fp),
            _ => false,
        };
        if known {
            stats.content_duplicates += members.len();
            stats.prior_duplicates += members.len();
            continue;
        }
        stats.content_duplicates += members.len() - 1;
        if let Some(merged) = merge_group(members) {
            out.push(merged);
        }
    }
    out
}

/// Merges a duplicate group into its canonical member.
///
/// The canonical record has the most populated fields; ties go to the earliest
/// `collected_at`, then to the earliest batch position. Its empty fields are filled
/// from the other members in batch order.
pub fn merge_group(mut members: Vec<(usize, JobRecord)>) -> Option<JobRecord> {
    if members.is_empty() {
        return None;
    }
    members.sort_by_key(|(pos, _)| *pos);
    let canonical_idx = members
        .iter()
        .enumerate()
        .min_by(|(_, (pos_a, a)), (_, (pos_b, b))| {
            b.populated_field_count()
                .cmp(&a.populated_field_count())
                .then(a.collected_at.cmp(&b.collected_at))
                .then(pos_a.cmp(pos_b))
        })
        .map(|(idx, _)| idx)
        .unwrap_or(0);
    let (_, mut canonical) = members.remove(canonical_idx);
    for (_, other) in &members {
        canonical.absorb(other);
    }
    Some(canonical)
}

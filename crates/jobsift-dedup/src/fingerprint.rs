//! Canonical (company, title, location) signatures.

use jobsift_core::{Fingerprint, JobRecord};
use sha2::{Digest, Sha256};

const LEGAL_TOKENS: &[&str] = &[
    "inc",
    "incorporated",
    "llc",
    "ltd",
    "limited",
    "co",
    "corp",
    "corporation",
    "gmbh",
    "plc",
    "ag",
    "sa",
    "pte",
    "pty",
];

// Longest first so the most specific suffix wins.
const CJK_LEGAL_SUFFIXES: &[&str] = &[
    "网络科技有限公司",
    "信息科技有限公司",
    "科技有限公司",
    "技术有限公司",
    "股份有限公司",
    "集团有限公司",
    "有限责任公司",
    "有限公司",
];

const TITLE_NOISE_TOKENS: &[&str] = &["urgent", "hiring"];
const TITLE_NOISE_FRAGMENTS: &[&str] = &["急招", "高薪", "包住", "五险一金"];

/// Lowercase, replace every non-alphanumeric character with a space, collapse runs.
pub fn normalize_fragment(input: &str) -> String {
    input
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn normalize_company(input: &str) -> String {
    let mut tokens: Vec<String> = normalize_fragment(input)
        .split(' ')
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
        .collect();
    loop {
        let mut changed = false;
        if tokens.len() > 1 && tokens.last().is_some_and(|t| LEGAL_TOKENS.contains(&t.as_str())) {
            tokens.pop();
            changed = true;
        }
        if let Some(last) = tokens.last_mut() {
            if let Some(suffix) = CJK_LEGAL_SUFFIXES
                .iter()
                .find(|s| last.ends_with(**s) && last.len() > s.len())
            {
                last.truncate(last.len() - suffix.len());
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    tokens.join(" ")
}

pub fn normalize_title(input: &str) -> String {
    let mut cleaned = input.to_string();
    for fragment in TITLE_NOISE_FRAGMENTS {
        cleaned = cleaned.replace(fragment, " ");
    }
    normalize_fragment(&cleaned)
        .split(' ')
        .filter(|t| !t.is_empty() && !TITLE_NOISE_TOKENS.contains(t))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn normalize_location(input: &str) -> String {
    normalize_fragment(input)
}

/// Pure and deterministic; missing fields normalize to the empty string.
pub fn build_fingerprint(job: &JobRecord) -> Fingerprint {
    let company = normalize_company(job.company.as_deref().unwrap_or_default());
    let title = normalize_title(job.title.as_deref().unwrap_or_default());
    let location = normalize_location(job.location.as_deref().unwrap_or_default());
    let mut hasher = Sha256::new();
    hasher.update(company.as_bytes());
    hasher.update([0x1f]);
    hasher.update(title.as_bytes());
    hasher.update([0x1f]);
    hasher.update(location.as_bytes());
    let content_hash = hex::encode(hasher.finalize());
    Fingerprint {
        company,
        title,
        location,
        content_hash,
    }
}

/// A fingerprint with neither company nor title carries too little signal to group on.
pub fn is_groupable(fingerprint: &Fingerprint) -> bool {
    !fingerprint.company.is_empty() || !fingerprint.title.is_empty()
}

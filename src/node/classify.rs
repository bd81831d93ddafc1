//! Protocol and country classification of validated candidates
//!
//! Protocol buckets are disjoint: the scheme prefix is the discriminant.
//! Country buckets use the geo annotation when present, falling back to
//! keyword matching against the candidate's trailing free-text label.

use crate::node::engine::{valid_candidates, ValidationEngine};
use crate::node::models::Protocol;
use crate::node::parser::{is_plausible, label_of, ConfigParser, Deduplicator};
use percent_encoding::percent_decode_str;
use rand::seq::IndexedRandom;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Default per-category cap on candidates that get probed
const DEFAULT_SAMPLING_THRESHOLD: usize = 200;

/// One country rule: a bucket name plus the keywords that select it.
/// Rules are evaluated in order; the first match wins.
#[derive(Debug, Clone, Serialize)]
pub struct CountryRule {
    pub name: String,
    pub keywords: Vec<String>,
    /// Word-boundary patterns for the abbreviation keywords, compiled once
    /// at construction instead of per candidate
    #[serde(skip)]
    abbrev_patterns: Vec<Regex>,
}

impl<'de> Deserialize<'de> for CountryRule {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            name: String,
            keywords: Vec<String>,
        }
        let raw = Raw::deserialize(deserializer)?;
        Ok(CountryRule::from_parts(raw.name, raw.keywords))
    }
}

impl CountryRule {
    pub fn new(name: &str, keywords: &[&str]) -> Self {
        Self::from_parts(
            name.to_string(),
            keywords.iter().map(|k| k.to_string()).collect(),
        )
    }

    pub fn from_parts(name: String, keywords: Vec<String>) -> Self {
        let abbrev_patterns = keywords
            .iter()
            .filter(|k| is_abbreviation(k))
            .filter_map(|k| Regex::new(&format!(r"(?i)\b{}\b", regex::escape(k))).ok())
            .collect();
        Self {
            name,
            keywords,
            abbrev_patterns,
        }
    }

    /// Load an ordered rule list from a JSON array file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> crate::Result<Vec<CountryRule>> {
        let content = fs::read_to_string(path)?;
        let rules: Vec<CountryRule> = serde_json::from_str(&content)?;
        Ok(rules)
    }

    /// Built-in rule set covering the common node-label countries
    pub fn builtin() -> Vec<CountryRule> {
        vec![
            CountryRule::new("UnitedStates", &["US", "USA", "United States", "America"]),
            CountryRule::new("Japan", &["JP", "Japan", "Tokyo"]),
            CountryRule::new("Singapore", &["SG", "Singapore"]),
            CountryRule::new("HongKong", &["HK", "Hong Kong", "HongKong"]),
            CountryRule::new("Taiwan", &["TW", "Taiwan"]),
            CountryRule::new("Korea", &["KR", "Korea", "Seoul"]),
            CountryRule::new("Germany", &["DE", "Germany", "Frankfurt"]),
            CountryRule::new("UnitedKingdom", &["GB", "UK", "United Kingdom", "London"]),
            CountryRule::new("France", &["FR", "France", "Paris"]),
            CountryRule::new("Netherlands", &["NL", "Netherlands", "Amsterdam"]),
            CountryRule::new("Russia", &["RU", "Russia", "Moscow"]),
            CountryRule::new("Turkey", &["TR", "Turkey", "Istanbul"]),
            CountryRule::new("Iran", &["IR", "Iran", "Tehran"]),
            CountryRule::new("Canada", &["CA", "Canada", "Toronto"]),
        ]
    }

    /// Match this rule against a decoded label. Short uppercase
    /// abbreviations match on word boundaries only, so "US" never fires
    /// inside an unrelated word; longer keywords match as case-insensitive
    /// substrings.
    fn matches(&self, label: &str) -> bool {
        if self.abbrev_patterns.iter().any(|re| re.is_match(label)) {
            return true;
        }
        self.keywords
            .iter()
            .filter(|k| !is_abbreviation(k))
            .any(|k| label.to_lowercase().contains(&k.to_lowercase()))
    }
}

fn is_abbreviation(keyword: &str) -> bool {
    (2..=3).contains(&keyword.len()) && keyword.bytes().all(|b| b.is_ascii_uppercase())
}

/// Configuration for the classification pipeline
#[derive(Debug, Clone)]
pub struct ClassifyConfig {
    /// Bucket size above which only a random sample is probed
    pub sampling_threshold: usize,
    pub sampling_enabled: bool,
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            sampling_threshold: DEFAULT_SAMPLING_THRESHOLD,
            sampling_enabled: true,
        }
    }
}

impl ClassifyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sampling_threshold(mut self, sampling_threshold: usize) -> Self {
        self.sampling_threshold = sampling_threshold;
        self
    }

    pub fn with_sampling_enabled(mut self, sampling_enabled: bool) -> Self {
        self.sampling_enabled = sampling_enabled;
        self
    }
}

/// Classified output: category label -> surviving candidates
#[derive(Debug, Default, Serialize)]
pub struct ClassificationResult {
    pub protocols: BTreeMap<String, BTreeSet<String>>,
    pub countries: BTreeMap<String, BTreeSet<String>>,
    /// Candidates included on format validity alone; their bucket exceeded
    /// the sampling threshold so they were never probed
    pub unprobed: BTreeSet<String>,
    /// Per-candidate country annotation for human-readable output
    pub country_labels: HashMap<String, String>,
}

impl ClassificationResult {
    /// Candidate with its country annotation, for display
    pub fn annotated(&self, candidate: &str) -> String {
        match self.country_labels.get(candidate) {
            Some(country) => format!("{candidate} ({country})"),
            None => candidate.to_string(),
        }
    }

    /// Write one sorted text file per category. Buckets holding unprobed
    /// sampling-fallback entries get a header stating how many, so the
    /// cost/precision tradeoff is visible in the output itself.
    pub fn save_to_dir<P: AsRef<Path>>(&self, dir: P) -> crate::Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        for (label, items) in self.protocols.iter().chain(self.countries.iter()) {
            if items.is_empty() {
                continue;
            }
            let path = dir.join(format!("{label}.txt"));
            let mut file = fs::File::create(&path)?;

            let unprobed = items.iter().filter(|c| self.unprobed.contains(*c)).count();
            if unprobed > 0 {
                writeln!(
                    file,
                    "# {unprobed} of {} entries passed format validation only and were not probed (sampling cap)",
                    items.len()
                )?;
            }
            for item in items {
                writeln!(file, "{item}")?;
            }
            info!(path = %path.display(), count = items.len(), "saved category");
        }
        Ok(())
    }
}

/// Groups validated candidates into protocol and country buckets
pub struct ClassificationPipeline {
    engine: ValidationEngine,
    config: ClassifyConfig,
}

impl ClassificationPipeline {
    pub fn new(engine: ValidationEngine, config: ClassifyConfig) -> Self {
        Self { engine, config }
    }

    /// Dedup, probe (sampling oversized protocol buckets), then bucket the
    /// survivors by protocol and country
    pub async fn classify(
        &self,
        candidates: &HashSet<String>,
        rules: &[CountryRule],
    ) -> ClassificationResult {
        let mut result = ClassificationResult::default();
        if candidates.is_empty() {
            return result;
        }

        let deduped = Deduplicator::dedupe(candidates);

        let mut by_protocol: HashMap<Protocol, Vec<String>> = HashMap::new();
        for candidate in &deduped {
            if let Some(protocol) = ConfigParser::parse(candidate).protocol {
                by_protocol
                    .entry(protocol)
                    .or_default()
                    .push(candidate.clone());
            }
        }

        let mut to_probe: HashSet<String> = HashSet::new();
        let mut fallback: HashSet<String> = HashSet::new();

        for (protocol, group) in &by_protocol {
            if self.config.sampling_enabled && group.len() > self.config.sampling_threshold {
                let sampled: HashSet<&String> = group
                    .choose_multiple(&mut rand::rng(), self.config.sampling_threshold)
                    .collect();
                for candidate in group {
                    if sampled.contains(candidate) {
                        to_probe.insert(candidate.clone());
                    } else if is_plausible(candidate)
                        && ConfigParser::parse(candidate).is_complete()
                    {
                        fallback.insert(candidate.clone());
                    }
                }
                info!(
                    protocol = %protocol,
                    total = group.len(),
                    probed = self.config.sampling_threshold,
                    "bucket over sampling threshold, probing a random subset"
                );
            } else {
                to_probe.extend(group.iter().cloned());
            }
        }

        let probe_results = self.engine.process(&to_probe).await;
        let valid = valid_candidates(&probe_results);

        for candidate in valid.iter().chain(fallback.iter()) {
            if let Some(protocol) = ConfigParser::parse(candidate).protocol {
                result
                    .protocols
                    .entry(protocol.label().to_string())
                    .or_default()
                    .insert(candidate.clone());
            }

            let geo_code = probe_results
                .get(candidate)
                .and_then(|r| r.country.as_deref());
            if let Some(label) = country_label_for(candidate, geo_code, rules) {
                result
                    .countries
                    .entry(label.clone())
                    .or_default()
                    .insert(candidate.clone());
                result.country_labels.insert(candidate.clone(), label);
            }
        }

        result.unprobed = fallback.into_iter().collect();
        result
    }
}

/// Country bucket for one candidate. Primary path: map the resolved geo
/// code onto the rule listing it as a keyword. Fallback path: match rule
/// keywords against the percent-decoded trailing label. A candidate lands
/// in at most one bucket.
fn country_label_for(
    candidate: &str,
    geo_code: Option<&str>,
    rules: &[CountryRule],
) -> Option<String> {
    if let Some(code) = geo_code {
        for rule in rules {
            if rule.keywords.iter().any(|k| k.eq_ignore_ascii_case(code)) {
                return Some(rule.name.clone());
            }
        }
        // Unlisted code still yields a bucket under the code itself.
        return Some(code.to_string());
    }

    let label = label_of(candidate)?;
    let decoded = percent_decode_str(label).decode_utf8_lossy();
    let decoded = decoded.trim();
    if decoded.is_empty() {
        return None;
    }
    rules
        .iter()
        .find(|rule| rule.matches(decoded))
        .map(|rule| rule.name.clone())
}

/// Best-effort reservoir name → CWMS location code matching.
///
/// When the configured code table has no entry for a reservoir, plausible
/// abbreviations are derived from its display name and looked up in a pool
/// of codes harvested from the CWMS catalog. Results are advisory: naming
/// across districts is not standardized and false positives happen, so the
/// output is meant for manual review before it goes into the code table.
///
/// Precedence, first hit wins:
/// 1. exact (case-insensitive) equality of a variation and a pool code
/// 2. a pool code whose first three characters equal the variation's

use std::collections::{HashMap, HashSet};

use crate::config::MatchingConfig;

/// Variations outside this length range are discarded.
const MIN_CODE_LEN: usize = 3;
const MAX_CODE_LEN: usize = 6;

/// Characters compared by the prefix tier.
const PREFIX_LEN: usize = 3;

// ---------------------------------------------------------------------------
// Candidate pool
// ---------------------------------------------------------------------------

/// A code seen in the catalog, with the office that publishes it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Candidate {
    pub code: String,
    pub namespace: Option<String>,
}

/// Ordered, de-duplicated set of candidate codes.
#[derive(Debug, Clone, Default)]
pub struct CandidatePool {
    entries: Vec<Candidate>,
    seen: HashSet<Candidate>,
}

impl CandidatePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a code if it is alphanumeric, 3..=6 characters, and not already
    /// present under the same namespace. Returns whether it was added.
    pub fn push(&mut self, code: &str, namespace: Option<&str>) -> bool {
        let len = code.chars().count();
        if !(MIN_CODE_LEN..=MAX_CODE_LEN).contains(&len)
            || !code.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return false;
        }

        let candidate = Candidate {
            code: code.to_string(),
            namespace: namespace.map(str::to_string),
        };
        if !self.seen.insert(candidate.clone()) {
            return false;
        }
        self.entries.push(candidate);
        true
    }

    /// Builds a pool from CWMS time-series names.
    ///
    /// `KANO.Elev.Inst.1Hour.0.Best-NWK` contributes `KANO` in `NWK`;
    /// `WILS-Tailwater.Stage...` contributes `WILS`. Locations that are not
    /// plain alphanumeric codes (`Kansas_River`) are skipped.
    pub fn from_timeseries_names<I, T>(names: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut pool = CandidatePool::new();
        for name in names {
            if let Some((code, namespace)) = extract_candidate(name.as_ref()) {
                pool.push(code, namespace);
            }
        }
        pool
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of codes per namespace (`None` for names without an office).
    pub fn namespace_counts(&self) -> HashMap<Option<String>, usize> {
        let mut counts = HashMap::new();
        for c in &self.entries {
            *counts.entry(c.namespace.clone()).or_insert(0) += 1;
        }
        counts
    }
}

/// Location code and office of a time-series name, if it has one.
fn extract_candidate(ts_name: &str) -> Option<(&str, Option<&str>)> {
    let ts_name = ts_name.trim();
    let (location, rest) = ts_name.split_once('.')?;
    if rest.is_empty() {
        return None;
    }
    let code = location.split('-').next().unwrap_or(location);
    let namespace = ts_name.rsplit_once('-').map(|(_, office)| office).filter(|o| !o.is_empty());
    Some((code, namespace))
}

// ---------------------------------------------------------------------------
// Name variations
// ---------------------------------------------------------------------------

/// Uppercases, drops everything but `A-Z` and whitespace, splits into words.
pub fn normalize_words(name: &str) -> Vec<String> {
    let cleaned: String = name
        .to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_uppercase() || c.is_whitespace())
        .collect();
    cleaned.split_whitespace().map(str::to_string).collect()
}

fn prefix(word: &str, n: usize) -> &str {
    // words are ASCII after normalization
    &word[..word.len().min(n)]
}

/// Derives candidate codes from a reservoir name, most specific first.
///
/// `generic_terms` are whole words (e.g. `LAKE`) stripped before deriving a
/// second round of variations; stripping recurses at most `max_depth` times.
pub fn name_variations(name: &str, generic_terms: &[String], max_depth: usize) -> Vec<String> {
    let generic: Vec<String> = generic_terms.iter().map(|t| t.to_uppercase()).collect();
    let mut raw = Vec::new();
    collect_variations(normalize_words(name), &generic, max_depth, &mut raw);

    let mut seen = HashSet::new();
    raw.into_iter()
        .filter(|v| (MIN_CODE_LEN..=MAX_CODE_LEN).contains(&v.len()))
        .filter(|v| seen.insert(v.clone()))
        .collect()
}

fn collect_variations(words: Vec<String>, generic: &[String], depth: usize, out: &mut Vec<String>) {
    let Some(first) = words.first() else { return };

    out.push(prefix(first, 4).to_string());
    out.push(prefix(first, 3).to_string());

    if let Some(second) = words.get(1) {
        let initials: String = words.iter().filter_map(|w| w.chars().next()).collect();
        if initials.len() >= 3 {
            out.push(initials);
        }
        if first.len() >= 3 {
            out.push(format!("{}{}", prefix(first, 3), prefix(second, 1)));
        }
        out.push(format!("{}{}", prefix(first, 2), prefix(second, 2)));
    }

    if depth == 0 {
        return;
    }
    let stripped: Vec<String> = words
        .iter()
        .filter(|w| !generic.contains(w))
        .cloned()
        .collect();
    if !stripped.is_empty() && stripped.len() < words.len() {
        collect_variations(stripped, generic, depth - 1, out);
    }
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    Exact,
    Prefix,
}

impl MatchTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchTier::Exact => "exact",
            MatchTier::Prefix => "prefix",
        }
    }
}

/// The code chosen for a name, and how it was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeMatch {
    pub code: String,
    pub namespace: Option<String>,
    pub tier: MatchTier,
    /// The name variation that produced the hit
    pub variation: String,
}

/// Matches names against a candidate pool.
pub struct CodeMatcher<'a> {
    pool: &'a CandidatePool,
    generic_terms: Vec<String>,
    max_depth: usize,
}

impl<'a> CodeMatcher<'a> {
    pub fn new(pool: &'a CandidatePool, config: &MatchingConfig) -> Self {
        CodeMatcher {
            pool,
            generic_terms: config.generic_terms.clone(),
            max_depth: config.max_strip_depth,
        }
    }

    pub fn variations(&self, name: &str) -> Vec<String> {
        name_variations(name, &self.generic_terms, self.max_depth)
    }

    /// Best-guess code for `name`, or `None` when nothing matches.
    pub fn best_match(&self, name: &str) -> Option<CodeMatch> {
        let variations = self.variations(name);
        log::debug!("{}: trying variations {:?}", name, variations);

        let found = self
            .find(&variations, MatchTier::Exact, |code, v| code.eq_ignore_ascii_case(v))
            .or_else(|| {
                self.find(&variations, MatchTier::Prefix, |code, v| {
                    code.len() <= MAX_CODE_LEN
                        && code.to_ascii_uppercase().starts_with(&v.to_ascii_uppercase()[..PREFIX_LEN])
                })
            });

        match &found {
            Some(m) => log::debug!(
                "{}: {} match {} in {} (from {})",
                name,
                m.tier.as_str(),
                m.code,
                m.namespace.as_deref().unwrap_or("?"),
                m.variation
            ),
            None => log::debug!("{}: no match", name),
        }
        found
    }

    fn find<F>(&self, variations: &[String], tier: MatchTier, hit: F) -> Option<CodeMatch>
    where
        F: Fn(&str, &str) -> bool,
    {
        variations.iter().find_map(|v| {
            self.pool.iter().find(|c| hit(&c.code, v)).map(|c| CodeMatch {
                code: c.code.clone(),
                namespace: c.namespace.clone(),
                tier,
                variation: v.clone(),
            })
        })
    }
}

// ---------------------------------------------------------------------------
// Configured code table
// ---------------------------------------------------------------------------

/// Authoritative reservoir name → code table, taken from configuration.
#[derive(Debug, Clone, Default)]
pub struct CodeTable {
    codes: HashMap<String, String>,
}

impl CodeTable {
    pub fn new(codes: HashMap<String, String>) -> Self {
        CodeTable { codes }
    }

    /// Exact-name lookup.
    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.codes.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

impl FromIterator<(String, String)> for CodeTable {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        CodeTable { codes: iter.into_iter().collect() }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

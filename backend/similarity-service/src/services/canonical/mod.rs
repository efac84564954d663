// ============================================
// Text Canonicalizer & Content Hasher
// ============================================
//
// Builds the deterministic text fed to the embedding provider and the
// fingerprint used to detect content changes.
//
// Canonical text layout (sections omitted when empty):
//   categories: <sorted, deduplicated, normalized>
//   keywords: <sorted, deduplicated, normalized>
//   <description with collapsed whitespace>

use crate::models::{PresentationRecord, UserPreference};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, HashSet};

const DEFAULT_STOPWORDS: &[&str] = &[
    "a", "an", "and", "the", "of", "for", "in", "on", "to", "with", "by", "at", "or",
];

const DEFAULT_ALIASES: &[(&str, &str)] = &[
    ("ai", "artificial intelligence"),
    ("ml", "machine learning"),
    ("healthcare", "health"),
    ("health care", "health"),
    ("ecommerce", "e commerce"),
    ("fintech", "financial technology"),
];

/// Maximum alias hops followed when flattening alias chains
const MAX_ALIAS_HOPS: usize = 8;

/// Immutable stopword / alias tables used by keyword normalization
#[derive(Debug, Clone)]
pub struct NormalizationTables {
    stopwords: HashSet<String>,
    aliases: HashMap<String, String>,
}

impl Default for NormalizationTables {
    fn default() -> Self {
        Self::new(
            DEFAULT_STOPWORDS.iter().map(|s| s.to_string()),
            DEFAULT_ALIASES
                .iter()
                .map(|(from, to)| (from.to_string(), to.to_string())),
        )
    }
}

impl NormalizationTables {
    /// Build tables from raw stopwords and alias pairs.
    ///
    /// Alias keys and targets go through the same cleanup as keywords and
    /// chains (`a -> b -> c`) are flattened to their final target, so that
    /// normalizing an already normalized keyword is a no-op. Cyclic aliases
    /// are dropped.
    pub fn new(
        stopwords: impl IntoIterator<Item = String>,
        aliases: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        let stopwords: HashSet<String> = stopwords
            .into_iter()
            .map(|w| clean_text(&w))
            .filter(|w| !w.is_empty())
            .collect();

        let raw: HashMap<String, String> = aliases
            .into_iter()
            .map(|(from, to)| {
                (
                    strip_stopwords(&clean_text(&from), &stopwords),
                    strip_stopwords(&clean_text(&to), &stopwords),
                )
            })
            .filter(|(from, to)| !from.is_empty() && !to.is_empty() && from != to)
            .collect();

        let mut aliases = HashMap::with_capacity(raw.len());
        for (from, to) in &raw {
            let mut target = to.clone();
            let mut hops = 0;
            while let Some(next) = raw.get(&target) {
                hops += 1;
                if hops > MAX_ALIAS_HOPS || next == from {
                    break;
                }
                target = next.clone();
            }
            if hops <= MAX_ALIAS_HOPS && !raw.contains_key(&target) {
                aliases.insert(from.clone(), target);
            }
        }

        Self { stopwords, aliases }
    }

    pub fn empty() -> Self {
        Self::new(std::iter::empty(), std::iter::empty())
    }
}

/// Pure text canonicalizer; holds only immutable tables
#[derive(Debug, Clone, Default)]
pub struct TextCanonicalizer {
    tables: NormalizationTables,
}

impl TextCanonicalizer {
    pub fn new(tables: NormalizationTables) -> Self {
        Self { tables }
    }

    /// Normalize one category / keyword. Returns an empty string for inputs
    /// that carry no content (only punctuation or stopwords).
    pub fn normalize(&self, raw: &str) -> String {
        let stripped = strip_stopwords(&clean_text(raw), &self.tables.stopwords);
        match self.tables.aliases.get(&stripped) {
            Some(target) => target.clone(),
            None => stripped,
        }
    }

    /// Normalized, deduplicated, sorted terms
    pub fn normalize_set<'a, I>(&self, terms: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        terms
            .into_iter()
            .map(|t| self.normalize(t))
            .filter(|t| !t.is_empty())
            .collect()
    }

    pub fn canonicalize_parts(
        &self,
        categories: &[String],
        keywords: &[String],
        description: Option<&str>,
    ) -> String {
        let categories = self.normalize_set(categories);
        let keywords = self.normalize_set(keywords);
        let description = description.map(collapse_whitespace).unwrap_or_default();

        let mut sections: Vec<String> = Vec::with_capacity(3);
        if !categories.is_empty() {
            sections.push(format!("categories: {}", join(&categories)));
        }
        if !keywords.is_empty() {
            sections.push(format!("keywords: {}", join(&keywords)));
        }
        if !description.is_empty() {
            sections.push(description);
        }
        sections.join("\n")
    }

    pub fn canonicalize_presentation(&self, presentation: &PresentationRecord) -> String {
        self.canonicalize_parts(
            &presentation.categories,
            &presentation.keywords,
            presentation.description.as_deref(),
        )
    }

    /// Text for a user embedding: the names in the bounded profile, not the
    /// weights, so weight drift alone does not trigger a recompute.
    pub fn canonicalize_preference(&self, preference: &UserPreference) -> String {
        let categories: Vec<String> = preference.fav_categories.keys().cloned().collect();
        let keywords: Vec<String> = preference.fav_keywords.keys().cloned().collect();
        self.canonicalize_parts(&categories, &keywords, None)
    }
}

/// SHA-256 hex fingerprint of canonical text
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

fn clean_text(raw: &str) -> String {
    let lowered: String = raw
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_stopwords(cleaned: &str, stopwords: &HashSet<String>) -> String {
    cleaned
        .split(' ')
        .filter(|token| !token.is_empty() && !stopwords.contains(*token))
        .collect::<Vec<_>>()
        .join(" ")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn join(terms: &BTreeSet<String>) -> String {
    terms.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

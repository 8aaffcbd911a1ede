use super::normalize::{Keyword, matching};
use crate::taxonomy::CategoryId;
use std::collections::BTreeSet;

#[derive(Debug, Clone)]
pub struct FallbackEntry {
    pub category_id: CategoryId,
    pub keywords: Vec<Keyword>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FallbackMatch {
    pub category_id: CategoryId,
    pub confidence: f64,
    pub matched: Vec<String>,
}

impl FallbackMatch {
    pub fn reasoning(&self) -> String {
        format!("fallback match: {}", self.matched.join(", "))
    }
}

/// Ordered, first-match-wins table consulted when nothing clears the minimum confidence.
#[derive(Debug, Clone, Default)]
pub struct FallbackTable {
    entries: Vec<FallbackEntry>,
}

impl FallbackTable {
    pub fn new(entries: Vec<FallbackEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[FallbackEntry] {
        &self.entries
    }

    /// Scans the normalized title only. `usable` filters out sanity-blocked and unknown ids.
    pub fn lookup(
        &self,
        title: &str,
        usable: impl Fn(CategoryId) -> bool,
    ) -> Option<FallbackMatch> {
        if title.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .filter(|entry| usable(entry.category_id))
            .find_map(|entry| {
                let matched = matching(&entry.keywords, title);
                (!matched.is_empty()).then(|| FallbackMatch {
                    category_id: entry.category_id,
                    confidence: fallback_confidence(matched.len()),
                    matched: matched.into_iter().map(str::to_string).collect(),
                })
            })
    }

    pub fn referenced_categories(&self) -> BTreeSet<CategoryId> {
        self.entries.iter().map(|entry| entry.category_id).collect()
    }
}

// 0.3 + 0.1 per extra match, in tenths so 0.3 + 0.1 stays 0.4 exactly.
fn fallback_confidence(matches: usize) -> f64 {
    let tenths = (2 + matches).min(10);
    tenths as f64 / 10.0
}

use crate::engine::normalize::{Keyword, KeywordError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use thiserror::Error;
use tracing::info;

pub type CategoryId = u32;

const EMBEDDED_TAXONOMY: &str = include_str!("../data/taxonomy.yaml");

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("unable to read taxonomy from {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("taxonomy yaml is malformed: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("taxonomy has no categories")]
    Empty,
    #[error("duplicate category id {0}")]
    DuplicateId(CategoryId),
    #[error("duplicate category slug `{0}`")]
    DuplicateSlug(String),
    #[error("category {0} must have a non-empty slug")]
    MissingSlug(CategoryId),
    #[error("category {id} has {found} localized name(s), at least 2 are required")]
    MissingNames { id: CategoryId, found: usize },
    #[error("category {id} references unknown parent {parent_id}")]
    UnknownParent {
        id: CategoryId,
        parent_id: CategoryId,
    },
    #[error("category {0} is its own parent")]
    SelfParent(CategoryId),
    #[error("parent links of category {0} form a cycle")]
    ParentCycle(CategoryId),
    #[error("taxonomy has no top-level categories to classify into")]
    NoClassifiable,
    #[error("category {0} is classifiable but has no keywords")]
    NoKeywords(CategoryId),
    #[error("keywords supplied for unknown category {0}")]
    UnknownCategory(CategoryId),
    #[error("invalid keyword for category {id}: {source}")]
    Keyword {
        id: CategoryId,
        #[source]
        source: KeywordError,
    },
}

/// Immutable taxonomy entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub slug: String,
    /// Locale code to display name.
    pub names: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<CategoryId>,
}

impl Category {
    pub fn name(&self, locale: &str) -> &str {
        self.names
            .get(locale)
            .or_else(|| self.names.values().next())
            .map(String::as_str)
            .unwrap_or(&self.slug)
    }

    /// Only top-level categories are scored.
    pub fn is_classifiable(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Read-only view the engine scores against.
pub trait TaxonomyProvider {
    fn list_categories(&self) -> &[Category];
    fn keywords_for(&self, id: CategoryId) -> &[Keyword];
}

#[derive(Debug, Deserialize)]
struct SnapshotDocument {
    version: String,
    #[serde(default = "default_locale")]
    default_locale: String,
    categories: Vec<CategoryDocument>,
    /// Extra keyword sets keyed by category id, appended after the inline lists.
    #[serde(default)]
    keywords: BTreeMap<CategoryId, Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct CategoryDocument {
    id: CategoryId,
    slug: String,
    names: BTreeMap<String, String>,
    #[serde(default)]
    parent_id: Option<CategoryId>,
    #[serde(default)]
    keywords: Vec<String>,
}

fn default_locale() -> String {
    "th".to_string()
}

/// Validated taxonomy plus its KeywordSet.
#[derive(Debug, Clone)]
pub struct TaxonomySnapshot {
    version: String,
    default_locale: String,
    categories: Vec<Category>,
    keywords: BTreeMap<CategoryId, Vec<Keyword>>,
}

impl TaxonomySnapshot {
    pub fn embedded() -> Result<Self, SnapshotError> {
        Self::from_yaml(EMBEDDED_TAXONOMY)
    }

    pub fn from_path(path: &Path) -> Result<Self, SnapshotError> {
        let raw = std::fs::read_to_string(path).map_err(|source| SnapshotError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, SnapshotError> {
        let document: SnapshotDocument = serde_yaml::from_str(raw)?;
        let snapshot = Self::build(document)?;
        info!(
            target = "classifier.taxonomy",
            version = %snapshot.version,
            categories = snapshot.categories.len(),
            keywords = snapshot.keyword_count(),
            "taxonomy snapshot validated"
        );
        Ok(snapshot)
    }

    fn build(document: SnapshotDocument) -> Result<Self, SnapshotError> {
        if document.categories.is_empty() {
            return Err(SnapshotError::Empty);
        }

        let mut slugs = BTreeSet::new();
        let mut categories = Vec::with_capacity(document.categories.len());
        let mut keywords: BTreeMap<CategoryId, Vec<Keyword>> = BTreeMap::new();

        for entry in document.categories {
            if keywords.contains_key(&entry.id) {
                return Err(SnapshotError::DuplicateId(entry.id));
            }
            let slug = entry.slug.trim().to_string();
            if slug.is_empty() {
                return Err(SnapshotError::MissingSlug(entry.id));
            }
            if !slugs.insert(slug.clone()) {
                return Err(SnapshotError::DuplicateSlug(slug));
            }
            let names: BTreeMap<String, String> = entry
                .names
                .into_iter()
                .filter(|(_, name)| !name.trim().is_empty())
                .collect();
            if names.len() < 2 {
                return Err(SnapshotError::MissingNames {
                    id: entry.id,
                    found: names.len(),
                });
            }
            keywords.insert(entry.id, compile(entry.id, &entry.keywords)?);
            categories.push(Category {
                id: entry.id,
                slug,
                names,
                parent_id: entry.parent_id,
            });
        }

        for (id, extra) in &document.keywords {
            let Some(list) = keywords.get_mut(id) else {
                return Err(SnapshotError::UnknownCategory(*id));
            };
            list.extend(compile(*id, extra)?);
        }

        let parents: BTreeMap<CategoryId, Option<CategoryId>> = categories
            .iter()
            .map(|category| (category.id, category.parent_id))
            .collect();
        for category in &categories {
            if let Some(parent_id) = category.parent_id {
                if parent_id == category.id {
                    return Err(SnapshotError::SelfParent(category.id));
                }
                if !parents.contains_key(&parent_id) {
                    return Err(SnapshotError::UnknownParent {
                        id: category.id,
                        parent_id,
                    });
                }
            }
            if category.is_classifiable()
                && keywords.get(&category.id).is_none_or(Vec::is_empty)
            {
                return Err(SnapshotError::NoKeywords(category.id));
            }
        }

        for category in &categories {
            check_ancestry(category.id, &parents)?;
        }
        if !categories.iter().any(Category::is_classifiable) {
            return Err(SnapshotError::NoClassifiable);
        }

        categories.sort_by_key(|category| category.id);
        Ok(Self {
            version: document.version,
            default_locale: document.default_locale,
            categories,
            keywords,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn default_locale(&self) -> &str {
        &self.default_locale
    }

    pub fn category(&self, id: CategoryId) -> Option<&Category> {
        self.categories
            .binary_search_by_key(&id, |category| category.id)
            .ok()
            .map(|idx| &self.categories[idx])
    }

    pub fn contains(&self, id: CategoryId) -> bool {
        self.category(id).is_some()
    }

    pub fn display_name(&self, id: CategoryId) -> String {
        self.category(id)
            .map(|category| category.name(&self.default_locale).to_string())
            .unwrap_or_else(|| id.to_string())
    }

    pub fn keyword_count(&self) -> usize {
        self.keywords.values().map(Vec::len).sum()
    }
}

/// Walks up from `id`; a chain longer than the taxonomy means it loops.
fn check_ancestry(
    id: CategoryId,
    parents: &BTreeMap<CategoryId, Option<CategoryId>>,
) -> Result<(), SnapshotError> {
    let mut current = id;
    for _ in 0..parents.len() {
        match parents.get(&current).copied().flatten() {
            Some(parent_id) => current = parent_id,
            None => return Ok(()),
        }
    }
    Err(SnapshotError::ParentCycle(id))
}

fn compile(id: CategoryId, raw: &[String]) -> Result<Vec<Keyword>, SnapshotError> {
    raw.iter()
        .map(|kw| Keyword::parse(kw).map_err(|source| SnapshotError::Keyword { id, source }))
        .collect()
}

impl TaxonomyProvider for TaxonomySnapshot {
    fn list_categories(&self) -> &[Category] {
        &self.categories
    }

    fn keywords_for(&self, id: CategoryId) -> &[Keyword] {
        self.keywords.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }
}

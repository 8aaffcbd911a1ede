use super::advanced::{
    AdvancedRules, BrandContext, BrandRule, DomainValidator, Exclusion, WeightedPattern,
};
use super::context::{ClusterRule, ContextGroup};
use super::fallback::{FallbackEntry, FallbackTable};
use super::normalize::{Keyword, KeywordError};
use super::sanity::{SanityRule, SanityRules};
use super::scorer::ScoringWeights;
use crate::taxonomy::{CategoryId, TaxonomySnapshot};
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;
use tracing::info;

const EMBEDDED_RULES: &str = include_str!("../../data/rules.yaml");

#[derive(Debug, Error)]
pub enum RuleSetError {
    #[error("unable to read rules from {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("rules yaml is malformed: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid keyword in {section}: {source}")]
    Keyword {
        section: String,
        #[source]
        source: KeywordError,
    },
    #[error("invalid pattern `{pattern}` in {section}: {source}")]
    Pattern {
        section: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("{name} must be within [0, 1], got {value}")]
    Threshold { name: &'static str, value: f64 },
    #[error("invalid rule set: {0}")]
    Invalid(String),
    #[error("{section} references category {id}, which is not in taxonomy {taxonomy}")]
    UnknownCategory {
        section: String,
        id: CategoryId,
        taxonomy: String,
    },
    #[error("{section} targets category {id}, which is a subcategory and never classified")]
    NotClassifiable { section: String, id: CategoryId },
}

/// Minimum-confidence levels shipped with the rules; the environment may override them.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct MinimumConfidence {
    pub default: f64,
    pub high_risk: f64,
}

impl Default for MinimumConfidence {
    fn default() -> Self {
        Self {
            default: 0.5,
            high_risk: 0.7,
        }
    }
}

/// Compiled, internally consistent rule tables. Bound to a taxonomy by `Engine::new`.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub version: String,
    pub weights: ScoringWeights,
    pub minimum_confidence: MinimumConfidence,
    pub sanity: SanityRules,
    pub clusters: Vec<ClusterRule>,
    pub fallback: FallbackTable,
    pub advanced: AdvancedRules,
}

impl RuleSet {
    pub fn embedded() -> Result<Self, RuleSetError> {
        Self::from_yaml(EMBEDDED_RULES)
    }

    pub fn from_path(path: &Path) -> Result<Self, RuleSetError> {
        let raw = std::fs::read_to_string(path).map_err(|source| RuleSetError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, RuleSetError> {
        let document: RulesDocument = serde_yaml::from_str(raw)?;
        let rules = document.compile()?;
        info!(
            target = "classifier.engine",
            version = %rules.version,
            sanity_rules = rules.sanity.rules().len(),
            clusters = rules.clusters.len(),
            fallback_entries = rules.fallback.entries().len(),
            "rule set compiled"
        );
        Ok(rules)
    }

    /// Every category id the tables mention must exist in `taxonomy`; ids the
    /// tables can score or recommend must also be classifiable.
    pub fn check_against(&self, taxonomy: &TaxonomySnapshot) -> Result<(), RuleSetError> {
        let known = |section: String, id: CategoryId| -> Result<(), RuleSetError> {
            if taxonomy.contains(id) {
                Ok(())
            } else {
                Err(RuleSetError::UnknownCategory {
                    section,
                    id,
                    taxonomy: taxonomy.version().to_string(),
                })
            }
        };
        let target = |section: String, id: CategoryId| -> Result<(), RuleSetError> {
            match taxonomy.category(id) {
                Some(category) if !category.is_classifiable() => {
                    Err(RuleSetError::NotClassifiable { section, id })
                }
                _ => known(section, id),
            }
        };

        for rule in self.sanity.rules() {
            for id in &rule.forbidden_categories {
                known(format!("sanity_rules.{}", rule.name), *id)?;
            }
        }
        for cluster in &self.clusters {
            for id in cluster.referenced_categories() {
                target(format!("clusters.{}", cluster.name), id)?;
            }
        }
        for id in self.fallback.referenced_categories() {
            target("fallback".to_string(), id)?;
        }
        for (section, id) in self.advanced.referenced_categories() {
            target(section, id)?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RulesDocument {
    version: String,
    #[serde(default)]
    weights: ScoringWeights,
    #[serde(default)]
    minimum_confidence: MinimumConfidence,
    #[serde(default)]
    sanity_rules: Vec<SanityDocument>,
    #[serde(default)]
    clusters: Vec<ClusterDocument>,
    #[serde(default)]
    fallback: Vec<KeywordTableDocument>,
    #[serde(default)]
    advanced: AdvancedDocument,
}

#[derive(Debug, Deserialize)]
struct SanityDocument {
    name: String,
    forbidden_categories: BTreeSet<CategoryId>,
    keywords: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ClusterDocument {
    name: String,
    triggers: Vec<String>,
    #[serde(default)]
    contexts: Vec<ContextDocument>,
    default_category: CategoryId,
    default_boost: f64,
    #[serde(default)]
    penalized_categories: Vec<CategoryId>,
    #[serde(default)]
    penalty: f64,
}

#[derive(Debug, Deserialize)]
struct ContextDocument {
    name: String,
    category_id: CategoryId,
    boost: f64,
    keywords: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct KeywordTableDocument {
    category_id: CategoryId,
    keywords: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct AdvancedDocument {
    brand_boost: f64,
    exclusion_penalty: f64,
    validator_override: f64,
    confidence_scale: f64,
    brands: Vec<BrandDocument>,
    patterns: Vec<PatternDocument>,
    use_cases: Vec<PatternDocument>,
    exclusions: Vec<KeywordTableDocument>,
    validators: Vec<ValidatorDocument>,
}

impl Default for AdvancedDocument {
    fn default() -> Self {
        Self {
            brand_boost: 100.0,
            exclusion_penalty: 200.0,
            validator_override: 150.0,
            confidence_scale: 300.0,
            brands: Vec::new(),
            patterns: Vec::new(),
            use_cases: Vec::new(),
            exclusions: Vec::new(),
            validators: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct BrandDocument {
    brand: String,
    contexts: Vec<BrandContextDocument>,
}

#[derive(Debug, Deserialize)]
struct BrandContextDocument {
    name: String,
    category_id: CategoryId,
    keywords: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PatternDocument {
    name: String,
    weight: f64,
    categories: Vec<CategoryId>,
    keywords: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ValidatorDocument {
    category_id: CategoryId,
    min_checks: usize,
    checks: Vec<String>,
}

impl RulesDocument {
    fn compile(self) -> Result<RuleSet, RuleSetError> {
        let problems = self.weights.problems();
        if !problems.is_empty() {
            return Err(RuleSetError::Invalid(format!(
                "weights: {}",
                problems.join("; ")
            )));
        }
        check_threshold("minimum_confidence.default", self.minimum_confidence.default)?;
        check_threshold(
            "minimum_confidence.high_risk",
            self.minimum_confidence.high_risk,
        )?;

        let sanity = self
            .sanity_rules
            .into_iter()
            .map(|rule| {
                let section = format!("sanity_rules.{}", rule.name);
                Ok(SanityRule {
                    keywords: keywords(&section, &rule.keywords)?,
                    forbidden_categories: rule.forbidden_categories,
                    name: rule.name,
                })
            })
            .collect::<Result<Vec<_>, RuleSetError>>()?;

        let clusters = self
            .clusters
            .into_iter()
            .map(ClusterDocument::compile)
            .collect::<Result<Vec<_>, _>>()?;

        let fallback = self
            .fallback
            .into_iter()
            .enumerate()
            .map(|(idx, entry)| {
                Ok(FallbackEntry {
                    category_id: entry.category_id,
                    keywords: keywords(&format!("fallback[{idx}]"), &entry.keywords)?,
                })
            })
            .collect::<Result<Vec<_>, RuleSetError>>()?;

        Ok(RuleSet {
            version: self.version,
            weights: self.weights,
            minimum_confidence: self.minimum_confidence,
            sanity: SanityRules::new(sanity),
            clusters,
            fallback: FallbackTable::new(fallback),
            advanced: self.advanced.compile()?,
        })
    }
}

impl ClusterDocument {
    fn compile(self) -> Result<ClusterRule, RuleSetError> {
        let section = format!("clusters.{}", self.name);
        if self.triggers.is_empty() {
            return Err(RuleSetError::Invalid(format!("{section} has no triggers")));
        }
        if !(self.penalty.is_finite() && self.penalty >= 0.0) {
            return Err(RuleSetError::Invalid(format!(
                "{section}: penalty must be a non-negative number"
            )));
        }
        let contexts = self
            .contexts
            .into_iter()
            .map(|group| {
                Ok(ContextGroup {
                    keywords: keywords(&format!("{section}.{}", group.name), &group.keywords)?,
                    name: group.name,
                    category_id: group.category_id,
                    boost: group.boost,
                })
            })
            .collect::<Result<Vec<_>, RuleSetError>>()?;
        Ok(ClusterRule {
            triggers: keywords(&section, &self.triggers)?,
            name: self.name,
            contexts,
            default_category: self.default_category,
            default_boost: self.default_boost,
            penalized_categories: self.penalized_categories,
            penalty: self.penalty,
        })
    }
}

impl AdvancedDocument {
    fn compile(self) -> Result<AdvancedRules, RuleSetError> {
        if !(self.confidence_scale.is_finite() && self.confidence_scale > 0.0) {
            return Err(RuleSetError::Invalid(
                "advanced.confidence_scale must be positive".to_string(),
            ));
        }

        let brands = self
            .brands
            .into_iter()
            .map(|brand| {
                let section = format!("advanced.brands.{}", brand.brand);
                let contexts = brand
                    .contexts
                    .into_iter()
                    .map(|ctx| {
                        Ok(BrandContext {
                            keywords: keywords(&format!("{section}.{}", ctx.name), &ctx.keywords)?,
                            name: ctx.name,
                            category_id: ctx.category_id,
                        })
                    })
                    .collect::<Result<Vec<_>, RuleSetError>>()?;
                Ok(BrandRule {
                    brand: Keyword::parse(&brand.brand)
                        .map_err(|source| RuleSetError::Keyword { section, source })?,
                    contexts,
                })
            })
            .collect::<Result<Vec<_>, RuleSetError>>()?;

        let exclusions = self
            .exclusions
            .into_iter()
            .map(|entry| {
                let section = format!("advanced.exclusions.{}", entry.category_id);
                Ok(Exclusion {
                    category_id: entry.category_id,
                    keywords: keywords(&section, &entry.keywords)?,
                })
            })
            .collect::<Result<Vec<_>, RuleSetError>>()?;

        let validators = self
            .validators
            .into_iter()
            .map(|validator| {
                let section = format!("advanced.validators.{}", validator.category_id);
                let checks = validator
                    .checks
                    .iter()
                    .map(|pattern| {
                        Regex::new(pattern).map_err(|source| RuleSetError::Pattern {
                            section: section.clone(),
                            pattern: pattern.clone(),
                            source,
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                if validator.min_checks > checks.len() {
                    return Err(RuleSetError::Invalid(format!(
                        "{section}: min_checks {} exceeds {} checks",
                        validator.min_checks,
                        checks.len()
                    )));
                }
                Ok(DomainValidator {
                    category_id: validator.category_id,
                    min_checks: validator.min_checks,
                    checks,
                })
            })
            .collect::<Result<Vec<_>, RuleSetError>>()?;

        Ok(AdvancedRules {
            brand_boost: self.brand_boost,
            exclusion_penalty: self.exclusion_penalty,
            validator_override: self.validator_override,
            confidence_scale: self.confidence_scale,
            brands,
            patterns: compile_patterns("advanced.patterns", self.patterns)?,
            use_cases: compile_patterns("advanced.use_cases", self.use_cases)?,
            exclusions,
            validators,
        })
    }
}

fn compile_patterns(
    section: &str,
    patterns: Vec<PatternDocument>,
) -> Result<Vec<WeightedPattern>, RuleSetError> {
    patterns
        .into_iter()
        .map(|pattern| {
            Ok(WeightedPattern {
                keywords: keywords(&format!("{section}.{}", pattern.name), &pattern.keywords)?,
                name: pattern.name,
                weight: pattern.weight,
                categories: pattern.categories,
            })
        })
        .collect()
}

fn keywords(section: &str, raw: &[String]) -> Result<Vec<Keyword>, RuleSetError> {
    raw.iter()
        .map(|kw| {
            Keyword::parse(kw).map_err(|source| RuleSetError::Keyword {
                section: section.to_string(),
                source,
            })
        })
        .collect()
}

fn check_threshold(name: &'static str, value: f64) -> Result<(), RuleSetError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(RuleSetError::Threshold { name, value })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::taxonomy::tests::MINI_TAXONOMY;

    /// Small rule set matching the mini taxonomy (automotive 1, computers 4, cameras 8).
    pub(crate) const MINI_RULES: &str = r#"
version: "mini-rules"
sanity_rules:
  - name: printers
    forbidden_categories: [8]
    keywords: ["printer"]
clusters:
  - name: printer
    triggers: ["printer"]
    default_category: 4
    default_boost: 150
    penalized_categories: [8]
    penalty: 300
fallback:
  - category_id: 1
    keywords: ["honda"]
  - category_id: 8
    keywords: ["กล้อง", "lens"]
"#;

    #[test]
    fn embedded_rules_compile_and_match_embedded_taxonomy() {
        let rules = RuleSet::embedded().expect("embedded rules");
        let taxonomy = TaxonomySnapshot::embedded().expect("embedded taxonomy");
        rules.check_against(&taxonomy).expect("consistent");
        assert_eq!(rules.weights, ScoringWeights::default());
        assert_eq!(rules.minimum_confidence, MinimumConfidence::default());
        assert_eq!(rules.clusters.len(), 3);
        assert_eq!(rules.advanced.confidence_scale, 300.0);
        assert_eq!(rules.advanced.brands[0].brand.text(), "canon");
    }

    #[test]
    fn omitted_sections_take_defaults() {
        let rules = RuleSet::from_yaml("version: bare\n").expect("rules");
        assert_eq!(rules.weights, ScoringWeights::default());
        assert!(rules.clusters.is_empty());
        assert_eq!(rules.advanced.brand_boost, 100.0);
        assert_eq!(rules.advanced.validator_override, 150.0);
    }

    #[test]
    fn rejects_thresholds_outside_unit_interval() {
        let raw = "version: v\nminimum_confidence: { default: 1.5 }\n";
        assert!(matches!(
            RuleSet::from_yaml(raw),
            Err(RuleSetError::Threshold {
                name: "minimum_confidence.default",
                ..
            })
        ));
    }

    #[test]
    fn rejects_invalid_validator_regex() {
        let raw = r#"
version: v
advanced:
  validators:
    - category_id: 8
      min_checks: 1
      checks: ["(unclosed"]
"#;
        let err = RuleSet::from_yaml(raw).expect_err("bad regex");
        assert!(matches!(err, RuleSetError::Pattern { ref pattern, .. } if pattern == "(unclosed"));
    }

    #[test]
    fn rejects_blank_keywords_with_section() {
        let raw = r#"
version: v
sanity_rules:
  - name: toys
    forbidden_categories: [4]
    keywords: ["doll", " "]
"#;
        let err = RuleSet::from_yaml(raw).expect_err("blank keyword");
        assert!(matches!(err, RuleSetError::Keyword { ref section, .. } if section == "sanity_rules.toys"));
    }

    #[test]
    fn rejects_inconsistent_weights() {
        let raw = "version: v\nweights:\n  title: { exact: 5, substring: 8, cap: 35, name_bonus: 20 }\n";
        assert!(matches!(RuleSet::from_yaml(raw), Err(RuleSetError::Invalid(_))));
    }

    #[test]
    fn unknown_category_reference_is_reported_against_taxonomy() {
        let taxonomy = TaxonomySnapshot::from_yaml(MINI_TAXONOMY).expect("mini");
        RuleSet::from_yaml(MINI_RULES)
            .expect("mini rules")
            .check_against(&taxonomy)
            .expect("consistent");

        let embedded = RuleSet::embedded().expect("embedded rules");
        let err = embedded.check_against(&taxonomy).expect_err("mismatch");
        assert!(matches!(err, RuleSetError::UnknownCategory { ref taxonomy, .. } if taxonomy == "mini-1"));
    }

    const TAXONOMY_WITH_CHILD: &str = r#"
version: "with-child"
categories:
  - { id: 1, slug: automotive, names: { th: "ยานยนต์", en: "Automotive" }, keywords: ["car"] }
  - { id: 8, slug: cameras, names: { th: "กล้อง", en: "Cameras" }, keywords: ["camera"] }
  - { id: 81, slug: dashcams, names: { th: "กล้องติดรถ", en: "Dashcams" }, parent_id: 8 }
"#;

    #[test]
    fn fallback_targeting_a_subcategory_is_rejected() {
        let taxonomy = TaxonomySnapshot::from_yaml(TAXONOMY_WITH_CHILD).expect("taxonomy");
        let rules = RuleSet::from_yaml(
            "version: v\nfallback:\n  - category_id: 81\n    keywords: [\"dashcam\"]\n",
        )
        .expect("rules");
        let err = rules.check_against(&taxonomy).expect_err("subcategory target");
        assert!(matches!(
            err,
            RuleSetError::NotClassifiable { ref section, id: 81 } if section == "fallback"
        ));
    }

    #[test]
    fn cluster_targeting_a_subcategory_is_rejected_but_sanity_may_forbid_one() {
        let taxonomy = TaxonomySnapshot::from_yaml(TAXONOMY_WITH_CHILD).expect("taxonomy");
        let cluster = r#"
version: v
clusters:
  - name: dashcam
    triggers: ["dashcam"]
    default_category: 81
    default_boost: 100
"#;
        let err = RuleSet::from_yaml(cluster)
            .expect("rules")
            .check_against(&taxonomy)
            .expect_err("subcategory target");
        assert!(matches!(err, RuleSetError::NotClassifiable { id: 81, .. }));

        let sanity = r#"
version: v
sanity_rules:
  - name: cars
    forbidden_categories: [81]
    keywords: ["car"]
"#;
        RuleSet::from_yaml(sanity)
            .expect("rules")
            .check_against(&taxonomy)
            .expect("forbidding a subcategory is harmless");
    }
}

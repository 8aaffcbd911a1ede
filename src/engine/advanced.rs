use super::normalize::{Keyword, NormalizedInput, any_occurs, matching};
use super::strategy::ScoringStrategy;
use super::{CategoryScore, ScoringContext, StrategyKind, cap_score, to_confidence};
use crate::taxonomy::{CategoryId, TaxonomyProvider};
use regex::Regex;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct BrandContext {
    pub name: String,
    pub category_id: CategoryId,
    pub keywords: Vec<Keyword>,
}

/// A brand whose products span categories; the context keywords decide which.
#[derive(Debug, Clone)]
pub struct BrandRule {
    pub brand: Keyword,
    pub contexts: Vec<BrandContext>,
}

#[derive(Debug, Clone)]
pub struct WeightedPattern {
    pub name: String,
    pub weight: f64,
    pub categories: Vec<CategoryId>,
    pub keywords: Vec<Keyword>,
}

#[derive(Debug, Clone)]
pub struct Exclusion {
    pub category_id: CategoryId,
    pub keywords: Vec<Keyword>,
}

#[derive(Debug, Clone)]
pub struct DomainValidator {
    pub category_id: CategoryId,
    pub min_checks: usize,
    pub checks: Vec<Regex>,
}

impl DomainValidator {
    pub fn passed_checks(&self, text: &str) -> usize {
        self.checks.iter().filter(|check| check.is_match(text)).count()
    }
}

#[derive(Debug, Clone)]
pub struct AdvancedRules {
    pub brand_boost: f64,
    pub exclusion_penalty: f64,
    pub validator_override: f64,
    pub confidence_scale: f64,
    pub brands: Vec<BrandRule>,
    pub patterns: Vec<WeightedPattern>,
    pub use_cases: Vec<WeightedPattern>,
    pub exclusions: Vec<Exclusion>,
    pub validators: Vec<DomainValidator>,
}

impl AdvancedRules {
    pub fn referenced_categories(&self) -> Vec<(String, CategoryId)> {
        let mut refs = Vec::new();
        for brand in &self.brands {
            for ctx in &brand.contexts {
                refs.push((
                    format!("advanced.brands.{}.{}", brand.brand.text(), ctx.name),
                    ctx.category_id,
                ));
            }
        }
        for (section, table) in [
            ("advanced.patterns", &self.patterns),
            ("advanced.use_cases", &self.use_cases),
        ] {
            for pattern in table {
                for id in &pattern.categories {
                    refs.push((format!("{section}.{}", pattern.name), *id));
                }
            }
        }
        for exclusion in &self.exclusions {
            refs.push(("advanced.exclusions".to_string(), exclusion.category_id));
        }
        for validator in &self.validators {
            refs.push(("advanced.validators".to_string(), validator.category_id));
        }
        refs
    }
}

#[derive(Debug, Default)]
struct Signals {
    score: f64,
    notes: Vec<String>,
}

impl Signals {
    fn add(&mut self, points: f64, note: String) {
        self.score += points;
        self.notes.push(note);
    }
}

/// Brand/model extraction, bilingual patterns, use-case clusters, exclusions and
/// per-category domain validators over `title + " " + description`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdvancedScorer;

impl AdvancedScorer {
    fn brand_context<'r>(
        rules: &'r AdvancedRules,
        text: &str,
    ) -> Option<(&'r BrandRule, &'r BrandContext)> {
        rules
            .brands
            .iter()
            .filter(|brand| brand.brand.occurs_in(text))
            .find_map(|brand| {
                brand
                    .contexts
                    .iter()
                    .find(|ctx| any_occurs(&ctx.keywords, text))
                    .map(|ctx| (brand, ctx))
            })
    }

    fn use_case<'r>(rules: &'r AdvancedRules, text: &str) -> Option<(&'r WeightedPattern, usize)> {
        let mut best: Option<(&WeightedPattern, usize, f64)> = None;
        for case in &rules.use_cases {
            let hits = matching(&case.keywords, text).len();
            if hits < 2 {
                continue;
            }
            let score = hits as f64 * case.weight;
            if best.is_none_or(|(_, _, top)| score > top) {
                best = Some((case, hits, score));
            }
        }
        best.map(|(case, hits, _)| (case, hits))
    }
}

impl ScoringStrategy for AdvancedScorer {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Advanced
    }

    fn score(&self, ctx: &ScoringContext<'_>, input: &NormalizedInput) -> Vec<CategoryScore> {
        let rules = &ctx.rules.advanced;
        let text = input.text.as_str();
        let mut signals: BTreeMap<CategoryId, Signals> = BTreeMap::new();

        if let Some((brand, context)) = Self::brand_context(rules, text) {
            signals.entry(context.category_id).or_default().add(
                rules.brand_boost,
                format!(
                    "brand {} ({}) +{}",
                    brand.brand.text(),
                    context.name,
                    rules.brand_boost
                ),
            );
        }

        for pattern in &rules.patterns {
            let hits = matching(&pattern.keywords, text).len();
            if hits == 0 {
                continue;
            }
            let points = hits as f64 * pattern.weight;
            for id in &pattern.categories {
                signals
                    .entry(*id)
                    .or_default()
                    .add(points, format!("pattern {} x{hits} +{points}", pattern.name));
            }
        }

        if let Some((case, hits)) = Self::use_case(rules, text) {
            for id in &case.categories {
                signals.entry(*id).or_default().add(
                    case.weight,
                    format!("use case {} ({hits} hits) +{}", case.name, case.weight),
                );
            }
        }

        for exclusion in &rules.exclusions {
            if any_occurs(&exclusion.keywords, text) {
                signals.entry(exclusion.category_id).or_default().add(
                    -rules.exclusion_penalty,
                    format!("excluded -{}", rules.exclusion_penalty),
                );
            }
        }

        ctx.taxonomy
            .list_categories()
            .iter()
            .filter(|category| category.is_classifiable())
            .map(|category| {
                let Signals { score, mut notes } =
                    signals.remove(&category.id).unwrap_or_default();
                let mut confidence = to_confidence(score, rules.confidence_scale);

                if let Some(validator) = rules
                    .validators
                    .iter()
                    .find(|validator| validator.category_id == category.id)
                {
                    let passed = validator.passed_checks(text);
                    if score < rules.validator_override && passed < validator.min_checks {
                        if score > 0.0 {
                            notes.push("failed domain validation".to_string());
                        }
                        confidence = 0.0;
                    } else if score > 0.0 {
                        notes.push(format!(
                            "domain validation {passed}/{} checks",
                            validator.checks.len()
                        ));
                    }
                }

                CategoryScore {
                    category_id: category.id,
                    raw_score: cap_score(score, rules.confidence_scale),
                    confidence,
                    violates_sanity: false,
                    reasoning: notes,
                }
            })
            .collect()
    }
}

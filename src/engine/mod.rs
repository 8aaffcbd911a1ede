//! Category decision engine: normalize, score, disambiguate, apply sanity rules, decide.

pub mod advanced;
pub mod context;
pub mod decision;
pub mod fallback;
pub mod normalize;
pub mod rules;
pub mod sanity;
pub mod scorer;
pub mod strategy;

use crate::taxonomy::{CategoryId, SnapshotError, TaxonomyProvider, TaxonomySnapshot};
pub use decision::{ConfidenceLabel, DecisionPolicy, PolicyOverrides, confidence_label};
use normalize::NormalizedInput;
use rules::{RuleSet, RuleSetError};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
pub use strategy::{BaselineScorer, ScoringStrategy, strategy_for};
use thiserror::Error;
use tracing::{debug, info};

/// One listing to classify. Missing fields are treated as empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationInput {
    pub title: String,
    pub description: String,
    pub detected_objects: Vec<String>,
    pub image_analysis: Option<String>,
    pub current_category_id: Option<CategoryId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Baseline,
    Advanced,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Baseline => "baseline",
            StrategyKind::Advanced => "advanced",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-category intermediate result of one classification call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryScore {
    pub category_id: CategoryId,
    /// Score after cluster adjustments or advanced signals, capped to `[0, scale]`.
    pub raw_score: f64,
    pub confidence: f64,
    pub violates_sanity: bool,
    pub reasoning: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryRecommendation {
    pub category_id: CategoryId,
    pub category_name: String,
    pub confidence: f64,
    pub label: ConfidenceLabel,
    pub reasoning: String,
}

/// How the engine rates the category the listing already has.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CurrentCategory {
    pub category_id: CategoryId,
    pub confidence: f64,
    pub is_top: bool,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub recommendations: Vec<CategoryRecommendation>,
    pub confidence_by_category: BTreeMap<CategoryId, f64>,
    pub requires_confirmation: bool,
    pub auto_selected: Option<CategoryRecommendation>,
    /// Recommended ids below the high-risk threshold.
    pub needs_review: Vec<CategoryId>,
    pub strategy: StrategyKind,
    pub safety_fallback: bool,
    pub fallback_used: bool,
    pub current_category: Option<CurrentCategory>,
}

impl ClassificationResult {
    pub fn top(&self) -> Option<&CategoryRecommendation> {
        self.recommendations.first()
    }

    pub fn top_confidence(&self) -> f64 {
        self.top().map(|rec| rec.confidence).unwrap_or(0.0)
    }
}

/// Everything a strategy may read while scoring one request.
#[derive(Debug, Clone, Copy)]
pub struct ScoringContext<'a> {
    pub taxonomy: &'a TaxonomySnapshot,
    pub rules: &'a RuleSet,
    pub policy: &'a DecisionPolicy,
}

/// `raw / scale` clamped into `[0, 1]`; NaN becomes 0.
/// Clamps an adjusted score into `[0, scale]` for reporting.
pub fn cap_score(raw: f64, scale: f64) -> f64 {
    if raw.is_nan() {
        0.0
    } else {
        raw.clamp(0.0, scale.max(0.0))
    }
}

pub fn to_confidence(raw: f64, scale: f64) -> f64 {
    let value = raw / scale;
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Rules(#[from] RuleSetError),
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineSummary {
    pub taxonomy_version: String,
    pub rules_version: String,
    pub categories: usize,
    pub keywords: usize,
    pub policy: DecisionPolicy,
}

/// A taxonomy snapshot bound to a rule set that references only its categories.
#[derive(Debug)]
pub struct Engine {
    taxonomy: Arc<TaxonomySnapshot>,
    rules: Arc<RuleSet>,
    overrides: PolicyOverrides,
    policy: DecisionPolicy,
}

impl Engine {
    pub fn new(
        taxonomy: Arc<TaxonomySnapshot>,
        rules: Arc<RuleSet>,
        overrides: PolicyOverrides,
    ) -> Result<Self, EngineError> {
        rules.check_against(&taxonomy)?;
        let policy = DecisionPolicy::resolve(&rules.minimum_confidence, &overrides);
        policy.validate()?;
        Ok(Self {
            taxonomy,
            rules,
            overrides,
            policy,
        })
    }

    /// Engine over the data files compiled into the binary.
    pub fn embedded() -> Result<Self, EngineError> {
        Self::new(
            Arc::new(TaxonomySnapshot::embedded()?),
            Arc::new(RuleSet::embedded()?),
            PolicyOverrides::default(),
        )
    }

    pub fn taxonomy(&self) -> &TaxonomySnapshot {
        &self.taxonomy
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn policy(&self) -> &DecisionPolicy {
        &self.policy
    }

    pub fn summary(&self) -> EngineSummary {
        EngineSummary {
            taxonomy_version: self.taxonomy.version().to_string(),
            rules_version: self.rules.version.clone(),
            categories: self.taxonomy.list_categories().len(),
            keywords: self.taxonomy.keyword_count(),
            policy: self.policy,
        }
    }

    fn context(&self) -> ScoringContext<'_> {
        ScoringContext {
            taxonomy: &self.taxonomy,
            rules: &self.rules,
            policy: &self.policy,
        }
    }

    /// Runs one strategy through the shared sanity, ranking and fallback tail.
    pub fn classify_with(
        &self,
        kind: StrategyKind,
        input: &ClassificationInput,
    ) -> ClassificationResult {
        let normalized = NormalizedInput::new(input);
        let ctx = self.context();
        let mut scores = strategy_for(kind).score(&ctx, &normalized);
        let blocked = self.rules.sanity.blocked(&normalized.text);
        decision::apply_sanity(&mut scores, &blocked);
        let result = decision::decide(&ctx, kind, scores, &blocked, &normalized);
        debug!(
            target = "classifier.engine",
            strategy = %kind,
            top_category = ?result.top().map(|rec| rec.category_id),
            confidence = result.top_confidence(),
            requires_confirmation = result.requires_confirmation,
            fallback_used = result.fallback_used,
            blocked = blocked.len(),
            "classified listing"
        );
        result
    }
}

/// Shared, atomically swappable engine. A call holds one `Arc<Engine>` throughout.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    inner: Arc<RwLock<Arc<Engine>>>,
}

impl EngineHandle {
    pub fn new(engine: Engine) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(engine))),
        }
    }

    pub fn current(&self) -> Arc<Engine> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Parses and validates a new taxonomy against the current rules, then swaps it in.
    pub fn swap_taxonomy(&self, raw: &str) -> Result<EngineSummary, EngineError> {
        let taxonomy = Arc::new(TaxonomySnapshot::from_yaml(raw)?);
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let engine = Engine::new(taxonomy, guard.rules.clone(), guard.overrides)?;
        *guard = Arc::new(engine);
        let summary = guard.summary();
        info!(
            target = "classifier.engine",
            taxonomy = %summary.taxonomy_version,
            categories = summary.categories,
            "taxonomy snapshot swapped"
        );
        Ok(summary)
    }

    /// Parses and validates new rules against the current taxonomy, then swaps them in.
    pub fn swap_rules(&self, raw: &str) -> Result<EngineSummary, EngineError> {
        let rules = Arc::new(RuleSet::from_yaml(raw)?);
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let engine = Engine::new(guard.taxonomy.clone(), rules, guard.overrides)?;
        *guard = Arc::new(engine);
        let summary = guard.summary();
        info!(
            target = "classifier.engine",
            rules = %summary.rules_version,
            "rule set swapped"
        );
        Ok(summary)
    }
}

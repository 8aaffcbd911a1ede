use super::normalize::NormalizedInput;
use super::rules::{MinimumConfidence, RuleSetError};
use super::{
    CategoryRecommendation, CategoryScore, ClassificationResult, CurrentCategory, ScoringContext,
    StrategyKind,
};
use crate::taxonomy::CategoryId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Thresholds that turn ranked scores into a decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecisionPolicy {
    pub min_confidence: f64,
    /// Recommendations below this are listed in `needs_review`.
    pub high_risk_confidence: f64,
    pub auto_select_confidence: f64,
    pub max_recommendations: usize,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            high_risk_confidence: 0.7,
            auto_select_confidence: 0.8,
            max_recommendations: 3,
        }
    }
}

/// Operator overrides layered over the levels shipped with a rule set.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PolicyOverrides {
    pub min_confidence: Option<f64>,
    pub high_risk_confidence: Option<f64>,
    pub auto_select_confidence: Option<f64>,
    pub max_recommendations: Option<usize>,
}

impl DecisionPolicy {
    pub fn resolve(levels: &MinimumConfidence, overrides: &PolicyOverrides) -> Self {
        let defaults = Self::default();
        Self {
            min_confidence: overrides.min_confidence.unwrap_or(levels.default),
            high_risk_confidence: overrides.high_risk_confidence.unwrap_or(levels.high_risk),
            auto_select_confidence: overrides
                .auto_select_confidence
                .unwrap_or(defaults.auto_select_confidence),
            max_recommendations: overrides
                .max_recommendations
                .unwrap_or(defaults.max_recommendations),
        }
    }

    pub fn validate(&self) -> Result<(), RuleSetError> {
        for (name, value) in [
            ("min_confidence", self.min_confidence),
            ("high_risk_confidence", self.high_risk_confidence),
            ("auto_select_confidence", self.auto_select_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(RuleSetError::Threshold { name, value });
            }
        }
        if self.max_recommendations == 0 {
            return Err(RuleSetError::Invalid(
                "max_recommendations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLabel {
    VeryHigh,
    High,
    Medium,
    Related,
    Low,
}

pub fn confidence_label(confidence: f64) -> ConfidenceLabel {
    match confidence {
        c if c >= 0.9 => ConfidenceLabel::VeryHigh,
        c if c >= 0.8 => ConfidenceLabel::High,
        c if c >= 0.7 => ConfidenceLabel::Medium,
        c if c >= 0.5 => ConfidenceLabel::Related,
        _ => ConfidenceLabel::Low,
    }
}

/// Zeroes every category a sanity rule forbids, whatever it scored.
pub fn apply_sanity(scores: &mut [CategoryScore], blocked: &BTreeSet<CategoryId>) {
    for score in scores
        .iter_mut()
        .filter(|score| blocked.contains(&score.category_id))
    {
        score.violates_sanity = true;
        score.confidence = 0.0;
        score.reasoning = vec!["blocked by sanity rule".to_string()];
    }
}

/// Ranks, filters and decides; falls back to the coarse table when nothing survives.
pub fn decide(
    ctx: &ScoringContext<'_>,
    strategy: StrategyKind,
    mut scores: Vec<CategoryScore>,
    blocked: &BTreeSet<CategoryId>,
    input: &NormalizedInput,
) -> ClassificationResult {
    let policy = ctx.policy;
    scores.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then(a.category_id.cmp(&b.category_id))
    });

    let confidence_by_category: BTreeMap<CategoryId, f64> = scores
        .iter()
        .map(|score| (score.category_id, score.confidence))
        .collect();

    let mut recommendations: Vec<CategoryRecommendation> = scores
        .iter()
        .filter(|score| {
            !score.violates_sanity
                && score.confidence > 0.0
                && score.confidence >= policy.min_confidence
        })
        .take(policy.max_recommendations)
        .map(|score| CategoryRecommendation {
            category_id: score.category_id,
            category_name: ctx.taxonomy.display_name(score.category_id),
            confidence: score.confidence,
            label: confidence_label(score.confidence),
            reasoning: reasoning(score),
        })
        .collect();

    let mut fallback_used = false;
    if recommendations.is_empty()
        && let Some(hit) = ctx.rules.fallback.lookup(&input.title, |id| {
            !blocked.contains(&id) && ctx.taxonomy.contains(id)
        })
    {
        fallback_used = true;
        recommendations.push(CategoryRecommendation {
            category_id: hit.category_id,
            category_name: ctx.taxonomy.display_name(hit.category_id),
            confidence: hit.confidence,
            label: confidence_label(hit.confidence),
            reasoning: hit.reasoning(),
        });
    }

    let requires_confirmation = fallback_used
        || recommendations
            .first()
            .is_none_or(|top| top.confidence < policy.auto_select_confidence);
    let auto_selected = recommendations
        .first()
        .filter(|_| !requires_confirmation)
        .cloned();
    let needs_review = recommendations
        .iter()
        .filter(|rec| rec.confidence < policy.high_risk_confidence)
        .map(|rec| rec.category_id)
        .collect();
    let current_category = input.current_category_id.map(|id| CurrentCategory {
        category_id: id,
        confidence: confidence_by_category.get(&id).copied().unwrap_or(0.0),
        is_top: recommendations
            .first()
            .is_some_and(|top| top.category_id == id),
    });

    ClassificationResult {
        recommendations,
        confidence_by_category,
        requires_confirmation,
        auto_selected,
        needs_review,
        strategy,
        safety_fallback: false,
        fallback_used,
        current_category,
    }
}

fn reasoning(score: &CategoryScore) -> String {
    let summary = if score.confidence > 0.7 {
        "matches many keywords"
    } else {
        "partial keyword match"
    };
    if score.reasoning.is_empty() {
        summary.to_string()
    } else {
        format!("{summary}; {}", score.reasoning.join("; "))
    }
}

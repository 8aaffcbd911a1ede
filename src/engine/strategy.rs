use super::advanced::AdvancedScorer;
use super::context::ClusterActivations;
use super::normalize::NormalizedInput;
use super::scorer::score_channels;
use super::{CategoryScore, ScoringContext, StrategyKind, cap_score, to_confidence};
use crate::taxonomy::TaxonomyProvider;

/// One way of turning a normalized listing into per-category scores.
///
/// Implementations only score; sanity rules, ranking and the fallback matcher are
/// shared by every strategy and applied by the engine afterwards.
pub trait ScoringStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;
    fn score(&self, ctx: &ScoringContext<'_>, input: &NormalizedInput) -> Vec<CategoryScore>;
}

/// Channel scorer plus cluster adjustments, normalized against `max_score`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BaselineScorer;

impl ScoringStrategy for BaselineScorer {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Baseline
    }

    fn score(&self, ctx: &ScoringContext<'_>, input: &NormalizedInput) -> Vec<CategoryScore> {
        let weights = &ctx.rules.weights;
        let activations = ClusterActivations::evaluate(&ctx.rules.clusters, &input.text);

        ctx.taxonomy
            .list_categories()
            .iter()
            .filter(|category| category.is_classifiable())
            .map(|category| {
                let breakdown = score_channels(
                    category,
                    ctx.taxonomy.keywords_for(category.id),
                    input,
                    weights,
                );
                let raw_score =
                    breakdown.total(weights.max_score) + activations.delta_for(category.id);
                let mut reasoning = breakdown.describe();
                reasoning.extend(activations.describe_for(category.id));
                CategoryScore {
                    category_id: category.id,
                    raw_score: cap_score(raw_score, weights.max_score),
                    confidence: to_confidence(raw_score, weights.max_score),
                    violates_sanity: false,
                    reasoning,
                }
            })
            .collect()
    }
}

pub fn strategy_for(kind: StrategyKind) -> &'static dyn ScoringStrategy {
    match kind {
        StrategyKind::Baseline => &BaselineScorer,
        StrategyKind::Advanced => &AdvancedScorer,
    }
}

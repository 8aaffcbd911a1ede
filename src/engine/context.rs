use super::normalize::{Keyword, any_occurs};
use crate::taxonomy::CategoryId;
use serde::Serialize;

/// A secondary keyword group that steers a cluster toward one category.
#[derive(Debug, Clone)]
pub struct ContextGroup {
    pub name: String,
    pub keywords: Vec<Keyword>,
    pub category_id: CategoryId,
    pub boost: f64,
}

/// Named group of ambiguous trigger keywords plus the contexts that resolve them.
#[derive(Debug, Clone)]
pub struct ClusterRule {
    pub name: String,
    pub triggers: Vec<Keyword>,
    pub contexts: Vec<ContextGroup>,
    pub default_category: CategoryId,
    pub default_boost: f64,
    pub penalized_categories: Vec<CategoryId>,
    pub penalty: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Adjustment {
    pub cluster: String,
    /// Context group name, `default` or `penalty`.
    pub reason: String,
    pub category_id: CategoryId,
    pub delta: f64,
}

impl ClusterRule {
    pub fn is_triggered(&self, text: &str) -> bool {
        any_occurs(&self.triggers, text)
    }

    /// Adjustments this cluster contributes for `text`, empty when no trigger is present.
    pub fn activate(&self, text: &str) -> Vec<Adjustment> {
        if !self.is_triggered(text) {
            return Vec::new();
        }
        let mut adjustments: Vec<Adjustment> = self
            .contexts
            .iter()
            .filter(|group| any_occurs(&group.keywords, text))
            .map(|group| self.adjustment(&group.name, group.category_id, group.boost))
            .collect();
        if adjustments.is_empty() {
            adjustments.push(self.adjustment("default", self.default_category, self.default_boost));
        }
        if self.penalty != 0.0 {
            adjustments.extend(
                self.penalized_categories
                    .iter()
                    .map(|id| self.adjustment("penalty", *id, -self.penalty)),
            );
        }
        adjustments
    }

    pub fn referenced_categories(&self) -> impl Iterator<Item = CategoryId> + '_ {
        std::iter::once(self.default_category)
            .chain(self.contexts.iter().map(|group| group.category_id))
            .chain(self.penalized_categories.iter().copied())
    }

    fn adjustment(&self, reason: &str, category_id: CategoryId, delta: f64) -> Adjustment {
        Adjustment {
            cluster: self.name.clone(),
            reason: reason.to_string(),
            category_id,
            delta,
        }
    }
}

/// Every cluster adjustment for one request, evaluated once and folded into each category.
#[derive(Debug, Clone, Default)]
pub struct ClusterActivations {
    adjustments: Vec<Adjustment>,
}

impl ClusterActivations {
    pub fn evaluate(rules: &[ClusterRule], text: &str) -> Self {
        Self {
            adjustments: rules.iter().flat_map(|rule| rule.activate(text)).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.adjustments.is_empty()
    }

    pub fn for_category(&self, id: CategoryId) -> impl Iterator<Item = &Adjustment> {
        self.adjustments
            .iter()
            .filter(move |adjustment| adjustment.category_id == id)
    }

    /// Sum of all deltas for `id`; additive, so cluster order is irrelevant.
    pub fn delta_for(&self, id: CategoryId) -> f64 {
        self.for_category(id).map(|adjustment| adjustment.delta).sum()
    }

    pub fn describe_for(&self, id: CategoryId) -> Vec<String> {
        self.for_category(id)
            .map(|adjustment| {
                format!(
                    "cluster {}/{} {:+}",
                    adjustment.cluster, adjustment.reason, adjustment.delta
                )
            })
            .collect()
    }
}

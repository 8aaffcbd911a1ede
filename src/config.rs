use crate::engine::{Engine, EngineError, PolicyOverrides, rules::RuleSet};
use crate::rollout::{PolicyError, RolloutPolicy};
use crate::taxonomy::TaxonomySnapshot;
use once_cell::sync::Lazy;
use std::{collections::BTreeSet, env, path::PathBuf, str::FromStr, sync::Arc};
use tracing::info;

pub static PORT: Lazy<u16> = Lazy::new(|| parse_or(var("PORT"), 8000, |_: &u16| true));

pub static REQUEST_MAX_BYTES: Lazy<usize> =
    Lazy::new(|| parse_or(var("REQUEST_MAX_BYTES"), 256 * 1024, |v: &usize| *v > 0));

pub static QUEUE_CAPACITY: Lazy<usize> =
    Lazy::new(|| parse_or(var("QUEUE_CAPACITY"), 64, |v: &usize| *v > 0));

/// Finished jobs kept for polling before the oldest are evicted.
pub static JOB_RETENTION: Lazy<usize> =
    Lazy::new(|| parse_or(var("JOB_RETENTION"), 256, |v: &usize| *v > 0));

pub static MAX_BATCH: Lazy<usize> = Lazy::new(|| {
    parse_or(
        var("CLASSIFIER_MAX_BATCH"),
        crate::pipeline::DEFAULT_MAX_BATCH,
        |v: &usize| *v > 0,
    )
});

pub static TAXONOMY_PATH: Lazy<Option<PathBuf>> =
    Lazy::new(|| var("CLASSIFIER_TAXONOMY_PATH").map(PathBuf::from));

pub static RULES_PATH: Lazy<Option<PathBuf>> =
    Lazy::new(|| var("CLASSIFIER_RULES_PATH").map(PathBuf::from));

pub static METRICS_KEY: Lazy<Option<String>> = Lazy::new(|| var("METRICS_KEY"));

fn var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_or<T: FromStr>(raw: Option<String>, default: T, valid: impl Fn(&T) -> bool) -> T {
    parse_opt(raw, valid).unwrap_or(default)
}

fn parse_opt<T: FromStr>(raw: Option<String>, valid: impl Fn(&T) -> bool) -> Option<T> {
    raw.and_then(|value| value.parse::<T>().ok())
        .filter(|value| valid(value))
}

fn unit_interval(value: &f64) -> bool {
    (0.0..=1.0).contains(value)
}

fn policy_overrides_from(lookup: impl Fn(&str) -> Option<String>) -> PolicyOverrides {
    PolicyOverrides {
        min_confidence: parse_opt(lookup("CLASSIFIER_MIN_CONFIDENCE"), unit_interval),
        high_risk_confidence: parse_opt(lookup("CLASSIFIER_HIGH_RISK_CONFIDENCE"), unit_interval),
        auto_select_confidence: parse_opt(
            lookup("CLASSIFIER_AUTO_SELECT_CONFIDENCE"),
            unit_interval,
        ),
        max_recommendations: parse_opt(lookup("CLASSIFIER_MAX_RECOMMENDATIONS"), |v: &usize| *v > 0),
    }
}

fn rollout_policy_from(lookup: impl Fn(&str) -> Option<String>) -> Result<RolloutPolicy, PolicyError> {
    let defaults = RolloutPolicy::default();
    let allow_list: BTreeSet<String> = lookup("ROLLOUT_ALLOW_LIST")
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|seller| !seller.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    RolloutPolicy::new(
        parse_or(
            lookup("ROLLOUT_ADVANCED_PERCENT"),
            defaults.advanced_percent,
            |v: &u8| *v <= 100,
        ),
        allow_list,
        parse_or(
            lookup("ROLLOUT_SAFETY_THRESHOLD"),
            defaults.safety_threshold,
            unit_interval,
        ),
    )
}

/// Threshold overrides from `CLASSIFIER_*`; unset or invalid values defer to the rule set.
pub fn policy_overrides() -> PolicyOverrides {
    policy_overrides_from(var)
}

pub fn rollout_policy() -> Result<RolloutPolicy, PolicyError> {
    rollout_policy_from(var)
}

/// Builds the engine from the configured files, or the embedded defaults.
pub fn load_engine() -> Result<Engine, EngineError> {
    let taxonomy = match TAXONOMY_PATH.as_deref() {
        Some(path) => {
            info!(target = "classifier.taxonomy", path = %path.display(), "loading taxonomy");
            TaxonomySnapshot::from_path(path)?
        }
        None => TaxonomySnapshot::embedded()?,
    };
    let rules = match RULES_PATH.as_deref() {
        Some(path) => {
            info!(target = "classifier.engine", path = %path.display(), "loading rules");
            RuleSet::from_path(path)?
        }
        None => RuleSet::embedded()?,
    };
    Engine::new(Arc::new(taxonomy), Arc::new(rules), policy_overrides())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn invalid_values_fall_back() {
        assert_eq!(parse_or(Some("abc".into()), 8000u16, |_: &u16| true), 8000);
        assert_eq!(parse_or(Some("0".into()), 64usize, |v: &usize| *v > 0), 64);
        assert_eq!(parse_or(Some("9090".into()), 8000u16, |_: &u16| true), 9090);
        assert_eq!(parse_or(None, 3usize, |_: &usize| true), 3);
    }

    #[test]
    fn overrides_only_carry_valid_thresholds() {
        let overrides = policy_overrides_from(lookup(&[
            ("CLASSIFIER_MIN_CONFIDENCE", "0.6"),
            ("CLASSIFIER_HIGH_RISK_CONFIDENCE", "1.5"),
            ("CLASSIFIER_MAX_RECOMMENDATIONS", "5"),
        ]));
        assert_eq!(overrides.min_confidence, Some(0.6));
        assert_eq!(overrides.high_risk_confidence, None);
        assert_eq!(overrides.auto_select_confidence, None);
        assert_eq!(overrides.max_recommendations, Some(5));
    }

    #[test]
    fn rollout_policy_reads_split_and_allow_list() {
        let policy = rollout_policy_from(lookup(&[
            ("ROLLOUT_ADVANCED_PERCENT", "25"),
            ("ROLLOUT_SAFETY_THRESHOLD", "0.6"),
            ("ROLLOUT_ALLOW_LIST", "seller-1, ,seller-2"),
        ]))
        .expect("policy");
        assert_eq!(policy.advanced_percent, 25);
        assert_eq!(policy.safety_threshold, 0.6);
        assert_eq!(policy.allow_list.len(), 2);
        assert!(policy.allow_list.contains("seller-2"));
    }

    #[test]
    fn rollout_policy_ignores_out_of_range_values() {
        let policy = rollout_policy_from(lookup(&[
            ("ROLLOUT_ADVANCED_PERCENT", "150"),
            ("ROLLOUT_SAFETY_THRESHOLD", "-1"),
        ]))
        .expect("policy");
        assert_eq!(policy, RolloutPolicy::default());
    }
}

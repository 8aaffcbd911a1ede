use crate::engine::{ClassificationInput, ClassificationResult, EngineHandle, StrategyKind};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    collections::BTreeSet,
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error, PartialEq)]
pub enum PolicyError {
    #[error("advanced_percent must be within 0..=100, got {0}")]
    Percent(u8),
    #[error("safety_threshold must be within [0, 1], got {0}")]
    Threshold(f64),
}

/// Traffic split between strategies plus the safety-net threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutPolicy {
    pub advanced_percent: u8,
    #[serde(default)]
    pub allow_list: BTreeSet<String>,
    pub safety_threshold: f64,
}

impl Default for RolloutPolicy {
    fn default() -> Self {
        Self {
            advanced_percent: 100,
            allow_list: BTreeSet::new(),
            safety_threshold: 0.7,
        }
    }
}

impl RolloutPolicy {
    pub fn new(
        advanced_percent: u8,
        allow_list: BTreeSet<String>,
        safety_threshold: f64,
    ) -> Result<Self, PolicyError> {
        let policy = Self {
            advanced_percent,
            allow_list,
            safety_threshold,
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.advanced_percent > 100 {
            return Err(PolicyError::Percent(self.advanced_percent));
        }
        if !(0.0..=1.0).contains(&self.safety_threshold) {
            return Err(PolicyError::Threshold(self.safety_threshold));
        }
        Ok(())
    }
}

/// Caller-supplied routing hints for one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingContext {
    pub seller_id: Option<String>,
    pub session_id: Option<String>,
    /// Forces a strategy, bypassing the traffic split.
    pub strategy: Option<StrategyKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RolloutStats {
    pub advanced: u64,
    pub baseline: u64,
    pub safety_fallbacks: u64,
}

#[derive(Debug, Default)]
struct Counters {
    advanced: AtomicU64,
    baseline: AtomicU64,
    safety_fallbacks: AtomicU64,
}

/// Picks a strategy per request and re-runs the baseline when the advanced result is weak.
#[derive(Debug, Clone)]
pub struct RolloutIntegrator {
    engine: EngineHandle,
    policy: Arc<RwLock<Arc<RolloutPolicy>>>,
    counters: Arc<Counters>,
}

impl RolloutIntegrator {
    pub fn new(engine: EngineHandle, policy: RolloutPolicy) -> Self {
        Self {
            engine,
            policy: Arc::new(RwLock::new(Arc::new(policy))),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    pub fn policy(&self) -> Arc<RolloutPolicy> {
        self.policy
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_policy(&self, policy: RolloutPolicy) -> Result<(), PolicyError> {
        policy.validate()?;
        info!(
            target = "classifier.rollout",
            advanced_percent = policy.advanced_percent,
            allow_list = policy.allow_list.len(),
            safety_threshold = policy.safety_threshold,
            "rollout policy updated"
        );
        *self.policy.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(policy);
        Ok(())
    }

    pub fn stats(&self) -> RolloutStats {
        RolloutStats {
            advanced: self.counters.advanced.load(Ordering::Relaxed),
            baseline: self.counters.baseline.load(Ordering::Relaxed),
            safety_fallbacks: self.counters.safety_fallbacks.load(Ordering::Relaxed),
        }
    }

    /// Explicit strategy, then allow-list, then a stable or random bucket in 0..100.
    pub fn route(&self, routing: &RoutingContext) -> StrategyKind {
        route_with(&self.policy(), routing)
    }

    pub fn classify(
        &self,
        input: &ClassificationInput,
        routing: &RoutingContext,
    ) -> ClassificationResult {
        let engine = self.engine.current();
        // one snapshot of the policy serves both routing and the safety net
        let policy = self.policy();
        let selected = route_with(&policy, routing);
        let result = engine.classify_with(selected, input);

        let result = if selected == StrategyKind::Advanced
            && result.top_confidence() < policy.safety_threshold
        {
            let baseline = engine.classify_with(StrategyKind::Baseline, input);
            if baseline.top_confidence() > result.top_confidence() {
                warn!(
                    target = "classifier.rollout",
                    advanced_confidence = result.top_confidence(),
                    baseline_confidence = baseline.top_confidence(),
                    "advanced result below safety threshold, using baseline"
                );
                self.counters.safety_fallbacks.fetch_add(1, Ordering::Relaxed);
                crate::metrics::inc_safety_fallback();
                ClassificationResult {
                    safety_fallback: true,
                    ..baseline
                }
            } else {
                result
            }
        } else {
            result
        };

        match result.strategy {
            StrategyKind::Advanced => self.counters.advanced.fetch_add(1, Ordering::Relaxed),
            StrategyKind::Baseline => self.counters.baseline.fetch_add(1, Ordering::Relaxed),
        };
        result
    }
}

fn route_with(policy: &RolloutPolicy, routing: &RoutingContext) -> StrategyKind {
    if let Some(kind) = routing.strategy {
        return kind;
    }
    if routing
        .seller_id
        .as_ref()
        .is_some_and(|seller| policy.allow_list.contains(seller))
    {
        return StrategyKind::Advanced;
    }
    let bucket = routing
        .seller_id
        .as_deref()
        .or(routing.session_id.as_deref())
        .map(stable_bucket)
        .unwrap_or_else(|| rand::rng().random_range(0..100));
    if bucket < policy.advanced_percent {
        StrategyKind::Advanced
    } else {
        StrategyKind::Baseline
    }
}

/// SHA-256 based so a key keeps its bucket across builds and hosts.
fn stable_bucket(key: &str) -> u8 {
    let digest = Sha256::digest(key.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(head) % 100) as u8
}

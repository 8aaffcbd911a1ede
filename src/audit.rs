use crate::engine::{ClassificationInput, ClassificationResult, StrategyKind};
use crate::taxonomy::CategoryId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

pub const DEFAULT_CAPACITY: usize = 1000;
const RECENT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionRecord {
    pub timestamp: DateTime<Utc>,
    pub strategy: StrategyKind,
    pub category_id: Option<CategoryId>,
    pub confidence: f64,
    pub requires_confirmation: bool,
    pub safety_fallback: bool,
    /// Character counts, not bytes.
    pub title_length: usize,
    pub description_length: usize,
    pub processing_ms: f64,
}

impl DecisionRecord {
    pub fn new(input: &ClassificationInput, result: &ClassificationResult, elapsed: Duration) -> Self {
        Self {
            timestamp: Utc::now(),
            strategy: result.strategy,
            category_id: result.top().map(|rec| rec.category_id),
            confidence: result.top_confidence(),
            requires_confirmation: result.requires_confirmation,
            safety_fallback: result.safety_fallback,
            title_length: input.title.chars().count(),
            description_length: input.description.chars().count(),
            processing_ms: elapsed.as_secs_f64() * 1000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StrategyShare {
    pub count: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionStats {
    /// Decisions currently held in the window.
    pub total: usize,
    /// Decisions recorded since start, including evicted ones.
    pub recorded: u64,
    pub strategies: BTreeMap<&'static str, StrategyShare>,
    pub average_confidence: f64,
    pub average_processing_ms: f64,
    pub safety_fallbacks: usize,
    pub recent: Vec<DecisionRecord>,
}

#[derive(Debug)]
struct Window {
    capacity: usize,
    entries: VecDeque<DecisionRecord>,
    recorded: u64,
}

/// Bounded in-memory log of recent decisions for operators.
#[derive(Debug, Clone)]
pub struct DecisionLog {
    inner: Arc<Mutex<Window>>,
}

impl Default for DecisionLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl DecisionLog {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(Window {
                capacity,
                entries: VecDeque::with_capacity(capacity),
                recorded: 0,
            })),
        }
    }

    pub fn record(&self, record: DecisionRecord) {
        let mut window = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if window.entries.len() == window.capacity {
            window.entries.pop_front();
        }
        window.entries.push_back(record);
        window.recorded += 1;
    }

    pub fn stats(&self) -> DecisionStats {
        let window = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let total = window.entries.len();

        let mut strategies = BTreeMap::new();
        for kind in [StrategyKind::Advanced, StrategyKind::Baseline] {
            let count = window
                .entries
                .iter()
                .filter(|entry| entry.strategy == kind)
                .count();
            strategies.insert(
                kind.as_str(),
                StrategyShare {
                    count,
                    percentage: percentage(count, total),
                },
            );
        }

        DecisionStats {
            total,
            recorded: window.recorded,
            strategies,
            average_confidence: average(window.entries.iter().map(|entry| entry.confidence), total),
            average_processing_ms: average(
                window.entries.iter().map(|entry| entry.processing_ms),
                total,
            ),
            safety_fallbacks: window
                .entries
                .iter()
                .filter(|entry| entry.safety_fallback)
                .count(),
            recent: window.entries.iter().rev().take(RECENT).cloned().collect(),
        }
    }
}

fn percentage(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 * 100.0 / total as f64
    }
}

fn average(values: impl Iterator<Item = f64>, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        values.sum::<f64>() / total as f64
    }
}

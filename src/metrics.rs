use crate::engine::ClassificationResult;
use metrics::{counter, histogram};
use std::time::Duration;

pub fn inc_requests(route: &'static str) {
    counter!("classifier_requests_total", "route" => route).increment(1);
}

pub fn inc_safety_fallback() {
    counter!("classifier_safety_fallback_total").increment(1);
}

/// auto_selected | confirm | fallback | empty
pub fn outcome(result: &ClassificationResult) -> &'static str {
    if result.fallback_used {
        "fallback"
    } else if result.recommendations.is_empty() {
        "empty"
    } else if result.auto_selected.is_some() {
        "auto_selected"
    } else {
        "confirm"
    }
}

pub fn record_decision(result: &ClassificationResult, elapsed: Duration) {
    let strategy = result.strategy.as_str();
    counter!(
        "classifier_decisions_total",
        "strategy" => strategy,
        "outcome" => outcome(result)
    )
    .increment(1);
    histogram!("classifier_decision_seconds", "strategy" => strategy)
        .record(elapsed.as_secs_f64());
}

use crate::audit::{DecisionLog, DecisionRecord};
use crate::models::{ClassifyRequest, ClassifyResponse};
use crate::rollout::RolloutIntegrator;
use chrono::Utc;
use rayon::prelude::*;
use std::time::Instant;
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_MAX_BATCH: usize = 500;

/// Request-level wrapper around the rollout integrator: timing, metrics and the decision log.
#[derive(Debug, Clone)]
pub struct Pipeline {
    integrator: RolloutIntegrator,
    log: DecisionLog,
    max_batch: usize,
}

impl Pipeline {
    pub fn new(integrator: RolloutIntegrator, log: DecisionLog, max_batch: usize) -> Self {
        Self {
            integrator,
            log,
            max_batch: max_batch.max(1),
        }
    }

    pub fn integrator(&self) -> &RolloutIntegrator {
        &self.integrator
    }

    pub fn log(&self) -> &DecisionLog {
        &self.log
    }

    pub fn max_batch(&self) -> usize {
        self.max_batch
    }

    /// Synchronous, CPU-bound classification of one listing.
    pub fn classify(&self, request: &ClassifyRequest) -> ClassifyResponse {
        let started = Instant::now();
        let input = request.input();
        let result = self.integrator.classify(&input, &request.routing());
        let elapsed = started.elapsed();

        crate::metrics::record_decision(&result, elapsed);
        self.log
            .record(DecisionRecord::new(&input, &result, elapsed));

        ClassifyResponse {
            request_id: Uuid::new_v4(),
            classified_at: Utc::now(),
            elapsed_ms: elapsed.as_secs_f64() * 1000.0,
            result,
        }
    }

    pub async fn run(&self, request: ClassifyRequest) -> Result<ClassifyResponse, PipelineError> {
        let pipeline = self.clone();
        tokio::task::spawn_blocking(move || pipeline.classify(&request))
            .await
            .map_err(|err| PipelineError::internal("classify", err.to_string()))
    }

    /// Classifies every listing in parallel on the rayon pool, preserving input order.
    pub async fn run_batch(
        &self,
        listings: Vec<ClassifyRequest>,
    ) -> Result<Vec<ClassifyResponse>, PipelineError> {
        if listings.is_empty() {
            return Err(PipelineError::invalid_input(
                "batch",
                "listings must not be empty",
            ));
        }
        if listings.len() > self.max_batch {
            return Err(PipelineError::invalid_input(
                "batch",
                format!(
                    "{} listings exceed the batch limit of {}",
                    listings.len(),
                    self.max_batch
                ),
            ));
        }
        let pipeline = self.clone();
        tokio::task::spawn_blocking(move || {
            listings
                .par_iter()
                .map(|request| pipeline.classify(request))
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|err| PipelineError::internal("batch", err.to_string()))
    }
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    InvalidInput,
    Internal,
}

impl PipelineError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::InvalidInput,
        }
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::Internal,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

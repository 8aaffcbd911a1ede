//! Marketplace listing category decision engine, plus the HTTP service that wraps it.

pub mod api;
pub mod audit;
pub mod config;
pub mod engine;
pub mod jobs;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod rollout;
pub mod security;
pub mod taxonomy;

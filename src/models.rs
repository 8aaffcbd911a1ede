use crate::engine::{ClassificationInput, ClassificationResult, StrategyKind};
use crate::rollout::RoutingContext;
use crate::taxonomy::CategoryId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ClassifyRequest {
    pub title: String,
    pub description: String,
    pub detected_objects: Vec<String>,
    pub image_analysis: Option<String>,
    pub current_category_id: Option<CategoryId>,
    pub seller_id: Option<String>,
    pub session_id: Option<String>,
    /// Forces a strategy instead of the rollout split.
    pub strategy: Option<StrategyKind>,
}

impl ClassifyRequest {
    pub fn input(&self) -> ClassificationInput {
        ClassificationInput {
            title: self.title.clone(),
            description: self.description.clone(),
            detected_objects: self.detected_objects.clone(),
            image_analysis: self.image_analysis.clone(),
            current_category_id: self.current_category_id,
        }
    }

    pub fn routing(&self) -> RoutingContext {
        RoutingContext {
            seller_id: self.seller_id.clone(),
            session_id: self.session_id.clone(),
            strategy: self.strategy,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassifyResponse {
    pub request_id: Uuid,
    pub classified_at: DateTime<Utc>,
    pub elapsed_ms: f64,
    pub result: ClassificationResult,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchRequest {
    pub listings: Vec<ClassifyRequest>,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub results: Vec<ClassifyResponse>,
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub job_id: String,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

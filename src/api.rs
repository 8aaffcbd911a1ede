use crate::{
    audit::DecisionStats,
    engine::{EngineError, EngineSummary},
    jobs::{JobError, JobInfo, JobQueue},
    models::{ApiError, BatchRequest, BatchResponse, ClassifyRequest, ClassifyResponse, EnqueueResponse},
    pipeline::{Pipeline, PipelineError, PipelineErrorKind},
    rollout::{PolicyError, RolloutPolicy, RolloutStats},
    security::{AuthContext, AuthState, require_admin_auth, require_api_auth},
};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Extension, Path, State},
    http::{HeaderMap, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Pipeline,
    pub queue: JobQueue,
    pub openapi: Arc<serde_json::Value>,
    pub prometheus_handle: PrometheusHandle,
    pub metrics_key: Option<String>,
}

pub fn openapi_document() -> serde_json::Value {
    serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
        .unwrap_or_else(|_| json!({"openapi": "3.0.3"}))
}

pub fn router(state: AppState, auth: AuthState, body_limit: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let protected = Router::new()
        .route("/classify", post(classify))
        .route("/classify/batch", post(classify_batch))
        .nest(
            "/jobs",
            Router::new()
                .route("/classify", post(enqueue_job))
                .route("/{id}", get(get_job_status)),
        )
        .route_layer(middleware::from_fn_with_state(
            auth.clone(),
            require_api_auth,
        ));

    let admin = Router::new()
        .route("/snapshot", get(admin_snapshot))
        .route("/taxonomy", put(admin_put_taxonomy))
        .route("/rules", put(admin_put_rules))
        .route("/rollout", get(admin_get_rollout).put(admin_put_rollout))
        .route("/stats", get(admin_stats))
        .route_layer(middleware::from_fn_with_state(auth, require_admin_auth));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .merge(protected)
        .nest("/admin", admin)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit))
}

/// Liveness plus the versions currently being served.
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let engine = state.pipeline.integrator().engine().current();
    Json(json!({
        "status": "ok",
        "service": "listing-classifier-rs",
        "taxonomy_version": engine.taxonomy().version(),
        "rules_version": engine.rules().version,
    }))
}

async fn openapi_json(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json((*state.openapi).clone())
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(secret) = &state.metrics_key {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

/// Classify one listing.
///
/// - Method: `POST`
/// - Path: `/classify`
/// - Auth: `Authorization: Bearer <key>` or `X-Classifier-Key: <key>`
/// - Body: `ClassifyRequest`
async fn classify(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(payload): Json<ClassifyRequest>,
) -> Result<Json<ClassifyResponse>, AppError> {
    crate::metrics::inc_requests("/classify");
    let response = state.pipeline.run(payload).await?;
    info!(
        target = "classifier.api",
        client_id = %context.client_id,
        request_id = %response.request_id,
        strategy = %response.result.strategy,
        category_id = ?response.result.top().map(|rec| rec.category_id),
        confidence = response.result.top_confidence(),
        "listing classified"
    );
    Ok(Json(response))
}

async fn classify_batch(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(payload): Json<BatchRequest>,
) -> Result<Json<BatchResponse>, AppError> {
    crate::metrics::inc_requests("/classify/batch");
    let count = payload.listings.len();
    let results = state.pipeline.run_batch(payload.listings).await?;
    info!(
        target = "classifier.api",
        client_id = %context.client_id,
        count,
        "batch classified"
    );
    Ok(Json(BatchResponse { results }))
}

async fn enqueue_job(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(payload): Json<BatchRequest>,
) -> Result<Json<EnqueueResponse>, AppError> {
    crate::metrics::inc_requests("/jobs/classify");
    if payload.listings.len() > state.pipeline.max_batch() {
        return Err(PipelineError::invalid_input(
            "batch",
            format!(
                "{} listings exceed the batch limit of {}",
                payload.listings.len(),
                state.pipeline.max_batch()
            ),
        )
        .into());
    }
    let id = state.queue.enqueue(payload.listings).await?;
    info!(
        target = "classifier.jobs",
        client_id = %context.client_id,
        job_id = %id,
        "job enqueued"
    );
    Ok(Json(EnqueueResponse {
        job_id: id.to_string(),
    }))
}

async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobInfo>, AppError> {
    crate::metrics::inc_requests("/jobs/{id}");
    let Ok(uuid) = Uuid::parse_str(&id) else {
        return Err(PipelineError::invalid_input("jobs", "invalid_job_id").into());
    };
    state
        .queue
        .get(uuid)
        .await
        .map(Json)
        .ok_or(AppError::JobNotFound(id))
}

async fn admin_snapshot(State(state): State<AppState>) -> Json<EngineSummary> {
    crate::metrics::inc_requests("/admin/snapshot");
    Json(state.pipeline.integrator().engine().current().summary())
}

/// Replace the taxonomy snapshot. The body is the YAML document; on failure the old one stays.
async fn admin_put_taxonomy(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    body: String,
) -> Result<Json<EngineSummary>, AppError> {
    crate::metrics::inc_requests("/admin/taxonomy");
    info!(target = "classifier.api", client_id = %context.client_id, "taxonomy upload");
    let summary = state.pipeline.integrator().engine().swap_taxonomy(&body)?;
    Ok(Json(summary))
}

async fn admin_put_rules(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    body: String,
) -> Result<Json<EngineSummary>, AppError> {
    crate::metrics::inc_requests("/admin/rules");
    info!(target = "classifier.api", client_id = %context.client_id, "rules upload");
    let summary = state.pipeline.integrator().engine().swap_rules(&body)?;
    Ok(Json(summary))
}

async fn admin_get_rollout(State(state): State<AppState>) -> Json<RolloutPolicy> {
    crate::metrics::inc_requests("/admin/rollout");
    Json((*state.pipeline.integrator().policy()).clone())
}

async fn admin_put_rollout(
    State(state): State<AppState>,
    Json(policy): Json<RolloutPolicy>,
) -> Result<Json<RolloutPolicy>, AppError> {
    crate::metrics::inc_requests("/admin/rollout");
    state.pipeline.integrator().set_policy(policy)?;
    Ok(Json((*state.pipeline.integrator().policy()).clone()))
}

#[derive(Debug, Serialize)]
struct AdminStats {
    decisions: DecisionStats,
    routing: RolloutStats,
    rollout: RolloutPolicy,
}

async fn admin_stats(State(state): State<AppState>) -> Json<AdminStats> {
    crate::metrics::inc_requests("/admin/stats");
    let integrator = state.pipeline.integrator();
    Json(AdminStats {
        decisions: state.pipeline.log().stats(),
        routing: integrator.stats(),
        rollout: (*integrator.policy()).clone(),
    })
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Job(#[from] JobError),
    #[error("job {0} not found")]
    JobNotFound(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            AppError::Pipeline(err) => {
                let status = match err.kind() {
                    PipelineErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                    PipelineErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.stage())
            }
            AppError::Engine(EngineError::Snapshot(_)) => (StatusCode::BAD_REQUEST, "taxonomy"),
            AppError::Engine(EngineError::Rules(_)) => (StatusCode::BAD_REQUEST, "rules"),
            AppError::Policy(_) => (StatusCode::BAD_REQUEST, "rollout"),
            AppError::Job(_) => (StatusCode::SERVICE_UNAVAILABLE, "jobs"),
            AppError::JobNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        };
        let detail = match &self {
            AppError::Pipeline(err) => err.detail().to_string(),
            other => other.to_string(),
        };
        if status.is_server_error() {
            warn!(target = "classifier.api", status = status.as_u16(), "{detail}");
        }
        let payload = ApiError {
            error: error.to_string(),
            detail: Some(detail),
        };
        (status, Json(payload)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::demo_pipeline;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::time::Duration;
    use tower::ServiceExt;

    const CLIENT: &str = "client-key";
    const ADMIN: &str = "admin-key";

    fn app_with(metrics_key: Option<&str>) -> (Router, AppState) {
        let pipeline = demo_pipeline();
        let (queue, _worker) = JobQueue::spawn(pipeline.clone(), 8, 16);
        let state = AppState {
            pipeline,
            queue,
            openapi: Arc::new(openapi_document()),
            prometheus_handle: PrometheusBuilder::new().build_recorder().handle(),
            metrics_key: metrics_key.map(str::to_string),
        };
        let auth = AuthState::new(Some("shop:client-key"), Some("ops:admin-key"), false);
        (router(state.clone(), auth, 64 * 1024), state)
    }

    fn app() -> Router {
        app_with(None).0
    }

    fn request(method: &str, uri: &str, key: Option<&str>, body: Option<String>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(key) = key {
            builder = builder.header("X-Classifier-Key", key);
        }
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .expect("request"),
            None => builder.body(Body::empty()).expect("request"),
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(req).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn health_needs_no_key() {
        let (status, body) = send(&app(), request("GET", "/health", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert!(body["taxonomy_version"].is_string());
    }

    #[tokio::test]
    async fn openapi_is_served_as_json() {
        let (status, body) = send(&app(), request("GET", "/openapi.json", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["paths"]["/classify"].is_object());
    }

    #[tokio::test]
    async fn classify_requires_a_key() {
        let payload = json!({"title": "Canon EOS R6"}).to_string();
        let (status, body) = send(&app(), request("POST", "/classify", None, Some(payload))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "missing_api_key");
    }

    #[tokio::test]
    async fn classify_returns_ranked_result() {
        let payload = json!({
            "title": "Canon EOS R6 Mark II",
            "description": "กล้อง Mirrorless Full Frame",
            "strategy": "advanced"
        })
        .to_string();
        let (status, body) =
            send(&app(), request("POST", "/classify", Some(CLIENT), Some(payload))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"]["recommendations"][0]["category_id"], 8);
        assert_eq!(body["result"]["strategy"], "advanced");
        assert!(body["request_id"].is_string());
    }

    #[tokio::test]
    async fn bearer_token_is_accepted() {
        let req = Request::builder()
            .method("POST")
            .uri("/classify")
            .header(header::AUTHORIZATION, format!("Bearer {CLIENT}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({"title": "laptop"}).to_string()))
            .expect("request");
        let (status, _) = send(&app(), req).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn empty_batch_is_bad_request() {
        let payload = json!({"listings": []}).to_string();
        let (status, body) = send(
            &app(),
            request("POST", "/classify/batch", Some(CLIENT), Some(payload)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "batch");
    }

    #[tokio::test]
    async fn batch_keeps_input_order() {
        let payload = json!({"listings": [
            {"title": "Canon EOS R6 Mark II", "description": "กล้อง Mirrorless Full Frame"},
            {"title": ""}
        ]})
        .to_string();
        let (status, body) = send(
            &app(),
            request("POST", "/classify/batch", Some(CLIENT), Some(payload)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let results = body["results"].as_array().expect("results");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["result"]["recommendations"][0]["category_id"], 8);
        assert!(results[1]["result"]["recommendations"]
            .as_array()
            .is_some_and(|recs| recs.is_empty()));
    }

    #[tokio::test]
    async fn job_lifecycle_over_http() {
        let app = app();
        let payload = json!({"listings": [{"title": "laptop keyboard"}]}).to_string();
        let (status, body) = send(
            &app,
            request("POST", "/jobs/classify", Some(CLIENT), Some(payload)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let id = body["job_id"].as_str().expect("job id").to_string();

        let mut state = serde_json::Value::Null;
        for _ in 0..200 {
            let (status, body) = send(
                &app,
                request("GET", &format!("/jobs/{id}"), Some(CLIENT), None),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            state = body["state"].clone();
            if state == "completed" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(state, "completed");
    }

    #[tokio::test]
    async fn job_lookup_errors() {
        let app = app();
        let (status, _) = send(&app, request("GET", "/jobs/not-a-uuid", Some(CLIENT), None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let uri = format!("/jobs/{}", Uuid::new_v4());
        let (status, body) = send(&app, request("GET", &uri, Some(CLIENT), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn admin_routes_reject_client_keys() {
        let app = app();
        let (status, body) = send(&app, request("GET", "/admin/snapshot", Some(CLIENT), None)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "forbidden");
        let (status, _) = send(&app, request("GET", "/admin/snapshot", None, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, body) = send(&app, request("GET", "/admin/snapshot", Some(ADMIN), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["categories"].as_u64().is_some_and(|n| n > 0));
    }

    #[tokio::test]
    async fn invalid_rules_keep_the_old_engine() {
        let app = app();
        let (_, before) = send(&app, request("GET", "/admin/snapshot", Some(ADMIN), None)).await;
        let req = Request::builder()
            .method("PUT")
            .uri("/admin/rules")
            .header("X-Classifier-Key", ADMIN)
            .body(Body::from("version: broken\nfallback: [\n"))
            .expect("request");
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "rules");
        let (_, after) = send(&app, request("GET", "/admin/snapshot", Some(ADMIN), None)).await;
        assert_eq!(before["rules_version"], after["rules_version"]);
    }

    #[tokio::test]
    async fn rollout_policy_round_trips_and_validates() {
        let app = app();
        let update = json!({"advanced_percent": 10, "allow_list": ["seller-9"], "safety_threshold": 0.6});
        let (status, body) = send(
            &app,
            request("PUT", "/admin/rollout", Some(ADMIN), Some(update.to_string())),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["advanced_percent"], 10);

        let invalid = json!({"advanced_percent": 150, "safety_threshold": 0.6});
        let (status, body) = send(
            &app,
            request("PUT", "/admin/rollout", Some(ADMIN), Some(invalid.to_string())),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "rollout");

        let (_, body) = send(&app, request("GET", "/admin/rollout", Some(ADMIN), None)).await;
        assert_eq!(body["advanced_percent"], 10);
        assert_eq!(body["allow_list"][0], "seller-9");
    }

    #[tokio::test]
    async fn stats_reflect_classifications() {
        let app = app();
        let payload = json!({"title": "laptop", "strategy": "baseline"}).to_string();
        send(&app, request("POST", "/classify", Some(CLIENT), Some(payload))).await;
        let (status, body) = send(&app, request("GET", "/admin/stats", Some(ADMIN), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["decisions"]["total"], 1);
        assert_eq!(body["decisions"]["strategies"]["baseline"]["count"], 1);
        assert_eq!(body["routing"]["baseline"], 1);
    }

    #[tokio::test]
    async fn metrics_key_is_enforced() {
        let (app, _) = app_with(Some("scrape"));
        let response = app
            .clone()
            .oneshot(request("GET", "/metrics", None, None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let req = Request::builder()
            .uri("/metrics")
            .header("X-Metrics-Key", "scrape")
            .body(Body::empty())
            .expect("request");
        let response = app.oneshot(req).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; version=0.0.4"
        );
    }
}

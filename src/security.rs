use crate::models::ApiError;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{self, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{collections::HashMap, convert::Infallible, sync::Arc};
use tracing::{info, warn};

pub const KEY_HEADER: &str = "X-Classifier-Key";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Client,
    Admin,
}

#[derive(Clone, Debug)]
pub struct AuthContext {
    pub client_id: String,
    pub key_id: String,
    pub role: Role,
}

#[derive(Clone)]
struct KeyRecord {
    client_id: String,
    key_id: String,
}

#[derive(Clone)]
pub struct AuthState {
    api: Arc<HashMap<String, KeyRecord>>,
    admin: Arc<HashMap<String, KeyRecord>>,
}

impl AuthState {
    pub fn from_env() -> Self {
        let api = std::env::var("CLASSIFIER_API_KEYS").ok();
        let admin = std::env::var("CLASSIFIER_ADMIN_KEYS").ok();
        let allow_demo = std::env::var("CLASSIFIER_ALLOW_DEMO_KEY")
            .map(|value| {
                matches!(
                    value.trim().to_ascii_lowercase().as_str(),
                    "1" | "true" | "yes"
                )
            })
            .unwrap_or(false);
        Self::new(api.as_deref(), admin.as_deref(), allow_demo)
    }

    /// `name:secret` lists. With no client keys, `allow_demo` admits the built-in
    /// `demo-key`; otherwise client routes reject every key. Admin keys have no default.
    pub fn new(api: Option<&str>, admin: Option<&str>, allow_demo: bool) -> Self {
        let mut api_keys = parse_keys("CLASSIFIER_API_KEYS", api.unwrap_or(""), "key");
        if api_keys.is_empty() && allow_demo {
            warn!(
                target = "classifier.api",
                "CLASSIFIER_API_KEYS produced no keys; demo credentials enabled"
            );
            api_keys.insert(
                "demo-key".to_string(),
                KeyRecord {
                    client_id: "demo-client".to_string(),
                    key_id: "key-01".to_string(),
                },
            );
        } else if api_keys.is_empty() {
            warn!(
                target = "classifier.api",
                "no client keys configured; classify routes are unreachable"
            );
        }
        let admin_keys = parse_keys("CLASSIFIER_ADMIN_KEYS", admin.unwrap_or(""), "admin");
        if admin_keys.is_empty() {
            warn!(
                target = "classifier.api",
                "no admin keys configured; admin routes are unreachable"
            );
        }
        info!(
            target = "classifier.api",
            api_keys = api_keys.len(),
            admin_keys = admin_keys.len(),
            "loaded API keys"
        );
        Self {
            api: Arc::new(api_keys),
            admin: Arc::new(admin_keys),
        }
    }

    fn authenticate(&self, presented: &str) -> Option<AuthContext> {
        let context = |record: &KeyRecord, role| AuthContext {
            client_id: record.client_id.clone(),
            key_id: record.key_id.clone(),
            role,
        };
        self.admin
            .get(presented)
            .map(|record| context(record, Role::Admin))
            .or_else(|| {
                self.api
                    .get(presented)
                    .map(|record| context(record, Role::Client))
            })
    }
}

pub async fn require_api_auth(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    let Some(presented) = extract_api_key(request.headers()) else {
        return Ok(unauthorized_response(
            "missing_api_key",
            "Provide X-Classifier-Key or Bearer token",
        ));
    };
    let Some(context) = state.authenticate(&presented) else {
        return Ok(unauthorized_response("invalid_api_key", "Key not recognized"));
    };
    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

pub async fn require_admin_auth(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    let Some(presented) = extract_api_key(request.headers()) else {
        return Ok(unauthorized_response(
            "missing_api_key",
            "Provide an admin key as X-Classifier-Key or Bearer token",
        ));
    };
    match state.authenticate(&presented) {
        Some(context) if context.role == Role::Admin => {
            request.extensions_mut().insert(context);
            Ok(next.run(request).await)
        }
        Some(context) => {
            warn!(
                target = "classifier.api",
                client_id = %context.client_id,
                "client key used on admin route"
            );
            Ok(error_response(
                StatusCode::FORBIDDEN,
                "forbidden",
                "Admin key required",
            ))
        }
        None => Ok(unauthorized_response("invalid_api_key", "Key not recognized")),
    }
}

fn extract_api_key(headers: &http::HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(http::header::AUTHORIZATION)
        && let Ok(raw) = value.to_str()
        && raw.len() >= 7
        && raw[..6].eq_ignore_ascii_case("bearer")
    {
        return Some(raw[6..].trim().to_string());
    }
    headers
        .get(KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn unauthorized_response(code: &str, message: &str) -> Response {
    error_response(StatusCode::UNAUTHORIZED, code, message)
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail: Some(message.to_string()),
    };
    (status, Json(payload)).into_response()
}

fn parse_keys(var: &str, raw: &str, prefix: &str) -> HashMap<String, KeyRecord> {
    let mut entries = HashMap::new();
    for (idx, token) in raw.split(',').enumerate() {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut parts = trimmed.splitn(2, ':');
        let name = parts.next().map(str::trim).filter(|s| !s.is_empty());
        let secret = parts.next().map(str::trim).filter(|s| !s.is_empty());
        match (name, secret) {
            (Some(name), Some(secret)) => {
                entries.insert(
                    secret.to_string(),
                    KeyRecord {
                        client_id: name.to_string(),
                        key_id: format!("{prefix}-{:02}", idx + 1),
                    },
                );
            }
            // never log the secret half
            _ => warn!(
                target = "classifier.api",
                entry = idx + 1,
                "ignored malformed {var} entry"
            ),
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn parses_named_keys_and_skips_malformed() {
        let keys = parse_keys("TEST", "shop:s3cret, broken, :nokey, ops:k2", "key");
        assert_eq!(keys.len(), 2);
        assert_eq!(keys["s3cret"].client_id, "shop");
        assert_eq!(keys["k2"].key_id, "key-04");
    }

    #[test]
    fn demo_key_requires_opt_in() {
        let locked = AuthState::new(None, None, false);
        assert!(locked.authenticate("demo-key").is_none());

        let demo = AuthState::new(None, None, true);
        assert_eq!(
            demo.authenticate("demo-key").map(|ctx| ctx.role),
            Some(Role::Client)
        );

        // configured keys always replace the demo key
        let configured = AuthState::new(Some("shop:abc"), Some("ops:root"), true);
        assert!(configured.authenticate("demo-key").is_none());
        assert_eq!(
            configured.authenticate("root").map(|ctx| ctx.role),
            Some(Role::Admin)
        );
    }

    #[test]
    fn bearer_and_header_keys_are_extracted() {
        let mut headers = http::HeaderMap::new();
        headers.insert(
            http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc"),
        );
        assert_eq!(extract_api_key(&headers).as_deref(), Some("abc"));

        let mut headers = http::HeaderMap::new();
        headers.insert(KEY_HEADER, HeaderValue::from_static("  xyz "));
        assert_eq!(extract_api_key(&headers).as_deref(), Some("xyz"));

        assert!(extract_api_key(&http::HeaderMap::new()).is_none());
    }
}

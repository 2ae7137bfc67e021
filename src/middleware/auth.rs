//! Optional bearer token check for the ingest and admin endpoints
//! (SPEC_FULL.md §6 supplement: "one optional shared-secret bearer check
//! at the edge, not a full auth subsystem").

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AuthState {
    token: Option<Arc<String>>,
}

impl AuthState {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.map(Arc::new),
        }
    }

    fn is_valid(&self, presented: Option<&str>) -> bool {
        match &self.token {
            None => true, // auth disabled when no token is configured
            Some(expected) => presented.map(|p| p == expected.as_str()).unwrap_or(false),
        }
    }
}

pub async fn auth_middleware(
    axum::extract::State(auth): axum::extract::State<AuthState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if auth.is_valid(presented) {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({ "error": "unauthorized" })),
        )
            .into_response()
    }
}

//! HTTP surface: `POST /ingest`, `GET /health`, `GET /stats`, and the
//! operator policy endpoints (spec §6). Not part of the library crate's
//! public module tree: `AppState` binds together pieces assembled by the
//! binary's `main.rs`, which is the only place this module is declared
//! from.

mod policy_routes;
mod routes;

use crate::adapters::FirewallAdapter;
use crate::config::Config;
use crate::detectors::DetectorEngine;
use crate::flow::StreamProcessor;
use crate::ingest::IngestCounters;
use crate::middleware::{auth_middleware, rate_limit_middleware, AuthState, RateLimitLayer};
use crate::policy::PolicyOrchestrator;
use crate::publish::{DurableLog, HotStats};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub processor: Arc<StreamProcessor>,
    pub detectors: Arc<DetectorEngine>,
    pub orchestrator: Arc<PolicyOrchestrator>,
    pub stats: Arc<HotStats>,
    pub log: Arc<dyn DurableLog>,
    pub adapters: Arc<HashMap<String, Arc<dyn FirewallAdapter>>>,
    pub ingest_counters: Arc<HashMap<&'static str, Arc<IngestCounters>>>,
    pub started_at_ns: i64,
}

/// Builds the full router: public `/ingest`/`/health`/`/stats` plus the
/// `/policies` operator surface, wrapped in the rate limit and (optional)
/// bearer-token middleware in that order — auth runs closest to the
/// handler so a rejected request never counts against the rate limiter's
/// burst-only exceptions twice.
pub fn build_router(state: AppState) -> (Router, RateLimitLayer) {
    let auth = AuthState::new(state.config.api_auth_token.clone());
    let rate_limiter = RateLimitLayer::new(state.config.rate_limit.clone());

    let protected = Router::new()
        .route("/ingest", post(routes::ingest_handler))
        .route("/policies", post(policy_routes::create_policy))
        .route("/policies", get(policy_routes::list_policies))
        .route("/policies/validate", post(policy_routes::validate_intent))
        .route("/policies/check-conflicts", post(policy_routes::check_conflicts))
        .route(
            "/policies/:id",
            get(policy_routes::get_policy)
                .put(policy_routes::update_policy)
                .delete(policy_routes::delete_policy),
        )
        .route("/policies/:id/rollback", post(policy_routes::rollback_policy))
        .layer(middleware::from_fn_with_state(auth, auth_middleware));

    let public = Router::new()
        .route("/health", get(routes::health_handler))
        .route("/stats", get(routes::stats_handler));

    let router = Router::new()
        .merge(protected)
        .merge(public)
        .layer(middleware::from_fn_with_state(rate_limiter.clone(), rate_limit_middleware))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()))
        .with_state(state);

    (router, rate_limiter)
}

//! `POST /ingest`, `GET /health`, `GET /stats` (spec §6).

use crate::api::AppState;
use crate::ingest::api::{decode_record, IngestBody};
use crate::normalize::normalize;
use crate::publish::{publish_record, Topic};
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

const API_SOURCE_KEY: &str = "api";

fn now_ns() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as i64
}

#[derive(Serialize)]
pub struct IngestResponse {
    accepted: usize,
    rejected: usize,
    errors: Vec<String>,
}

/// Accepts a single record or a batch (spec §6). Each record is decoded,
/// normalized, admitted into the flow engine, inline-detected, and
/// published to `normalized_traffic` (and `anomalies` for anything that
/// fires); a malformed individual record is reported back rather than
/// dropped silently, since this is a push API with a caller to answer.
pub async fn ingest_handler(State(state): State<AppState>, Json(body): Json<IngestBody>) -> (StatusCode, Json<IngestResponse>) {
    let arrival = now_ns();
    let records = body.into_records();
    let mut accepted = 0;
    let mut errors = Vec::new();

    for record in records {
        let raw = match decode_record(record, arrival) {
            Ok(r) => r,
            Err(e) => {
                errors.push(e.to_string());
                continue;
            }
        };

        let cim = match normalize(&raw) {
            Ok(c) => c,
            Err(e) => {
                errors.push(e.to_string());
                continue;
            }
        };

        state.processor.admit(API_SOURCE_KEY, &cim, false);
        state.stats.observe(&cim, arrival);
        let _ = publish_record(state.log.as_ref(), Topic::NormalizedTraffic, &cim);

        for anomaly in state.detectors.on_event(&cim) {
            state.stats.record_alert(&anomaly);
            let _ = publish_record(state.log.as_ref(), Topic::Anomalies, &anomaly);
        }

        accepted += 1;
    }

    let status = if errors.is_empty() { StatusCode::ACCEPTED } else { StatusCode::MULTI_STATUS };
    let rejected = errors.len();
    (status, Json(IngestResponse { accepted, rejected, errors }))
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    generated_at: String,
    uptime_ns: i64,
    watermarks: std::collections::HashMap<String, i64>,
    ingest_counters: std::collections::HashMap<&'static str, IngestCounterSnapshot>,
    adapters_available: std::collections::HashMap<&'static str, bool>,
}

/// Formats a nanosecond timestamp as RFC3339 for human operators reading
/// `/health` directly; every other timestamp in the system stays raw
/// nanoseconds for machine consumers.
fn to_rfc3339(ns: i64) -> String {
    DateTime::<Utc>::from_timestamp(ns / 1_000_000_000, (ns.rem_euclid(1_000_000_000)) as u32)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

#[derive(Serialize)]
pub struct IngestCounterSnapshot {
    received: u64,
    decode_errors: u64,
    queue_drops: u64,
}

pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let watermarks = state.processor.watermarks().snapshot();

    let ingest_counters = state
        .ingest_counters
        .iter()
        .map(|(source, counters)| {
            let (received, decode_errors, queue_drops) = counters.snapshot();
            (*source, IngestCounterSnapshot { received, decode_errors, queue_drops })
        })
        .collect();

    let mut adapters_available = std::collections::HashMap::new();
    for (vendor, adapter) in state.adapters.iter() {
        adapters_available.insert(leak_vendor(vendor), adapter.is_available().await);
    }

    let now = now_ns();
    Json(HealthResponse {
        status: "ok",
        generated_at: to_rfc3339(now),
        uptime_ns: now - state.started_at_ns,
        watermarks,
        ingest_counters,
        adapters_available,
    })
}

/// Vendor names come from a small, fixed adapter registry built once at
/// startup, so leaking them to `'static` for the health response map key
/// is bounded and avoids an extra `HashMap<String, _>` just for this view.
fn leak_vendor(vendor: &str) -> &'static str {
    match vendor {
        "iptables" => "iptables",
        "nftables" => "nftables",
        "aws" => "aws",
        "azure" => "azure",
        "gcp" => "gcp",
        _ => "unknown",
    }
}

pub async fn stats_handler(State(state): State<AppState>) -> Json<crate::publish::stats::StatsSnapshot> {
    Json(state.stats.snapshot(20))
}

//! SENTINEL core data plane.
//!
//! Exposes the ingest -> normalize -> flow/window -> detect -> policy ->
//! publish pipeline as a library so binaries and tests can wire it up
//! without duplicating construction logic.
//!
//! Note: the `api` route handlers depend on the `AppState` assembled in
//! `main.rs` and are declared there, not re-exported here.

pub mod adapters;
pub mod cim;
pub mod config;
pub mod detectors;
pub mod error;
pub mod flow;
pub mod ingest;
pub mod middleware;
pub mod normalize;
pub mod policy;
pub mod publish;
pub mod shutdown;

//! HTTP edge middleware: request rate limiting and the optional bearer
//! token check (spec §6, SPEC_FULL.md supplement).

pub mod auth;
pub mod rate_limit;

pub use auth::{auth_middleware, AuthState};
pub use rate_limit::{rate_limit_middleware, RateLimitLayer};

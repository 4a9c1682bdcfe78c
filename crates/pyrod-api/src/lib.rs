//! pyrod API - the daemon's request surface
//!
//! A thin axum layer over the agent: every handler receives the shared
//! [`AppContext`] and delegates into the registries, the supervisor, or the
//! file service. Authentication is enforced upstream by the control plane;
//! this surface validates shapes and maps daemon errors onto HTTP statuses.

pub mod context;
pub mod error;
pub mod handlers;
pub mod openapi;
pub mod router;
pub mod server;

pub use context::AppContext;
pub use error::{ApiError, ApiResult};
pub use router::build_router;
pub use server::ApiServer;
